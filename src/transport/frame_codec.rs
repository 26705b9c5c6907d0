use anyhow::bail;
use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::util::safe_converter::{PrecheckedCast, SafeCast};


/// Writes one multipart message: the number of frames as u32 (network byte order), followed by
///  each frame's length as u32 and its bytes
pub async fn write_multipart<W: AsyncWrite + Unpin>(w: &mut W, frames: &[Bytes], max_message_len: usize) -> anyhow::Result<()> {
    let total_len: usize = frames.iter()
        .map(|f| f.len() + size_of::<u32>())
        .sum::<usize>() + size_of::<u32>();
    if total_len > max_message_len {
        bail!("message of {} bytes exceeds the configured maximum of {}", total_len, max_message_len);
    }

    let mut buf = BytesMut::with_capacity(total_len);
    buf.put_u32(frames.len().prechecked_cast());
    for frame in frames {
        buf.put_u32(frame.len().prechecked_cast());
        buf.put_slice(frame);
    }

    w.write_all(&buf).await?;
    w.flush().await?;
    Ok(())
}

/// Reads one multipart message. Returns `None` if the stream ends cleanly before a new message
///  starts, and an error if it ends in the middle of a message.
pub async fn read_multipart<R: AsyncRead + Unpin>(r: &mut R, max_message_len: usize) -> anyhow::Result<Option<Vec<Bytes>>> {
    let mut len_buf = [0u8; 4];
    let num_read = r.read(&mut len_buf).await?;
    if num_read == 0 {
        return Ok(None);
    }
    r.read_exact(&mut len_buf[num_read..]).await?;

    let num_frames: usize = u32::from_be_bytes(len_buf).safe_cast();
    let mut total_len = size_of::<u32>().saturating_mul(num_frames.saturating_add(1));
    if total_len > max_message_len {
        bail!("received a message with {} frames, exceeding the configured maximum length - closing connection", num_frames);
    }

    let mut result = Vec::with_capacity(num_frames);
    for _ in 0..num_frames {
        r.read_exact(&mut len_buf).await?;
        let frame_len: usize = u32::from_be_bytes(len_buf).safe_cast();

        total_len += frame_len;
        if total_len > max_message_len {
            bail!("received a message that is longer than the configured maximum ({}) - closing connection", max_message_len);
        }

        let mut frame = vec![0u8; frame_len];
        r.read_exact(&mut frame).await?;
        result.push(Bytes::from(frame));
    }
    Ok(Some(result))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::future::Future;
    use tokio::runtime::Builder;

    fn block_on<F: Future>(f: F) -> F::Output {
        Builder::new_current_thread()
            .build()
            .unwrap()
            .block_on(f)
    }

    #[rstest]
    #[case::empty(vec![], b"\0\0\0\0".as_slice())]
    #[case::single(vec![b"abc".as_slice()], b"\0\0\0\x01\0\0\0\x03abc".as_slice())]
    #[case::empty_frame(vec![b"".as_slice(), b"x".as_slice()], b"\0\0\0\x02\0\0\0\0\0\0\0\x01x".as_slice())]
    fn test_write_multipart(#[case] frames: Vec<&'static [u8]>, #[case] expected: &[u8]) {
        let frames = frames.into_iter()
            .map(Bytes::from_static)
            .collect::<Vec<_>>();

        let mut buf = Vec::new();
        block_on(write_multipart(&mut buf, &frames, 1024)).unwrap();
        assert_eq!(buf, expected);

        let mut read_buf: &[u8] = &buf;
        assert_eq!(block_on(read_multipart(&mut read_buf, 1024)).unwrap(), Some(frames));
        assert!(read_buf.is_empty());
    }

    #[tokio::test]
    async fn test_write_too_long() {
        let mut buf = Vec::new();
        let result = write_multipart(&mut buf, &[Bytes::from_static(b"0123456789")], 17).await;
        assert!(result.is_err());
        assert!(buf.is_empty());
    }

    #[rstest]
    #[case::clean_eof(b"".as_slice(), Some(None))]
    #[case::two_messages(b"\0\0\0\x01\0\0\0\x01a\0\0\0\0".as_slice(), Some(Some(vec![b"a".as_slice()])))]
    #[case::eof_in_header(b"\0\0".as_slice(), None)]
    #[case::eof_in_frame(b"\0\0\0\x01\0\0\0\x05ab".as_slice(), None)]
    #[case::frame_too_long(b"\0\0\0\x01\0\0\x10\0abc".as_slice(), None)]
    #[case::too_many_frames(b"\xff\xff\xff\xff".as_slice(), None)]
    fn test_read_multipart(#[case] mut buf: &[u8], #[case] expected: Option<Option<Vec<&'static [u8]>>>) {
        let actual = block_on(read_multipart(&mut buf, 1024));
        match expected {
            Some(expected) => {
                let expected = expected.map(|frames| frames.into_iter().map(Bytes::from_static).collect::<Vec<_>>());
                assert_eq!(actual.unwrap(), expected);
            }
            None => assert!(actual.is_err()),
        }
    }
}
