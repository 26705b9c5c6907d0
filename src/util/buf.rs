use anyhow::bail;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use bytes_varint::{VarIntSupport, VarIntSupportMut};


pub fn put_string(buf: &mut BytesMut, s: &str) {
    buf.put_usize_varint(s.len());
    buf.put_slice(s.as_bytes());
}

pub fn try_get_string(buf: &mut impl Buf) -> anyhow::Result<String> {
    let raw = try_get_bytes(buf)?;
    let s = String::from_utf8(raw.to_vec())?;
    Ok(s)
}

pub fn put_bytes(buf: &mut BytesMut, bytes: &[u8]) {
    buf.put_usize_varint(bytes.len());
    buf.put_slice(bytes);
}

pub fn try_get_bytes(buf: &mut impl Buf) -> anyhow::Result<Bytes> {
    let len = buf.try_get_usize_varint()?;
    if buf.remaining() < len {
        bail!("buffer underflow: length prefix {} exceeds remaining {} bytes", len, buf.remaining());
    }
    Ok(buf.copy_to_bytes(len))
}

/// A list of opaque values as one buffer: a varint count followed by length-prefixed entries
pub fn put_bytes_list(buf: &mut BytesMut, values: &[Bytes]) {
    buf.put_usize_varint(values.len());
    for v in values {
        put_bytes(buf, v);
    }
}

pub fn try_get_bytes_list(buf: &mut impl Buf) -> anyhow::Result<Vec<Bytes>> {
    let len = buf.try_get_usize_varint()?;
    // NB: every entry takes at least one byte, so this bounds the allocation by the input size
    if len > buf.remaining() {
        bail!("list length {} exceeds remaining {} bytes", len, buf.remaining());
    }
    let mut result = Vec::with_capacity(len);
    for _ in 0..len {
        result.push(try_get_bytes(buf)?);
    }
    Ok(result)
}
