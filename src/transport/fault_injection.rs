use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::bail;
use async_trait::async_trait;
use bytes::Bytes;
use tracing::trace;

use crate::transport::socket::{DealerSocket, RouterSocket, SocketFactory};
use crate::util::random::{Random, RngRandom};


/// Wraps another [SocketFactory], silently dropping outgoing messages with a configurable
///  probability. This is for testing how the protocols recover from lost messages.
///
/// Only network sockets are affected: communication between a communicator's front end and its
///  background worker does not go through sockets.
pub struct FaultInjectionSocketFactory {
    inner: Arc<dyn SocketFactory>,
    drop_probability: f64,
    random: Arc<dyn Random>,
}

impl FaultInjectionSocketFactory {
    pub fn new(inner: Arc<dyn SocketFactory>, drop_probability: f64) -> anyhow::Result<FaultInjectionSocketFactory> {
        Self::with_random(inner, drop_probability, Arc::new(RngRandom {}))
    }

    pub fn with_random(inner: Arc<dyn SocketFactory>, drop_probability: f64, random: Arc<dyn Random>) -> anyhow::Result<FaultInjectionSocketFactory> {
        if !(0.0..=1.0).contains(&drop_probability) {
            bail!("drop probability must be between 0.0 and 1.0, was {}", drop_probability);
        }
        Ok(FaultInjectionSocketFactory {
            inner,
            drop_probability,
            random,
        })
    }
}

#[async_trait]
impl SocketFactory for FaultInjectionSocketFactory {
    async fn bind_router(&self, addr: SocketAddr) -> anyhow::Result<Box<dyn RouterSocket>> {
        self.inner.bind_router(addr).await
    }

    async fn connect_dealer(&self, addr: SocketAddr) -> anyhow::Result<Box<dyn DealerSocket>> {
        let inner = self.inner.connect_dealer(addr).await?;
        Ok(Box::new(FaultInjectionDealerSocket {
            inner,
            addr,
            drop_probability: self.drop_probability,
            random: self.random.clone(),
        }))
    }
}

struct FaultInjectionDealerSocket {
    inner: Box<dyn DealerSocket>,
    addr: SocketAddr,
    drop_probability: f64,
    random: Arc<dyn Random>,
}

#[async_trait]
impl DealerSocket for FaultInjectionDealerSocket {
    async fn send_multipart(&mut self, frames: &[Bytes]) -> anyhow::Result<()> {
        if self.random.next_f64() < self.drop_probability {
            trace!("fault injection: dropping message to {:?}", self.addr);
            return Ok(());
        }
        self.inner.send_multipart(frames).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::socket::MockDealerSocket;
    use crate::util::random::MockRandom;
    use rstest::rstest;
    use std::sync::Mutex;
    use tokio::runtime::Builder;

    struct StubSocketFactory {
        dealer: Mutex<Option<MockDealerSocket>>,
    }

    #[async_trait]
    impl SocketFactory for StubSocketFactory {
        async fn bind_router(&self, _addr: SocketAddr) -> anyhow::Result<Box<dyn RouterSocket>> {
            bail!("not supported")
        }

        async fn connect_dealer(&self, _addr: SocketAddr) -> anyhow::Result<Box<dyn DealerSocket>> {
            match self.dealer.lock().unwrap().take() {
                Some(dealer) => Ok(Box::new(dealer)),
                None => bail!("only one dealer"),
            }
        }
    }

    #[rstest]
    #[case::never_drop(0.0, vec![0.0, 0.5, 0.99], 3)]
    #[case::always_drop(1.0, vec![0.0, 0.5, 0.99], 0)]
    #[case::partial(0.3, vec![0.1, 0.3, 0.29, 0.8], 2)]
    fn test_drop_outgoing(#[case] drop_probability: f64, #[case] random_values: Vec<f64>, #[case] expected_sends: usize) {
        let num_sends = random_values.len();

        let mut dealer = MockDealerSocket::new();
        dealer.expect_send_multipart()
            .times(expected_sends)
            .returning(|_| Ok(()));

        let mut random = MockRandom::new();
        let mut random_values = random_values.into_iter();
        random.expect_next_f64()
            .times(num_sends)
            .returning(move || random_values.next().unwrap());

        let factory = FaultInjectionSocketFactory::with_random(
            Arc::new(StubSocketFactory { dealer: Mutex::new(Some(dealer)) }),
            drop_probability,
            Arc::new(random),
        ).unwrap();

        Builder::new_current_thread().build().unwrap().block_on(async {
            let mut dealer = factory.connect_dealer("127.0.0.1:1".parse().unwrap()).await.unwrap();
            for _ in 0..num_sends {
                dealer.send_multipart(&[Bytes::from_static(b"x")]).await.unwrap();
            }
        });
    }

    #[rstest]
    #[case::negative(-0.1)]
    #[case::above_one(1.5)]
    fn test_invalid_probability(#[case] drop_probability: f64) {
        let inner = Arc::new(StubSocketFactory { dealer: Mutex::new(None) });
        assert!(FaultInjectionSocketFactory::new(inner, drop_probability).is_err());
    }
}
