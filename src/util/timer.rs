use std::time::Duration;
use tokio::time::Instant;


/// A restartable countdown. It is based on tokio's clock so that code using it can be tested
///  with paused time.
#[derive(Debug, Clone)]
pub struct Timer {
    timeout: Duration,
    started_at: Instant,
}
impl Timer {
    pub fn new(timeout: Duration) -> Timer {
        Timer {
            timeout,
            started_at: Instant::now(),
        }
    }

    pub fn reset(&mut self) {
        self.started_at = Instant::now();
    }

    pub fn is_expired(&self) -> bool {
        self.started_at.elapsed() >= self.timeout
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;
    use tokio::time;
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_timer() {
        let mut timer = Timer::new(Duration::from_millis(100));
        assert!(!timer.is_expired());

        time::advance(Duration::from_millis(99)).await;
        assert!(!timer.is_expired());
        time::advance(Duration::from_millis(1)).await;
        assert!(timer.is_expired());

        timer.reset();
        assert!(!timer.is_expired());
        time::advance(Duration::from_millis(150)).await;
        assert!(timer.is_expired());
    }
}
