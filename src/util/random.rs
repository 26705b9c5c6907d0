use rand::Rng;


/// Source of randomness, abstracted so that code depending on random decisions can be tested
///  deterministically
#[cfg_attr(test, mockall::automock)]
pub trait Random: Send + Sync {
    /// uniformly distributed in `[0.0, 1.0)`
    fn next_f64(&self) -> f64;
}

pub struct RngRandom {}
impl Random for RngRandom {
    fn next_f64(&self) -> f64 {
        rand::rng().random_range(0.0..1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rng_random_range() {
        let random = RngRandom {};
        for _ in 0..1000 {
            let v = random.next_f64();
            assert!((0.0..1.0).contains(&v));
        }
    }
}
