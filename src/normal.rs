//! Gaussian price draws via the polar Box–Muller transform.

use crate::rng::Xoroshiro128Plus;

/// Normal sampler that keeps the second Box–Muller output as a spare.
///
/// Not thread-safe; each simulation thread owns one.
#[derive(Clone, Copy, Debug, Default)]
pub struct NormalBoxMuller {
    has_spare: bool,
    spare: f64,
}

impl NormalBoxMuller {
    pub fn new() -> Self {
        Self::default()
    }

    /// Draw from N(mean, sigma^2).
    pub fn sample(&mut self, rng: &mut Xoroshiro128Plus, mean: f64, sigma: f64) -> f64 {
        if self.has_spare {
            self.has_spare = false;
            return mean + sigma * self.spare;
        }

        // Rejection-sample a point in the unit disc, excluding the origin.
        let (u, v, s) = loop {
            let u = 2.0 * rng.next_uniform01() - 1.0;
            let v = 2.0 * rng.next_uniform01() - 1.0;
            let s = u * u + v * v;
            if s > 0.0 && s < 1.0 {
                break (u, v, s);
            }
        };

        let m = (-2.0 * s.ln() / s).sqrt();
        self.spare = v * m;
        self.has_spare = true;
        mean + sigma * (u * m)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_statistics() {
        let mut rng = Xoroshiro128Plus::new(42);
        let mut normal = NormalBoxMuller::new();

        const N: usize = 200_000;
        let mut sum = 0.0;
        let mut sum_sq = 0.0;
        for _ in 0..N {
            let z = normal.sample(&mut rng, 10.0, 2.0);
            sum += z;
            sum_sq += z * z;
        }

        let mean = sum / N as f64;
        let var = sum_sq / N as f64 - mean * mean;
        assert!((mean - 10.0).abs() < 0.05, "mean was {mean}");
        assert!((var - 4.0).abs() < 0.1, "variance was {var}");
    }

    #[test]
    fn test_spare_is_consumed() {
        let mut rng = Xoroshiro128Plus::new(1);
        let mut normal = NormalBoxMuller::new();

        // Two consecutive samples come from one rejection loop: the second
        // must not touch the generator.
        let _ = normal.sample(&mut rng, 0.0, 1.0);
        let state_before = rng;
        let _ = normal.sample(&mut rng, 0.0, 1.0);
        assert_eq!(state_before.clone().next_u64(), rng.next_u64());
    }

    #[test]
    fn test_deterministic_given_seed() {
        let mut a = (Xoroshiro128Plus::new(5), NormalBoxMuller::new());
        let mut b = (Xoroshiro128Plus::new(5), NormalBoxMuller::new());
        for _ in 0..1000 {
            assert_eq!(
                a.1.sample(&mut a.0, 100.0, 0.5),
                b.1.sample(&mut b.0, 100.0, 0.5)
            );
        }
    }
}
