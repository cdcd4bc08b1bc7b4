//! Seeded randomness for fault injection and simulation
//!
//! Every random decision in a simulation run flows through one
//! `DeterministicRng`, so a failing seed replays exactly.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

#[derive(Debug, Clone)]
pub struct DeterministicRng {
    rng: ChaCha8Rng,
}

impl DeterministicRng {
    pub fn new(seed: u64) -> Self {
        DeterministicRng {
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    /// Uniform value in `[min, max)`; returns `min` for an empty range
    pub fn gen_range(&mut self, min: u64, max: u64) -> u64 {
        if min >= max {
            return min;
        }
        self.rng.gen_range(min..max)
    }

    /// Uniform index into a collection of `len` elements
    pub fn gen_index(&mut self, len: usize) -> usize {
        debug_assert!(len > 0, "gen_index on empty collection");
        self.rng.gen_range(0..len.max(1))
    }

    /// Signed value in `[min, max]`
    pub fn gen_i64(&mut self, min: i64, max: i64) -> i64 {
        if min >= max {
            return min;
        }
        self.rng.gen_range(min..=max)
    }

    /// True with the given probability; out-of-range probabilities clamp
    pub fn gen_bool(&mut self, probability: f64) -> bool {
        if probability <= 0.0 || probability.is_nan() {
            return false;
        }
        if probability >= 1.0 {
            return true;
        }
        self.rng.gen_bool(probability)
    }

    pub fn choose<'a, T>(&mut self, items: &'a [T]) -> Option<&'a T> {
        if items.is_empty() {
            return None;
        }
        let idx = self.gen_index(items.len());
        items.get(idx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_seed_same_sequence() {
        let mut a = DeterministicRng::new(42);
        let mut b = DeterministicRng::new(42);
        for _ in 0..100 {
            assert_eq!(a.gen_range(0, 1_000), b.gen_range(0, 1_000));
        }
    }

    #[test]
    fn test_bounds() {
        let mut rng = DeterministicRng::new(7);
        for _ in 0..1_000 {
            let v = rng.gen_i64(-5, 5);
            assert!((-5..=5).contains(&v));
            assert!(rng.gen_index(3) < 3);
        }
        assert_eq!(rng.gen_range(9, 9), 9);
    }

    #[test]
    fn test_gen_bool_extremes() {
        let mut rng = DeterministicRng::new(1);
        assert!((0..100).all(|_| !rng.gen_bool(0.0)));
        assert!((0..100).all(|_| rng.gen_bool(1.0)));
        assert!((0..100).all(|_| !rng.gen_bool(f64::NAN)));
    }

    #[test]
    fn test_choose() {
        let mut rng = DeterministicRng::new(3);
        let empty: [u8; 0] = [];
        assert!(rng.choose(&empty).is_none());
        assert!([1, 2, 3].contains(rng.choose(&[1, 2, 3]).unwrap()));
    }
}
