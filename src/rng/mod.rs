//! Seeded random number generation for permutation tests
//!
//! Mersenne Twister with R's `set.seed()` scrambling and R's rejection
//! sampling for uniform indices, so permutation nulls are reproducible from a
//! single integer seed.

/// Mersenne Twister (MT19937) seeded the way R seeds it
#[derive(Clone)]
pub struct MersenneTwister {
    state: [u32; 624],
    index: usize,
}

impl MersenneTwister {
    const N: usize = 624;
    const M: usize = 397;
    const MATRIX_A: u32 = 0x9908B0DF;
    const UPPER_MASK: u32 = 0x80000000;
    const LOWER_MASK: u32 = 0x7FFFFFFF;

    /// Create a generator in the state R reaches after `set.seed(seed)`
    ///
    /// R fills the MT state from an LCG x <- 69069 x + 1 (mod 2^32): 50
    /// warm-up steps, one discarded value, then 624 state words.
    pub fn new(seed: u32) -> Self {
        let mut mt = MersenneTwister {
            state: [0; Self::N],
            index: Self::N,
        };
        let mut x = seed;
        for _ in 0..51 {
            x = x.wrapping_mul(69069).wrapping_add(1);
        }
        for i in 0..Self::N {
            x = x.wrapping_mul(69069).wrapping_add(1);
            mt.state[i] = x;
        }
        mt
    }

    /// Independent stream `stream` derived from a base seed
    pub fn for_stream(seed: u32, stream: usize) -> Self {
        Self::new(seed.wrapping_add((stream as u32).wrapping_mul(7919)))
    }

    fn generate_numbers(&mut self) {
        for i in 0..Self::N {
            let y = (self.state[i] & Self::UPPER_MASK) | (self.state[(i + 1) % Self::N] & Self::LOWER_MASK);
            self.state[i] = self.state[(i + Self::M) % Self::N] ^ (y >> 1);
            if y & 1 != 0 {
                self.state[i] ^= Self::MATRIX_A;
            }
        }
        self.index = 0;
    }

    fn next_u32(&mut self) -> u32 {
        if self.index >= Self::N {
            self.generate_numbers();
        }

        let mut y = self.state[self.index];
        self.index += 1;

        y ^= y >> 11;
        y ^= (y << 7) & 0x9D2C5680;
        y ^= (y << 15) & 0xEFC60000;
        y ^= y >> 18;
        y
    }

    /// Uniform in (0, 1); exact 0 and 1 are nudged inside as R does
    pub fn runif(&mut self) -> f64 {
        const I2_32M1: f64 = 2.3283064365386963e-10;
        let result = self.next_u32() as f64 * I2_32M1;
        if result <= 0.0 {
            0.5 * I2_32M1
        } else if result >= 1.0 {
            1.0 - 0.5 * I2_32M1
        } else {
            result
        }
    }

    /// `bits` random bits assembled from 16-bit chunks
    fn rbits(&mut self, bits: u32) -> u64 {
        let mut v: u64 = 0;
        let mut n = 0;
        while n <= bits {
            let chunk = (self.runif() * 65536.0).floor() as u64;
            v = v.wrapping_mul(65536).wrapping_add(chunk);
            n += 16;
        }
        v & ((1u64 << bits) - 1)
    }

    /// Uniform index in [0, n) by rejection sampling
    pub fn unif_index(&mut self, n: usize) -> usize {
        if n <= 1 {
            return 0;
        }
        let bits = (n as f64).log2().ceil() as u32;
        loop {
            let v = self.rbits(bits);
            if (v as usize) < n {
                return v as usize;
            }
        }
    }

    /// Partial Fisher-Yates: afterwards `pool[..k]` is a uniform draw of `k`
    /// distinct elements. `pool` stays a permutation, so it can be reused
    /// across draws without resetting.
    pub fn shuffle_prefix(&mut self, pool: &mut [usize], k: usize) {
        let n = pool.len();
        for i in 0..k.min(n) {
            let j = i + self.unif_index(n - i);
            pool.swap(i, j);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runif_matches_r() {
        // set.seed(2); runif(5)
        let expected = [0.1848822599, 0.7023740360, 0.5733263348, 0.1680519204, 0.9438393388];
        let mut rng = MersenneTwister::new(2);
        for &exp in &expected {
            assert!((rng.runif() - exp).abs() < 1e-9);
        }
    }

    #[test]
    fn test_same_seed_same_stream() {
        let mut a = MersenneTwister::for_stream(42, 3);
        let mut b = MersenneTwister::for_stream(42, 3);
        let mut c = MersenneTwister::for_stream(42, 4);
        let xs: Vec<usize> = (0..20).map(|_| a.unif_index(1000)).collect();
        let ys: Vec<usize> = (0..20).map(|_| b.unif_index(1000)).collect();
        let zs: Vec<usize> = (0..20).map(|_| c.unif_index(1000)).collect();
        assert_eq!(xs, ys);
        assert_ne!(xs, zs);
    }

    #[test]
    fn test_shuffle_prefix_draws_distinct_elements() {
        let mut rng = MersenneTwister::new(7);
        let mut pool: Vec<usize> = (0..50).collect();
        for _ in 0..5 {
            rng.shuffle_prefix(&mut pool, 20);
            let mut drawn = pool[..20].to_vec();
            drawn.sort_unstable();
            drawn.dedup();
            assert_eq!(drawn.len(), 20);
            assert!(drawn.iter().all(|&i| i < 50));
        }
        let mut all = pool.clone();
        all.sort_unstable();
        assert_eq!(all, (0..50).collect::<Vec<_>>());

        let mut short: Vec<usize> = (0..3).collect();
        rng.shuffle_prefix(&mut short, 10);
        assert_eq!(short.len(), 3);
    }
}
