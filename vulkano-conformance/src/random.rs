//! The seeded generator that produces the input data of the scenarios.
//!
//! The generator is a 128-bit xorshift, seeded the same way across runs and platforms so that
//! the inputs of a scenario, and therefore its expected results, are reproducible.

use rand::{RngCore, SeedableRng};

/// A xorshift128 pseudorandom number generator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Random {
    x: u32,
    y: u32,
    z: u32,
    w: u32,
}

impl Random {
    /// Creates a generator from a 32-bit seed.
    #[inline]
    pub const fn new(seed: u32) -> Self {
        Random {
            x: seed.wrapping_neg() ^ 123_456_789,
            y: seed.wrapping_mul(362_436_069),
            z: 521_288_629 ^ (seed >> 7),
            w: 88_675_123 ^ (seed << 3),
        }
    }

    /// Returns `len` consecutive values of the generator.
    pub fn words(&mut self, len: usize) -> Vec<u32> {
        (0..len).map(|_| self.next_u32()).collect()
    }
}

impl RngCore for Random {
    #[inline]
    fn next_u32(&mut self) -> u32 {
        let t = self.x ^ (self.x << 11);
        self.x = self.y;
        self.y = self.z;
        self.z = self.w;
        self.w = (self.w ^ (self.w >> 19)) ^ (t ^ (t >> 8));

        self.w
    }

    /// The first value is the low half.
    #[inline]
    fn next_u64(&mut self) -> u64 {
        let low = u64::from(self.next_u32());
        let high = u64::from(self.next_u32());

        (high << 32) | low
    }

    /// Fills `dest` with consecutive values in little-endian order. A trailing partial word uses
    /// the low bytes of one more value.
    fn fill_bytes(&mut self, dest: &mut [u8]) {
        for chunk in dest.chunks_mut(4) {
            let bytes = self.next_u32().to_le_bytes();
            chunk.copy_from_slice(&bytes[..chunk.len()]);
        }
    }

    #[inline]
    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand::Error> {
        self.fill_bytes(dest);

        Ok(())
    }
}

impl SeedableRng for Random {
    type Seed = [u8; 16];

    /// Uses the seed as the raw state. An all-zero state would only ever produce zeroes, so it
    /// is replaced by the state of `Random::new(0)`.
    fn from_seed(seed: Self::Seed) -> Self {
        let state: [u32; 4] = bytemuck::cast(seed);

        if state == [0; 4] {
            return Random::new(0);
        }

        let [x, y, z, w] = state.map(u32::from_le);

        Random { x, y, z, w }
    }

    #[inline]
    fn seed_from_u64(state: u64) -> Self {
        Random::new(state as u32 ^ (state >> 32) as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reproducible() {
        let mut a = Random::new(0x124fef);
        let mut b = Random::new(0x124fef);
        assert_eq!(a.words(64), b.words(64));

        let mut c = Random::new(0x124ff0);
        assert_ne!(a.words(8), c.words(8));
    }

    #[test]
    fn rng_core_consistency() {
        let mut a = Random::new(7);
        let mut b = a.clone();

        let low = u64::from(b.next_u32());
        let high = u64::from(b.next_u32());
        assert_eq!(a.next_u64(), (high << 32) | low);

        let mut bytes = [0u8; 8];
        a.fill_bytes(&mut bytes);
        let expected = [b.next_u32(), b.next_u32()];
        assert_eq!(bytes, bytemuck::cast::<_, [u8; 8]>(expected.map(u32::to_le)));
    }

    #[test]
    fn partial_fill() {
        let mut a = Random::new(11);
        let mut b = a.clone();

        let mut bytes = [0u8; 6];
        a.fill_bytes(&mut bytes);
        let first = b.next_u32().to_le_bytes();
        let second = b.next_u32().to_le_bytes();
        assert_eq!(bytes[..4], first);
        assert_eq!(bytes[4..], second[..2]);
        assert_eq!(a, b);
    }

    #[test]
    fn zero_seed_is_not_degenerate() {
        let mut rng = Random::from_seed([0; 16]);
        assert_eq!(rng, Random::new(0));
        assert!(rng.words(4).iter().any(|&word| word != 0));
    }
}
