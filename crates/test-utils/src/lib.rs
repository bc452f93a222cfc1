//! Test helpers: arbitrary-driven generators, deterministic chain builders,
//! and fault-injecting store wrappers for crash testing.

pub mod chain;
pub mod faults;

use arbitrary::{Arbitrary, Unstructured};
use rand::RngCore;

/// Pool of random bytes backing arbitrary generation.
const ARB_GEN_BUF_LEN: usize = 16 * 1024;

/// Generates arbitrary instances from a random byte pool.
pub struct ArbitraryGenerator {
    buf: Vec<u8>,
}

impl Default for ArbitraryGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl ArbitraryGenerator {
    pub fn new() -> Self {
        Self::with_size(ARB_GEN_BUF_LEN)
    }

    pub fn with_size(size: usize) -> Self {
        let mut buf = vec![0; size];
        rand::thread_rng().fill_bytes(&mut buf);
        Self { buf }
    }

    pub fn generate<'a, T: Arbitrary<'a>>(&'a self) -> T {
        let mut u = Unstructured::new(&self.buf);
        T::arbitrary(&mut u).expect("failed to generate arbitrary instance")
    }
}
