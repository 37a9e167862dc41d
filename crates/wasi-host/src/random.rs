use crate::Error;
use cap_rand::{Rng, RngCore, SeedableRng};

/// Largest slice handed to the generator in a single fill.
pub const MAX_FILL_SIZE: usize = 1 << 16;

/// A ChaCha-based generator seeded from the host's entropy source.
pub fn random_ctx() -> Box<dyn RngCore + Send + Sync> {
    let mut rng = cap_rand::thread_rng(cap_rand::ambient_authority());
    Box::new(cap_rand::rngs::StdRng::from_seed(rng.r#gen()))
}

/// A generator that replays the same stream for the same seed.
#[cfg(any(test, feature = "deterministic-random"))]
pub fn deterministic_ctx(seed: u64) -> Box<dyn RngCore + Send + Sync> {
    Box::new(cap_rand::rngs::StdRng::seed_from_u64(seed))
}

/// Fill `buf` completely, `MAX_FILL_SIZE` bytes at a time.
pub fn fill(rng: &mut dyn RngCore, buf: &mut [u8]) -> Result<(), Error> {
    for chunk in buf.chunks_mut(MAX_FILL_SIZE) {
        rng.try_fill_bytes(chunk).map_err(|e| {
            Error::trap(anyhow::Error::msg(e.to_string()).context("random source failed"))
        })?;
    }
    Ok(())
}

/// Exactly `len` random bytes.
pub fn fill_random(rng: &mut dyn RngCore, len: usize) -> Result<Vec<u8>, Error> {
    let mut bytes = vec![0; len];
    fill(rng, &mut bytes)?;
    Ok(bytes)
}
