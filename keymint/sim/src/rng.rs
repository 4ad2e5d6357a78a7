// Copyright (C) Microsoft Corporation. All rights reserved.

//! Random number source with caller supplied entropy mixed in.

use ks2_keymint_interface::ErrorCode;
use ks2_keymint_interface::KmResult;
use ks2_keymint_interface::MAX_ENTROPY_LEN;
use openssl::sha::Sha256;
use parking_lot::Mutex;

use crate::error::OsslResultExt;

/// OpenSSL randomness XORed with a SHA-256 stream over an entropy pool.
///
/// Added entropy only ever perturbs the output; it can never replace the
/// OpenSSL generator.
pub(crate) struct EntropyPool {
    state: Mutex<PoolState>,
}

struct PoolState {
    pool: [u8; 32],
    counter: u64,
}

impl EntropyPool {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(PoolState {
                pool: [0u8; 32],
                counter: 0,
            }),
        }
    }

    /// Mixes `data` into the pool.
    pub(crate) fn add_entropy(&self, data: &[u8]) -> KmResult<()> {
        if data.len() > MAX_ENTROPY_LEN {
            return Err(ErrorCode::INVALID_INPUT_LENGTH);
        }
        let mut state = self.state.lock();
        let mut hasher = Sha256::new();
        hasher.update(&state.pool);
        hasher.update(data);
        state.pool = hasher.finish();
        Ok(())
    }

    /// Fills `buf` with random bytes.
    pub(crate) fn fill(&self, buf: &mut [u8]) -> KmResult<()> {
        openssl::rand::rand_bytes(buf).or_unknown()?;
        let mut state = self.state.lock();
        for chunk in buf.chunks_mut(32) {
            state.counter = state.counter.wrapping_add(1);
            let mut hasher = Sha256::new();
            hasher.update(&state.pool);
            hasher.update(&state.counter.to_le_bytes());
            let stream = hasher.finish();
            for (b, s) in chunk.iter_mut().zip(stream.iter()) {
                *b ^= s;
            }
        }
        Ok(())
    }

    /// Returns `len` random bytes.
    pub(crate) fn bytes(&self, len: usize) -> KmResult<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.fill(&mut buf)?;
        Ok(buf)
    }

    /// Returns a random non-zero `i64`.
    pub(crate) fn nonzero_i64(&self) -> KmResult<i64> {
        loop {
            let mut buf = [0u8; 8];
            self.fill(&mut buf)?;
            let value = i64::from_le_bytes(buf);
            if value != 0 {
                return Ok(value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use test_with_tracing::test;

    use super::*;

    #[test]
    fn test_entropy_limit() {
        let rng = EntropyPool::new();
        assert_eq!(rng.add_entropy(&[7u8; MAX_ENTROPY_LEN]), Ok(()));
        assert_eq!(
            rng.add_entropy(&[7u8; MAX_ENTROPY_LEN + 1]),
            Err(ErrorCode::INVALID_INPUT_LENGTH)
        );
    }

    #[test]
    fn test_output_varies() {
        let rng = EntropyPool::new();
        let a = rng.bytes(48).expect("bytes");
        rng.add_entropy(b"seed").expect("entropy");
        let b = rng.bytes(48).expect("bytes");
        assert_eq!(a.len(), 48);
        assert_ne!(a, b);
        assert_ne!(rng.nonzero_i64().expect("i64"), 0);
    }
}
