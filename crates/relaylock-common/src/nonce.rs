//! Per-link nonce generation
//!
//! Every relay link owns one generator. Nonces only have to be unique among
//! the requests outstanding on that link, so a plain counter is enough. The
//! counter value is rendered as its little-endian bytes with the high-order
//! zero bytes trimmed, base64 encoded, which keeps nonces short and space
//! free while distinct counters stay distinct.

use std::sync::atomic::{AtomicU64, Ordering};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

/// Monotonically increasing nonce source
#[derive(Debug)]
pub struct NonceGenerator {
    next: AtomicU64,
}

impl Default for NonceGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl NonceGenerator {
    /// Create a generator whose first nonce is 1
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    /// Take the next raw counter value
    pub fn next_u64(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }

    /// Take the next nonce in its wire form
    pub fn next_nonce(&self) -> String {
        encode_nonce(self.next_u64())
    }
}

/// Render a counter value as a wire nonce
pub fn encode_nonce(value: u64) -> String {
    let bytes = value.to_le_bytes();
    let end = bytes.iter().rposition(|b| *b != 0).map_or(0, |i| i + 1);
    STANDARD.encode(&bytes[..end])
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;

    use proptest::prelude::*;

    use super::*;

    #[test]
    fn test_first_nonces() {
        let generator = NonceGenerator::new();
        assert_eq!(generator.next_nonce(), "AQ==");
        assert_eq!(generator.next_nonce(), "Ag==");
        assert_eq!(generator.next_u64(), 3);
    }

    #[test]
    fn test_encode_trims_high_order_zero_bytes() {
        // 256 = [0x00, 0x01, 0, ...]; the low zero byte is kept
        assert_eq!(encode_nonce(256), "AAE=");
        assert_eq!(encode_nonce(0x0102), "AgE=");
        assert_eq!(encode_nonce(0), "");
    }

    #[test]
    fn test_nonces_unique_across_byte_boundaries() {
        let generator = NonceGenerator::new();
        let mut seen = HashSet::new();
        for counter in 1..=70_000u64 {
            let nonce = generator.next_nonce();
            assert!(seen.insert(nonce.clone()), "nonce {} repeated at {}", nonce, counter);
        }
    }

    #[tokio::test]
    async fn test_concurrent_values_are_unique() {
        let generator = Arc::new(NonceGenerator::new());
        let mut handles = Vec::new();
        for _ in 0..4 {
            let generator = generator.clone();
            handles.push(tokio::spawn(async move {
                (0..250).map(|_| generator.next_u64()).collect::<Vec<_>>()
            }));
        }

        let mut seen = HashSet::new();
        for handle in handles {
            for value in handle.await.unwrap() {
                assert!(seen.insert(value), "duplicate counter value {}", value);
            }
        }
        assert_eq!(seen.len(), 1000);
    }

    proptest! {
        #[test]
        fn prop_nonce_has_no_spaces(value in 1u64..) {
            let nonce = encode_nonce(value);
            prop_assert!(!nonce.is_empty());
            prop_assert!(!nonce.contains(' '));
        }
    }
}
