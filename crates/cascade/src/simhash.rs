//! 64-bit (by default) SimHash fingerprinting, ported from the source's
//! `utils/dedupe.py`. Near-dup memory lives in the cascade and is per-run
//! only; `hamming_distance` is exposed as a standalone utility for offline
//! cross-run comparison, per the design notes' explicit allowance.

use regex::Regex;
use sha2::{Digest, Sha256};
use std::sync::OnceLock;

fn word_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\w+").unwrap())
}

pub fn tokenize(text: &str) -> Vec<String> {
    word_re()
        .find_iter(&text.to_lowercase())
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Hashes one token to a stable value, then folds SHA-256's 256 bits down
/// to `bits` by XORing 32-bit lanes together (stable across runs/platforms,
/// unlike `Hash`/`DefaultHasher`).
fn token_hash(token: &str, bits: u32) -> u64 {
    let digest = Sha256::digest(token.as_bytes());
    let mut folded: u64 = 0;
    for chunk in digest.chunks(8) {
        let mut buf = [0u8; 8];
        buf[..chunk.len()].copy_from_slice(chunk);
        folded ^= u64::from_be_bytes(buf);
    }
    if bits >= 64 {
        folded
    } else {
        folded & ((1u64 << bits) - 1)
    }
}

/// Computes the SimHash fingerprint of `text` over `bits` bits (default 64).
pub fn simhash(text: &str, bits: u32) -> u64 {
    let tokens = tokenize(text);
    if tokens.is_empty() {
        return 0;
    }
    let mut acc = vec![0i64; bits as usize];
    for token in &tokens {
        let hash = token_hash(token, bits);
        for (i, slot) in acc.iter_mut().enumerate() {
            if (hash >> i) & 1 == 1 {
                *slot += 1;
            } else {
                *slot -= 1;
            }
        }
    }
    let mut fingerprint: u64 = 0;
    for (i, slot) in acc.iter().enumerate() {
        if *slot >= 0 {
            fingerprint |= 1 << i;
        }
    }
    fingerprint
}

pub fn hamming_distance(a: u64, b: u64) -> u32 {
    (a ^ b).count_ones()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_text_has_zero_distance() {
        let a = simhash("the quick brown fox jumps over the lazy dog", 64);
        let b = simhash("the quick brown fox jumps over the lazy dog", 64);
        assert_eq!(hamming_distance(a, b), 0);
    }

    #[test]
    fn empty_text_hashes_to_zero() {
        assert_eq!(simhash("   ", 64), 0);
    }

    #[test]
    fn similar_text_has_small_distance() {
        let a = simhash("a webring of handcrafted retro homepages", 64);
        let b = simhash("a webring of handcrafted retro homepage", 64);
        assert!(hamming_distance(a, b) < 20);
    }
}
