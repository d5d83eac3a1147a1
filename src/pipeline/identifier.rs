//! Identifier minting: a short, stable code derived from an object's URI.
//!
//! The seed is hashed into a name-based UUIDv5 (URL namespace for
//! `http(s)://` seeds, DNS namespace otherwise) and the 128-bit value is
//! written in base 57 using an alphabet without look-alike characters
//! (`0`, `1`, `I`, `O`, `l`). The result is always 22 characters.
//!
//! Because the code depends only on the seed, re-running the pipeline against
//! the same archival object yields the same file names and remote keys, which
//! is what makes the existence checks meaningful.

use uuid::Uuid;

const ALPHABET: &[u8; 57] = b"23456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";

/// Number of base-57 digits needed for any 128-bit value.
pub const IDENTIFIER_LEN: usize = 22;

/// Mint the identifier for `seed` (normally the object's canonical URI).
pub fn mint(seed: &str) -> String {
    let lower = seed.to_ascii_lowercase();
    let namespace = if lower.starts_with("http://") || lower.starts_with("https://") {
        Uuid::NAMESPACE_URL
    } else {
        Uuid::NAMESPACE_DNS
    };
    encode(Uuid::new_v5(&namespace, seed.as_bytes()).as_u128())
}

fn encode(mut n: u128) -> String {
    let base = ALPHABET.len() as u128;
    let mut digits = Vec::with_capacity(IDENTIFIER_LEN);
    while n > 0 {
        digits.push(ALPHABET[(n % base) as usize]);
        n /= base;
    }
    digits.resize(IDENTIFIER_LEN.max(digits.len()), ALPHABET[0]);
    digits.iter().rev().map(|&b| b as char).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn known_values() {
        assert_eq!(mint("/repositories/2/archival_objects/1234"), "Xu28VeAknACEvNWYkUmRbv");
        assert_eq!(
            mint("https://archives.example.org/repositories/2/archival_objects/1234"),
            "EVKLnDwQCSqNqYqrY9ZqrZ"
        );
    }

    #[test]
    fn deterministic() {
        let seed = "/repositories/2/archival_objects/98765";
        assert_eq!(mint(seed), mint(seed));
    }

    #[test]
    fn distinct_seeds_distinct_identifiers() {
        let ids: HashSet<String> = (0..1000)
            .map(|i| mint(&format!("/repositories/2/archival_objects/{i}")))
            .collect();
        assert_eq!(ids.len(), 1000);
    }

    #[test]
    fn fixed_length_and_alphabet() {
        for seed in ["", "a", "/repositories/5/archival_objects/1", "HTTP://X"] {
            let id = mint(seed);
            assert_eq!(id.len(), IDENTIFIER_LEN, "{seed:?} -> {id}");
            assert!(id.bytes().all(|b| ALPHABET.contains(&b)), "{id}");
        }
    }

    #[test]
    fn zero_pads_with_first_symbol() {
        assert_eq!(encode(0), "2".repeat(IDENTIFIER_LEN));
        assert_eq!(encode(56), format!("{}z", "2".repeat(IDENTIFIER_LEN - 1)));
    }
}
