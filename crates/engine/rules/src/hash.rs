//! Stable string hashing for prefab and procedure names

use serde::{Deserialize, Serialize};
use std::fmt;

/// Deterministic 32-bit string hash.
///
/// Two interleaved djb2 accumulators over the even and odd characters. The
/// result must stay identical across processes and platforms because hashes
/// are persisted in world records and sent over the wire.
pub fn stable_hash(text: &str) -> i32 {
    let chars: Vec<u32> = text.chars().map(|c| c as u32).collect();
    let mut even: i32 = 5381;
    let mut odd: i32 = even;
    let mut i = 0;
    while i < chars.len() && chars[i] != 0 {
        even = (even.wrapping_shl(5)).wrapping_add(even) ^ chars[i] as i32;
        if i == chars.len() - 1 || chars[i + 1] == 0 {
            break;
        }
        odd = (odd.wrapping_shl(5)).wrapping_add(odd) ^ chars[i + 1] as i32;
        i += 2;
    }
    even.wrapping_add(odd.wrapping_mul(1_566_083_941))
}

/// Prefab type identifier (stable hash of the prefab name)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct PrefabHash(pub i32);

impl PrefabHash {
    /// The "no prefab" id
    pub const NONE: PrefabHash = PrefabHash(0);

    /// Hash a prefab name
    pub fn of(name: &str) -> Self {
        PrefabHash(stable_hash(name))
    }

    pub fn is_none(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for PrefabHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_is_deterministic() {
        assert_eq!(stable_hash("Beech1"), stable_hash("Beech1"));
        assert_ne!(stable_hash("Beech1"), stable_hash("Beech2"));
        assert_eq!(stable_hash(""), 5381i32.wrapping_add(5381i32.wrapping_mul(1_566_083_941)));
    }

    #[test]
    fn test_odd_and_even_lengths() {
        assert_ne!(stable_hash("ab"), stable_hash("abc"));
        assert_ne!(stable_hash("a"), stable_hash("b"));
        assert_eq!(PrefabHash::of("rock").0, stable_hash("rock"));
    }
}
