//! DAT stream cipher: the Rand31PM keystream and the key/dialect table.
//!
//! Keystream: Park–Miller minimal standard generator (a = 16807,
//! m = 2^31 − 1) stepped with Schrage's decomposition on a signed 32-bit
//! state.  Each step yields the low byte of `state − 1`; XOR with that byte
//! is self-inverse, so [`Rand31::apply`] both encrypts and decrypts.
//!
//! Key detection: the 4 bytes after the header decrypt to [`MARKER`] under
//! exactly one entry of [`KEY_TABLE`].  The table is tried in fixed order and
//! the first match wins.

pub mod signature;

use serde::Serialize;

/// Plaintext marker that opens every decrypted DAT body.
pub const MARKER: &[u8; 4] = b"ZL01";

// Schrage constants: M = A * Q + R.
const Q: i32 = 0x1F31D; // 127773
const A: i32 = 0x41A7; // 16807
const R: i32 = 0xB14; // 2836
const M: i32 = 0x7FFF_FFFF;

// ── Keystream ───────────────────────────────────────────────────────────────

/// Rand31PM keystream generator.
#[derive(Debug, Clone)]
pub struct Rand31 {
    state: i32,
}

impl Rand31 {
    pub fn new(seed: u32) -> Self {
        Self { state: seed as i32 }
    }

    /// Advance one step and return the keystream byte.
    #[inline]
    pub fn next_byte(&mut self) -> u8 {
        let hi = self.state.div_euclid(Q);
        let lo = self.state.rem_euclid(Q);
        let mut s = lo.wrapping_mul(A).wrapping_sub(hi.wrapping_mul(R));
        if s < 1 {
            s = s.wrapping_add(M);
        }
        self.state = s;
        s.wrapping_sub(1) as u8
    }

    /// XOR `buf` in place with successive keystream bytes.
    pub fn apply(&mut self, buf: &mut [u8]) {
        for b in buf.iter_mut() {
            *b ^= self.next_byte();
        }
    }
}

// ── Key / dialect table ─────────────────────────────────────────────────────

/// Layout variant of the decompressed node stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Dialect {
    Rev1,
    Rev2,
    Rev3,
    Rev4,
    Rev5,
}

impl Dialect {
    /// Whether blocks carry a 1-byte "sorted" flag before their child count.
    pub fn has_sort_flag(self) -> bool {
        matches!(self, Dialect::Rev3 | Dialect::Rev4 | Dialect::Rev5)
    }

    pub fn name(self) -> &'static str {
        match self {
            Dialect::Rev1 => "rev1",
            Dialect::Rev2 => "rev2",
            Dialect::Rev3 => "rev3",
            Dialect::Rev4 => "rev4",
            Dialect::Rev5 => "rev5",
        }
    }
}

/// One known (seed key, dialect) pairing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyProfile {
    pub key:     u32,
    pub dialect: Dialect,
}

/// Every known pairing, in detection order.
pub const KEY_TABLE: [KeyProfile; 5] = [
    KeyProfile { key: 0x2A5F_1C33, dialect: Dialect::Rev1 },
    KeyProfile { key: 0x7B31_D7E2, dialect: Dialect::Rev2 },
    KeyProfile { key: 0x4C9E_06A1, dialect: Dialect::Rev3 },
    KeyProfile { key: 0x1D6B_F348, dialect: Dialect::Rev4 },
    KeyProfile { key: 0x635A_8C17, dialect: Dialect::Rev5 },
];

/// Find the pairing under which `probe` (the 4 ciphertext bytes after the
/// header) decrypts to [`MARKER`].  Returns the profile and the decrypted
/// seed.
pub fn detect_key(encrypted_seed: u32, probe: [u8; 4]) -> Option<(KeyProfile, u32)> {
    KEY_TABLE.iter().find_map(|profile| {
        let seed = encrypted_seed ^ profile.key;
        let mut trial = probe;
        Rand31::new(seed).apply(&mut trial);
        (&trial == MARKER).then_some((*profile, seed))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn first_steps_of_seed_one() {
        // 16807, 282475249, 1622650073 are the textbook Park–Miller outputs.
        let mut r = Rand31::new(1);
        assert_eq!(r.next_byte(), (16807 - 1) as u8);
        assert_eq!(r.state, 16807);
        assert_eq!(r.next_byte(), (282_475_249 - 1u32) as u8);
        assert_eq!(r.next_byte(), (1_622_650_073 - 1u32) as u8);
        assert_eq!(r.state, 1_622_650_073);
    }

    #[test]
    fn zero_seed_wraps_to_modulus() {
        let mut r = Rand31::new(0);
        assert_eq!(r.next_byte(), 0xFE);
        assert_eq!(r.state, M);
    }

    #[test]
    fn negative_state_uses_floor_division() {
        // -1 = -1 * Q + (Q - 1)
        let mut r = Rand31::new(u32::MAX);
        let expected = (Q - 1).wrapping_mul(A).wrapping_sub(-R);
        r.next_byte();
        assert_eq!(r.state, expected);
    }

    #[test]
    fn every_profile_is_detected() {
        for (i, profile) in KEY_TABLE.iter().enumerate() {
            for seed in [1u32, 0xDEAD_BEEF, 0x0102_0304, 42 + i as u32] {
                let mut probe = *MARKER;
                Rand31::new(seed).apply(&mut probe);
                let (found, dec_seed) = detect_key(seed ^ profile.key, probe).unwrap();
                assert_eq!(found, *profile);
                assert_eq!(dec_seed, seed);
            }
        }
    }

    #[test]
    fn plain_marker_is_not_detected_by_accident() {
        assert!(detect_key(0x1234_5678, [0, 0, 0, 0]).is_none());
    }

    #[test]
    fn sort_flag_dialects() {
        let flagged: Vec<_> = KEY_TABLE.iter().filter(|p| p.dialect.has_sort_flag()).collect();
        assert_eq!(flagged.len(), 3);
    }

    proptest! {
        #[test]
        fn keystream_is_self_inverse(seed in any::<u32>(), data in proptest::collection::vec(any::<u8>(), 0..512)) {
            let mut buf = data.clone();
            Rand31::new(seed).apply(&mut buf);
            Rand31::new(seed).apply(&mut buf);
            prop_assert_eq!(buf, data);
        }
    }
}
