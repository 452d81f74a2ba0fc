// Copyright 2021 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! The 160-bit identifier space and circular-interval ring arithmetic.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha1::{
    Digest,
    Sha1,
};
use std::fmt;
use thiserror::Error;

/// A point in the 160-bit Chord identifier space, big-endian ordered.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Id([u8; 20]);

/// A malformed identifier on the wire: not 40 hex characters.
#[derive(Error, Debug)]
#[error("'{0}' is not a 40-character hex identifier")]
pub struct IdParseError(String);

impl Id {
    /// The identifier of the given network identity (a node's URL string).
    pub fn of(s: &str) -> Self {
        let mut hasher = Sha1::new();
        hasher.update(s.as_bytes());
        let digest = hasher.finalize();
        let mut bytes = [0u8; 20];
        bytes.copy_from_slice(&digest);
        Self(bytes)
    }

    /// The zero identifier.
    pub const ZERO: Id = Id([0u8; 20]);

    /// `self + 2^j mod 2^160`.
    pub fn plus_pow2(&self, j: u32) -> Id {
        debug_assert!(j < 160);
        let mut addend = [0u8; 20];
        let byte_index = 19 - (j / 8) as usize;
        addend[byte_index] = 1u8 << (j % 8);
        self.wrapping_add(&Id(addend))
    }

    /// `self + 1 mod 2^160`.
    pub fn plus_one(&self) -> Id {
        self.wrapping_add(&Id::one())
    }

    fn one() -> Id {
        let mut bytes = [0u8; 20];
        bytes[19] = 1;
        Id(bytes)
    }

    fn wrapping_add(&self, other: &Id) -> Id {
        let mut out = [0u8; 20];
        let mut carry = 0u16;
        for i in (0..20).rev() {
            let sum = self.0[i] as u16 + other.0[i] as u16 + carry;
            out[i] = (sum & 0xff) as u8;
            carry = sum >> 8;
        }
        // carry beyond byte 0 wraps modulo 2^160, i.e. is simply dropped.
        Id(out)
    }

    /// Parse the hex form produced by this type's `Display` impl.
    pub fn from_hex(s: &str) -> Result<Self, IdParseError> {
        if s.len() != 40 {
            return Err(IdParseError(s.to_string()));
        }
        let mut bytes = [0u8; 20];
        for (i, byte) in bytes.iter_mut().enumerate() {
            let chunk = s.get(i * 2..i * 2 + 2).ok_or_else(|| IdParseError(s.to_string()))?;
            *byte = u8::from_str_radix(chunk, 16).map_err(|_| IdParseError(s.to_string()))?;
        }
        Ok(Id(bytes))
    }

    /// True iff walking the ring clockwise from `start` to `end` inclusive at
    /// both ends, `h` is encountered. `start == end` denotes the full ring.
    pub fn in_range(start: Id, end: Id, h: Id) -> bool {
        if start == end {
            return true;
        }
        if start <= end {
            start <= h && h <= end
        } else {
            h >= start || h <= end
        }
    }
}

impl fmt::Debug for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl Serialize for Id {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Id {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Id::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha1_of_known_string_matches_reference_digest() {
        // "abc" -> a9993e364706816aba3e25717850c26c9cd0d89 (FIPS 180-1 test vector)
        let id = Id::of("abc");
        assert_eq!(format!("{}", id), "a9993e364706816aba3e25717850c26c9cd0d89");
    }

    #[test]
    fn in_range_non_wrapping_interval() {
        let start = Id::of("a");
        let end = Id::of("z");
        let (start, end) = if start <= end { (start, end) } else { (end, start) };
        assert!(Id::in_range(start, end, start));
        assert!(Id::in_range(start, end, end));
    }

    #[test]
    fn in_range_full_ring_when_start_equals_end() {
        let p = Id::of("solitary");
        let somewhere_else = Id::of("somewhere-else");
        assert!(Id::in_range(p, p, somewhere_else));
    }

    #[test]
    fn in_range_wraps_across_zero() {
        let mut max = [0xffu8; 20];
        max[19] = 0xfe;
        let start = Id(max);
        let end = Id([0u8; 20]).plus_one();
        // wrapping interval (start, end] contains ZERO and `end` but not a
        // value strictly between end and start on the "short" side.
        assert!(Id::in_range(start, end, Id::ZERO));
        assert!(Id::in_range(start, end, end));
        assert!(Id::in_range(start, end, start));
    }

    #[test]
    fn plus_pow2_wraps_modulo_2_160() {
        let max = [0xffu8; 20];
        assert_eq!(Id(max).plus_pow2(0), Id::ZERO);
        let mut second_to_max = [0xffu8; 20];
        second_to_max[19] = 0xfe;
        assert_eq!(Id(second_to_max).plus_pow2(0), Id(max));
    }

    #[test]
    fn ordering_is_big_endian_unsigned() {
        let mut low = [0u8; 20];
        let mut high = [0u8; 20];
        low[0] = 0x01;
        high[0] = 0x02;
        assert!(Id(low) < Id(high));
    }

    #[test]
    fn hex_round_trips_through_display_and_from_hex() {
        let id = Id::of("http://node-a");
        let text = format!("{}", id);
        assert_eq!(Id::from_hex(&text).unwrap(), id);
    }

    #[test]
    fn from_hex_rejects_wrong_length() {
        assert!(Id::from_hex("abcd").is_err());
    }
}
