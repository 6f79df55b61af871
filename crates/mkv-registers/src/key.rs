use crate::error::KeyParseError;
use serde::{Deserialize, Serialize};
use core::fmt;
use std::str::FromStr;

/// Controller register address: 16-bit index plus 8-bit subindex.
///
/// Rendered canonically as uppercase `IIII.SS`; on the wire it is the 6-hex slot `IIIISS`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RegisterKey {
    index: u16,
    subindex: u8,
}

impl RegisterKey {
    pub const fn new(index: u16, subindex: u8) -> Self {
        Self { index, subindex }
    }

    pub fn index(&self) -> u16 {
        self.index
    }

    pub fn subindex(&self) -> u8 {
        self.subindex
    }

    /// The 6-hex request slot, e.g. `30070D`.
    pub fn question_hex(&self) -> String {
        format!("{:04X}{:02X}", self.index, self.subindex)
    }

    /// Parse exactly six hex digits (`IIIISS`).
    pub(crate) fn from_slot(slot: &str) -> Option<Self> {
        if slot.len() != 6 || !slot.bytes().all(|b| b.is_ascii_hexdigit()) {
            return None;
        }
        let index = u16::from_str_radix(&slot[..4], 16).ok()?;
        let subindex = u8::from_str_radix(&slot[4..], 16).ok()?;
        Some(Self::new(index, subindex))
    }
}

impl fmt::Display for RegisterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04X}.{:02X}", self.index, self.subindex)
    }
}

impl FromStr for RegisterKey {
    type Err = KeyParseError;

    /// Accepts `3007.0D`, `30070d` and `3007 0D`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let t = s.trim();
        let err = || KeyParseError(s.to_string());
        if !t.is_ascii() {
            return Err(err());
        }
        let slot = match t.len() {
            6 => t.to_string(),
            7 if matches!(t.as_bytes()[4], b'.' | b' ') => format!("{}{}", &t[..4], &t[5..]),
            _ => return Err(err()),
        };
        Self::from_slot(&slot).ok_or_else(err)
    }
}

impl TryFrom<String> for RegisterKey {
    type Error = KeyParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<RegisterKey> for String {
    fn from(key: RegisterKey) -> Self {
        key.to_string()
    }
}

/// Which slice of a register's 32-bit word a metric reads.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Part {
    #[serde(alias = "u32", alias = "uint32")]
    Full32,
    #[serde(alias = "hi", alias = "hiu16")]
    Hi16,
    #[serde(alias = "lo", alias = "lou16")]
    Lo16,
}

impl Part {
    pub const ALL: [Part; 3] = [Part::Full32, Part::Hi16, Part::Lo16];

    /// Name used for the part inside calc expressions.
    pub fn calc_name(self) -> &'static str {
        match self {
            Part::Full32 => "Full32",
            Part::Hi16 => "Hi16",
            Part::Lo16 => "Lo16",
        }
    }
}

impl fmt::Display for Part {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.calc_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_normalises_key_spellings() {
        let want = RegisterKey::new(0x3007, 0x0D);
        for s in ["3007.0D", "3007.0d", "30070D", " 3007 0d "] {
            assert_eq!(s.parse::<RegisterKey>().unwrap(), want, "{s}");
        }
        assert_eq!(want.to_string(), "3007.0D");
        assert_eq!(want.question_hex(), "30070D");
    }

    #[test]
    fn rejects_malformed_keys() {
        for s in ["", "3007", "3007.0", "3007-0D", "+007.0D", "3007.0G", "30070D1", "ä007.0D"] {
            assert!(s.parse::<RegisterKey>().is_err(), "{s}");
        }
    }

    #[test]
    fn key_serde_uses_canonical_string() {
        let key: RegisterKey = serde_json::from_str("\"3021.0a\"").unwrap();
        assert_eq!(serde_json::to_string(&key).unwrap(), "\"3021.0A\"");
    }

    #[test]
    fn part_accepts_legacy_encoding_names() {
        let parts: Vec<Part> = serde_yaml::from_str("[full32, u32, hi, hiu16, lo16, lo]").unwrap();
        assert_eq!(
            parts,
            vec![Part::Full32, Part::Full32, Part::Hi16, Part::Hi16, Part::Lo16, Part::Lo16]
        );
    }
}
