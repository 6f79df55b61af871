use crate::{Part, QueryPlan, RawToken, RegisterKey};
use serde::Serialize;
use std::collections::HashMap;

/// Sub-word views of one register's answer. All `None` iff the slot was missing.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DerivedValue {
    pub full32: Option<u32>,
    pub hi16: Option<u16>,
    pub lo16: Option<u16>,
}

impl DerivedValue {
    pub const MISSING: Self = Self {
        full32: None,
        hi16: None,
        lo16: None,
    };

    pub fn from_word(word: u32) -> Self {
        Self {
            full32: Some(word),
            hi16: Some((word >> 16) as u16),
            lo16: Some((word & 0xFFFF) as u16),
        }
    }

    pub fn from_token(token: RawToken) -> Self {
        match token {
            RawToken::Word(word) => Self::from_word(word),
            RawToken::Missing => Self::MISSING,
        }
    }

    pub fn is_missing(&self) -> bool {
        self.full32.is_none()
    }

    pub fn part(&self, part: Part) -> Option<u32> {
        match part {
            Part::Full32 => self.full32,
            Part::Hi16 => self.hi16.map(u32::from),
            Part::Lo16 => self.lo16.map(u32::from),
        }
    }

    /// The word as 8 uppercase hex digits, as it appeared on the wire.
    pub fn raw_hex(&self) -> Option<String> {
        self.full32.map(|w| format!("{w:08X}"))
    }
}

/// Register key -> derived value for one poll cycle.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RawValueIndex {
    values: HashMap<RegisterKey, DerivedValue>,
}

impl RawValueIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pair plan items with their tokens. Items without a token are missing.
    pub fn build(plan: &QueryPlan, tokens: &[RawToken]) -> Self {
        let values = plan
            .keys()
            .iter()
            .enumerate()
            .map(|(i, key)| {
                let token = tokens.get(i).copied().unwrap_or(RawToken::Missing);
                (*key, DerivedValue::from_token(token))
            })
            .collect();
        Self { values }
    }

    /// Every key of `plan` marked missing.
    pub fn all_missing(plan: &QueryPlan) -> Self {
        Self::build(plan, &[])
    }

    pub fn get(&self, key: &RegisterKey) -> Option<&DerivedValue> {
        self.values.get(key)
    }

    /// Full32 of `key`, if present and not missing.
    pub fn full32(&self, key: &RegisterKey) -> Option<u32> {
        self.values.get(key).and_then(|v| v.full32)
    }

    pub fn insert(&mut self, key: RegisterKey, value: DerivedValue) {
        self.values.insert(key, value);
    }

    /// Overwrite with every entry of `other`.
    pub fn merge(&mut self, other: RawValueIndex) {
        self.values.extend(other.values);
    }

    /// Overwrite only with entries of `other` that carry a value.
    pub fn merge_present(&mut self, other: RawValueIndex) {
        self.values
            .extend(other.values.into_iter().filter(|(_, v)| !v.is_missing()));
    }

    /// Keys whose value is missing, sorted.
    pub fn missing_keys(&self) -> Vec<RegisterKey> {
        let mut keys: Vec<RegisterKey> = self
            .values
            .iter()
            .filter(|(_, v)| v.is_missing())
            .map(|(k, _)| *k)
            .collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&RegisterKey, &DerivedValue)> {
        self.values.iter()
    }
}

pub fn build_index(plan: &QueryPlan, tokens: &[RawToken]) -> RawValueIndex {
    RawValueIndex::build(plan, tokens)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokenize;

    fn key(s: &str) -> RegisterKey {
        s.parse().unwrap()
    }

    #[test]
    fn hi_lo_recombine_to_full32() {
        for word in [0u32, 1, 0x1F40, 0xFFFF, 0x1_0000, 0xDEAD_BEEF, u32::MAX, 0x8000_0001] {
            let v = DerivedValue::from_word(word);
            let (hi, lo) = (v.hi16.unwrap() as u32, v.lo16.unwrap() as u32);
            assert_eq!(hi << 16 | lo, v.full32.unwrap());
        }
    }

    #[test]
    fn single_register_scenario() {
        let plan = QueryPlan::from_hex("300201").unwrap();
        let idx = build_index(&plan, &tokenize(&plan, "00001F40"));
        assert_eq!(
            idx.get(&key("3002.01")),
            Some(&DerivedValue {
                full32: Some(8000),
                hi16: Some(0),
                lo16: Some(8000)
            })
        );
        assert_eq!(idx.get(&key("3002.01")).unwrap().raw_hex().as_deref(), Some("00001F40"));
    }

    #[test]
    fn missing_token_has_no_parts() {
        let plan = QueryPlan::from_hex("300201300203").unwrap();
        let idx = build_index(&plan, &tokenize(&plan, "X00000064"));
        let first = idx.get(&key("3002.01")).unwrap();
        assert!(first.is_missing());
        assert_eq!(Part::ALL.map(|p| first.part(p)), [None, None, None]);
        assert_eq!(idx.full32(&key("3002.03")), Some(100));
        assert_eq!(idx.missing_keys(), [key("3002.01")]);
    }

    #[test]
    fn seven_digit_word_is_not_a_value() {
        let plan = QueryPlan::from_hex("300201300203").unwrap();
        let scan = crate::scan(&plan, "X0000064");
        assert_eq!(scan.tokens, [RawToken::Missing, RawToken::Missing]);
        assert_eq!(scan.padded, 1);
        let idx = build_index(&plan, &scan.tokens);
        assert_eq!(idx.missing_keys(), [key("3002.01"), key("3002.03")]);
    }

    #[test]
    fn merge_variants() {
        let plan = QueryPlan::from_hex("300201300203").unwrap();
        let mut base = build_index(&plan, &[RawToken::Word(1), RawToken::Word(2)]);
        base.merge_present(RawValueIndex::all_missing(&plan));
        assert_eq!(base.full32(&key("3002.01")), Some(1));
        base.merge(build_index(&plan, &[RawToken::Missing, RawToken::Word(5)]));
        assert_eq!(base.full32(&key("3002.01")), None);
        assert_eq!(base.full32(&key("3002.03")), Some(5));
        assert_eq!(base.len(), 2);
    }
}
