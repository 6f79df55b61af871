use crate::error::PlanError;
use crate::RegisterKey;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::warn;

/// What to do with a plan definition whose length is not a multiple of 6.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrailingPolicy {
    /// Fail with [`PlanError::InvalidPlanLength`].
    #[default]
    Reject,
    /// Drop the incomplete trailing slot (logged at warn level).
    Truncate,
}

/// Ordered registers requested in one question. Order decides how the flat answer is
/// segmented, so it is preserved exactly as defined.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct QueryPlan {
    keys: Vec<RegisterKey>,
}

impl QueryPlan {
    /// Build from hex (4 index + 2 subindex digits per key). Whitespace is ignored.
    pub fn from_hex(hex: &str) -> Result<Self, PlanError> {
        Self::from_hex_with(hex, TrailingPolicy::Reject)
    }

    pub fn from_hex_with(hex: &str, policy: TrailingPolicy) -> Result<Self, PlanError> {
        let bad = hex
            .char_indices()
            .find(|(_, c)| !c.is_whitespace() && !c.is_ascii_hexdigit());
        if let Some((offset, found)) = bad {
            return Err(PlanError::InvalidHex { offset, found });
        }
        let compact: String = hex.chars().filter(|c| !c.is_whitespace()).collect();
        let rem = compact.len() % 6;
        if rem != 0 {
            match policy {
                TrailingPolicy::Reject => {
                    return Err(PlanError::InvalidPlanLength { len: compact.len() })
                }
                TrailingPolicy::Truncate => {
                    warn!(
                        len = compact.len(),
                        dropped = &compact[compact.len() - rem..],
                        "plan hex has an incomplete trailing slot; truncating"
                    );
                }
            }
        }
        let usable = compact.len() - rem;
        let keys = (0..usable)
            .step_by(6)
            .filter_map(|start| RegisterKey::from_slot(&compact[start..start + 6]))
            .collect();
        Self::from_keys(keys)
    }

    /// Build from explicit keys; duplicates are rejected.
    pub fn from_keys(keys: Vec<RegisterKey>) -> Result<Self, PlanError> {
        let mut seen = HashSet::with_capacity(keys.len());
        for key in &keys {
            if !seen.insert(*key) {
                return Err(PlanError::DuplicateKey(*key));
            }
        }
        Ok(Self { keys })
    }

    pub fn keys(&self) -> &[RegisterKey] {
        &self.keys
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn contains(&self, key: &RegisterKey) -> bool {
        self.keys.contains(key)
    }

    /// Wire form of the plan: the concatenated 6-hex slots.
    pub fn question(&self) -> String {
        self.keys.iter().map(RegisterKey::question_hex).collect()
    }

    /// Split into one plan per 4-hex index, in order of first appearance.
    pub fn groups_by_index(&self) -> Vec<QueryPlan> {
        let mut groups: Vec<QueryPlan> = Vec::new();
        for key in &self.keys {
            let existing = groups
                .iter_mut()
                .find(|g| g.keys.first().is_some_and(|f| f.index() == key.index()));
            match existing {
                Some(group) => group.keys.push(*key),
                None => groups.push(QueryPlan { keys: vec![*key] }),
            }
        }
        groups
    }

    /// The same plan minus the given keys.
    pub fn without(&self, exclude: &[RegisterKey]) -> QueryPlan {
        QueryPlan {
            keys: self
                .keys
                .iter()
                .filter(|k| !exclude.contains(k))
                .copied()
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(s: &str) -> RegisterKey {
        s.parse().unwrap()
    }

    #[test]
    fn builds_keys_in_input_order() {
        let err = QueryPlan::from_hex("30020130070d300201a").unwrap_err();
        assert_eq!(err, PlanError::InvalidPlanLength { len: 19 });

        let plan = QueryPlan::from_hex("30070d300201\n3021 0A").unwrap();
        assert_eq!(plan.keys(), [key("3007.0D"), key("3002.01"), key("3021.0A")]);
        assert_eq!(plan.question(), "30070D30020130210A");
    }

    #[test]
    fn n_slots_give_n_keys() {
        for n in 0..40u16 {
            let hex: String = (0..n)
                .map(|i| format!("{:04X}{:02X}", 0x3000 + i, i % 256))
                .collect();
            let plan = QueryPlan::from_hex(&hex).unwrap();
            assert_eq!(plan.len(), n as usize);
            assert_eq!(plan.question(), hex);
        }
    }

    #[test]
    fn truncate_policy_drops_incomplete_slot() {
        let plan = QueryPlan::from_hex_with("3002013007", TrailingPolicy::Truncate).unwrap();
        assert_eq!(plan.keys(), [key("3002.01")]);
    }

    #[test]
    fn rejects_non_hex_and_duplicates() {
        assert_eq!(
            QueryPlan::from_hex("30020g").unwrap_err(),
            PlanError::InvalidHex { offset: 5, found: 'g' }
        );
        assert_eq!(
            QueryPlan::from_hex("300201\n30020g").unwrap_err(),
            PlanError::InvalidHex { offset: 12, found: 'g' }
        );
        assert_eq!(
            QueryPlan::from_hex("  3002 0k").unwrap_err(),
            PlanError::InvalidHex { offset: 8, found: 'k' }
        );
        assert_eq!(
            QueryPlan::from_hex("300201300201").unwrap_err(),
            PlanError::DuplicateKey(key("3002.01"))
        );
    }

    #[test]
    fn groups_by_index_preserve_order() {
        let plan = QueryPlan::from_hex("300201300701300203300703").unwrap();
        let groups = plan.groups_by_index();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].keys(), [key("3002.01"), key("3002.03")]);
        assert_eq!(groups[1].keys(), [key("3007.01"), key("3007.03")]);
        assert_eq!(plan.without(&[key("3007.01")]).len(), 3);
    }
}
