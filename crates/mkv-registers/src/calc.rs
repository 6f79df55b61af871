//! Metric calc expressions.
//!
//! A calc is arithmetic over register parts. `Full32`, `Hi16` and `Lo16` name a part of
//! the metric's own register; `Full32of3007.01` (also `Hi16of..`, `Lo16of..`, key with
//! or without the dot) names a part of another register in the same cycle. Older tables
//! spell these `UInt32`, `HiU16` and `LoU16`, which are accepted as aliases.
//!
//! References are replaced by decimal literals, the result must pass
//! [`arith::is_arithmetic`], and only then is it parsed and evaluated.

use crate::arith;
use crate::error::CalcError;
use crate::{DerivedValue, Part, RawValueIndex, RegisterKey};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::ops::Range;
use std::sync::OnceLock;
use tracing::warn;

const NAMES: [(&str, Part); 6] = [
    ("Full32", Part::Full32),
    ("Hi16", Part::Hi16),
    ("Lo16", Part::Lo16),
    ("UInt32", Part::Full32),
    ("HiU16", Part::Hi16),
    ("LoU16", Part::Lo16),
];

/// A register part named inside a calc.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Reference {
    Local(Part),
    Remote(RegisterKey, Part),
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Calc(String);

impl Calc {
    pub fn new(expr: impl Into<String>) -> Self {
        Self(expr.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Empty or `?` marks a register nobody knows how to scale.
    pub fn is_undecodable(&self) -> bool {
        let t = self.0.trim();
        t.is_empty() || t == "?"
    }

    pub fn references(&self) -> Vec<Reference> {
        scan_references(&self.0).into_iter().map(|(_, r)| r).collect()
    }

    /// Replace every reference with its decimal value.
    pub fn substitute(
        &self,
        own: &DerivedValue,
        index: &RawValueIndex,
    ) -> Result<String, CalcError> {
        let mut out = String::with_capacity(self.0.len() + 16);
        let mut last = 0;
        for (span, reference) in scan_references(&self.0) {
            out.push_str(&self.0[last..span.start]);
            let value = match reference {
                Reference::Local(part) => own.part(part).ok_or(CalcError::MissingLocal(part))?,
                Reference::Remote(key, part) => index
                    .get(&key)
                    .and_then(|v| v.part(part))
                    .ok_or(CalcError::MissingReference(key, part))?,
            };
            out.push_str(&value.to_string());
            last = span.end;
        }
        out.push_str(&self.0[last..]);
        Ok(out)
    }

    pub fn evaluate(&self, own: &DerivedValue, index: &RawValueIndex) -> Result<f64, CalcError> {
        if self.is_undecodable() {
            return Err(CalcError::Undecodable);
        }
        let text = self.substitute(own, index)?;
        if !arith::is_arithmetic(&text) {
            return Err(CalcError::IllegalCharacters(text));
        }
        arith::evaluate(&text)
    }
}

impl From<&str> for Calc {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Whole-word references: a part name, optionally followed by `of` and a key with or
/// without the dot.
const REFERENCE_PATTERN: &str =
    r"\b(Full32|Hi16|Lo16|UInt32|HiU16|LoU16)(?:of([0-9A-Fa-f]{4})\.?([0-9A-Fa-f]{2}))?\b";

fn reference_regex() -> Option<&'static Regex> {
    static REFERENCE_REGEX: OnceLock<Option<Regex>> = OnceLock::new();
    REFERENCE_REGEX
        .get_or_init(|| match Regex::new(REFERENCE_PATTERN) {
            Ok(re) => Some(re),
            Err(e) => {
                warn!(error = %e, "calc reference pattern failed to compile");
                None
            }
        })
        .as_ref()
}

/// Unknown words are left alone so that the arithmetic-only check rejects them
/// afterwards.
fn scan_references(src: &str) -> Vec<(Range<usize>, Reference)> {
    let Some(re) = reference_regex() else {
        return Vec::new();
    };
    re.captures_iter(src)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let part = part_named(caps.get(1)?.as_str())?;
            let reference = match (caps.get(2), caps.get(3)) {
                (Some(index), Some(sub)) => {
                    let slot = format!("{}{}", index.as_str(), sub.as_str());
                    Reference::Remote(RegisterKey::from_slot(&slot)?, part)
                }
                _ => Reference::Local(part),
            };
            Some((whole.range(), reference))
        })
        .collect()
}

fn part_named(name: &str) -> Option<Part> {
    NAMES.iter().find(|(n, _)| *n == name).map(|(_, part)| *part)
}
