//! Multi-pass consensus for register groups whose answers are order-sensitive.
//!
//! Some controllers answer a few keys of one index inconsistently depending on
//! where they sit in the question. The resolver asks the group in several
//! orderings, scores each decoded pass against plausibility rules and keeps the
//! best one. A key that is still implausible afterwards gets one solo read.

use crate::exchange::{exchange, FetchFailure, Tally};
use crate::{QueryPlan, RawValueIndex, RegisterKey};
use anyhow::{bail, Result};
use mkv_transport::QuestionTransport;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Score contributions; every rule uses the same weights.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoreWeights {
    pub in_range: i32,
    pub strong: i32,
    pub differs_from_sibling: i32,
    pub companion_present: i32,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            in_range: 2,
            strong: 2,
            differs_from_sibling: 2,
            companion_present: 1,
        }
    }
}

fn default_min() -> u32 {
    1000
}

fn default_max() -> u32 {
    315_360_000
}

fn default_true() -> bool {
    true
}

/// What a believable value of one key looks like.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlausibilityRule {
    pub key: RegisterKey,
    /// Exclusive lower bound.
    #[serde(default = "default_min")]
    pub min: u32,
    /// Exclusive upper bound.
    #[serde(default = "default_max")]
    pub max: u32,
    /// Values strictly above this earn the `strong` weight.
    #[serde(default)]
    pub strong_above: Option<u32>,
    /// A key the real value should never equal (the controller sometimes echoes it).
    #[serde(default)]
    pub sibling: Option<RegisterKey>,
    /// Derived ordering: move `key` right after this one.
    #[serde(default)]
    pub follow: Option<RegisterKey>,
    /// Keys whose presence signals a healthy pass; also moved right after `key`.
    #[serde(default)]
    pub companions: Vec<RegisterKey>,
}

impl PlausibilityRule {
    pub fn new(key: RegisterKey) -> Self {
        Self {
            key,
            min: default_min(),
            max: default_max(),
            strong_above: None,
            sibling: None,
            follow: None,
            companions: Vec::new(),
        }
    }

    pub fn in_range(&self, value: u32) -> bool {
        value > self.min && value < self.max
    }

    /// In range and different from the sibling. A missing sibling counts as different.
    pub fn is_plausible(&self, index: &RawValueIndex) -> bool {
        let Some(value) = index.full32(&self.key) else {
            return false;
        };
        let sibling = self.sibling.and_then(|s| index.full32(&s));
        self.in_range(value) && sibling != Some(value)
    }

    pub fn score(&self, index: &RawValueIndex, weights: &ScoreWeights) -> i32 {
        let mut score = 0;
        if let Some(value) = index.full32(&self.key) {
            if self.in_range(value) {
                score += weights.in_range;
            }
            if self.strong_above.is_some_and(|s| value > s) {
                score += weights.strong;
            }
            if let Some(sibling) = self.sibling.and_then(|s| index.full32(&s)) {
                if sibling != value {
                    score += weights.differs_from_sibling;
                }
            }
        }
        let present = self
            .companions
            .iter()
            .filter(|c| index.full32(c).is_some())
            .count() as i32;
        score + present * weights.companion_present
    }

    fn referenced(&self) -> impl Iterator<Item = &RegisterKey> {
        std::iter::once(&self.key)
            .chain(self.sibling.iter())
            .chain(self.follow.iter())
            .chain(self.companions.iter())
    }
}

/// Consensus settings for one ambiguous register group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsensusConfig {
    /// Default ordering of the group; the first candidate pass.
    pub group: Vec<RegisterKey>,
    /// Explicit candidate orderings. When set they replace the derived ones.
    #[serde(default)]
    pub orderings: Vec<Vec<RegisterKey>>,
    #[serde(default)]
    pub rules: Vec<PlausibilityRule>,
    #[serde(default)]
    pub weights: ScoreWeights,
    #[serde(default = "default_true")]
    pub deep_read: bool,
}

impl ConsensusConfig {
    pub fn new(group: Vec<RegisterKey>) -> Self {
        Self {
            group,
            orderings: Vec::new(),
            rules: Vec::new(),
            weights: ScoreWeights::default(),
            deep_read: true,
        }
    }

    pub fn with_rule(mut self, rule: PlausibilityRule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.group.is_empty() {
            bail!("consensus group is empty");
        }
        if let Err(e) = QueryPlan::from_keys(self.group.clone()) {
            bail!("consensus group: {e}");
        }
        for ordering in &self.orderings {
            if let Err(e) = QueryPlan::from_keys(ordering.clone()) {
                bail!("consensus ordering: {e}");
            }
            if let Some(k) = ordering.iter().find(|k| !self.group.contains(k)) {
                bail!("consensus ordering names {k}, which is not in the group");
            }
        }
        for rule in &self.rules {
            if rule.min >= rule.max {
                bail!(
                    "rule for {}: min {} must be below max {}",
                    rule.key,
                    rule.min,
                    rule.max
                );
            }
            if let Some(k) = rule.referenced().find(|k| !self.group.contains(k)) {
                bail!(
                    "rule for {} references {k}, which is not in the group",
                    rule.key
                );
            }
        }
        Ok(())
    }

    /// Candidate orderings, first to last, without duplicates.
    ///
    /// Derived set: the group itself; per rule the group with `key` moved after
    /// `follow`; `key` alone; the group with `companions` moved after `key`.
    pub fn candidate_orderings(&self) -> Vec<Vec<RegisterKey>> {
        let mut out = Vec::new();
        if !self.orderings.is_empty() {
            for ordering in &self.orderings {
                push_unique(&mut out, ordering.clone());
            }
            return out;
        }
        push_unique(&mut out, self.group.clone());
        for rule in self.rules.iter().filter(|r| self.group.contains(&r.key)) {
            if let Some(anchor) = rule.follow {
                push_unique(&mut out, move_after(&self.group, &[rule.key], anchor));
            }
            push_unique(&mut out, vec![rule.key]);
            if !rule.companions.is_empty() {
                push_unique(&mut out, move_after(&self.group, &rule.companions, rule.key));
            }
        }
        out
    }

    /// Sum of every rule's score for one decoded pass.
    pub fn score(&self, index: &RawValueIndex) -> i32 {
        self.rules.iter().map(|r| r.score(index, &self.weights)).sum()
    }

    pub fn resolve<T>(&self, transport: &mut T) -> ConsensusOutcome
    where
        T: QuestionTransport + ?Sized,
    {
        resolve_consensus(self, &self.candidate_orderings(), transport)
    }
}

fn push_unique(out: &mut Vec<Vec<RegisterKey>>, ordering: Vec<RegisterKey>) {
    if !ordering.is_empty() && !out.contains(&ordering) {
        out.push(ordering);
    }
}

/// `base` with `moving` taken out and reinserted right after `anchor`, or at the
/// front when `anchor` is one of the moved keys or absent.
fn move_after(
    base: &[RegisterKey],
    moving: &[RegisterKey],
    anchor: RegisterKey,
) -> Vec<RegisterKey> {
    let mut out: Vec<RegisterKey> = base
        .iter()
        .filter(|k| !moving.contains(k))
        .copied()
        .collect();
    let at = out.iter().position(|k| *k == anchor).map_or(0, |p| p + 1);
    let insert: Vec<RegisterKey> = moving
        .iter()
        .filter(|k| base.contains(k))
        .copied()
        .collect();
    out.splice(at..at, insert);
    out
}

/// Result of resolving one group.
#[derive(Debug, Clone, Default)]
pub struct ConsensusOutcome {
    /// Every group key, missing ones included.
    pub index: RawValueIndex,
    /// Position of the winning ordering, if any pass succeeded.
    pub winner: Option<usize>,
    /// Score per ordering; `None` for a failed pass.
    pub scores: Vec<Option<i32>>,
    pub deep_reads: Vec<RegisterKey>,
    pub failures: Vec<FetchFailure>,
    pub tally: Tally,
}

/// Ask every ordering in turn and merge the best-scoring pass.
///
/// Ties keep the earlier ordering. Group keys the winner did not ask for are
/// taken from the earliest successful pass that did. If no pass succeeds every
/// group key is missing and no solo reads are attempted.
pub fn resolve_consensus<T>(
    config: &ConsensusConfig,
    orderings: &[Vec<RegisterKey>],
    transport: &mut T,
) -> ConsensusOutcome
where
    T: QuestionTransport + ?Sized,
{
    let mut outcome = ConsensusOutcome::default();
    let mut passes: Vec<Option<RawValueIndex>> = Vec::with_capacity(orderings.len());
    let mut best: Option<(usize, i32)> = None;

    for (i, ordering) in orderings.iter().enumerate() {
        let plan = match QueryPlan::from_keys(ordering.clone()) {
            Ok(plan) => plan,
            Err(e) => {
                warn!(pass = i, error = %e, "skipping invalid ordering");
                outcome.scores.push(None);
                passes.push(None);
                continue;
            }
        };
        match exchange(&plan, transport, &mut outcome.tally) {
            Ok(ex) => {
                let score = config.score(&ex.index);
                debug!(pass = i, question = %ex.question, score, "consensus pass");
                if best.map_or(true, |(_, top)| score > top) {
                    best = Some((i, score));
                }
                outcome.scores.push(Some(score));
                passes.push(Some(ex.index));
            }
            Err(failure) => {
                outcome.failures.push(failure);
                outcome.scores.push(None);
                passes.push(None);
            }
        }
    }

    let group_plan = QueryPlan::from_keys(config.group.clone()).unwrap_or_default();
    outcome.index = RawValueIndex::all_missing(&group_plan);

    let Some((winner, score)) = best else {
        warn!(group = ?config.group.first(), "every consensus pass failed");
        return outcome;
    };
    outcome.winner = Some(winner);
    info!(pass = winner, score, "consensus winner");

    for key in &config.group {
        let source = passes
            .get(winner)
            .and_then(Option::as_ref)
            .and_then(|p| p.get(key))
            .or_else(|| passes.iter().flatten().find_map(|p| p.get(key)));
        if let Some(value) = source {
            outcome.index.insert(*key, *value);
        }
    }

    if config.deep_read {
        deep_read(config, transport, &mut outcome);
    }
    outcome
}

fn deep_read<T>(config: &ConsensusConfig, transport: &mut T, outcome: &mut ConsensusOutcome)
where
    T: QuestionTransport + ?Sized,
{
    for rule in &config.rules {
        if rule.is_plausible(&outcome.index) || outcome.deep_reads.contains(&rule.key) {
            continue;
        }
        let plan = match QueryPlan::from_keys(vec![rule.key]) {
            Ok(plan) => plan,
            Err(_) => continue,
        };
        outcome.deep_reads.push(rule.key);
        outcome.tally.deep_reads += 1;
        match exchange(&plan, transport, &mut outcome.tally) {
            Ok(ex) => {
                if let Some(value) = ex.index.get(&rule.key).filter(|v| !v.is_missing()) {
                    debug!(key = %rule.key, full32 = ?value.full32, "deep read");
                    outcome.index.insert(rule.key, *value);
                }
            }
            Err(failure) => outcome.failures.push(failure),
        }
    }
}
