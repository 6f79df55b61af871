//! Versioned device models: the per-controller register plan, metric table and
//! consensus settings, loaded once and never mutated afterwards.

use crate::consensus::ConsensusConfig;
use crate::{MetricDefinition, QueryPlan, RegisterKey, TrailingPolicy};
use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::warn;

pub const MODEL_SCHEMA_VERSION: u32 = 1;

/// How the non-ambiguous part of the plan is split into questions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Grouping {
    /// One question per 4-hex index.
    #[default]
    ByIndex,
    /// One question for the whole plan.
    Single,
}

/// A device model as written on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceModel {
    pub version: u32,
    pub model: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Plan hex; whitespace is ignored.
    pub question: String,
    #[serde(default)]
    pub trailing: TrailingPolicy,
    #[serde(default)]
    pub grouping: Grouping,
    /// Warm-up read issued before each cycle; its answer is discarded.
    #[serde(default)]
    pub prime: Vec<RegisterKey>,
    #[serde(default)]
    pub fallback_single_reads: bool,
    #[serde(default)]
    pub metrics: Vec<MetricDefinition>,
    #[serde(default)]
    pub consensus: Option<ConsensusConfig>,
}

/// A validated model, ready to drive a poll cycle.
#[derive(Debug, Clone)]
pub struct CompiledModel {
    pub name: String,
    pub description: Option<String>,
    pub plan: QueryPlan,
    pub grouping: Grouping,
    pub prime: Option<QueryPlan>,
    pub fallback_single_reads: bool,
    /// Every definition has a non-empty, unique id.
    pub metrics: Vec<MetricDefinition>,
    pub consensus: Option<ConsensusConfig>,
}

impl DeviceModel {
    pub fn compile(&self) -> anyhow::Result<CompiledModel> {
        if self.version != MODEL_SCHEMA_VERSION {
            bail!(
                "model {}: unsupported version {} (expected {MODEL_SCHEMA_VERSION})",
                self.model,
                self.version
            );
        }
        let plan = QueryPlan::from_hex_with(&self.question, self.trailing)
            .with_context(|| format!("model {}: building plan", self.model))?;

        let prime = if self.prime.is_empty() {
            None
        } else {
            Some(
                QueryPlan::from_keys(self.prime.clone())
                    .with_context(|| format!("model {}: prime read", self.model))?,
            )
        };

        if let Some(consensus) = &self.consensus {
            consensus
                .validate()
                .with_context(|| format!("model {}: consensus", self.model))?;
            if let Some(k) = consensus.group.iter().find(|k| !plan.contains(k)) {
                bail!("model {}: consensus key {k} is not in the plan", self.model);
            }
        }

        let mut seen = HashSet::new();
        let mut metrics = Vec::with_capacity(self.metrics.len());
        for def in &self.metrics {
            let mut def = def.clone();
            if def.id.trim().is_empty() {
                def.id = slugify(&def.name);
            }
            if def.id.is_empty() {
                bail!("model {}: metric {:?} has no usable id", self.model, def.name);
            }
            if !seen.insert(def.id.clone()) {
                bail!("model {}: duplicate metric id {:?}", self.model, def.id);
            }
            if !plan.contains(&def.key) {
                warn!(
                    model = %self.model,
                    metric = %def.id,
                    key = %def.key,
                    "metric key is not in the plan; it will always be null"
                );
            }
            metrics.push(def);
        }

        Ok(CompiledModel {
            name: self.model.clone(),
            description: self.description.clone(),
            plan,
            grouping: self.grouping,
            prime,
            fallback_single_reads: self.fallback_single_reads,
            metrics,
            consensus: self.consensus.clone(),
        })
    }
}

impl CompiledModel {
    /// Plan keys not handled by the consensus resolver.
    pub fn regular_plan(&self) -> QueryPlan {
        match &self.consensus {
            Some(c) => self.plan.without(&c.group),
            None => self.plan.clone(),
        }
    }

    /// The questions asked for the regular keys, in order.
    pub fn request_plans(&self) -> Vec<QueryPlan> {
        let regular = self.regular_plan();
        match self.grouping {
            Grouping::ByIndex => regular.groups_by_index(),
            Grouping::Single if regular.is_empty() => Vec::new(),
            Grouping::Single => vec![regular],
        }
    }
}

/// `"Running Hours (total)"` -> `"running_hours_total"`.
pub fn slugify(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
        } else if !out.is_empty() && !out.ends_with('_') {
            out.push('_');
        }
    }
    while out.ends_with('_') {
        out.pop();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const YAML: &str = r#"
version: 1
model: TEST
question: |
  300201 300203
  300701 30070D 300714
grouping: by_index
metrics:
  - name: Outlet Pressure
    key: "3002.01"
    part: full32
    calc: "Full32/1000"
    unit: bar
  - id: hours
    name: Running Hours
    key: "3007.0D"
    part: full32
    calc: "Full32/3600"
    unit: h
consensus:
  group: ["3007.01", "3007.0D", "3007.14"]
  rules:
    - key: "3007.0D"
      sibling: "3007.14"
      follow: "3007.01"
"#;

    fn model() -> DeviceModel {
        serde_yaml::from_str(YAML).unwrap()
    }

    #[test]
    fn compiles_and_fills_ids() {
        let compiled = model().compile().unwrap();
        assert_eq!(compiled.plan.len(), 5);
        assert_eq!(compiled.metrics[0].id, "outlet_pressure");
        assert_eq!(compiled.metrics[1].id, "hours");
        let consensus = compiled.consensus.as_ref().unwrap();
        assert!(consensus.deep_read);
        assert_eq!(consensus.rules[0].min, 1000);
        assert_eq!(consensus.rules[0].max, 315_360_000);
    }

    #[test]
    fn request_plans_skip_consensus_keys() {
        let mut compiled = model().compile().unwrap();
        let questions = |c: &CompiledModel| -> Vec<String> {
            c.request_plans().iter().map(QueryPlan::question).collect()
        };
        assert_eq!(questions(&compiled), vec!["300201300203"]);

        compiled.consensus = None;
        compiled.grouping = Grouping::Single;
        assert_eq!(questions(&compiled), vec!["30020130020330070130070D300714"]);
    }

    #[test]
    fn rejects_bad_models() {
        let mut m = model();
        m.version = 2;
        assert!(m.compile().is_err());

        let mut m = model();
        m.metrics[1].id = "outlet_pressure".into();
        assert!(m.compile().is_err());

        let mut m = model();
        m.question = "300201300203".into();
        assert!(m.compile().is_err());

        let mut m = model();
        m.question.push_str("3002");
        assert!(m.compile().is_err());
        m.trailing = TrailingPolicy::Truncate;
        assert_eq!(m.compile().unwrap().plan.len(), 5);
    }

    #[test]
    fn metric_outside_plan_is_allowed() {
        let mut m = model();
        m.metrics[0].key = "3021.0A".parse().unwrap();
        assert!(m.compile().is_ok());
    }

    #[test]
    fn slugs() {
        assert_eq!(slugify("Running Hours (total)"), "running_hours_total");
        assert_eq!(slugify("  Load %  "), "load");
        assert_eq!(slugify("---"), "");
    }
}
