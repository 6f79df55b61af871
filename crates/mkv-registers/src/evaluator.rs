use crate::{Calc, Part, RawValueIndex, RegisterKey};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::trace;

/// How one engineering value is derived from a register.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricDefinition {
    /// Output key; filled from `name` when a model is compiled if left empty.
    #[serde(default)]
    pub id: String,
    pub name: String,
    pub key: RegisterKey,
    pub part: Part,
    #[serde(default)]
    pub calc: Calc,
    #[serde(default)]
    pub unit: Option<String>,
}

/// Result of one metric. `value` is `None` whenever the metric could not be decoded,
/// which is never conflated with a genuine zero.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricValue {
    pub value: Option<f64>,
    pub unit: Option<String>,
    pub name: String,
    pub key: RegisterKey,
    pub part: Part,
    /// The selected part of the register before scaling.
    pub raw: Option<u32>,
}

pub fn evaluate_metric(def: &MetricDefinition, index: &RawValueIndex) -> MetricValue {
    let own = index.get(&def.key).copied().unwrap_or_default();
    let value = match def.calc.evaluate(&own, index) {
        Ok(v) => Some(v),
        Err(e) => {
            trace!(
                metric = %def.id,
                key = %def.key,
                calc = def.calc.as_str(),
                reason = %e,
                "metric has no value"
            );
            None
        }
    };
    MetricValue {
        value,
        unit: def.unit.clone(),
        name: def.name.clone(),
        key: def.key,
        part: def.part,
        raw: own.part(def.part),
    }
}

/// Evaluate every definition against one cycle's index. Calcs only ever read raw
/// register parts, so the order of `defs` does not matter.
pub fn evaluate(defs: &[MetricDefinition], index: &RawValueIndex) -> BTreeMap<String, MetricValue> {
    defs.iter()
        .map(|def| (def.id.clone(), evaluate_metric(def, index)))
        .collect()
}
