use crate::error::PollError;
use crate::exchange::{exchange, FetchFailure, Tally};
use crate::metrics::MetricsHub;
use crate::model::CompiledModel;
use crate::{evaluate, MetricValue, QueryPlan, RawValueIndex, RegisterKey};
use mkv_transport::QuestionTransport;
use serde::Serialize;
use std::collections::BTreeMap;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::{debug, info};

/// Everything one poll cycle produced.
#[derive(Debug, Clone, Serialize)]
pub struct PollReport {
    pub model: String,
    /// RFC 3339, UTC.
    pub ts: String,
    pub metrics: BTreeMap<String, MetricValue>,
    pub failures: Vec<FetchFailure>,
    pub stats: Tally,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consensus_winner: Option<usize>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub deep_reads: Vec<RegisterKey>,
    #[serde(skip)]
    pub index: RawValueIndex,
}

/// Drives one model against one controller.
pub struct Poller<'a> {
    model: &'a CompiledModel,
    metrics: Option<&'a MetricsHub>,
}

impl<'a> Poller<'a> {
    pub fn new(model: &'a CompiledModel) -> Self {
        Self {
            model,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, hub: &'a MetricsHub) -> Self {
        self.metrics = Some(hub);
        self
    }

    /// Prime, fetch the regular groups, resolve the ambiguous group, optionally
    /// re-read missing keys singly, then evaluate every metric.
    ///
    /// A failed question only blanks its own keys. The cycle fails only when no
    /// question (prime read excluded) got an answer.
    pub fn poll_once<T>(&self, transport: &mut T) -> Result<PollReport, PollError>
    where
        T: QuestionTransport + ?Sized,
    {
        let model = self.model;
        let mut prime_tally = Tally::default();
        if let Some(prime) = &model.prime {
            let _ = exchange(prime, transport, &mut prime_tally);
        }

        let mut tally = Tally::default();
        let mut failures = Vec::new();
        let mut index = RawValueIndex::all_missing(&model.plan);

        for plan in model.request_plans() {
            match exchange(&plan, transport, &mut tally) {
                Ok(ex) => index.merge(ex.index),
                Err(failure) => failures.push(failure),
            }
        }

        let mut consensus_winner = None;
        let mut deep_reads = Vec::new();
        if let Some(consensus) = &model.consensus {
            let outcome = consensus.resolve(transport);
            tally.absorb(outcome.tally);
            failures.extend(outcome.failures);
            index.merge(outcome.index);
            consensus_winner = outcome.winner;
            deep_reads = outcome.deep_reads;
        }

        if model.fallback_single_reads && tally.failures < tally.questions {
            for key in index.missing_keys() {
                let Ok(plan) = QueryPlan::from_keys(vec![key]) else {
                    continue;
                };
                match exchange(&plan, transport, &mut tally) {
                    Ok(ex) => index.merge_present(ex.index),
                    Err(failure) => failures.push(failure),
                }
            }
        }

        let mut stats = tally;
        stats.absorb(prime_tally);
        if let Some(hub) = self.metrics {
            hub.record(&stats);
        }

        if tally.questions > 0 && tally.failures == tally.questions {
            let last = failures
                .last()
                .map(|f| f.error.clone())
                .unwrap_or_default();
            return Err(PollError::AllFetchesFailed {
                attempts: tally.questions,
                last,
            });
        }

        let metrics = evaluate(&model.metrics, &index);
        let decoded = metrics.values().filter(|m| m.value.is_some()).count();
        info!(
            model = %model.name,
            controller = transport.label(),
            questions = stats.questions,
            failures = failures.len(),
            decoded,
            total = metrics.len(),
            "poll cycle complete"
        );
        debug!(missing = ?index.missing_keys(), "registers without value");

        Ok(PollReport {
            model: model.name.clone(),
            ts: OffsetDateTime::now_utc()
                .format(&Rfc3339)
                .unwrap_or_default(),
            metrics,
            failures,
            stats,
            consensus_winner,
            deep_reads,
            index,
        })
    }
}
