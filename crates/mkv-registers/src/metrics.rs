use crate::exchange::Tally;
use prometheus::core::Collector;
use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};

#[derive(Clone)]
pub struct PollMetrics {
    pub questions: IntCounter,
    pub question_failures: IntCounter,
    pub tokenizer_resyncs: IntCounter,
    pub missing_tokens: IntCounter,
    pub deep_reads: IntCounter,
    pub models_loaded: IntGauge,
}

/// Caller-owned Prometheus registry for the poll loop.
#[derive(Clone)]
pub struct MetricsHub {
    pub registry: Registry,
    pub poll: PollMetrics,
}

fn counter(name: &str, help: &str) -> Result<IntCounter, String> {
    IntCounter::new(name, help).map_err(|e| format!("metrics init error: {e}"))
}

fn register<C>(registry: &Registry, collector: &C) -> Result<(), String>
where
    C: Collector + Clone + 'static,
{
    registry
        .register(Box::new(collector.clone()))
        .map_err(|e| format!("metrics init error: {e}"))
}

impl MetricsHub {
    pub fn new() -> Result<Self, String> {
        let registry = Registry::new();
        let poll = PollMetrics {
            questions: counter("mkv_questions_total", "Questions sent to controllers")?,
            question_failures: counter(
                "mkv_question_failures_total",
                "Questions that got no answer",
            )?,
            tokenizer_resyncs: counter(
                "mkv_tokenizer_resyncs_total",
                "Malformed answer characters skipped",
            )?,
            missing_tokens: counter("mkv_missing_tokens_total", "Answer slots without a value")?,
            deep_reads: counter(
                "mkv_consensus_deep_reads_total",
                "Solo re-reads of implausible registers",
            )?,
            models_loaded: IntGauge::new("mkv_models_loaded", "Number of device models loaded")
                .map_err(|e| format!("metrics init error: {e}"))?,
        };
        register(&registry, &poll.questions)?;
        register(&registry, &poll.question_failures)?;
        register(&registry, &poll.tokenizer_resyncs)?;
        register(&registry, &poll.missing_tokens)?;
        register(&registry, &poll.deep_reads)?;
        register(&registry, &poll.models_loaded)?;
        Ok(Self { registry, poll })
    }

    pub fn record(&self, tally: &Tally) {
        self.poll.questions.inc_by(tally.questions as u64);
        self.poll.question_failures.inc_by(tally.failures as u64);
        self.poll.tokenizer_resyncs.inc_by(tally.resyncs as u64);
        self.poll.missing_tokens.inc_by(tally.missing as u64);
        self.poll.deep_reads.inc_by(tally.deep_reads as u64);
    }

    pub fn encode_text(&self) -> String {
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buf) {
            return format!("error encoding metrics: {e}");
        }
        String::from_utf8(buf).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_tally() {
        let hub = MetricsHub::new().unwrap();
        hub.record(&Tally {
            questions: 3,
            failures: 1,
            resyncs: 2,
            missing: 4,
            deep_reads: 1,
        });
        hub.poll.models_loaded.set(2);
        let text = hub.encode_text();
        assert!(text.contains("mkv_questions_total 3"));
        assert!(text.contains("mkv_question_failures_total 1"));
        assert!(text.contains("mkv_missing_tokens_total 4"));
        assert!(text.contains("mkv_models_loaded 2"));
    }

    #[test]
    fn hubs_own_their_registries() {
        let a = MetricsHub::new().unwrap();
        let b = MetricsHub::new().unwrap();
        a.poll.questions.inc();
        assert!(b.encode_text().contains("mkv_questions_total 0"));
        assert_eq!(a.registry.gather().len(), 6);
    }

    #[test]
    fn duplicate_registration_is_reported() {
        let hub = MetricsHub::new().unwrap();
        let err = register(&hub.registry, &hub.poll.questions).unwrap_err();
        assert!(err.starts_with("metrics init error"), "{err}");
    }
}
