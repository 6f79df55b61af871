use crate::{sanitize, scan, QueryPlan, RawValueIndex, Scan};
use mkv_transport::QuestionTransport;
use serde::Serialize;
use tracing::{debug, warn};

/// One decoded question/answer round trip.
#[derive(Debug, Clone)]
pub struct Exchange {
    pub question: String,
    pub scan: Scan,
    pub index: RawValueIndex,
}

/// A question whose round trip failed; its registers stay missing for this cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FetchFailure {
    pub question: String,
    pub error: String,
}

/// Running counts for one poll cycle, flushed into a `MetricsHub` by the caller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Tally {
    pub questions: usize,
    pub failures: usize,
    pub resyncs: usize,
    pub missing: usize,
    pub deep_reads: usize,
}

impl Tally {
    pub fn absorb(&mut self, other: Tally) {
        self.questions += other.questions;
        self.failures += other.failures;
        self.resyncs += other.resyncs;
        self.missing += other.missing;
        self.deep_reads += other.deep_reads;
    }
}

/// Ask `plan` once and decode the answer.
pub fn exchange<T>(
    plan: &QueryPlan,
    transport: &mut T,
    tally: &mut Tally,
) -> Result<Exchange, FetchFailure>
where
    T: QuestionTransport + ?Sized,
{
    let question = plan.question();
    tally.questions += 1;
    let answer = match transport.ask(&question) {
        Ok(answer) => answer,
        Err(e) => {
            tally.failures += 1;
            warn!(
                controller = transport.label(),
                question = %question,
                error = %e,
                "question failed"
            );
            return Err(FetchFailure {
                question,
                error: e.to_string(),
            });
        }
    };
    let scan = scan(plan, &answer);
    tally.resyncs += scan.resyncs;
    tally.missing += scan.missing();
    debug!(
        controller = transport.label(),
        question = %question,
        raw = ?answer,
        clean = %sanitize(&answer),
        tokens = scan.tokens.len(),
        resyncs = scan.resyncs,
        padded = scan.padded,
        "exchange"
    );
    let index = RawValueIndex::build(plan, &scan.tokens);
    Ok(Exchange {
        question,
        scan,
        index,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use mkv_transport::{MockTransport, TransportError};

    #[test]
    fn successful_exchange_counts_tokens() {
        let plan = QueryPlan::from_hex("300201300203").unwrap();
        let mut mock = MockTransport::new("mock0").with_register("3002.03", 100);
        let mut tally = Tally::default();
        let ex = exchange(&plan, &mut mock, &mut tally).unwrap();
        assert_eq!(ex.question, "300201300203");
        assert_eq!(ex.index.full32(&"3002.03".parse().unwrap()), Some(100));
        assert_eq!(tally, Tally { questions: 1, missing: 1, ..Tally::default() });
    }

    #[test]
    fn failed_exchange_is_reported() {
        let plan = QueryPlan::from_hex("300201").unwrap();
        let mut fetch =
            |_q: &str| -> mkv_transport::Result<String> { Err(TransportError::Timeout) };
        let mut tally = Tally::default();
        let failure = exchange(&plan, &mut fetch, &mut tally).unwrap_err();
        assert_eq!(failure.question, "300201");
        assert_eq!(failure.error, "timeout");
        assert_eq!(tally.failures, 1);
    }
}
