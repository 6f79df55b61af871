use crate::{QuestionTransport, Result, TransportError};
use std::collections::{HashMap, VecDeque};
use tracing::debug;

/// An in-process controller simulator. Each instance is independent.
///
/// Scripted answers (keyed by exact question) are served first, in order. Otherwise the
/// answer is synthesised from the register table: 8 hex digits for every known slot and
/// a single `X` for unknown ones, which is what real controllers do.
#[derive(Debug, Default, Clone)]
pub struct MockTransport {
    name: String,
    registers: HashMap<String, u32>,
    scripted: HashMap<String, VecDeque<Scripted>>,
    asked: Vec<String>,
}

#[derive(Debug, Clone)]
enum Scripted {
    Answer(String),
    Fail,
}

impl MockTransport {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    /// Builder form of [`MockTransport::set_register`].
    pub fn with_register(mut self, slot: &str, word: u32) -> Self {
        self.set_register(slot, word);
        self
    }

    /// Store a word for a slot given as `IIII.SS` or `IIIISS`.
    pub fn set_register(&mut self, slot: &str, word: u32) {
        self.registers.insert(normalize(slot), word);
    }

    /// Queue a verbatim answer for the next time `question` is asked.
    pub fn script_answer(&mut self, question: &str, answer: &str) {
        self.scripted
            .entry(normalize(question))
            .or_default()
            .push_back(Scripted::Answer(answer.to_string()));
    }

    /// Queue a transport failure for the next time `question` is asked.
    pub fn script_failure(&mut self, question: &str) {
        self.scripted
            .entry(normalize(question))
            .or_default()
            .push_back(Scripted::Fail);
    }

    /// Every question received so far, in order.
    pub fn asked(&self) -> &[String] {
        &self.asked
    }

    fn synthesise(&self, question: &str) -> Result<String> {
        if !question.is_ascii() || question.len() % 6 != 0 {
            return Err(TransportError::InvalidQuestion("length must be a multiple of 6"));
        }
        let mut out = String::with_capacity(question.len() / 6 * 8);
        for start in (0..question.len()).step_by(6) {
            match self.registers.get(&question[start..start + 6]) {
                Some(word) => out.push_str(&format!("{word:08X}")),
                None => out.push('X'),
            }
        }
        Ok(out)
    }
}

impl QuestionTransport for MockTransport {
    fn ask(&mut self, question: &str) -> Result<String> {
        let q = normalize(question);
        self.asked.push(q.clone());
        let scripted = self.scripted.get_mut(&q).and_then(VecDeque::pop_front);
        let answer = match scripted {
            Some(Scripted::Answer(a)) => a,
            Some(Scripted::Fail) => return Err(TransportError::Io("scripted failure".into())),
            None => self.synthesise(&q)?,
        };
        debug!(mock = %self.name, question = %q, answer = %answer, "mock exchange");
        Ok(answer)
    }

    fn label(&self) -> &str {
        &self.name
    }
}

fn normalize(s: &str) -> String {
    s.chars()
        .filter(|c| !c.is_whitespace() && *c != '.')
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthesises_words_and_missing_slots() {
        let mut mock = MockTransport::new("mock0")
            .with_register("3002.01", 0x0000_1F40)
            .with_register("300203", 100);
        let answer = mock.ask("300201300205300203").unwrap();
        assert_eq!(answer, "00001F40X00000064");
        assert_eq!(mock.asked(), ["300201300205300203"]);
        assert_eq!(mock.label(), "mock0");
    }

    #[test]
    fn scripted_answers_take_priority_then_drain() {
        let mut mock = MockTransport::new("mock0").with_register("3007.0D", 7);
        mock.script_answer("30070d", "  XXXX junk ");
        mock.script_failure("30070D");
        assert_eq!(mock.ask("30070D").unwrap(), "  XXXX junk ");
        assert!(mock.ask("30070D").is_err());
        assert_eq!(mock.ask("30070D").unwrap(), "00000007");
    }

    #[test]
    fn rejects_partial_slots() {
        let mut mock = MockTransport::new("mock0");
        let err = mock.ask("30020").unwrap_err();
        assert!(matches!(err, TransportError::InvalidQuestion(_)));
    }
}
