//! Answer tokenizer: splits a positional answer string into one token per plan item.
//!
//! Each slot is either 8 hex digits (a big-endian word) or a run of `X` characters
//! (no value). Some firmware pads a missing slot with several `X`, so a whole run is
//! one token. Anything else is transport noise: it is stripped before scanning, and a
//! window that is not 8 hex digits makes the scanner advance one character and retry.

use crate::QueryPlan;
use serde::Serialize;
use tracing::trace;

/// One slot of an answer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum RawToken {
    Missing,
    Word(u32),
}

/// Tokens aligned 1:1 with the plan, plus what the scanner had to repair.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Scan {
    pub tokens: Vec<RawToken>,
    /// Characters skipped to resynchronise on malformed input.
    pub resyncs: usize,
    /// Trailing items filled with `Missing` because the answer ran out.
    pub padded: usize,
}

impl Scan {
    pub fn missing(&self) -> usize {
        self.tokens
            .iter()
            .filter(|t| matches!(t, RawToken::Missing))
            .count()
    }
}

/// Keep only hex digits and `X`/`x`.
pub fn sanitize(answer: &str) -> String {
    answer
        .chars()
        .filter(|c| c.is_ascii_hexdigit() || is_missing_marker(*c))
        .collect()
}

pub fn tokenize(plan: &QueryPlan, answer: &str) -> Vec<RawToken> {
    scan(plan, answer).tokens
}

pub fn scan(plan: &QueryPlan, answer: &str) -> Scan {
    let clean = sanitize(answer);
    let bytes = clean.as_bytes();
    let want = plan.len();
    let mut tokens = Vec::with_capacity(want);
    let mut resyncs = 0;
    let mut pos = 0;

    while pos < bytes.len() && tokens.len() < want {
        if is_missing_marker(bytes[pos] as char) {
            let run = bytes[pos..]
                .iter()
                .take_while(|b| is_missing_marker(**b as char))
                .count();
            tokens.push(RawToken::Missing);
            pos += run;
            continue;
        }
        match bytes.get(pos..pos + 8).and_then(parse_word) {
            Some(word) => {
                tokens.push(RawToken::Word(word));
                pos += 8;
            }
            None => {
                trace!(offset = pos, item = tokens.len(), "answer resync");
                resyncs += 1;
                pos += 1;
            }
        }
    }

    let padded = want - tokens.len();
    tokens.resize(want, RawToken::Missing);
    Scan {
        tokens,
        resyncs,
        padded,
    }
}

fn is_missing_marker(c: char) -> bool {
    c == 'X' || c == 'x'
}

fn parse_word(window: &[u8]) -> Option<u32> {
    window.iter().try_fold(0u32, |acc, b| {
        let digit = (*b as char).to_digit(16)?;
        Some(acc << 4 | digit)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan(n: usize) -> QueryPlan {
        let hex: String = (0..n).map(|i| format!("3007{:02X}", i + 1)).collect();
        QueryPlan::from_hex(&hex).unwrap()
    }

    #[test]
    fn clean_words_decode_big_endian() {
        let words = [0x0000_1F40u32, 0xDEAD_BEEF, 0, u32::MAX, 0x0102_0304];
        let answer: String = words.iter().map(|w| format!("{w:08x}")).collect();
        let tokens = tokenize(&plan(words.len()), &answer);
        let want: Vec<RawToken> = words.iter().map(|w| RawToken::Word(*w)).collect();
        assert_eq!(tokens, want);
    }

    #[test]
    fn x_run_is_a_single_missing_token() {
        for k in 1..=9 {
            let answer = format!("{}00000064{}", "X".repeat(k), "x".repeat(k));
            let scan = scan(&plan(3), &answer);
            assert_eq!(
                scan.tokens,
                [RawToken::Missing, RawToken::Word(100), RawToken::Missing],
                "run length {k}"
            );
            assert_eq!(scan.resyncs, 0);
            assert_eq!(scan.padded, 0);
        }
    }

    #[test]
    fn noise_is_stripped_and_resynced() {
        let stripped = scan(&plan(2), " 00001F40\r\n<html>0000000A</html> ");
        assert_eq!(stripped.tokens, [RawToken::Word(0x1F40), RawToken::Word(10)]);
        assert_eq!(stripped.resyncs, 0);

        // "123" survives sanitising but cannot start a word before the X run
        let resynced = scan(&plan(3), "00001F40 123 XX 0000000A");
        assert_eq!(
            resynced.tokens,
            [RawToken::Word(0x1F40), RawToken::Missing, RawToken::Word(10)]
        );
        assert_eq!(resynced.resyncs, 3);
    }

    #[test]
    fn short_answer_is_padded() {
        let scan = scan(&plan(4), "00000001X");
        assert_eq!(
            scan.tokens,
            [RawToken::Word(1), RawToken::Missing, RawToken::Missing, RawToken::Missing]
        );
        assert_eq!(scan.padded, 2);
        assert_eq!(scan.missing(), 3);
    }

    #[test]
    fn stops_after_plan_length() {
        let tokens = tokenize(&plan(1), "0000000100000002");
        assert_eq!(tokens, [RawToken::Word(1)]);
        assert!(tokenize(&plan(0), "00000001").is_empty());
    }

    #[test]
    fn truncated_word_never_becomes_a_value() {
        let scan = scan(&plan(2), "000000010000");
        assert_eq!(scan.tokens, [RawToken::Word(1), RawToken::Missing]);
        assert_eq!(scan.resyncs, 4);
    }
}
