//! Arithmetic-only expression parser and evaluator.
//!
//! Grammar, applied after register references have been substituted:
//!
//! ```text
//! expr   := term (('+' | '-') term)*
//! term   := factor (('*' | '/') factor)*
//! factor := ('+' | '-') factor | number | '(' expr ')'
//! number := digits ['.' digits] | '.' digits
//! ```
//!
//! Nothing but numeric literals and the four operators can reach [`Expr::eval`].

use crate::error::CalcError;

const MAX_DEPTH: usize = 64;
/// Bounds the left-leaning chain an unbroken `a + b + ...` builds, which `eval` and
/// `Drop` walk recursively.
const MAX_TOKENS: usize = 512;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Op {
    Add,
    Sub,
    Mul,
    Div,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    Num(f64),
    Neg(Box<Expr>),
    Bin(Op, Box<Expr>, Box<Expr>),
}

impl Expr {
    pub fn eval(&self) -> Result<f64, CalcError> {
        let v = match self {
            Expr::Num(n) => *n,
            Expr::Neg(e) => -e.eval()?,
            Expr::Bin(op, l, r) => {
                let (l, r) = (l.eval()?, r.eval()?);
                match op {
                    Op::Add => l + r,
                    Op::Sub => l - r,
                    Op::Mul => l * r,
                    Op::Div if r == 0.0 => return Err(CalcError::DivideByZero),
                    Op::Div => l / r,
                }
            }
        };
        if v.is_finite() {
            Ok(v)
        } else {
            Err(CalcError::NonFinite)
        }
    }
}

/// True if `s` is non-blank and uses only digits, `.`, `+ - * /`, parentheses and
/// whitespace.
pub fn is_arithmetic(s: &str) -> bool {
    !s.trim().is_empty()
        && s.chars().all(|c| {
            c.is_ascii_digit()
                || c.is_ascii_whitespace()
                || matches!(c, '.' | '+' | '-' | '*' | '/' | '(' | ')')
        })
}

pub fn parse(src: &str) -> Result<Expr, CalcError> {
    if !is_arithmetic(src) {
        return Err(CalcError::IllegalCharacters(src.to_string()));
    }
    let tokens = lex(src)?;
    if tokens.len() > MAX_TOKENS {
        return Err(CalcError::Syntax(format!(
            "expression too long ({} tokens, limit {MAX_TOKENS})",
            tokens.len()
        )));
    }
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.expr(0)?;
    match parser.peek() {
        None => Ok(expr),
        Some(tok) => Err(CalcError::Syntax(format!(
            "unexpected {tok:?} after expression"
        ))),
    }
}

pub fn evaluate(src: &str) -> Result<f64, CalcError> {
    parse(src)?.eval()
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum Tok {
    Num(f64),
    Plus,
    Minus,
    Star,
    Slash,
    Open,
    Close,
}

fn lex(src: &str) -> Result<Vec<Tok>, CalcError> {
    let bytes = src.as_bytes();
    let mut out = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        let tok = match bytes[i] {
            b if b.is_ascii_whitespace() => {
                i += 1;
                continue;
            }
            b'+' => Tok::Plus,
            b'-' => Tok::Minus,
            b'*' => Tok::Star,
            b'/' => Tok::Slash,
            b'(' => Tok::Open,
            b')' => Tok::Close,
            _ => {
                let len = bytes[i..]
                    .iter()
                    .take_while(|b| b.is_ascii_digit() || **b == b'.')
                    .count();
                let lit = &src[i..i + len];
                if len == 0
                    || lit.matches('.').count() > 1
                    || !lit.bytes().any(|b| b.is_ascii_digit())
                {
                    return Err(CalcError::Syntax(format!("bad number at offset {i}")));
                }
                let n = lit
                    .parse::<f64>()
                    .map_err(|e| CalcError::Syntax(format!("bad number {lit:?}: {e}")))?;
                i += len;
                out.push(Tok::Num(n));
                continue;
            }
        };
        out.push(tok);
        i += 1;
    }
    Ok(out)
}

struct Parser {
    tokens: Vec<Tok>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<Tok> {
        self.tokens.get(self.pos).copied()
    }

    fn next(&mut self) -> Option<Tok> {
        let tok = self.peek();
        self.pos += 1;
        tok
    }

    fn peek_op(&self, table: &[(Tok, Op)]) -> Option<Op> {
        let tok = self.peek()?;
        table.iter().find(|(t, _)| *t == tok).map(|(_, op)| *op)
    }

    fn expr(&mut self, depth: usize) -> Result<Expr, CalcError> {
        let mut lhs = self.term(depth)?;
        while let Some(op) = self.peek_op(&[(Tok::Plus, Op::Add), (Tok::Minus, Op::Sub)]) {
            self.pos += 1;
            let rhs = self.term(depth)?;
            lhs = Expr::Bin(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn term(&mut self, depth: usize) -> Result<Expr, CalcError> {
        let mut lhs = self.factor(depth)?;
        while let Some(op) = self.peek_op(&[(Tok::Star, Op::Mul), (Tok::Slash, Op::Div)]) {
            self.pos += 1;
            let rhs = self.factor(depth)?;
            lhs = Expr::Bin(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn factor(&mut self, depth: usize) -> Result<Expr, CalcError> {
        if depth > MAX_DEPTH {
            return Err(CalcError::Syntax("expression nested too deeply".into()));
        }
        match self.next() {
            Some(Tok::Num(n)) => Ok(Expr::Num(n)),
            Some(Tok::Plus) => self.factor(depth + 1),
            Some(Tok::Minus) => Ok(Expr::Neg(Box::new(self.factor(depth + 1)?))),
            Some(Tok::Open) => {
                let inner = self.expr(depth + 1)?;
                match self.next() {
                    Some(Tok::Close) => Ok(inner),
                    _ => Err(CalcError::Syntax("missing ')'".into())),
                }
            }
            Some(tok) => Err(CalcError::Syntax(format!("unexpected {tok:?}"))),
            None => Err(CalcError::Syntax("unexpected end of expression".into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn precedence_and_associativity() {
        assert_eq!(evaluate("1 + 2 * 3").unwrap(), 7.0);
        assert_eq!(evaluate("(1 + 2) * 3").unwrap(), 9.0);
        assert_eq!(evaluate("100 / 10 / 2").unwrap(), 5.0);
        assert_eq!(evaluate("10 - 4 - 3").unwrap(), 3.0);
        assert_eq!(evaluate("-2 * -(3 + 1)").unwrap(), 8.0);
        assert_eq!(evaluate("8000/1000").unwrap(), 8.0);
        assert_eq!(evaluate(" .5 + 1.25 ").unwrap(), 1.75);
    }

    #[test]
    fn vsd_share_formula() {
        // bucket seconds / running seconds * 100
        let v = evaluate("360/3600*100").unwrap();
        assert!((v - 10.0).abs() < 1e-9);
    }

    #[test]
    fn division_by_zero_is_an_error_not_infinity() {
        assert_eq!(evaluate("5/0").unwrap_err(), CalcError::DivideByZero);
        assert_eq!(evaluate("5/(2-2)").unwrap_err(), CalcError::DivideByZero);
    }

    #[test]
    fn rejects_anything_but_arithmetic() {
        for src in ["", "   ", "abs(1)", "1e3", "2**3x", "__import__", "1;2", "0x10"] {
            assert!(matches!(parse(src), Err(CalcError::IllegalCharacters(_))), "{src:?}");
        }
    }

    #[test]
    fn rejects_malformed_arithmetic() {
        for src in ["1 +", "(1 + 2", "1 + 2)", "1..2", ".", "1 2", "()", "*3", "2**3"] {
            assert!(matches!(parse(src), Err(CalcError::Syntax(_))), "{src:?}");
        }
    }

    #[test]
    fn deep_nesting_is_bounded() {
        let src = format!("{}1{}", "(".repeat(500), ")".repeat(500));
        assert!(matches!(parse(&src), Err(CalcError::Syntax(_))));
        let neg = format!("{}1", "-".repeat(500));
        assert!(matches!(parse(&neg), Err(CalcError::Syntax(_))));
    }

    #[test]
    fn long_flat_chains_are_bounded() {
        let sum = format!("1{}", "+1".repeat(20_000));
        assert!(matches!(parse(&sum), Err(CalcError::Syntax(_))));
        let product = format!("2{}", "*1".repeat(20_000));
        assert!(matches!(evaluate(&product), Err(CalcError::Syntax(_))));
        let fits = format!("1{}", "+1".repeat(200));
        assert_eq!(evaluate(&fits).unwrap(), 201.0);
    }
}
