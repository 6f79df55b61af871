use crate::Result;

/// A minimal blocking Question/Answer interface to one controller.
///
/// Implementations perform exactly one request/response exchange per call and never
/// retry; retry policy belongs to whoever drives the poll loop.
pub trait QuestionTransport {
    /// Send one question and return the raw answer text, noise included.
    fn ask(&mut self, question: &str) -> Result<String>;

    /// Short label used in logs (usually the controller host).
    fn label(&self) -> &str {
        "controller"
    }
}

/// Plain closures work as transports, which keeps tests and adapters short.
impl<F> QuestionTransport for F
where
    F: FnMut(&str) -> Result<String>,
{
    fn ask(&mut self, question: &str) -> Result<String> {
        self(question)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TransportError;

    fn ask_twice<T: QuestionTransport + ?Sized>(t: &mut T, q: &str) -> Result<(String, String)> {
        Ok((t.ask(q)?, t.ask(q)?))
    }

    #[test]
    fn closure_is_a_transport() {
        let mut calls = 0;
        let mut fetch = |q: &str| -> Result<String> {
            calls += 1;
            Ok(format!("{q}:{calls}"))
        };
        let (a, b) = ask_twice(&mut fetch, "300201").unwrap();
        assert_eq!(a, "300201:1");
        assert_eq!(b, "300201:2");
        assert_eq!(fetch.label(), "controller");
    }

    #[test]
    fn closure_errors_propagate() {
        let mut fetch = |_q: &str| -> Result<String> { Err(TransportError::Timeout) };
        let err = fetch.ask("300201").unwrap_err();
        assert!(matches!(err, TransportError::Timeout));
    }
}
