use crate::{QuestionTransport, Result, TransportError};
use std::time::Duration;
use tracing::debug;

/// CGI endpoint that accepts the `QUESTION` form field on MKV controllers.
pub const DEFAULT_ENDPOINT: &str = "/cgi-bin/mkv.cgi";

/// Question/Answer over HTTP POST (form field `QUESTION=<hex>`).
pub struct HttpTransport {
    host: String,
    url: String,
    client: reqwest::blocking::Client,
}

impl HttpTransport {
    pub fn open(host: &str, timeout: Duration) -> Result<Self> {
        Self::open_with(host, DEFAULT_ENDPOINT, timeout)
    }

    pub fn open_with(host: &str, endpoint: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            // Keep-alive is unreliable on some controller firmware
            .pool_max_idle_per_host(0)
            .build()
            .map_err(|e| TransportError::Io(e.to_string()))?;
        let base = host.trim_end_matches('/');
        let url = if base.starts_with("http://") || base.starts_with("https://") {
            format!("{base}{endpoint}")
        } else {
            format!("http://{base}{endpoint}")
        };
        Ok(Self {
            host: host.to_string(),
            url,
            client,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl QuestionTransport for HttpTransport {
    fn ask(&mut self, question: &str) -> Result<String> {
        let resp = self
            .client
            .post(&self.url)
            .form(&[("QUESTION", question)])
            .send()
            .map_err(map_reqwest)?;
        let status = resp.status().as_u16();
        if status != 200 {
            return Err(TransportError::Status(status));
        }
        let text = resp.text().map_err(map_reqwest)?;
        debug!(host = %self.host, question, answer = %text, "http exchange");
        Ok(text)
    }

    fn label(&self) -> &str {
        &self.host
    }
}

fn map_reqwest(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout
    } else if e.is_connect() {
        TransportError::Unreachable(e.to_string())
    } else {
        TransportError::Io(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_endpoint_url_from_bare_host() {
        let t = HttpTransport::open("10.60.23.11", Duration::from_secs(2)).unwrap();
        assert_eq!(t.url(), "http://10.60.23.11/cgi-bin/mkv.cgi");
        assert_eq!(t.label(), "10.60.23.11");
    }

    #[test]
    fn keeps_explicit_scheme() {
        let t =
            HttpTransport::open_with("http://ctrl.local/", "/q", Duration::from_secs(1)).unwrap();
        assert_eq!(t.url(), "http://ctrl.local/q");
    }
}
