//! Per-term remote search endpoint, rate limited with `governor`.

use std::io::Read;
use std::num::NonZeroU32;
use std::time::{Duration, Instant};

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use log::debug;

use crate::backends::TermSearchBackend;
use crate::catalog_format::{parse_term_response, RawRecord};
use crate::error::{classify_ureq_failure, ArtError, Result};

const MAX_RESPONSE_BYTES: u64 = 16 * 1024 * 1024;
const RATE_LIMIT_WAIT_CAP: Duration = Duration::from_secs(10);
const RATE_LIMIT_POLL: Duration = Duration::from_millis(25);
const TERM_PLACEHOLDER: &str = "{term}";

pub struct HttpTermSearch {
    endpoint: String,
    limiter: DefaultDirectRateLimiter,
    http_client: ureq::Agent,
}

impl HttpTermSearch {
    pub fn new(endpoint: &str, requests_per_second: u32) -> Self {
        let http_client = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_secs(5))
            .timeout_read(Duration::from_secs(10))
            .timeout_write(Duration::from_secs(10))
            .build();
        let per_second = NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN);
        Self {
            endpoint: endpoint.trim().to_string(),
            limiter: RateLimiter::direct(Quota::per_second(per_second)),
            http_client,
        }
    }

    fn query_url(&self, term: &str) -> String {
        let encoded = urlencoding::encode(term);
        if self.endpoint.contains(TERM_PLACEHOLDER) {
            return self.endpoint.replace(TERM_PLACEHOLDER, encoded.as_ref());
        }
        let separator = if self.endpoint.contains('?') { '&' } else { '?' };
        format!("{}{}q={}", self.endpoint, separator, encoded)
    }

    fn wait_for_rate_limit_slot(&self, term: &str) -> Result<()> {
        if self.limiter.check().is_ok() {
            return Ok(());
        }
        let deadline = Instant::now() + RATE_LIMIT_WAIT_CAP;
        while Instant::now() < deadline {
            std::thread::sleep(RATE_LIMIT_POLL);
            if self.limiter.check().is_ok() {
                return Ok(());
            }
        }
        Err(ArtError::Network(format!(
            "rate limit wait cap reached for term '{term}'"
        )))
    }
}

impl TermSearchBackend for HttpTermSearch {
    fn search_term(&self, term: &str) -> Result<Vec<RawRecord>> {
        if self.endpoint.is_empty() {
            return Err(ArtError::CapabilityDisabled(
                "no term search endpoint configured".to_string(),
            ));
        }
        let term = term.trim();
        if term.is_empty() {
            return Ok(Vec::new());
        }
        self.wait_for_rate_limit_slot(term)?;

        let url = self.query_url(term);
        let response = self
            .http_client
            .get(&url)
            .call()
            .map_err(|err| classify_ureq_failure(&err, &format!("term search '{term}'")))?;
        let mut body = String::new();
        response
            .into_reader()
            .take(MAX_RESPONSE_BYTES)
            .read_to_string(&mut body)
            .map_err(|err| ArtError::Network(format!("term search '{term}' read failed: {err}")))?;
        let records = parse_term_response(&body)?;
        debug!("HttpTermSearch: '{}' returned {} records", term, records.len());
        Ok(records)
    }
}
