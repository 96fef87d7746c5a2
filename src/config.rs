use std::time::Duration;

use log::warn;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(20);

const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                                  (KHTML, like Gecko) Chrome/118.0.0.0 Safari/537.36";

// Default header set mimicking a common browser, for servers that reject
// bare clients.
const DEFAULT_HEADERS: &[(&str, &str)] = &[
    ("Accept", "application/json, text/plain, */*"),
    ("Accept-Language", "en-US,en;q=0.9"),
    ("Sec-Fetch-Dest", "empty"),
    ("Sec-Fetch-Mode", "cors"),
    ("Sec-Fetch-Site", "same-origin"),
    (
        "Sec-Ch-Ua",
        "\"Not:A-Brand\";v=\"99\", \"Google Chrome\";v=\"118\", \"Chromium\";v=\"118\"",
    ),
    ("Sec-Ch-Ua-Mobile", "?0"),
    ("Sec-Ch-Ua-Platform", "\"Windows\""),
];

/// Request configuration: the recognized fields are explicit, everything
/// else rides in the `extra_headers` passthrough bag.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Per-request timeout for every network call.
    pub timeout: Duration,
    /// Overrides the built-in browser User-Agent when set.
    pub user_agent: Option<String>,
    /// Unrecognized headers, applied verbatim after the defaults.
    pub extra_headers: Vec<(String, String)>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        FetchConfig {
            timeout: DEFAULT_TIMEOUT,
            user_agent: None,
            extra_headers: Vec::new(),
        }
    }
}

impl FetchConfig {
    /// Build a config from CLI-style `"Name: value"` header strings plus an
    /// optional timeout override. Malformed header strings are skipped with
    /// a warning.
    pub fn from_cli(headers: &[String], timeout_secs: Option<u64>) -> Self {
        let mut config = FetchConfig::default();
        if let Some(secs) = timeout_secs {
            config.timeout = Duration::from_secs(secs);
        }
        for header in headers {
            if let Some((name, value)) = header.split_once(':') {
                config
                    .extra_headers
                    .push((name.trim().to_string(), value.trim().to_string()));
            } else {
                warn!("ignoring malformed header: {header}");
            }
        }
        config
    }

    /// Materialize the default + passthrough headers. Entries that do not
    /// form valid header names/values are skipped with a warning.
    pub fn header_map(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for (name, value) in DEFAULT_HEADERS {
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                headers.insert(name, value);
            }
        }
        let user_agent = self.user_agent.as_deref().unwrap_or(DEFAULT_USER_AGENT);
        match HeaderValue::from_str(user_agent) {
            Ok(value) => {
                headers.insert(reqwest::header::USER_AGENT, value);
            }
            Err(e) => warn!("ignoring unusable User-Agent override: {e}"),
        }
        for (name, value) in &self.extra_headers {
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                (Ok(name), Ok(value)) => {
                    headers.insert(name, value);
                }
                _ => warn!("ignoring unusable header: {name}"),
            }
        }
        headers
    }
}
