use std::sync::OnceLock;

use regex::Regex;
use reqwest::Client;
use url::Url;

use crate::error::{Error, Resource, Result};
use crate::http;

fn key_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"#EXT-X-KEY:[^\n]*URI="([^"]+)"(?:[^\n]*,IV=(0x[0-9A-Fa-f]+))?"#)
            .expect("valid key pattern")
    })
}

fn method_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"#EXT-X-KEY:METHOD=([A-Za-z0-9-]+)").expect("valid method pattern"))
}

/// Encryption parameters as they appear in manifest text. The key itself
/// still has to be fetched; the IV (when present) travels inline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptionSpec {
    pub method: Option<String>,
    pub key_uri: String,
    /// IV literal exactly as written, `0x` prefix included.
    pub iv_hex: Option<String>,
}

/// Key material after the secondary fetch, hex-encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedKey {
    pub key_hex: String,
    /// Manifest IV with the `0x` prefix stripped.
    pub iv_hex: Option<String>,
}

impl ResolvedKey {
    pub fn key_bytes(&self) -> Result<[u8; 16]> {
        bytes_16(&self.key_hex, "key")
    }

    pub fn iv_bytes(&self) -> Result<Option<[u8; 16]>> {
        self.iv_hex
            .as_deref()
            .map(|iv| bytes_16(iv, "IV"))
            .transpose()
    }
}

fn bytes_16(hex_str: &str, what: &str) -> Result<[u8; 16]> {
    let bytes = hex::decode(hex_str)
        .map_err(|e| Error::Decryption(format!("{what} is not valid hex: {e}")))?;
    bytes
        .as_slice()
        .try_into()
        .map_err(|_| Error::Decryption(format!("{what} must be 16 bytes, got {}", bytes.len())))
}

/// Find the encryption-key marker in manifest text. `None` means the
/// playlist is simply not encrypted, which is not a failure.
pub fn parse_key_spec(text: &str) -> Option<EncryptionSpec> {
    let cap = key_re().captures(text)?;
    Some(EncryptionSpec {
        method: method_re()
            .captures(text)
            .map(|m| m[1].to_string()),
        key_uri: cap[1].to_string(),
        iv_hex: cap.get(2).map(|iv| iv.as_str().to_string()),
    })
}

/// Absolute URL of the key, joining relative URIs against the player base.
pub fn key_url(spec: &EncryptionSpec, base: Option<&str>) -> Result<Url> {
    if spec.key_uri.starts_with("http://") || spec.key_uri.starts_with("https://") {
        return Url::parse(&spec.key_uri)
            .map_err(|e| Error::InputValidation(format!("invalid key URL {}: {e}", spec.key_uri)));
    }
    let base = base.ok_or_else(|| {
        Error::InputValidation(format!(
            "key URI {} is relative and no base URL was supplied",
            spec.key_uri
        ))
    })?;
    let base = Url::parse(base)
        .map_err(|e| Error::InputValidation(format!("invalid base URL {base}: {e}")))?;
    base.join(&spec.key_uri)
        .map_err(|e| Error::InputValidation(format!("cannot resolve key URI {}: {e}", spec.key_uri)))
}

/// Fetch the key bytes and pair them with the manifest IV.
pub async fn resolve(
    client: &Client,
    spec: &EncryptionSpec,
    base: Option<&str>,
) -> Result<ResolvedKey> {
    let url = key_url(spec, base)?;
    let bytes = http::fetch_bytes(client, url, Resource::Key).await?;
    Ok(ResolvedKey {
        key_hex: hex::encode(bytes),
        iv_hex: spec
            .iv_hex
            .as_deref()
            .map(|iv| iv.trim_start_matches("0x").to_string()),
    })
}
