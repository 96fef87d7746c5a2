use reqwest::Client;
use url::Url;

use crate::classify::{classify, ContentType};
use crate::config::FetchConfig;
use crate::error::{Error, Resource, Result};
use crate::extract::{self, Resolution, SegmentEntry};
use crate::http;
use crate::keys;

/// Read-only view over one fetched manifest: segments, resolutions, version
/// and content type are derived at construction; whether the playlist is
/// encrypted is resolved on demand only, since it costs another fetch. A
/// fresh fetch of the same URL requires a new instance.
#[derive(Debug)]
pub struct Playlist {
    url: Url,
    client: Client,
    content: String,
    content_type: ContentType,
    version: Option<u64>,
    segments: Vec<SegmentEntry>,
    resolutions: Vec<(Resolution, String)>,
}

impl Playlist {
    pub async fn fetch(url: &str, config: &FetchConfig) -> Result<Playlist> {
        if !(url.starts_with("https://") || url.starts_with("http://")) {
            return Err(Error::InputValidation(
                "manifest must be an HTTP or HTTPS URL".to_string(),
            ));
        }
        let url = Url::parse(url)
            .map_err(|e| Error::InputValidation(format!("invalid manifest URL: {e}")))?;
        let client = http::build_client(config)?;
        let content = http::fetch_text(&client, url.clone(), Resource::Manifest).await?;
        let data = extract::extract_segments(&content)?;
        Ok(Playlist {
            content_type: classify(&content),
            version: extract::manifest_version(&content),
            segments: data.segments,
            resolutions: data.resolutions,
            url,
            client,
            content,
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn raw(&self) -> &str {
        &self.content
    }

    pub fn content_type(&self) -> ContentType {
        self.content_type
    }

    pub fn version(&self) -> Option<u64> {
        self.version
    }

    /// Segment URIs with their 1-based ordinals, in manifest order.
    pub fn uris(&self) -> &[SegmentEntry] {
        &self.segments
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    pub fn resolutions(&self) -> Vec<Resolution> {
        self.resolutions.iter().map(|(r, _)| *r).collect()
    }

    /// Variant URL for a resolution; `None` for resolutions the manifest
    /// does not offer.
    pub fn resolution_url(&self, resolution: Resolution) -> Option<&str> {
        self.resolutions
            .iter()
            .find(|(r, _)| *r == resolution)
            .map(|(_, url)| url.as_str())
    }

    /// First alternate-audio URI, when the manifest declares one.
    pub fn audio_uri(&self) -> Option<String> {
        extract::audio_playlist(&self.content)
    }

    /// Whether the playlist is encrypted: refetches the manifest and
    /// attempts a key resolution. No key marker is a definite `false`; a
    /// failed key fetch is an error, not `false`.
    pub async fn is_encrypted(&self) -> Result<bool> {
        let content =
            http::fetch_text(&self.client, self.url.clone(), Resource::Manifest).await?;
        match keys::parse_key_spec(&content) {
            None => Ok(false),
            Some(spec) => {
                let base = extract::base_path(self.url.as_str());
                keys::resolve(&self.client, &spec, base.as_deref()).await?;
                Ok(true)
            }
        }
    }
}
