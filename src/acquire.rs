use std::path::{Path, PathBuf};
use std::sync::Arc;

use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info, warn};
use reqwest::Client;
use tempfile::TempDir;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::crypto;
use crate::error::{Error, Resource, Result};
use crate::extract::SegmentEntry;
use crate::ffmpeg::{TrackPresence, TrackProbe};
use crate::keys::ResolvedKey;

/// Sticky track-completeness flags for one acquisition session. Once a
/// segment probe reports a track absent the flag stays set for the rest of
/// the session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrackReport {
    pub missing_audio: bool,
    pub missing_video: bool,
}

impl TrackReport {
    pub fn absorb(&mut self, presence: TrackPresence) {
        self.missing_audio |= !presence.has_audio;
        self.missing_video |= !presence.has_video;
    }

    pub fn complete(&self) -> bool {
        !self.missing_audio && !self.missing_video
    }
}

/// Validated key material for segment decryption.
struct SegmentKey {
    key: [u8; 16],
    iv: [u8; 16],
}

/// One manifest's worth of segment acquisition: a scratch directory the
/// session owns for its whole lifetime, the segment list, and the optional
/// decryption key. Each segment runs download → decrypt → probe before the
/// next one starts.
pub struct AcquisitionSession {
    client: Arc<Client>,
    base: Option<Url>,
    segments: Vec<SegmentEntry>,
    key: Option<SegmentKey>,
    extension: String,
    scratch: TempDir,
    report: TrackReport,
    cancel: CancellationToken,
}

impl AcquisitionSession {
    pub fn new(
        client: Arc<Client>,
        base: Option<Url>,
        segments: Vec<SegmentEntry>,
        key: Option<&ResolvedKey>,
        extension: &str,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let key = match key {
            Some(resolved) => match resolved.iv_bytes()? {
                Some(iv) => Some(SegmentKey {
                    key: resolved.key_bytes()?,
                    iv,
                }),
                None => {
                    warn!("key present but the manifest carries no IV; storing segments as fetched");
                    None
                }
            },
            None => None,
        };
        let scratch = tempfile::Builder::new()
            .prefix("hlsget-")
            .tempdir()
            .map_err(|e| Error::filesystem(std::env::temp_dir(), e))?;
        Ok(AcquisitionSession {
            client,
            base,
            segments,
            key,
            extension: extension.to_string(),
            scratch,
            report: TrackReport::default(),
            cancel,
        })
    }

    pub fn scratch_path(&self) -> &Path {
        self.scratch.path()
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    pub fn report(&self) -> TrackReport {
        self.report
    }

    fn segment_path(&self, ordinal: u32) -> PathBuf {
        self.scratch
            .path()
            .join(format!("seg_{ordinal}{}", self.extension))
    }

    fn resolve_segment_url(&self, uri: &str) -> Result<Url> {
        if uri.starts_with("http://") || uri.starts_with("https://") {
            return Url::parse(uri)
                .map_err(|e| Error::InputValidation(format!("invalid segment URL {uri}: {e}")));
        }
        let base = self.base.as_ref().ok_or_else(|| {
            Error::InputValidation(format!(
                "segment URI {uri} is relative and no base URL was supplied"
            ))
        })?;
        base.join(uri)
            .map_err(|e| Error::InputValidation(format!("cannot resolve segment URI {uri}: {e}")))
    }

    /// Acquire every segment in ordinal order. The first failure aborts the
    /// session; the scratch directory is removed by [`cleanup`] or on drop
    /// either way.
    ///
    /// [`cleanup`]: AcquisitionSession::cleanup
    pub async fn acquire_all<P: TrackProbe>(&mut self, probe: &P) -> Result<()> {
        let pb = ProgressBar::new(self.segments.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template(
                    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})",
                )
                .unwrap()
                .progress_chars("#>-"),
        );
        for segment in self.segments.clone() {
            if self.cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            self.acquire_one(&segment, probe).await?;
            pb.inc(1);
        }
        pb.finish_with_message("downloaded");
        Ok(())
    }

    async fn acquire_one<P: TrackProbe>(&mut self, segment: &SegmentEntry, probe: &P) -> Result<()> {
        let url = self.resolve_segment_url(&segment.uri)?;
        let path = self.segment_path(segment.ordinal);
        self.download(&url, &path).await?;

        if let Some(key) = &self.key {
            decrypt_segment_file(&path, &key.key, &key.iv).await?;
            debug!("segment {} decrypted", segment.ordinal);
        }

        let presence = probe.probe(&path).await?;
        if !presence.has_audio {
            info!("segment {} carries no audio track", segment.ordinal);
        }
        if !presence.has_video {
            info!("segment {} carries no video track", segment.ordinal);
        }
        self.report.absorb(presence);
        Ok(())
    }

    /// Streamed fetch of one segment body into its scratch file.
    async fn download(&self, url: &Url, path: &Path) -> Result<()> {
        let mut response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| Error::network(Resource::Segment, url, e))?
            .error_for_status()
            .map_err(|e| Error::network(Resource::Segment, url, e))?;

        let mut file = tokio::fs::File::create(path)
            .await
            .map_err(|e| Error::filesystem(path, e))?;
        loop {
            let chunk = tokio::select! {
                _ = self.cancel.cancelled() => return Err(Error::Cancelled),
                chunk = response.chunk() => {
                    chunk.map_err(|e| Error::network(Resource::Segment, url, e))?
                }
            };
            let Some(chunk) = chunk else { break };
            file.write_all(&chunk)
                .await
                .map_err(|e| Error::filesystem(path, e))?;
        }
        file.flush().await.map_err(|e| Error::filesystem(path, e))
    }

    /// Remove the scratch directory. Dropping the session does the same;
    /// this form reports removal failures instead of swallowing them, and
    /// never masks an earlier error since it returns nothing.
    pub fn cleanup(self) {
        if let Err(e) = self.scratch.close() {
            warn!("failed to remove scratch directory: {e}");
        }
    }
}

/// Decrypt one acquired segment file in place: read, chunked AES-128-CBC,
/// rewrite. Applied at most once per segment.
pub async fn decrypt_segment_file(path: &Path, key: &[u8; 16], iv: &[u8; 16]) -> Result<()> {
    let mut data = tokio::fs::read(path)
        .await
        .map_err(|e| Error::filesystem(path, e))?;
    crypto::decrypt_aes128_cbc(&mut data, key, iv)?;
    tokio::fs::write(path, &data)
        .await
        .map_err(|e| Error::filesystem(path, e))
}
