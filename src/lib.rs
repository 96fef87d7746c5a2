pub mod acquire;
pub mod classify;
pub mod cli;
pub mod config;
pub mod crypto;
pub mod error;
pub mod extract;
pub mod ffmpeg;
pub mod http;
pub mod keys;
pub mod playlist;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use log::{info, warn};
use reqwest::Client;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::acquire::{AcquisitionSession, TrackReport};
use crate::classify::{classify, ContentType};
use crate::cli::{Cli, Command};
use crate::config::FetchConfig;
use crate::error::{Error, Resource, Result};
use crate::extract::HighestResolution;
use crate::ffmpeg::{Ffmpeg, Verbosity};
use crate::playlist::Playlist;

/// Entry point behind the CLI: dispatches one subcommand.
pub async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Info {
            url,
            headers,
            timeout,
        } => {
            let config = FetchConfig::from_cli(&headers, timeout);
            print_info(&url, &config).await
        }
        Command::Download {
            url,
            output,
            base_url,
            audio_url,
            headers,
            timeout,
            ffmpeg_path,
            verbose_tool,
        } => {
            let config = FetchConfig::from_cli(&headers, timeout);
            let cancel = cancel_on_ctrl_c();
            let ffmpeg = Ffmpeg::new(ffmpeg_path, verbosity(verbose_tool), cancel.clone());
            download(
                &url, &output, base_url, audio_url, &config, &ffmpeg, cancel,
            )
            .await
        }
        Command::Mux {
            audio,
            video,
            output,
            ffmpeg_path,
            verbose_tool,
        } => {
            let cancel = cancel_on_ctrl_c();
            let ffmpeg = Ffmpeg::new(ffmpeg_path, verbosity(verbose_tool), cancel);
            ffmpeg
                .mux_audio_video(&audio, &video, &output)
                .await
                .context("mux failed")?;
            info!("saved {}", output.display());
            Ok(())
        }
        Command::Rendition {
            url,
            output,
            kind,
            quality,
            ffmpeg_path,
            verbose_tool,
        } => {
            let cancel = cancel_on_ctrl_c();
            let ffmpeg = Ffmpeg::new(ffmpeg_path, verbosity(verbose_tool), cancel);
            ffmpeg
                .download_rendition(&url, kind, quality, &output)
                .await
                .context("rendition download failed")?;
            info!("saved {}", output.display());
            Ok(())
        }
    }
}

fn verbosity(verbose_tool: bool) -> Verbosity {
    if verbose_tool {
        Verbosity::Passthrough
    } else {
        Verbosity::Quiet
    }
}

/// Cancellation token wired to Ctrl-C.
fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling");
            trigger.cancel();
        }
    });
    cancel
}

async fn print_info(url: &str, config: &FetchConfig) -> anyhow::Result<()> {
    let playlist = Playlist::fetch(url, config).await?;
    println!("url:       {}", playlist.url());
    match playlist.version() {
        Some(version) => println!("version:   {version}"),
        None => println!("version:   undefined"),
    }
    println!("type:      {}", playlist.content_type());
    println!("segments:  {}", playlist.segment_count());
    let encrypted = playlist.is_encrypted().await?;
    println!("encrypted: {}", if encrypted { "yes" } else { "no" });
    let resolutions = playlist.resolutions();
    if !resolutions.is_empty() {
        println!("variants:");
        for resolution in resolutions {
            // resolution_url never misses for a listed resolution
            let url = playlist.resolution_url(resolution).unwrap_or("-");
            println!("  {resolution:>10}  {url}");
        }
    }
    if let Some(audio) = playlist.audio_uri() {
        println!("audio:     {audio}");
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn download(
    url: &str,
    output: &Path,
    base_url: Option<String>,
    audio_url: Option<String>,
    config: &FetchConfig,
    ffmpeg: &Ffmpeg,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let client = Arc::new(http::build_client(config)?);

    match &audio_url {
        None => {
            acquire_playlist(
                &client,
                ffmpeg,
                cancel,
                url,
                base_url.as_deref(),
                output,
            )
            .await?;
        }
        Some(audio_url) => {
            // Independent video and audio passes, joined by a mux step that
            // also removes the two intermediates.
            let video_out = sibling(output, "video");
            let audio_out = sibling(output, "audio");
            acquire_playlist(
                &client,
                ffmpeg,
                cancel.clone(),
                url,
                base_url.as_deref(),
                &video_out,
            )
            .await?;
            acquire_playlist(
                &client,
                ffmpeg,
                cancel,
                audio_url,
                base_url.as_deref(),
                &audio_out,
            )
            .await?;
            ffmpeg
                .mux_audio_video(&audio_out, &video_out, output)
                .await?;
        }
    }
    info!("saved {}", output.display());
    Ok(())
}

/// `out.mp4` → `out.video.mp4` style intermediate names.
fn sibling(output: &Path, tag: &str) -> PathBuf {
    let extension = output
        .extension()
        .map(|e| e.to_string_lossy().into_owned())
        .unwrap_or_else(|| "mp4".to_string());
    output.with_extension(format!("{tag}.{extension}"))
}

/// The full pipeline for one playlist URL: fetch, follow a master manifest
/// one hop down to its best variant, resolve the key, acquire every
/// segment, and concatenate into `output`. Returns the session's track
/// report so callers can decide on a second mux pass.
pub async fn acquire_playlist(
    client: &Arc<Client>,
    ffmpeg: &Ffmpeg,
    cancel: CancellationToken,
    url: &str,
    base_url: Option<&str>,
    output: &Path,
) -> Result<TrackReport> {
    let mut manifest_url = Url::parse(url)
        .map_err(|e| Error::InputValidation(format!("invalid manifest URL {url}: {e}")))?;
    let mut text = http::fetch_text(client, manifest_url.clone(), Resource::Manifest).await?;
    let mut content_type = classify(&text);

    if matches!(
        content_type,
        ContentType::Master | ContentType::MasterEncrypted
    ) {
        match extract::highest_resolution(&text) {
            HighestResolution::Found {
                resolution,
                url: Some(variant),
            } => {
                info!("master playlist: following {resolution} variant");
                manifest_url = manifest_url.join(&variant).map_err(|e| {
                    Error::InputValidation(format!("cannot resolve variant URL {variant}: {e}"))
                })?;
                text = http::fetch_text(client, manifest_url.clone(), Resource::Manifest).await?;
                content_type = classify(&text);
                if matches!(
                    content_type,
                    ContentType::Master | ContentType::MasterEncrypted
                ) {
                    return Err(Error::InputValidation(format!(
                        "variant {manifest_url} is itself a master playlist"
                    )));
                }
            }
            HighestResolution::Found { resolution, url: None } => {
                return Err(Error::InputValidation(format!(
                    "variant {resolution} has no URL line"
                )));
            }
            HighestResolution::NoResolutions { content_type } => {
                return Err(Error::InputValidation(format!(
                    "master playlist without RESOLUTION variants (classified: {content_type})"
                )));
            }
        }
    }

    let data = extract::extract_segments(&text)?;
    if data.segments.is_empty() {
        return Err(Error::InputValidation(format!(
            "no segments found in {manifest_url} (classified: {content_type})"
        )));
    }
    info!(
        "playlist classified as '{content_type}' with {} segments",
        data.segments.len()
    );

    let player_base = base_url
        .map(str::to_string)
        .or_else(|| extract::base_path(manifest_url.as_str()));
    let key = match keys::parse_key_spec(&text) {
        Some(spec) => {
            info!("encrypted playlist, resolving key");
            Some(keys::resolve(client, &spec, player_base.as_deref()).await?)
        }
        None => None,
    };

    let extension = match content_type {
        ContentType::SegmentsM4s => ".m4s",
        _ => ".ts",
    };
    let mut session = AcquisitionSession::new(
        client.clone(),
        Some(manifest_url),
        data.segments,
        key.as_ref(),
        extension,
        cancel,
    )?;

    let acquired = session.acquire_all(ffmpeg).await;
    let report = session.report();
    let result = match acquired {
        Ok(()) => {
            ffmpeg
                .concat_segments(session.scratch_path(), extension, output, report)
                .await
        }
        Err(e) => Err(e),
    };
    // Scratch removal happens on every path, after concat has consumed the
    // files; a removal failure is logged without masking `result`.
    session.cleanup();
    result.map(|()| report)
}
