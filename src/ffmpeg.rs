use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, warn};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;

use crate::acquire::TrackReport;
use crate::error::{Error, Result};

/// Substrings looked for in the tool's metadata dump to detect tracks.
pub const AUDIO_MARKER: &str = "Audio:";
pub const VIDEO_MARKER: &str = "Video:";

// Known phrases in the tool's line-oriented diagnostics.
const PROGRESS_PHRASE: &str = "Opening";
const INVALID_INPUT_PHRASE: &str = "Error opening input";
const INVALID_OUTPUT_PHRASES: [&str; 2] = [
    "Error opening output file",
    "Unable to choose an output format",
];
const NO_STREAM_PHRASE: &str = "matches no streams";

/// Whether tool diagnostics are passed through verbatim or suppressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Verbosity {
    #[default]
    Quiet,
    Passthrough,
}

/// Audio and video presence as reported by one segment probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TrackPresence {
    pub has_audio: bool,
    pub has_video: bool,
}

/// Narrow capability seam over the stream-presence heuristic, so the
/// substring matching on tool output can be swapped for a structured
/// metadata query without touching the acquirer.
#[allow(async_fn_in_trait)]
pub trait TrackProbe {
    async fn probe(&self, path: &Path) -> Result<TrackPresence>;
}

/// Which elementary stream a rendition download selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum RenditionKind {
    Audio,
    Video,
}

/// Quality tier, mapped onto the tool's stream indices 0..=2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum RenditionQuality {
    Lower,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LineVerdict {
    Progress,
    InvalidInput,
    InvalidOutput,
    NoStreamMap,
    Other,
}

fn scan_line(line: &str) -> LineVerdict {
    if line.contains(INVALID_INPUT_PHRASE) {
        return LineVerdict::InvalidInput;
    }
    if INVALID_OUTPUT_PHRASES.iter().any(|p| line.contains(p)) {
        return LineVerdict::InvalidOutput;
    }
    if line.contains(NO_STREAM_PHRASE) {
        return LineVerdict::NoStreamMap;
    }
    if line.contains(PROGRESS_PHRASE) {
        return LineVerdict::Progress;
    }
    LineVerdict::Other
}

#[derive(Debug, Clone, Copy)]
struct RunOutcome {
    exit_ok: bool,
    stream_map_missing: bool,
}

/// Wrapper over the external media tool. Every invocation pipes the tool's
/// diagnostics and scans them line by line; cancellation kills the child.
pub struct Ffmpeg {
    binary: PathBuf,
    verbosity: Verbosity,
    cancel: CancellationToken,
}

impl Ffmpeg {
    pub fn new(binary: Option<PathBuf>, verbosity: Verbosity, cancel: CancellationToken) -> Self {
        Ffmpeg {
            binary: binary.unwrap_or_else(|| PathBuf::from("ffmpeg")),
            verbosity,
            cancel,
        }
    }

    fn spawn(&self, args: &[OsString]) -> Result<Child> {
        debug!(
            "running {} {}",
            self.binary.display(),
            args.iter()
                .map(|a| a.to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join(" ")
        );
        Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                Error::ExternalTool(format!("failed to launch {}: {e}", self.binary.display()))
            })
    }

    /// Run the tool to completion, scanning its diagnostics. Failure
    /// phrases kill the child and error out immediately, taking precedence
    /// over whatever exit code it would have produced.
    async fn run_scanned(
        &self,
        args: Vec<OsString>,
        progress: Option<&ProgressBar>,
    ) -> Result<RunOutcome> {
        let mut child = self.spawn(&args)?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::ExternalTool("tool diagnostics not captured".to_string()))?;
        let mut lines = BufReader::new(stderr).lines();
        let mut stream_map_missing = false;

        loop {
            let line = tokio::select! {
                _ = self.cancel.cancelled() => {
                    kill(&mut child).await;
                    return Err(Error::Cancelled);
                }
                line = lines.next_line() => line
                    .map_err(|e| Error::ExternalTool(format!("reading tool output: {e}")))?,
            };
            let Some(line) = line else { break };

            match scan_line(&line) {
                LineVerdict::InvalidInput => {
                    kill(&mut child).await;
                    return Err(Error::ExternalTool(format!("invalid input: {line}")));
                }
                LineVerdict::InvalidOutput => {
                    kill(&mut child).await;
                    return Err(Error::ExternalTool(format!("invalid output: {line}")));
                }
                LineVerdict::NoStreamMap => {
                    // Not fatal by itself: rendition downloads retry without
                    // the explicit map.
                    stream_map_missing = true;
                    kill(&mut child).await;
                    break;
                }
                LineVerdict::Progress => {
                    if let Some(pb) = progress {
                        pb.inc(1);
                        pb.set_message(format!("opening segment {}", pb.position()));
                    }
                    self.emit(&line);
                }
                LineVerdict::Other => self.emit(&line),
            }
        }

        let status = child
            .wait()
            .await
            .map_err(|e| Error::ExternalTool(format!("waiting for tool exit: {e}")))?;
        Ok(RunOutcome {
            exit_ok: status.success() && !stream_map_missing,
            stream_map_missing,
        })
    }

    fn emit(&self, line: &str) {
        match self.verbosity {
            Verbosity::Passthrough => eprintln!("{line}"),
            Verbosity::Quiet => debug!("tool: {line}"),
        }
    }

    /// Stream-copy concatenation of the scratch directory's segment files
    /// into `output`, ordered by the ordinal embedded in each filename.
    ///
    /// When the session report says a track was missing from any segment, a
    /// diagnostic is emitted after the remux; the output is still produced.
    pub async fn concat_segments(
        &self,
        scratch: &Path,
        extension: &str,
        output: &Path,
        report: TrackReport,
    ) -> Result<()> {
        let inputs = collect_concat_inputs(scratch, extension).await?;
        if inputs.is_empty() {
            return Err(Error::InputValidation(format!(
                "no {extension} segment files in {}",
                scratch.display()
            )));
        }
        let list_path = scratch.join("list.txt");
        write_concat_list(&list_path, &inputs).await?;

        let mut args: Vec<OsString> = ["-y", "-f", "concat", "-safe", "0", "-i"]
            .into_iter()
            .map(OsString::from)
            .collect();
        args.push(list_path.clone().into_os_string());
        for arg in ["-c", "copy", "-bsf:a", "aac_adtstoasc", "-movflags", "+faststart"] {
            args.push(OsString::from(arg));
        }
        args.push(output.as_os_str().to_os_string());

        let pb = spinner();
        let outcome = self.run_scanned(args, Some(&pb)).await;
        pb.finish_and_clear();
        let _ = tokio::fs::remove_file(&list_path).await;

        let outcome = outcome?;
        if !outcome.exit_ok {
            return Err(Error::ExternalTool(format!(
                "concatenation of {} segments failed",
                inputs.len()
            )));
        }
        if report.missing_audio {
            warn!(
                "{} was saved without an audio track; fetch the audio playlist and mux it in \
                 with a second pass",
                output.display()
            );
        }
        if report.missing_video {
            warn!(
                "{} was saved without a video track; fetch the video playlist and mux it in \
                 with a second pass",
                output.display()
            );
        }
        Ok(())
    }

    /// Stream-copy mux of an audio file and a video file into one output.
    /// Both inputs are deleted afterwards on a best-effort basis.
    pub async fn mux_audio_video(
        &self,
        audio: &Path,
        video: &Path,
        output: &Path,
    ) -> Result<()> {
        if !audio.exists() || !video.exists() {
            return Err(Error::InputValidation(
                "audio or video input file does not exist".to_string(),
            ));
        }
        let mut args: Vec<OsString> = vec![OsString::from("-y"), OsString::from("-i")];
        args.push(audio.as_os_str().to_os_string());
        args.push(OsString::from("-i"));
        args.push(video.as_os_str().to_os_string());
        for arg in ["-c", "copy", "-map", "0:a", "-map", "1:v"] {
            args.push(OsString::from(arg));
        }
        args.push(output.as_os_str().to_os_string());

        let outcome = self.run_scanned(args, None).await?;
        if !outcome.exit_ok {
            return Err(Error::ExternalTool(format!(
                "muxing {} and {} failed",
                audio.display(),
                video.display()
            )));
        }
        for input in [audio, video] {
            if let Err(e) = tokio::fs::remove_file(input).await {
                debug!("leaving {} behind: {e}", input.display());
            }
        }
        Ok(())
    }

    /// Let the tool download one rendition of a playlist directly,
    /// selecting the stream by explicit index. When the requested index
    /// matches no stream, retries once with a plain codec copy.
    pub async fn download_rendition(
        &self,
        input_url: &str,
        kind: RenditionKind,
        quality: RenditionQuality,
        output: &Path,
    ) -> Result<()> {
        let selector = match kind {
            RenditionKind::Video => "v",
            RenditionKind::Audio => "a",
        };
        let index = match quality {
            RenditionQuality::Lower => 0,
            RenditionQuality::Medium => 1,
            RenditionQuality::High => 2,
        };

        let mut args: Vec<OsString> = ["-y", "-i", input_url, "-map"]
            .into_iter()
            .map(OsString::from)
            .collect();
        args.push(OsString::from(format!("{selector}:{index}")));
        args.push(OsString::from("-c"));
        args.push(OsString::from("copy"));
        args.push(output.as_os_str().to_os_string());
        let outcome = self.run_scanned(args, None).await?;
        if outcome.exit_ok {
            return Ok(());
        }
        if outcome.stream_map_missing {
            debug!("stream {selector}:{index} not present, retrying without an explicit map");
        }

        let codec = match kind {
            RenditionKind::Video => "-c:v",
            RenditionKind::Audio => "-c:a",
        };
        let mut args: Vec<OsString> = ["-y", "-i", input_url, codec, "copy"]
            .into_iter()
            .map(OsString::from)
            .collect();
        args.push(output.as_os_str().to_os_string());
        let outcome = self.run_scanned(args, None).await?;
        if !outcome.exit_ok {
            return Err(Error::ExternalTool(format!(
                "rendition download of {input_url} failed"
            )));
        }
        Ok(())
    }

    /// Run the tool's metadata-dump mode and return its diagnostics. The
    /// tool exits nonzero in this mode by design, so the status is ignored.
    async fn metadata_dump(&self, path: &Path) -> Result<String> {
        let args = vec![OsString::from("-i"), path.as_os_str().to_os_string()];
        let mut child = self.spawn(&args)?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::ExternalTool("tool diagnostics not captured".to_string()))?;
        let mut text = String::new();
        tokio::select! {
            _ = self.cancel.cancelled() => {
                kill(&mut child).await;
                return Err(Error::Cancelled);
            }
            read = stderr.read_to_string(&mut text) => {
                read.map_err(|e| Error::ExternalTool(format!("reading tool output: {e}")))?;
            }
        }
        let _ = child.wait().await;
        Ok(text)
    }
}

impl TrackProbe for Ffmpeg {
    async fn probe(&self, path: &Path) -> Result<TrackPresence> {
        let text = self.metadata_dump(path).await?;
        Ok(TrackPresence {
            has_audio: text.contains(AUDIO_MARKER),
            has_video: text.contains(VIDEO_MARKER),
        })
    }
}

async fn kill(child: &mut Child) {
    let _ = child.start_kill();
    let _ = child.wait().await;
}

fn spinner() -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap(),
    );
    pb.set_message("remuxing");
    pb
}

/// First run of ASCII digits in a filename, used as the concat sort key.
/// Names without digits sort after every numbered segment.
pub fn ordinal_in_name(name: &str) -> Option<u64> {
    let start = name.find(|c: char| c.is_ascii_digit())?;
    let rest = &name[start..];
    let end = rest
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(rest.len());
    rest[..end].parse().ok()
}

/// Scratch files carrying the session's segment extension, sorted by the
/// numeric ordinal embedded in their filenames.
pub async fn collect_concat_inputs(dir: &Path, extension: &str) -> Result<Vec<PathBuf>> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| Error::filesystem(dir, e))?;
    let mut files: Vec<(Option<u64>, String, PathBuf)> = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| Error::filesystem(dir, e))?
    {
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().into_owned();
        if path.is_file() && name.ends_with(extension) {
            files.push((ordinal_in_name(&name), name, path));
        }
    }
    files.sort_by_key(|(ordinal, name, _)| (ordinal.unwrap_or(u64::MAX), name.clone()));
    Ok(files.into_iter().map(|(_, _, path)| path).collect())
}

async fn write_concat_list(list_path: &Path, inputs: &[PathBuf]) -> Result<()> {
    let mut body = String::new();
    for input in inputs {
        body.push_str(&format!("file '{}'\n", input.display()));
    }
    tokio::fs::write(list_path, body)
        .await
        .map_err(|e| Error::filesystem(list_path, e))
}
