use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::ffmpeg::{RenditionKind, RenditionQuality};

/// An M3U8 playlist analyzer and downloader.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Inspect a playlist: type, version, segments, resolutions, encryption.
    Info {
        /// The M3U8 URL to inspect.
        url: String,

        /// Custom HTTP header(s). E.g., -H "Cookie: mycookie"
        #[arg(short = 'H', long = "header", action = clap::ArgAction::Append)]
        headers: Vec<String>,

        /// Network timeout in seconds per request.
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Download a playlist's segments and remux them into one file.
    Download {
        /// The M3U8 URL to download.
        url: String,

        /// Output media filename.
        #[arg(short, long, default_value = "output.mp4")]
        output: PathBuf,

        /// Base URL for resolving relative segment and key URIs, when the
        /// manifest URL itself is not a usable base.
        #[arg(long)]
        base_url: Option<String>,

        /// Audio playlist to acquire separately and mux into the video.
        #[arg(long)]
        audio_url: Option<String>,

        /// Custom HTTP header(s). E.g., -H "Cookie: mycookie"
        #[arg(short = 'H', long = "header", action = clap::ArgAction::Append)]
        headers: Vec<String>,

        /// Network timeout in seconds per request.
        #[arg(long)]
        timeout: Option<u64>,

        /// Path to the FFmpeg executable.
        #[arg(long)]
        ffmpeg_path: Option<PathBuf>,

        /// Pass the media tool's diagnostics through verbatim.
        #[arg(long)]
        verbose_tool: bool,
    },

    /// Mux an already-downloaded audio file and video file into one output.
    Mux {
        /// Audio input file.
        #[arg(short, long)]
        audio: PathBuf,

        /// Video input file.
        #[arg(short, long)]
        video: PathBuf,

        /// Output media filename.
        #[arg(short, long, default_value = "output.mp4")]
        output: PathBuf,

        /// Path to the FFmpeg executable.
        #[arg(long)]
        ffmpeg_path: Option<PathBuf>,

        /// Pass the media tool's diagnostics through verbatim.
        #[arg(long)]
        verbose_tool: bool,
    },

    /// Let the media tool pull one rendition of a playlist directly.
    Rendition {
        /// The M3U8 URL to download from.
        url: String,

        /// Output media filename.
        #[arg(short, long, default_value = "output.mp4")]
        output: PathBuf,

        /// Which elementary stream to select.
        #[arg(long, value_enum)]
        kind: RenditionKind,

        /// Quality tier mapped onto the stream index.
        #[arg(long, value_enum, default_value = "high")]
        quality: RenditionQuality,

        /// Path to the FFmpeg executable.
        #[arg(long)]
        ffmpeg_path: Option<PathBuf>,

        /// Pass the media tool's diagnostics through verbatim.
        #[arg(long)]
        verbose_tool: bool,
    },
}

pub fn parse_args() -> Cli {
    Cli::parse()
}
