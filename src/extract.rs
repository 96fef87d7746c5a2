use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;

use crate::classify::{classify, ContentType, MEDIA_TAG, STREAM_INF_TAG};
use crate::error::{Error, Result};

fn resolution_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"RESOLUTION=(\d+)x(\d+)").expect("valid resolution pattern"))
}

fn uri_attr_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"URI="([^"]+)""#).expect("valid URI pattern"))
}

fn version_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"#EXT-X-VERSION:(\d+)").expect("valid version pattern"))
}

fn bare_url_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^https?://").expect("valid URL pattern"))
}

/// A `WxH` video resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub fn pixels(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl FromStr for Resolution {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (w, h) = s
            .split_once('x')
            .ok_or_else(|| Error::InputValidation(format!("not a WxH resolution: {s}")))?;
        let width = w
            .parse()
            .map_err(|_| Error::InputValidation(format!("bad resolution width: {s}")))?;
        let height = h
            .parse()
            .map_err(|_| Error::InputValidation(format!("bad resolution height: {s}")))?;
        Ok(Resolution { width, height })
    }
}

/// Outcome of the highest-resolution query. A manifest without
/// `RESOLUTION=` tokens reports its classified type instead of failing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HighestResolution {
    Found {
        resolution: Resolution,
        /// Line following the matching variant directive; absent when the
        /// directive is the last line of the manifest.
        url: Option<String>,
    },
    NoResolutions { content_type: ContentType },
}

/// One segment URI with its 1-based manifest position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentEntry {
    pub ordinal: u32,
    pub uri: String,
}

/// Structured facts pulled from one manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SegmentData {
    /// Every non-comment, non-blank line, ordinals `1..=N` in source order.
    pub segments: Vec<SegmentEntry>,
    /// Resolution → variant URL pairs in first-appearance order, keys unique.
    pub resolutions: Vec<(Resolution, String)>,
}

impl SegmentData {
    pub fn resolution_url(&self, resolution: Resolution) -> Option<&str> {
        self.resolutions
            .iter()
            .find(|(r, _)| *r == resolution)
            .map(|(_, url)| url.as_str())
    }

    pub fn variant_urls(&self) -> impl Iterator<Item = &str> {
        self.resolutions.iter().map(|(_, url)| url.as_str())
    }
}

/// Pick the largest `RESOLUTION=WxH` variant by pixel count. Ties keep the
/// first occurrence in text order.
pub fn highest_resolution(text: &str) -> HighestResolution {
    let mut best: Option<Resolution> = None;
    for cap in resolution_re().captures_iter(text) {
        let (Ok(width), Ok(height)) = (cap[1].parse(), cap[2].parse()) else {
            continue;
        };
        let resolution = Resolution { width, height };
        if best.is_none_or(|b| resolution.pixels() > b.pixels()) {
            best = Some(resolution);
        }
    }
    match best {
        None => HighestResolution::NoResolutions {
            content_type: classify(text),
        },
        Some(resolution) => HighestResolution::Found {
            resolution,
            url: variant_url_for(text, resolution),
        },
    }
}

/// URL line following the first variant directive carrying `resolution`.
pub fn variant_url_for(text: &str, resolution: Resolution) -> Option<String> {
    let mut lines = text.lines();
    while let Some(line) = lines.next() {
        let line = line.trim();
        if !line.starts_with(STREAM_INF_TAG) {
            continue;
        }
        let matches = resolution_re().captures(line).is_some_and(|cap| {
            cap[1].parse() == Ok(resolution.width) && cap[2].parse() == Ok(resolution.height)
        });
        if matches {
            return lines
                .next()
                .map(|l| l.trim().to_string())
                .filter(|l| !l.is_empty());
        }
    }
    None
}

/// Extract segment URIs and the full resolution→URL map from manifest text.
///
/// Fails fast when handed a bare URL instead of manifest content — that is
/// caller misuse, not an empty playlist.
pub fn extract_segments(text: &str) -> Result<SegmentData> {
    if bare_url_re().is_match(text) {
        return Err(Error::InputValidation(
            "expected manifest text, got a URL".to_string(),
        ));
    }

    let segments = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .enumerate()
        .map(|(index, uri)| SegmentEntry {
            ordinal: index as u32 + 1,
            uri: uri.to_string(),
        })
        .collect();

    let mut resolutions: Vec<(Resolution, String)> = Vec::new();
    for cap in resolution_re().captures_iter(text) {
        let (Ok(width), Ok(height)) = (cap[1].parse(), cap[2].parse()) else {
            continue;
        };
        let resolution = Resolution { width, height };
        if resolutions.iter().any(|(r, _)| *r == resolution) {
            continue;
        }
        if let Some(url) = variant_url_for(text, resolution) {
            resolutions.push((resolution, url));
        }
    }

    Ok(SegmentData {
        segments,
        resolutions,
    })
}

/// URI of the first alternate-media marker with `TYPE=AUDIO`.
pub fn audio_playlist(text: &str) -> Option<String> {
    for line in text.lines() {
        let line = line.trim();
        if line.starts_with(MEDIA_TAG) && line.contains("TYPE=AUDIO") {
            if let Some(cap) = uri_attr_re().captures(line) {
                return Some(cap[1].to_string());
            }
        }
    }
    None
}

/// Base path of a manifest URL: everything before the path element carrying
/// an `.m3u8` token, with a trailing slash. Relative segment and variant
/// URIs resolve against this.
pub fn base_path(url: &str) -> Option<String> {
    let url = url.strip_suffix('/').unwrap_or(url);
    let parts: Vec<&str> = url.split('/').collect();
    for (index, part) in parts.iter().enumerate() {
        if part.contains(".m3u8") {
            if index == 0 {
                return None;
            }
            return Some(format!("{}/", parts[..index].join("/")));
        }
    }
    None
}

/// Integer of the `#EXT-X-VERSION` marker, when present.
pub fn manifest_version(text: &str) -> Option<u64> {
    version_re()
        .captures(text)
        .and_then(|cap| cap[1].parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MASTER: &str = "#EXTM3U\n\
        #EXT-X-STREAM-INF:BANDWIDTH=500000,RESOLUTION=640x360\n\
        http://example.com/360p.m3u8\n\
        #EXT-X-STREAM-INF:BANDWIDTH=1000000,RESOLUTION=1280x720\n\
        http://example.com/720p.m3u8\n\
        #EXT-X-STREAM-INF:BANDWIDTH=3000000,RESOLUTION=1920x1080\n\
        http://example.com/1080p.m3u8\n";

    #[test]
    fn highest_resolution_picks_largest_pixel_count() {
        match highest_resolution(MASTER) {
            HighestResolution::Found { resolution, url } => {
                assert_eq!(resolution.to_string(), "1920x1080");
                assert_eq!(url.as_deref(), Some("http://example.com/1080p.m3u8"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn highest_resolution_tie_keeps_first_occurrence() {
        let tied = "#EXTM3U\n\
            #EXT-X-STREAM-INF:BANDWIDTH=1,RESOLUTION=1280x720\n\
            first.m3u8\n\
            #EXT-X-STREAM-INF:BANDWIDTH=2,RESOLUTION=1280x720\n\
            second.m3u8\n";
        match highest_resolution(tied) {
            HighestResolution::Found { url, .. } => {
                assert_eq!(url.as_deref(), Some("first.m3u8"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn no_resolution_tokens_reports_content_type() {
        let segments = "#EXTM3U\n#EXTINF:10,\nseg1.ts\n";
        assert_eq!(
            highest_resolution(segments),
            HighestResolution::NoResolutions {
                content_type: ContentType::SegmentsTs
            }
        );
    }

    #[test]
    fn ordinals_cover_every_uri_line_in_order() {
        let text = "#EXTM3U\n\
            #EXTINF:10.0,\n\
            http://example.com/segment1.ts\n\
            \n\
            #EXTINF:10.0,\n\
            http://example.com/segment2.ts\n\
            http://example.com/segment3.ts\n";
        let data = extract_segments(text).unwrap();
        let ordinals: Vec<u32> = data.segments.iter().map(|s| s.ordinal).collect();
        assert_eq!(ordinals, vec![1, 2, 3]);
        assert_eq!(data.segments[2].uri, "http://example.com/segment3.ts");
    }

    #[test]
    fn resolution_map_covers_all_variants() {
        let data = extract_segments(MASTER).unwrap();
        assert_eq!(data.resolutions.len(), 3);
        let res: Resolution = "1280x720".parse().unwrap();
        assert_eq!(
            data.resolution_url(res),
            Some("http://example.com/720p.m3u8")
        );
        assert_eq!(data.variant_urls().count(), 3);
    }

    #[test]
    fn bare_url_input_is_rejected() {
        let err = extract_segments("https://example.com/playlist.m3u8").unwrap_err();
        assert!(matches!(err, Error::InputValidation(_)));
    }

    #[test]
    fn audio_media_marker_uri_is_verbatim() {
        let text = "#EXTM3U\n\
            #EXT-X-MEDIA:TYPE=AUDIO,GROUP-ID=\"audio\",NAME=\"English\",DEFAULT=YES,URI=\"http://example.com/audio.m3u8\"\n\
            #EXT-X-STREAM-INF:BANDWIDTH=256000,AUDIO=\"audio\"\n\
            http://example.com/stream.m3u8\n";
        assert_eq!(
            audio_playlist(text).as_deref(),
            Some("http://example.com/audio.m3u8")
        );
        assert_eq!(audio_playlist("#EXTM3U\n"), None);
        // Subtitle media entries do not count.
        let subs = "#EXT-X-MEDIA:TYPE=SUBTITLES,URI=\"subs.m3u8\"\n";
        assert_eq!(audio_playlist(subs), None);
    }

    #[test]
    fn base_path_cases() {
        assert_eq!(
            base_path("http://example.com/videos/playlist.m3u8").as_deref(),
            Some("http://example.com/videos/")
        );
        assert_eq!(
            base_path("https://example.com/playlist.m3u8").as_deref(),
            Some("https://example.com/")
        );
        assert_eq!(base_path("https://example.com/videos/"), None);
        assert_eq!(
            base_path("https://cdn.example.com/streams/segment.m3u8?sig=1").as_deref(),
            Some("https://cdn.example.com/streams/")
        );
    }

    #[test]
    fn version_parses_when_present() {
        assert_eq!(manifest_version("#EXTM3U\n#EXT-X-VERSION:4\n"), Some(4));
        assert_eq!(manifest_version("#EXTM3U\n"), None);
    }
}
