use std::fmt;

/// Marker directives recognized in manifest text.
pub const STREAM_INF_TAG: &str = "#EXT-X-STREAM-INF";
pub const EXTINF_TAG: &str = "#EXTINF";
pub const KEY_TAG: &str = "#EXT-X-KEY";
pub const MEDIA_TAG: &str = "#EXT-X-MEDIA";

/// Structural tag assigned to a manifest by [`classify`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentType {
    /// Variant playlist pointing at sub-manifests.
    Master,
    /// Variant playlist that also carries an encryption-key marker.
    MasterEncrypted,
    /// Segment playlist whose URIs share a uniform extension other than
    /// `.ts`/`.m4s`.
    Segments,
    SegmentsEncrypted,
    SegmentsTs,
    SegmentsM4s,
    /// Segment playlist with mixed extensions, or no URIs at all.
    SegmentsMixed,
    Unknown,
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ContentType::Master => "Master",
            ContentType::MasterEncrypted => "Master encrypted",
            ContentType::Segments => "Segments",
            ContentType::SegmentsEncrypted => "Segments encrypted",
            ContentType::SegmentsTs => "Segments .ts",
            ContentType::SegmentsM4s => "Segments .m4s",
            ContentType::SegmentsMixed => "Segments mixed",
            ContentType::Unknown => "Unknown",
        };
        f.write_str(name)
    }
}

/// Classify manifest text. Total over all inputs: malformed or unexpected
/// text classifies as [`ContentType::Unknown`], never panics.
pub fn classify(text: &str) -> ContentType {
    if text.contains(STREAM_INF_TAG) {
        if text.contains(KEY_TAG) {
            return ContentType::MasterEncrypted;
        }
        return ContentType::Master;
    }
    if text.contains(EXTINF_TAG) {
        if text.contains(KEY_TAG) {
            return ContentType::SegmentsEncrypted;
        }
        return classify_segment_extensions(text);
    }
    ContentType::Unknown
}

/// Tag an unencrypted segment playlist by the extension its URIs share.
fn classify_segment_extensions(text: &str) -> ContentType {
    let uris = segment_uris(text);
    if uris.is_empty() {
        return ContentType::SegmentsMixed;
    }
    if uris.iter().all(|uri| uri.ends_with(".ts")) {
        return ContentType::SegmentsTs;
    }
    if uris.iter().all(|uri| uri.ends_with(".m4s")) {
        return ContentType::SegmentsM4s;
    }
    let mut extensions = uris.iter().map(|uri| extension_of(uri));
    let first = extensions.next().flatten();
    if first.is_some() && extensions.all(|ext| ext == first) {
        return ContentType::Segments;
    }
    ContentType::SegmentsMixed
}

/// URI lines that directly follow an `#EXTINF` directive.
fn segment_uris(text: &str) -> Vec<&str> {
    let mut uris = Vec::new();
    let mut lines = text.lines().peekable();
    while let Some(line) = lines.next() {
        if line.trim_start().starts_with(EXTINF_TAG) {
            if let Some(next) = lines.peek() {
                let next = next.trim();
                if !next.is_empty() && !next.starts_with('#') {
                    uris.push(next);
                }
            }
        }
    }
    uris
}

fn extension_of(uri: &str) -> Option<&str> {
    // Query strings would hide the extension from a plain suffix check.
    let path = uri.split(['?', '#']).next().unwrap_or(uri);
    let name = path.rsplit('/').next().unwrap_or(path);
    name.rsplit_once('.').map(|(_, ext)| ext)
}
