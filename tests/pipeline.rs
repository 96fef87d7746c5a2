use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use hlsget::acquire::AcquisitionSession;
use hlsget::classify::{classify, ContentType};
use hlsget::config::FetchConfig;
use hlsget::error::{Error, Result};
use hlsget::extract::SegmentEntry;
use hlsget::ffmpeg::{TrackPresence, TrackProbe};
use hlsget::keys::{self, ResolvedKey};
use hlsget::playlist::Playlist;

/// One-shot HTTP responder: serves `body` with a 200 to every request and
/// counts how many requests arrived.
async fn serve_bytes(body: Vec<u8>) -> (String, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();
    tokio::spawn(async move {
        loop {
            let Ok((mut sock, _)) = listener.accept().await else {
                break;
            };
            counter.fetch_add(1, Ordering::SeqCst);
            let body = body.clone();
            tokio::spawn(async move {
                let mut buf = [0u8; 4096];
                let _ = sock.read(&mut buf).await;
                let head = format!(
                    "HTTP/1.1 200 OK\r\ncontent-length: {}\r\nconnection: close\r\n\r\n",
                    body.len()
                );
                let _ = sock.write_all(head.as_bytes()).await;
                let _ = sock.write_all(&body).await;
                let _ = sock.shutdown().await;
            });
        }
    });
    (format!("http://{addr}/"), hits)
}

/// A URL nothing listens on: bind, note the port, drop the listener.
async fn refused_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}/seg2.ts")
}

struct FixedProbe(TrackPresence);

impl TrackProbe for FixedProbe {
    async fn probe(&self, _path: &Path) -> Result<TrackPresence> {
        Ok(self.0)
    }
}

fn both_tracks() -> FixedProbe {
    FixedProbe(TrackPresence {
        has_audio: true,
        has_video: true,
    })
}

#[test]
fn classification_scenarios_end_to_end() {
    let master = "#EXTM3U\n\
        #EXT-X-STREAM-INF:BANDWIDTH=500000,RESOLUTION=640x360\n\
        http://example.com/360p.m3u8\n\
        #EXT-X-STREAM-INF:BANDWIDTH=3000000,RESOLUTION=1920x1080\n\
        http://example.com/1080p.m3u8\n";
    assert_eq!(classify(master), ContentType::Master);

    let segments = "#EXTM3U\n\
        #EXTINF:10,\n\
        http://example.com/seg1.ts\n\
        #EXTINF:10,\n\
        http://example.com/seg2.ts\n";
    assert_eq!(classify(segments), ContentType::SegmentsTs);

    let encrypted = format!(
        "#EXTM3U\n#EXT-X-KEY:METHOD=AES-128,URI=\"key.bin\"\n{}",
        &segments["#EXTM3U\n".len()..]
    );
    assert_eq!(classify(&encrypted), ContentType::SegmentsEncrypted);
}

#[tokio::test]
async fn key_resolution_fetches_once_and_passes_iv_through() {
    let (base, hits) = serve_bytes(vec![0x11; 16]).await;
    let manifest = "#EXTM3U\n\
        #EXT-X-KEY:METHOD=AES-128,URI=\"key.bin\",IV=0x00112233445566778899aabbccddeeff\n\
        #EXTINF:10,\n\
        seg1.ts\n";
    let spec = keys::parse_key_spec(manifest).unwrap();
    let client = reqwest::Client::new();

    let key = keys::resolve(&client, &spec, Some(&base)).await.unwrap();
    assert_eq!(key.key_hex, "11".repeat(16));
    assert_eq!(
        key.iv_hex.as_deref(),
        Some("00112233445566778899aabbccddeeff")
    );
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn playlist_facade_snapshots_a_fetched_manifest() {
    let manifest = "#EXTM3U\n\
        #EXT-X-VERSION:3\n\
        #EXTINF:10,\n\
        seg1.ts\n\
        #EXTINF:10,\n\
        seg2.ts\n";
    let (base, hits) = serve_bytes(manifest.as_bytes().to_vec()).await;
    let url = format!("{base}playlist.m3u8");

    let playlist = Playlist::fetch(&url, &FetchConfig::default()).await.unwrap();
    assert_eq!(playlist.segment_count(), 2);
    assert_eq!(playlist.version(), Some(3));
    assert_eq!(playlist.content_type(), ContentType::SegmentsTs);
    assert_eq!(playlist.uris()[0].ordinal, 1);
    assert_eq!(playlist.uris()[1].uri, "seg2.ts");
    // Unknown resolutions answer with the not-found sentinel, not an error.
    assert_eq!(playlist.resolution_url("640x360".parse().unwrap()), None);

    // The encryption check is a second, on-demand fetch.
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert!(!playlist.is_encrypted().await.unwrap());
    assert_eq!(hits.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn facade_rejects_non_http_input() {
    let err = Playlist::fetch("file:///tmp/playlist.m3u8", &FetchConfig::default())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InputValidation(_)));
}

#[tokio::test]
async fn acquisition_decrypts_and_names_segments_by_ordinal() {
    let key = *b"0123456789abcdef";
    let iv = *b"fedcba9876543210";
    let plain = b"one segment of media payload".to_vec();
    let ciphertext = encrypt_fixture(&plain, &key, &iv);
    let (base, _hits) = serve_bytes(ciphertext).await;

    let resolved = ResolvedKey {
        key_hex: hex::encode(key),
        iv_hex: Some(hex::encode(iv)),
    };
    let segments = vec![
        SegmentEntry {
            ordinal: 1,
            uri: format!("{base}seg1.ts"),
        },
        SegmentEntry {
            ordinal: 2,
            uri: format!("{base}seg2.ts"),
        },
    ];
    let client = Arc::new(reqwest::Client::new());
    let mut session = AcquisitionSession::new(
        client,
        None,
        segments,
        Some(&resolved),
        ".ts",
        CancellationToken::new(),
    )
    .unwrap();

    session.acquire_all(&both_tracks()).await.unwrap();
    assert!(session.report().complete());

    let first = tokio::fs::read(session.scratch_path().join("seg_1.ts"))
        .await
        .unwrap();
    assert_eq!(first, plain);
    assert!(session.scratch_path().join("seg_2.ts").exists());

    let scratch = session.scratch_path().to_path_buf();
    session.cleanup();
    assert!(!scratch.exists());
}

#[tokio::test]
async fn failed_session_still_removes_its_scratch_directory() {
    let (base, _hits) = serve_bytes(b"segment-bytes".to_vec()).await;
    let segments = vec![
        SegmentEntry {
            ordinal: 1,
            uri: format!("{base}seg1.ts"),
        },
        SegmentEntry {
            ordinal: 2,
            uri: refused_url().await,
        },
    ];
    let client = Arc::new(reqwest::Client::new());
    let mut session = AcquisitionSession::new(
        client,
        None,
        segments,
        None,
        ".ts",
        CancellationToken::new(),
    )
    .unwrap();
    let scratch = session.scratch_path().to_path_buf();

    let err = session.acquire_all(&both_tracks()).await.unwrap_err();
    assert!(matches!(err, Error::Network { .. }));
    // The first segment landed before the failure.
    assert!(scratch.join("seg_1.ts").exists());

    session.cleanup();
    assert!(!scratch.exists());
}

#[tokio::test]
async fn cancelled_session_reports_cancellation() {
    let (base, _hits) = serve_bytes(b"segment-bytes".to_vec()).await;
    let segments = vec![SegmentEntry {
        ordinal: 1,
        uri: format!("{base}seg1.ts"),
    }];
    let client = Arc::new(reqwest::Client::new());
    let cancel = CancellationToken::new();
    cancel.cancel();
    let mut session =
        AcquisitionSession::new(client, None, segments, None, ".ts", cancel).unwrap();
    let scratch = session.scratch_path().to_path_buf();

    let err = session.acquire_all(&both_tracks()).await.unwrap_err();
    assert!(matches!(err, Error::Cancelled));

    session.cleanup();
    assert!(!scratch.exists());
}

/// AES-128-CBC + PKCS#7 encryption for fixtures, mirroring what a packager
/// would apply to a segment.
fn encrypt_fixture(plain: &[u8], key: &[u8; 16], iv: &[u8; 16]) -> Vec<u8> {
    use aes::cipher::block_padding::Pkcs7;
    use aes::cipher::{BlockEncryptMut, KeyIvInit};
    type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;

    let mut buf = vec![0u8; plain.len() + 16];
    buf[..plain.len()].copy_from_slice(plain);
    let written = Aes128CbcEnc::new(key.into(), iv.into())
        .encrypt_padded_mut::<Pkcs7>(&mut buf, plain.len())
        .unwrap()
        .len();
    buf.truncate(written);
    buf
}
