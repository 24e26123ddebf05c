// Integration tests for the content splitters
// Tests cover: lossless round trips per strategy, the piece size cap,
// binary encoding, and background-worker equivalence

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use futures_util::StreamExt;
use leafstore::{
    ChunkAlgorithm, ContentSplitter, EntryKind, FileBlob, MAX_DOC_SIZE_BIN, StoreConfig,
    assemble_pieces,
};

// ============================================================================
// Helpers
// ============================================================================

/// Deterministic pseudo-random markdown-ish text of roughly `len` bytes.
fn sample_text(len: usize, seed: u64) -> String {
    const WORDS: &[&str] = &[
        "alpha", "beta", "gamma", "delta", "sync", "chunk", "vault", "note", "état", "日本語",
        "emoji🙂", "code", "fence", "leaf",
    ];
    let mut state = seed;
    let mut next = move || {
        state = state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        (state >> 33) as usize
    };

    let mut out = String::with_capacity(len + 64);
    while out.len() < len {
        match next() % 40 {
            0 => out.push_str("\n\n"),
            1 => out.push_str("\n# Heading\n"),
            2 => out.push_str("\n```\nlet x = f(a, b);\nreturn x;\n```\n"),
            3..=6 => out.push_str(".\n"),
            _ => {
                out.push_str(WORDS[next() % WORDS.len()]);
                out.push(' ');
            }
        }
    }
    out
}

fn sample_bytes(len: usize, seed: u64) -> Vec<u8> {
    let mut state = seed;
    (0..len)
        .map(|_| {
            state = state
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            (state >> 56) as u8
        })
        .collect()
}

fn configs() -> Vec<(&'static str, StoreConfig)> {
    vec![
        (
            "v1",
            StoreConfig::default().with_chunk_splitter_version(ChunkAlgorithm::V1),
        ),
        (
            "v2",
            StoreConfig::default().with_chunk_splitter_version(ChunkAlgorithm::V2),
        ),
        (
            "v2-segmenter",
            StoreConfig::default()
                .with_chunk_splitter_version(ChunkAlgorithm::V2)
                .with_segmenter(true),
        ),
        (
            "rabin-karp",
            StoreConfig::default().with_chunk_splitter_version(ChunkAlgorithm::RabinKarp),
        ),
    ]
}

const SIZES: &[usize] = &[0, 10, 1024, 1024 * 1024, 3 * 1024 * 1024];

// ============================================================================
// Round Trips
// ============================================================================

#[test]
fn test_text_round_trip_all_strategies() {
    for (name, config) in configs() {
        let splitter = ContentSplitter::new(&config).unwrap();
        for &size in SIZES {
            let text = sample_text(size, size as u64 + 1);
            let blob = FileBlob::text("doc.md", text.clone());
            let pieces: Vec<String> = splitter.pieces(&blob).unwrap().collect();

            assert_eq!(
                pieces.concat(),
                text,
                "{name}: text of {size} bytes did not round trip"
            );
            for piece in &pieces {
                assert!(
                    piece.len() <= MAX_DOC_SIZE_BIN,
                    "{name}: piece of {} bytes exceeds the cap",
                    piece.len()
                );
            }
            if size == 0 {
                assert!(pieces.is_empty(), "{name}: empty input produced pieces");
            }
        }
    }
}

#[test]
fn test_binary_round_trip_all_strategies() {
    for (name, config) in configs() {
        let splitter = ContentSplitter::new(&config).unwrap();
        for &size in SIZES {
            let data = sample_bytes(size, size as u64 + 7);
            let blob = FileBlob::binary("image.png", data.clone());
            let pieces: Vec<String> = splitter.pieces(&blob).unwrap().collect();

            for piece in &pieces {
                assert!(piece.len() <= MAX_DOC_SIZE_BIN, "{name}: binary piece too large");
                assert!(STANDARD.decode(piece).is_ok(), "{name}: piece is not base64");
            }
            let bytes = assemble_pieces(EntryKind::Binary, &pieces).unwrap();
            assert_eq!(&bytes[..], &data[..], "{name}: {size} bytes did not round trip");
        }
    }
}

#[test]
fn test_custom_chunk_size_raises_cap() {
    let config = StoreConfig::default()
        .with_chunk_splitter_version(ChunkAlgorithm::V1)
        .with_custom_chunk_size(1);
    let splitter = ContentSplitter::new(&config).unwrap();
    let data = sample_bytes(1024 * 1024, 3);
    let pieces: Vec<String> = splitter
        .pieces(&FileBlob::binary("blob.bin", data))
        .unwrap()
        .collect();

    assert!(pieces.iter().all(|p| p.len() <= 2 * MAX_DOC_SIZE_BIN));
    assert!(
        pieces.iter().any(|p| p.len() > MAX_DOC_SIZE_BIN),
        "a doubled cap should produce larger pieces"
    );
}

// ============================================================================
// Determinism and Stability
// ============================================================================

#[test]
fn test_splitting_is_deterministic() {
    for (name, config) in configs() {
        let splitter = ContentSplitter::new(&config).unwrap();
        let blob = FileBlob::text("a.md", sample_text(200 * 1024, 11));
        let first: Vec<String> = splitter.pieces(&blob).unwrap().collect();
        let second: Vec<String> = splitter.pieces(&blob).unwrap().collect();
        assert_eq!(first, second, "{name}: output differs between runs");
    }
}

#[test]
fn test_rolling_hash_survives_prefix_insertion() {
    let config = StoreConfig::default().with_chunk_splitter_version(ChunkAlgorithm::RabinKarp);
    let splitter = ContentSplitter::new(&config).unwrap();

    let original = sample_bytes(2 * 1024 * 1024, 21);
    let mut edited = b"inserted header bytes".to_vec();
    edited.extend_from_slice(&original);

    let before: Vec<String> = splitter
        .pieces(&FileBlob::binary("a.bin", original))
        .unwrap()
        .collect();
    let after: Vec<String> = splitter
        .pieces(&FileBlob::binary("a.bin", edited))
        .unwrap()
        .collect();

    let shared = after.iter().filter(|p| before.contains(p)).count();
    assert!(
        shared * 2 >= before.len(),
        "only {shared} of {} pieces survived a small insertion",
        before.len()
    );
}

// ============================================================================
// Background Worker
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_worker_output_matches_inline() {
    for (name, config) in configs() {
        let inline = ContentSplitter::new(&config).unwrap();
        let offloaded = ContentSplitter::new(&config.clone().with_worker_threshold(1024)).unwrap();
        let blob = FileBlob::text("big.md", sample_text(512 * 1024, 5));

        let expected: Vec<String> = inline.pieces(&blob).unwrap().collect();
        let pieces = offloaded.split(&blob).unwrap();
        assert!(pieces.is_offloaded(), "{name}: large blob was not offloaded");
        let streamed: Vec<String> = pieces
            .map(|piece| piece.unwrap())
            .collect()
            .await;

        assert_eq!(streamed, expected, "{name}: worker output differs");
    }
}

#[tokio::test]
async fn test_worker_disabled_stays_inline() {
    let config = StoreConfig::default()
        .with_worker_threshold(16)
        .with_worker_disabled(true);
    let splitter = ContentSplitter::new(&config).unwrap();
    let blob = FileBlob::text("a.md", sample_text(4096, 9));

    let pieces = splitter.split(&blob).unwrap();
    assert!(!pieces.is_offloaded());
    let text: Vec<String> = pieces.map(|p| p.unwrap()).collect().await;
    assert_eq!(text.concat().len(), blob.len());
}
