#![no_main]

use libfuzzer_sys::fuzz_target;
use leafstore::{
    ChunkAlgorithm, ContentSplitter, EntryKind, FileBlob, MAX_DOC_SIZE_BIN, StoreConfig,
    assemble_pieces,
};

fuzz_target!(|data: Vec<u8>| {
    let configs = [
        StoreConfig::default().with_chunk_splitter_version(ChunkAlgorithm::V1),
        StoreConfig::default().with_chunk_splitter_version(ChunkAlgorithm::V2),
        StoreConfig::default().with_segmenter(true),
        StoreConfig::default().with_chunk_splitter_version(ChunkAlgorithm::RabinKarp),
        // Tiny minimum exercises the short-piece paths
        StoreConfig::default()
            .with_chunk_splitter_version(ChunkAlgorithm::RabinKarp)
            .with_minimum_chunk_size(1),
    ];

    for config in configs {
        let splitter = ContentSplitter::new(&config).unwrap();

        // Binary: every input is valid
        let blob = FileBlob::binary("fuzz.json", data.clone());
        let pieces: Vec<String> = splitter.pieces(&blob).unwrap().collect();
        for piece in &pieces {
            assert!(!piece.is_empty());
            assert!(piece.len() <= MAX_DOC_SIZE_BIN);
        }
        let bytes = assemble_pieces(EntryKind::Binary, &pieces).unwrap();
        assert_eq!(&bytes[..], &data[..]);

        // Text: only when the input is UTF-8
        if let Ok(text) = std::str::from_utf8(&data) {
            let blob = FileBlob::text("fuzz.md", text);
            let pieces: Vec<String> = splitter.pieces(&blob).unwrap().collect();
            for piece in &pieces {
                assert!(piece.len() <= MAX_DOC_SIZE_BIN);
            }
            assert_eq!(pieces.concat(), text);
        }
    }
});
