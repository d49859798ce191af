use bm25_core::persist::{self, MANIFEST_KEY};
use bm25_core::{
    Bm25Params, Error, FsBackend, IndexBuilder, SearchEngine, SledBackend, StorageBackend, Tokenizer, TokenizerConfig,
};
use tempfile::tempdir;

const CORPUS: [&str; 5] = [
    "rust is a systems programming language",
    "python is a scripting language",
    "the borrow checker keeps rust programs memory safe",
    "sled is an embedded database written in rust",
    "bm25 ranks documents by term frequency and rarity",
];

const QUERIES: [&str; 4] = ["rust language", "memory safe database", "python", "ranking documents by rarity"];

fn engine() -> SearchEngine {
    let tokenizer = Tokenizer::new(TokenizerConfig { stemmer: Some("english".into()), ..Default::default() }).unwrap();
    let builder = IndexBuilder::new(Bm25Params::new(1.2, 0.75).unwrap()).unwrap().shards(2);
    SearchEngine::build(&CORPUS, tokenizer, &builder, true).unwrap()
}

fn assert_same_rankings(a: &SearchEngine, b: &SearchEngine) {
    for q in QUERIES {
        assert_eq!(a.search(q, 10), b.search(q, 10), "query {q:?}");
    }
}

#[test]
fn directory_round_trip_with_and_without_corpus() {
    let original = engine();
    for include_corpus in [true, false] {
        let dir = tempdir().unwrap();
        let backend = FsBackend::new(dir.path());
        original.save(&backend, include_corpus).unwrap();
        assert_eq!(dir.path().join("corpus.bin").exists(), include_corpus);

        let loaded = SearchEngine::load(&backend, true).unwrap();
        assert_eq!(loaded.index().vocabulary(), original.index().vocabulary());
        assert_eq!(loaded.index().postings(), original.index().postings());
        assert_eq!(loaded.index().stats(), original.index().stats());
        assert_eq!(loaded.index().params(), original.index().params());
        assert_eq!(loaded.index().corpus().is_some(), include_corpus);
        assert_same_rankings(&original, &loaded);
    }
}

#[test]
fn no_temp_files_are_left_behind() {
    let dir = tempdir().unwrap();
    engine().save(&FsBackend::new(dir.path()), true).unwrap();
    let leftovers: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
        .collect();
    assert!(leftovers.is_empty());
}

#[test]
fn sled_round_trip() {
    let dir = tempdir().unwrap();
    let original = engine();
    let backend = SledBackend::open(dir.path().join("index.sled")).unwrap();
    original.save(&backend, true).unwrap();
    let loaded = SearchEngine::load(&backend, false).unwrap();
    assert!(loaded.index().corpus().is_none());
    assert_same_rankings(&original, &loaded);
}

#[test]
fn empty_directory_is_corrupt() {
    let dir = tempdir().unwrap();
    let err = persist::load_from_dir(dir.path(), false).unwrap_err();
    assert!(matches!(err, Error::CorruptIndex { ref component, .. } if component == MANIFEST_KEY));
}

#[test]
fn garbage_manifest_is_corrupt() {
    let dir = tempdir().unwrap();
    let backend = FsBackend::new(dir.path());
    engine().save(&backend, false).unwrap();
    backend.put(MANIFEST_KEY, b"{ not json").unwrap();
    assert!(matches!(SearchEngine::load(&backend, false), Err(Error::CorruptIndex { .. })));
}

#[test]
fn unreadable_storage_is_a_storage_failure() {
    let dir = tempdir().unwrap();
    // a directory where the manifest file should be
    std::fs::create_dir_all(dir.path().join(MANIFEST_KEY)).unwrap();
    let err = persist::load_from_dir(dir.path(), false).unwrap_err();
    assert!(matches!(err, Error::StorageFailure { .. }), "{err:?}");
}
