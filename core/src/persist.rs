//! Index artifacts: a JSON manifest plus bincode-encoded sections, stored
//! under fixed keys of a [`StorageBackend`].
//!
//! Sections are written before the manifest, so a save that dies halfway
//! leaves nothing loadable behind.

use crate::config::{FORMAT_NAME, FORMAT_VERSION};
use crate::index::{CorpusStats, Index, ParamsSource, Postings};
use crate::params::Bm25Params;
use crate::tokenizer::TokenizerConfig;
use crate::vocab::Vocabulary;
use crate::{DocId, Error, Result};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

pub const MANIFEST_KEY: &str = "manifest.json";
pub const VOCAB_KEY: &str = "vocab.bin";
pub const POSTINGS_KEY: &str = "postings.bin";
pub const DOC_LENGTHS_KEY: &str = "doc_lengths.bin";
pub const CORPUS_KEY: &str = "corpus.bin";

/// Key-value store holding one index artifact.
pub trait StorageBackend: Send + Sync {
    fn put(&self, key: &str, bytes: &[u8]) -> Result<()>;

    /// `Ok(None)` when the key does not exist.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Removing a missing key is not an error.
    fn remove(&self, key: &str) -> Result<()>;

    /// Make previous writes durable.
    fn flush(&self) -> Result<()> { Ok(()) }
}

/// One file per key under a root directory.
#[derive(Debug, Clone)]
pub struct FsBackend {
    root: PathBuf,
}

impl FsBackend {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self { root: root.as_ref().to_path_buf() }
    }

    pub fn root(&self) -> &Path { &self.root }

    fn path(&self, key: &str) -> PathBuf { self.root.join(key) }
}

impl StorageBackend for FsBackend {
    fn put(&self, key: &str, bytes: &[u8]) -> Result<()> {
        fs::create_dir_all(&self.root).map_err(|e| Error::storage(key, e))?;
        let path = self.path(key);
        let tmp = self.path(&format!("{key}.tmp"));
        fs::write(&tmp, bytes).map_err(|e| Error::storage(key, e))?;
        fs::rename(&tmp, &path).map_err(|e| Error::storage(key, e))?;
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        match fs::read(self.path(key)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::storage(key, e)),
        }
    }

    fn remove(&self, key: &str) -> Result<()> {
        match fs::remove_file(self.path(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::storage(key, e)),
        }
    }
}

/// Artifact stored in a sled database, one entry per key.
#[derive(Debug, Clone)]
pub struct SledBackend {
    db: sled::Db,
}

fn sled_err(key: &str, e: sled::Error) -> Error {
    Error::storage(key, io::Error::other(e.to_string()))
}

impl SledBackend {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let db = sled::open(path).map_err(|e| sled_err(&path.display().to_string(), e))?;
        Ok(Self { db })
    }

    pub fn from_db(db: sled::Db) -> Self { Self { db } }
}

impl StorageBackend for SledBackend {
    fn put(&self, key: &str, bytes: &[u8]) -> Result<()> {
        self.db.insert(key, bytes).map_err(|e| sled_err(key, e))?;
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let value = self.db.get(key).map_err(|e| sled_err(key, e))?;
        Ok(value.map(|v| v.to_vec()))
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.db.remove(key).map_err(|e| sled_err(key, e))?;
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        self.db.flush().map_err(|e| sled_err("flush", e))?;
        Ok(())
    }
}

/// In-process artifact store.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryBackend {
    pub fn new() -> Self { Self::default() }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.read().keys().cloned().collect();
        keys.sort();
        keys
    }
}

impl StorageBackend for MemoryBackend {
    fn put(&self, key: &str, bytes: &[u8]) -> Result<()> {
        self.entries.write().insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.entries.write().remove(key);
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub format: String,
    pub version: u32,
    pub created_at: String,
    pub num_docs: u32,
    pub num_terms: u64,
    pub num_postings: u64,
    pub total_doc_len: u64,
    pub avg_doc_len: f32,
    /// Absent params load as defaults and are flagged as such.
    #[serde(default)]
    pub params: Option<Bm25Params>,
    #[serde(default)]
    pub tokenizer: Option<TokenizerConfig>,
    /// Byte length of every section written.
    pub sections: BTreeMap<String, u64>,
    pub has_corpus: bool,
}

#[derive(Serialize)]
struct PostingsRef<'a> {
    offsets: &'a [u64],
    doc_ids: &'a [DocId],
    freqs: &'a [u32],
}

#[derive(Deserialize)]
struct PostingsArrays {
    offsets: Vec<u64>,
    doc_ids: Vec<DocId>,
    freqs: Vec<u32>,
}

fn encode<T: Serialize + ?Sized>(key: &str, value: &T) -> Result<Vec<u8>> {
    bincode::serialize(value).map_err(|e| Error::storage(key, io::Error::other(e.to_string())))
}

fn decode<T: DeserializeOwned>(key: &str, bytes: &[u8]) -> Result<T> {
    bincode::deserialize(bytes).map_err(|e| Error::corrupt(key, format!("undecodable: {e}")))
}

fn put_section(backend: &dyn StorageBackend, sections: &mut BTreeMap<String, u64>, key: &str, bytes: Vec<u8>) -> Result<()> {
    backend.put(key, &bytes)?;
    sections.insert(key.to_string(), bytes.len() as u64);
    Ok(())
}

fn read_section(backend: &dyn StorageBackend, manifest: &Manifest, key: &str) -> Result<Vec<u8>> {
    let expected = *manifest
        .sections
        .get(key)
        .ok_or_else(|| Error::corrupt(key, "section not listed in manifest"))?;
    let bytes = backend.get(key)?.ok_or_else(|| Error::corrupt(key, "section missing"))?;
    if bytes.len() as u64 != expected {
        return Err(Error::corrupt(key, format!("expected {expected} bytes, found {}", bytes.len())));
    }
    Ok(bytes)
}

pub fn save(index: &Index, backend: &dyn StorageBackend, include_corpus: bool) -> Result<Manifest> {
    save_with_tokenizer(index, backend, include_corpus, None)
}

/// Like [`save`], also recording the tokenizer needed to query the index.
pub fn save_with_tokenizer(
    index: &Index,
    backend: &dyn StorageBackend,
    include_corpus: bool,
    tokenizer: Option<&TokenizerConfig>,
) -> Result<Manifest> {
    let corpus = match (include_corpus, index.corpus()) {
        (true, None) => return Err(Error::InvalidState("include_corpus requested but the index holds no corpus".into())),
        (true, Some(c)) => Some(c),
        (false, _) => None,
    };

    // Invalidate any previous artifact before touching its sections.
    backend.remove(MANIFEST_KEY)?;

    let mut sections = BTreeMap::new();
    put_section(backend, &mut sections, VOCAB_KEY, encode(VOCAB_KEY, index.vocabulary().terms())?)?;
    let postings = index.postings();
    let arrays = PostingsRef { offsets: postings.offsets(), doc_ids: postings.doc_ids(), freqs: postings.freqs() };
    put_section(backend, &mut sections, POSTINGS_KEY, encode(POSTINGS_KEY, &arrays)?)?;
    put_section(backend, &mut sections, DOC_LENGTHS_KEY, encode(DOC_LENGTHS_KEY, index.doc_lengths())?)?;
    match corpus {
        Some(texts) => put_section(backend, &mut sections, CORPUS_KEY, encode(CORPUS_KEY, texts)?)?,
        None => backend.remove(CORPUS_KEY)?,
    }

    let stats = index.stats();
    let manifest = Manifest {
        format: FORMAT_NAME.to_string(),
        version: FORMAT_VERSION,
        created_at: time::OffsetDateTime::now_utc()
            .format(&time::format_description::well_known::Rfc3339)
            .unwrap_or_else(|_| "".into()),
        num_docs: stats.num_docs,
        num_terms: index.vocabulary().len() as u64,
        num_postings: postings.len() as u64,
        total_doc_len: stats.total_doc_len,
        avg_doc_len: stats.avg_doc_len,
        params: Some(index.params()),
        tokenizer: tokenizer.cloned(),
        sections,
        has_corpus: corpus.is_some(),
    };
    let json = serde_json::to_vec_pretty(&manifest).map_err(|e| Error::storage(MANIFEST_KEY, io::Error::other(e)))?;
    backend.put(MANIFEST_KEY, &json)?;
    backend.flush()?;

    tracing::info!(
        num_docs = manifest.num_docs,
        num_terms = manifest.num_terms,
        has_corpus = manifest.has_corpus,
        "index saved"
    );
    Ok(manifest)
}

pub fn read_manifest(backend: &dyn StorageBackend) -> Result<Manifest> {
    let bytes = backend.get(MANIFEST_KEY)?.ok_or_else(|| Error::corrupt(MANIFEST_KEY, "manifest missing"))?;
    let manifest: Manifest =
        serde_json::from_slice(&bytes).map_err(|e| Error::corrupt(MANIFEST_KEY, e.to_string()))?;
    if manifest.format != FORMAT_NAME {
        return Err(Error::corrupt(MANIFEST_KEY, format!("unknown format '{}'", manifest.format)));
    }
    if manifest.version != FORMAT_VERSION {
        return Err(Error::corrupt(
            MANIFEST_KEY,
            format!("unsupported version {} (expected {FORMAT_VERSION})", manifest.version),
        ));
    }
    Ok(manifest)
}

pub fn load(backend: &dyn StorageBackend, load_corpus: bool) -> Result<Index> {
    load_with_manifest(backend, load_corpus).map(|(index, _)| index)
}

pub fn load_with_manifest(backend: &dyn StorageBackend, load_corpus: bool) -> Result<(Index, Manifest)> {
    let manifest = read_manifest(backend)?;
    if manifest.num_docs == 0 {
        return Err(Error::corrupt(MANIFEST_KEY, "index has no documents"));
    }

    let terms: Vec<String> = decode(VOCAB_KEY, &read_section(backend, &manifest, VOCAB_KEY)?)?;
    if terms.len() as u64 != manifest.num_terms {
        return Err(Error::corrupt(VOCAB_KEY, format!("{} terms, manifest says {}", terms.len(), manifest.num_terms)));
    }
    let vocabulary = Vocabulary::from_terms(terms)?;
    if vocabulary.is_empty() {
        return Err(Error::corrupt(VOCAB_KEY, "vocabulary is empty"));
    }

    let arrays: PostingsArrays = decode(POSTINGS_KEY, &read_section(backend, &manifest, POSTINGS_KEY)?)?;
    if arrays.doc_ids.len() as u64 != manifest.num_postings {
        return Err(Error::corrupt(
            POSTINGS_KEY,
            format!("{} postings, manifest says {}", arrays.doc_ids.len(), manifest.num_postings),
        ));
    }
    let postings =
        Postings::from_parts(arrays.offsets, arrays.doc_ids, arrays.freqs, vocabulary.len(), manifest.num_docs)?;

    let doc_lengths: Vec<u32> = decode(DOC_LENGTHS_KEY, &read_section(backend, &manifest, DOC_LENGTHS_KEY)?)?;

    let (params, source) = match manifest.params {
        Some(p) => (p, ParamsSource::Stored),
        None => {
            tracing::warn!("index manifest carries no BM25 parameters, using defaults");
            (Bm25Params::default(), ParamsSource::Defaulted)
        }
    };
    let stats = CorpusStats {
        num_docs: manifest.num_docs,
        total_doc_len: manifest.total_doc_len,
        avg_doc_len: manifest.avg_doc_len,
    };
    let mut index = Index::assemble(vocabulary, postings, doc_lengths, stats, params, source)?;

    if load_corpus && manifest.has_corpus {
        let corpus: Vec<String> = decode(CORPUS_KEY, &read_section(backend, &manifest, CORPUS_KEY)?)?;
        index = index.with_corpus(corpus).map_err(|e| Error::corrupt(CORPUS_KEY, e.to_string()))?;
    }

    tracing::info!(
        num_docs = index.num_docs(),
        num_terms = index.vocabulary().len(),
        corpus = index.corpus().is_some(),
        "index loaded"
    );
    Ok((index, manifest))
}

pub fn save_to_dir<P: AsRef<Path>>(index: &Index, dir: P, include_corpus: bool) -> Result<Manifest> {
    save(index, &FsBackend::new(dir), include_corpus)
}

pub fn load_from_dir<P: AsRef<Path>>(dir: P, load_corpus: bool) -> Result<Index> {
    load(&FsBackend::new(dir), load_corpus)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{IndexBuilder, TokenizedCorpus};
    use crate::retriever::retrieve;

    fn index() -> Index {
        let corpus = TokenizedCorpus::from_token_lists(&[
            vec!["cat", "felin", "like", "purr"],
            vec!["dog", "play", "play"],
            vec!["fish", "water", "swim", "cat"],
        ]);
        IndexBuilder::new(Bm25Params::new(1.2, 0.6).unwrap())
            .unwrap()
            .build(corpus)
            .unwrap()
            .with_corpus(vec!["cat text".into(), "dog text".into(), "fish text".into()])
            .unwrap()
    }

    fn edit_manifest(backend: &MemoryBackend, f: impl FnOnce(&mut serde_json::Value)) {
        let mut json: serde_json::Value = serde_json::from_slice(&backend.get(MANIFEST_KEY).unwrap().unwrap()).unwrap();
        f(&mut json);
        backend.put(MANIFEST_KEY, &serde_json::to_vec(&json).unwrap()).unwrap();
    }

    #[test]
    fn memory_round_trip() {
        let original = index();
        let backend = MemoryBackend::new();
        save(&original, &backend, true).unwrap();
        assert_eq!(backend.keys(), vec![CORPUS_KEY, DOC_LENGTHS_KEY, MANIFEST_KEY, POSTINGS_KEY, VOCAB_KEY]);

        let loaded = load(&backend, true).unwrap();
        assert_eq!(loaded, original);
        assert_eq!(loaded.params_source(), ParamsSource::Stored);

        let without = load(&backend, false).unwrap();
        assert!(without.corpus().is_none());
        let cat = without.vocabulary().id("cat").unwrap();
        assert_eq!(retrieve(&without, &[cat], 3), retrieve(&original, &[cat], 3));
    }

    #[test]
    fn corpus_is_optional() {
        let backend = MemoryBackend::new();
        save(&index(), &backend, true).unwrap();
        save(&index(), &backend, false).unwrap();
        assert!(backend.get(CORPUS_KEY).unwrap().is_none());
        assert!(load(&backend, true).unwrap().corpus().is_none());

        let bare = index().without_corpus();
        assert!(matches!(save(&bare, &backend, true), Err(Error::InvalidState(_))));
    }

    #[test]
    fn corpus_section_is_not_read_unless_requested() {
        let backend = MemoryBackend::new();
        save(&index(), &backend, true).unwrap();
        backend.put(CORPUS_KEY, b"garbage").unwrap();
        assert!(load(&backend, false).is_ok());
        let err = load(&backend, true).unwrap_err();
        assert!(matches!(err, Error::CorruptIndex { ref component, .. } if component == CORPUS_KEY));
    }

    #[test]
    fn missing_section_names_the_component() {
        let backend = MemoryBackend::new();
        save(&index(), &backend, false).unwrap();
        backend.remove(POSTINGS_KEY).unwrap();
        let err = load(&backend, false).unwrap_err();
        assert!(matches!(err, Error::CorruptIndex { ref component, .. } if component == POSTINGS_KEY));
    }

    #[test]
    fn truncated_section_is_corrupt() {
        let backend = MemoryBackend::new();
        save(&index(), &backend, false).unwrap();
        let mut bytes = backend.get(DOC_LENGTHS_KEY).unwrap().unwrap();
        bytes.pop();
        backend.put(DOC_LENGTHS_KEY, &bytes).unwrap();
        let err = load(&backend, false).unwrap_err();
        assert!(matches!(err, Error::CorruptIndex { ref component, .. } if component == DOC_LENGTHS_KEY));
    }

    #[test]
    fn missing_manifest_is_corrupt() {
        let backend = MemoryBackend::new();
        let err = load(&backend, false).unwrap_err();
        assert!(matches!(err, Error::CorruptIndex { ref component, .. } if component == MANIFEST_KEY));
    }

    #[test]
    fn missing_numeric_field_is_corrupt() {
        let backend = MemoryBackend::new();
        save(&index(), &backend, false).unwrap();
        edit_manifest(&backend, |m| {
            m.as_object_mut().unwrap().remove("num_docs");
        });
        let err = load(&backend, false).unwrap_err();
        match err {
            Error::CorruptIndex { component, reason } => {
                assert_eq!(component, MANIFEST_KEY);
                assert!(reason.contains("num_docs"), "{reason}");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn wrong_statistics_are_corrupt() {
        let backend = MemoryBackend::new();
        save(&index(), &backend, false).unwrap();
        edit_manifest(&backend, |m| m["total_doc_len"] = serde_json::json!(999));
        assert!(matches!(load(&backend, false), Err(Error::CorruptIndex { .. })));
    }

    #[test]
    fn unsupported_version_is_corrupt() {
        let backend = MemoryBackend::new();
        save(&index(), &backend, false).unwrap();
        edit_manifest(&backend, |m| m["version"] = serde_json::json!(FORMAT_VERSION + 1));
        assert!(matches!(load(&backend, false), Err(Error::CorruptIndex { .. })));
    }

    #[test]
    fn absent_params_fall_back_and_are_flagged() {
        let backend = MemoryBackend::new();
        save(&index(), &backend, false).unwrap();
        edit_manifest(&backend, |m| {
            m.as_object_mut().unwrap().remove("params");
        });
        let loaded = load(&backend, false).unwrap();
        assert_eq!(loaded.params(), Bm25Params::default());
        assert_eq!(loaded.params_source(), ParamsSource::Defaulted);
    }

    #[test]
    fn invalid_stored_params_are_corrupt() {
        let backend = MemoryBackend::new();
        save(&index(), &backend, false).unwrap();
        edit_manifest(&backend, |m| m["params"]["b"] = serde_json::json!(3.0));
        assert!(matches!(load(&backend, false), Err(Error::CorruptIndex { .. })));
    }

    #[test]
    fn doc_lengths_must_match_postings() {
        let backend = MemoryBackend::new();
        save(&index(), &backend, false).unwrap();
        // Same length and same total as [4, 3, 4], but wrong per document.
        backend.put(DOC_LENGTHS_KEY, &encode(DOC_LENGTHS_KEY, &vec![1u32, 5, 5]).unwrap()).unwrap();
        match load(&backend, false).unwrap_err() {
            Error::CorruptIndex { component, reason } => {
                assert_eq!(component, "doc_lengths");
                assert!(reason.contains("doc 0"), "{reason}");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn zero_document_artifact_is_corrupt() {
        let backend = MemoryBackend::new();
        save(&index(), &backend, false).unwrap();
        edit_manifest(&backend, |m| m["num_docs"] = serde_json::json!(0));
        let err = load(&backend, false).unwrap_err();
        assert!(matches!(err, Error::CorruptIndex { ref component, .. } if component == MANIFEST_KEY));

        let backend = MemoryBackend::new();
        save(&index(), &backend, false).unwrap();
        let empty = encode(VOCAB_KEY, &Vec::<String>::new()).unwrap();
        backend.put(VOCAB_KEY, &empty).unwrap();
        edit_manifest(&backend, |m| {
            m["num_terms"] = serde_json::json!(0);
            m["sections"][VOCAB_KEY] = serde_json::json!(empty.len());
        });
        let err = load(&backend, false).unwrap_err();
        assert!(matches!(err, Error::CorruptIndex { ref component, .. } if component == VOCAB_KEY));
    }
}
