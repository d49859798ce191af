use crate::cancel::CancellationToken;
use crate::index::{Index, IndexBuilder};
use crate::persist::{self, Manifest, StorageBackend};
use crate::retriever::{retrieve_batch, retrieve_with, Hit, Results, Retrieval};
use crate::tokenizer::Tokenizer;
use crate::{DocId, Result, TermId};
use parking_lot::RwLock;
use std::sync::Arc;

/// A tokenizer paired with the index it built, so raw text can be queried.
#[derive(Debug)]
pub struct SearchEngine {
    tokenizer: Tokenizer,
    index: Index,
}

impl SearchEngine {
    pub fn new(tokenizer: Tokenizer, index: Index) -> Self { Self { tokenizer, index } }

    /// Tokenize `texts`, build the index and optionally keep the raw texts.
    pub fn build<S: AsRef<str>>(texts: &[S], tokenizer: Tokenizer, builder: &IndexBuilder, keep_corpus: bool) -> Result<Self> {
        let mut index = builder.build_from_texts(texts, &tokenizer)?;
        if keep_corpus {
            index = index.with_corpus(texts.iter().map(|t| t.as_ref().to_string()).collect())?;
        }
        Ok(Self { tokenizer, index })
    }

    pub fn index(&self) -> &Index { &self.index }

    pub fn tokenizer(&self) -> &Tokenizer { &self.tokenizer }

    pub fn query_terms(&self, query: &str) -> Vec<TermId> {
        self.tokenizer.tokenize_query(query, self.index.vocabulary())
    }

    pub fn search(&self, query: &str, k: usize) -> Vec<Hit> {
        crate::retriever::retrieve(&self.index, &self.query_terms(query), k)
    }

    pub fn search_with(&self, query: &str, k: usize, cancel: &CancellationToken) -> Result<Retrieval> {
        retrieve_with(&self.index, &self.query_terms(query), k, cancel)
    }

    pub fn search_batch<S: AsRef<str>>(&self, queries: &[S], k: usize) -> Results {
        let ids = self.tokenizer.tokenize_queries(queries, self.index.vocabulary());
        retrieve_batch(&self.index, &ids, k)
    }

    pub fn document(&self, doc: DocId) -> Option<&str> { self.index.document(doc) }

    pub fn save(&self, backend: &dyn StorageBackend, include_corpus: bool) -> Result<Manifest> {
        persist::save_with_tokenizer(&self.index, backend, include_corpus, self.tokenizer.persistable_config().as_ref())
    }

    /// Load an index and rebuild the tokenizer recorded next to it.
    pub fn load(backend: &dyn StorageBackend, load_corpus: bool) -> Result<Self> {
        let (index, manifest) = persist::load_with_manifest(backend, load_corpus)?;
        let tokenizer = match manifest.tokenizer {
            Some(config) => Tokenizer::new(config)?,
            None => {
                tracing::warn!("index carries no tokenizer config, queries use the default tokenizer");
                Tokenizer::default()
            }
        };
        Ok(Self { tokenizer, index })
    }
}

/// The engine currently being served. Readers take a cheap `Arc` snapshot;
/// a rebuilt or reloaded engine replaces it wholesale.
#[derive(Debug)]
pub struct SharedEngine {
    current: RwLock<Arc<SearchEngine>>,
}

impl SharedEngine {
    pub fn new(engine: SearchEngine) -> Self {
        Self { current: RwLock::new(Arc::new(engine)) }
    }

    pub fn current(&self) -> Arc<SearchEngine> { self.current.read().clone() }

    /// Swap in `engine`, returning the one it replaced.
    pub fn replace(&self, engine: SearchEngine) -> Arc<SearchEngine> {
        std::mem::replace(&mut *self.current.write(), Arc::new(engine))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::Bm25Params;
    use crate::persist::MemoryBackend;
    use crate::tokenizer::{FnStemmer, TokenizerConfig};

    fn builder() -> IndexBuilder { IndexBuilder::new(Bm25Params::default()).unwrap() }

    #[test]
    fn stemming_config_survives_reload() {
        let tokenizer = Tokenizer::new(TokenizerConfig { stemmer: Some("english".into()), ..Default::default() }).unwrap();
        let engine = SearchEngine::build(&["running dogs", "sleeping cats"], tokenizer, &builder(), false).unwrap();
        let backend = MemoryBackend::new();
        engine.save(&backend, false).unwrap();

        let loaded = SearchEngine::load(&backend, false).unwrap();
        assert_eq!(loaded.tokenizer().config().stemmer.as_deref(), Some("english"));
        assert_eq!(loaded.search("run", 5), engine.search("run", 5));
        assert_eq!(loaded.search("run", 5)[0].doc_id, 0);
    }

    #[test]
    fn custom_stemmer_falls_back_to_default_tokenizer() {
        let tokenizer = Tokenizer::default().with_stemmer(Arc::new(FnStemmer(|s: &str| s.to_uppercase())));
        let engine = SearchEngine::build(&["rust code"], tokenizer, &builder(), false).unwrap();
        let backend = MemoryBackend::new();
        engine.save(&backend, false).unwrap();
        let loaded = SearchEngine::load(&backend, false).unwrap();
        assert!(loaded.tokenizer().config().stemmer.is_none());
        assert!(loaded.search("rust", 1).is_empty());
    }

    #[test]
    fn replace_swaps_whole_engine() {
        let shared = SharedEngine::new(SearchEngine::build(&["old text"], Tokenizer::default(), &builder(), true).unwrap());
        let before = shared.current();
        let old = shared.replace(SearchEngine::build(&["new text"], Tokenizer::default(), &builder(), true).unwrap());
        assert!(Arc::ptr_eq(&before, &old));
        assert_eq!(before.document(0), Some("old text"));
        assert_eq!(shared.current().document(0), Some("new text"));
    }
}
