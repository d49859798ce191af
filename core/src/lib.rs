//! Sparse lexical retrieval with BM25.
//!
//! Text flows through a [`Tokenizer`] into a [`VocabularyBuilder`], the
//! resulting term-id sequences are turned into an immutable [`Index`] by the
//! [`IndexBuilder`], and queries are answered by [`retrieve`]. Indices can be
//! written to and read back from any [`StorageBackend`].

pub mod cancel;
pub mod config;
pub mod engine;
pub mod error;
pub mod index;
pub mod params;
pub mod persist;
pub mod retriever;
pub mod scorer;
pub mod tokenizer;
pub mod vocab;

pub type TermId = u32;
pub type DocId = u32;

pub use cancel::CancellationToken;
pub use engine::{SearchEngine, SharedEngine};
pub use error::{Error, Result};
pub use index::{BuildOptions, CorpusStats, Index, IndexBuilder, ParamsSource, Postings, TokenizedCorpus};
pub use params::Bm25Params;
pub use persist::{FsBackend, Manifest, MemoryBackend, SledBackend, StorageBackend};
pub use retriever::{retrieve, retrieve_batch, retrieve_with, Hit, Results, Retrieval};
pub use scorer::{idf, score};
pub use tokenizer::{FnStemmer, Mode, Stemmer, StopwordSpec, Tokenizer, TokenizerConfig};
pub use vocab::{Vocabulary, VocabularyBuilder};
