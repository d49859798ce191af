use crate::cancel::CancellationToken;
use crate::params::Bm25Params;
use crate::scorer;
use crate::tokenizer::Tokenizer;
use crate::vocab::{Vocabulary, VocabularyBuilder};
use crate::{DocId, Error, Result, TermId};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Term-id sequences for a corpus together with the vocabulary that produced them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TokenizedCorpus {
    pub documents: Vec<Vec<TermId>>,
    pub vocabulary: Vocabulary,
}

impl TokenizedCorpus {
    /// Assign term ids to already tokenized documents, in first-seen order.
    pub fn from_token_lists<S: AsRef<str>>(docs: &[Vec<S>]) -> Self {
        let mut vocab = VocabularyBuilder::new();
        let documents = docs
            .iter()
            .map(|doc| doc.iter().map(|t| vocab.get_or_insert(t.as_ref())).collect())
            .collect();
        Self { documents, vocabulary: vocab.freeze() }
    }

    pub fn len(&self) -> usize { self.documents.len() }

    pub fn is_empty(&self) -> bool { self.documents.is_empty() }
}

/// All postings lists in compressed-sparse-row layout.
///
/// The list for term `t` is `doc_ids[offsets[t]..offsets[t + 1]]` with the
/// matching `freqs`; doc ids within a list are strictly ascending.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Postings {
    offsets: Vec<u64>,
    doc_ids: Vec<DocId>,
    freqs: Vec<u32>,
}

impl Postings {
    /// Check the layout against the index dimensions. Errors are reported as
    /// `CorruptIndex` since only persisted data can violate these rules.
    pub(crate) fn from_parts(
        offsets: Vec<u64>,
        doc_ids: Vec<DocId>,
        freqs: Vec<u32>,
        num_terms: usize,
        num_docs: u32,
    ) -> Result<Self> {
        if offsets.len() != num_terms + 1 {
            return Err(Error::corrupt("postings", format!("expected {} offsets, found {}", num_terms + 1, offsets.len())));
        }
        if doc_ids.len() != freqs.len() {
            return Err(Error::corrupt(
                "postings",
                format!("{} doc ids but {} frequencies", doc_ids.len(), freqs.len()),
            ));
        }
        if offsets.first() != Some(&0) || offsets.last() != Some(&(doc_ids.len() as u64)) {
            return Err(Error::corrupt("postings", "offset table does not span the posting arrays"));
        }
        for term in 0..num_terms {
            let (start, end) = (offsets[term], offsets[term + 1]);
            if start > end || end > doc_ids.len() as u64 {
                return Err(Error::corrupt("postings", format!("offsets out of order at term {term}")));
            }
            let list = &doc_ids[start as usize..end as usize];
            if list.windows(2).any(|w| w[0] >= w[1]) {
                return Err(Error::corrupt("postings", format!("doc ids of term {term} are not strictly ascending")));
            }
            if let Some(&last) = list.last() {
                if last >= num_docs {
                    return Err(Error::corrupt("postings", format!("term {term} refers to doc {last} of {num_docs}")));
                }
            }
            if let Some(pos) = freqs[start as usize..end as usize].iter().position(|&f| f == 0) {
                return Err(Error::corrupt("postings", format!("term {term} has a zero frequency at entry {pos}")));
            }
        }
        Ok(Self { offsets, doc_ids, freqs })
    }

    pub fn num_terms(&self) -> usize { self.offsets.len().saturating_sub(1) }

    /// Total number of (doc, freq) entries.
    pub fn len(&self) -> usize { self.doc_ids.len() }

    pub fn is_empty(&self) -> bool { self.doc_ids.is_empty() }

    pub fn offsets(&self) -> &[u64] { &self.offsets }

    pub fn doc_ids(&self) -> &[DocId] { &self.doc_ids }

    pub fn freqs(&self) -> &[u32] { &self.freqs }

    /// Postings of `term`; empty for ids outside the table.
    pub fn list(&self, term: TermId) -> (&[DocId], &[u32]) {
        let t = term as usize;
        if t + 1 >= self.offsets.len() {
            return (&[], &[]);
        }
        let (start, end) = (self.offsets[t] as usize, self.offsets[t + 1] as usize);
        (&self.doc_ids[start..end], &self.freqs[start..end])
    }

    /// Number of documents containing `term`.
    pub fn doc_freq(&self, term: TermId) -> u32 { self.list(term).0.len() as u32 }

    /// Frequency of `term` in `doc`, 0 when absent.
    pub fn freq(&self, term: TermId, doc: DocId) -> u32 {
        let (docs, freqs) = self.list(term);
        match docs.binary_search(&doc) {
            Ok(pos) => freqs[pos],
            Err(_) => 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CorpusStats {
    pub num_docs: u32,
    pub total_doc_len: u64,
    pub avg_doc_len: f32,
}

impl CorpusStats {
    pub(crate) fn from_lengths(doc_lengths: &[u32]) -> Self {
        let total_doc_len: u64 = doc_lengths.iter().map(|&l| l as u64).sum();
        let num_docs = doc_lengths.len() as u32;
        let avg_doc_len = if num_docs == 0 { 0.0 } else { (total_doc_len as f64 / num_docs as f64) as f32 };
        Self { num_docs, total_doc_len, avg_doc_len }
    }
}

/// Whether the BM25 parameters of an index were read from its artifact or
/// substituted with defaults because the artifact carried none.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamsSource {
    Stored,
    Defaulted,
}

/// Immutable BM25 index. Share it behind an `Arc` for concurrent queries.
#[derive(Debug, Clone, PartialEq)]
pub struct Index {
    vocabulary: Vocabulary,
    postings: Postings,
    doc_lengths: Vec<u32>,
    stats: CorpusStats,
    params: Bm25Params,
    params_source: ParamsSource,
    corpus: Option<Vec<String>>,
}

impl Index {
    /// Put a loaded index back together after checking the parts agree.
    pub(crate) fn assemble(
        vocabulary: Vocabulary,
        postings: Postings,
        doc_lengths: Vec<u32>,
        stats: CorpusStats,
        params: Bm25Params,
        params_source: ParamsSource,
    ) -> Result<Self> {
        if postings.num_terms() != vocabulary.len() {
            return Err(Error::corrupt(
                "postings",
                format!("{} postings lists for {} vocabulary terms", postings.num_terms(), vocabulary.len()),
            ));
        }
        if doc_lengths.len() != stats.num_docs as usize {
            return Err(Error::corrupt(
                "doc_lengths",
                format!("{} lengths for {} documents", doc_lengths.len(), stats.num_docs),
            ));
        }
        // A document's length is the number of its indexed tokens.
        let mut token_counts = vec![0u64; doc_lengths.len()];
        for (&doc, &freq) in postings.doc_ids().iter().zip(postings.freqs()) {
            token_counts[doc as usize] += freq as u64;
        }
        if let Some(doc) = (0..doc_lengths.len()).find(|&d| token_counts[d] != doc_lengths[d] as u64) {
            return Err(Error::corrupt(
                "doc_lengths",
                format!("doc {doc} has length {} but {} indexed tokens", doc_lengths[doc], token_counts[doc]),
            ));
        }
        let derived = CorpusStats::from_lengths(&doc_lengths);
        if derived.total_doc_len != stats.total_doc_len {
            return Err(Error::corrupt(
                "stats",
                format!("total length {} does not match document lengths ({})", stats.total_doc_len, derived.total_doc_len),
            ));
        }
        // The stored average went through a text encoding; keep the derived one.
        if (derived.avg_doc_len - stats.avg_doc_len).abs() > 1e-6 * derived.avg_doc_len.max(1.0) {
            return Err(Error::corrupt("stats", format!("average length {} should be {}", stats.avg_doc_len, derived.avg_doc_len)));
        }
        params.validate().map_err(|e| Error::corrupt("params", e.to_string()))?;
        Ok(Self { vocabulary, postings, doc_lengths, stats: derived, params, params_source, corpus: None })
    }

    /// Attach the raw text of every document, indexed by doc id.
    pub fn with_corpus(mut self, corpus: Vec<String>) -> Result<Self> {
        if corpus.len() != self.stats.num_docs as usize {
            return Err(Error::InvalidState(format!(
                "corpus has {} texts but the index has {} documents",
                corpus.len(),
                self.stats.num_docs
            )));
        }
        self.corpus = Some(corpus);
        Ok(self)
    }

    pub fn without_corpus(mut self) -> Self {
        self.corpus = None;
        self
    }

    /// Rebind the scoring parameters.
    pub fn with_params(mut self, params: Bm25Params) -> Result<Self> {
        params.validate()?;
        self.params = params;
        self.params_source = ParamsSource::Stored;
        Ok(self)
    }

    pub fn vocabulary(&self) -> &Vocabulary { &self.vocabulary }

    pub fn postings(&self) -> &Postings { &self.postings }

    pub fn doc_lengths(&self) -> &[u32] { &self.doc_lengths }

    pub fn doc_len(&self, doc: DocId) -> Option<u32> { self.doc_lengths.get(doc as usize).copied() }

    pub fn stats(&self) -> &CorpusStats { &self.stats }

    pub fn num_docs(&self) -> u32 { self.stats.num_docs }

    pub fn params(&self) -> Bm25Params { self.params }

    pub fn params_source(&self) -> ParamsSource { self.params_source }

    pub fn corpus(&self) -> Option<&[String]> { self.corpus.as_deref() }

    pub fn document(&self, doc: DocId) -> Option<&str> {
        self.corpus.as_ref()?.get(doc as usize).map(String::as_str)
    }

    pub fn doc_freq(&self, term: TermId) -> u32 { self.postings.doc_freq(term) }

    /// IDF of `term`, or `None` when no document contains it.
    pub fn idf(&self, term: TermId) -> Option<f32> {
        match self.doc_freq(term) {
            0 => None,
            df => Some(scorer::idf(self.stats.num_docs, df)),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    /// Number of document shards; defaults to the rayon thread count.
    pub shards: Option<usize>,
    /// Build on a dedicated pool of this many threads.
    pub threads: Option<usize>,
    pub cancel: Option<CancellationToken>,
}

/// Postings and lengths for one contiguous run of documents.
struct Shard {
    doc_lengths: Vec<u32>,
    postings: HashMap<TermId, Vec<(DocId, u32)>>,
}

pub struct IndexBuilder {
    params: Bm25Params,
    options: BuildOptions,
}

impl IndexBuilder {
    pub fn new(params: Bm25Params) -> Result<Self> {
        params.validate()?;
        Ok(Self { params, options: BuildOptions::default() })
    }

    pub fn with_options(mut self, options: BuildOptions) -> Self {
        self.options = options;
        self
    }

    pub fn shards(mut self, shards: usize) -> Self {
        self.options.shards = Some(shards);
        self
    }

    pub fn threads(mut self, threads: usize) -> Self {
        self.options.threads = Some(threads);
        self
    }

    pub fn cancel(mut self, token: CancellationToken) -> Self {
        self.options.cancel = Some(token);
        self
    }

    pub fn build_from_texts<S: AsRef<str>>(&self, texts: &[S], tokenizer: &Tokenizer) -> Result<Index> {
        self.build(tokenizer.tokenize_corpus(texts))
    }

    pub fn build(&self, corpus: TokenizedCorpus) -> Result<Index> {
        let TokenizedCorpus { documents, vocabulary } = corpus;
        if documents.is_empty() {
            return Err(Error::EmptyCorpus);
        }
        if vocabulary.is_empty() {
            return Err(Error::InvalidState("vocabulary is empty; tokenize the corpus before building".into()));
        }
        if documents.len() > DocId::MAX as usize {
            return Err(Error::InvalidState(format!("{} documents exceed the doc id range", documents.len())));
        }

        let shards = self.options.shards.unwrap_or_else(rayon::current_num_threads).clamp(1, documents.len());
        let (postings, doc_lengths) = match self.options.threads {
            Some(threads) => {
                let pool = rayon::ThreadPoolBuilder::new()
                    .num_threads(threads)
                    .build()
                    .map_err(|e| Error::InvalidParameter(format!("thread pool: {e}")))?;
                pool.install(|| self.build_sharded(&documents, vocabulary.len(), shards))?
            }
            None => self.build_sharded(&documents, vocabulary.len(), shards)?,
        };

        let stats = CorpusStats::from_lengths(&doc_lengths);
        tracing::info!(
            num_docs = stats.num_docs,
            num_terms = vocabulary.len(),
            num_postings = postings.len(),
            avg_doc_len = stats.avg_doc_len,
            shards,
            "index built"
        );
        Ok(Index {
            vocabulary,
            postings,
            doc_lengths,
            stats,
            params: self.params,
            params_source: ParamsSource::Stored,
            corpus: None,
        })
    }

    fn check_cancel(&self) -> Result<()> {
        match &self.options.cancel {
            Some(token) => token.check(),
            None => Ok(()),
        }
    }

    fn build_sharded(&self, documents: &[Vec<TermId>], num_terms: usize, shards: usize) -> Result<(Postings, Vec<u32>)> {
        let chunk = documents.len().div_ceil(shards);
        let built: Vec<Shard> = documents
            .par_chunks(chunk)
            .enumerate()
            .map(|(i, docs)| {
                self.check_cancel()?;
                build_shard((i * chunk) as DocId, docs, num_terms)
            })
            .collect::<Result<Vec<_>>>()?;
        self.check_cancel()?;
        tracing::debug!(shards = built.len(), chunk, "merging shards");
        Ok(merge_shards(built, num_terms))
    }
}

fn build_shard(first_doc: DocId, docs: &[Vec<TermId>], num_terms: usize) -> Result<Shard> {
    let mut shard = Shard { doc_lengths: Vec::with_capacity(docs.len()), postings: HashMap::new() };
    for (offset, terms) in docs.iter().enumerate() {
        let doc_id = first_doc + offset as DocId;
        let mut tf: HashMap<TermId, u32> = HashMap::new();
        for &term in terms {
            if term as usize >= num_terms {
                return Err(Error::InvalidState(format!(
                    "document {doc_id} refers to term id {term}, vocabulary has {num_terms} terms"
                )));
            }
            *tf.entry(term).or_insert(0) += 1;
        }
        shard.doc_lengths.push(terms.len() as u32);
        for (term, freq) in tf {
            shard.postings.entry(term).or_default().push((doc_id, freq));
        }
    }
    Ok(shard)
}

/// Concatenate shard postings in shard order, then sort each list by doc id.
fn merge_shards(shards: Vec<Shard>, num_terms: usize) -> (Postings, Vec<u32>) {
    let mut per_term: Vec<Vec<(DocId, u32)>> = vec![Vec::new(); num_terms];
    let mut doc_lengths = Vec::new();
    for shard in shards {
        doc_lengths.extend(shard.doc_lengths);
        for (term, list) in shard.postings {
            per_term[term as usize].extend(list);
        }
    }

    let total: usize = per_term.iter().map(Vec::len).sum();
    let mut offsets = Vec::with_capacity(num_terms + 1);
    let mut doc_ids = Vec::with_capacity(total);
    let mut freqs = Vec::with_capacity(total);
    offsets.push(0u64);
    for mut list in per_term {
        list.sort_unstable_by_key(|&(doc, _)| doc);
        for (doc, freq) in list {
            doc_ids.push(doc);
            freqs.push(freq);
        }
        offsets.push(doc_ids.len() as u64);
    }
    (Postings { offsets, doc_ids, freqs }, doc_lengths)
}
