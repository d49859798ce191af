//! BM25 scoring.
//!
//! score(D, Q) = Σ idf(t) · f(t, D) · (k1 + 1) / (f(t, D) + k1 · (1 - b + b · |D| / avgdl))
//! over the distinct terms t of Q.

use crate::index::Index;
use crate::params::Bm25Params;
use crate::{DocId, TermId};

/// idf(t) = ln(1 + (N - df + 0.5) / (df + 0.5)). Never negative for df <= N.
pub fn idf(num_docs: u32, doc_freq: u32) -> f32 {
    let n = num_docs as f32;
    let df = doc_freq as f32;
    (1.0 + (n - df + 0.5) / (df + 0.5)).ln()
}

/// Contribution of one term occurring `tf` times in a document of `doc_len` tokens.
#[inline]
pub fn term_score(idf: f32, tf: u32, doc_len: u32, avg_doc_len: f32, params: Bm25Params) -> f32 {
    if tf == 0 {
        return 0.0;
    }
    let tf = tf as f32;
    let rel_len = if avg_doc_len > 0.0 { doc_len as f32 / avg_doc_len } else { 0.0 };
    let norm = params.k1 * (1.0 - params.b + params.b * rel_len);
    idf * tf * (params.k1 + 1.0) / (tf + norm)
}

/// Sorted, de-duplicated copy of a query's term ids.
pub fn distinct_terms(query: &[TermId]) -> Vec<TermId> {
    let mut terms = query.to_vec();
    terms.sort_unstable();
    terms.dedup();
    terms
}

/// Score `doc` against `query` with the index's own parameters.
pub fn score(index: &Index, doc: DocId, query: &[TermId]) -> f32 {
    score_with(index, doc, query, index.params())
}

/// Score `doc` against `query` with explicit parameters. Terms missing from
/// the index or from the document contribute nothing.
pub fn score_with(index: &Index, doc: DocId, query: &[TermId], params: Bm25Params) -> f32 {
    let Some(doc_len) = index.doc_len(doc) else { return 0.0 };
    let stats = index.stats();
    let mut total = 0.0f32;
    for term in distinct_terms(query) {
        let tf = index.postings().freq(term, doc);
        if tf == 0 {
            continue;
        }
        let term_idf = idf(stats.num_docs, index.doc_freq(term));
        total += term_score(term_idf, tf, doc_len, stats.avg_doc_len, params);
    }
    total
}
