use crate::cancel::CancellationToken;
use crate::config::CANCEL_CHECK_INTERVAL;
use crate::index::Index;
use crate::scorer::{distinct_terms, idf, term_score};
use crate::{DocId, Result, TermId};
use rayon::prelude::*;
use serde::Serialize;
use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap};

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Hit {
    pub doc_id: DocId,
    pub score: f32,
}

/// Orders hits best-first: higher score, then lower doc id.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Ranked(Hit);

impl Eq for Ranked {}

impl Ord for Ranked {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0
            .score
            .total_cmp(&other.0.score)
            .then_with(|| other.0.doc_id.cmp(&self.0.doc_id))
    }
}

impl PartialOrd for Ranked {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> { Some(self.cmp(other)) }
}

/// Top hits of one query plus how many documents overlapped it at all.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Retrieval {
    pub hits: Vec<Hit>,
    pub candidates: usize,
}

/// Top `k` documents for `query`, best first, ties by ascending doc id.
pub fn retrieve(index: &Index, query: &[TermId], k: usize) -> Vec<Hit> {
    // A fresh token is never cancelled, so this cannot fail.
    retrieve_with(index, query, k, &CancellationToken::new()).map(|r| r.hits).unwrap_or_default()
}

pub fn retrieve_with(index: &Index, query: &[TermId], k: usize, cancel: &CancellationToken) -> Result<Retrieval> {
    let scores = accumulate(index, query, cancel)?;
    let candidates = scores.len();
    if k == 0 || candidates == 0 {
        return Ok(Retrieval { hits: Vec::new(), candidates });
    }

    // Min-heap holding the best k seen so far; its top is the weakest of them.
    let mut heap: BinaryHeap<Reverse<Ranked>> = BinaryHeap::with_capacity(k.min(candidates) + 1);
    for (i, (doc_id, score)) in scores.into_iter().enumerate() {
        if i % CANCEL_CHECK_INTERVAL == 0 {
            cancel.check()?;
        }
        let hit = Ranked(Hit { doc_id, score });
        if heap.len() < k {
            heap.push(Reverse(hit));
        } else if heap.peek().is_some_and(|Reverse(worst)| hit > *worst) {
            heap.pop();
            heap.push(Reverse(hit));
        }
    }
    let hits = heap.into_sorted_vec().into_iter().map(|Reverse(Ranked(hit))| hit).collect();
    Ok(Retrieval { hits, candidates })
}

/// Term-at-a-time scoring of every document that shares a term with the query.
fn accumulate(index: &Index, query: &[TermId], cancel: &CancellationToken) -> Result<HashMap<DocId, f32>> {
    let stats = index.stats();
    let params = index.params();
    let doc_lengths = index.doc_lengths();
    let mut scores: HashMap<DocId, f32> = HashMap::new();
    for term in distinct_terms(query) {
        cancel.check()?;
        let (docs, freqs) = index.postings().list(term);
        if docs.is_empty() {
            continue;
        }
        let term_idf = idf(stats.num_docs, docs.len() as u32);
        scores.reserve(docs.len());
        for (&doc, &tf) in docs.iter().zip(freqs) {
            let w = term_score(term_idf, tf, doc_lengths[doc as usize], stats.avg_doc_len, params);
            *scores.entry(doc).or_insert(0.0) += w;
        }
    }
    Ok(scores)
}

/// Ranked hits for a batch of queries: `results[(query, rank)]`.
/// Rows are not padded, so each may be shorter than `k`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Results {
    rows: Vec<Vec<Hit>>,
}

impl Results {
    pub fn from_rows(rows: Vec<Vec<Hit>>) -> Self { Self { rows } }

    /// Number of queries.
    pub fn len(&self) -> usize { self.rows.len() }

    pub fn is_empty(&self) -> bool { self.rows.is_empty() }

    pub fn row(&self, query: usize) -> &[Hit] { self.rows.get(query).map(Vec::as_slice).unwrap_or(&[]) }

    pub fn get(&self, query: usize, rank: usize) -> Option<&Hit> { self.rows.get(query)?.get(rank) }

    pub fn doc_ids(&self, query: usize) -> Vec<DocId> { self.row(query).iter().map(|h| h.doc_id).collect() }

    pub fn rows(&self) -> impl Iterator<Item = &[Hit]> + '_ { self.rows.iter().map(Vec::as_slice) }

    pub fn into_rows(self) -> Vec<Vec<Hit>> { self.rows }
}

impl std::ops::Index<(usize, usize)> for Results {
    type Output = Hit;

    fn index(&self, (query, rank): (usize, usize)) -> &Hit { &self.rows[query][rank] }
}

/// Retrieve several queries in parallel.
pub fn retrieve_batch(index: &Index, queries: &[Vec<TermId>], k: usize) -> Results {
    let rows = queries.par_iter().map(|q| retrieve(index, q, k)).collect();
    Results { rows }
}
