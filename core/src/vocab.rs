use crate::{Error, Result, TermId};
use std::collections::HashMap;

/// Growable term table, owned by whoever is tokenizing the corpus.
#[derive(Debug, Default)]
pub struct VocabularyBuilder {
    terms: Vec<String>,
    ids: HashMap<String, TermId>,
}

impl VocabularyBuilder {
    pub fn new() -> Self { Self::default() }

    /// Returns the id of `term`, assigning the next dense id on first sight.
    pub fn get_or_insert(&mut self, term: &str) -> TermId {
        if let Some(&id) = self.ids.get(term) {
            return id;
        }
        let id = self.terms.len() as TermId;
        self.terms.push(term.to_string());
        self.ids.insert(term.to_string(), id);
        id
    }

    pub fn get(&self, term: &str) -> Option<TermId> { self.ids.get(term).copied() }

    pub fn len(&self) -> usize { self.terms.len() }

    pub fn is_empty(&self) -> bool { self.terms.is_empty() }

    pub fn freeze(self) -> Vocabulary {
        Vocabulary { terms: self.terms, ids: self.ids }
    }
}

/// Frozen term table. Ids are dense and zero-based; `terms[id]` is the term.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Vocabulary {
    terms: Vec<String>,
    ids: HashMap<String, TermId>,
}

impl Vocabulary {
    /// Rebuild from an id-ordered term list, rejecting duplicates.
    pub fn from_terms(terms: Vec<String>) -> Result<Self> {
        let mut ids = HashMap::with_capacity(terms.len());
        for (id, term) in terms.iter().enumerate() {
            if ids.insert(term.clone(), id as TermId).is_some() {
                return Err(Error::corrupt("vocabulary", format!("duplicate term '{term}' at id {id}")));
            }
        }
        Ok(Self { terms, ids })
    }

    pub fn id(&self, term: &str) -> Option<TermId> { self.ids.get(term).copied() }

    pub fn term(&self, id: TermId) -> Option<&str> { self.terms.get(id as usize).map(String::as_str) }

    pub fn len(&self) -> usize { self.terms.len() }

    pub fn is_empty(&self) -> bool { self.terms.is_empty() }

    /// Terms in id order.
    pub fn terms(&self) -> &[String] { &self.terms }

    pub fn iter(&self) -> impl Iterator<Item = (TermId, &str)> + '_ {
        self.terms.iter().enumerate().map(|(id, t)| (id as TermId, t.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_dense_in_first_seen_order() {
        let mut b = VocabularyBuilder::new();
        assert_eq!(b.get_or_insert("cat"), 0);
        assert_eq!(b.get_or_insert("dog"), 1);
        assert_eq!(b.get_or_insert("cat"), 0);
        assert_eq!(b.get_or_insert("fish"), 2);
        let v = b.freeze();
        assert_eq!(v.len(), 3);
        assert_eq!(v.id("dog"), Some(1));
        assert_eq!(v.term(2), Some("fish"));
        assert_eq!(v.term(3), None);
        let ids: Vec<TermId> = v.iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec![0, 1, 2]);
    }

    #[test]
    fn from_terms_rejects_duplicates() {
        let err = Vocabulary::from_terms(vec!["a".into(), "b".into(), "a".into()]).unwrap_err();
        assert!(matches!(err, Error::CorruptIndex { .. }));
    }
}
