use bm25_core::{Mode, StopwordSpec, Tokenizer, TokenizerConfig, VocabularyBuilder};

fn stemming() -> Tokenizer {
    Tokenizer::new(TokenizerConfig { stemmer: Some("english".into()), ..Default::default() }).unwrap()
}

#[test]
fn it_normalizes_and_stems() {
    let words = stemming().tokenize_terms("Running Runners RUN! The ﬁsh menu.");
    // Stemming to "run" should appear
    assert!(words.contains(&"run".to_string()));
    // NFKC folds the "ﬁ" ligature
    assert!(words.contains(&"fish".to_string()));
}

#[test]
fn it_filters_stopwords() {
    let words = Tokenizer::default().tokenize_terms("The quick brown fox and the lazy dog");
    assert!(!words.contains(&"the".to_string()));
    assert!(!words.contains(&"and".to_string()));
    assert_eq!(words, vec!["quick", "brown", "fox", "lazy", "dog"]);
}

#[test]
fn no_stopwords_keeps_everything() {
    let t = Tokenizer::new(TokenizerConfig { stopwords: StopwordSpec::Preset("none".into()), ..Default::default() })
        .unwrap();
    assert_eq!(t.tokenize_terms("the fox and the dog"), vec!["the", "fox", "and", "the", "dog"]);
}

#[test]
fn batch_tokenization_is_deterministic() {
    let texts = ["a cat is a feline and likes to purr", "a fish is a creature that lives in water and swims"];
    let first = stemming().tokenize_corpus(&texts);
    let second = stemming().tokenize_corpus(&texts);
    assert_eq!(first, second);
    assert_eq!(first.documents.len(), 2);
    // ids are handed out in first-seen order
    assert_eq!(first.documents[0][0], 0);
    assert_eq!(first.vocabulary.term(0), Some("cat"));
}

#[test]
fn query_mode_never_grows_the_vocabulary() {
    let t = stemming();
    let mut builder = VocabularyBuilder::new();
    t.tokenize("purring cats", Mode::Build(&mut builder));
    let vocab = builder.freeze();
    let ids = t.tokenize("cats purr loudly", Mode::Query(&vocab));
    assert_eq!(ids.len(), 2);
    assert_eq!(vocab.len(), 2);
}
