use crate::config::{DEFAULT_STOPWORDS, DEFAULT_TOKEN_PATTERN};
use crate::index::TokenizedCorpus;
use crate::vocab::{Vocabulary, VocabularyBuilder};
use crate::{Error, Result, TermId};
use lazy_static::lazy_static;
use regex::Regex;
use rust_stemmers::{Algorithm, Stemmer as Snowball};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use unicode_normalization::UnicodeNormalization;

lazy_static! {
    static ref DEFAULT_RE: Regex = Regex::new(DEFAULT_TOKEN_PATTERN).expect("valid regex");
    static ref ENGLISH_STOPWORDS: HashSet<&'static str> = {
        let words: &[&str] = &[
            "a","about","above","after","again","against","all","am","an","and","any","are","aren't","as","at",
            "be","because","been","before","being","below","between","both","but","by",
            "can","can't","cannot","could","couldn't",
            "did","didn't","do","does","doesn't","doing","don't","down","during",
            "each","few","for","from","further",
            "had","hadn't","has","hasn't","have","haven't","having","he","he'd","he'll","he's","her","here","here's","hers","herself","him","himself","his","how","how's",
            "i","i'd","i'll","i'm","i've","if","in","into","is","isn't","it","it's","its","itself",
            "let's","me","more","most","mustn't","my","myself",
            "no","nor","not","of","off","on","once","only","or","other","ought","our","ours","ourselves","out","over","own",
            "same","she","she'd","she'll","she's","should","shouldn't","so","some","such",
            "than","that","that's","the","their","theirs","them","themselves","then","there","there's","these","they","they'd","they'll","they're","they've","this","those","through","to","too",
            "under","until","up","very",
            "was","wasn't","we","we'd","we'll","we're","we've","were","weren't","what","what's","when","when's","where","where's","which","while","who","who's","whom","why","why's","with","won't","would","wouldn't",
            "you","you'd","you'll","you're","you've","your","yours","yourself","yourselves"
        ];
        words.iter().copied().collect()
    };
}

/// Maps a token to its canonical root.
pub trait Stemmer: Send + Sync {
    fn stem<'a>(&self, token: &'a str) -> Cow<'a, str>;
}

impl Stemmer for Snowball {
    fn stem<'a>(&self, token: &'a str) -> Cow<'a, str> {
        Snowball::stem(self, token)
    }
}

/// Adapts a plain function or closure into a [`Stemmer`].
pub struct FnStemmer<F>(pub F);

impl<F> Stemmer for FnStemmer<F>
where
    F: Fn(&str) -> String + Send + Sync,
{
    fn stem<'a>(&self, token: &'a str) -> Cow<'a, str> {
        Cow::Owned((self.0)(token))
    }
}

/// Which stopwords to drop: a named preset ("english", "en", "none") or an explicit list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StopwordSpec {
    Preset(String),
    Words(Vec<String>),
}

impl Default for StopwordSpec {
    fn default() -> Self { StopwordSpec::Preset(DEFAULT_STOPWORDS.to_string()) }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenizerConfig {
    #[serde(default = "default_true")]
    pub lowercase: bool,
    /// Apply NFKC before splitting.
    #[serde(default = "default_true")]
    pub normalize_unicode: bool,
    #[serde(default = "default_pattern")]
    pub pattern: String,
    #[serde(default)]
    pub stopwords: StopwordSpec,
    /// Snowball language name, e.g. "english".
    #[serde(default)]
    pub stemmer: Option<String>,
}

fn default_true() -> bool { true }
fn default_pattern() -> String { DEFAULT_TOKEN_PATTERN.to_string() }

impl Default for TokenizerConfig {
    fn default() -> Self {
        Self {
            lowercase: true,
            normalize_unicode: true,
            pattern: default_pattern(),
            stopwords: StopwordSpec::default(),
            stemmer: None,
        }
    }
}

/// How [`Tokenizer::tokenize`] treats terms it has not seen before.
pub enum Mode<'v> {
    /// Register unseen terms.
    Build(&'v mut VocabularyBuilder),
    /// Drop unseen terms.
    Query(&'v Vocabulary),
}

pub struct Tokenizer {
    config: TokenizerConfig,
    pattern: Regex,
    stopwords: HashSet<String>,
    stemmer: Option<Arc<dyn Stemmer>>,
    custom_stemmer: bool,
}

impl fmt::Debug for Tokenizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tokenizer")
            .field("config", &self.config)
            .field("stopwords", &self.stopwords.len())
            .field("custom_stemmer", &self.custom_stemmer)
            .finish()
    }
}

impl Default for Tokenizer {
    fn default() -> Self {
        Self {
            config: TokenizerConfig::default(),
            pattern: DEFAULT_RE.clone(),
            stopwords: ENGLISH_STOPWORDS.iter().map(|w| w.to_string()).collect(),
            stemmer: None,
            custom_stemmer: false,
        }
    }
}

impl Tokenizer {
    pub fn new(config: TokenizerConfig) -> Result<Self> {
        let pattern = if config.pattern == DEFAULT_TOKEN_PATTERN {
            DEFAULT_RE.clone()
        } else {
            Regex::new(&config.pattern)
                .map_err(|e| Error::InvalidParameter(format!("token pattern '{}': {e}", config.pattern)))?
        };
        let stemmer = match config.stemmer.as_deref() {
            None => None,
            Some(lang) => Some(Arc::new(Snowball::create(parse_algorithm(lang)?)) as Arc<dyn Stemmer>),
        };
        let mut tokenizer = Self { config, pattern, stopwords: HashSet::new(), stemmer, custom_stemmer: false };
        tokenizer.stopwords = tokenizer.resolve_stopwords()?;
        Ok(tokenizer)
    }

    /// Replace the stemmer with an injected one. Such a tokenizer cannot be
    /// described by its config alone, so persisted indices record no stemmer.
    pub fn with_stemmer(mut self, stemmer: Arc<dyn Stemmer>) -> Self {
        self.stemmer = Some(stemmer);
        self.config.stemmer = None;
        self.custom_stemmer = true;
        self
    }

    pub fn config(&self) -> &TokenizerConfig { &self.config }

    /// Config that reproduces this tokenizer, if one exists.
    pub fn persistable_config(&self) -> Option<TokenizerConfig> {
        if self.custom_stemmer { None } else { Some(self.config.clone()) }
    }

    pub fn is_stopword(&self, token: &str) -> bool { self.stopwords.contains(token) }

    /// The compiled token pattern, for locating tokens in un-normalized text.
    pub fn pattern(&self) -> &Regex { &self.pattern }

    fn resolve_stopwords(&self) -> Result<HashSet<String>> {
        match &self.config.stopwords {
            StopwordSpec::Preset(name) => match name.to_lowercase().as_str() {
                "english" | "en" => Ok(ENGLISH_STOPWORDS.iter().map(|w| self.normalize(w).into_owned()).collect()),
                "none" | "" => Ok(HashSet::new()),
                other => Err(Error::InvalidParameter(format!("unknown stopword preset '{other}'"))),
            },
            StopwordSpec::Words(words) => Ok(words.iter().map(|w| self.normalize(w).into_owned()).collect()),
        }
    }

    fn normalize<'a>(&self, text: &'a str) -> Cow<'a, str> {
        let mut out = Cow::Borrowed(text);
        if self.config.normalize_unicode {
            out = Cow::Owned(out.nfkc().collect::<String>());
        }
        if self.config.lowercase {
            out = Cow::Owned(out.to_lowercase());
        }
        out
    }

    /// Split, drop stopwords, and stem. `emit` sees every surviving term.
    fn for_each_term(&self, text: &str, mut emit: impl FnMut(Cow<'_, str>)) {
        let normalized = self.normalize(text);
        for mat in self.pattern.find_iter(&normalized) {
            let token = mat.as_str();
            if self.is_stopword(token) { continue; }
            let stem = match &self.stemmer {
                Some(s) => s.stem(token),
                None => Cow::Borrowed(token),
            };
            emit(stem);
        }
    }

    /// Normalized terms of `text`, without consulting any vocabulary.
    pub fn tokenize_terms(&self, text: &str) -> Vec<String> {
        let mut terms = Vec::new();
        self.for_each_term(text, |term| terms.push(term.into_owned()));
        terms
    }

    pub fn tokenize(&self, text: &str, mode: Mode<'_>) -> Vec<TermId> {
        match mode {
            Mode::Build(vocab) => self.tokenize_build(text, vocab),
            Mode::Query(vocab) => self.tokenize_query(text, vocab),
        }
    }

    pub fn tokenize_build(&self, text: &str, vocab: &mut VocabularyBuilder) -> Vec<TermId> {
        let mut ids = Vec::new();
        self.for_each_term(text, |term| ids.push(vocab.get_or_insert(&term)));
        ids
    }

    /// Terms unknown to `vocab` are dropped; they cannot match anything.
    pub fn tokenize_query(&self, text: &str, vocab: &Vocabulary) -> Vec<TermId> {
        let mut ids = Vec::new();
        self.for_each_term(text, |term| {
            if let Some(id) = vocab.id(&term) {
                ids.push(id);
            }
        });
        ids
    }

    /// Tokenize a whole corpus in build mode. Each distinct surface token is
    /// stemmed once.
    pub fn tokenize_corpus<S: AsRef<str>>(&self, texts: &[S]) -> TokenizedCorpus {
        let mut vocab = VocabularyBuilder::new();
        let mut seen: HashMap<String, TermId> = HashMap::new();
        let mut documents = Vec::with_capacity(texts.len());
        for text in texts {
            let mut ids = Vec::new();
            self.for_each_term_cached(text.as_ref(), &mut seen, &mut vocab, &mut ids);
            documents.push(ids);
        }
        tracing::debug!(docs = documents.len(), terms = vocab.len(), "tokenized corpus");
        TokenizedCorpus { documents, vocabulary: vocab.freeze() }
    }

    fn for_each_term_cached(
        &self,
        text: &str,
        seen: &mut HashMap<String, TermId>,
        vocab: &mut VocabularyBuilder,
        ids: &mut Vec<TermId>,
    ) {
        let normalized = self.normalize(text);
        for mat in self.pattern.find_iter(&normalized) {
            let token = mat.as_str();
            if self.is_stopword(token) { continue; }
            if let Some(&id) = seen.get(token) {
                ids.push(id);
                continue;
            }
            let id = match &self.stemmer {
                Some(s) => vocab.get_or_insert(&s.stem(token)),
                None => vocab.get_or_insert(token),
            };
            seen.insert(token.to_string(), id);
            ids.push(id);
        }
    }

    pub fn tokenize_queries<S: AsRef<str>>(&self, texts: &[S], vocab: &Vocabulary) -> Vec<Vec<TermId>> {
        texts.iter().map(|t| self.tokenize_query(t.as_ref(), vocab)).collect()
    }
}

fn parse_algorithm(lang: &str) -> Result<Algorithm> {
    let algo = match lang.to_lowercase().as_str() {
        "english" | "en" => Algorithm::English,
        "danish" | "da" => Algorithm::Danish,
        "dutch" | "nl" => Algorithm::Dutch,
        "finnish" | "fi" => Algorithm::Finnish,
        "french" | "fr" => Algorithm::French,
        "german" | "de" => Algorithm::German,
        "hungarian" | "hu" => Algorithm::Hungarian,
        "italian" | "it" => Algorithm::Italian,
        "norwegian" | "no" => Algorithm::Norwegian,
        "portuguese" | "pt" => Algorithm::Portuguese,
        "romanian" | "ro" => Algorithm::Romanian,
        "russian" | "ru" => Algorithm::Russian,
        "spanish" | "es" => Algorithm::Spanish,
        "swedish" | "sv" => Algorithm::Swedish,
        "tamil" | "ta" => Algorithm::Tamil,
        "turkish" | "tr" => Algorithm::Turkish,
        other => return Err(Error::InvalidParameter(format!("no stemmer for language '{other}'"))),
    };
    Ok(algo)
}
