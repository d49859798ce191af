//! Defaults and limits shared by the library and the binaries.

/// Default term-frequency saturation.
pub const DEFAULT_K1: f32 = 1.5;

/// Default length-normalization strength.
pub const DEFAULT_B: f32 = 0.75;

/// Word tokens of at least two characters. Inner apostrophes stay, so
/// contractions such as "don't" reach the stopword filter whole.
pub const DEFAULT_TOKEN_PATTERN: &str = r"(?u)\b\w[\w']*\w\b";

/// Stopword preset used when none is configured explicitly.
pub const DEFAULT_STOPWORDS: &str = "english";

/// Format tag written into every manifest.
pub const FORMAT_NAME: &str = "bm25-index";

/// Current artifact format version. Loaders reject anything else.
pub const FORMAT_VERSION: u32 = 1;

/// Candidates scored between two cancellation checks.
pub const CANCEL_CHECK_INTERVAL: usize = 4096;

/// Upper bound on `k` accepted by the CLI and the server.
pub const MAX_K: usize = 1000;
