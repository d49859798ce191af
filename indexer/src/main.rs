use anyhow::{Context, Result};
use bm25_core::config::{DEFAULT_B, DEFAULT_K1, MAX_K};
use bm25_core::persist::read_manifest;
use bm25_core::{
    Bm25Params, Error, FsBackend, IndexBuilder, SearchEngine, SledBackend, StopwordSpec, StorageBackend, Tokenizer,
    TokenizerConfig,
};
use clap::{Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};
use tracing_subscriber::{fmt, EnvFilter};
use walkdir::WalkDir;

use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize)]
struct InputDoc {
    #[serde(alias = "text")]
    body: String,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Backend {
    Fs,
    Sled,
}

#[derive(Parser)]
#[command(name = "bm25-indexer")]
#[command(about = "Build, query and inspect BM25 indices", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the index from JSON/JSONL/TXT files or a directory of them
    Build {
        /// Input path (file or directory)
        #[arg(long)]
        input: String,
        /// Output index location
        #[arg(long)]
        output: String,
        #[arg(long, default_value_t = DEFAULT_K1)]
        k1: f32,
        #[arg(long, default_value_t = DEFAULT_B)]
        b: f32,
        /// Stopword preset ("english", "en" or "none")
        #[arg(long, default_value = "english")]
        stopwords: String,
        /// Snowball stemmer language, or "none"
        #[arg(long, default_value = "english")]
        stemmer: String,
        /// Keep the original case of tokens
        #[arg(long, default_value_t = false)]
        no_lowercase: bool,
        /// Document shards built in parallel
        #[arg(long)]
        shards: Option<usize>,
        /// Worker threads for the build
        #[arg(long)]
        threads: Option<usize>,
        /// Store the raw document text next to the index
        #[arg(long, default_value_t = false)]
        include_corpus: bool,
        #[arg(long, value_enum, default_value_t = Backend::Fs)]
        backend: Backend,
    },
    /// Run one query against a saved index
    Query {
        #[arg(long)]
        index: String,
        #[arg(long)]
        q: String,
        #[arg(long, default_value_t = 10)]
        k: i64,
        #[arg(long, value_enum, default_value_t = Backend::Fs)]
        backend: Backend,
    },
    /// Print the manifest of a saved index
    Info {
        #[arg(long)]
        index: String,
        #[arg(long, value_enum, default_value_t = Backend::Fs)]
        backend: Backend,
    },
}

#[derive(Serialize)]
struct QueryOutput<'a> {
    query: &'a str,
    total_hits: usize,
    results: Vec<QueryHit<'a>>,
}

#[derive(Serialize)]
struct QueryHit<'a> {
    doc_id: u32,
    score: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<&'a str>,
}

fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Build { input, output, k1, b, stopwords, stemmer, no_lowercase, shards, threads, include_corpus, backend } => {
            let tokenizer = TokenizerConfig {
                lowercase: !no_lowercase,
                stopwords: StopwordSpec::Preset(stopwords),
                stemmer: if stemmer == "none" { None } else { Some(stemmer) },
                ..Default::default()
            };
            let mut builder = IndexBuilder::new(Bm25Params::new(k1, b)?)?;
            if let Some(shards) = shards {
                builder = builder.shards(shards);
            }
            if let Some(threads) = threads {
                builder = builder.threads(threads);
            }
            build_index(&input, &output, tokenizer, &builder, include_corpus, backend)
        }
        Commands::Query { index, q, k, backend } => run_query(&index, &q, k, backend),
        Commands::Info { index, backend } => {
            let backend = open_backend(backend, &index)?;
            let manifest = read_manifest(backend.as_ref())?;
            println!("{}", serde_json::to_string_pretty(&manifest)?);
            Ok(())
        }
    }
}

fn open_backend(kind: Backend, path: &str) -> Result<Box<dyn StorageBackend>> {
    Ok(match kind {
        Backend::Fs => Box::new(FsBackend::new(path)),
        Backend::Sled => Box::new(SledBackend::open(path)?),
    })
}

fn build_index(
    input: &str,
    output: &str,
    tokenizer: TokenizerConfig,
    builder: &IndexBuilder,
    include_corpus: bool,
    backend: Backend,
) -> Result<()> {
    let files = collect_files(Path::new(input));
    let mut texts: Vec<String> = Vec::new();
    for file in &files {
        match file.extension().and_then(|s| s.to_str()) {
            Some("jsonl") => read_jsonl(file, &mut texts)?,
            Some("json") => read_json(file, &mut texts)?,
            _ => texts.push(fs::read_to_string(file).with_context(|| format!("reading {}", file.display()))?),
        }
    }
    tracing::info!(files = files.len(), num_docs = texts.len(), "ingested documents");

    let engine = SearchEngine::build(&texts, Tokenizer::new(tokenizer)?, builder, include_corpus)?;
    let backend = open_backend(backend, output)?;
    let manifest = engine.save(backend.as_ref(), include_corpus)?;

    tracing::info!(output, num_terms = manifest.num_terms, "index build complete");
    Ok(())
}

/// Input files in a stable order, so doc ids do not depend on directory listing order.
fn collect_files(input_path: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = Vec::new();
    if input_path.is_dir() {
        for entry in WalkDir::new(input_path).sort_by_file_name().into_iter().filter_map(|e| e.ok()) {
            let p = entry.path();
            if p.is_file() {
                if let Some(ext) = p.extension().and_then(|s| s.to_str()) {
                    if matches!(ext, "json" | "jsonl" | "txt") {
                        files.push(p.to_path_buf());
                    }
                }
            }
        }
    } else if input_path.is_file() {
        files.push(input_path.to_path_buf());
    }
    files
}

fn read_jsonl(file: &Path, texts: &mut Vec<String>) -> Result<()> {
    let reader = BufReader::new(File::open(file)?);
    for (lineno, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() { continue; }
        let doc: InputDoc = serde_json::from_str(&line)
            .with_context(|| format!("{}:{}", file.display(), lineno + 1))?;
        texts.push(doc.body);
    }
    Ok(())
}

fn read_json(file: &Path, texts: &mut Vec<String>) -> Result<()> {
    let reader = BufReader::new(File::open(file)?);
    let json: serde_json::Value = serde_json::from_reader(reader)?;
    match json {
        serde_json::Value::Array(arr) => {
            for v in arr {
                let doc: InputDoc = serde_json::from_value(v)?;
                texts.push(doc.body);
            }
        }
        serde_json::Value::Object(_) => {
            let doc: InputDoc = serde_json::from_value(json)?;
            texts.push(doc.body);
        }
        _ => tracing::warn!(file = %file.display(), "skipping JSON that is neither an object nor an array"),
    }
    Ok(())
}

fn run_query(index: &str, q: &str, k: i64, backend: Backend) -> Result<()> {
    let k = usize::try_from(k)
        .ok()
        .filter(|&k| k <= MAX_K)
        .ok_or_else(|| Error::InvalidParameter(format!("k must lie in [0, {MAX_K}], got {k}")))?;
    let backend = open_backend(backend, index)?;
    let engine = SearchEngine::load(backend.as_ref(), true)?;
    let retrieval = engine.search_with(q, k, &Default::default())?;
    let out = QueryOutput {
        query: q,
        total_hits: retrieval.candidates,
        results: retrieval
            .hits
            .iter()
            .map(|h| QueryHit { doc_id: h.doc_id, score: h.score, text: engine.document(h.doc_id) })
            .collect(),
    };
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}
