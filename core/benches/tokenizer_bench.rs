use bm25_core::{Tokenizer, TokenizerConfig};
use criterion::{criterion_group, criterion_main, Criterion};

const TEXT: &str = "The quick brown fox jumps over the lazy dog. Running runners run \
    through the café while the borrow checker keeps programs memory safe. ";

fn bench_tokenize(c: &mut Criterion) {
    let text = TEXT.repeat(64);
    let plain = Tokenizer::default();
    let stemming = Tokenizer::new(TokenizerConfig { stemmer: Some("english".into()), ..Default::default() })
        .expect("valid config");
    c.bench_function("tokenize_plain", |b| b.iter(|| plain.tokenize_terms(&text)));
    c.bench_function("tokenize_stemmed", |b| b.iter(|| stemming.tokenize_terms(&text)));
}

criterion_group!(benches, bench_tokenize);
criterion_main!(benches);
