use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use wiki_revisions::core::config::CodecConfig;
use wiki_revisions::{DeltaBuilder, DiffCodec};

/// Two revisions of a long page: a paragraph moved, one edited, one appended
fn revision_pair() -> (Vec<char>, Vec<char>) {
    let paragraphs: Vec<String> = (0..200)
        .map(|i| format!("== Section {} ==\nParagraph {} describes the town and its history in some detail.", i, i))
        .collect();
    let before = paragraphs.join("\n\n");

    let mut edited = paragraphs.clone();
    edited.swap(10, 150);
    edited[42].push_str(" A sentence added by a later editor.");
    edited.push("== See also ==\nNeighbouring towns.".to_string());
    let after = edited.join("\n\n");

    (before.chars().collect(), after.chars().collect())
}

fn criterion_benchmark(c: &mut Criterion) {
    let (before, after) = revision_pair();
    let builder = DeltaBuilder::with_minimum_match_length(12);
    let codec = DiffCodec::new(&CodecConfig::default());
    let diff = builder.diff(&before, &after).unwrap();
    let stored = codec.encode(&diff).unwrap();

    let mut group = c.benchmark_group("delta_codec");
    group.throughput(Throughput::Elements(after.len() as u64));
    group.bench_function("build", |b| b.iter(|| builder.diff(black_box(&before), black_box(&after)).unwrap()));
    group.bench_function("encode", |b| b.iter(|| codec.encode(black_box(&diff)).unwrap()));
    group.bench_function("decode", |b| b.iter(|| codec.decode(black_box(&stored)).unwrap()));
    group.bench_function("apply", |b| b.iter(|| diff.apply_chars(black_box(before.clone())).unwrap()));
    group.finish();
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
