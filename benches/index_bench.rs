//! Index build and lookup benchmarks
//!
//! - Bulk insert into an identifier index, sequential and shuffled keys
//! - Postings insert with heavily repeated terms
//! - Point lookups against a finalized index with a small cache

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use seqindex::index::{BTreeConfig, IdentifierIndex, PostingsIndex};
use seqindex::{FieldKind, IndexConfig, RecordLocation};
use tempfile::tempdir;

fn tree_config(field: FieldKind, cache_pages: usize) -> BTreeConfig {
    BTreeConfig::from_index_config(&IndexConfig::default(), field, cache_pages)
}

fn bench_identifier_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("identifier_insert");

    for count in [1_000u64, 10_000].iter() {
        group.throughput(Throughput::Elements(*count));

        group.bench_with_input(BenchmarkId::new("sequential", count), count, |b, &count| {
            b.iter_with_setup(
                || tempdir().unwrap(),
                |dir| {
                    let mut index = IdentifierIndex::create(dir.path().join("bench.xac"), tree_config(FieldKind::Accession, 64)).unwrap();
                    for i in 0..count {
                        index.insert(&format!("P{:07}", i), RecordLocation::new(0, i * 100)).unwrap();
                    }
                    index.finalize().unwrap();
                    dir
                },
            );
        });

        group.bench_with_input(BenchmarkId::new("shuffled", count), count, |b, &count| {
            b.iter_with_setup(
                || {
                    let mut keys: Vec<u64> = (0..count).collect();
                    keys.shuffle(&mut rand::rngs::StdRng::seed_from_u64(1));
                    (tempdir().unwrap(), keys)
                },
                |(dir, keys)| {
                    let mut index = IdentifierIndex::create(dir.path().join("bench.xac"), tree_config(FieldKind::Accession, 64)).unwrap();
                    for i in keys {
                        index.insert(&format!("P{:07}", i), RecordLocation::new(0, i * 100)).unwrap();
                    }
                    index.finalize().unwrap();
                    dir
                },
            );
        });
    }

    group.finish();
}

fn bench_postings_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("postings_insert");
    let words = ["protein", "kinase", "hypothetical", "putative", "globin", "membrane", "transport", "binding"];
    let count = 20_000u64;
    group.throughput(Throughput::Elements(count));

    group.bench_function("repeated_terms", |b| {
        b.iter_with_setup(
            || tempdir().unwrap(),
            |dir| {
                let mut index = PostingsIndex::create(dir.path().join("bench.xde"), tree_config(FieldKind::Description, 64)).unwrap();
                for i in 0..count {
                    let word = words[(i % words.len() as u64) as usize];
                    index.insert(word, RecordLocation::new((i % 4) as u32, i * 64)).unwrap();
                }
                index.finalize().unwrap();
                dir
            },
        );
    });

    group.finish();
}

fn bench_lookup(c: &mut Criterion) {
    let mut group = c.benchmark_group("identifier_lookup");
    let count = 50_000u64;

    let dir = tempdir().unwrap();
    let path = dir.path().join("bench.xid");
    {
        let mut index = IdentifierIndex::create(&path, tree_config(FieldKind::Id, 256)).unwrap();
        for i in 0..count {
            index.insert(&format!("SEQ{:07}", i), RecordLocation::new(0, i)).unwrap();
        }
        index.finalize().unwrap();
    }

    for cache_pages in [8usize, 256].iter() {
        group.bench_with_input(BenchmarkId::new("existing_key", cache_pages), cache_pages, |b, &cache_pages| {
            let mut index = IdentifierIndex::open(&path, cache_pages).unwrap();
            let mut i = 0u64;
            b.iter(|| {
                i = (i + 7919) % count;
                black_box(index.lookup(&format!("seq{:07}", i)).unwrap())
            });
        });
    }

    group.bench_function("missing_key", |b| {
        let mut index = IdentifierIndex::open(&path, 256).unwrap();
        b.iter(|| black_box(index.lookup("nosuchid").unwrap()));
    });

    group.finish();
    drop(dir);
}

criterion_group!(benches, bench_identifier_insert, bench_postings_insert, bench_lookup);
criterion_main!(benches);
