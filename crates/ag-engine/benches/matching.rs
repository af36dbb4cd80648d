//! Matching benchmarks.
//!
//! Run with: cargo bench -p ag-engine

use ag_engine::Engine;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

/// Synthetic list mixing hostname, token, regex, exception and cosmetic rules.
fn generate_rules(count: usize) -> String {
    let mut rules = String::new();
    for i in 0..count {
        let line = match i % 8 {
            0 => format!("||ads{i}.example.com^"),
            1 => format!("||cdn.example.net/banner{i}/*$image,third-party"),
            2 => format!("/track{i}.gif$image"),
            3 => format!("@@||ads{}.example.com/allowed.js", i - 3),
            4 => format!("||tracker{i}.example.org^$script,domain=news{i}.example.com|~m.news{i}.example.com"),
            5 => format!(r"/^https?:\/\/pixel{i}\.example\.io\//"),
            6 => format!("site{i}.example.com##.ad-slot-{i}"),
            _ => format!("##.promo-{i}"),
        };
        rules.push_str(&line);
        rules.push('\n');
    }
    rules
}

fn generate_urls(count: usize) -> Vec<String> {
    (0..count)
        .map(|i| match i % 4 {
            0 => format!("https://ads{}.example.com/ad.js", i * 8),
            1 => format!("https://cdn.example.net/banner{}/x.png", i * 8 + 1),
            2 => format!("https://static.example.org/lib/{i}/app.js"),
            _ => format!("https://www.example.com/track{}.gif?x={i}", i * 8 + 2),
        })
        .collect()
}

fn bench_check_network_request(c: &mut Criterion) {
    let mut group = c.benchmark_group("check_network_request");

    for &size in &[1_000usize, 10_000, 50_000] {
        let engine = Engine::from_rules(&generate_rules(size));
        let urls = generate_urls(1_000);

        group.throughput(Throughput::Elements(urls.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &urls, |b, urls| {
            b.iter(|| {
                for url in urls {
                    black_box(engine.check_network_request(
                        black_box(url),
                        "",
                        "news.example.com",
                        true,
                        "image",
                    ));
                }
            })
        });
    }

    group.finish();
}

fn bench_cosmetics(c: &mut Criterion) {
    let engine = Engine::from_rules(&generate_rules(10_000));
    let classes: Vec<String> = (0..200).map(|i| format!("promo-{}", i * 8 + 7)).collect();
    let ids: Vec<String> = (0..50).map(|i| format!("id-{i}")).collect();

    c.bench_function("hostname_cosmetic_resources", |b| {
        b.iter(|| black_box(engine.hostname_cosmetic_resources(black_box("www.site6.example.com"))))
    });

    c.bench_function("class_id_stylesheet", |b| {
        b.iter(|| black_box(engine.class_id_stylesheet(&classes, &ids, &[] as &[&str])))
    });
}

fn bench_load(c: &mut Criterion) {
    let rules = generate_rules(10_000);
    let snapshot = Engine::from_rules(&rules).serialize();

    c.bench_function("parse_and_index_10k", |b| b.iter(|| black_box(Engine::from_rules(black_box(&rules)))));

    c.bench_function("deserialize_10k", |b| {
        b.iter(|| {
            let mut engine = Engine::default();
            engine.deserialize(black_box(&snapshot)).ok();
            black_box(engine)
        })
    });
}

criterion_group!(benches, bench_check_network_request, bench_cosmetics, bench_load);
criterion_main!(benches);
