//! Catalog matching and request pipeline throughput.
//!
//! Run with: cargo bench -p tg-core --bench matching

use std::time::Duration;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use tg_core::catalog::{Catalogs, Tracker, TrackerCatalog, TrackerCatalogBuilder};
use tg_core::{MemoryConfigStore, RequestDetails, RequestPipeline, RequestType};

const TRACKERS: u32 = 2_000;

/// Mix of tracker and non-tracker requests
const URLS: &[&str] = &[
    "https://tracker42.net/pixel.gif",
    "https://cdn.tracker1500.net/sdk/v2/loader.js",
    "https://static.example.com/app.js",
    "https://images.example.com/photo.jpg?w=800",
    "https://stats.example.org/collect/tracking/beacon?id=1",
    "https://fonts.example.net/font.woff2",
    "https://a.b.c.tracker999.net/t.js#frag",
];

fn catalog() -> TrackerCatalog {
    let mut builder = TrackerCatalogBuilder::new();
    for id in 0..TRACKERS {
        builder.add_tracker(Tracker {
            id,
            name: format!("Tracker {id}"),
            category: "advertising".to_string(),
            tags: Vec::new(),
        });
        builder.add_pattern(id, id).unwrap();
        if id % 3 == 0 {
            builder.add_host_path(&format!("tracker{id}.net"), "sdk/", id);
        }
        builder.add_host(&format!("tracker{id}.net"), id);
    }
    builder.add_path("/collect/tracking/", 7);
    builder.add_regex(11, r"^https?://[^/]+/beacon\d+\.js").unwrap();
    builder.build().unwrap()
}

fn bench_match_url(c: &mut Criterion) {
    let catalog = catalog();
    let mut group = c.benchmark_group("match_url");
    group.measurement_time(Duration::from_secs(5));
    group.throughput(Throughput::Elements(URLS.len() as u64));

    group.bench_function("mixed", |b| {
        b.iter(|| {
            for url in URLS {
                std::hint::black_box(catalog.match_url(std::hint::black_box(url), Some("https://www.example.com/")));
            }
        });
    });

    for url in URLS {
        group.bench_with_input(BenchmarkId::new("single", url), url, |b, url| {
            b.iter(|| catalog.match_url(std::hint::black_box(url), None));
        });
    }

    group.finish();
}

fn bench_pipeline(c: &mut Criterion) {
    let mut catalogs = Catalogs::new();
    catalogs.trackers = catalog();
    let mut pipeline = RequestPipeline::new(MemoryConfigStore::new(), catalogs);
    pipeline.on_before_navigate(1, 0, "https://www.example.com/", 0);
    pipeline.on_navigation_committed(1, 0, "https://www.example.com/", "link", false, 0);

    let mut group = c.benchmark_group("pipeline");
    group.throughput(Throughput::Elements(URLS.len() as u64));
    group.bench_function("on_before_request", |b| {
        b.iter(|| {
            for (i, url) in URLS.iter().enumerate() {
                let id = i.to_string();
                let details = RequestDetails {
                    tab_id: 1,
                    frame_id: 0,
                    request_id: &id,
                    url,
                    request_type: RequestType::SCRIPT,
                    timestamp: 100,
                    tab_url: None,
                };
                std::hint::black_box(pipeline.on_before_request(&details));
            }
            // Keep the queue from growing across iterations
            pipeline.run_deferred(&mut tg_core::BufferedBrowser::new());
        });
    });
    group.finish();
}

criterion_group!(benches, bench_match_url, bench_pipeline);
criterion_main!(benches);
