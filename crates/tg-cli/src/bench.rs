use std::cmp::Ordering;
use std::path::Path;
use std::time::Instant;

use clap::ValueEnum;
use tg_core::catalog::Catalogs;
use tg_core::types::{RequestDetails, RequestType, TabId, Verdict};
use tg_core::{BufferedBrowser, RequestPipeline};

use crate::database::{self, DatabasePaths};
use crate::simulate::{parse_trace, TraceEvent};

#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
pub enum BenchMode {
    /// Catalog lookup only
    Match,
    /// Full before-request hook: match, policy, smart blocking
    Pipeline,
    Both,
}

pub struct BenchOptions {
    pub databases: DatabasePaths,
    pub settings_path: Option<String>,
    pub mode: BenchMode,
    pub iterations: usize,
    pub warmup_ops: usize,
    pub sample_batch_ops: usize,
    pub trace_path: Option<String>,
    pub synthetic_pages: usize,
    pub synthetic_reqs_per_page: usize,
    pub seed: u32,
}

#[derive(Clone)]
struct BenchRequest {
    tab_id: TabId,
    page_url: String,
    url: String,
    request_type: RequestType,
    request_id: String,
}

struct BenchResult {
    name: String,
    op_count: usize,
    total_ms: f64,
    avg_us: f64,
    p50_us: f64,
    p95_us: f64,
    p99_us: f64,
    ops_per_sec: u64,
    hit_pct: f64,
}

/// Per-request latency budget of the blocking hook
const BUDGET_P99_US: f64 = 1000.0;

pub fn run_bench(opts: BenchOptions) -> Result<(), String> {
    println!("========================================================================");
    println!("Trackguard Benchmark");
    println!("========================================================================");
    println!("Database: {}", opts.databases.bugs);
    println!("Mode: {:?}", opts.mode);
    println!("Iterations: {}", opts.iterations);
    println!("Warmup ops: {}", opts.warmup_ops);
    println!("Sample batch ops: {}", opts.sample_batch_ops);
    println!();

    let mut config = database::read_settings(opts.settings_path.as_deref())?;
    let mut catalogs = Catalogs::new();
    let stats = database::load_catalogs(&opts.databases, &mut catalogs, &mut config, false)?;
    let catalog_stats = catalogs.trackers.stats();
    println!(
        "Loaded {} trackers, {} patterns in {:.1}ms",
        catalog_stats.trackers, catalog_stats.patterns, stats.total_ms
    );

    let requests = if let Some(path) = &opts.trace_path {
        println!("Loading trace: {}", path);
        load_trace(path)?
    } else {
        println!(
            "Generating synthetic workload: pages={}, reqs/page={}, seed={}",
            opts.synthetic_pages, opts.synthetic_reqs_per_page, opts.seed
        );
        generate_synthetic_workload(opts.synthetic_pages, opts.synthetic_reqs_per_page, opts.seed)
    };
    println!("Dataset size: {} requests", requests.len());
    println!();

    let mut pipeline = RequestPipeline::new(config, catalogs);
    let mut now = 0u64;

    println!("Warming up...");
    let loops = if requests.is_empty() { 0 } else { opts.warmup_ops / requests.len() + 1 };
    for _ in 0..loops {
        for req in &requests {
            let _ = pipeline.catalogs().trackers.match_url(&req.url, Some(&req.page_url));
        }
    }
    println!("Warmup done.");
    println!();

    let mut results = Vec::new();

    if opts.mode == BenchMode::Match || opts.mode == BenchMode::Both {
        let catalogs = pipeline.catalogs();
        let result = run_bench_batched(
            "match_url (catalog)",
            &requests,
            opts.iterations,
            opts.sample_batch_ops,
            |req| catalogs.trackers.match_url(&req.url, Some(&req.page_url)).is_some(),
        );
        println!("{}", format_result(&result));
        println!();
        results.push(result);
    }

    if opts.mode == BenchMode::Pipeline || opts.mode == BenchMode::Both {
        let mut current: Option<(TabId, String)> = None;
        let mut browser = BufferedBrowser::new();
        let result = run_bench_batched(
            "on_before_request (pipeline)",
            &requests,
            opts.iterations,
            opts.sample_batch_ops,
            |req| {
                now += 1;
                // New page whenever the workload moves on
                if current.as_ref().map_or(true, |(tab, page)| *tab != req.tab_id || *page != req.page_url) {
                    pipeline.run_deferred(&mut browser);
                    browser.take();
                    pipeline.on_before_navigate(req.tab_id, 0, &req.page_url, now);
                    pipeline.on_navigation_committed(req.tab_id, 0, &req.page_url, "link", false, now);
                    current = Some((req.tab_id, req.page_url.clone()));
                }
                let details = RequestDetails {
                    tab_id: req.tab_id,
                    frame_id: 0,
                    request_id: &req.request_id,
                    url: &req.url,
                    request_type: req.request_type,
                    timestamp: now,
                    tab_url: None,
                };
                pipeline.on_before_request(&details) != Verdict::Allow
            },
        );
        println!("{}", format_result(&result));
        println!();
        results.push(result);
    }

    println!("Summary:");
    for result in &results {
        println!(
            "  {:<32} P99 {:.2}us  {}",
            result.name,
            result.p99_us,
            if result.p99_us < BUDGET_P99_US { "PASS" } else { "FAIL" }
        );
    }
    println!("Target: <{:.0}us P99 per request", BUDGET_P99_US);

    Ok(())
}

fn run_bench_batched(
    name: &str,
    requests: &[BenchRequest],
    iterations: usize,
    sample_batch_ops: usize,
    mut f: impl FnMut(&BenchRequest) -> bool,
) -> BenchResult {
    let sample_batch_ops = sample_batch_ops.max(1);
    let mut samples_us = Vec::new();
    let mut hits = 0usize;
    let total_ops = requests.len() * iterations.max(1);

    let mut batch_ops = 0usize;
    let mut batch_start = Instant::now();
    let start = Instant::now();

    for _ in 0..iterations.max(1) {
        for req in requests {
            if std::hint::black_box(f(req)) {
                hits += 1;
            }
            batch_ops += 1;
            if batch_ops == sample_batch_ops {
                let us_per_op = batch_start.elapsed().as_secs_f64() * 1_000_000.0 / sample_batch_ops as f64;
                samples_us.push(us_per_op);
                batch_ops = 0;
                batch_start = Instant::now();
            }
        }
    }

    let total_ms = start.elapsed().as_secs_f64() * 1000.0;
    samples_us.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));

    BenchResult {
        name: name.to_string(),
        op_count: total_ops,
        total_ms,
        avg_us: if total_ops == 0 { 0.0 } else { total_ms * 1000.0 / total_ops as f64 },
        p50_us: percentile(&samples_us, 0.50),
        p95_us: percentile(&samples_us, 0.95),
        p99_us: percentile(&samples_us, 0.99),
        ops_per_sec: if total_ms > 0.0 { (total_ops as f64 / (total_ms / 1000.0)) as u64 } else { 0 },
        hit_pct: if total_ops > 0 { (hits as f64 / total_ops as f64) * 100.0 } else { 0.0 },
    }
}

fn format_result(result: &BenchResult) -> String {
    format!(
        "{}:\n  Ops: {}\n  Total: {:.2} ms\n  Avg: {:.2} us\n  P50: {:.2} us\n  P95: {:.2} us\n  P99: {:.2} us\n  Throughput: {} ops/sec\n  Tracker hits: {:.1}%",
        result.name,
        result.op_count,
        result.total_ms,
        result.avg_us,
        result.p50_us,
        result.p95_us,
        result.p99_us,
        result.ops_per_sec,
        result.hit_pct,
    )
}

fn percentile(values: &[f64], p: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let idx = ((values.len() as f64) * p).ceil() as usize;
    let idx = idx.saturating_sub(1).min(values.len() - 1);
    values[idx]
}

/// Requests of a `simulate` trace. The page is the last committed URL of
/// the request's tab, or the request's own `tabUrl`.
fn load_trace(path: &str) -> Result<Vec<BenchRequest>, String> {
    let events = parse_trace(&database::read_document(Path::new(path))?)?;
    let mut pages: std::collections::HashMap<TabId, String> = std::collections::HashMap::new();
    let mut out = Vec::new();

    for event in events {
        match event {
            TraceEvent::NavigationCommitted { tab_id, frame_id: 0, url, .. } => {
                pages.insert(tab_id, url);
            }
            TraceEvent::BeforeRequest {
                tab_id,
                request_id,
                url,
                request_type,
                tab_url,
                ..
            } => {
                let Some(page_url) = tab_url.or_else(|| pages.get(&tab_id).cloned()) else {
                    continue;
                };
                out.push(BenchRequest {
                    tab_id,
                    page_url,
                    url,
                    request_type: RequestType::from_str(&request_type),
                    request_id,
                });
            }
            _ => {}
        }
    }

    if out.is_empty() {
        return Err(format!("Trace loaded 0 requests from {}", path));
    }
    Ok(out)
}

const TOP_SITES: &[&str] = &[
    "www.cnn.com",
    "www.nytimes.com",
    "www.theguardian.com",
    "www.reddit.com",
    "www.youtube.com",
    "github.com",
    "www.amazon.com",
    "en.wikipedia.org",
];

const TRACKER_HOSTS: &[&str] = &[
    "stats.g.doubleclick.net",
    "ad.doubleclick.net",
    "www.google-analytics.com",
    "connect.facebook.net",
    "pagead2.googlesyndication.com",
    "www.googletagmanager.com",
    "sb.scorecardresearch.com",
    "cdn.taboola.com",
    "static.chartbeat.com",
    "platform.twitter.com",
];

const FIRST_PARTY_PATHS: &[&str] = &[
    "/",
    "/assets/main.js",
    "/static/app.css",
    "/images/hero.jpg",
    "/api/v1/feed",
    "/fonts/inter.woff2",
];

const TRACKER_PATHS: &[&str] = &[
    "/analytics.js",
    "/gtm.js",
    "/tr/",
    "/en_US/fbevents.js",
    "/pagead/js/adsbygoogle.js",
    "/collect",
    "/beacon.js",
    "/pixel.gif",
];

const REQUEST_TYPES: &[(&str, u32)] = &[
    ("script", 35),
    ("image", 30),
    ("xmlhttprequest", 15),
    ("stylesheet", 8),
    ("sub_frame", 5),
    ("font", 4),
    ("ping", 3),
];

pub const DEFAULT_SEED: u32 = 0xc0ffee;

fn create_rng(seed: u32) -> impl FnMut() -> f64 {
    let mut state = seed;
    move || {
        state = state.wrapping_mul(1664525).wrapping_add(1013904223);
        (state as f64) / (u32::MAX as f64)
    }
}

fn pick<T: Clone>(items: &[T], rand: &mut impl FnMut() -> f64) -> T {
    let idx = (rand() * items.len() as f64).floor() as usize;
    items[idx.min(items.len() - 1)].clone()
}

fn weighted_pick<'a>(items: &'a [(&'a str, u32)], rand: &mut impl FnMut() -> f64) -> &'a str {
    let total: u32 = items.iter().map(|(_, w)| *w).sum();
    let mut target = rand() * total as f64;
    for (item, weight) in items {
        if target < *weight as f64 {
            return item;
        }
        target -= *weight as f64;
    }
    items[items.len() - 1].0
}

fn generate_synthetic_workload(pages: usize, reqs_per_page: usize, seed: u32) -> Vec<BenchRequest> {
    let mut rng = create_rng(seed);
    let mut out = Vec::with_capacity(pages * reqs_per_page);
    let mut request_id = 0u64;

    for page in 0..pages {
        let site = pick(TOP_SITES, &mut rng);
        let page_url = format!("https://{}/article/{}", site, page);
        let tab_id = (page % 8) as TabId + 1;

        for _ in 0..reqs_per_page {
            request_id += 1;
            let url = if rng() < 0.35 {
                format!("https://{}{}", pick(TRACKER_HOSTS, &mut rng), pick(TRACKER_PATHS, &mut rng))
            } else {
                format!("https://{}{}?v={}", site, pick(FIRST_PARTY_PATHS, &mut rng), request_id % 97)
            };
            out.push(BenchRequest {
                tab_id,
                page_url: page_url.clone(),
                url,
                request_type: RequestType::from_str(weighted_pick(REQUEST_TYPES, &mut rng)),
                request_id: request_id.to_string(),
            });
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthetic_workload_is_deterministic() {
        let a = generate_synthetic_workload(3, 10, DEFAULT_SEED);
        let b = generate_synthetic_workload(3, 10, DEFAULT_SEED);
        assert_eq!(a.len(), 30);
        assert!(a.iter().zip(&b).all(|(x, y)| x.url == y.url && x.request_type == y.request_type));
    }

    #[test]
    fn percentile_of_sorted_samples() {
        let values = [1.0, 2.0, 3.0, 4.0];
        assert_eq!(percentile(&values, 0.50), 2.0);
        assert_eq!(percentile(&values, 0.99), 4.0);
        assert_eq!(percentile(&[], 0.5), 0.0);
    }
}
