use better_analytics::query::filters::{compile_filters, QueryFilter};
use better_analytics::query::funnel::{build_funnel_sql, query_funnel, FunnelDefinition};
use better_analytics::query::granularity::Granularity;
use better_analytics::query::journey::{to_sankey, SequentialPath};
use better_analytics::query::metrics::query_core_metrics;
use better_analytics::query::pages::query_pageviews;
use better_analytics::query::scope::QueryScope;
use better_analytics::storage::store::EventStore;
use chrono::{NaiveDate, NaiveDateTime};
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use duckdb::Connection;
use std::hint::black_box;

const SITE: &str = "bench.example.com";
const PAGES: [&str; 6] = ["/", "/pricing", "/docs", "/blog", "/signup", "/welcome"];

fn day(d: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 1, d)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
}

fn filters(n: usize) -> Vec<QueryFilter> {
    let columns = ["url", "device_type", "browser", "country_code", "utm_source"];
    (0..n)
        .map(|i| {
            QueryFilter::new(
                columns[i % columns.len()],
                if i % 2 == 0 { "=" } else { "!=" },
                &format!("value-{i}"),
            )
        })
        .collect()
}

fn funnel(steps: usize, strict: bool) -> FunnelDefinition {
    FunnelDefinition {
        name: Some("bench".to_string()),
        steps: PAGES
            .iter()
            .cycle()
            .take(steps)
            .map(|page| QueryFilter::new("url", "=", page))
            .collect(),
        strict,
    }
}

/// Sessions of 1..=4 pageviews spread over January.
fn seed(conn: &Connection, events: usize) {
    let mut stmt = conn
        .prepare(
            "INSERT INTO events (site_id, visitor_id, session_id, timestamp, url, event_type, device_type)
             VALUES (?, ?, ?, CAST(? AS TIMESTAMP), ?, 'pageview', ?)",
        )
        .unwrap();
    for i in 0..events {
        let session = i / 4;
        let ts = day(1 + u32::try_from(session % 28).unwrap_or(0))
            + chrono::TimeDelta::minutes(i64::try_from(i % 4 + session % 600).unwrap_or(0));
        stmt.execute(duckdb::params![
            SITE,
            format!("visitor-{}", session % 2_000),
            format!("session-{session}"),
            ts.format("%Y-%m-%d %H:%M:%S").to_string(),
            PAGES[(i * 7 + session) % PAGES.len()],
            if session % 3 == 0 { "mobile" } else { "desktop" },
        ])
        .unwrap();
    }
}

fn bench_filter_compile(c: &mut Criterion) {
    let mut group = c.benchmark_group("filter_compile");
    for n in [1, 5, 20] {
        let filters = filters(n);
        group.bench_with_input(BenchmarkId::from_parameter(n), &filters, |b, filters| {
            b.iter(|| compile_filters(black_box(filters)).unwrap());
        });
    }
    group.finish();
}

fn bench_funnel_sql(c: &mut Criterion) {
    let mut group = c.benchmark_group("funnel_sql_build");
    for steps in [2, 4, 8] {
        for strict in [false, true] {
            let definition = funnel(steps, strict);
            let id = format!("{steps}_steps_{}", if strict { "strict" } else { "any_order" });
            group.bench_function(id, |b| {
                b.iter(|| {
                    build_funnel_sql(
                        SITE,
                        black_box(&definition),
                        Some((day(1), day(29))),
                        &[],
                        86_400,
                    )
                    .unwrap()
                    .render()
                });
            });
        }
    }
    group.finish();
}

fn bench_sankey(c: &mut Criterion) {
    let mut group = c.benchmark_group("sankey_transform");
    for n in [25, 250, 2_500] {
        let paths: Vec<SequentialPath> = (0..n)
            .map(|i| SequentialPath {
                path: (0..2 + i % 3)
                    .map(|step| PAGES[(i + step * 5) % PAGES.len()].to_string())
                    .collect(),
                count: 1 + (i as u64 % 17),
            })
            .collect();
        group.bench_with_input(BenchmarkId::from_parameter(n), &paths, |b, paths| {
            b.iter(|| to_sankey(black_box(paths), 3));
        });
    }
    group.finish();
}

fn bench_queries(c: &mut Criterion) {
    let mut group = c.benchmark_group("query_10k");

    // Setup runs once; only the queries are timed.
    let store = EventStore::open(None).unwrap();
    let conn = store.connection().unwrap();
    seed(&conn, 10_000);
    let scope = QueryScope::new(SITE, day(1), day(29));

    group.bench_function("core_metrics", |b| {
        b.iter(|| query_core_metrics(&conn, black_box(&scope)).unwrap());
    });
    group.bench_function("pageviews_hourly", |b| {
        b.iter(|| query_pageviews(&conn, black_box(&scope), Granularity::Hour).unwrap());
    });
    let definition = funnel(3, true);
    group.bench_function("funnel_strict_3", |b| {
        b.iter(|| {
            query_funnel(&conn, SITE, &definition, Some((day(1), day(29))), &[], 86_400).unwrap()
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_filter_compile,
    bench_funnel_sql,
    bench_sankey,
    bench_queries
);
criterion_main!(benches);
