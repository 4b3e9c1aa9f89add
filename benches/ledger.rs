use byteguard::{
    budget::{should_alert, usage_percentage},
    clock::ManualClock,
    store::MemoryStore,
    timezone::TimezoneConfig,
    tracker::{BandwidthTracker, HttpHeader, RequestEvent, size_of},
    types::{AlertState, Domain, TabId, UsageState},
};
use byteguard::notify::RecordingNotifier;
use byteguard::rules::InMemoryRuleEngine;
use chrono::Utc;
use chrono_tz::Tz;
use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use std::hint::black_box;
use std::sync::Arc;

fn create_domains(count: usize) -> Vec<Domain> {
    (0..count)
        .map(|i| Domain::new(format!("host-{i}.example.com")))
        .collect()
}

fn create_requests(count: usize) -> Vec<RequestEvent> {
    (0..count)
        .map(|i| RequestEvent {
            tab_id: (i % 20) as i64,
            url: Some(format!("https://host-{}.example.com/asset/{i}.js", i % 50)),
            response_headers: Some(vec![
                HttpHeader::new("Content-Type", "application/javascript"),
                HttpHeader::new("Content-Length", ((i % 4096) * 37).to_string()),
            ]),
            from_cache: i % 7 == 0,
        })
        .collect()
}

fn benchmark_usage_record(c: &mut Criterion) {
    let mut group = c.benchmark_group("usage_record");

    for domain_count in [10, 100, 1000] {
        let domains = create_domains(domain_count);
        group.bench_with_input(
            BenchmarkId::from_parameter(domain_count),
            &domains,
            |b, domains| {
                b.iter(|| {
                    let mut state = UsageState::default();
                    for (i, domain) in domains.iter().cycle().take(10_000).enumerate() {
                        state.record(TabId::new((i % 32) as u32), domain, 1500, (i % 24) as u32);
                    }
                    black_box(state.total_today)
                });
            },
        );
    }

    group.finish();
}

fn benchmark_size_of(c: &mut Criterion) {
    let requests = create_requests(1000);

    c.bench_function("size_of", |b| {
        b.iter(|| {
            requests
                .iter()
                .map(|r| size_of(black_box(r.response_headers.as_deref()), r.from_cache))
                .sum::<u64>()
        });
    });
}

fn benchmark_alert_decision(c: &mut Criterion) {
    let now = Utc::now();
    let state = AlertState {
        last_alert_time: Some(now),
        last_alert_percentage: 90,
    };

    c.bench_function("should_alert", |b| {
        b.iter(|| {
            (0..10_000u64)
                .filter_map(|total| usage_percentage(total, black_box(5_000)))
                .filter(|p| should_alert(*p, &state, now))
                .count()
        });
    });
}

fn benchmark_pipeline(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let requests = create_requests(1000);

    let mut group = c.benchmark_group("pipeline");
    group.sample_size(20);

    group.bench_function("process_request", |b| {
        b.iter(|| {
            runtime.block_on(async {
                let tracker = BandwidthTracker::start(
                    Arc::new(MemoryStore::new()),
                    Arc::new(InMemoryRuleEngine::new()),
                    Arc::new(RecordingNotifier::new()),
                    Arc::new(ManualClock::new(Utc::now())),
                    TimezoneConfig::new(Tz::UTC),
                )
                .await
                .unwrap();
                for request in &requests {
                    tracker.process_request(request).await.unwrap();
                }
                black_box(tracker.ledger().total_today().await)
            })
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    benchmark_usage_record,
    benchmark_size_of,
    benchmark_alert_decision,
    benchmark_pipeline
);
criterion_main!(benches);
