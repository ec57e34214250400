//! Snapshot capture/reactivate hot-path benchmarks.

use std::sync::Arc;

use criterion::{Criterion, criterion_group, criterion_main};

use ambit_core::Runtime;
use ambit_core::testing::{TagManager, TextManager};

fn bench_capture(c: &mut Criterion) {
    let runtime = Runtime::new();
    runtime.register(Arc::new(TextManager)).unwrap();
    runtime.register(Arc::new(TagManager::new())).unwrap();

    let _text = TextManager::set("Vincent");
    let _tag = TagManager::set("request-42");

    c.bench_function("capture_two_managers", |b| {
        b.iter(|| runtime.capture());
    });
}

fn bench_reactivate(c: &mut Criterion) {
    let runtime = Runtime::new();
    runtime.register(Arc::new(TextManager)).unwrap();
    runtime.register(Arc::new(TagManager::new())).unwrap();

    let text = TextManager::set("Vincent");
    let tag = TagManager::set("request-42");
    let snapshot = runtime.capture();
    tag.close();
    text.close();

    c.bench_function("reactivate_two_managers", |b| {
        b.iter(|| {
            let reactivation = snapshot.reactivate().unwrap();
            reactivation.close();
        });
    });
}

criterion_group!(benches, bench_capture, bench_reactivate);
criterion_main!(benches);
