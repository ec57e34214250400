//! End-to-end context flow across executors and future chains.

use std::sync::{Arc, mpsc};

use ambit_core::Runtime;
use ambit_core::testing::TextManager;
use ambit_futures::{ContextAwareExecutor, Executor, FutureBuilder, ThreadPerTask};
use ambit_propagators::{Locale, LocaleManager};

fn text_runtime() -> Arc<Runtime> {
    let runtime = Runtime::new();
    runtime.register(Arc::new(TextManager)).unwrap();
    Arc::new(runtime)
}

#[test]
fn locale_propagates_through_the_executor() {
    let runtime = Runtime::new();
    runtime.register(Arc::new(LocaleManager)).unwrap();
    let pool = ContextAwareExecutor::with_runtime(ThreadPerTask, Arc::new(runtime));

    let outer = LocaleManager::set("nl-NL".parse().unwrap());
    let inner = LocaleManager::set("de-DE".parse().unwrap());

    let (release, latch) = mpsc::channel::<()>();
    let (report, observed) = mpsc::channel();
    pool.execute(Box::new(move || {
        // Hold until the submitter has already closed the inner locale.
        latch.recv().unwrap();
        report
            .send(LocaleManager::current().map(|locale| locale.to_string()))
            .unwrap();
    }));

    inner.close();
    assert_eq!(LocaleManager::current().unwrap().to_string(), "nl-NL");
    release.send(()).unwrap();

    // The task sees the locale as of submission, not as of execution.
    assert_eq!(observed.recv().unwrap().as_deref(), Some("de-DE"));

    outer.close();
    assert_eq!(LocaleManager::current(), None);
}

#[test]
fn submit_returns_the_jobs_value_under_context() {
    let runtime = text_runtime();
    let pool = ContextAwareExecutor::with_runtime(ThreadPerTask, Arc::clone(&runtime));

    let scope = TextManager::set("submitted");
    let future = pool.submit(|| TextManager::current().unwrap());
    scope.close();

    assert_eq!(future.join().unwrap(), "submitted");
}

#[test]
fn a_batch_shares_one_submission_snapshot() {
    let runtime = text_runtime();
    let pool = ContextAwareExecutor::with_runtime(ThreadPerTask, Arc::clone(&runtime));

    let scope = TextManager::set("batched");
    let futures = pool.submit_all((0..4).map(|index| move || {
        format!("{index}:{}", TextManager::current().unwrap())
    }));
    scope.close();

    for (index, future) in futures.iter().enumerate() {
        assert_eq!(future.join().unwrap(), format!("{index}:batched"));
    }
}

#[test]
fn future_chain_sees_the_creation_context() {
    let runtime = text_runtime();

    let vincent = TextManager::set("Vincent");
    let future = FutureBuilder::new()
        .snapshot(runtime.capture())
        .supply(|| TextManager::current().unwrap());

    // Thread A moves on before the continuation is even registered.
    vincent.close();
    let mia = TextManager::set("Mia");

    let chained = future.then_apply_async_on(ThreadPerTask, |value| {
        format!("{value}, {}", TextManager::current().unwrap())
    });

    assert_eq!(chained.join().unwrap(), "Vincent, Vincent");
    mia.close();
}

fn staged_chain(take_new: bool) -> String {
    let runtime = text_runtime();

    let vincent = TextManager::set("Vincent");
    let first = FutureBuilder::new()
        .snapshot(runtime.capture())
        .take_new_snapshots(take_new)
        .supply(|| {
            TextManager::set("Jules").detach();
        });
    vincent.close();

    let second = first.then_apply_async(|_| {
        TextManager::set("Marcellus").detach();
    });
    let third = second.then_apply_async(|_| TextManager::current().unwrap());
    third.join().unwrap()
}

#[test]
fn take_new_snapshot_mode_carries_stage_mutations_onward() {
    assert_eq!(staged_chain(true), "Marcellus");
}

#[test]
fn without_take_new_snapshot_stages_keep_the_original_context() {
    assert_eq!(staged_chain(false), "Vincent");
}

#[test]
fn explicit_snapshot_beats_the_current_context() {
    let runtime = text_runtime();

    let pumpkin = TextManager::set("Pumpkin");
    let snapshot = runtime.capture();
    pumpkin.close();

    let honey = TextManager::set("Honey Bunny");
    let future = FutureBuilder::new()
        .snapshot(snapshot)
        .supply(|| TextManager::current().unwrap());

    assert_eq!(future.join().unwrap(), "Pumpkin");
    honey.close();
}

#[test]
fn then_accept_async_observes_the_value_and_context() {
    let runtime = text_runtime();

    let scope = TextManager::set("Jimmie");
    let future = FutureBuilder::new()
        .snapshot(runtime.capture())
        .supply(|| 19_u32);
    scope.close();

    let (report, observed) = mpsc::channel();
    let done = future.then_accept_async(move |value| {
        report
            .send((*value, TextManager::current().unwrap()))
            .unwrap();
    });

    done.join().unwrap();
    assert_eq!(observed.recv().unwrap(), (19, "Jimmie".to_string()));
}

#[test]
fn combined_futures_run_the_merge_under_the_left_context() {
    let runtime = text_runtime();

    let scope = TextManager::set("left-context");
    let left = FutureBuilder::new()
        .snapshot(runtime.capture())
        .supply(|| 40_u32);
    scope.close();

    let right = FutureBuilder::new()
        .snapshot(runtime.capture())
        .supply(|| 2_u32);

    let merged = left.then_combine(&right, |a, b| {
        format!("{} in {}", a + b, TextManager::current().unwrap())
    });
    assert_eq!(merged.join().unwrap(), "42 in left-context");
}

#[test]
fn then_accept_both_async_consumes_under_the_left_context() {
    let runtime = text_runtime();

    let scope = TextManager::set("pair-context");
    let left = FutureBuilder::new()
        .snapshot(runtime.capture())
        .supply(|| "first".to_string());
    scope.close();

    let right = FutureBuilder::new()
        .snapshot(runtime.capture())
        .supply(|| "second".to_string());

    let (report, observed) = mpsc::channel();
    let done = left.then_accept_both_async(&right, move |a, b| {
        report
            .send(format!("{a}+{b} in {}", TextManager::current().unwrap()))
            .unwrap();
    });

    done.join().unwrap();
    assert_eq!(observed.recv().unwrap(), "first+second in pair-context");
}

#[test]
fn a_custom_executor_is_used_for_async_stages() {
    let runtime = text_runtime();

    // Counts jobs before running them inline on a fresh thread.
    struct Counting {
        submissions: Arc<std::sync::atomic::AtomicUsize>,
    }

    impl Executor for Counting {
        fn execute(&self, job: ambit_futures::Job) {
            self.submissions
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            ThreadPerTask.execute(job);
        }
    }

    let submissions = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let executor = Counting {
        submissions: Arc::clone(&submissions),
    };

    let scope = TextManager::set("counted");
    let future = FutureBuilder::new()
        .snapshot(runtime.capture())
        .executor(executor)
        .supply(|| TextManager::current().unwrap());
    scope.close();

    assert_eq!(future.join().unwrap(), "counted");
    assert_eq!(submissions.load(std::sync::atomic::Ordering::SeqCst), 1);
}
