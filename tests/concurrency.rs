//! Cross-thread behavior: commit atomicity, emission ordering, wakeups.

use std::thread;
use std::time::Duration;

use serde_json::json;
use tagns::{Category, Context, EventKind, Limits, Runtime, TagGraph};

fn graph() -> TagGraph {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
    let mut b = TagGraph::builder("app").unwrap();
    b.category("app.session", Category::SessionState).unwrap();
    b.node("app.session.counter").unwrap();
    b.collection("app.account").unwrap();
    b.node("app.account.balance").unwrap();
    b.build()
}

#[test]
fn disjoint_transactions_from_many_threads_all_land() {
    let rt = Runtime::new(graph(), Limits::default());
    let g = rt.graph().clone();
    let balance = g.tag("app.account.balance").unwrap();
    let id = g.tag("app.account.id").unwrap();

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let rt = rt.clone();
            let balance = balance.clone();
            let id = id.clone();
            thread::spawn(move || {
                let ctx = Context::new().with(id, format!("acc-{i}"));
                rt.set(&balance, &ctx, json!(i)).unwrap();
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    for i in 0..8 {
        let ctx = Context::new().with(id.clone(), format!("acc-{i}"));
        assert_eq!(rt.get::<i64>(&balance, &ctx).unwrap(), i);
    }
}

#[test]
fn publisher_emissions_are_ordered_under_contention() {
    let rt = Runtime::new(graph(), Limits::default());
    let counter = rt.graph().tag("app.session.counter").unwrap();
    let ctx = Context::new();
    let sub = rt.publisher(&counter, ctx.clone()).unwrap();
    let _initial = sub.recv().unwrap();

    let writer = rt.clone();
    let write_tag = counter.clone();
    let write_ctx = ctx.clone();
    let handle = thread::spawn(move || {
        for i in 0..100 {
            writer.set(&write_tag, &write_ctx, json!(i)).unwrap();
        }
    });

    // Every emission must carry a strictly larger value than the one
    // before it: commits serialize, and each distinct value emits once.
    let mut last = -1i64;
    loop {
        match sub.recv_timeout(Duration::from_secs(5)) {
            Ok(result) => {
                let value = result.decode::<i64>().unwrap();
                assert!(value > last, "{value} after {last}");
                last = value;
                if value == 99 {
                    break;
                }
            }
            Err(err) => panic!("stream stalled: {err}"),
        }
    }
    handle.join().unwrap();
}

#[test]
fn bus_sequence_numbers_are_globally_ordered() {
    let rt = Runtime::new(graph(), Limits::default());
    let g = rt.graph().clone();
    let counter = g.tag("app.session.counter").unwrap();
    let events = rt.on(vec![]).unwrap();

    let posters: Vec<_> = (0..4)
        .map(|_| {
            let rt = rt.clone();
            let tag = counter.clone();
            thread::spawn(move || {
                for _ in 0..25 {
                    rt.post(&tag, Context::new());
                }
            })
        })
        .collect();
    for handle in posters {
        handle.join().unwrap();
    }

    let mut seqs = Vec::new();
    while let Ok(event) = events.try_recv() {
        assert_eq!(event.kind, EventKind::Posted);
        seqs.push(event.seq);
    }
    assert_eq!(seqs.len(), 100);
    let mut sorted = seqs.clone();
    sorted.sort_unstable();
    assert_eq!(seqs, sorted);
}
