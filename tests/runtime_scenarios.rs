//! End-to-end scenarios through the public API.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{json, Value};
use tagns::{
    BufferingPolicy, CachePolicy, Category, Context, FetchError, Limits, Reference, Runtime,
    RuntimeError, TagGraph,
};

fn wallet_graph() -> TagGraph {
    let mut b = TagGraph::builder("wallet").unwrap();
    b.category("wallet.session", Category::SessionState).unwrap();
    b.node("wallet.session.logged_in").unwrap();
    b.node("wallet.session.active_account").unwrap();
    b.category("wallet.configuration", Category::RemoteConfig)
        .unwrap();
    b.node("wallet.configuration.min_version").unwrap();
    b.collection("wallet.account").unwrap();
    b.node("wallet.account.name").unwrap();
    b.collection("wallet.account.asset").unwrap();
    b.node("wallet.account.asset.amount").unwrap();
    b.node("wallet.market.price").unwrap();
    b.build()
}

fn runtime() -> Runtime {
    init_tracing();
    Runtime::new(wallet_graph(), Limits::default())
}

fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[test]
fn nested_collections_round_trip() {
    let rt = runtime();
    let g = rt.graph().clone();
    let amount = g.tag("wallet.account.asset.amount").unwrap();
    let ctx = Context::new()
        .with(g.tag("wallet.account.id").unwrap(), "acc-1")
        .with(g.tag("wallet.account.asset.id").unwrap(), "btc");

    rt.set(&amount, &ctx, json!("0.5")).unwrap();
    assert_eq!(rt.get::<String>(&amount, &ctx).unwrap(), "0.5");

    // The resolved reference renders with both ids in lineage order.
    let result = rt.fetch(&amount, &ctx);
    let reference = result.metadata().reference.clone().unwrap();
    assert_eq!(reference.to_string(), "wallet.account[acc-1].asset[btc].amount");

    // And parses back to the same reference.
    let parsed = Reference::parse(&g, "wallet.account[acc-1].asset[btc].amount").unwrap();
    assert_eq!(parsed, reference);
}

#[test]
fn indirect_context_binding_follows_session_state() {
    let rt = runtime();
    let g = rt.graph().clone();
    let name = g.tag("wallet.account.name").unwrap();
    let active = g.tag("wallet.session.active_account").unwrap();

    rt.set(&active, &Context::new(), json!("acc-9")).unwrap();
    let ctx = Context::new().with(g.tag("wallet.account.id").unwrap(), active.clone());
    rt.set(&name, &ctx, json!("Savings")).unwrap();

    let direct = Context::new().with(g.tag("wallet.account.id").unwrap(), "acc-9");
    assert_eq!(rt.get::<String>(&name, &direct).unwrap(), "Savings");
}

#[test]
fn mutual_indirection_reports_a_cycle() {
    let mut b = TagGraph::builder("w").unwrap();
    b.collection("w.a").unwrap();
    b.node("w.a.partner").unwrap();
    b.collection("w.b").unwrap();
    b.node("w.b.partner").unwrap();
    let g = b.build();
    let rt = Runtime::new(g.clone(), Limits::default());

    let ctx = Context::new()
        .with(g.tag("w.a.id").unwrap(), g.tag("w.b.partner").unwrap())
        .with(g.tag("w.b.id").unwrap(), g.tag("w.a.partner").unwrap());
    let err = rt
        .get::<String>(&g.tag("w.a.partner").unwrap(), &ctx)
        .unwrap_err();
    assert!(matches!(err, FetchError::ResolutionCycle { .. }));
}

#[test]
fn whole_collection_write_fans_out_and_clears() {
    let rt = runtime();
    let g = rt.graph().clone();
    let account = g.tag("wallet.account").unwrap();
    let name = g.tag("wallet.account.name").unwrap();
    let ctx = Context::new();

    rt.set(
        &account,
        &ctx,
        json!({
            "acc-1": {"name": "Savings"},
            "acc-2": {"name": "Checking"},
        }),
    )
    .unwrap();

    let one = Context::new().with(g.tag("wallet.account.id").unwrap(), "acc-1");
    let two = Context::new().with(g.tag("wallet.account.id").unwrap(), "acc-2");
    assert_eq!(rt.get::<String>(&name, &one).unwrap(), "Savings");
    assert_eq!(rt.get::<String>(&name, &two).unwrap(), "Checking");

    rt.clear(&account, &ctx).unwrap();
    assert!(rt.get::<String>(&name, &one).is_err());
    assert!(rt.get::<String>(&name, &two).is_err());
}

#[test]
fn provider_round_trip_and_replacement() {
    let rt = runtime();
    let g = rt.graph().clone();
    let domain = g.tag("wallet.market").unwrap();
    let price = g.tag("wallet.market.price").unwrap();
    let ctx = Context::new();

    let err = rt.get::<f64>(&price, &ctx).unwrap_err();
    assert!(matches!(err, FetchError::KeyDoesNotExist { .. }));

    rt.register_napi(
        &domain,
        Arc::new(|_: &Reference| -> Result<Value, String> { Ok(json!(101.5)) }),
        CachePolicy::Fresh,
    )
    .unwrap();
    assert_eq!(rt.get::<f64>(&price, &ctx).unwrap(), 101.5);

    // Re-registering the same domain replaces the provider in place.
    rt.register_napi(
        &domain,
        Arc::new(|_: &Reference| -> Result<Value, String> { Ok(json!(99.0)) }),
        CachePolicy::Fresh,
    )
    .unwrap();
    assert_eq!(rt.get::<f64>(&price, &ctx).unwrap(), 99.0);

    // Provider failures surface as value-level errors.
    rt.register_napi(
        &domain,
        Arc::new(|_: &Reference| -> Result<Value, String> { Err("feed offline".into()) }),
        CachePolicy::Fresh,
    )
    .unwrap();
    assert!(matches!(
        rt.get::<f64>(&price, &ctx).unwrap_err(),
        FetchError::Other(_)
    ));
}

#[test]
fn remote_configuration_reaches_readers() {
    let rt = runtime();
    let g = rt.graph().clone();
    let min_version = g.tag("wallet.configuration.min_version").unwrap();
    let reference = Reference::new(min_version.clone());

    rt.install_remote_configuration(BTreeMap::from([(reference.clone(), json!("1.4.0"))]))
        .unwrap();
    assert_eq!(
        rt.get::<String>(&min_version, &Context::new()).unwrap(),
        "1.4.0"
    );

    rt.set_remote_override(reference.clone(), json!("9.9.9"))
        .unwrap();
    assert_eq!(
        rt.get::<String>(&min_version, &Context::new()).unwrap(),
        "9.9.9"
    );
    assert!(rt.clear_remote_override(&reference).unwrap());
    assert_eq!(
        rt.get::<String>(&min_version, &Context::new()).unwrap(),
        "1.4.0"
    );
}

#[test]
fn decode_failure_does_not_end_a_stream() {
    let rt = runtime();
    let g = rt.graph().clone();
    let logged_in = g.tag("wallet.session.logged_in").unwrap();
    let ctx = Context::new();
    let sub = rt.publisher(&logged_in, ctx.clone()).unwrap();
    let _initial = sub.recv().unwrap();

    rt.set(&logged_in, &ctx, json!("not-a-bool")).unwrap();
    let emission = sub.recv().unwrap();
    assert!(matches!(
        emission.decode::<bool>().unwrap_err(),
        FetchError::Decoding { .. }
    ));

    // The stream is still live and delivers the corrected value.
    rt.set(&logged_in, &ctx, json!(true)).unwrap();
    assert!(sub.recv().unwrap().decode::<bool>().unwrap());
}

#[test]
fn switching_current_id_retargets_live_queries() {
    let rt = runtime();
    let g = rt.graph().clone();
    let id = g.tag("wallet.account.id").unwrap();
    let name = g.tag("wallet.account.name").unwrap();
    let ctx = Context::new();

    let one = Context::new().with(id.clone(), "acc-1");
    let two = Context::new().with(id.clone(), "acc-2");
    rt.set(&name, &one, json!("Savings")).unwrap();
    rt.set(&name, &two, json!("Checking")).unwrap();

    // Query with no context: follows the session current-id.
    rt.set(&id, &ctx, json!("acc-1")).unwrap();
    let sub = rt.publisher(&name, ctx.clone()).unwrap();
    assert_eq!(sub.recv().unwrap().as_value(), Some(&json!("Savings")));

    rt.set(&id, &ctx, json!("acc-2")).unwrap();
    assert_eq!(sub.recv().unwrap().as_value(), Some(&json!("Checking")));
}

#[test]
fn slow_stream_keeps_only_the_newest_emissions() {
    let rt = runtime();
    let g = rt.graph().clone();
    let logged_in = g.tag("wallet.session.logged_in").unwrap();
    let ctx = Context::new();
    let sub = rt
        .stream_with(&logged_in, ctx.clone(), BufferingPolicy::Newest(1))
        .unwrap();

    for i in 0..10 {
        rt.set(&logged_in, &ctx, json!(i)).unwrap();
    }
    let newest = sub.recv().unwrap();
    assert_eq!(newest.as_value(), Some(&json!(9)));
    assert!(sub.dropped() > 0);
}

#[test]
fn transaction_limit_and_nesting() {
    let g = wallet_graph();
    let limits = Limits {
        max_ops_per_txn: 2,
        ..Limits::default()
    };
    let rt = Runtime::new(g.clone(), limits);
    let logged_in = g.tag("wallet.session.logged_in").unwrap();
    let active = g.tag("wallet.session.active_account").unwrap();
    let ctx = Context::new();

    rt.transaction(|txn| {
        txn.set(&logged_in, &ctx, json!(true))?;
        // Nested bodies share the parent's buffer.
        txn.transaction(|inner| inner.set(&active, &ctx, json!("acc-1")))
    })
    .unwrap();
    assert!(rt.get::<bool>(&logged_in, &ctx).unwrap());
    assert_eq!(rt.get::<String>(&active, &ctx).unwrap(), "acc-1");

    let err = rt
        .transaction(|txn| {
            txn.set(&logged_in, &ctx, json!(1))?;
            txn.set(&active, &ctx, json!(2))?;
            txn.set(&logged_in, &ctx, json!(3))
        })
        .unwrap_err();
    assert!(matches!(err, RuntimeError::TransactionTooLarge { limit: 2 }));
    // Nothing from the oversized body landed.
    assert!(rt.get::<bool>(&logged_in, &ctx).unwrap());
}
