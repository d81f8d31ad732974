//! Integration tests for the transaction lifecycle driven through the hooks


use apmhook_core::backend::AttributeValue;
use apmhook_core::pipeline::{Headers, TransactionRequest, TransactionResponse};
use apmhook_core::plugin::{slots, ATTR_QUERY, FLUSH_SEGMENT};
use apmhook_core::{LifecyclePlugin, RequestContext};
use pretty_assertions::assert_eq;
use test_helpers::{setup, url};

#[test]
fn test_get_request_with_query() {
    let (plugin, backend, log) = setup("orders-gateway");
    let request = TransactionRequest::new("GET", url("http://api.local/orders?id=7"))
        .with_headers(Headers::new().with("Accept", "application/json"));

    let ctx = plugin.on_request_enter(RequestContext::new(), &request);
    let handle = slots::transaction_handle(&ctx).expect("transaction in context");
    assert_eq!(handle.name(), "GET /orders");

    plugin.on_request_exit(ctx, &TransactionResponse::new(200, r#"{"id":7}"#));

    let harvest = backend.harvest();
    assert_eq!(harvest.transactions.len(), 1);
    let txn = &harvest.transactions[0];
    assert_eq!(txn.name, "GET /orders");
    assert_eq!(txn.attributes[ATTR_QUERY], AttributeValue::from("id=7"));
    assert_eq!(
        txn.request.as_ref().unwrap().headers.get("Accept"),
        Some("application/json")
    );
    assert_eq!(txn.response.as_ref().unwrap().status, Some(200));
    assert!(txn.is_finalized());
    assert!(handle.is_closed());
    assert!(log.errors().is_empty());
}

#[test]
fn test_enter_then_exit_records_exactly_one_transaction() {
    let (plugin, backend, _log) = setup("orders-gateway");

    let ctx = plugin.on_request_enter(
        RequestContext::new(),
        &TransactionRequest::new("DELETE", url("http://api.local/orders/7")),
    );
    plugin.on_request_exit(ctx, &TransactionResponse::new(204, ""));

    let stats = backend.stats();
    assert_eq!(stats.transactions_started, 1);
    assert_eq!(stats.transactions_ended, 1);
    assert_eq!(stats.segments_started, stats.segments_ended);

    let harvest = backend.harvest();
    let flush: Vec<_> = harvest.segments_of(&harvest.transactions[0]).collect();
    assert_eq!(flush.len(), 1);
    assert_eq!(flush[0].name, FLUSH_SEGMENT);
}

#[test]
fn test_exit_without_enter_leaves_context_unchanged() {
    let (plugin, backend, log) = setup("orders-gateway");
    let ctx = RequestContext::new().with("host value");

    let out = plugin.on_request_exit(ctx.clone(), &TransactionResponse::new(500, "boom"));

    assert!(out.same_view(&ctx));
    assert_eq!(backend.stats().total(), 0);
    let errors = log.errors();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("transaction"), "{}", errors[0]);
}

#[test]
fn test_enter_keeps_host_values() {
    let (plugin, _backend, _log) = setup("orders-gateway");
    let host = RequestContext::new().with(42_u32);

    let ctx = plugin.on_request_enter(
        host.clone(),
        &TransactionRequest::new("GET", url("http://api.local/")),
    );

    assert_eq!(ctx.get::<u32>(), Some(&42));
    assert!(slots::transaction_handle(&host).is_none());
    assert!(!ctx.same_view(&host));
}

#[test]
fn test_concurrent_requests_are_isolated() {
    let (plugin, backend, log) = setup("orders-gateway");

    std::thread::scope(|scope| {
        for i in 0..8 {
            let plugin = &plugin;
            scope.spawn(move || {
                let path = format!("http://api.local/orders/{i}");
                let ctx = plugin.on_request_enter(
                    RequestContext::new(),
                    &TransactionRequest::new("GET", url(&path)),
                );
                let name = slots::transaction_handle(&ctx).unwrap().name().to_string();
                assert_eq!(name, format!("GET /orders/{i}"));
                plugin.on_request_exit(ctx, &TransactionResponse::new(200, ""));
            });
        }
    });

    let stats = backend.stats();
    assert_eq!(stats.transactions_started, 8);
    assert_eq!(stats.transactions_ended, 8);
    assert!(log.errors().is_empty());
}
