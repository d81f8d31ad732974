//! Integration tests for external segments around outbound calls


use anyhow::Result;
use apmhook_core::backend::span::SegmentKind;
use apmhook_core::backend::AttributeValue;
use apmhook_core::pipeline::{
    OutboundRequest, OutboundResponse, TransactionRequest, TransactionResponse,
};
use apmhook_core::plugin::{slots, ATTR_ERROR_DETAIL};
use apmhook_core::{ApmPlugin, LifecyclePlugin, RequestContext};
use pretty_assertions::assert_eq;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use test_helpers::{setup, url, FlakyPayload};

fn open(plugin: &ApmPlugin) -> RequestContext {
    plugin.on_request_enter(
        RequestContext::new(),
        &TransactionRequest::new("GET", url("http://api.local/orders/7")),
    )
}

fn inventory_call() -> OutboundRequest {
    OutboundRequest::new("GET", "https", "inventory.svc", "/items/42")
}

// ============================================================================
// Single calls
// ============================================================================

#[test]
fn test_failed_call_records_error_detail() {
    let (plugin, backend, log) = setup("orders-gateway");
    let ctx = open(&plugin);
    let request = inventory_call();

    let call_ctx = plugin.on_call_start(ctx.clone(), &request);
    let timeout = std::io::Error::new(std::io::ErrorKind::TimedOut, "timeout");
    plugin.on_call_end(
        call_ctx,
        &request,
        &OutboundResponse::new(503, Duration::from_millis(120)),
        Some(&timeout),
    );
    plugin.on_request_exit(ctx, &TransactionResponse::new(502, ""));

    let harvest = backend.harvest();
    let txn = &harvest.transactions[0];
    let external: Vec<_> = harvest
        .segments_of(txn)
        .filter(|s| s.kind == SegmentKind::External)
        .collect();
    assert_eq!(external.len(), 1);

    let segment = external[0];
    assert_eq!(segment.name, "External/inventory.svc/http");
    assert_eq!(
        segment.attributes[ATTR_ERROR_DETAIL],
        AttributeValue::from("timeout")
    );
    let call = segment.external.as_ref().unwrap();
    assert_eq!(call.url, "https://inventory.svc/items/42");
    assert_eq!(call.status, Some(503));
    assert!(log.errors().is_empty());
}

#[test]
fn test_successful_call_has_no_error_detail() {
    let (plugin, backend, _log) = setup("orders-gateway");
    let request = inventory_call();

    let call_ctx = plugin.on_call_start(open(&plugin), &request);
    plugin.on_call_end(
        call_ctx,
        &request,
        &OutboundResponse::new(200, Duration::from_millis(9)),
        None,
    );

    let harvest = backend.harvest();
    let segment = &harvest.segments[0];
    assert!(!segment.attributes.contains_key(ATTR_ERROR_DETAIL));
    assert_eq!(backend.stats().external_segments_ended, 1);
}

#[test]
fn test_response_mapping_failure_still_closes_segment() {
    let (plugin, backend, log) = setup("orders-gateway");
    let request = inventory_call().with_body(FlakyPayload::succeeding(1));

    let call_ctx = plugin.on_call_start(open(&plugin), &request);
    assert!(slots::segment_handle(&call_ctx).is_some());

    let out = plugin.on_call_end(
        call_ctx.clone(),
        &request,
        &OutboundResponse::new(200, Duration::ZERO),
        None,
    );

    assert!(out.same_view(&call_ctx));
    let stats = backend.stats();
    assert_eq!(stats.external_segments_started, 1);
    assert_eq!(stats.external_segments_ended, 1);
    assert_eq!(backend.harvest().segments[0].external.as_ref().unwrap().status, None);

    let errors = log.errors();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("response"), "{}", errors[0]);
}

#[test]
fn test_request_mapping_failure_starts_no_segment() {
    let (plugin, backend, log) = setup("orders-gateway");
    let ctx = open(&plugin);
    let request = inventory_call().with_body(FlakyPayload::succeeding(0));

    let out = plugin.on_call_start(ctx.clone(), &request);

    assert!(out.same_view(&ctx));
    assert_eq!(backend.stats().external_segments_started, 0);
    assert_eq!(log.errors().len(), 1);
}

#[test]
fn test_call_without_transaction_is_not_tracked() {
    let (plugin, backend, log) = setup("orders-gateway");
    let ctx = RequestContext::new();
    let request = inventory_call();

    let call_ctx = plugin.on_call_start(ctx.clone(), &request);
    let out = plugin.on_call_end(
        call_ctx.clone(),
        &request,
        &OutboundResponse::new(200, Duration::ZERO),
        None,
    );

    assert!(call_ctx.same_view(&ctx));
    assert!(out.same_view(&ctx));
    assert_eq!(backend.stats().total(), 0);
    assert!(log.errors().is_empty());
    assert_eq!(log.debugs().len(), 1);
}

#[test]
fn test_call_after_transaction_closed_is_not_tracked() {
    let (plugin, backend, log) = setup("orders-gateway");
    let ctx = open(&plugin);
    plugin.on_request_exit(ctx.clone(), &TransactionResponse::new(200, ""));

    let out = plugin.on_call_start(ctx.clone(), &inventory_call());

    assert!(out.same_view(&ctx));
    assert_eq!(backend.stats().external_segments_started, 0);
    assert!(log.errors().is_empty());
    assert!(log.debugs()[0].contains("already closed"));
}

#[test]
fn test_late_call_end_still_closes_segment() {
    let (plugin, backend, _log) = setup("orders-gateway");
    let ctx = open(&plugin);
    let request = inventory_call();

    let call_ctx = plugin.on_call_start(ctx.clone(), &request);
    plugin.on_request_exit(ctx, &TransactionResponse::new(200, ""));
    plugin.on_call_end(
        call_ctx,
        &request,
        &OutboundResponse::new(200, Duration::from_millis(2)),
        None,
    );

    let stats = backend.stats();
    assert_eq!(stats.transactions_ended, 1);
    assert_eq!(stats.external_segments_ended, 1);
}

// ============================================================================
// Concurrent calls
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_calls_get_separate_segments() -> Result<()> {
    let (plugin, backend, log) = setup("orders-gateway");
    let plugin = Arc::new(plugin);
    let ctx = open(&plugin);

    let mut tasks = Vec::new();
    for i in 0..16 {
        let plugin = Arc::clone(&plugin);
        let ctx = ctx.clone();
        tasks.push(tokio::spawn(async move {
            let request = OutboundRequest::new("GET", "https", "inventory.svc", format!("/items/{i}"));
            let call_ctx = plugin.on_call_start(ctx, &request);
            tokio::time::sleep(Duration::from_millis(16 - i)).await;
            plugin.on_call_end(
                call_ctx,
                &request,
                &OutboundResponse::new(200, Duration::from_millis(16 - i)),
                None,
            );
        }));
    }
    for task in tasks {
        task.await?;
    }
    plugin.on_request_exit(ctx, &TransactionResponse::new(200, ""));

    let stats = backend.stats();
    assert_eq!(stats.external_segments_started, 16);
    assert_eq!(stats.external_segments_ended, 16);
    assert_eq!(stats.transactions_ended, 1);

    let harvest = backend.harvest();
    let scopes: HashSet<u32> = harvest
        .segments
        .iter()
        .filter(|s| s.kind == SegmentKind::External)
        .map(|s| s.scope)
        .collect();
    assert_eq!(scopes.len(), 16);

    let urls: HashSet<String> = harvest
        .segments
        .iter()
        .filter_map(|s| s.external.as_ref().map(|call| call.url.clone()))
        .collect();
    assert_eq!(urls.len(), 16);

    let txn = &harvest.transactions[0];
    let parented = harvest
        .segments_of(txn)
        .filter(|s| s.kind == SegmentKind::External)
        .count();
    assert_eq!(parented, 16);
    assert!(log.errors().is_empty());
    Ok(())
}
