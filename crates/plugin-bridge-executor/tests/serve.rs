//! Executor behavior over a live transport, driven by hand-built frames.

use std::{sync::Arc, time::Duration};

use plugin_bridge_core::{
    CallRequest, CallResponse, Envelope, PluginMessage, Transport,
    ops::{GetValue, KeyParams, ListKeys, SetValue, SetValueParams},
    RemoteOperation,
};
use plugin_bridge_executor::{Executor, HostApi, HostError, MemoryClientStorage};
use plugin_bridge_transport::ChannelTransport;
use serde_json::{Value, json};
use tokio::time::timeout;

fn eval<P: serde::Serialize>(id: u64, code: &str, params: Option<&P>) -> String {
    let request = CallRequest::new(id, code, params).unwrap();
    Envelope::new(PluginMessage::Eval(request)).encode().unwrap()
}

async fn reply(ui: &ChannelTransport) -> CallResponse {
    let frame = timeout(Duration::from_secs(1), ui.recv())
        .await
        .expect("no reply within a second")
        .unwrap()
        .expect("host end closed");
    Envelope::decode(&frame)
        .unwrap()
        .plugin_message
        .into_response()
        .expect("host sent a request")
}

fn start() -> (ChannelTransport, Executor) {
    let storage = MemoryClientStorage::with_entries([("count", json!(5))]);
    let executor = Executor::with_builtins(HostApi::new(Arc::new(storage)));
    let (ui, host) = ChannelTransport::pair();
    let _serve = executor.spawn_serve(Arc::new(host));
    (ui, executor)
}

#[tokio::test]
async fn test_replies_to_builtin_calls() {
    let (ui, _executor) = start();

    ui.send(eval(1, GetValue::NAME, Some(&KeyParams { key: "count".into() })))
        .await
        .unwrap();
    assert_eq!(reply(&ui).await, CallResponse::success(1, Some(json!(5))));

    ui.send(eval(
        2,
        SetValue::NAME,
        Some(&SetValueParams {
            key: "name".into(),
            value: json!("widget"),
        }),
    ))
    .await
    .unwrap();
    assert_eq!(reply(&ui).await, CallResponse::success(2, Some(json!("widget"))));

    ui.send(eval::<Value>(3, ListKeys::NAME, None)).await.unwrap();
    assert_eq!(
        reply(&ui).await,
        CallResponse::success(3, Some(json!(["count", "name"])))
    );
}

#[tokio::test]
async fn test_ignores_unrelated_traffic() {
    let (ui, _executor) = start();

    ui.send(r#"{"pluginMessage":{"event":"resize"}}"#.into())
        .await
        .unwrap();
    ui.send("not json".into()).await.unwrap();
    ui.send(
        Envelope::new(CallResponse::success(99, None).into())
            .encode()
            .unwrap(),
    )
    .await
    .unwrap();
    ui.send(eval::<Value>(4, ListKeys::NAME, None)).await.unwrap();

    assert_eq!(reply(&ui).await.id(), 4);
}

#[tokio::test]
async fn test_unknown_operation_is_rejected() {
    let (ui, _executor) = start();

    ui.send(eval::<Value>(5, "figma.closePlugin", None))
        .await
        .unwrap();
    assert_eq!(
        reply(&ui).await,
        CallResponse::failure(5, Some("Unknown operation: figma.closePlugin".into()))
    );
}

#[tokio::test]
async fn test_opaque_failure_rejects_without_message() {
    let (ui, executor) = start();
    executor.register_raw("opaque", |_, _| async { Err(HostError::Opaque) });

    ui.send(eval::<Value>(6, "opaque", None)).await.unwrap();
    assert_eq!(reply(&ui).await, CallResponse::failure(6, None));
}

#[tokio::test]
async fn test_slow_calls_do_not_block_fast_ones() {
    let (ui, executor) = start();
    executor.register_raw("slow", |_, arg: Value| async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        Ok(Some(arg))
    });

    ui.send(eval(7, "slow", Some(&json!("late")))).await.unwrap();
    ui.send(eval(8, GetValue::NAME, Some(&KeyParams { key: "count".into() })))
        .await
        .unwrap();

    assert_eq!(reply(&ui).await, CallResponse::success(8, Some(json!(5))));
    assert_eq!(reply(&ui).await, CallResponse::success(7, Some(json!("late"))));
}

#[tokio::test]
async fn test_serve_returns_when_ui_end_drops() {
    let storage = MemoryClientStorage::new();
    let executor = Executor::with_builtins(HostApi::new(Arc::new(storage)));
    let (ui, host) = ChannelTransport::pair();
    let serve = executor.spawn_serve(Arc::new(host));

    drop(ui);
    let result = timeout(Duration::from_secs(1), serve).await.unwrap().unwrap();
    assert!(result.is_ok());
}
