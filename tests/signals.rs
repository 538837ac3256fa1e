//! Signal delivery from exported objects to proxies and local consumers.

mod common;

use std::time::Duration;

use common::*;
use futures::StreamExt;
use rebus::{Error, LocalObject, ObjectPath, ProxySignal, Value};

fn pair(a: &str, b: &str) -> Value {
    Value::Struct(vec![Value::Str(a.to_string()), Value::Str(b.to_string())])
}

#[tokio::test]
async fn test_every_consumer_sees_every_emission() {
    let h = harness().await;
    let proxy_signal = h.proxy.signal("test_signal").unwrap();
    let mut remote_a = proxy_signal.catch().await.unwrap();
    let mut remote_b = proxy_signal.catch().await.unwrap();
    let local_signal = h.object.signal("test_signal").unwrap();
    let mut local = local_signal.catch();

    local_signal.emit(("a", "b")).unwrap();
    local_signal.emit(("c", "d")).unwrap();

    for stream in [&mut remote_a, &mut remote_b, &mut local] {
        assert_eq!(stream.recv_timeout(WAIT).await.unwrap(), pair("a", "b"));
        assert_eq!(stream.recv_timeout(WAIT).await.unwrap(), pair("c", "d"));
    }
}

#[tokio::test]
async fn test_concurrent_consumers() {
    let h = harness().await;
    let signal = h.proxy.signal("test_signal").unwrap();
    let mut consumers = Vec::new();
    for _ in 0..4 {
        let stream = signal.catch().await.unwrap();
        consumers.push(tokio::spawn(async move {
            stream
                .take(10)
                .collect::<Vec<Value>>()
                .await
        }));
    }

    let local = h.object.signal("test_signal").unwrap();
    for i in 0..10 {
        local.emit((format!("n{i}"), "x")).unwrap();
    }

    let expected: Vec<Value> = (0..10).map(|i| pair(&format!("n{i}"), "x")).collect();
    for consumer in consumers {
        let seen = tokio::time::timeout(Duration::from_secs(2), consumer)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(seen, expected);
    }
}

#[tokio::test]
async fn test_empty_signal_payload() {
    let h = harness().await;
    let mut caught = h.proxy.signal("empty_signal").unwrap().catch().await.unwrap();
    h.object.signal("empty_signal").unwrap().emit(()).unwrap();
    assert!(caught.recv_timeout(WAIT).await.unwrap().is_unit());
}

#[tokio::test]
async fn test_payload_must_match_signature() {
    let h = harness().await;
    let signal = h.object.signal("test_signal").unwrap();
    assert!(matches!(signal.emit("only one"), Err(Error::Signature { .. })));
    assert!(matches!(signal.emit(()), Err(Error::Signature { .. })));
}

#[tokio::test]
async fn test_dropped_subscription_stops_delivery() {
    let h = harness().await;
    let before = h.bus.match_count();
    let caught = h.proxy.signal("test_signal").unwrap().catch().await.unwrap();
    assert_eq!(h.bus.match_count(), before + 1);
    drop(caught);
    assert_eq!(h.bus.match_count(), before);

    let local = h.object.signal("test_signal").unwrap();
    let stream = local.catch();
    assert_eq!(local.subscriber_count(), 1);
    drop(stream);
    assert_eq!(local.subscriber_count(), 0);
    // Emitting with nobody listening is fine.
    local.emit(("a", "b")).unwrap();
}

#[tokio::test]
async fn test_catch_anywhere_spans_object_paths() {
    let h = harness().await;
    let second = LocalObject::with_errors(&test_type(), TestState::default(), server_errors());
    let other_path = ObjectPath::new("/test/other").unwrap();
    second.export(h.server.clone(), other_path.clone()).await.unwrap();

    let mut on_path = h.proxy.signal("test_signal").unwrap().catch().await.unwrap();
    let mut anywhere = h
        .proxy
        .signal("test_signal")
        .unwrap()
        .catch_anywhere()
        .await
        .unwrap();
    let mut by_type = ProxySignal::anywhere(h.client.as_ref(), &test_type(), "test_signal", None)
        .await
        .unwrap();

    second.signal("test_signal").unwrap().emit(("from", "other")).unwrap();
    h.object.signal("test_signal").unwrap().emit(("from", "test")).unwrap();

    assert_eq!(on_path.recv_timeout(WAIT).await.unwrap(), pair("from", "test"));
    assert!(on_path.try_recv().is_none());

    for stream in [&mut anywhere, &mut by_type] {
        let (path_one, first) = stream.recv_timeout(WAIT).await.unwrap();
        assert_eq!(path_one, other_path);
        assert_eq!(first, pair("from", "other"));
        let (path_two, second) = stream.recv_timeout(WAIT).await.unwrap();
        assert_eq!(path_two, path());
        assert_eq!(second, pair("from", "test"));
    }
}

#[tokio::test]
async fn test_catch_anywhere_on_local_object_is_not_implemented() {
    let h = harness().await;
    let signal = h.object.signal("test_signal").unwrap();
    assert!(matches!(signal.catch_anywhere(), Err(Error::NotImplemented(_))));
}
