//! Method round trips between a proxy and an exported object.

mod common;

use std::sync::atomic::Ordering;
use std::time::Duration;

use common::*;
use rebus::exceptions::builtin::{Failed, FileExists};
use rebus::exceptions::BusError;
use rebus::{Error, Transport, TransportError, Value};

#[tokio::test]
async fn test_method_round_trip() {
    let h = harness().await;
    let upper: String = h.proxy.call_typed("upper", ("test",)).await.unwrap();
    assert_eq!(upper, "TEST");

    let value: i32 = h.proxy.call_typed("test_int", ()).await.unwrap();
    assert_eq!(value, 1);
}

#[tokio::test]
async fn test_sender_is_caller_unique_name() {
    let h = harness().await;
    let sender: String = h.proxy.call_typed("get_sender", ()).await.unwrap();
    assert_eq!(sender, h.client.unique_name());

    // Outside a bus call there is no sender.
    let local: String = h.object.call_local_typed("get_sender", ()).await.unwrap();
    assert_eq!(local, "");
}

#[tokio::test]
async fn test_named_arguments_are_positional() {
    let h = harness().await;
    let joined: String = h
        .proxy
        .call_typed("kwargs_function", ("ab", 3i32))
        .await
        .unwrap();
    assert_eq!(joined, "ababab");
}

#[tokio::test]
async fn test_struct_return_and_unit_results() {
    let h = harness().await;
    let pair: (String, String) = h.proxy.call_typed("test_struct_return", ()).await.unwrap();
    assert_eq!(pair, ("hello".to_string(), "world".to_string()));

    let none = h.proxy.call("returns_none_method", ()).await.unwrap();
    assert!(none.is_unit());
}

#[tokio::test]
async fn test_unregistered_error_uses_fallback_name() {
    let h = harness().await;
    let err = h.proxy.call("raise_base_exception", ()).await.unwrap_err();
    assert_eq!(err.remote_name(), Some(Failed::NAME));
    assert_eq!(err.downcast_remote::<Failed>().unwrap().message, "base");
}

#[tokio::test]
async fn test_builtin_error_maps_to_local_type() {
    let h = harness().await;
    let err = h.proxy.call("raise_derived_exception", ()).await.unwrap_err();
    assert_eq!(err.remote_name(), Some(FileExists::NAME));
    assert!(err.downcast_remote::<FileExists>().is_some());
}

#[tokio::test]
async fn test_custom_error_maps_to_local_type() {
    let h = harness().await;
    let err = h.proxy.call("raise_custom_error", ()).await.unwrap_err();
    assert_eq!(err.remote_name(), Some("org.example.Error"));
    let custom = err.downcast_remote::<CustomError>().unwrap();
    assert_eq!(custom.message, "custom");
}

#[tokio::test]
async fn test_unknown_remote_error_stays_unmapped() {
    let h = harness().await;
    let err = h.proxy.call("raise_and_unmap_error", ()).await.unwrap_err();
    match err {
        Error::UnmappedRemote { name, message } => {
            assert_eq!(name, "org.example.Nothing");
            assert_eq!(message, "unmapped");
        }
        other => panic!("expected an unmapped error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_no_reply_method() {
    let h = harness().await;
    assert!(h.proxy.call("no_reply_method", ()).await.unwrap().is_unit());

    for _ in 0..50 {
        if h.object.state().no_reply_calls.load(Ordering::SeqCst) == 1 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("no-reply method was never served");
}

#[tokio::test]
async fn test_argument_mismatch_fails_before_sending() {
    let h = harness().await;
    let err = h.proxy.call("upper", (5i32,)).await.unwrap_err();
    assert!(matches!(err, Error::Signature { .. }));

    let err = h.proxy.call("upper", ("a", "b")).await.unwrap_err();
    assert!(matches!(err, Error::Signature { .. }));
}

#[tokio::test]
async fn test_closing_the_connection_fails_pending_calls() {
    let h = harness().await;
    let pending = {
        let proxy = &h.proxy;
        async move { proxy.call("looong_method", ()).await }
    };
    let closer = async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        h.client.close();
    };
    let (result, ()) = tokio::join!(pending, closer);
    assert!(matches!(
        result,
        Err(Error::Transport(TransportError::Closed))
    ));

    // Later calls fail straight away.
    let err = h.proxy.call("upper", ("x",)).await.unwrap_err();
    assert!(matches!(err, Error::Transport(TransportError::Closed)));
}

#[tokio::test]
async fn test_removed_object_reports_unknown_object() {
    let h = harness().await;
    assert_eq!(h.proxy.call("upper", ("a",)).await.unwrap(), Value::Str("A".into()));

    let Harness { object, proxy, .. } = h;
    drop(object);
    let err = proxy.call("upper", ("a",)).await.unwrap_err();
    assert!(matches!(err, Error::UnknownObject { .. }));
}

#[tokio::test]
async fn test_proxy_to_missing_service() {
    let h = harness().await;
    let proxy = rebus::Proxy::new(
        h.client.clone(),
        test_type().shared_registry(),
        "org.test.nobody",
        path(),
    )
    .unwrap();
    let err = proxy.call("upper", ("a",)).await.unwrap_err();
    assert!(matches!(err, Error::UnknownObject { .. }));
}
