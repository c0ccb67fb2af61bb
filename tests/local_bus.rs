// tests/local_bus.rs

mod common;

use std::time::Duration;

use bytes::Bytes;
use tokio::time::timeout;

use common::{init_logging, recorder, snapshot};
use fastbus::{
    // ---
    create_local_bus,
    BusError,
    BusKind,
};

#[tokio::test]
async fn local_unicast_goes_to_first_listener_then_fails_over() {
    // ---
    // Arrange
    // ---
    init_logging();
    let bus = create_local_bus();
    assert_eq!(bus.kind(), BusKind::Local);

    let (l1, seen1) = recorder();
    let (l2, seen2) = recorder();
    bus.subscribe("hello", l1.clone()).await.unwrap();
    bus.subscribe("hello", l2.clone()).await.unwrap();

    // ---
    // Act
    // ---
    for msg in ["foo", "bar", "baz", "qux"] {
        bus.publish("hello", Bytes::from(msg), false).await;
    }

    // ---
    // Assert
    // ---
    assert_eq!(snapshot(&seen1), ["foo", "bar", "baz", "qux"]);
    assert!(snapshot(&seen2).is_empty());

    assert!(bus.unsubscribe("hello", &l1).await);
    bus.publish("hello", Bytes::from("extra"), false).await;

    assert_eq!(snapshot(&seen1), ["foo", "bar", "baz", "qux"]);
    assert_eq!(snapshot(&seen2), ["extra"]);
}

#[tokio::test]
async fn local_broadcast_reaches_every_listener() {
    // ---
    init_logging();
    let bus = create_local_bus();

    let (l1, seen1) = recorder();
    let (l2, seen2) = recorder();
    bus.subscribe("hello", l1).await.unwrap();
    bus.subscribe("hello", l2).await.unwrap();

    bus.publish("hello", Bytes::from("foo"), true).await;
    bus.publish("hello", Bytes::from("bar"), true).await;

    assert_eq!(snapshot(&seen1), ["foo", "bar"]);
    assert_eq!(snapshot(&seen2), ["foo", "bar"]);
}

#[tokio::test]
async fn local_publish_without_subscriber_is_dropped() {
    // ---
    init_logging();
    let bus = create_local_bus();

    // must neither fail nor block
    timeout(
        Duration::from_millis(100),
        bus.publish("nobody", Bytes::from("lost"), false),
    )
    .await
    .expect("publish blocked");

    // dropped, not buffered for a late subscriber
    let (l1, seen1) = recorder();
    bus.subscribe("nobody", l1).await.unwrap();
    assert!(snapshot(&seen1).is_empty());
}

#[tokio::test]
async fn local_unsubscribe_reports_whether_anything_was_removed() {
    // ---
    init_logging();
    let bus = create_local_bus();

    let (l1, _) = recorder();
    let (stranger, _) = recorder();

    bus.subscribe("t", l1.clone()).await.unwrap();
    bus.subscribe("t", l1.clone()).await.unwrap();
    assert_eq!(bus.listener_count("t"), 2);

    assert!(!bus.unsubscribe("t", &stranger).await);
    assert!(!bus.unsubscribe("other", &l1).await);
    assert!(bus.unsubscribe("t", &l1).await);
    assert_eq!(bus.listener_count("t"), 1);
}

#[tokio::test]
async fn local_unsubscribe_all_scopes() {
    // ---
    init_logging();
    let bus = create_local_bus();

    let (l1, seen1) = recorder();
    let (l2, seen2) = recorder();
    bus.subscribe("a", l1.clone()).await.unwrap();
    bus.subscribe("a", l2.clone()).await.unwrap();
    bus.subscribe("b", l1).await.unwrap();

    assert_eq!(bus.unsubscribe_all(Some("a")).await, 2);
    assert_eq!(bus.unsubscribe_all(Some("a")).await, 0);

    bus.publish("a", Bytes::from("x"), true).await;
    bus.publish("b", Bytes::from("y"), true).await;
    assert_eq!(snapshot(&seen1), ["y"]);
    assert!(snapshot(&seen2).is_empty());

    assert_eq!(bus.unsubscribe_all(None).await, 1);
    assert_eq!(bus.listener_count("b"), 0);
}

#[tokio::test]
async fn local_destroy_is_idempotent_and_silences_listeners() {
    // ---
    init_logging();
    let bus = create_local_bus();

    let (l1, seen1) = recorder();
    bus.subscribe("hello", l1.clone()).await.unwrap();

    bus.destroy().await;
    bus.destroy().await;

    bus.publish("hello", Bytes::from("late"), true).await;
    assert!(snapshot(&seen1).is_empty());

    let err = bus.subscribe("hello", l1).await.unwrap_err();
    assert!(matches!(err, BusError::Destroyed));
}

#[tokio::test]
async fn local_listener_registered_twice_is_called_twice() {
    // ---
    init_logging();
    let bus = create_local_bus();

    let (l1, seen1) = recorder();
    bus.subscribe("dup", l1.clone()).await.unwrap();
    bus.subscribe("dup", l1.clone()).await.unwrap();

    bus.publish("dup", Bytes::from("x"), true).await;
    assert_eq!(snapshot(&seen1), ["x", "x"]);

    // one registration left after a single unsubscribe
    assert!(bus.unsubscribe("dup", &l1).await);
    bus.publish("dup", Bytes::from("z"), true).await;
    assert_eq!(snapshot(&seen1), ["x", "x", "z"]);
}
