// tests/bus_builder.rs
//
// These tests never set FASTBUS_TRANSPORT; see tests/transport_env.rs.

mod common;

use std::time::Duration;

use bytes::Bytes;

use common::{init_logging, recorder, wait_for};
use fastbus::{
    // ---
    BusBuilder,
    BusError,
    BusKind,
    MemoryKeyspace,
    MemoryPubSub,
};

const WAIT: Duration = Duration::from_millis(500);

#[tokio::test]
async fn builder_explicit_local() {
    // ---
    init_logging();
    let bus = BusBuilder::new()
        .transport_type("memory")
        .build()
        .await
        .expect("failed to build local bus");

    assert_eq!(bus.kind(), BusKind::Local);
}

#[tokio::test]
async fn builder_explicit_tag_beats_shape() {
    // ---
    init_logging();
    let store = MemoryKeyspace::new();
    let bus = BusBuilder::new()
        .kind(BusKind::Local)
        .keyspace_connector(store.connector())
        .build()
        .await
        .unwrap();

    assert_eq!(bus.kind(), BusKind::Local);
}

#[tokio::test]
async fn builder_infers_keyspace_from_connector() {
    // ---
    init_logging();
    let store = MemoryKeyspace::new();
    let bus = BusBuilder::new()
        .prefix("app")
        .db(4)
        .keyspace_connector(store.connector())
        .build()
        .await
        .unwrap();
    assert_eq!(bus.kind(), BusKind::Keyspace);

    let (l1, seen1) = recorder();
    bus.subscribe("hello", l1).await.unwrap();
    store.lpush("app:4:hello", Bytes::from("queued"));
    bus.publish("hello", Bytes::from("fresh"), false).await;

    // the channel name carries prefix and db
    assert_eq!(wait_for(&seen1, 1, WAIT).await, ["queued"]);

    bus.destroy().await;
}

#[tokio::test]
async fn builder_infers_managed_from_connector() {
    // ---
    init_logging();
    let service = MemoryPubSub::new();
    service.create_topic("t.hello");
    service.create_subscription("t.hello", "s.hello").unwrap();

    let bus = BusBuilder::new()
        .topic_prefix("t.")
        .subscription_prefix("s.")
        .managed_connector(service.connector())
        .build()
        .await
        .unwrap();
    assert_eq!(bus.kind(), BusKind::Managed);

    let (l1, seen1) = recorder();
    bus.subscribe("hello", l1).await.unwrap();
    bus.publish("hello", Bytes::from("hi"), false).await;

    assert_eq!(wait_for(&seen1, 1, WAIT).await, ["hi"]);
    assert_eq!(service.acked("s.hello"), 1);

    bus.destroy().await;
}

#[tokio::test]
async fn builder_without_transport_fails() {
    // ---
    init_logging();
    let err = BusBuilder::new().build().await.err().expect("build succeeded");
    assert!(matches!(err, BusError::NoTransport));
}

#[tokio::test]
async fn builder_with_both_connectors_is_ambiguous() {
    // ---
    init_logging();
    let err = BusBuilder::new()
        .keyspace_connector(MemoryKeyspace::new().connector())
        .managed_connector(MemoryPubSub::new().connector())
        .build()
        .await
        .err()
        .expect("build succeeded");

    assert!(matches!(err, BusError::AmbiguousTransport(_)));
}

#[tokio::test]
async fn builder_unknown_tag_fails() {
    // ---
    init_logging();
    let err = BusBuilder::new()
        .transport_type("carrier-pigeon")
        .build()
        .await
        .err()
        .expect("build succeeded");

    assert!(matches!(err, BusError::UnknownTransport(_)));
}

#[tokio::test]
async fn builder_managed_requires_connector() {
    // ---
    init_logging();
    let err = BusBuilder::new()
        .transport_type("pubsub")
        .build()
        .await
        .err()
        .expect("build succeeded");

    assert!(matches!(err, BusError::MissingConfig(_)));
}
