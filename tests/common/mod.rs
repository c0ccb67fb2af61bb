// tests/common/mod.rs

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use fastbus::Listener;

/// Messages seen by one listener, in arrival order.
pub type Received = Arc<Mutex<Vec<String>>>;

/// A listener that records every payload it receives as UTF-8 text.
pub fn recorder() -> (Listener, Received) {
    // ---
    let seen: Received = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let listener = Listener::new(move |message: Bytes| {
        sink.lock()
            .unwrap()
            .push(String::from_utf8_lossy(&message).into_owned());
    });
    (listener, seen)
}

pub fn snapshot(seen: &Received) -> Vec<String> {
    seen.lock().unwrap().clone()
}

/// Poll until `seen` holds `n` messages or `limit` elapses.
pub async fn wait_for(seen: &Received, n: usize, limit: Duration) -> Vec<String> {
    // ---
    let poll = async {
        loop {
            if seen.lock().unwrap().len() >= n {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    };
    if tokio::time::timeout(limit, poll).await.is_err() {
        log::warn!("timed out waiting for {n} message(s)");
    }
    snapshot(seen)
}

/// Let background tasks drain.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

#[cfg(feature = "logging")]
mod imp {
    use std::sync::Once;

    static INIT: Once = Once::new();

    pub fn init() {
        INIT.call_once(|| {
            let _ = env_logger::builder().is_test(true).try_init();
        });
    }
}

#[cfg(not(feature = "logging"))]
mod imp {
    #[inline]
    pub fn init() {}
}

pub fn init_logging() {
    imp::init();
}
