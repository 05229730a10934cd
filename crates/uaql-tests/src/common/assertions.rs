// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # Async Assertions

use std::future::Future;
use std::time::Duration;

use uaql_opcua::{Notification, NotificationStream, Variant};

/// Awaits `future`, panicking if it does not finish within `timeout`.
pub async fn within<F: Future>(timeout: Duration, future: F) -> F::Output {
    tokio::time::timeout(timeout, future)
        .await
        .unwrap_or_else(|_| panic!("future did not complete within {:?}", timeout))
}

/// Polls `condition` every `interval` until it holds or `timeout` elapses.
pub async fn wait_for<F>(timeout: Duration, interval: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(interval).await;
    }
    condition()
}

/// Like [`wait_for`] but panics with `message` on timeout.
pub async fn wait_for_or_panic<F>(timeout: Duration, condition: F, message: &str)
where
    F: FnMut() -> bool,
{
    if !wait_for(timeout, Duration::from_millis(5), condition).await {
        panic!("Timeout waiting for: {}", message);
    }
}

/// Reads from `stream` until a notification carries `expected`.
pub async fn expect_value(stream: &mut NotificationStream, expected: &Variant) -> Notification {
    within(Duration::from_secs(5), async {
        loop {
            let notification = stream.recv().await.expect("stream closed");
            if &notification.value.value == expected {
                return notification;
            }
        }
    })
    .await
}
