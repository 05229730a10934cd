// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Interval polling for servers without subscription support.

use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, trace};

use crate::client::reader::AttributeReader;
use crate::client::subscription::Notification;
use crate::client::transport::ProtocolClient;
use crate::error::OpcUaResult;
use crate::types::{AttributeId, NodeId, SubscriptionKey};

const POLL_BUFFER: usize = 16;

/// A stream of periodic reads. The polling task stops when this is dropped.
#[derive(Debug)]
pub struct PollingSubscription {
    key: SubscriptionKey,
    receiver: mpsc::Receiver<OpcUaResult<Notification>>,
    task: JoinHandle<()>,
}

impl PollingSubscription {
    /// Waits for the next read outcome.
    pub async fn recv(&mut self) -> Option<OpcUaResult<Notification>> {
        self.receiver.recv().await
    }

    /// Returns the polled key.
    pub fn key(&self) -> &SubscriptionKey {
        &self.key
    }
}

impl Drop for PollingSubscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl<C: ProtocolClient> AttributeReader<C> {
    /// Reads `attribute` of `node_id` every `interval`.
    ///
    /// Each read goes through [`read_attribute`](Self::read_attribute), so it
    /// waits for a session and uses whichever one is current. Failed reads are
    /// yielded as errors and polling continues.
    pub fn poll(
        &self,
        node_id: NodeId,
        attribute: AttributeId,
        interval: Duration,
    ) -> PollingSubscription {
        let key = SubscriptionKey::new(node_id, attribute);
        let (sender, receiver) = mpsc::channel(POLL_BUFFER);
        let reader = self.clone();
        let task_key = key.clone();

        let task = tokio::spawn(async move {
            let mut ticker = time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            debug!(key = %task_key, ?interval, "Polling started");

            loop {
                ticker.tick().await;
                let outcome = reader
                    .read_attribute(&task_key.node_id, task_key.attribute)
                    .await
                    .map(|value| Notification {
                        key: task_key.clone(),
                        value,
                        received_at: Utc::now(),
                    });
                trace!(key = %task_key, ok = outcome.is_ok(), "Polled");

                if sender.send(outcome).await.is_err() {
                    break;
                }
            }
            debug!(key = %task_key, "Polling stopped");
        });

        PollingSubscription {
            key,
            receiver,
            task,
        }
    }
}
