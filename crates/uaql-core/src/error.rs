// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Error types shared by the core primitives.

use thiserror::Error;

/// Errors raised by the publish/subscribe bus.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BusError {
    /// The bus (or topic) was closed.
    #[error("Topic '{topic}' is closed")]
    Closed {
        /// Topic name.
        topic: String,
    },

    /// The receiver fell behind and lost messages.
    #[error("Subscriber of '{topic}' lagged by {count} messages")]
    Lagged {
        /// Topic name.
        topic: String,
        /// Number of missed messages.
        count: u64,
    },

    /// Topic name was empty.
    #[error("Topic name must not be empty")]
    InvalidTopic,
}

impl BusError {
    /// Creates a closed error.
    pub fn closed(topic: impl Into<String>) -> Self {
        Self::Closed {
            topic: topic.into(),
        }
    }

    /// Creates a lagged error.
    pub fn lagged(topic: impl Into<String>, count: u64) -> Self {
        Self::Lagged {
            topic: topic.into(),
            count,
        }
    }
}
