/*
 * SPDX-FileCopyrightText: Copyright (c) 2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
 * SPDX-License-Identifier: Apache-2.0
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 * http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

// src/notify.rs
// Typed notifications and fan-out to delivery backends.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::errors::GcnError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotificationKind {
    ManagerStarting,
    ManagerExiting,
    MqttStillConnecting,
    MqttConnected,
    MqttDisconnected,
    ClientHeartbeatSkewed,
    ClientHeartbeatMissed,
    ClientDroppedItems,
    ClientStatusChange,
    ClientGpioChange,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind")]
pub enum Notification {
    ManagerStarting {
        id: String,
        started_at: DateTime<Utc>,
    },
    ManagerExiting {
        id: String,
        run_duration: String,
    },
    MqttStillConnecting {
        id: String,
        server: String,
        elapsed_seconds: u64,
    },
    MqttConnected {
        id: String,
        server: String,
    },
    MqttDisconnected {
        id: String,
        server: String,
    },
    ClientHeartbeatSkewed {
        client: String,
        skew: i64,
        max_skew: i64,
    },
    ClientHeartbeatMissed {
        client: String,
        elapsed_seconds: u64,
    },
    ClientDroppedItems {
        client: String,
    },
    ClientStatusChange {
        client: String,
    },
    ClientGpioChange {
        client: String,
        gpio_name: String,
        gpio_is_set: bool,
    },
}

impl Notification {
    pub fn kind(&self) -> NotificationKind {
        match self {
            Self::ManagerStarting { .. } => NotificationKind::ManagerStarting,
            Self::ManagerExiting { .. } => NotificationKind::ManagerExiting,
            Self::MqttStillConnecting { .. } => NotificationKind::MqttStillConnecting,
            Self::MqttConnected { .. } => NotificationKind::MqttConnected,
            Self::MqttDisconnected { .. } => NotificationKind::MqttDisconnected,
            Self::ClientHeartbeatSkewed { .. } => NotificationKind::ClientHeartbeatSkewed,
            Self::ClientHeartbeatMissed { .. } => NotificationKind::ClientHeartbeatMissed,
            Self::ClientDroppedItems { .. } => NotificationKind::ClientDroppedItems,
            Self::ClientStatusChange { .. } => NotificationKind::ClientStatusChange,
            Self::ClientGpioChange { .. } => NotificationKind::ClientGpioChange,
        }
    }

    // to_raw_text is a short human-readable rendering, used by the
    // logging backend and as a fallback for backends that just want text.
    pub fn to_raw_text(&self) -> String {
        match self {
            Self::ManagerStarting { id, started_at } => {
                format!("manager {id} starting at {started_at}")
            }
            Self::ManagerExiting { id, run_duration } => {
                format!("manager {id} exiting after {run_duration}")
            }
            Self::MqttStillConnecting {
                id,
                server,
                elapsed_seconds,
            } => format!("manager {id} still connecting to {server} ({elapsed_seconds}s)"),
            Self::MqttConnected { id, server } => format!("manager {id} connected to {server}"),
            Self::MqttDisconnected { id, server } => {
                format!("manager {id} disconnected from {server}")
            }
            Self::ClientHeartbeatSkewed {
                client,
                skew,
                max_skew,
            } => format!("client {client} heartbeat skewed by {skew}s (max {max_skew}s)"),
            Self::ClientHeartbeatMissed {
                client,
                elapsed_seconds,
            } => format!("client {client} missed heartbeat for {elapsed_seconds}s"),
            Self::ClientDroppedItems { client } => format!("client {client} dropped buffer items"),
            Self::ClientStatusChange { client } => format!("client {client} status changed"),
            Self::ClientGpioChange {
                client,
                gpio_name,
                gpio_is_set,
            } => format!("client {client} gpio {gpio_name} is now {gpio_is_set}"),
        }
    }

    pub fn to_json(&self) -> Result<String, GcnError> {
        serde_json::to_string(self).map_err(|e| GcnError::handler(e.to_string()))
    }
}

// A NotificationBackend is an external collaborator that knows how to
// deliver a notification somewhere (SMS, email, microblog, ...). This
// crate ships only LoggingBackend; real delivery backends are expected
// to be supplied by the binary that wires the manager together.
#[async_trait]
pub trait NotificationBackend: Send + Sync + std::fmt::Debug {
    async fn deliver(&self, notification: &Notification) -> Result<(), GcnError>;
}

#[derive(Debug, Default)]
pub struct LoggingBackend;

#[async_trait]
impl NotificationBackend for LoggingBackend {
    async fn deliver(&self, notification: &Notification) -> Result<(), GcnError> {
        tracing::info!(notification = %notification.to_raw_text(), "notification needs sending");
        Ok(())
    }
}

// NotificationSink fans a notification out to every backend registered
// for its kind. A failing backend is logged and never propagated: a
// broken SMS gateway must not take the manager down.
#[derive(Default)]
pub struct NotificationSink {
    backends: Vec<(NotificationKind, Arc<dyn NotificationBackend>)>,
}

impl NotificationSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, kind: NotificationKind, backend: Arc<dyn NotificationBackend>) {
        self.backends.push((kind, backend));
    }

    pub fn register_all(&mut self, kinds: &[NotificationKind], backend: Arc<dyn NotificationBackend>) {
        for kind in kinds {
            self.register(*kind, backend.clone());
        }
    }

    pub async fn dispatch(&self, notification: Notification) {
        let kind = notification.kind();
        let deliveries = self
            .backends
            .iter()
            .filter(|(k, _)| *k == kind)
            .map(|(_, backend)| {
                let backend = backend.clone();
                let notification = notification.clone();
                async move { backend.deliver(&notification).await }
            });
        let results = futures::future::join_all(deliveries).await;
        for result in results {
            if let Err(err) = result {
                tracing::warn!(error = %err, "notification backend failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Default)]
    struct RecordingBackend {
        count: AtomicUsize,
    }

    #[async_trait]
    impl NotificationBackend for RecordingBackend {
        async fn deliver(&self, _notification: &Notification) -> Result<(), GcnError> {
            self.count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[derive(Debug, Default)]
    struct FailingBackend;

    #[async_trait]
    impl NotificationBackend for FailingBackend {
        async fn deliver(&self, _notification: &Notification) -> Result<(), GcnError> {
            Err(GcnError::handler("delivery failed"))
        }
    }

    #[tokio::test]
    async fn dispatch_only_reaches_backends_registered_for_the_kind() {
        let recording = Arc::new(RecordingBackend::default());
        let mut sink = NotificationSink::new();
        sink.register(NotificationKind::ClientStatusChange, recording.clone());

        sink.dispatch(Notification::ClientStatusChange {
            client: "c1".to_string(),
        })
        .await;
        sink.dispatch(Notification::ClientDroppedItems {
            client: "c1".to_string(),
        })
        .await;

        assert_eq!(recording.count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failing_backend_does_not_panic_or_block_others() {
        let recording = Arc::new(RecordingBackend::default());
        let mut sink = NotificationSink::new();
        sink.register(NotificationKind::ClientStatusChange, Arc::new(FailingBackend));
        sink.register(NotificationKind::ClientStatusChange, recording.clone());

        sink.dispatch(Notification::ClientStatusChange {
            client: "c1".to_string(),
        })
        .await;

        assert_eq!(recording.count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn json_omits_null_fields_by_construction() {
        let n = Notification::ClientStatusChange {
            client: "c1".to_string(),
        };
        let json = n.to_json().unwrap();
        assert!(json.contains("\"client\":\"c1\""));
    }
}
