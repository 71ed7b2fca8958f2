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

// src/router.rs
// Dispatches a single (topic, payload) observation to the right handler
// against the current ClientRegistry, emitting notifications on change.

use async_trait::async_trait;
use chrono::Utc;

use crate::errors::GcnError;
use crate::notify::{Notification, NotificationSink};
use crate::registry::{ClientRegistry, ClientStatus, CounterUpdate, GpioUpdate, HeartbeatUpdate, StatusUpdate};
use crate::topic::{Parsed, TopicCodec};

const CATEGORY_STATUS: &str = "status";
const CATEGORY_HEARTBEAT: &str = "heartbeat";
const CATEGORY_DROPPED: &str = "buffer_total_dropped_item";
const CATEGORY_MONITORED_GPIO: &str = "monitored_gpio";
const CATEGORY_GPIO: &str = "gpio";

const STATUS_ONLINE: &str = "online";
const STATUS_OFFLINE: &str = "offline";

// Publisher is the capability handlers need to clear a stale retained
// topic. It is passed into `route` rather than stored on the router, so
// the router itself never needs a reference back to the owning session.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn clear_topic(&self, topic: &str) -> Result<(), GcnError>;
}

pub struct MessageRouter {
    codec: TopicCodec,
    self_manager_id: String,
    heartbeat_max_skew: i64,
}

impl MessageRouter {
    pub fn new(codec: TopicCodec, self_manager_id: impl Into<String>, heartbeat_max_skew: i64) -> Self {
        Self {
            codec,
            self_manager_id: self_manager_id.into(),
            heartbeat_max_skew,
        }
    }

    pub async fn route(
        &self,
        topic: &str,
        payload: &[u8],
        registry: &mut ClientRegistry,
        sink: &NotificationSink,
        publisher: &dyn Publisher,
    ) {
        match self.codec.parse(topic) {
            Parsed::Unknown => {
                tracing::warn!(topic, "unknown topic, dropping");
            }
            Parsed::ManagerStatus { manager_id } => {
                self.handle_manager_status(topic, &manager_id, payload, publisher).await;
            }
            Parsed::ClientOut {
                client_id,
                category,
                rest,
            } => {
                registry.touch(&client_id);
                self.handle_client_out(&client_id, &category, &rest, payload, registry, sink)
                    .await;
            }
            Parsed::ClientIn { client_id, category } => {
                tracing::warn!(client = client_id, category = ?category, "inbound client category not implemented, dropping");
            }
        }
    }

    async fn handle_manager_status(
        &self,
        topic: &str,
        manager_id: &str,
        payload: &[u8],
        publisher: &dyn Publisher,
    ) {
        if manager_id == self.self_manager_id {
            return;
        }
        if payload.is_empty() {
            tracing::debug!(manager = manager_id, "empty manager status, ignoring cleanup");
            return;
        }
        let status = match std::str::from_utf8(payload) {
            Ok(s) => s,
            Err(_) => {
                tracing::warn!(manager = manager_id, "manager status payload is not valid utf-8");
                return;
            }
        };
        match status {
            STATUS_ONLINE => {
                tracing::info!(manager = manager_id, "manager detected online");
            }
            STATUS_OFFLINE => {
                tracing::info!(manager = manager_id, "manager detected offline, clearing its status");
                if let Err(err) = publisher.clear_topic(topic).await {
                    tracing::warn!(error = %err, topic, "failed to clear stale manager status");
                }
            }
            other => {
                tracing::warn!(manager = manager_id, status = other, "unknown manager status");
            }
        }
    }

    async fn handle_client_out(
        &self,
        client_id: &str,
        category: &str,
        rest: &[String],
        payload: &[u8],
        registry: &mut ClientRegistry,
        sink: &NotificationSink,
    ) {
        let text = match std::str::from_utf8(payload) {
            Ok(s) => s,
            Err(_) => {
                tracing::warn!(client = client_id, category, "payload is not valid utf-8");
                return;
            }
        };

        match category {
            CATEGORY_STATUS => self.handle_status(client_id, text, registry, sink).await,
            CATEGORY_HEARTBEAT => self.handle_heartbeat(client_id, text, registry, sink).await,
            CATEGORY_DROPPED => self.handle_dropped(client_id, text, registry, sink).await,
            CATEGORY_MONITORED_GPIO => self.handle_monitored_gpio(client_id, text, registry),
            CATEGORY_GPIO => self.handle_gpio(client_id, rest, text, registry, sink).await,
            other => {
                tracing::warn!(client = client_id, category = other, "unknown client category");
            }
        }
    }

    async fn handle_status(&self, client_id: &str, text: &str, registry: &mut ClientRegistry, sink: &NotificationSink) {
        let Some(status) = ClientStatus::parse(text) else {
            tracing::warn!(client = client_id, payload = text, "invalid status payload");
            return;
        };
        if let StatusUpdate::Changed { old, new } = registry.update_status(client_id, status) {
            tracing::info!(client = client_id, ?old, ?new, "client status changed");
            sink.dispatch(Notification::ClientStatusChange {
                client: client_id.to_string(),
            })
            .await;
        }
    }

    async fn handle_heartbeat(&self, client_id: &str, text: &str, registry: &mut ClientRegistry, sink: &NotificationSink) {
        let Ok(ts) = text.parse::<i64>() else {
            tracing::warn!(client = client_id, payload = text, "invalid heartbeat payload");
            return;
        };
        let now = Utc::now().timestamp();
        if let HeartbeatUpdate::Skewed { skew_seconds } =
            registry.update_heartbeat(client_id, ts, now, self.heartbeat_max_skew)
        {
            sink.dispatch(Notification::ClientHeartbeatSkewed {
                client: client_id.to_string(),
                skew: skew_seconds,
                max_skew: self.heartbeat_max_skew,
            })
            .await;
        }
    }

    async fn handle_dropped(&self, client_id: &str, text: &str, registry: &mut ClientRegistry, sink: &NotificationSink) {
        let Ok(value) = text.parse::<u64>() else {
            tracing::warn!(client = client_id, payload = text, "invalid dropped-item payload");
            return;
        };
        if let CounterUpdate::Increased { old, new } = registry.update_dropped(client_id, value) {
            tracing::info!(client = client_id, old, new, "client dropped buffer items changed");
            sink.dispatch(Notification::ClientDroppedItems {
                client: client_id.to_string(),
            })
            .await;
        }
    }

    fn handle_monitored_gpio(&self, client_id: &str, text: &str, registry: &mut ClientRegistry) {
        let names = text
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        registry.update_monitored_gpio(client_id, names);
    }

    async fn handle_gpio(
        &self,
        client_id: &str,
        rest: &[String],
        text: &str,
        registry: &mut ClientRegistry,
        sink: &NotificationSink,
    ) {
        let Some(name) = rest.first() else {
            tracing::warn!(client = client_id, "gpio topic missing name segment");
            return;
        };
        let level = match text {
            "0" => false,
            "1" => true,
            _ => {
                tracing::warn!(client = client_id, gpio = name, payload = text, "invalid gpio payload");
                return;
            }
        };
        if let GpioUpdate::Changed { .. } = registry.update_gpio(client_id, name, level) {
            sink.dispatch(Notification::ClientGpioChange {
                client: client_id.to_string(),
                gpio_name: name.clone(),
                gpio_is_set: level,
            })
            .await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    struct RecordingPublisher {
        cleared: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Publisher for RecordingPublisher {
        async fn clear_topic(&self, topic: &str) -> Result<(), GcnError> {
            self.cleared.lock().unwrap().push(topic.to_string());
            Ok(())
        }
    }

    fn router() -> MessageRouter {
        MessageRouter::new(TopicCodec::new("gcn"), "manager_self", 10)
    }

    #[tokio::test]
    async fn first_time_client_status_emits_notification() {
        let mut registry = ClientRegistry::new();
        let mut sink = NotificationSink::new();
        let recorded = Arc::new(Mutex::new(Vec::new()));

        #[derive(Debug, Default)]
        struct Recorder(std::sync::Mutex<Vec<String>>);
        #[async_trait]
        impl crate::notify::NotificationBackend for Recorder {
            async fn deliver(&self, n: &Notification) -> Result<(), GcnError> {
                self.0.lock().unwrap().push(n.to_raw_text());
                Ok(())
            }
        }
        let backend = Arc::new(Recorder::default());
        sink.register(crate::notify::NotificationKind::ClientStatusChange, backend.clone());

        let publisher = RecordingPublisher { cleared: recorded.clone() };
        router()
            .route(
                "gcn/client/c1/out/status",
                b"online",
                &mut registry,
                &sink,
                &publisher,
            )
            .await;

        assert_eq!(registry.get("c1").unwrap().status as i32, ClientStatus::Online as i32);
        assert_eq!(backend.0.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn status_no_op_emits_nothing_on_second_message() {
        let mut registry = ClientRegistry::new();
        let sink = NotificationSink::new();
        let recorded = Arc::new(Mutex::new(Vec::new()));
        let publisher = RecordingPublisher { cleared: recorded };

        let r = router();
        r.route("gcn/client/c1/out/status", b"online", &mut registry, &sink, &publisher)
            .await;
        r.route("gcn/client/c1/out/status", b"online", &mut registry, &sink, &publisher)
            .await;

        assert_eq!(registry.get("c1").unwrap().status as i32, ClientStatus::Online as i32);
    }

    #[tokio::test]
    async fn stale_manager_offline_clears_retained_topic() {
        let mut registry = ClientRegistry::new();
        let sink = NotificationSink::new();
        let cleared = Arc::new(Mutex::new(Vec::new()));
        let publisher = RecordingPublisher { cleared: cleared.clone() };

        router()
            .route(
                "gcn/manager/status/old-mgr",
                b"offline",
                &mut registry,
                &sink,
                &publisher,
            )
            .await;

        assert_eq!(cleared.lock().unwrap().as_slice(), ["gcn/manager/status/old-mgr"]);
    }

    #[tokio::test]
    async fn self_manager_status_is_ignored() {
        let mut registry = ClientRegistry::new();
        let sink = NotificationSink::new();
        let cleared = Arc::new(Mutex::new(Vec::new()));
        let publisher = RecordingPublisher { cleared: cleared.clone() };

        router()
            .route(
                "gcn/manager/status/manager_self",
                b"offline",
                &mut registry,
                &sink,
                &publisher,
            )
            .await;

        assert!(cleared.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn gpio_transition_updates_registry() {
        let mut registry = ClientRegistry::new();
        let sink = NotificationSink::new();
        let cleared = Arc::new(Mutex::new(Vec::new()));
        let publisher = RecordingPublisher { cleared };

        router()
            .route(
                "gcn/client/c1/out/gpio/button",
                b"1",
                &mut registry,
                &sink,
                &publisher,
            )
            .await;

        assert_eq!(registry.get("c1").unwrap().gpio.get("button"), Some(&true));
    }

    #[tokio::test]
    async fn unmapped_category_does_not_panic() {
        let mut registry = ClientRegistry::new();
        let sink = NotificationSink::new();
        let cleared = Arc::new(Mutex::new(Vec::new()));
        let publisher = RecordingPublisher { cleared };

        router()
            .route(
                "gcn/client/c1/out/bogus",
                b"whatever",
                &mut registry,
                &sink,
                &publisher,
            )
            .await;
    }

    #[tokio::test]
    async fn client_in_is_logged_and_dropped() {
        let mut registry = ClientRegistry::new();
        let sink = NotificationSink::new();
        let cleared = Arc::new(Mutex::new(Vec::new()));
        let publisher = RecordingPublisher { cleared };

        router()
            .route(
                "gcn/client/c1/in/relay/set",
                b"1",
                &mut registry,
                &sink,
                &publisher,
            )
            .await;
    }
}
