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

// src/session.rs
// One MQTT connection lifecycle: connect, publish presence, subscribe,
// pump inbound messages through the router, drain, disconnect.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use rumqttc::{AsyncClient, Event, LastWill, MqttOptions, Packet, QoS, Transport};
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;

use crate::config::{Config, Transport as ConfiguredTransport};
use crate::errors::GcnError;
use crate::notify::{Notification, NotificationSink};
use crate::registry::ClientRegistry;
use crate::router::{MessageRouter, Publisher};
use crate::topic::TopicCodec;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Connected,
    Backoff,
    Failed,
    Draining,
    Disconnecting,
    Closed,
}

// SessionOutcome tells the supervisor whether its outer loop should try
// to establish a new session.
#[derive(Debug)]
pub enum SessionOutcome {
    ClosedCleanly,
    Disconnected,
    Fatal(GcnError),
}

// SessionBackoff implements the exponential-with-full-jitter policy
// mandated for MqttSession's Connecting -> Backoff transition: base
// 1.5s, cap 3s. This is deliberately not the simple-doubling,
// no-jitter backoff this workspace's other MQTT client uses elsewhere;
// the jitter matters here because many managers may restart at once.
pub struct SessionBackoff {
    base: Duration,
    cap: Duration,
    attempt: u32,
}

impl SessionBackoff {
    pub fn new() -> Self {
        Self {
            base: Duration::from_millis(1500),
            cap: Duration::from_secs(3),
            attempt: 0,
        }
    }

    pub fn next_delay(&mut self) -> Duration {
        let factor = 2u32.saturating_pow(self.attempt.min(16));
        let raw = self.base.saturating_mul(factor).min(self.cap);
        self.attempt += 1;
        let jitter_ms = rand::rng().random_range(0..=raw.as_millis().max(1) as u64);
        Duration::from_millis(jitter_ms)
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

impl Default for SessionBackoff {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum PendingKind {
    Publish,
    Subscribe,
    Unsubscribe,
}

// TrackedMessageId correlates broker-assigned message ids (pkid) back
// to the topic string the application submitted, for diagnostics only.
// Broker acks arrive in submission order per request type, so a FIFO
// per pending kind is enough to learn the pkid <-> topic mapping the
// moment rumqttc reports the Outgoing event.
#[derive(Default)]
struct TrackedMessageId {
    pending: HashMap<PendingKind, VecDeque<String>>,
    inflight: HashMap<u16, String>,
}

impl TrackedMessageId {
    fn track_pending(&mut self, kind: PendingKind, topic: impl Into<String>) {
        self.pending.entry(kind).or_default().push_back(topic.into());
    }

    fn on_outgoing_assigned(&mut self, kind: PendingKind, pkid: u16) {
        let Some(topic) = self.pending.get_mut(&kind).and_then(VecDeque::pop_front) else {
            tracing::warn!(?kind, pkid, "outgoing pkid with no pending topic to correlate");
            return;
        };
        self.inflight.insert(pkid, topic);
    }

    fn on_ack(&mut self, pkid: u16) {
        if self.inflight.remove(&pkid).is_none() {
            tracing::warn!(pkid, "ack for unknown or already-untracked message id");
        }
    }
}

// SessionPublisher is the cheap, cloneable capability handed to spawned
// handler tasks so they can clear a stale retained topic without
// holding a reference back to the owning MqttSession.
#[derive(Clone)]
struct SessionPublisher {
    client: AsyncClient,
    tracked: Arc<Mutex<TrackedMessageId>>,
}

#[async_trait]
impl Publisher for SessionPublisher {
    async fn clear_topic(&self, topic: &str) -> Result<(), GcnError> {
        self.tracked.lock().await.track_pending(PendingKind::Publish, topic);
        self.client.publish(topic, QoS::AtLeastOnce, true, Vec::new()).await?;
        Ok(())
    }
}

pub struct MqttSession {
    config: Arc<Config>,
    manager_id: String,
    codec: TopicCodec,
    registry: Arc<Mutex<ClientRegistry>>,
    sink: Arc<NotificationSink>,
    shutdown: watch::Receiver<bool>,
}

impl MqttSession {
    pub fn new(
        config: Arc<Config>,
        manager_id: impl Into<String>,
        registry: Arc<Mutex<ClientRegistry>>,
        sink: Arc<NotificationSink>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let manager_id = manager_id.into();
        Self {
            codec: TopicCodec::new(config.app.clone()),
            config,
            manager_id,
            registry,
            sink,
            shutdown,
        }
    }

    fn manager_status_topic(&self) -> String {
        self.codec.compose_manager_status(&self.manager_id)
    }

    fn build_mqtt_options(&self) -> Result<MqttOptions, GcnError> {
        let mut options = MqttOptions::new(&self.manager_id, &self.config.mqtt_host, self.config.mqtt_port);
        options.set_keep_alive(Duration::from_secs(self.config.mqtt_keep_alive));
        options.set_connection_timeout(self.config.mqtt_connect_timeout);

        if let (Some(user), Some(pass)) = (&self.config.mqtt_user_name, &self.config.mqtt_user_password) {
            options.set_credentials(user, pass);
        }

        options.set_last_will(LastWill {
            topic: self.manager_status_topic(),
            message: "offline".into(),
            qos: QoS::AtLeastOnce,
            retain: true,
        });

        // mqtt_tls_* and the unix transport are rejected in Config::validate
        // before a session is ever built, so the only transport left to
        // honor here is the tcp/websocket choice.
        match self.config.mqtt_transport {
            ConfiguredTransport::Tcp => {}
            ConfiguredTransport::Websocket => options.set_transport(Transport::ws()),
            ConfiguredTransport::Unix => {
                return Err(GcnError::configuration("mqtt_transport = unix is not supported by this build"));
            }
        }

        Ok(options)
    }

    // run drives this session through its entire state machine and
    // returns only once the connection has ended, one way or another.
    pub async fn run(mut self) -> SessionOutcome {
        let mut state = SessionState::Idle;
        let mut backoff = SessionBackoff::new();

        let options = match self.build_mqtt_options() {
            Ok(o) => o,
            Err(e) => return SessionOutcome::Fatal(e),
        };

        state = SessionState::Connecting;
        let (client, mut eventloop) = AsyncClient::new(options, self.config.mqtt_client_id_random_bytes.max(10) * 10);

        let tracked = Arc::new(Mutex::new(TrackedMessageId::default()));
        let publisher = SessionPublisher {
            client: client.clone(),
            tracked: tracked.clone(),
        };
        let router = MessageRouter::new(
            self.codec.clone(),
            self.manager_id.clone(),
            self.config.client_heartbeat_max_skew,
        );

        let mut subscribed: HashSet<String> = HashSet::new();
        let mut task_bag: Vec<JoinHandle<()>> = Vec::new();
        let mut still_connecting_deadline =
            tokio::time::Instant::now() + Duration::from_secs(self.config.mqtt_still_connecting_alert);
        let connect_started = std::time::Instant::now();

        loop {
            match state {
                SessionState::Connecting => {
                    tokio::select! {
                        event = eventloop.poll() => {
                            match event {
                                Ok(Event::Incoming(Packet::ConnAck(_ack))) => {
                                    state = SessionState::Connected;
                                    backoff.reset();
                                }
                                Ok(_) => {}
                                Err(err) => {
                                    let classified = GcnError::from_connection_error(err);
                                    if classified.is_fatal() {
                                        return SessionOutcome::Fatal(classified);
                                    }
                                    state = SessionState::Backoff;
                                }
                            }
                        }
                        _ = tokio::time::sleep_until(still_connecting_deadline) => {
                            self.sink.dispatch(Notification::MqttStillConnecting {
                                id: self.manager_id.clone(),
                                server: self.config.mqtt_host.clone(),
                                elapsed_seconds: connect_started.elapsed().as_secs(),
                            }).await;
                            still_connecting_deadline = tokio::time::Instant::now()
                                + Duration::from_secs(self.config.mqtt_still_connecting_alert);
                        }
                        _ = self.shutdown.changed() => {
                            if *self.shutdown.borrow() {
                                return SessionOutcome::ClosedCleanly;
                            }
                        }
                    }
                }
                SessionState::Backoff => {
                    let delay = backoff.next_delay();
                    tokio::time::sleep(delay).await;
                    state = SessionState::Connecting;
                }
                SessionState::Connected => {
                    if let Err(e) = self.on_connected(&client, &mut subscribed).await {
                        return SessionOutcome::Fatal(e);
                    }
                    self.sink
                        .dispatch(Notification::MqttConnected {
                            id: self.manager_id.clone(),
                            server: self.config.mqtt_host.clone(),
                        })
                        .await;

                    let mut idle_ticker = tokio::time::interval(Duration::from_secs(self.config.idle_loop_sleep.max(1)));
                    'connected: loop {
                        tokio::select! {
                            event = eventloop.poll() => {
                                match event {
                                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                                        let topic = publish.topic.clone();
                                        let payload = publish.payload.to_vec();
                                        let registry = self.registry.clone();
                                        let sink = self.sink.clone();
                                        let publisher = publisher.clone();
                                        let router = MessageRouter::new(
                                            self.codec.clone(),
                                            self.manager_id.clone(),
                                            self.config.client_heartbeat_max_skew,
                                        );
                                        task_bag.push(tokio::spawn(async move {
                                            let mut guard = registry.lock().await;
                                            router.route(&topic, &payload, &mut guard, &sink, &publisher).await;
                                        }));
                                    }
                                    Ok(Event::Incoming(Packet::PubAck(ack))) => tracked.lock().await.on_ack(ack.pkid),
                                    Ok(Event::Incoming(Packet::PubComp(ack))) => tracked.lock().await.on_ack(ack.pkid),
                                    Ok(Event::Incoming(Packet::SubAck(ack))) => tracked.lock().await.on_ack(ack.pkid),
                                    Ok(Event::Incoming(Packet::UnsubAck(ack))) => tracked.lock().await.on_ack(ack.pkid),
                                    Ok(Event::Outgoing(rumqttc::Outgoing::Publish(pkid))) => {
                                        tracked.lock().await.on_outgoing_assigned(PendingKind::Publish, pkid)
                                    }
                                    Ok(Event::Outgoing(rumqttc::Outgoing::Subscribe(pkid))) => {
                                        tracked.lock().await.on_outgoing_assigned(PendingKind::Subscribe, pkid)
                                    }
                                    Ok(Event::Outgoing(rumqttc::Outgoing::Unsubscribe(pkid))) => {
                                        tracked.lock().await.on_outgoing_assigned(PendingKind::Unsubscribe, pkid)
                                    }
                                    Ok(Event::Incoming(Packet::Disconnect)) => {
                                        state = SessionState::Closed;
                                        break 'connected;
                                    }
                                    Ok(_) => {}
                                    Err(err) => {
                                        tracing::warn!(error = %err, "mqtt event loop error, treating as disconnect");
                                        self.sink.dispatch(Notification::MqttDisconnected {
                                            id: self.manager_id.clone(),
                                            server: self.config.mqtt_host.clone(),
                                        }).await;
                                        return SessionOutcome::Disconnected;
                                    }
                                }
                            }
                            _ = idle_ticker.tick() => {
                                task_bag.retain(|h| !h.is_finished());
                            }
                            _ = self.shutdown.changed() => {
                                if *self.shutdown.borrow() {
                                    state = SessionState::Draining;
                                    break 'connected;
                                }
                            }
                        }
                    }
                }
                SessionState::Draining => {
                    for topic in subscribed.drain() {
                        tracked.lock().await.track_pending(PendingKind::Unsubscribe, topic.clone());
                        if let Err(err) = client.unsubscribe(&topic).await {
                            tracing::warn!(error = %err, topic, "failed to unsubscribe during drain");
                        }
                    }
                    let status_topic = self.manager_status_topic();
                    tracked.lock().await.track_pending(PendingKind::Publish, status_topic.clone());
                    if let Err(err) = client.publish(&status_topic, QoS::AtLeastOnce, true, b"offline".to_vec()).await {
                        tracing::warn!(error = %err, "failed to publish offline status during drain");
                    }
                    // Writer-drain barrier: give the event loop a beat to flush the
                    // unsubscribe/offline writes before moving on.
                    let deadline = tokio::time::Instant::now() + Duration::from_millis(500);
                    while tokio::time::Instant::now() < deadline {
                        match tokio::time::timeout(Duration::from_millis(50), eventloop.poll()).await {
                            Ok(Ok(_)) => {}
                            _ => break,
                        }
                    }
                    for handle in task_bag.drain(..) {
                        if let Err(err) = handle.await {
                            tracing::warn!(error = %err, "handler task panicked during drain");
                        }
                    }
                    state = SessionState::Disconnecting;
                }
                SessionState::Disconnecting => {
                    if let Err(err) = client.disconnect().await {
                        tracing::warn!(error = %err, "error sending clean disconnect");
                    }
                    let _ = tokio::time::timeout(Duration::from_secs(2), eventloop.poll()).await;
                    return SessionOutcome::ClosedCleanly;
                }
                SessionState::Failed | SessionState::Closed | SessionState::Idle => {
                    return SessionOutcome::ClosedCleanly;
                }
            }
        }
    }

    async fn on_connected(&self, client: &AsyncClient, subscribed: &mut HashSet<String>) -> Result<(), GcnError> {
        let status_topic = self.manager_status_topic();
        client.publish(&status_topic, QoS::AtLeastOnce, true, b"online".to_vec()).await?;

        for sub in [
            self.codec.manager_status_subscription(),
            self.codec.client_subscription(),
        ] {
            client.subscribe(&sub, QoS::ExactlyOnce).await?;
            subscribed.insert(sub);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_never_exceeds_cap_and_is_jittered_within_range() {
        let mut backoff = SessionBackoff::new();
        for _ in 0..10 {
            let delay = backoff.next_delay();
            assert!(delay <= Duration::from_secs(3));
        }
    }

    #[test]
    fn backoff_reset_restarts_from_first_attempt() {
        let mut backoff = SessionBackoff::new();
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();
        assert_eq!(backoff.attempt, 0);
    }

    #[test]
    fn tracked_message_id_correlates_outgoing_to_ack() {
        let mut tracked = TrackedMessageId::default();
        tracked.track_pending(PendingKind::Publish, "gcn/manager/status/m1");
        tracked.on_outgoing_assigned(PendingKind::Publish, 42);
        assert_eq!(tracked.inflight.get(&42).unwrap(), "gcn/manager/status/m1");
        tracked.on_ack(42);
        assert!(tracked.inflight.is_empty());
    }

    #[test]
    fn tracked_message_id_untrack_unknown_does_not_panic() {
        let mut tracked = TrackedMessageId::default();
        tracked.on_ack(99);
    }
}
