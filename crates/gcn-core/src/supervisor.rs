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

// src/supervisor.rs
// Top-level loop: owns the registry and notification sink, handles
// signals, and restarts MqttSession according to the reconnect policy.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use rand::Rng;
use tokio::sync::{Mutex, watch};

use crate::config::Config;
use crate::errors::GcnError;
use crate::notify::{Notification, NotificationSink};
use crate::registry::ClientRegistry;
use crate::session::{MqttSession, SessionOutcome};

const MANAGER_ID_PREFIX: &str = "manager_";

fn random_manager_id(random_bytes: usize) -> String {
    let bytes: Vec<u8> = (0..random_bytes).map(|_| rand::rng().random()).collect();
    let hex: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
    format!("{MANAGER_ID_PREFIX}{hex}")
}

pub struct Supervisor {
    config: Arc<Config>,
    registry: Arc<Mutex<ClientRegistry>>,
    sink: Arc<NotificationSink>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    manager_id: String,
}

impl Supervisor {
    pub fn new(config: Config, sink: NotificationSink) -> Self {
        let manager_id = random_manager_id(config.mqtt_client_id_random_bytes);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            config: Arc::new(config),
            registry: Arc::new(Mutex::new(ClientRegistry::new())),
            sink: Arc::new(sink),
            shutdown_tx,
            shutdown_rx,
            manager_id,
        }
    }

    pub fn manager_id(&self) -> &str {
        &self.manager_id
    }

    pub fn registry(&self) -> Arc<Mutex<ClientRegistry>> {
        self.registry.clone()
    }

    // shutdown_handle returns a sender any signal-handling task can use
    // to request a graceful stop; calling it more than once is safe.
    pub fn shutdown_handle(&self) -> watch::Sender<bool> {
        self.shutdown_tx.clone()
    }

    // install_signal_handlers spawns a task that listens for SIGHUP,
    // SIGINT and SIGTERM and sets the shutdown flag on any of them,
    // matching the original implementation's `_graceful_shutdown`.
    // Re-delivery of a signal while already shutting down is a no-op:
    // `watch::Sender::send` just republishes the same `true` value.
    #[cfg(unix)]
    pub fn install_signal_handlers(&self) -> tokio::task::JoinHandle<()> {
        use tokio::signal::unix::{SignalKind, signal};

        let shutdown_tx = self.shutdown_tx.clone();
        tokio::spawn(async move {
            let mut hangup = signal(SignalKind::hangup()).expect("failed to install SIGHUP handler");
            let mut interrupt = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
            let mut terminate = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");

            loop {
                tokio::select! {
                    _ = hangup.recv() => tracing::info!("received SIGHUP, shutting down"),
                    _ = interrupt.recv() => tracing::info!("received SIGINT, shutting down"),
                    _ = terminate.recv() => tracing::info!("received SIGTERM, shutting down"),
                }
                let _ = shutdown_tx.send(true);
            }
        })
    }

    pub async fn run(&self) -> Result<(), GcnError> {
        let started_at = Utc::now();
        self.sink
            .dispatch(Notification::ManagerStarting {
                id: self.manager_id.clone(),
                started_at,
            })
            .await;

        let watchdog = self.spawn_heartbeat_watchdog();

        let mut result = Ok(());
        loop {
            let session = MqttSession::new(
                self.config.clone(),
                self.manager_id.clone(),
                self.registry.clone(),
                self.sink.clone(),
                self.shutdown_rx.clone(),
            );

            match session.run().await {
                SessionOutcome::ClosedCleanly => {
                    if *self.shutdown_rx.borrow() || !self.config.mqtt_reconnect {
                        break;
                    }
                }
                SessionOutcome::Disconnected => {
                    if !self.config.mqtt_reconnect || *self.shutdown_rx.borrow() {
                        break;
                    }
                    // fall through to reconnect
                }
                SessionOutcome::Fatal(err) => {
                    tracing::error!(error = %err, "session ended fatally");
                    result = Err(err);
                    break;
                }
            }
        }

        watchdog.abort();

        let run_duration = Utc::now().signed_duration_since(started_at);
        self.sink
            .dispatch(Notification::ManagerExiting {
                id: self.manager_id.clone(),
                run_duration: format_duration_iso8601(run_duration),
            })
            .await;

        result
    }

    // spawn_heartbeat_watchdog periodically scans the registry for
    // clients that have gone quiet for longer than
    // `client_heartbeat_watchdog`, emitting ClientHeartbeatMissed once
    // per fresh-to-stale transition (tracked via `notified`, cleared
    // once a client is seen fresh again).
    fn spawn_heartbeat_watchdog(&self) -> tokio::task::JoinHandle<()> {
        let registry = self.registry.clone();
        let sink = self.sink.clone();
        let watchdog_window = std::time::Duration::from_secs(self.config.client_heartbeat_watchdog.max(1));
        let poll_interval = std::time::Duration::from_secs(self.config.idle_loop_sleep.max(1));

        tokio::spawn(async move {
            let mut notified: HashSet<String> = HashSet::new();
            let mut ticker = tokio::time::interval(poll_interval);
            loop {
                ticker.tick().await;
                let stale = registry.lock().await.scan_stale(watchdog_window);
                let stale_set: HashSet<String> = stale.iter().cloned().collect();

                for id in &stale {
                    if notified.insert(id.clone()) {
                        sink.dispatch(Notification::ClientHeartbeatMissed {
                            client: id.clone(),
                            elapsed_seconds: watchdog_window.as_secs(),
                        })
                        .await;
                    }
                }
                notified.retain(|id| stale_set.contains(id));
            }
        })
    }
}

// format_duration_iso8601 renders a chrono::Duration as an ISO-8601
// duration (e.g. "PT1H2M3S"), which is what ManagerExiting.run_duration
// is specified to carry.
fn format_duration_iso8601(duration: chrono::Duration) -> String {
    let total_seconds = duration.num_seconds().max(0);
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;
    let mut out = String::from("PT");
    if hours > 0 {
        out.push_str(&format!("{hours}H"));
    }
    if minutes > 0 {
        out.push_str(&format!("{minutes}M"));
    }
    out.push_str(&format!("{seconds}S"));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manager_id_has_expected_prefix_and_length() {
        let id = random_manager_id(8);
        assert!(id.starts_with(MANAGER_ID_PREFIX));
        assert_eq!(id.len(), MANAGER_ID_PREFIX.len() + 16);
    }

    #[test]
    fn duration_formats_as_iso8601() {
        let d = chrono::Duration::seconds(3723);
        assert_eq!(format_duration_iso8601(d), "PT1H2M3S");
    }

    #[test]
    fn zero_duration_still_has_seconds_component() {
        let d = chrono::Duration::seconds(0);
        assert_eq!(format_duration_iso8601(d), "PT0S");
    }
}
