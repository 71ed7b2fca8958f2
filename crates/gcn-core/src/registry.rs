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

// src/registry.rs
// In-memory tracking of remote clients and the manager's own identity.

use std::collections::HashMap;
use std::time::Instant;

use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientStatus {
    Unknown,
    Online,
    Offline,
}

impl ClientStatus {
    pub fn parse(payload: &str) -> Option<Self> {
        match payload {
            "online" => Some(Self::Online),
            "offline" => Some(Self::Offline),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClientInfo {
    pub id: String,
    pub status: ClientStatus,
    pub heartbeat: Option<i64>,
    pub hardware: Option<String>,
    pub monitored_gpio: Vec<String>,
    pub buffer_total_dropped_item: Option<u64>,
    pub gpio: HashMap<String, bool>,
    pub last_seen_at: Instant,
}

impl ClientInfo {
    fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: ClientStatus::Unknown,
            heartbeat: None,
            hardware: None,
            monitored_gpio: Vec::new(),
            buffer_total_dropped_item: None,
            gpio: HashMap::new(),
            last_seen_at: Instant::now(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ManagerInfo {
    pub client_id: String,
    pub started_at: DateTime<Utc>,
}

// Outcomes of a compare-then-assign registry update; the router turns a
// `Changed` outcome into a notification and ignores `Unchanged`.
pub enum StatusUpdate {
    Unchanged,
    Changed { old: ClientStatus, new: ClientStatus },
}

pub enum CounterUpdate {
    Unchanged,
    Increased { old: u64, new: u64 },
    Decreased { old: u64, new: u64 },
}

pub enum GpioUpdate {
    Unchanged,
    Changed { old: bool, new: bool },
}

pub enum HeartbeatUpdate {
    Ok,
    Skewed { skew_seconds: i64 },
}

#[derive(Debug, Default)]
pub struct ClientRegistry {
    clients: HashMap<String, ClientInfo>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&ClientInfo> {
        self.clients.get(id)
    }

    // get_or_create returns the existing record for `id`, or creates one
    // with status Unknown the first time this client is observed.
    pub fn get_or_create(&mut self, id: &str) -> &mut ClientInfo {
        if !self.clients.contains_key(id) {
            tracing::info!(client = id, "first time seeing client");
        }
        self.clients
            .entry(id.to_string())
            .or_insert_with(|| ClientInfo::new(id))
    }

    pub fn touch(&mut self, id: &str) {
        self.get_or_create(id).last_seen_at = Instant::now();
    }

    pub fn update_status(&mut self, id: &str, new: ClientStatus) -> StatusUpdate {
        let client = self.get_or_create(id);
        if client.status == new {
            return StatusUpdate::Unchanged;
        }
        let old = client.status;
        client.status = new;
        StatusUpdate::Changed { old, new }
    }

    pub fn update_heartbeat(&mut self, id: &str, ts: i64, now: i64, max_skew: i64) -> HeartbeatUpdate {
        let client = self.get_or_create(id);
        client.heartbeat = Some(ts);
        let skew = (ts - now).abs();
        if skew > max_skew {
            HeartbeatUpdate::Skewed { skew_seconds: skew }
        } else {
            HeartbeatUpdate::Ok
        }
    }

    pub fn update_dropped(&mut self, id: &str, value: u64) -> CounterUpdate {
        let client = self.get_or_create(id);
        match client.buffer_total_dropped_item {
            Some(old) if old == value => CounterUpdate::Unchanged,
            Some(old) if value > old => {
                client.buffer_total_dropped_item = Some(value);
                CounterUpdate::Increased { old, new: value }
            }
            Some(old) => {
                client.buffer_total_dropped_item = Some(value);
                CounterUpdate::Decreased { old, new: value }
            }
            None => {
                client.buffer_total_dropped_item = Some(value);
                CounterUpdate::Increased { old: 0, new: value }
            }
        }
    }

    pub fn update_monitored_gpio(&mut self, id: &str, names: Vec<String>) {
        self.get_or_create(id).monitored_gpio = names;
    }

    pub fn update_gpio(&mut self, id: &str, name: &str, level: bool) -> GpioUpdate {
        let client = self.get_or_create(id);
        match client.gpio.get(name).copied() {
            Some(old) if old == level => GpioUpdate::Unchanged,
            old => {
                client.gpio.insert(name.to_string(), level);
                GpioUpdate::Changed {
                    old: old.unwrap_or(false),
                    new: level,
                }
            }
        }
    }

    // scan_heartbeats returns ids whose last_seen_at is older than
    // `watchdog`, for the supervisor's periodic missed-heartbeat sweep.
    pub fn scan_stale(&self, watchdog: std::time::Duration) -> Vec<String> {
        let now = Instant::now();
        self.clients
            .values()
            .filter(|c| now.duration_since(c.last_seen_at) > watchdog)
            .map(|c| c.id.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_time_client_is_unknown() {
        let mut reg = ClientRegistry::new();
        let client = reg.get_or_create("c1");
        assert_eq!(client.status, ClientStatus::Unknown);
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn status_change_reported_once() {
        let mut reg = ClientRegistry::new();
        let first = reg.update_status("c1", ClientStatus::Online);
        assert!(matches!(first, StatusUpdate::Changed { .. }));
        let second = reg.update_status("c1", ClientStatus::Online);
        assert!(matches!(second, StatusUpdate::Unchanged));
    }

    #[test]
    fn dropped_counter_increase_only_notifies_on_increase() {
        let mut reg = ClientRegistry::new();
        assert!(matches!(
            reg.update_dropped("c1", 5),
            CounterUpdate::Increased { old: 0, new: 5 }
        ));
        assert!(matches!(
            reg.update_dropped("c1", 5),
            CounterUpdate::Unchanged
        ));
        assert!(matches!(
            reg.update_dropped("c1", 7),
            CounterUpdate::Increased { old: 5, new: 7 }
        ));
    }

    #[test]
    fn heartbeat_skew_detected() {
        let mut reg = ClientRegistry::new();
        let update = reg.update_heartbeat("c1", 980, 1000, 10);
        assert!(matches!(
            update,
            HeartbeatUpdate::Skewed { skew_seconds: 20 }
        ));
    }

    #[test]
    fn gpio_transition_reported() {
        let mut reg = ClientRegistry::new();
        reg.update_gpio("c1", "button", false);
        let update = reg.update_gpio("c1", "button", true);
        assert!(matches!(
            update,
            GpioUpdate::Changed {
                old: false,
                new: true
            }
        ));
        assert!(matches!(
            reg.update_gpio("c1", "button", true),
            GpioUpdate::Unchanged
        ));
    }
}
