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

// src/config.rs
// Typed configuration, loaded with a defaults -> file -> environment
// layering (figment), mirroring how the rest of this workspace's
// services load their config.

use std::path::Path;

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};

use crate::errors::GcnError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    Tcp,
    Websocket,
    Unix,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Config {
    pub app: String,

    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_keep_alive: u64,
    pub mqtt_connect_timeout: u64,
    pub mqtt_reconnect: bool,
    pub mqtt_still_connecting_alert: u64,
    pub mqtt_transport: Transport,
    pub mqtt_tls_min_version: Option<String>,
    pub mqtt_tls_max_version: Option<String>,
    pub mqtt_tls_ciphers: Option<String>,
    pub mqtt_client_id_random_bytes: usize,

    pub mqtt_user_name: Option<String>,
    pub mqtt_user_password: Option<String>,

    pub idle_loop_sleep: u64,
    pub client_heartbeat_max_skew: i64,
    pub client_heartbeat_watchdog: u64,

    pub enable_email_notifications: bool,
    pub enable_sms_notifications: bool,
    pub enable_microblog_notifications: bool,

    // One CSV recipient list per notification kind (§6.4), so every
    // variant NotificationSink can dispatch has a matching config key.
    pub notify_manager_starting_recipients: Option<String>,
    pub notify_manager_exiting_recipients: Option<String>,
    pub notify_mqtt_still_connecting_recipients: Option<String>,
    pub notify_mqtt_connected_recipients: Option<String>,
    pub notify_mqtt_disconnected_recipients: Option<String>,
    pub notify_client_heartbeat_skewed_recipients: Option<String>,
    pub notify_client_heartbeat_missed_recipients: Option<String>,
    pub notify_client_dropped_items_recipients: Option<String>,
    pub notify_client_status_change_recipients: Option<String>,
    pub notify_client_gpio_change_recipients: Option<String>,

    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            app: "gcn".to_string(),
            mqtt_host: String::new(),
            mqtt_port: 1883,
            mqtt_keep_alive: 60,
            mqtt_connect_timeout: 10,
            mqtt_reconnect: true,
            mqtt_still_connecting_alert: 30,
            mqtt_transport: Transport::Tcp,
            mqtt_tls_min_version: None,
            mqtt_tls_max_version: None,
            mqtt_tls_ciphers: None,
            mqtt_client_id_random_bytes: 8,
            mqtt_user_name: None,
            mqtt_user_password: None,
            idle_loop_sleep: 1,
            client_heartbeat_max_skew: 30,
            client_heartbeat_watchdog: 300,
            enable_email_notifications: false,
            enable_sms_notifications: false,
            enable_microblog_notifications: false,
            notify_manager_starting_recipients: None,
            notify_manager_exiting_recipients: None,
            notify_mqtt_still_connecting_recipients: None,
            notify_mqtt_connected_recipients: None,
            notify_mqtt_disconnected_recipients: None,
            notify_client_heartbeat_skewed_recipients: None,
            notify_client_heartbeat_missed_recipients: None,
            notify_client_dropped_items_recipients: None,
            notify_client_status_change_recipients: None,
            notify_client_gpio_change_recipients: None,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    // load builds the config from, in increasing priority: built-in
    // defaults, an optional TOML file, then `GCN_*` environment
    // variables. mqtt_host must end up non-empty or this is a
    // ConfigurationError, matching the original's `get_env` behavior
    // of raising when a required value is absent everywhere.
    pub fn load(path: Option<&Path>) -> Result<Self, GcnError> {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));
        if let Some(path) = path {
            figment = figment.merge(Toml::file(path));
        }
        figment = figment.merge(Env::prefixed("GCN_").split("__"));

        let config: Config = figment
            .extract()
            .map_err(|e| GcnError::configuration(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    // validate rejects configurations this build cannot honor. Kept
    // separate from `load` so the rejection rules are testable without
    // a real file or environment.
    fn validate(&self) -> Result<(), GcnError> {
        if self.mqtt_host.is_empty() {
            return Err(GcnError::configuration(
                "mqtt_host is required (set it in the config file or GCN_MQTT_HOST)",
            ));
        }

        if self.mqtt_transport == Transport::Unix {
            return Err(GcnError::configuration(
                "mqtt_transport = unix is not supported by this build",
            ));
        }

        if self.mqtt_tls_min_version.is_some() || self.mqtt_tls_max_version.is_some() || self.mqtt_tls_ciphers.is_some()
        {
            // TLS transport setup is deployment-specific (CA bundle, client
            // identity) and this build carries no certificate-material
            // config keys to drive it, so the mqtt_tls_* keys are rejected
            // here, at config-load time, rather than accepted and silently
            // ignored down in the session layer.
            return Err(GcnError::tls(
                "mqtt_tls_* options are not supported by this build; leave them unset to connect over plain TCP or websocket",
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_alone_fail_without_a_host() {
        let err = Config::load(None).unwrap_err();
        assert!(matches!(err, GcnError::ConfigurationError(_)));
    }

    #[test]
    fn env_override_satisfies_required_host() {
        // SAFETY: test runs single-threaded within this process via
        // cargo test's default harness isolation per-test is not
        // guaranteed, so this test only asserts the loader logic given
        // an explicit figment provider rather than mutating real env.
        let figment = Figment::from(Serialized::defaults(Config::default()))
            .merge(figment::providers::Serialized::default(
                "mqtt_host",
                "broker.example.com",
            ));
        let config: Config = figment.extract().unwrap();
        assert_eq!(config.mqtt_host, "broker.example.com");
    }

    #[test]
    fn unix_transport_is_rejected() {
        let mut config = Config {
            mqtt_host: "broker.example.com".to_string(),
            ..Config::default()
        };
        config.mqtt_transport = Transport::Unix;
        let err = config.validate().unwrap_err();
        assert!(matches!(err, GcnError::ConfigurationError(_)));
    }

    #[test]
    fn tls_options_are_rejected_at_load_time() {
        let mut config = Config {
            mqtt_host: "broker.example.com".to_string(),
            ..Config::default()
        };
        config.mqtt_tls_ciphers = Some("ECDHE-RSA-AES256-GCM-SHA384".to_string());
        let err = config.validate().unwrap_err();
        assert!(matches!(err, GcnError::TlsError(_)));
    }

    #[test]
    fn tcp_and_websocket_transports_pass_validation() {
        let mut config = Config {
            mqtt_host: "broker.example.com".to_string(),
            ..Config::default()
        };
        config.validate().unwrap();
        config.mqtt_transport = Transport::Websocket;
        config.validate().unwrap();
    }
}
