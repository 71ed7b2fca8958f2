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

// src/main.rs
// Entrypoint: load config, initialize logging, build the supervisor,
// install signal handlers, run to completion.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use gcn_core::{Config, LoggingBackend, NotificationKind, NotificationSink, Supervisor};

#[derive(Parser)]
#[command(name = "gcn-manager")]
#[command(about = "MQTT fleet manager: tracks client liveness and state over a topic tree.")]
struct Cli {
    /// Path to a TOML config file. Values are overridable with GCN_* env vars.
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let cli = Cli::parse();

    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            tracing::error!(error = %err, "failed to load configuration");
            return std::process::ExitCode::from(2);
        }
    };

    let mut sink = NotificationSink::new();
    let logging_backend = Arc::new(LoggingBackend);
    sink.register_all(
        &[
            NotificationKind::ManagerStarting,
            NotificationKind::ManagerExiting,
            NotificationKind::MqttStillConnecting,
            NotificationKind::MqttConnected,
            NotificationKind::MqttDisconnected,
            NotificationKind::ClientHeartbeatSkewed,
            NotificationKind::ClientHeartbeatMissed,
            NotificationKind::ClientDroppedItems,
            NotificationKind::ClientStatusChange,
            NotificationKind::ClientGpioChange,
        ],
        logging_backend,
    );

    let supervisor = Supervisor::new(config, sink);
    tracing::info!(manager_id = supervisor.manager_id(), "starting up");

    #[cfg(unix)]
    let _signal_task = supervisor.install_signal_handlers();

    match supervisor.run().await {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %err, "manager exited with error");
            std::process::ExitCode::from(err.exit_code() as u8)
        }
    }
}
