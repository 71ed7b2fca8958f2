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

// src/lib.rs
// Main exports for the gcn manager engine: MQTT session lifecycle,
// client registry, topic codec, message routing and notifications.

pub mod config;
pub mod errors;
pub mod notify;
pub mod registry;
pub mod router;
pub mod session;
pub mod supervisor;
pub mod topic;

pub use config::Config;
pub use errors::GcnError;
pub use notify::{LoggingBackend, Notification, NotificationBackend, NotificationKind, NotificationSink};
pub use registry::{ClientInfo, ClientRegistry, ClientStatus, ManagerInfo};
pub use router::{MessageRouter, Publisher};
pub use rumqttc::QoS;
pub use session::{MqttSession, SessionOutcome, SessionState};
pub use supervisor::Supervisor;
pub use topic::{Parsed, TopicCodec};
