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

// src/topic.rs
// Parsing and composing of the fleet topic grammar, and MQTT wildcard matching.
//
//   <app>/manager/status/<manager_id>
//   <app>/client/<client_id>/out/<category>[/...]
//   <app>/client/<client_id>/in/<category>[/...]     (reserved, unhandled)

const SEGMENT_MANAGER: &str = "manager";
const SEGMENT_CLIENT: &str = "client";
const SEGMENT_STATUS: &str = "status";
const SEGMENT_OUT: &str = "out";
const SEGMENT_IN: &str = "in";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Parsed {
    ManagerStatus {
        manager_id: String,
    },
    ClientOut {
        client_id: String,
        category: String,
        rest: Vec<String>,
    },
    ClientIn {
        client_id: String,
        category: Vec<String>,
    },
    Unknown,
}

// TopicCodec parses and composes topics under a single app namespace.
#[derive(Debug, Clone)]
pub struct TopicCodec {
    app: String,
}

impl TopicCodec {
    pub fn new(app: impl Into<String>) -> Self {
        Self { app: app.into() }
    }

    pub fn app(&self) -> &str {
        &self.app
    }

    pub fn parse(&self, topic: &str) -> Parsed {
        let mut segments = topic.split('/');
        let Some(app) = segments.next() else {
            return Parsed::Unknown;
        };
        if app != self.app || app.is_empty() {
            return Parsed::Unknown;
        }
        let Some(kind) = segments.next() else {
            return Parsed::Unknown;
        };
        match kind {
            SEGMENT_MANAGER => self.parse_manager(segments),
            SEGMENT_CLIENT => self.parse_client(segments),
            _ => Parsed::Unknown,
        }
    }

    fn parse_manager<'a>(&self, mut segments: impl Iterator<Item = &'a str>) -> Parsed {
        let Some(SEGMENT_STATUS) = segments.next() else {
            return Parsed::Unknown;
        };
        let Some(manager_id) = segments.next() else {
            return Parsed::Unknown;
        };
        if manager_id.is_empty() {
            return Parsed::Unknown;
        }
        Parsed::ManagerStatus {
            manager_id: manager_id.to_string(),
        }
    }

    fn parse_client<'a>(&self, mut segments: impl Iterator<Item = &'a str>) -> Parsed {
        let Some(client_id) = segments.next() else {
            return Parsed::Unknown;
        };
        if client_id.is_empty() {
            return Parsed::Unknown;
        }
        let Some(direction) = segments.next() else {
            return Parsed::Unknown;
        };
        let remaining: Vec<String> = segments.map(str::to_string).collect();
        match direction {
            SEGMENT_OUT => {
                let mut it = remaining.into_iter();
                let Some(category) = it.next() else {
                    return Parsed::Unknown;
                };
                Parsed::ClientOut {
                    client_id: client_id.to_string(),
                    category,
                    rest: it.collect(),
                }
            }
            SEGMENT_IN => Parsed::ClientIn {
                client_id: client_id.to_string(),
                category: remaining,
            },
            _ => Parsed::Unknown,
        }
    }

    pub fn compose_manager_status(&self, manager_id: &str) -> String {
        format!("{}/{SEGMENT_MANAGER}/{SEGMENT_STATUS}/{manager_id}", self.app)
    }

    pub fn compose_client_out(&self, client_id: &str, category: &str) -> String {
        format!(
            "{}/{SEGMENT_CLIENT}/{client_id}/{SEGMENT_OUT}/{category}",
            self.app
        )
    }

    pub fn manager_status_subscription(&self) -> String {
        format!("{}/{SEGMENT_MANAGER}/{SEGMENT_STATUS}/#", self.app)
    }

    pub fn client_subscription(&self) -> String {
        format!("{}/{SEGMENT_CLIENT}/#", self.app)
    }

    // matches implements MQTT wildcard matching of `subscription` against
    // a concrete `topic`: `+` matches exactly one level, `#` (only legal
    // as the last segment) matches the remaining levels, including zero.
    pub fn matches(subscription: &str, topic: &str) -> bool {
        let sub_segments: Vec<&str> = subscription.split('/').collect();
        let topic_segments: Vec<&str> = topic.split('/').collect();
        matches_segments(&sub_segments, &topic_segments)
    }
}

fn matches_segments(sub: &[&str], topic: &[&str]) -> bool {
    match (sub.first(), topic.first()) {
        (Some(&"#"), _) => true,
        (Some(&"+"), Some(_)) => matches_segments(&sub[1..], &topic[1..]),
        (Some(&"+"), None) => false,
        (Some(s), Some(t)) => *s == *t && matches_segments(&sub[1..], &topic[1..]),
        (Some(_), None) => false,
        (None, None) => true,
        (None, Some(_)) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codec() -> TopicCodec {
        TopicCodec::new("gcn")
    }

    #[test]
    fn parses_manager_status() {
        let parsed = codec().parse("gcn/manager/status/manager_abc123");
        assert_eq!(
            parsed,
            Parsed::ManagerStatus {
                manager_id: "manager_abc123".to_string()
            }
        );
    }

    #[test]
    fn composed_manager_status_round_trips() {
        let codec = codec();
        let topic = codec.compose_manager_status("manager_abc123");
        assert_eq!(
            codec.parse(&topic),
            Parsed::ManagerStatus {
                manager_id: "manager_abc123".to_string()
            }
        );
    }

    #[test]
    fn parses_client_out_status() {
        let parsed = codec().parse("gcn/client/c1/out/status");
        assert_eq!(
            parsed,
            Parsed::ClientOut {
                client_id: "c1".to_string(),
                category: "status".to_string(),
                rest: vec![]
            }
        );
    }

    #[test]
    fn parses_client_out_gpio_with_name() {
        let parsed = codec().parse("gcn/client/c1/out/gpio/button");
        assert_eq!(
            parsed,
            Parsed::ClientOut {
                client_id: "c1".to_string(),
                category: "gpio".to_string(),
                rest: vec!["button".to_string()]
            }
        );
    }

    #[test]
    fn parses_client_in_as_reserved() {
        let parsed = codec().parse("gcn/client/c1/in/relay/set");
        assert_eq!(
            parsed,
            Parsed::ClientIn {
                client_id: "c1".to_string(),
                category: vec!["relay".to_string(), "set".to_string()],
            }
        );
    }

    #[test]
    fn unknown_app_segment() {
        assert_eq!(codec().parse("other/manager/status/x"), Parsed::Unknown);
    }

    #[test]
    fn unknown_first_segment() {
        assert_eq!(codec().parse("gcn/bogus/thing"), Parsed::Unknown);
    }

    #[test]
    fn empty_topic_is_unknown() {
        assert_eq!(codec().parse(""), Parsed::Unknown);
    }

    #[test]
    fn plus_wildcard_matches_single_level() {
        assert!(TopicCodec::matches("a/+/c", "a/b/c"));
        assert!(!TopicCodec::matches("a/+/c", "a/b/d/c"));
        assert!(!TopicCodec::matches("a/+/c", "a/c"));
    }

    #[test]
    fn hash_wildcard_matches_multi_level_including_zero() {
        assert!(TopicCodec::matches("a/#", "a"));
        assert!(TopicCodec::matches("a/#", "a/b"));
        assert!(TopicCodec::matches("a/#", "a/b/c"));
    }

    #[test]
    fn exact_match_with_no_wildcards() {
        assert!(TopicCodec::matches("a/b/c", "a/b/c"));
        assert!(!TopicCodec::matches("a/b/c", "a/b/d"));
    }
}
