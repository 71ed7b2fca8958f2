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

// src/errors.rs
// Error types for the gcn manager's MQTT session and routing engine.

use thiserror::Error;

// GcnError covers every failure class the manager can surface. Each
// variant carries enough context to decide, at the call site, whether
// the condition is fatal (configuration, TLS) or something the session
// is expected to recover from on its own (transient network, protocol).
#[derive(Error, Debug)]
pub enum GcnError {
    // ConfigurationError occurs when required configuration is missing
    // or self-contradictory. Always fatal at startup.
    #[error("configuration error: {0}")]
    ConfigurationError(String),

    // TransientNetworkError wraps connection failures the session's
    // backoff loop is expected to retry (DNS, refused, timeout).
    #[error("transient network error: {0}")]
    TransientNetworkError(#[from] rumqttc::ConnectionError),

    // TlsError occurs when TLS/mTLS setup itself is broken (bad cert,
    // unsupported cipher). Retrying will not heal this.
    #[error("TLS configuration error: {0}")]
    TlsError(String),

    // ProtocolError covers broker-rejected CONNECT/SUBSCRIBE reason
    // codes and other MQTT-level protocol violations.
    #[error("MQTT protocol error: {0}")]
    ProtocolError(String),

    // MessageFormatError occurs when an inbound topic or payload does
    // not conform to the expected grammar. Never fatal; the message is
    // dropped and routing continues.
    #[error("message format error: {0}")]
    MessageFormatError(String),

    // HandlerError wraps any error raised while routing a single
    // message. Never fatal to the session.
    #[error("handler error: {0}")]
    HandlerError(String),

    // ShutdownRequested is not a failure; it is how the session signals
    // that it is unwinding in response to an operator-requested stop.
    #[error("shutdown requested")]
    ShutdownRequested,

    // ClientError surfaces rumqttc's client-side send failures (e.g.
    // publishing after the event loop has gone away).
    #[error("MQTT client error: {0}")]
    ClientError(#[from] rumqttc::ClientError),
}

impl GcnError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::ConfigurationError(message.into())
    }

    pub fn tls(message: impl Into<String>) -> Self {
        Self::TlsError(message.into())
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::ProtocolError(message.into())
    }

    pub fn message_format(message: impl Into<String>) -> Self {
        Self::MessageFormatError(message.into())
    }

    pub fn handler(message: impl Into<String>) -> Self {
        Self::HandlerError(message.into())
    }

    // from_connection_error classifies a live rumqttc::ConnectionError the
    // way build_mqtt_options's static pre-connect guard cannot: a real TLS
    // handshake failure (bad cert, rejected cipher/version) arrives from
    // `eventloop.poll()` wrapped as `ConnectionError::Io`, indistinguishable
    // by type alone from a plain network blip. Session::run uses this
    // instead of a bare `GcnError::from` so that class of failure fails
    // fast via `is_fatal` rather than retrying forever under Backoff.
    pub fn from_connection_error(err: rumqttc::ConnectionError) -> Self {
        if let rumqttc::ConnectionError::Io(io_err) = &err {
            let message = io_err.to_string().to_lowercase();
            let looks_like_tls_failure = message.contains("tls")
                || message.contains("certificate")
                || message.contains("handshake")
                || message.contains("decrypt");
            if looks_like_tls_failure {
                return Self::TlsError(io_err.to_string());
            }
        }
        Self::TransientNetworkError(err)
    }

    // Whether the backoff loop in MqttSession should retry after this
    // error, rather than transition to Failed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientNetworkError(_))
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::ConfigurationError(_) | Self::TlsError(_))
    }

    // Process exit code per the external interface contract: 0 for a
    // clean shutdown, 2 for configuration/unrecoverable failures.
    pub fn exit_code(&self) -> i32 {
        if self.is_fatal() { 2 } else { 0 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn certificate_io_errors_classify_as_fatal_tls() {
        let io_err = std::io::Error::other("invalid peer certificate: UnknownIssuer");
        let classified = GcnError::from_connection_error(rumqttc::ConnectionError::Io(io_err));
        assert!(matches!(classified, GcnError::TlsError(_)));
        assert!(classified.is_fatal());
    }

    #[test]
    fn plain_io_errors_stay_retryable() {
        let io_err = std::io::Error::other("connection reset by peer");
        let classified = GcnError::from_connection_error(rumqttc::ConnectionError::Io(io_err));
        assert!(matches!(classified, GcnError::TransientNetworkError(_)));
        assert!(classified.is_retryable());
    }
}
