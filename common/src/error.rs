// SPDX-FileCopyrightText: 2025 All contributors
//
// SPDX-License-Identifier: GPL-2.0-or-later

//! Errors reported back to requesters.

use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum GypsyError {
    /// The device identifier is not covered by the allow-list.
    #[error("Bad path: {0}")]
    Unauthorized(String),

    /// No live connection exists for the device, or the requester holds none.
    #[error("No such client: {0}")]
    NoSuchClient(String),

    /// Opening, configuring, connecting or reading the transport failed.
    #[error("Transport error on {device}: {message}")]
    Transport {
        device: String,
        errno: i32,
        message: String,
    },

    /// A single sentence could not be decoded.
    #[error("Invalid sentence: {0}")]
    DecodeSkip(String),
}

impl GypsyError {
    pub fn transport(device: &str, err: &std::io::Error) -> Self {
        GypsyError::Transport {
            device: device.to_string(),
            errno: err.raw_os_error().unwrap_or(0),
            message: err.to_string(),
        }
    }

    pub fn decode_skip(sentence: &str) -> Self {
        GypsyError::DecodeSkip(sentence.to_string())
    }
}
