// SPDX-FileCopyrightText: 2025 All contributors
//
// SPDX-License-Identifier: GPL-2.0-or-later

//! Line format of the bus socket.
//!
//! Every line is one JSON object. Requests carry a caller chosen `id` that is
//! echoed in the reply:
//!
//! ```text
//! -> {"id":1,"method":"create","device":"/dev/ttyUSB0"}
//! <- {"id":1,"result":"/org/freedesktop/Gypsy/ttyUSB0"}
//! -> {"id":2,"method":"get_fix_status","path":"/org/freedesktop/Gypsy/ttyUSB0"}
//! <- {"id":2,"result":"fix3d"}
//! <- {"path":"/org/freedesktop/Gypsy/ttyUSB0","signal":"time_changed","data":764426119}
//! ```

use common::fix::Notification;
use module_core::{DeviceMethod, DeviceReply};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct WireRequest {
    pub id: usize,
    #[serde(flatten)]
    pub method: WireMethod,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum WireMethod {
    Create { device: String },
    Shutdown { device: String },
    Start { path: String },
    Stop { path: String },
    GetConnectionStatus { path: String },
    GetFixStatus { path: String },
    GetPosition { path: String },
    GetCourse { path: String },
    GetAccuracy { path: String },
    GetSatellites { path: String },
    GetTime { path: String },
}

impl WireMethod {
    /// Splits a device method into its object path and method, `None` for registry methods.
    pub fn device_call(self) -> Option<(String, DeviceMethod)> {
        let call = match self {
            WireMethod::Create { .. } | WireMethod::Shutdown { .. } => return None,
            WireMethod::Start { path } => (path, DeviceMethod::Start),
            WireMethod::Stop { path } => (path, DeviceMethod::Stop),
            WireMethod::GetConnectionStatus { path } => (path, DeviceMethod::GetConnectionStatus),
            WireMethod::GetFixStatus { path } => (path, DeviceMethod::GetFixStatus),
            WireMethod::GetPosition { path } => (path, DeviceMethod::GetPosition),
            WireMethod::GetCourse { path } => (path, DeviceMethod::GetCourse),
            WireMethod::GetAccuracy { path } => (path, DeviceMethod::GetAccuracy),
            WireMethod::GetSatellites { path } => (path, DeviceMethod::GetSatellites),
            WireMethod::GetTime { path } => (path, DeviceMethod::GetTime),
        };
        Some(call)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum WireReply {
    Ok { id: usize, result: Value },
    Err { id: Option<usize>, error: String },
}

#[derive(Debug, Serialize)]
pub struct WireSignal<'a> {
    pub path: &'a str,
    #[serde(flatten)]
    pub notification: &'a Notification,
}

pub fn parse_request(line: &str) -> Result<WireRequest, WireReply> {
    serde_json::from_str(line).map_err(|e| WireReply::Err {
        id: request_id(line),
        error: format!("Invalid request: {e}"),
    })
}

/// Recovers the id of a request that failed to parse, if it has one.
fn request_id(line: &str) -> Option<usize> {
    let value: Value = serde_json::from_str(line).ok()?;
    value.get("id")?.as_u64().map(|id| id as usize)
}

pub fn reply_value(reply: &DeviceReply) -> serde_json::Result<Value> {
    match reply {
        DeviceReply::Done => Ok(Value::Null),
        DeviceReply::ConnectionStatus(connected) => serde_json::to_value(connected),
        DeviceReply::FixStatus(fix_type) => serde_json::to_value(fix_type),
        DeviceReply::Position(position) => serde_json::to_value(position),
        DeviceReply::Course(course) => serde_json::to_value(course),
        DeviceReply::Accuracy(accuracy) => serde_json::to_value(accuracy),
        DeviceReply::Satellites(satellites) => serde_json::to_value(satellites),
        DeviceReply::Time(timestamp) => serde_json::to_value(timestamp),
    }
}
