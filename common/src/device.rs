// SPDX-FileCopyrightText: 2025 All contributors
//
// SPDX-License-Identifier: GPL-2.0-or-later

use serde::{Deserialize, Serialize};
use std::{fmt, path::Path, str::FromStr};
use thiserror::Error;

/// Prefix of every object path a device connection is published under.
pub const OBJECT_PATH_PREFIX: &str = "/org/freedesktop/Gypsy/";

/// Canonical registry key of a device.
///
/// The key is the basename of the device identifier with every `:` replaced by `_`,
/// so that Bluetooth addresses form a valid object path segment.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceKey(String);

impl DeviceKey {
    /// Canonicalizes a device identifier (`/dev/ttyUSB0`, `00:11:22:33:44:55`).
    pub fn from_device_path(device_path: &str) -> Self {
        let name = Path::new(device_path)
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| device_path.to_string());
        DeviceKey(name.replace(':', "_"))
    }

    /// Recovers the key from an object path produced by [`DeviceKey::object_path`].
    pub fn from_object_path(object_path: &str) -> Option<Self> {
        let name = object_path.strip_prefix(OBJECT_PATH_PREFIX)?;
        if name.is_empty() || name.contains('/') {
            return None;
        }
        Some(DeviceKey(name.to_string()))
    }

    pub fn object_path(&self) -> String {
        format!("{OBJECT_PATH_PREFIX}{}", self.0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid Bluetooth address: {0}")]
pub struct InvalidBluetoothAddress(pub String);

/// A Bluetooth device address in its textual order (`00:11:22:33:44:55` is `[0x00, .., 0x55]`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BluetoothAddress(pub [u8; 6]);

impl BluetoothAddress {
    /// Returns `true` if `address` has the `XX:XX:XX:XX:XX:XX` syntax.
    pub fn is_valid(address: &str) -> bool {
        address.parse::<BluetoothAddress>().is_ok()
    }

    /// Bytes in the little endian order the kernel expects in socket addresses.
    pub fn to_le_bytes(&self) -> [u8; 6] {
        let mut bytes = self.0;
        bytes.reverse();
        bytes
    }
}

impl FromStr for BluetoothAddress {
    type Err = InvalidBluetoothAddress;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || InvalidBluetoothAddress(s.to_string());
        if s.len() != 17 {
            return Err(invalid());
        }
        let mut bytes = [0u8; 6];
        let mut octets = s.split(':');
        for byte in bytes.iter_mut() {
            let octet = octets.next().ok_or_else(invalid)?;
            if octet.len() != 2 || !octet.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(invalid());
            }
            *byte = u8::from_str_radix(octet, 16).map_err(|_| invalid())?;
        }
        if octets.next().is_some() {
            return Err(invalid());
        }
        Ok(BluetoothAddress(bytes))
    }
}

impl fmt::Display for BluetoothAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02X}:{b:02X}:{c:02X}:{d:02X}:{e:02X}:{g:02X}")
    }
}
