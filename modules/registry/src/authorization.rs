// SPDX-FileCopyrightText: 2025 All contributors
//
// SPDX-License-Identifier: GPL-2.0-or-later

use common::{device::BluetoothAddress, error::GypsyError};
use glob::Pattern;
use tracing::{debug, warn};

/// Allow-list entry matching every valid Bluetooth address.
pub const BLUETOOTH_PATTERN: &str = "bluetooth";

#[derive(Debug)]
enum AllowPattern {
    Bluetooth,
    Glob(Pattern),
}

/// Decides which device identifiers may be opened.
///
/// Patterns are tried in configured order and the first match allows the
/// device. Globs are matched against the raw identifier, `*` also matches `/`.
#[derive(Debug, Default)]
pub struct DeviceAuthorizer {
    patterns: Vec<AllowPattern>,
}

impl DeviceAuthorizer {
    pub fn new<S: AsRef<str>>(allowed_device_globs: &[S]) -> Self {
        let patterns = allowed_device_globs
            .iter()
            .filter_map(|glob| {
                let glob = glob.as_ref();
                if glob == BLUETOOTH_PATTERN {
                    return Some(AllowPattern::Bluetooth);
                }
                match Pattern::new(glob) {
                    Ok(pattern) => Some(AllowPattern::Glob(pattern)),
                    Err(e) => {
                        warn!("Ignoring invalid device glob {}. Error: {}", glob, e);
                        None
                    }
                }
            })
            .collect();
        DeviceAuthorizer { patterns }
    }

    pub fn authorize(&self, device_path: &str) -> Result<(), GypsyError> {
        let allowed = self.patterns.iter().any(|pattern| match pattern {
            AllowPattern::Bluetooth => BluetoothAddress::is_valid(device_path),
            AllowPattern::Glob(glob) => glob.matches(device_path),
        });
        if !allowed {
            warn!("{} does not match any allowed device glob", device_path);
            return Err(GypsyError::Unauthorized(device_path.to_string()));
        }
        debug!("{} is allowed", device_path);
        Ok(())
    }
}
