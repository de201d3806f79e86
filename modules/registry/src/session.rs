// SPDX-FileCopyrightText: 2025 All contributors
//
// SPDX-License-Identifier: GPL-2.0-or-later

use crate::authorization::DeviceAuthorizer;
use common::{device::DeviceKey, error::GypsyError};
use device::connection::DeviceConnection;
use module_core::{DeviceCall, DeviceReply, Event, PeerId};
use std::{collections::HashMap, path::PathBuf, time::Duration};
use tokio::time::Instant;
use tracing::{debug, info};

/// Grace period between the release of the last connection and termination.
pub const TERMINATE_TIMEOUT: Duration = Duration::from_secs(10);

struct SessionEntry {
    connection: DeviceConnection,
    refcount: usize,
}

/// Shares one [`DeviceConnection`] per device between all requesters.
///
/// Every successful `create` takes one reference, `shutdown` and peer departure
/// give references back. The connection is dropped, and thereby closed, with its
/// last reference. Once no references are left and `auto_terminate` is set, the
/// idle deadline is armed.
pub struct SessionRegistry {
    authorizer: DeviceAuthorizer,
    sender: tokio::sync::broadcast::Sender<Event>,
    capture_prefix: Option<PathBuf>,
    auto_terminate: bool,
    entries: HashMap<DeviceKey, SessionEntry>,
    /// Keys referenced by every requester, once per reference it holds.
    owners: HashMap<PeerId, Vec<DeviceKey>>,
    client_count: usize,
    terminate_at: Option<Instant>,
}

impl SessionRegistry {
    pub fn new(
        authorizer: DeviceAuthorizer,
        sender: tokio::sync::broadcast::Sender<Event>,
        capture_prefix: Option<PathBuf>,
        auto_terminate: bool,
    ) -> Self {
        SessionRegistry {
            authorizer,
            sender,
            capture_prefix,
            auto_terminate,
            entries: HashMap::new(),
            owners: HashMap::new(),
            client_count: 0,
            terminate_at: None,
        }
    }

    /// Returns the object path of the connection to `device_path`, creating it if needed.
    pub fn create(&mut self, peer: PeerId, device_path: &str) -> Result<String, GypsyError> {
        debug!("Creating client for {}", device_path);
        self.authorizer.authorize(device_path)?;

        let key = DeviceKey::from_device_path(device_path);
        let entry = self.entries.entry(key.clone()).or_insert_with(|| {
            info!("New connection to {} as {}", device_path, key);
            SessionEntry {
                connection: DeviceConnection::new(
                    device_path,
                    self.sender.clone(),
                    self.capture_prefix.clone(),
                ),
                refcount: 0,
            }
        });
        entry.refcount += 1;
        let object_path = entry.connection.object_path().to_string();

        self.owners.entry(peer).or_default().push(key);
        self.client_count += 1;
        if self.terminate_at.take().is_some() {
            debug!("Idle termination cancelled");
        }
        Ok(object_path)
    }

    /// Gives back one reference `peer` holds on `device_path`.
    pub fn shutdown(&mut self, peer: PeerId, device_path: &str) -> Result<(), GypsyError> {
        let key = DeviceKey::from_device_path(device_path);
        let owned = self
            .owners
            .get_mut(&peer)
            .and_then(|keys| keys.iter().position(|k| *k == key).map(|i| keys.swap_remove(i)));
        if owned.is_none() {
            debug!("Peer {} holds no connection to {}", peer, device_path);
            return Err(GypsyError::NoSuchClient(device_path.to_string()));
        }
        if self.owners.get(&peer).is_some_and(|keys| keys.is_empty()) {
            self.owners.remove(&peer);
        }
        self.release(&key);
        Ok(())
    }

    /// Gives back every reference of a requester that went away.
    pub fn peer_departed(&mut self, peer: PeerId) {
        let Some(keys) = self.owners.remove(&peer) else {
            return;
        };
        debug!("Peer {} departed, releasing {} connections", peer, keys.len());
        for key in keys {
            self.release(&key);
        }
    }

    fn release(&mut self, key: &DeviceKey) {
        if let Some(entry) = self.entries.get_mut(key) {
            entry.refcount -= 1;
            if entry.refcount == 0 {
                info!("Last reference to {} released", key);
                self.entries.remove(key);
            }
        }

        self.client_count = self.client_count.saturating_sub(1);
        if self.client_count == 0 && self.auto_terminate && self.terminate_at.is_none() {
            debug!("No clients left, terminating in {:?}", TERMINATE_TIMEOUT);
            self.terminate_at = Some(Instant::now() + TERMINATE_TIMEOUT);
        }
    }

    /// Invokes a device method on the connection published under `call.object_path`.
    pub fn call(&self, call: &DeviceCall) -> Result<DeviceReply, GypsyError> {
        let entry = DeviceKey::from_object_path(&call.object_path)
            .and_then(|key| self.entries.get(&key))
            .ok_or_else(|| GypsyError::NoSuchClient(call.object_path.clone()))?;
        entry.connection.call(call.method)
    }

    /// Deadline of the armed idle termination.
    pub fn terminate_deadline(&self) -> Option<Instant> {
        self.terminate_at
    }

    /// Disarms the idle deadline, returns whether the registry is still idle.
    pub fn expire_idle(&mut self) -> bool {
        self.terminate_at = None;
        self.client_count == 0
    }

    pub fn client_count(&self) -> usize {
        self.client_count
    }

    /// Number of references held on the connection to `device_path`.
    pub fn reference_count(&self, device_path: &str) -> usize {
        self.entries
            .get(&DeviceKey::from_device_path(device_path))
            .map_or(0, |entry| entry.refcount)
    }
}
