// SPDX-FileCopyrightText: 2025 All contributors
//
// SPDX-License-Identifier: GPL-2.0-or-later

use common::fix::Notification;
use module_core::{Event, EventKind};
use tokio::sync::broadcast::Receiver;

const OBJECT_PATH: &str = "/org/freedesktop/Gypsy/ttyUSB0";

/// Drains every notification published so far.
fn notifications(rx: &mut Receiver<Event>) -> Vec<Notification> {
    let mut notifications = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let EventKind::DeviceSignalEvent(signal) = event.kind {
            assert_eq!(signal.object_path, OBJECT_PATH);
            notifications.push(signal.notification.clone());
        }
    }
    notifications
}

mod test_aggregator;
