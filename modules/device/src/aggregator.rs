// SPDX-FileCopyrightText: 2025 All contributors
//
// SPDX-License-Identifier: GPL-2.0-or-later

use common::fix::{
    AccuracyFields, AccuracySnapshot, CourseFields, CourseSnapshot, FixType, MAX_SATELLITES,
    Notification, PositionFields, PositionSnapshot, SatelliteInfo,
};
use module_core::{DeviceSignal, Event, EventKind};
use std::sync::Arc;
use tracing::{trace, warn};

/// Receiver of decoded sentence fields.
///
/// A decoder calls these operations while it walks through one sentence. The
/// climb computation of [`FixSink::set_position`] relies on the timestamp of
/// the same sentence having been set before, so decoders must report time
/// first.
pub trait FixSink {
    fn set_timestamp(&mut self, timestamp: i64);
    fn set_position(&mut self, fields: PositionFields, latitude: f64, longitude: f64, altitude: f64);
    fn set_course(&mut self, fields: CourseFields, speed: f64, direction: f64, climb: f64);
    fn set_accuracy(&mut self, fields: AccuracyFields, pdop: f64, hdop: f64, vdop: f64);
    /// `weak` marks a source that can't tell a 2D from a 3D fix.
    fn set_fix_type(&mut self, fix_type: FixType, weak: bool);
    /// Stages a satellite of the report currently being decoded.
    fn add_satellite(&mut self, satellite: SatelliteInfo);
    /// Drops the staged satellites, the committed list stays untouched.
    fn clear_satellites(&mut self);
    /// Replaces the committed satellites with the staged ones if they differ.
    fn commit_satellites(&mut self);
}

/// Last known fix state of one device.
///
/// Every update is debounced: a notification is only published on the event bus if
/// a value changed or was reported for the first time. Field bits are never cleared.
pub struct FixAggregator {
    object_path: String,
    sender: tokio::sync::broadcast::Sender<Event>,
    timestamp: i64,
    fix_type: FixType,
    position: PositionSnapshot,
    last_altitude_timestamp: i64,
    course: CourseSnapshot,
    accuracy: AccuracySnapshot,
    satellites: Vec<SatelliteInfo>,
    pending_satellites: Vec<SatelliteInfo>,
}

/// Stores `value` in `slot` and reports whether this is a change.
fn store(slot: &mut f64, value: f64, already_set: bool) -> bool {
    if already_set && *slot == value {
        return false;
    }
    *slot = value;
    true
}

impl FixAggregator {
    pub fn new(object_path: &str, sender: tokio::sync::broadcast::Sender<Event>) -> Self {
        FixAggregator {
            object_path: object_path.to_string(),
            sender,
            timestamp: 0,
            fix_type: FixType::None,
            position: PositionSnapshot::default(),
            last_altitude_timestamp: 0,
            course: CourseSnapshot::default(),
            accuracy: AccuracySnapshot::default(),
            satellites: Vec::with_capacity(MAX_SATELLITES),
            pending_satellites: Vec::with_capacity(MAX_SATELLITES),
        }
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn fix_type(&self) -> FixType {
        self.fix_type
    }

    pub fn position(&self) -> PositionSnapshot {
        PositionSnapshot {
            timestamp: self.timestamp,
            ..self.position
        }
    }

    pub fn course(&self) -> CourseSnapshot {
        CourseSnapshot {
            timestamp: self.timestamp,
            ..self.course
        }
    }

    pub fn accuracy(&self) -> AccuracySnapshot {
        self.accuracy
    }

    pub fn satellites(&self) -> &[SatelliteInfo] {
        &self.satellites
    }

    /// Publishes a change of the transport state.
    pub fn set_connected(&self, connected: bool) {
        self.emit(Notification::ConnectionChanged(connected));
    }

    fn emit(&self, notification: Notification) {
        trace!("{} raised {:?}", self.object_path, notification);
        let _ = self.sender.send(Event {
            kind: EventKind::DeviceSignalEvent(Arc::new(DeviceSignal {
                object_path: self.object_path.clone(),
                notification,
            })),
        });
    }
}

impl FixSink for FixAggregator {
    fn set_timestamp(&mut self, timestamp: i64) {
        if self.timestamp != timestamp {
            self.timestamp = timestamp;
            self.emit(Notification::TimeChanged(timestamp));
        }
    }

    fn set_position(&mut self, fields: PositionFields, latitude: f64, longitude: f64, altitude: f64) {
        let mut changed = false;
        if fields.contains(PositionFields::LATITUDE)
            && store(
                &mut self.position.latitude,
                latitude,
                self.position.fields.contains(PositionFields::LATITUDE),
            )
        {
            self.position.fields.insert(PositionFields::LATITUDE);
            changed = true;
        }
        if fields.contains(PositionFields::LONGITUDE)
            && store(
                &mut self.position.longitude,
                longitude,
                self.position.fields.contains(PositionFields::LONGITUDE),
            )
        {
            self.position.fields.insert(PositionFields::LONGITUDE);
            changed = true;
        }
        if fields.contains(PositionFields::ALTITUDE) {
            let known = self.position.fields.contains(PositionFields::ALTITUDE);
            if !known || self.position.altitude != altitude {
                // dt is only valid if the timestamp of this sentence was set before.
                let dt = self.timestamp - self.last_altitude_timestamp;
                if known && self.last_altitude_timestamp > 0 && dt > 0 {
                    let climb = (altitude - self.position.altitude) / dt as f64;
                    self.set_course(CourseFields::CLIMB, 0.0, 0.0, climb);
                }
                self.position.altitude = altitude;
                self.last_altitude_timestamp = self.timestamp;
                self.position.fields.insert(PositionFields::ALTITUDE);
                changed = true;
            }
        }
        if changed {
            self.emit(Notification::PositionChanged(self.position()));
        }
    }

    fn set_course(&mut self, fields: CourseFields, speed: f64, direction: f64, climb: f64) {
        let mut changed = false;
        for (flag, slot, value) in [
            (CourseFields::SPEED, &mut self.course.speed, speed),
            (CourseFields::DIRECTION, &mut self.course.direction, direction),
            (CourseFields::CLIMB, &mut self.course.climb, climb),
        ] {
            if fields.contains(flag) && store(slot, value, self.course.fields.contains(flag)) {
                self.course.fields.insert(flag);
                changed = true;
            }
        }
        if changed {
            self.emit(Notification::CourseChanged(self.course()));
        }
    }

    fn set_accuracy(&mut self, fields: AccuracyFields, pdop: f64, hdop: f64, vdop: f64) {
        let mut changed = false;
        for (flag, slot, value) in [
            (AccuracyFields::POSITION, &mut self.accuracy.pdop, pdop),
            (AccuracyFields::HORIZONTAL, &mut self.accuracy.hdop, hdop),
            (AccuracyFields::VERTICAL, &mut self.accuracy.vdop, vdop),
        ] {
            if fields.contains(flag) && store(slot, value, self.accuracy.fields.contains(flag)) {
                self.accuracy.fields.insert(flag);
                changed = true;
            }
        }
        if changed {
            self.emit(Notification::AccuracyChanged(self.accuracy));
        }
    }

    fn set_fix_type(&mut self, fix_type: FixType, weak: bool) {
        // A weak report must not demote a 3D fix only to have it promoted again
        // by the next strong report, so compare it against 2D instead.
        let baseline = if weak && self.fix_type == FixType::Fix3d {
            FixType::Fix2d
        } else {
            self.fix_type
        };
        if baseline != fix_type {
            self.fix_type = fix_type;
            self.emit(Notification::FixStatusChanged(fix_type));
        }
    }

    fn add_satellite(&mut self, satellite: SatelliteInfo) {
        if self.pending_satellites.len() >= MAX_SATELLITES {
            warn!(
                "{} reported more than {} satellites, dropping {}",
                self.object_path, MAX_SATELLITES, satellite.satellite_id
            );
            return;
        }
        self.pending_satellites.push(satellite);
    }

    fn clear_satellites(&mut self) {
        self.pending_satellites.clear();
    }

    fn commit_satellites(&mut self) {
        let changed = self.pending_satellites.len() != self.satellites.len()
            || self
                .pending_satellites
                .iter()
                .zip(self.satellites.iter())
                .any(|(new, old)| new != old);
        if changed {
            std::mem::swap(&mut self.satellites, &mut self.pending_satellites);
            self.emit(Notification::SatellitesChanged(self.satellites.clone()));
        }
        self.pending_satellites.clear();
    }
}
