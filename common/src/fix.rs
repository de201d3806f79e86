// SPDX-FileCopyrightText: 2025 All contributors
//
// SPDX-License-Identifier: GPL-2.0-or-later

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

/// Maximum number of satellites a single satellite report may carry.
pub const MAX_SATELLITES: usize = 32;

/// Quality of the positioning solution reported by a device.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixType {
    /// The receiver has no usable fix.
    #[default]
    None,
    /// Latitude and longitude are valid.
    Fix2d,
    /// Latitude, longitude and altitude are valid.
    Fix3d,
}

bitflags! {
    /// Which position values have been reported at least once.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
    pub struct PositionFields: u32 {
        const LATITUDE = 1 << 0;
        const LONGITUDE = 1 << 1;
        const ALTITUDE = 1 << 2;
    }
}

bitflags! {
    /// Which course values have been reported at least once.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
    pub struct CourseFields: u32 {
        const SPEED = 1 << 0;
        const DIRECTION = 1 << 1;
        const CLIMB = 1 << 2;
    }
}

bitflags! {
    /// Which dilution of precision values have been reported at least once.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
    pub struct AccuracyFields: u32 {
        const POSITION = 1 << 0;
        const HORIZONTAL = 1 << 1;
        const VERTICAL = 1 << 2;
    }
}

/// One satellite of a satellite report.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SatelliteInfo {
    /// PRN of the satellite vehicle.
    pub satellite_id: u32,
    /// Whether the receiver uses the satellite for its solution.
    pub in_use: bool,
    /// Elevation in degrees.
    pub elevation: u32,
    /// Azimuth in degrees from true north.
    pub azimuth: u32,
    /// Signal to noise ratio in dB.
    pub snr: u32,
}

/// Position values at the time of the last update.
///
/// A value is only meaningful if its bit is set in `fields`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PositionSnapshot {
    pub fields: PositionFields,
    pub timestamp: i64,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
}

/// Course values at the time of the last update.
///
/// Speed is reported in knots, direction in degrees and climb in meters per second.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CourseSnapshot {
    pub fields: CourseFields,
    pub timestamp: i64,
    pub speed: f64,
    pub direction: f64,
    pub climb: f64,
}

/// Dilution of precision values at the time of the last update.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AccuracySnapshot {
    pub fields: AccuracyFields,
    pub pdop: f64,
    pub hdop: f64,
    pub vdop: f64,
}

/// A change of the state of one device.
///
/// Every variant is raised at most once per decoded update and carries the
/// complete current value of the changed group.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "signal", content = "data", rename_all = "snake_case")]
pub enum Notification {
    ConnectionChanged(bool),
    FixStatusChanged(FixType),
    PositionChanged(PositionSnapshot),
    CourseChanged(CourseSnapshot),
    AccuracyChanged(AccuracySnapshot),
    SatellitesChanged(Vec<SatelliteInfo>),
    TimeChanged(i64),
}
