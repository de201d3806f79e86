// SPDX-FileCopyrightText: 2025 All contributors
//
// SPDX-License-Identifier: GPL-2.0-or-later

//! NMEA-0183 sentence decoder.
//!
//! Understands `GGA`, `RMC`, `GSA` and `GSV` from any talker. Other sentence
//! types are accepted and ignored.

use crate::aggregator::FixSink;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Utc};
use common::{
    error::GypsyError,
    fix::{AccuracyFields, CourseFields, FixType, PositionFields, SatelliteInfo},
};
use tracing::debug;

/// Decodes one complete sentence and reports its fields to a [`FixSink`].
pub trait SentenceDecoder: Send {
    fn decode(&mut self, sentence: &str, sink: &mut dyn FixSink) -> Result<(), GypsyError>;
}

/// Decode context of one device connection.
#[derive(Debug, Default)]
pub struct NmeaDecoder {
    /// Date of the last `RMC` sentence.
    date: Option<NaiveDate>,
    /// PRNs the last `GSA` sentence reported as used for the fix.
    in_use: Vec<u32>,
    /// Number of the next expected `GSV` message, 0 if no report is in progress.
    next_gsv: u32,
}

type Field<T> = Result<Option<T>, ()>;

fn number<T: std::str::FromStr>(field: &str) -> Field<T> {
    if field.is_empty() {
        return Ok(None);
    }
    field.parse().map(Some).map_err(|_| ())
}

fn time(field: &str) -> Field<NaiveTime> {
    if field.is_empty() {
        return Ok(None);
    }
    if field.len() < 6 || !field.is_ascii() {
        return Err(());
    }
    let hour: u32 = field[0..2].parse().map_err(|_| ())?;
    let minute: u32 = field[2..4].parse().map_err(|_| ())?;
    let seconds: f64 = field[4..].parse().map_err(|_| ())?;
    let millis = ((seconds.fract() * 1000.0).round() as u32).min(999);
    NaiveTime::from_hms_milli_opt(hour, minute, seconds.trunc() as u32, millis)
        .map(Some)
        .ok_or(())
}

fn date(field: &str) -> Field<NaiveDate> {
    if field.is_empty() {
        return Ok(None);
    }
    if field.len() != 6 || !field.is_ascii() {
        return Err(());
    }
    let day: u32 = field[0..2].parse().map_err(|_| ())?;
    let month: u32 = field[2..4].parse().map_err(|_| ())?;
    let year: i32 = field[4..6].parse().map_err(|_| ())?;
    NaiveDate::from_ymd_opt(2000 + year, month, day)
        .map(Some)
        .ok_or(())
}

/// Converts `dddmm.mmmm` plus hemisphere into signed decimal degrees.
fn coordinate(value: &str, hemisphere: &str) -> Field<f64> {
    let Some(raw) = number::<f64>(value)? else {
        return Ok(None);
    };
    let degrees = (raw / 100.0).trunc();
    let decimal = degrees + (raw - degrees * 100.0) / 60.0;
    match hemisphere {
        "N" | "E" => Ok(Some(decimal)),
        "S" | "W" => Ok(Some(-decimal)),
        _ => Err(()),
    }
}

/// Strips framing and checksum and splits the payload into its fields.
fn fields(sentence: &str) -> Option<Vec<&str>> {
    let payload = sentence.trim().strip_prefix('$')?;
    let payload = match payload.split_once('*') {
        Some((payload, checksum)) => {
            let expected = u8::from_str_radix(checksum, 16).ok()?;
            let actual = payload.bytes().fold(0u8, |sum, byte| sum ^ byte);
            if actual != expected {
                debug!("Checksum mismatch: {:02X} != {:02X}", actual, expected);
                return None;
            }
            payload
        }
        None => payload,
    };
    let fields: Vec<&str> = payload.split(',').collect();
    if fields[0].len() < 5 {
        return None;
    }
    Some(fields)
}

impl NmeaDecoder {
    fn timestamp(&self, time: NaiveTime) -> i64 {
        let date = self.date.unwrap_or_else(|| Utc::now().date_naive());
        NaiveDateTime::new(date, time).and_utc().timestamp()
    }

    fn report_position(
        sink: &mut dyn FixSink,
        latitude: Option<f64>,
        longitude: Option<f64>,
        altitude: Option<f64>,
    ) {
        let mut fields = PositionFields::empty();
        fields.set(PositionFields::LATITUDE, latitude.is_some());
        fields.set(PositionFields::LONGITUDE, longitude.is_some());
        fields.set(PositionFields::ALTITUDE, altitude.is_some());
        if !fields.is_empty() {
            sink.set_position(
                fields,
                latitude.unwrap_or_default(),
                longitude.unwrap_or_default(),
                altitude.unwrap_or_default(),
            );
        }
    }

    /// `$--GGA,time,lat,N,lon,E,quality,satellites,hdop,altitude,M,...`
    fn decode_gga(&mut self, f: &[&str], sink: &mut dyn FixSink) -> Result<(), ()> {
        if f.len() < 10 {
            return Err(());
        }
        let time = time(f[1])?;
        let latitude = coordinate(f[2], f[3])?;
        let longitude = coordinate(f[4], f[5])?;
        let quality = number::<u32>(f[6])?;
        let hdop = number::<f64>(f[8])?;
        let altitude = number::<f64>(f[9])?;

        if let Some(time) = time {
            sink.set_timestamp(self.timestamp(time));
        }
        Self::report_position(sink, latitude, longitude, altitude);
        if let Some(hdop) = hdop {
            sink.set_accuracy(AccuracyFields::HORIZONTAL, 0.0, hdop, 0.0);
        }
        if let Some(quality) = quality {
            let fix_type = if quality == 0 {
                FixType::None
            } else {
                FixType::Fix2d
            };
            sink.set_fix_type(fix_type, true);
        }
        Ok(())
    }

    /// `$--RMC,time,status,lat,N,lon,E,speed,course,date,...`
    fn decode_rmc(&mut self, f: &[&str], sink: &mut dyn FixSink) -> Result<(), ()> {
        if f.len() < 10 {
            return Err(());
        }
        let time = time(f[1])?;
        let fix_type = match f[2] {
            "A" => FixType::Fix2d,
            "V" => FixType::None,
            _ => return Err(()),
        };
        let latitude = coordinate(f[3], f[4])?;
        let longitude = coordinate(f[5], f[6])?;
        let speed = number::<f64>(f[7])?;
        let direction = number::<f64>(f[8])?;
        let date = date(f[9])?;

        if date.is_some() {
            self.date = date;
        }
        if let Some(time) = time {
            sink.set_timestamp(self.timestamp(time));
        }
        Self::report_position(sink, latitude, longitude, None);
        let mut fields = CourseFields::empty();
        fields.set(CourseFields::SPEED, speed.is_some());
        fields.set(CourseFields::DIRECTION, direction.is_some());
        if !fields.is_empty() {
            sink.set_course(
                fields,
                speed.unwrap_or_default(),
                direction.unwrap_or_default(),
                0.0,
            );
        }
        sink.set_fix_type(fix_type, true);
        Ok(())
    }

    /// `$--GSA,mode,fix,prn x 12,pdop,hdop,vdop`
    fn decode_gsa(&mut self, f: &[&str], sink: &mut dyn FixSink) -> Result<(), ()> {
        if f.len() < 18 {
            return Err(());
        }
        let fix_type = match number::<u32>(f[2])? {
            None => None,
            Some(1) => Some(FixType::None),
            Some(2) => Some(FixType::Fix2d),
            Some(3) => Some(FixType::Fix3d),
            Some(_) => return Err(()),
        };
        let mut in_use = Vec::with_capacity(12);
        for field in &f[3..15] {
            if let Some(prn) = number::<u32>(field)? {
                in_use.push(prn);
            }
        }
        let pdop = number::<f64>(f[15])?;
        let hdop = number::<f64>(f[16])?;
        let vdop = number::<f64>(f[17])?;

        self.in_use = in_use;
        if let Some(fix_type) = fix_type {
            sink.set_fix_type(fix_type, false);
        }
        let mut fields = AccuracyFields::empty();
        fields.set(AccuracyFields::POSITION, pdop.is_some());
        fields.set(AccuracyFields::HORIZONTAL, hdop.is_some());
        fields.set(AccuracyFields::VERTICAL, vdop.is_some());
        if !fields.is_empty() {
            sink.set_accuracy(
                fields,
                pdop.unwrap_or_default(),
                hdop.unwrap_or_default(),
                vdop.unwrap_or_default(),
            );
        }
        Ok(())
    }

    /// `$--GSV,messages,number,satellites,{prn,elevation,azimuth,snr} x 4`
    fn decode_gsv(&mut self, f: &[&str], sink: &mut dyn FixSink) -> Result<(), ()> {
        if f.len() < 4 {
            return Err(());
        }
        let total = number::<u32>(f[1])?.ok_or(())?;
        let message = number::<u32>(f[2])?.ok_or(())?;
        let count = number::<u32>(f[3])?.unwrap_or(0);
        if message == 0 || message > total {
            return Err(());
        }

        let in_message = count.saturating_sub((message - 1) * 4).min(4) as usize;
        let mut satellites = Vec::with_capacity(in_message);
        for index in 0..in_message {
            let base = 4 + index * 4;
            let field = |offset: usize| f.get(base + offset).copied().unwrap_or("");
            let Some(satellite_id) = number::<u32>(field(0))? else {
                continue;
            };
            satellites.push(SatelliteInfo {
                satellite_id,
                in_use: self.in_use.contains(&satellite_id),
                elevation: number::<u32>(field(1))?.unwrap_or(0),
                azimuth: number::<u32>(field(2))?.unwrap_or(0),
                snr: number::<u32>(field(3))?.unwrap_or(0),
            });
        }

        if message == 1 {
            sink.clear_satellites();
            self.next_gsv = 1;
        }
        if message != self.next_gsv {
            debug!(
                "Satellite message {} of {} out of sequence, dropping report",
                message, total
            );
            sink.clear_satellites();
            self.next_gsv = 0;
            return Ok(());
        }
        for satellite in satellites {
            sink.add_satellite(satellite);
        }
        if message == total {
            sink.commit_satellites();
            self.next_gsv = 0;
        } else {
            self.next_gsv = message + 1;
        }
        Ok(())
    }
}

impl SentenceDecoder for NmeaDecoder {
    fn decode(&mut self, sentence: &str, sink: &mut dyn FixSink) -> Result<(), GypsyError> {
        let f = fields(sentence).ok_or_else(|| GypsyError::decode_skip(sentence))?;
        let address = f[0];
        // The talker id in front of the sentence type is ignored.
        let result = match address.get(address.len() - 3..) {
            Some("GGA") => self.decode_gga(&f, sink),
            Some("RMC") => self.decode_rmc(&f, sink),
            Some("GSA") => self.decode_gsa(&f, sink),
            Some("GSV") => self.decode_gsv(&f, sink),
            _ => Ok(()),
        };
        result.map_err(|_| GypsyError::decode_skip(sentence))
    }
}
