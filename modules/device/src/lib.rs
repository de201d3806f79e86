// SPDX-FileCopyrightText: 2025 All contributors
//
// SPDX-License-Identifier: GPL-2.0-or-later

pub mod aggregator;
pub mod capture;
pub mod connection;
pub mod framer;
pub mod nmea;
pub mod transport;

#[cfg(test)]
mod tests;
