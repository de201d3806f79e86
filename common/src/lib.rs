// SPDX-FileCopyrightText: 2025 All contributors
//
// SPDX-License-Identifier: GPL-2.0-or-later

//! Common Modul for the gypsy daemon
//!
//! Provides the data types that are shared across every modul: the decoded fix
//! state, device naming, the error taxonomy and the daemon configuration.

pub mod config;
pub mod device;
pub mod error;
pub mod fix;

#[cfg(test)]
mod tests;
