// SPDX-FileCopyrightText: 2025 All contributors
//
// SPDX-License-Identifier: GPL-2.0-or-later

use std::{
    ffi::OsString,
    fs::File,
    io::Write,
    path::{Path, PathBuf},
    pin::Pin,
    task::{Context, Poll, ready},
};
use tokio::io::{AsyncRead, ReadBuf};
use tracing::warn;

/// Path of the raw capture file of `device_path`: `<prefix>.<basename>`.
pub fn capture_path(prefix: &Path, device_path: &str) -> PathBuf {
    let device = Path::new(device_path)
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_else(|| OsString::from(device_path));
    let mut name = prefix.as_os_str().to_os_string();
    name.push(".");
    name.push(device);
    PathBuf::from(name)
}

/// Creates (or truncates) the raw capture file of `device_path`.
pub fn open_capture(prefix: &Path, device_path: &str) -> std::io::Result<File> {
    File::create(capture_path(prefix, device_path))
}

/// Mirrors every byte read from `inner` into an unbuffered capture file.
///
/// A failing capture write disables the capture but never the read.
pub struct CaptureReader<R> {
    inner: R,
    capture: Option<File>,
}

impl<R> CaptureReader<R> {
    pub fn new(inner: R, capture: Option<File>) -> Self {
        CaptureReader { inner, capture }
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for CaptureReader<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        ready!(Pin::new(&mut this.inner).poll_read(cx, buf))?;
        if let Some(capture) = this.capture.as_mut()
            && let Err(e) = capture.write_all(&buf.filled()[before..])
        {
            warn!("Failed to write raw capture, disabling it. Error: {}", e);
            this.capture = None;
        }
        Poll::Ready(Ok(()))
    }
}
