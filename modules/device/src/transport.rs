// SPDX-FileCopyrightText: 2025 All contributors
//
// SPDX-License-Identifier: GPL-2.0-or-later

//! Non-blocking byte streams to GPS devices.
//!
//! Identifiers starting with `/` are opened as files, serial lines among them are
//! configured the way NMEA-0183 prescribes: 4800 baud, 8 data bits, no parity,
//! 1 stop bit and no handshake. Regular files, e.g. recorded logs, are read
//! through to their end. Every other identifier is a Bluetooth address that is
//! connected on RFCOMM channel 1.

use common::device::BluetoothAddress;
use nix::sys::termios::{self, BaudRate, ControlFlags, InputFlags, SetArg};
use std::{
    fs::{File, OpenOptions},
    io::{self, IsTerminal, Read},
    os::{
        fd::{AsRawFd, FromRawFd, OwnedFd},
        unix::fs::OpenOptionsExt,
    },
    pin::Pin,
    task::{Context, Poll, ready},
};
use tokio::io::{AsyncRead, ReadBuf, unix::AsyncFd};
use tracing::debug;

const BTPROTO_RFCOMM: libc::c_int = 3;
const RFCOMM_CHANNEL: u8 = 1;

/// `struct sockaddr_rc` of the kernel's RFCOMM socket interface.
#[repr(C)]
struct SockaddrRc {
    rc_family: libc::sa_family_t,
    rc_bdaddr: [u8; 6],
    rc_channel: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TransportKind {
    File,
    Bluetooth,
}

#[derive(Debug)]
enum Source {
    /// Descriptors that support readiness polling: terminals, pipes and sockets.
    Polled(AsyncFd<File>),
    /// Regular files can't be polled and are read on the blocking pool instead.
    Regular(tokio::fs::File),
}

/// An open, non-blocking connection to a device.
///
/// Must be created inside a tokio runtime, the descriptor is registered with its reactor.
#[derive(Debug)]
pub struct Transport {
    source: Source,
    kind: TransportKind,
}

impl Transport {
    pub fn open(device_path: &str) -> io::Result<Transport> {
        if device_path.starts_with('/') {
            open_file(device_path)
        } else {
            open_rfcomm(device_path)
        }
    }

    /// Waits until the device is ready to deliver data.
    ///
    /// Files are ready right away. An RFCOMM socket connects asynchronously and is
    /// ready once it becomes writable without a pending socket error.
    pub async fn connected(&self) -> io::Result<()> {
        match &self.source {
            Source::Polled(fd) if self.kind == TransportKind::Bluetooth => {
                let _guard = fd.writable().await?;
                socket_error(fd.get_ref())
            }
            _ => Ok(()),
        }
    }
}

impl AsyncRead for Transport {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let fd = match &mut self.get_mut().source {
            Source::Regular(file) => return Pin::new(file).poll_read(cx, buf),
            Source::Polled(fd) => fd,
        };
        loop {
            let mut guard = ready!(fd.poll_read_ready(cx))?;
            let unfilled = buf.initialize_unfilled();
            match guard.try_io(|inner| {
                let mut file: &File = inner.get_ref();
                file.read(unfilled)
            }) {
                Ok(Ok(len)) => {
                    buf.advance(len);
                    return Poll::Ready(Ok(()));
                }
                Ok(Err(err)) => return Poll::Ready(Err(err)),
                Err(_would_block) => continue,
            }
        }
    }
}

fn open_file(device_path: &str) -> io::Result<Transport> {
    let file = OpenOptions::new()
        .read(true)
        .custom_flags(libc::O_NOCTTY | libc::O_NONBLOCK)
        .open(device_path)?;
    let source = if file.is_terminal() {
        configure_serial_line(&file)?;
        Source::Polled(AsyncFd::new(file)?)
    } else if file.metadata()?.is_file() {
        debug!("{} is a regular file, replaying it", device_path);
        Source::Regular(tokio::fs::File::from_std(file))
    } else {
        debug!("{} is not a terminal, skipping line setup", device_path);
        Source::Polled(AsyncFd::new(file)?)
    };
    Ok(Transport {
        source,
        kind: TransportKind::File,
    })
}

fn configure_serial_line(file: &File) -> io::Result<()> {
    let mut term = termios::tcgetattr(file)?;
    term.control_flags.remove(
        ControlFlags::PARENB
            | ControlFlags::PARODD
            | ControlFlags::CRTSCTS
            | ControlFlags::CSIZE
            | ControlFlags::CSTOPB,
    );
    term.control_flags
        .insert(ControlFlags::CREAD | ControlFlags::CLOCAL | ControlFlags::CS8);
    term.input_flags
        .remove(InputFlags::PARMRK | InputFlags::INPCK);
    termios::cfsetspeed(&mut term, BaudRate::B4800)?;
    termios::tcsetattr(file, SetArg::TCSANOW, &term)?;
    Ok(())
}

fn open_rfcomm(address: &str) -> io::Result<Transport> {
    let address: BluetoothAddress = address
        .parse()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

    // SAFETY: socket(2) has no memory preconditions, the descriptor is owned right below.
    let raw = unsafe {
        libc::socket(
            libc::AF_BLUETOOTH,
            libc::SOCK_STREAM | libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC,
            BTPROTO_RFCOMM,
        )
    };
    if raw < 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: `raw` is a freshly created descriptor nobody else owns.
    let socket = unsafe { OwnedFd::from_raw_fd(raw) };

    let addr = SockaddrRc {
        rc_family: libc::AF_BLUETOOTH as libc::sa_family_t,
        rc_bdaddr: address.to_le_bytes(),
        rc_channel: RFCOMM_CHANNEL,
    };
    // SAFETY: `addr` lives across the call and the passed length is its size.
    let ret = unsafe {
        libc::connect(
            socket.as_raw_fd(),
            &addr as *const SockaddrRc as *const libc::sockaddr,
            std::mem::size_of::<SockaddrRc>() as libc::socklen_t,
        )
    };
    if ret < 0 {
        let err = io::Error::last_os_error();
        match err.raw_os_error() {
            Some(libc::EINPROGRESS) | Some(libc::EAGAIN) => {
                debug!("Connection to {} in progress", address);
            }
            _ => return Err(err),
        }
    }
    Ok(Transport {
        source: Source::Polled(AsyncFd::new(File::from(socket))?),
        kind: TransportKind::Bluetooth,
    })
}

fn socket_error(file: &File) -> io::Result<()> {
    let mut error: libc::c_int = 0;
    let mut len = std::mem::size_of::<libc::c_int>() as libc::socklen_t;
    // SAFETY: `error` and `len` are valid for writes of the sizes announced in `len`.
    let ret = unsafe {
        libc::getsockopt(
            file.as_raw_fd(),
            libc::SOL_SOCKET,
            libc::SO_ERROR,
            &mut error as *mut libc::c_int as *mut libc::c_void,
            &mut len,
        )
    };
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }
    if error != 0 {
        return Err(io::Error::from_raw_os_error(error));
    }
    Ok(())
}
