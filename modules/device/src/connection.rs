// SPDX-FileCopyrightText: 2025 All contributors
//
// SPDX-License-Identifier: GPL-2.0-or-later

use crate::{
    aggregator::FixAggregator,
    capture::{CaptureReader, open_capture},
    framer::SentenceCodec,
    nmea::{NmeaDecoder, SentenceDecoder},
    transport::Transport,
};
use common::{device::DeviceKey, error::GypsyError};
use futures::StreamExt;
use module_core::{DeviceMethod, DeviceReply, Event};
use std::{
    fs::File,
    path::PathBuf,
    sync::{
        Arc, Mutex, MutexGuard,
        atomic::{AtomicBool, Ordering},
    },
};
use tokio::{io::AsyncRead, task::JoinHandle};
use tokio_util::codec::FramedRead;
use tracing::{debug, info, warn};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Open and announced state of one started transport.
///
/// Both flags change only while the aggregator lock is held, so the loss of
/// connection is announced once and only after the connection itself was.
#[derive(Debug)]
pub(crate) struct LinkState {
    /// Cleared exactly once, by whoever closes the transport first.
    open: AtomicBool,
    /// Set once `ConnectionChanged(true)` went out.
    announced: AtomicBool,
}

impl LinkState {
    pub(crate) fn new() -> Self {
        LinkState {
            open: AtomicBool::new(true),
            announced: AtomicBool::new(false),
        }
    }

    pub(crate) fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Announces the connection unless it was closed in the meantime.
    pub(crate) fn announce(&self, aggregator: &Mutex<FixAggregator>) {
        let aggregator = lock(aggregator);
        if self.is_open() && !self.announced.swap(true, Ordering::SeqCst) {
            aggregator.set_connected(true);
        }
    }

    /// Marks the transport closed, announcing the loss if the connection was announced.
    pub(crate) fn close(&self, aggregator: &Mutex<FixAggregator>) {
        let aggregator = lock(aggregator);
        if self.open.swap(false, Ordering::SeqCst) && self.announced.load(Ordering::SeqCst) {
            aggregator.set_connected(false);
        }
    }
}

/// The task reading one started transport.
struct Link {
    handle: JoinHandle<()>,
    state: Arc<LinkState>,
}

/// One physical device shared by all requesters that created it.
///
/// The transport is opened by [`DeviceConnection::start`] and read by a
/// background task until the device hangs up, fails or is stopped. Decoded
/// updates are published as [`module_core::EventKind::DeviceSignalEvent`]s.
pub struct DeviceConnection {
    device_path: String,
    object_path: String,
    aggregator: Arc<Mutex<FixAggregator>>,
    link: Mutex<Option<Link>>,
    capture_prefix: Option<PathBuf>,
}

impl DeviceConnection {
    pub fn new(
        device_path: &str,
        sender: tokio::sync::broadcast::Sender<Event>,
        capture_prefix: Option<PathBuf>,
    ) -> Self {
        let object_path = DeviceKey::from_device_path(device_path).object_path();
        DeviceConnection {
            device_path: device_path.to_string(),
            aggregator: Arc::new(Mutex::new(FixAggregator::new(&object_path, sender))),
            object_path,
            link: Mutex::new(None),
            capture_prefix,
        }
    }

    pub fn object_path(&self) -> &str {
        &self.object_path
    }

    pub fn is_open(&self) -> bool {
        lock(&self.link)
            .as_ref()
            .is_some_and(|link| link.state.is_open())
    }

    /// Opens the transport and starts reading it. Does nothing if it is already open.
    pub fn start(&self) -> Result<(), GypsyError> {
        let mut link = lock(&self.link);
        if link
            .as_ref()
            .is_some_and(|link| link.state.is_open())
        {
            debug!("Connection to {} already started", self.device_path);
            return Ok(());
        }

        info!("Starting connection to {}", self.device_path);
        let transport = Transport::open(&self.device_path).map_err(|e| {
            warn!("Failed to open {}. Error: {}", self.device_path, e);
            GypsyError::transport(&self.device_path, &e)
        })?;
        let capture = self.capture_prefix.as_deref().and_then(|prefix| {
            open_capture(prefix, &self.device_path)
                .inspect_err(|e| warn!("Failed to open raw capture. Error: {}", e))
                .ok()
        });

        let state = Arc::new(LinkState::new());
        let handle = tokio::spawn(run_link(
            self.device_path.clone(),
            transport,
            capture,
            self.aggregator.clone(),
            state.clone(),
        ));
        *link = Some(Link { handle, state });
        Ok(())
    }

    /// Closes the transport, announcing the loss of connection if it was open.
    pub fn stop(&self) {
        debug!("Stopping connection to {}", self.device_path);
        let Some(link) = lock(&self.link).take() else {
            return;
        };
        link.handle.abort();
        link.state.close(&self.aggregator);
    }

    pub fn call(&self, method: DeviceMethod) -> Result<DeviceReply, GypsyError> {
        let reply = match method {
            DeviceMethod::Start => {
                self.start()?;
                DeviceReply::Done
            }
            DeviceMethod::Stop => {
                self.stop();
                DeviceReply::Done
            }
            DeviceMethod::GetConnectionStatus => DeviceReply::ConnectionStatus(self.is_open()),
            DeviceMethod::GetFixStatus => DeviceReply::FixStatus(lock(&self.aggregator).fix_type()),
            DeviceMethod::GetPosition => DeviceReply::Position(lock(&self.aggregator).position()),
            DeviceMethod::GetCourse => DeviceReply::Course(lock(&self.aggregator).course()),
            DeviceMethod::GetAccuracy => DeviceReply::Accuracy(lock(&self.aggregator).accuracy()),
            DeviceMethod::GetSatellites => {
                DeviceReply::Satellites(lock(&self.aggregator).satellites().to_vec())
            }
            DeviceMethod::GetTime => DeviceReply::Time(lock(&self.aggregator).timestamp()),
        };
        Ok(reply)
    }
}

impl Drop for DeviceConnection {
    fn drop(&mut self) {
        if let Some(link) = lock(&self.link).take() {
            debug!("Releasing connection to {}", self.device_path);
            link.handle.abort();
        }
    }
}

async fn run_link(
    device_path: String,
    transport: Transport,
    capture: Option<File>,
    aggregator: Arc<Mutex<FixAggregator>>,
    state: Arc<LinkState>,
) {
    match transport.connected().await {
        Ok(()) => {
            info!("Connected to {}", device_path);
            state.announce(&aggregator);
            let mut decoder = NmeaDecoder::default();
            let reader = CaptureReader::new(transport, capture);
            match pump(reader, &mut decoder, &aggregator).await {
                Ok(()) => debug!("Connection to {} hung up", device_path),
                Err(e) => warn!("Error on connection to {}. Error: {}", device_path, e),
            }
        }
        Err(e) => warn!("Failed to connect to {}. Error: {}", device_path, e),
    }
    state.close(&aggregator);
}

/// Frames `reader` into sentences and feeds them through `decoder` into `aggregator`.
///
/// Returns at the end of the stream. Sentences that fail to decode are logged and skipped.
/// Yields after every sentence, so subscribers of the bus keep pace with a
/// reader that has many sentences buffered, such as a replayed file.
pub async fn pump<R: AsyncRead + Unpin>(
    reader: R,
    decoder: &mut dyn SentenceDecoder,
    aggregator: &Mutex<FixAggregator>,
) -> std::io::Result<()> {
    let mut sentences = FramedRead::new(reader, SentenceCodec::default());
    while let Some(sentence) = sentences.next().await {
        let sentence = sentence?;
        {
            let mut aggregator = lock(aggregator);
            if let Err(e) = decoder.decode(&sentence, &mut *aggregator) {
                debug!("{}", e);
            }
        }
        tokio::task::yield_now().await;
    }
    Ok(())
}
