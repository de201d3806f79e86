// SPDX-FileCopyrightText: 2025 All contributors
//
// SPDX-License-Identifier: GPL-2.0-or-later

use common::{
    error::GypsyError,
    fix::{AccuracySnapshot, CourseSnapshot, FixType, Notification, PositionSnapshot, SatelliteInfo},
};
use std::sync::Arc;
use strum_macros::EnumDiscriminants;

/// Identity of a requester on the bus.
pub type PeerId = usize;

/// Represents a high-level event in the system.
///
/// Each `Event` wraps an [`EventKind`], which defines the actual type
/// and data carried by the event.
///
/// This structure is designed to be passed through an [`EventBus`]
/// between asynchronous modules.
#[derive(Clone, Debug, PartialEq)]
pub struct Event {
    /// The inner event type and associated data.
    pub kind: EventKind,
}

/// A request addressed to a module.
///
/// `id` and `sender_addr` are echoed in the matching [`Response`], so the
/// requester can pick its answer from the shared bus.
#[derive(Clone, Debug, PartialEq)]
pub struct Request<T> {
    pub id: usize,
    pub sender_addr: PeerId,
    pub data: T,
}

/// The answer to a [`Request`].
#[derive(Clone, Debug, PartialEq)]
pub struct Response<T> {
    pub id: usize,
    pub receiver_addr: PeerId,
    pub data: T,
}

impl<T> Response<T> {
    pub fn new(id: usize, receiver_addr: PeerId, data: T) -> Self {
        Response {
            id,
            receiver_addr,
            data,
        }
    }

    /// Builds the response for `request`.
    pub fn to<R>(request: &Request<R>, data: T) -> Self {
        Response::new(request.id, request.sender_addr, data)
    }
}

/// Operations a requester can invoke on a published device connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeviceMethod {
    Start,
    Stop,
    GetConnectionStatus,
    GetFixStatus,
    GetPosition,
    GetCourse,
    GetAccuracy,
    GetSatellites,
    GetTime,
}

/// A device method call, addressed by the object path returned from `Create`.
#[derive(Clone, Debug, PartialEq)]
pub struct DeviceCall {
    pub object_path: String,
    pub method: DeviceMethod,
}

/// Result values of the [`DeviceMethod`]s.
#[derive(Clone, Debug, PartialEq)]
pub enum DeviceReply {
    Done,
    ConnectionStatus(bool),
    FixStatus(FixType),
    Position(PositionSnapshot),
    Course(CourseSnapshot),
    Accuracy(AccuracySnapshot),
    Satellites(Vec<SatelliteInfo>),
    Time(i64),
}

/// A notification raised by one device connection.
#[derive(Clone, Debug, PartialEq)]
pub struct DeviceSignal {
    /// Object path of the device that raised the notification.
    pub object_path: String,
    pub notification: Notification,
}

pub type CreateRequestPtr = Arc<Request<String>>;
pub type CreateResponsePtr = Arc<Response<Result<String, GypsyError>>>;
pub type ShutdownRequestPtr = Arc<Request<String>>;
pub type ShutdownResponsePtr = Arc<Response<Result<(), GypsyError>>>;
pub type DeviceRequestPtr = Arc<Request<DeviceCall>>;
pub type DeviceResponsePtr = Arc<Response<Result<DeviceReply, GypsyError>>>;
pub type DeviceSignalPtr = Arc<DeviceSignal>;

/// Enumerates the different kinds of events that can be emitted
/// and transmitted via the [`EventBus`].
#[derive(Clone, Debug, PartialEq, EnumDiscriminants)]
#[strum_discriminants(name(EventKindType), derive(Hash))]
pub enum EventKind {
    /// Indicates that a module shall terminate.
    QuitEvent,

    /// A requester asks for a connection to the device identifier in `data`.
    CreateRequestEvent(CreateRequestPtr),

    /// The object path of the shared device connection, or why there is none.
    CreateResponseEvent(CreateResponsePtr),

    /// A requester releases its reference to the device identifier in `data`.
    ShutdownRequestEvent(ShutdownRequestPtr),

    ShutdownResponseEvent(ShutdownResponsePtr),

    /// A method call on a device connection.
    DeviceRequestEvent(DeviceRequestPtr),

    DeviceResponseEvent(DeviceResponsePtr),

    /// A change notification of a device connection.
    DeviceSignalEvent(DeviceSignalPtr),

    /// A requester disappeared from the bus, all its references are released.
    PeerDepartedEvent(PeerId),

    /// The daemon was idle for the whole grace period and may exit.
    TerminateEvent,
}

/// Returns a reference to the payload of an event if it is of the given variant.
///
/// ```
/// use module_core::{EventKind, payload_ref};
///
/// let kind = EventKind::PeerDepartedEvent(7);
/// assert_eq!(payload_ref!(kind, EventKind::PeerDepartedEvent), Some(&7));
/// assert_eq!(payload_ref!(kind, EventKind::CreateRequestEvent), None);
/// ```
#[macro_export]
macro_rules! payload_ref {
    ($kind:expr, $variant:path) => {
        match &$kind {
            $variant(payload) => Some(payload),
            _ => None,
        }
    };
}

/// A simple asynchronous event bus for publishing and subscribing to [`Event`]s.
///
/// The event bus uses a [`tokio::sync::broadcast::channel`] under the hood,
/// allowing multiple receivers to listen for the same stream of events.
///
/// Each published event is cloned and distributed to all active subscribers.
/// If no subscribers exist at the time of publication, the event is discarded silently.
pub struct EventBus {
    /// The broadcast sender used internally to distribute events.
    sender: tokio::sync::broadcast::Sender<Event>,
}

impl EventBus {
    /// Creates a new [`EventBus`] with a fixed buffer capacity of 256 messages.
    ///
    /// When the buffer is full, the oldest messages are dropped automatically
    /// as new ones are published.
    pub fn new() -> Self {
        let (sender, _) = tokio::sync::broadcast::channel(256);
        EventBus { sender }
    }

    /// Subscribes to the event bus and returns a [`tokio::sync::broadcast::Receiver`].
    ///
    /// The returned receiver will receive all future events published after the
    /// subscription is created.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    /// Publishes an [`Event`] to all active subscribers.
    ///
    /// If no subscribers exist, the event is discarded silently.
    pub fn publish(&self, event: &Event) {
        let _ = self.sender.send(event.clone());
    }

    /// Creates a [`ModuleCtx`] bound to this [`EventBus`].
    pub fn context(&self) -> ModuleCtx {
        ModuleCtx::new(self)
    }
}

/// Provides a default instance of [`EventBus`].
impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Defines the common interface for an asynchronous module
/// that can be executed and communicate via the [`EventBus`].
#[async_trait::async_trait]
pub trait Module {
    /// Runs the module asynchronously until completion.
    ///
    /// This function typically contains the module's main event loop,
    /// reacting to messages received through the [`ModuleCtx`].
    async fn run(&mut self) -> Result<(), ()>;
}

/// Provides a module-scoped context for interacting with the [`EventBus`].
///
/// Each `ModuleCtx` owns both a sender and a receiver, allowing the module
/// to both publish and listen for events concurrently.
pub struct ModuleCtx {
    /// The broadcast sender used to publish events.
    pub sender: tokio::sync::broadcast::Sender<Event>,

    /// The broadcast receiver used to listen for events.
    pub receiver: tokio::sync::broadcast::Receiver<Event>,
}

impl ModuleCtx {
    /// Constructs a new [`ModuleCtx`] from the given [`EventBus`].
    ///
    /// Clones the internal broadcast sender and creates a new receiver.
    pub fn new(event_bus: &EventBus) -> Self {
        ModuleCtx {
            sender: event_bus.sender.clone(),
            receiver: event_bus.subscribe(),
        }
    }

    /// Wraps `kind` into an [`Event`] and publishes it.
    pub fn publish_event(
        &self,
        kind: EventKind,
    ) -> Result<(), tokio::sync::broadcast::error::SendError<Event>> {
        self.sender.send(Event { kind }).map(|_| ())
    }

    /// Creates an additional receiver on the same bus.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<Event> {
        self.sender.subscribe()
    }
}

pub mod test_helper;
