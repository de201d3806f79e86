// SPDX-FileCopyrightText: 2025 All contributors
//
// SPDX-License-Identifier: GPL-2.0-or-later

use crate::wire::{WireMethod, WireReply, WireSignal, parse_request, reply_value};
use common::{device::DeviceKey, error::GypsyError};
use futures::{SinkExt, StreamExt};
use module_core::{
    CreateResponsePtr, DeviceCall, DeviceResponsePtr, DeviceSignalPtr, Event, EventKind, PeerId,
    Request, ShutdownResponsePtr,
};
use serde::Serialize;
use serde_json::Value;
use std::{collections::HashMap, sync::Arc};
use tokio::{net::UnixStream, sync::broadcast::error::RecvError};
use tokio_util::codec::{Framed, LinesCodec};
use tracing::{debug, error, info, warn};

/// Longest request line a peer may send.
pub const MAX_LINE_LENGTH: usize = 4096;

fn serialize<T: Serialize>(message: &T) -> String {
    match serde_json::to_string(message) {
        Ok(json) => json,
        Err(e) => {
            error!("Failed to serialize bus message: {}", e);
            "{}".to_string()
        }
    }
}

fn reply(id: usize, result: Result<Value, GypsyError>) -> String {
    serialize(&match result {
        Ok(result) => WireReply::Ok { id, result },
        Err(e) => WireReply::Err {
            id: Some(id),
            error: e.to_string(),
        },
    })
}

/// Bus state of one requester.
///
/// Translates request lines into bus events and the matching responses back
/// into reply lines. Keeps track of the devices the requester created, only
/// their signals are forwarded.
#[derive(Debug)]
pub struct PeerSession {
    peer: PeerId,
    /// Object paths with the number of references the requester holds on them.
    created: HashMap<String, usize>,
    /// Object paths of shutdown requests waiting for their response.
    pending_shutdowns: HashMap<usize, String>,
}

impl PeerSession {
    pub fn new(peer: PeerId) -> Self {
        PeerSession {
            peer,
            created: HashMap::new(),
            pending_shutdowns: HashMap::new(),
        }
    }

    pub fn peer(&self) -> PeerId {
        self.peer
    }

    /// Turns a request line into the event to publish, or into an immediate error reply.
    pub fn on_request(&mut self, line: &str) -> Result<EventKind, String> {
        let request = parse_request(line).map_err(|reply| serialize(&reply))?;
        let id = request.id;
        let sender_addr = self.peer;
        let kind = match request.method {
            WireMethod::Create { device } => EventKind::CreateRequestEvent(Arc::new(Request {
                id,
                sender_addr,
                data: device,
            })),
            WireMethod::Shutdown { device } => {
                self.pending_shutdowns
                    .insert(id, DeviceKey::from_device_path(&device).object_path());
                EventKind::ShutdownRequestEvent(Arc::new(Request {
                    id,
                    sender_addr,
                    data: device,
                }))
            }
            method => {
                let Some((object_path, method)) = method.device_call() else {
                    return Err(serialize(&WireReply::Err {
                        id: Some(id),
                        error: "Unsupported method".to_string(),
                    }));
                };
                EventKind::DeviceRequestEvent(Arc::new(Request {
                    id,
                    sender_addr,
                    data: DeviceCall {
                        object_path,
                        method,
                    },
                }))
            }
        };
        Ok(kind)
    }

    /// Reply line for a create response addressed to this requester.
    pub fn on_create_response(&mut self, response: &CreateResponsePtr) -> Option<String> {
        if response.receiver_addr != self.peer {
            return None;
        }
        if let Ok(object_path) = &response.data {
            *self.created.entry(object_path.clone()).or_default() += 1;
        }
        let result = response.data.clone().map(Value::String);
        Some(reply(response.id, result))
    }

    /// Reply line for a shutdown response addressed to this requester.
    pub fn on_shutdown_response(&mut self, response: &ShutdownResponsePtr) -> Option<String> {
        if response.receiver_addr != self.peer {
            return None;
        }
        let object_path = self.pending_shutdowns.remove(&response.id);
        if let (Ok(()), Some(object_path)) = (&response.data, object_path)
            && let Some(count) = self.created.get_mut(&object_path)
        {
            *count -= 1;
            if *count == 0 {
                self.created.remove(&object_path);
            }
        }
        let result = response.data.clone().map(|()| Value::Null);
        Some(reply(response.id, result))
    }

    /// Reply line for a device response addressed to this requester.
    pub fn on_device_response(&self, response: &DeviceResponsePtr) -> Option<String> {
        if response.receiver_addr != self.peer {
            return None;
        }
        let result = match &response.data {
            Ok(device_reply) => Ok(reply_value(device_reply).unwrap_or_else(|e| {
                error!("Failed to serialize device reply: {}", e);
                Value::Null
            })),
            Err(e) => Err(e.clone()),
        };
        Some(reply(response.id, result))
    }

    /// Signal line for a device this requester created.
    pub fn on_signal(&self, signal: &DeviceSignalPtr) -> Option<String> {
        if !self.created.contains_key(&signal.object_path) {
            return None;
        }
        Some(serialize(&WireSignal {
            path: &signal.object_path,
            notification: &signal.notification,
        }))
    }

    /// Outgoing line for `event`, if it concerns this requester.
    pub fn on_event(&mut self, event: &EventKind) -> Option<String> {
        match event {
            EventKind::CreateResponseEvent(response) => self.on_create_response(response),
            EventKind::ShutdownResponseEvent(response) => self.on_shutdown_response(response),
            EventKind::DeviceResponseEvent(response) => self.on_device_response(response),
            EventKind::DeviceSignalEvent(signal) => self.on_signal(signal),
            _ => None,
        }
    }
}

/// Serves one socket connection until the requester hangs up or the daemon quits.
///
/// A requester that goes away is announced with a [`EventKind::PeerDepartedEvent`].
pub async fn serve_peer(
    stream: UnixStream,
    peer: PeerId,
    sender: tokio::sync::broadcast::Sender<Event>,
) {
    let mut receiver = sender.subscribe();
    let mut lines = Framed::new(stream, LinesCodec::new_with_max_length(MAX_LINE_LENGTH));
    let mut session = PeerSession::new(peer);
    info!("Peer {} connected", peer);

    let departed = loop {
        let outgoing = tokio::select! {
            line = lines.next() => match line {
                Some(Ok(line)) => match session.on_request(&line) {
                    Ok(kind) => {
                        let _ = sender.send(Event { kind });
                        None
                    }
                    Err(reply) => Some(reply),
                },
                Some(Err(e)) => {
                    warn!("Failed to read from peer {}. Error: {}", peer, e);
                    break true;
                }
                None => {
                    debug!("Peer {} hung up", peer);
                    break true;
                }
            },
            event = receiver.recv() => match event {
                Ok(Event { kind: EventKind::QuitEvent }) => break false,
                Ok(event) => session.on_event(&event.kind),
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Peer {} lagged behind, {} events skipped", peer, skipped);
                    None
                }
                Err(RecvError::Closed) => break false,
            },
        };
        if let Some(line) = outgoing
            && let Err(e) = lines.send(line).await
        {
            warn!("Failed to write to peer {}. Error: {}", peer, e);
            break true;
        }
    };

    if departed {
        info!("Peer {} departed", peer);
        let _ = sender.send(Event {
            kind: EventKind::PeerDepartedEvent(peer),
        });
    }
}
