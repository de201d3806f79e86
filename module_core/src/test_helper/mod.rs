// SPDX-FileCopyrightText: 2025 All contributors
//
// SPDX-License-Identifier: GPL-2.0-or-later

//! Helpers for driving modules in tests.

use crate::{Event, EventBus, EventKind, EventKindType, ModuleCtx};
use tokio::{sync::broadcast::error::RecvError, task::JoinHandle, time::timeout};
use tracing::debug;

/// Publishes a [`QuitEvent`](EventKind::QuitEvent) and waits for the module task to finish.
///
/// # Panics
/// If the module does not stop within 100ms or its task fails.
pub async fn stop_module(event_bus: &EventBus, handle: &mut JoinHandle<Result<(), ()>>) {
    event_bus.publish(&Event {
        kind: EventKind::QuitEvent,
    });
    let _ = timeout(std::time::Duration::from_millis(100), handle)
        .await
        .expect("Module doesn't handle quit event in timeout")
        .unwrap();
}

/// Returns the first event of type `exp_event` received on `rx` within `duration`.
///
/// Events of other types are skipped. The wait is split into ten steps so a
/// quiet channel doesn't block the whole duration on a single `recv`.
///
/// # Panics
/// If no matching event arrives in time.
pub async fn wait_for_event(
    rx: &mut tokio::sync::broadcast::Receiver<Event>,
    duration: std::time::Duration,
    exp_event: EventKindType,
) -> Event {
    let steps = duration.as_millis() / 10;
    let step_duration = duration / 10;
    for _ in 0..steps {
        if let Ok(Ok(event)) = timeout(step_duration, rx.recv()).await
            && EventKindType::from(&event.kind) == exp_event
        {
            return event;
        }
    }
    panic!("Failed to receive event of type {:?}", exp_event);
}

/// Stand-in for a module that answers requests.
///
/// Every event of `request_type` seen on `ctx` is passed to the answer
/// function, whatever it returns is published. The background task stops
/// when the `Responder` is dropped.
pub struct Responder {
    handle: JoinHandle<()>,
}

impl Responder {
    pub fn spawn<F>(mut ctx: ModuleCtx, request_type: EventKindType, answer: F) -> Self
    where
        F: Fn(&EventKind) -> Option<EventKind> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            loop {
                match ctx.receiver.recv().await {
                    Ok(event) if EventKindType::from(&event.kind) == request_type => {
                        if let Some(kind) = answer(&event.kind) {
                            debug!("Responder answers {:?}", request_type);
                            let _ = ctx.publish_event(kind);
                        }
                    }
                    Ok(_) | Err(RecvError::Lagged(_)) => (),
                    Err(RecvError::Closed) => break,
                }
            }
        });
        Responder { handle }
    }
}

impl Drop for Responder {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
