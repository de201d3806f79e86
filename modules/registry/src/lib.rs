// SPDX-FileCopyrightText: 2025 All contributors
//
// SPDX-License-Identifier: GPL-2.0-or-later

use async_trait::async_trait;
use authorization::DeviceAuthorizer;
use common::config::GypsyConfig;
use module_core::{
    CreateRequestPtr, DeviceRequestPtr, EventKind, Module, ModuleCtx, Response,
    ShutdownRequestPtr,
};
use session::SessionRegistry;
use std::sync::Arc;
use tokio::{sync::broadcast::error::RecvError, time::Instant};
use tracing::{debug, error, info, warn};

pub mod authorization;
pub mod session;

#[cfg(test)]
mod tests;

/// Serves create, shutdown and device requests and watches for idleness.
///
/// All registry state lives in this module's task, requests are handled one
/// after another in the order they arrive on the bus.
pub struct Registry {
    ctx: ModuleCtx,
    sessions: SessionRegistry,
}

impl Registry {
    pub fn new(ctx: ModuleCtx, config: &GypsyConfig) -> Self {
        let sessions = SessionRegistry::new(
            DeviceAuthorizer::new(&config.allowed_device_globs),
            ctx.sender.clone(),
            config.nmea_log.clone(),
            config.auto_terminate,
        );
        Registry { ctx, sessions }
    }

    fn on_create(&mut self, request: CreateRequestPtr) {
        let result = self.sessions.create(request.sender_addr, &request.data);
        let _ = self
            .ctx
            .publish_event(EventKind::CreateResponseEvent(Arc::new(Response::to(
                &request, result,
            ))));
    }

    fn on_shutdown(&mut self, request: ShutdownRequestPtr) {
        let result = self.sessions.shutdown(request.sender_addr, &request.data);
        let _ = self
            .ctx
            .publish_event(EventKind::ShutdownResponseEvent(Arc::new(Response::to(
                &request, result,
            ))));
    }

    fn on_device_request(&mut self, request: DeviceRequestPtr) {
        let result = self.sessions.call(&request.data);
        let _ = self
            .ctx
            .publish_event(EventKind::DeviceResponseEvent(Arc::new(Response::to(
                &request, result,
            ))));
    }

    fn on_idle_timeout(&mut self) {
        if self.sessions.expire_idle() {
            info!("Idle for {:?}, requesting termination", session::TERMINATE_TIMEOUT);
            let _ = self.ctx.publish_event(EventKind::TerminateEvent);
        }
    }
}

async fn idle_timeout(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}

#[async_trait]
impl Module for Registry {
    async fn run(&mut self) -> Result<(), ()> {
        let mut run = true;
        while run {
            let deadline = self.sessions.terminate_deadline();
            tokio::select! {
                event = self.ctx.receiver.recv() => {
                    match event {
                        Ok(event) => match event.kind {
                            EventKind::QuitEvent => run = false,
                            EventKind::CreateRequestEvent(request) => self.on_create(request),
                            EventKind::ShutdownRequestEvent(request) => self.on_shutdown(request),
                            EventKind::DeviceRequestEvent(request) => self.on_device_request(request),
                            EventKind::PeerDepartedEvent(peer) => self.sessions.peer_departed(peer),
                            _ => (),
                        },
                        Err(RecvError::Lagged(skipped)) => {
                            warn!("Registry lagged behind, {} events skipped", skipped);
                        }
                        Err(RecvError::Closed) => {
                            error!("Event bus closed, stopping registry");
                            run = false;
                        }
                    }
                }
                _ = idle_timeout(deadline) => self.on_idle_timeout(),
            }
        }
        debug!("Registry stopped with {} clients", self.sessions.client_count());
        Ok(())
    }
}
