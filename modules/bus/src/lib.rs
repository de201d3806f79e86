// SPDX-FileCopyrightText: 2025 All contributors
//
// SPDX-License-Identifier: GPL-2.0-or-later

use async_trait::async_trait;
use module_core::{EventKind, Module, ModuleCtx, PeerId};
use std::path::{Path, PathBuf};
use tokio::{net::UnixListener, sync::broadcast::error::RecvError, task::JoinSet};
use tracing::{debug, error, info, warn};

pub mod peer;
pub mod wire;

#[cfg(test)]
mod tests;

/// Local endpoint of the daemon: a Unix socket speaking JSON lines.
///
/// Every accepted connection is one requester with its own [`PeerId`].
pub struct Bus {
    ctx: ModuleCtx,
    listener: UnixListener,
    socket_path: PathBuf,
    next_peer: PeerId,
}

impl Bus {
    /// Binds the socket at `socket_path`, replacing a stale socket file.
    ///
    /// Must be called inside a tokio runtime.
    pub fn bind(ctx: ModuleCtx, socket_path: &Path) -> std::io::Result<Self> {
        if std::fs::exists(socket_path)? {
            debug!("Removing stale socket {}", socket_path.display());
            std::fs::remove_file(socket_path)?;
        }
        let listener = UnixListener::bind(socket_path)?;
        info!("Listening on {}", socket_path.display());
        Ok(Bus {
            ctx,
            listener,
            socket_path: socket_path.to_path_buf(),
            next_peer: 1,
        })
    }
}

#[async_trait]
impl Module for Bus {
    async fn run(&mut self) -> Result<(), ()> {
        let mut peers = JoinSet::new();
        let mut run = true;
        while run {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, _)) => {
                        let peer = self.next_peer;
                        self.next_peer += 1;
                        peers.spawn(peer::serve_peer(stream, peer, self.ctx.sender.clone()));
                    }
                    Err(e) => warn!("Failed to accept connection. Error: {}", e),
                },
                event = self.ctx.receiver.recv() => match event {
                    Ok(event) => {
                        if let EventKind::QuitEvent = event.kind {
                            run = false;
                        }
                    }
                    Err(RecvError::Lagged(_)) => (),
                    Err(RecvError::Closed) => run = false,
                },
                Some(_) = peers.join_next(), if !peers.is_empty() => (),
            }
        }
        peers.shutdown().await;
        if let Err(e) = std::fs::remove_file(&self.socket_path) {
            error!("Failed to remove socket {}. Error: {}", self.socket_path.display(), e);
        }
        Ok(())
    }
}
