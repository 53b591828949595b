//! Hosting an overlay service by forwarding to a local TCP target.
//!
//! [`ServiceHost::start`] binds the service on the overlay.  Every inbound
//! client is accepted and paired with a fresh TCP connection to the
//! configured target; bytes are pumped both ways until either side finishes.
//!
//! The pump runs as a local task on the loop thread.  Overlay data arrives
//! through the connection's data callback and is fed to the TCP writer over a
//! channel.  TCP reads are written to the overlay one at a time: the next read
//! only starts after the previous write completed, which bounds the bytes held
//! in flight per client.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use overlay_core::{HandleId, HostConfig, OverlayError};
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::application::connection::{ConnectionHandle, DataEvent};
use crate::application::context::LoopContext;

const READ_CHUNK: usize = 16 * 1024;

type Clients = Arc<Mutex<HashMap<HandleId, ConnectionHandle>>>;

/// A bound overlay service forwarding to a local TCP address.
pub struct ServiceHost {
    service: String,
    target: HostConfig,
    listener: ConnectionHandle,
    clients: Clients,
}

impl ServiceHost {
    /// Binds `service` and starts forwarding inbound clients to `target`.
    ///
    /// `on_listen` fires once with the bind outcome.
    ///
    /// # Errors
    ///
    /// [`OverlayError::InvalidArgument`] if `target` is not a `tcp` target.
    pub fn start<F>(
        ctx: &LoopContext,
        service: &str,
        target: HostConfig,
        on_listen: F,
    ) -> Result<Self, OverlayError>
    where
        F: FnOnce(Result<(), OverlayError>) + Send + 'static,
    {
        if !target.protocol.eq_ignore_ascii_case("tcp") {
            return Err(OverlayError::InvalidArgument(format!(
                "unsupported host protocol '{}'",
                target.protocol
            )));
        }

        let listener = ConnectionHandle::new(ctx);
        let clients: Clients = Arc::default();
        let addr = format!("{}:{}", target.address, target.port);
        let name = service.to_string();

        let on_client = {
            let clients = clients.clone();
            let addr = addr.clone();
            let name = name.clone();
            move |child: ConnectionHandle| {
                let Some(id) = child.id() else {
                    return;
                };
                debug!("service '{name}': inbound client {id}, forwarding to {addr}");
                clients.lock().insert(id, child.clone());
                tokio::task::spawn_local(forward(child, addr.clone(), clients.clone()));
            }
        };

        let service_name = name.clone();
        listener.listen(
            service,
            move |result| {
                match &result {
                    Ok(()) => info!("hosting service '{service_name}' -> {addr}"),
                    Err(e) => warn!("cannot host service '{service_name}': {e}"),
                }
                on_listen(result);
            },
            on_client,
        );

        Ok(Self {
            service: name,
            target,
            listener,
            clients,
        })
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn target(&self) -> &HostConfig {
        &self.target
    }

    /// Clients currently being forwarded.
    pub fn active_clients(&self) -> usize {
        self.clients.lock().len()
    }

    /// Unbinds the service and closes every forwarded client.
    pub fn stop(&self) {
        self.listener.close();
        let clients: Vec<_> = self.clients.lock().drain().map(|(_, c)| c).collect();
        for client in clients {
            client.close();
        }
        debug!("service '{}' stopped", self.service);
    }
}

impl fmt::Debug for ServiceHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceHost")
            .field("service", &self.service)
            .field("target", &self.target)
            .field("clients", &self.active_clients())
            .finish()
    }
}

/// Pumps bytes between one accepted overlay client and the TCP target.
async fn forward(child: ConnectionHandle, addr: String, clients: Clients) {
    let id = child.id();
    let finish = |child: &ConnectionHandle| {
        child.close();
        if let Some(id) = id {
            clients.lock().remove(&id);
        }
    };

    let stream = match TcpStream::connect(addr.as_str()).await {
        Ok(stream) => stream,
        Err(e) => {
            warn!("cannot reach host target {addr}: {e}");
            finish(&child);
            return;
        }
    };
    let (mut reader, mut writer) = stream.into_split();

    let (data_tx, mut data_rx) = mpsc::unbounded_channel::<DataEvent>();
    let (ready_tx, ready_rx) = oneshot::channel();
    child.accept(
        move |result| {
            let _ = ready_tx.send(result);
        },
        move |event| {
            let _ = data_tx.send(event);
        },
    );
    match ready_rx.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            debug!("accept failed: {e}");
            finish(&child);
            return;
        }
        Err(_) => {
            finish(&child);
            return;
        }
    }

    let to_target = async {
        while let Some(event) = data_rx.recv().await {
            match event {
                DataEvent::Data(bytes) => writer.write_all(&bytes).await?,
                DataEvent::Eof => {
                    writer.shutdown().await?;
                    break;
                }
                DataEvent::Error(e) => {
                    debug!("overlay stream error: {e}");
                    break;
                }
            }
        }
        Ok::<(), std::io::Error>(())
    };

    let from_target = async {
        let mut buf = vec![0u8; READ_CHUNK];
        let result = loop {
            let n = match reader.read(&mut buf).await {
                Ok(0) => break Ok(()),
                Ok(n) => n,
                Err(e) => break Err(e),
            };
            let (done_tx, done_rx) = oneshot::channel();
            child.write(Bytes::copy_from_slice(&buf[..n]), move |result| {
                let _ = done_tx.send(result);
            });
            match done_rx.await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => {
                    debug!("overlay write failed: {e}");
                    break Ok(());
                }
                Err(_) => break Ok(()),
            }
        };
        // Closing the overlay side releases the data callback, which ends
        // the other half.
        finish(&child);
        result
    };

    let (up, down) = tokio::join!(to_target, from_target);
    if let Err(e) = up.and(down) {
        debug!("forwarding to {addr} ended: {e}");
    }
}
