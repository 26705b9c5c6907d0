use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::anyhow;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::mpsc::error::TryRecvError;
use tracing::{error, info_span, Instrument};

use crate::error::{CommunicatorError, CommunicatorResult};
use crate::messaging::connection_info::{ConnectionInfo, IpAddress};
use crate::messaging::envelope::Envelope;
use crate::messaging::message::Message;
use crate::peer_communicator::background_worker::BackgroundWorker;
use crate::peer_communicator::config::PeerCommunicatorConfig;
use crate::transport::socket::SocketFactory;


/// The front end's handle to the background worker. The worker runs on a dedicated OS thread
///  with its own single-threaded runtime, so its timing is independent of what the application
///  does on its own runtime.
///
/// Control messages and events travel over in-memory channels, which are never subject to fault
///  injection.
pub struct BackgroundThread {
    control_out: UnboundedSender<Envelope>,
    events: UnboundedReceiver<Envelope>,
    join_handle: Option<thread::JoinHandle<()>>,
}

impl BackgroundThread {
    /// Starts the worker and waits for it to publish its connection info
    pub async fn start(
        name: &str,
        listen_ip: IpAddress,
        group_identifier: &str,
        config: PeerCommunicatorConfig,
        socket_factory: Arc<dyn SocketFactory>,
    ) -> CommunicatorResult<(BackgroundThread, ConnectionInfo)> {
        let (control_out, control_in) = mpsc::unbounded_channel();
        let (events_out, mut events) = mpsc::unbounded_channel();

        let span = info_span!("peer_communicator", name = %name, group = %group_identifier);
        let name = name.to_string();
        let group_identifier = group_identifier.to_string();

        let join_handle = thread::Builder::new()
            .name(format!("peercomm-{}", name))
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
                    Ok(runtime) => runtime,
                    Err(e) => {
                        error!("could not create runtime for background worker: {}", e);
                        return;
                    }
                };

                runtime.block_on(async move {
                    match BackgroundWorker::start(name, listen_ip, group_identifier, config, socket_factory, control_in, events_out).await {
                        Ok(worker) => worker.run().await,
                        Err(e) => error!("could not start background worker: {}", e),
                    }
                }.instrument(span));
            })
            .map_err(|e| CommunicatorError::WorkerStartup(e.to_string()))?;

        let my_connection_info = match events.recv().await {
            Some(Envelope { message: Message::MyConnectionInfo { my_connection_info }, .. }) => my_connection_info,
            Some(other) => return Err(CommunicatorError::WorkerStartup(format!("unexpected first event {}", other.message.message_type()))),
            None => return Err(CommunicatorError::WorkerStartup("worker terminated during startup".to_string())),
        };

        Ok((BackgroundThread {
            control_out,
            events,
            join_handle: Some(join_handle),
        }, my_connection_info))
    }

    pub fn send(&self, envelope: Envelope) -> CommunicatorResult<()> {
        self.control_out.send(envelope)
            .map_err(|_| CommunicatorError::Closed)
    }

    /// Returns all events that are available without waiting, and `Closed` if there are none and
    ///  the worker has terminated
    pub fn try_receive_messages(&mut self) -> CommunicatorResult<Vec<Envelope>> {
        let mut result = Vec::new();
        loop {
            match self.events.try_recv() {
                Ok(envelope) => result.push(envelope),
                Err(TryRecvError::Empty) => return Ok(result),
                Err(TryRecvError::Disconnected) => {
                    if result.is_empty() {
                        return Err(CommunicatorError::Closed);
                    }
                    return Ok(result);
                }
            }
        }
    }

    /// Waits up to `timeout` for at least one event, and then returns all available events. An
    ///  empty result means that the timeout expired.
    pub async fn receive_messages(&mut self, timeout: Duration) -> CommunicatorResult<Vec<Envelope>> {
        let mut result = self.try_receive_messages()?;
        if !result.is_empty() || timeout.is_zero() {
            return Ok(result);
        }

        match tokio::time::timeout(timeout, self.events.recv()).await {
            Ok(Some(envelope)) => {
                result.push(envelope);
                while let Ok(envelope) = self.events.try_recv() {
                    result.push(envelope);
                }
                Ok(result)
            }
            Ok(None) => Err(CommunicatorError::Closed),
            Err(_) => Ok(result),
        }
    }

    /// Asks the worker to stop, waits for it to drain pending work and joins its thread. Returns
    ///  the events the worker sent while stopping.
    pub async fn close(mut self) -> CommunicatorResult<Vec<Envelope>> {
        let _ = self.control_out.send(Envelope::new(Message::Stop));

        let mut events = Vec::new();
        while let Some(envelope) = self.events.recv().await {
            events.push(envelope);
        }

        if let Some(join_handle) = self.join_handle.take() {
            match tokio::task::spawn_blocking(move || join_handle.join()).await {
                Ok(Ok(())) => {}
                Ok(Err(_)) => return Err(CommunicatorError::Internal(anyhow!("background worker panicked"))),
                Err(e) => return Err(CommunicatorError::Internal(anyhow!(e))),
            }
        }
        Ok(events)
    }
}

impl Drop for BackgroundThread {
    fn drop(&mut self) {
        // NB: the worker also stops when the control channel is closed
        let _ = self.control_out.send(Envelope::new(Message::Stop));
    }
}
