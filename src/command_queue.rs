use crate::connection::Connection;
use crate::error::{MatrixError, Result};
use crate::protocol::Command;
use crate::types::ConnectionStatus;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};

const QUEUE_DEPTH: usize = 64;

/// Called on the worker task each time the socket goes away
pub type LossHook = Box<dyn Fn() + Send + Sync>;

/// A queued command and the slot its result goes to
struct Job {
    command: Command,
    reply: oneshot::Sender<Result<String>>,
}

/// Funnels every device command through one worker, strictly FIFO
///
/// The controller parses one command at a time, so callers never write to
/// the socket themselves. A caller that stops waiting does not cancel its
/// command; the worker still runs it and discards the result.
pub struct CommandQueue {
    tx: mpsc::Sender<Job>,
    status_rx: watch::Receiver<ConnectionStatus>,
    stop_tx: broadcast::Sender<()>,
    worker: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl CommandQueue {
    /// Spawn the worker that owns `connection`
    ///
    /// `on_loss` runs before the failed command's caller hears about it, so
    /// anything it invalidates is already invalid when the error surfaces.
    pub fn start(connection: Connection, min_send_interval: Duration, on_loss: LossHook) -> Self {
        let (tx, rx) = mpsc::channel(QUEUE_DEPTH);
        let (stop_tx, _) = broadcast::channel(1);
        let status_rx = connection.subscribe_status();
        let stop_rx = stop_tx.subscribe();

        let worker = tokio::spawn(run_worker(connection, rx, stop_rx, min_send_interval, on_loss));

        Self {
            tx,
            status_rx,
            stop_tx,
            worker: parking_lot::Mutex::new(Some(worker)),
        }
    }

    /// Submit a command and wait for its response
    ///
    /// Never retried here: a failure is reported once and the caller decides.
    pub async fn enqueue(&self, command: Command) -> Result<String> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Job { command, reply })
            .await
            .map_err(|_| MatrixError::ConnectionLost)?;
        rx.await.unwrap_or(Err(MatrixError::ConnectionLost))
    }

    /// Observe transport status
    pub fn subscribe_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status_rx.clone()
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.status_rx.borrow()
    }

    /// Stop accepting work, fail whatever is still queued, close the socket
    ///
    /// The command in flight, if any, is allowed to finish first.
    pub async fn shutdown(&self) {
        let _ = self.stop_tx.send(());
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::error!("Command worker ended abnormally: {}", e);
            }
        }
    }
}

async fn run_worker(
    mut connection: Connection,
    mut rx: mpsc::Receiver<Job>,
    mut stop_rx: broadcast::Receiver<()>,
    min_send_interval: Duration,
    on_loss: LossHook,
) {
    let mut last_sent: Option<Instant> = None;

    loop {
        let job = tokio::select! {
            biased;
            _ = stop_rx.recv() => break,
            job = rx.recv() => match job {
                Some(job) => job,
                None => break,
            },
        };

        if let Some(last) = last_sent {
            sleep_until(last + min_send_interval).await;
        }

        let result = match connection.ensure_connected().await {
            Ok(()) => connection.send(&job.command).await,
            Err(e) => Err(e),
        };
        last_sent = Some(Instant::now());

        let lost = !connection.is_open();
        if lost {
            on_loss();
        }
        if job.reply.send(result).is_err() {
            tracing::debug!(command = %job.command.id(), "Caller abandoned command; result discarded");
        }

        if lost {
            let drained = fail_pending(&mut rx);
            if drained > 0 {
                tracing::warn!("Connection failed; dropped {} queued command(s)", drained);
            }
        }
    }

    rx.close();
    fail_pending(&mut rx);
    connection.disconnect().await;
    on_loss();
    tracing::debug!("Command worker stopped");
}

/// Fail every job already waiting in the channel with `ConnectionLost`
fn fail_pending(rx: &mut mpsc::Receiver<Job>) -> usize {
    let mut count = 0;
    while let Ok(job) = rx.try_recv() {
        let _ = job.reply.send(Err(MatrixError::ConnectionLost));
        count += 1;
    }
    count
}
