use crate::error::{MatrixError, Result};
use crate::protocol::{self, Command, FRAME_END};
use crate::types::ConnectionStatus;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::time::{sleep, sleep_until, timeout, Instant};

const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Timing bounds for the transport
#[derive(Debug, Clone, Copy)]
pub struct TransportOptions {
    pub connect_timeout: Duration,
    pub response_timeout: Duration,
    /// Pause after connecting before the device accepts commands
    pub settle_delay: Duration,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            response_timeout: Duration::from_secs(5),
            settle_delay: Duration::from_millis(200),
        }
    }
}

/// Persistent TCP connection to the matrix controller
///
/// Owned by the command worker; nothing else touches the socket.
pub struct Connection {
    host: String,
    port: u16,
    options: TransportOptions,
    stream: Option<BufReader<TcpStream>>,
    status_tx: watch::Sender<ConnectionStatus>,
    backoff: Duration,
    retry_at: Option<Instant>,
}

impl Connection {
    pub fn new(host: impl Into<String>, port: u16, options: TransportOptions) -> Self {
        let (status_tx, _) = watch::channel(ConnectionStatus::Disconnected);
        Self {
            host: host.into(),
            port,
            options,
            stream: None,
            status_tx,
            backoff: Duration::ZERO,
            retry_at: None,
        }
    }

    /// Observe connection status changes
    pub fn subscribe_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status_tx.subscribe()
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.status_tx.borrow()
    }

    /// Establish the socket, failing with `Connection` on refusal or timeout
    pub async fn connect(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }
        tracing::info!("Connecting to {}:{}", self.host, self.port);
        self.status_tx.send_replace(ConnectionStatus::Connecting);

        let addr = (self.host.as_str(), self.port);
        let stream = match timeout(self.options.connect_timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                self.status_tx.send_replace(ConnectionStatus::Failed);
                return Err(MatrixError::Connection(e.to_string()));
            }
            Err(_) => {
                self.status_tx.send_replace(ConnectionStatus::Failed);
                return Err(MatrixError::Connection(format!(
                    "timed out after {:?}",
                    self.options.connect_timeout
                )));
            }
        };
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!("Could not set TCP_NODELAY: {}", e);
        }
        sleep(self.options.settle_delay).await;

        self.stream = Some(BufReader::new(stream));
        self.status_tx.send_replace(ConnectionStatus::Connected);
        tracing::info!("Connected to matrix at {}:{}", self.host, self.port);
        Ok(())
    }

    /// Reconnect if needed, honoring exponential backoff after failures
    pub async fn ensure_connected(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }
        if let Some(at) = self.retry_at {
            if at > Instant::now() {
                tracing::info!("Reconnecting to matrix in {:?}", at - Instant::now());
                sleep_until(at).await;
            }
        }
        match self.connect().await {
            Ok(()) => {
                self.backoff = Duration::ZERO;
                self.retry_at = None;
                Ok(())
            }
            Err(e) => {
                // 1s, 2s, 4s ... capped
                self.backoff = if self.backoff.is_zero() {
                    Duration::from_secs(1)
                } else {
                    (self.backoff * 2).min(MAX_BACKOFF)
                };
                self.retry_at = Some(Instant::now() + self.backoff);
                Err(e)
            }
        }
    }

    /// Write one command and wait for its paired response frame
    ///
    /// A response of the wrong shape means the stream may be out of step, so
    /// the socket is reopened straight away and the error is reported as
    /// `Decode`. Any other failure drops the socket and moves the status to
    /// `Failed`.
    pub async fn send(&mut self, command: &Command) -> Result<String> {
        let result = self.exchange(command).await;
        match &result {
            Ok(_) => {}
            Err(MatrixError::Decode(detail)) => {
                tracing::warn!("Command {} got a mismatched reply; resyncing: {}", command, detail);
                self.resync().await;
            }
            Err(e) => {
                tracing::warn!("Command {} failed; dropping connection: {}", command, e);
                self.mark_failed();
            }
        }
        result
    }

    /// True while a socket is open
    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    /// Reopen the socket to discard anything still in flight
    async fn resync(&mut self) {
        self.stream = None;
        if let Err(e) = self.connect().await {
            tracing::warn!("Resync failed: {}", e);
            self.stream = None;
        }
    }

    async fn exchange(&mut self, command: &Command) -> Result<String> {
        let response_timeout = self.options.response_timeout;
        let stream = self.stream.as_mut().ok_or(MatrixError::ConnectionLost)?;

        tracing::debug!(command = %command.id(), "Sending: {}", protocol::hex(command.bytes()));
        let write = async {
            stream.get_mut().write_all(command.bytes()).await?;
            stream.get_mut().flush().await
        };
        write.await.map_err(|e| {
            tracing::debug!("Write failed: {}", e);
            MatrixError::ConnectionLost
        })?;

        let mut text = read_frame(stream, response_timeout).await?;
        if !command.accepts(&text) && protocol::is_audio_sense_event(&text) {
            tracing::debug!("Skipping unsolicited event: {}", text);
            text = read_frame(stream, response_timeout).await?;
        }
        tracing::debug!(command = %command.id(), "Received: {:?}", text);

        if protocol::is_error_frame(&text) {
            return Err(MatrixError::Device(format!(
                "{} answered {:?}",
                command,
                text
            )));
        }
        if !command.accepts(&text) {
            return Err(MatrixError::Decode(format!(
                "unexpected response to {}: {:?}",
                command, text
            )));
        }
        Ok(text)
    }

    /// Drop the socket without waiting for a clean shutdown
    pub fn mark_failed(&mut self) {
        self.stream = None;
        self.status_tx.send_replace(ConnectionStatus::Failed);
    }

    /// Close the connection
    pub async fn disconnect(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.get_mut().shutdown().await;
            tracing::info!("Disconnected from matrix at {}:{}", self.host, self.port);
        }
        self.status_tx.send_replace(ConnectionStatus::Disconnected);
    }
}

/// Read one NUL-terminated frame
async fn read_frame(stream: &mut BufReader<TcpStream>, limit: Duration) -> Result<String> {
    let mut frame = Vec::new();
    let read = timeout(limit, stream.read_until(FRAME_END, &mut frame))
        .await
        .map_err(|_| MatrixError::Timeout)?;
    match read {
        Ok(0) => Err(MatrixError::ConnectionLost),
        // EOF before the terminator
        Ok(_) if frame.last() != Some(&FRAME_END) => Err(MatrixError::ConnectionLost),
        Ok(_) => Ok(protocol::frame_text(&frame)),
        Err(e) => {
            tracing::debug!("Read failed: {}", e);
            Err(MatrixError::ConnectionLost)
        }
    }
}
