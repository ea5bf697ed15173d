/*!
Transport session: connection lifecycle and outbound writes.

A session owns at most one open [`SerialLink`]. Connecting retries a bounded
number of times with a fixed delay. Once connected, a background task logs
whatever the device sends; inbound bytes carry no protocol meaning.
*/

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{ConnectionConfig, WritePolicy};
use crate::error::{DisplayError, Result};
use crate::transport::{PairedDevice, SerialLink, SerialTransport};

/// Connection state, changed only by `connect` and `close`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionState {
    pub connected: bool,
    pub address: Option<String>,
}

pub struct Session {
    transport: Arc<dyn SerialTransport>,
    options: ConnectionConfig,
    state: ConnectionState,
    writer: Option<Box<dyn AsyncWrite + Send + Unpin>>,
    reader_task: Option<JoinHandle<()>>,
}

impl Session {
    pub fn new(transport: Arc<dyn SerialTransport>, options: ConnectionConfig) -> Self {
        Self {
            transport,
            options,
            state: ConnectionState::default(),
            writer: None,
            reader_task: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state.connected
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    pub async fn list_paired_devices(&self) -> Result<Vec<PairedDevice>> {
        self.transport.list_paired_devices().await
    }

    /// One resolve-and-open attempt
    async fn attempt(&self, address: &str) -> Result<SerialLink> {
        let channel = self.transport.find_channel(address).await?;
        self.transport.open(address, channel).await
    }

    /// Connect to `address`, retrying on not-found and refused
    ///
    /// Succeeds immediately when already connected.
    pub async fn connect(&mut self, address: &str) -> Result<()> {
        if self.state.connected {
            debug!("[{}]: Already connected", address);
            return Ok(());
        }

        let max_attempts = self.options.max_attempts.max(1);
        for attempt in 1..=max_attempts {
            match self.attempt(address).await {
                Ok(link) => {
                    info!("[{}]: Connection {}/{}: Connected", address, attempt, max_attempts);
                    self.attach(address, link);
                    return Ok(());
                }
                Err(e) if e.is_retryable() => {
                    warn!("[{}]: Connection {}/{}: {}", address, attempt, max_attempts, e);
                    if attempt < max_attempts {
                        tokio::time::sleep(self.options.retry_delay()).await;
                    }
                }
                Err(e) => return Err(e),
            }
        }

        Err(DisplayError::ConnectionExhausted {
            address: address.to_string(),
            attempts: max_attempts,
        })
    }

    fn attach(&mut self, address: &str, link: SerialLink) {
        self.writer = Some(link.writer);
        self.reader_task = Some(tokio::spawn(read_loop(address.to_string(), link.reader)));
        self.state = ConnectionState {
            connected: true,
            address: Some(address.to_string()),
        };
    }

    /// Write one encoded frame, returning the number of bytes written
    ///
    /// While disconnected the frame is dropped with `Ok(0)`, or rejected under
    /// [`WritePolicy::FailFast`].
    pub async fn write(&mut self, bytes: &[u8]) -> Result<usize> {
        let Some(writer) = self.writer.as_mut() else {
            return match self.options.write_policy {
                WritePolicy::DropSilently => {
                    debug!("Dropping {} bytes, not connected", bytes.len());
                    Ok(0)
                }
                WritePolicy::FailFast => Err(DisplayError::NotConnected),
            };
        };

        debug!("-> {}", hex::encode(bytes));
        writer
            .write_all(bytes)
            .await
            .map_err(DisplayError::TransportWrite)?;
        writer.flush().await.map_err(DisplayError::TransportWrite)?;

        Ok(bytes.len())
    }

    /// Close the link and stop the read loop
    pub async fn close(&mut self) {
        if let Some(mut writer) = self.writer.take() {
            if let Err(e) = writer.shutdown().await {
                debug!("Error shutting down writer: {}", e);
            }
        }
        if let Some(task) = self.reader_task.take() {
            task.abort();
        }
        if let Some(address) = self.state.address.take() {
            info!("[{}]: Disconnected", address);
        }
        self.state.connected = false;
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(task) = self.reader_task.take() {
            task.abort();
        }
    }
}

/// Log inbound bytes until the link closes
async fn read_loop(address: String, mut reader: Box<dyn AsyncRead + Send + Unpin>) {
    let mut buffer = vec![0u8; 1024];
    loop {
        match reader.read(&mut buffer).await {
            Ok(0) => {
                debug!("[{}]: Link closed by device", address);
                break;
            }
            Ok(n) => {
                info!("[{}]: {}", address, String::from_utf8_lossy(&buffer[..n]));
            }
            Err(e) => {
                warn!("[{}]: Read error: {}", address, e);
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::MockTransport;
    use std::sync::atomic::Ordering;
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;

    const ADDRESS: &str = "11:22:33:44:55:66";

    fn session(transport: &Arc<MockTransport>, policy: WritePolicy) -> Session {
        let options = ConnectionConfig {
            write_policy: policy,
            ..ConnectionConfig::default()
        };
        Session::new(Arc::clone(transport) as Arc<dyn SerialTransport>, options)
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_after_two_failures() {
        let transport = Arc::new(MockTransport::new(2));
        let mut session = session(&transport, WritePolicy::DropSilently);

        let start = tokio::time::Instant::now();
        session.connect(ADDRESS).await.unwrap();

        assert!(start.elapsed() >= Duration::from_millis(1000));
        assert_eq!(transport.state.attempts.load(Ordering::SeqCst), 3);
        assert!(session.is_connected());
        assert_eq!(session.state().address.as_deref(), Some(ADDRESS));
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_exhausted() {
        let transport = Arc::new(MockTransport::new(5));
        let mut session = session(&transport, WritePolicy::DropSilently);

        let err = session.connect(ADDRESS).await.unwrap_err();
        assert!(matches!(err, DisplayError::ConnectionExhausted { attempts: 3, .. }));
        assert_eq!(transport.state.attempts.load(Ordering::SeqCst), 3);
        assert!(!session.is_connected());
    }

    #[tokio::test]
    async fn test_connect_is_idempotent() {
        let transport = Arc::new(MockTransport::new(0));
        let mut session = session(&transport, WritePolicy::DropSilently);

        session.connect(ADDRESS).await.unwrap();
        session.connect(ADDRESS).await.unwrap();
        assert_eq!(transport.state.attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_write_policies_when_disconnected() {
        let transport = Arc::new(MockTransport::new(0));

        let mut dropping = session(&transport, WritePolicy::DropSilently);
        assert_eq!(dropping.write(&[1, 2, 3]).await.unwrap(), 0);

        let mut strict = session(&transport, WritePolicy::FailFast);
        assert!(matches!(strict.write(&[1]).await, Err(DisplayError::NotConnected)));
        assert!(transport.writes().is_empty());
    }

    #[tokio::test]
    async fn test_writes_in_order_then_close() {
        let transport = Arc::new(MockTransport::new(0));
        let mut session = session(&transport, WritePolicy::DropSilently);
        session.connect(ADDRESS).await.unwrap();

        assert_eq!(session.write(&[1, 2]).await.unwrap(), 2);
        assert_eq!(session.write(&[3]).await.unwrap(), 1);
        assert_eq!(transport.writes(), vec![vec![1, 2], vec![3]]);

        session.close().await;
        assert!(!session.is_connected());
        assert_eq!(session.write(&[4]).await.unwrap(), 0);
        assert_eq!(transport.writes().len(), 2);
    }

    #[tokio::test]
    async fn test_write_failure_surfaces() {
        let transport = Arc::new(MockTransport::new(0));
        let mut session = session(&transport, WritePolicy::DropSilently);
        session.connect(ADDRESS).await.unwrap();

        transport.state.fail_writes.store(true, Ordering::SeqCst);
        assert!(matches!(session.write(&[1]).await, Err(DisplayError::TransportWrite(_))));
    }

    #[tokio::test]
    async fn test_inbound_bytes_are_consumed() {
        let transport = Arc::new(MockTransport::new(0));
        let mut session = session(&transport, WritePolicy::DropSilently);
        session.connect(ADDRESS).await.unwrap();

        let mut device = transport.state.device_side.lock().unwrap().take().unwrap();
        device.write_all(b"OK").await.unwrap();
        tokio::task::yield_now().await;

        assert!(session.is_connected());
        assert_eq!(session.write(&[1]).await.unwrap(), 1);

        // device hangs up its side: the read loop ends, writes are unaffected
        drop(device);
        tokio::task::yield_now().await;
        assert!(session.is_connected());
        assert_eq!(session.write(&[2]).await.unwrap(), 1);
        assert_eq!(transport.writes(), vec![vec![1], vec![2]]);

        session.close().await;
        assert!(!session.is_connected());
    }
}
