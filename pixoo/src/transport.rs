/*!
Serial transport collaborator.

The session never touches Bluetooth directly. It resolves an address to a
channel, opens a [`SerialLink`] and from then on only sees an async byte
reader and writer.

[`RfcommTransport`] is the default implementation: it maps paired device
addresses to RFCOMM device nodes bound by the system (`rfcomm bind`), as
listed in the `[[transport.devices]]` table of the configuration file.
*/

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;

use crate::config::DeviceEntry;
use crate::error::{DisplayError, Result};

/// A paired device as reported by the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairedDevice {
    pub name: String,
    pub address: String,
}

impl std::fmt::Display for PairedDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.name, self.address)
    }
}

/// An open serial channel split into its two directions
pub struct SerialLink {
    pub reader: Box<dyn AsyncRead + Send + Unpin>,
    pub writer: Box<dyn AsyncWrite + Send + Unpin>,
}

#[async_trait]
pub trait SerialTransport: Send + Sync {
    /// Name and address of every paired device
    async fn list_paired_devices(&self) -> Result<Vec<PairedDevice>>;

    /// Resolve an address to its serial channel, [`DisplayError::NotFound`] otherwise
    async fn find_channel(&self, address: &str) -> Result<u8>;

    /// Open the channel, [`DisplayError::Refused`] when the device does not accept
    async fn open(&self, address: &str, channel: u8) -> Result<SerialLink>;
}

/// Bluetooth addresses are compared upper-case with `:` separators
pub fn normalize_address(address: &str) -> String {
    address.replace('-', ":").to_uppercase()
}

/// RFCOMM device-node transport
#[derive(Debug, Clone, Default)]
pub struct RfcommTransport {
    devices: Vec<DeviceEntry>,
}

impl RfcommTransport {
    pub fn new(devices: Vec<DeviceEntry>) -> Self {
        Self { devices }
    }

    fn entry(&self, address: &str) -> Option<&DeviceEntry> {
        let address = normalize_address(address);
        self.devices
            .iter()
            .find(|d| normalize_address(&d.address) == address)
    }

    fn node_path(entry: &DeviceEntry) -> PathBuf {
        entry
            .path
            .clone()
            .unwrap_or_else(|| PathBuf::from(format!("/dev/rfcomm{}", entry.channel)))
    }
}

#[async_trait]
impl SerialTransport for RfcommTransport {
    async fn list_paired_devices(&self) -> Result<Vec<PairedDevice>> {
        Ok(self
            .devices
            .iter()
            .map(|d| PairedDevice {
                name: d.name.clone(),
                address: normalize_address(&d.address),
            })
            .collect())
    }

    async fn find_channel(&self, address: &str) -> Result<u8> {
        let entry = self
            .entry(address)
            .ok_or_else(|| DisplayError::not_found(format!("{} is not paired", address)))?;

        let path = Self::node_path(entry);
        match tokio::fs::try_exists(&path).await {
            Ok(true) => Ok(entry.channel),
            _ => Err(DisplayError::not_found(format!(
                "{} has no device node at {}",
                address,
                path.display()
            ))),
        }
    }

    async fn open(&self, address: &str, channel: u8) -> Result<SerialLink> {
        let entry = self
            .entry(address)
            .ok_or_else(|| DisplayError::not_found(format!("{} is not paired", address)))?;
        let path = Self::node_path(entry);

        let file = tokio::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .await
            .map_err(|e| DisplayError::refused(format!("{} ({})", path.display(), e)))?;
        debug!("Opened {} for {} on channel {}", path.display(), address, channel);

        let (reader, writer) = tokio::io::split(file);
        Ok(SerialLink {
            reader: Box::new(reader),
            writer: Box::new(writer),
        })
    }
}

#[cfg(test)]
pub mod mock {
    //! In-memory transport recording every write.

    use super::*;
    use std::io;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};
    use std::task::{Context, Poll};
    use tokio::io::DuplexStream;

    #[derive(Default)]
    pub struct MockState {
        pub writes: Mutex<Vec<Vec<u8>>>,
        pub attempts: AtomicU32,
        pub fail_writes: AtomicBool,
        pub device_side: Mutex<Option<DuplexStream>>,
    }

    /// Transport that refuses the first `failures` connections
    pub struct MockTransport {
        pub state: Arc<MockState>,
        failures: u32,
    }

    impl MockTransport {
        pub fn new(failures: u32) -> Self {
            Self {
                state: Arc::new(MockState::default()),
                failures,
            }
        }

        pub fn writes(&self) -> Vec<Vec<u8>> {
            self.state.writes.lock().unwrap().clone()
        }
    }

    struct RecordingWriter {
        state: Arc<MockState>,
    }

    impl AsyncWrite for RecordingWriter {
        fn poll_write(self: Pin<&mut Self>, _cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
            if self.state.fail_writes.load(Ordering::SeqCst) {
                return Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "link lost")));
            }
            self.state.writes.lock().unwrap().push(buf.to_vec());
            Poll::Ready(Ok(buf.len()))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    #[async_trait]
    impl SerialTransport for MockTransport {
        async fn list_paired_devices(&self) -> Result<Vec<PairedDevice>> {
            Ok(vec![PairedDevice {
                name: "Pixoo".to_string(),
                address: "11:22:33:44:55:66".to_string(),
            }])
        }

        async fn find_channel(&self, _address: &str) -> Result<u8> {
            let attempt = self.state.attempts.fetch_add(1, Ordering::SeqCst);
            if attempt < self.failures {
                return Err(DisplayError::not_found("scripted failure"));
            }
            Ok(1)
        }

        async fn open(&self, _address: &str, _channel: u8) -> Result<SerialLink> {
            let (host, device) = tokio::io::duplex(1024);
            *self.state.device_side.lock().unwrap() = Some(device);
            Ok(SerialLink {
                reader: Box::new(host),
                writer: Box::new(RecordingWriter {
                    state: Arc::clone(&self.state),
                }),
            })
        }
    }
}
