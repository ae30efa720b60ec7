//! Transport seam between serial links and the bytes on the wire.
//!
//! A [`Connector`] opens the transport for a [`LinkConfig`] and hands back a
//! split reader/writer pair. [`SerialConnector`] opens real serial ports via
//! `tokio-serial`; [`MemoryConnector`] backs links with in-memory duplex
//! pipes for tests and dry runs.

use std::collections::HashMap;
use std::io;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite, DuplexStream};
use tokio_serial::{DataBits, FlowControl, Parity, SerialPortBuilderExt, StopBits};

use shutter_core::LinkConfig;

pub type LinkReader = Box<dyn AsyncRead + Send + Unpin>;
pub type LinkWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// An opened transport, split into independent read and write halves.
pub struct LinkIo {
    pub reader: LinkReader,
    pub writer: LinkWriter,
}

impl LinkIo {
    /// Split a bidirectional stream.
    pub fn new<S>(stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        Self {
            reader: Box::new(reader),
            writer: Box::new(writer),
        }
    }
}

/// Opens the transport of a link.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, config: &LinkConfig) -> io::Result<LinkIo>;
}

/// Opens serial ports with 8N1 framing and no flow control.
#[derive(Debug, Clone, Default)]
pub struct SerialConnector;

#[async_trait]
impl Connector for SerialConnector {
    async fn connect(&self, config: &LinkConfig) -> io::Result<LinkIo> {
        let stream = tokio_serial::new(&config.path, config.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .open_native_async()
            .map_err(io::Error::from)?;
        Ok(LinkIo::new(stream))
    }
}

/// Default capacity of each in-memory pipe direction.
const MEMORY_PIPE_CAPACITY: usize = 4096;

/// In-memory transport: each link id gets one duplex pipe.
///
/// The device side of every pipe is returned at construction so the caller
/// can play the microcontroller. Links whose id was not registered fail to
/// connect, and each pipe can be connected only once. Devices can be
/// plugged in later with [`MemoryConnector::plug`].
pub struct MemoryConnector {
    links: Mutex<HashMap<String, DuplexStream>>,
    capacity: usize,
    open_delay: Duration,
}

impl MemoryConnector {
    /// Create pipes for the given link ids, returning the device ends.
    pub fn new<I, S>(link_ids: I) -> (Self, HashMap<String, DuplexStream>)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::with_capacity(link_ids, MEMORY_PIPE_CAPACITY)
    }

    /// Like [`MemoryConnector::new`] with an explicit per-direction buffer size.
    ///
    /// Writes block once `capacity` unread bytes are pending on the device end.
    pub fn with_capacity<I, S>(link_ids: I, capacity: usize) -> (Self, HashMap<String, DuplexStream>)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut links = HashMap::new();
        let mut devices = HashMap::new();
        for id in link_ids {
            let id = id.into();
            let (link_end, device_end) = tokio::io::duplex(capacity);
            links.insert(id.clone(), link_end);
            devices.insert(id, device_end);
        }

        (
            Self {
                links: Mutex::new(links),
                capacity,
                open_delay: Duration::ZERO,
            },
            devices,
        )
    }

    /// Delay every connect, keeping links in the opening state for a while.
    pub fn with_open_delay(mut self, delay: Duration) -> Self {
        self.open_delay = delay;
        self
    }

    /// Register a fresh pipe for `link_id` and return its device end.
    ///
    /// Replaces a pipe that was registered but never connected.
    pub fn plug(&self, link_id: impl Into<String>) -> io::Result<DuplexStream> {
        let (link_end, device_end) = tokio::io::duplex(self.capacity);
        self.lock()?.insert(link_id.into(), link_end);
        Ok(device_end)
    }

    fn lock(&self) -> io::Result<std::sync::MutexGuard<'_, HashMap<String, DuplexStream>>> {
        self.links
            .lock()
            .map_err(|_| io::Error::other("memory connector lock poisoned"))
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, config: &LinkConfig) -> io::Result<LinkIo> {
        if !self.open_delay.is_zero() {
            tokio::time::sleep(self.open_delay).await;
        }

        let stream = self
            .lock()?
            .remove(&config.id)
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("no such device: {}", config.path),
                )
            })?;
        Ok(LinkIo::new(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_memory_connector_pipes_bytes() {
        let (connector, mut devices) = MemoryConnector::new(["OG"]);
        let config = LinkConfig::new("OG", "/dev/ttyACM0", vec![0]);

        let mut io = connector.connect(&config).await.unwrap();
        io.writer.write_all(b"O0:1\n").await.unwrap();

        let mut device = devices.remove("OG").unwrap();
        let mut buf = [0u8; 5];
        device.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"O0:1\n");

        device.write_all(b"ok\n").await.unwrap();
        let mut reply = [0u8; 3];
        io.reader.read_exact(&mut reply).await.unwrap();
        assert_eq!(&reply, b"ok\n");
    }

    #[tokio::test]
    async fn test_memory_connector_unknown_link() {
        let (connector, _devices) = MemoryConnector::new(["OG"]);
        let config = LinkConfig::new("EG", "/dev/ttyACM1", vec![8]);

        let err = connector.connect(&config).await.err().unwrap();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
        assert!(err.to_string().contains("/dev/ttyACM1"));
    }

    #[tokio::test]
    async fn test_memory_connector_connects_once() {
        let (connector, _devices) = MemoryConnector::new(["OG"]);
        let config = LinkConfig::new("OG", "/dev/ttyACM0", vec![0]);

        assert!(connector.connect(&config).await.is_ok());
        assert!(connector.connect(&config).await.is_err());
    }

    #[tokio::test]
    async fn test_memory_connector_plug_after_failed_connect() {
        let (connector, _devices) = MemoryConnector::new(["EG"]);
        let config = LinkConfig::new("OG", "/dev/ttyACM0", vec![0]);
        assert!(connector.connect(&config).await.is_err());

        let mut device = connector.plug("OG").unwrap();
        let mut io = connector.connect(&config).await.unwrap();
        io.writer.write_all(b"O0:0\n").await.unwrap();

        let mut buf = [0u8; 5];
        device.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"O0:0\n");
    }

    #[tokio::test]
    async fn test_serial_connector_missing_device() {
        let config = LinkConfig::new("OG", "/dev/shutter-bridge-does-not-exist", vec![0]);
        assert!(SerialConnector.connect(&config).await.is_err());
    }
}
