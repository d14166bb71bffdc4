//! Host uplinks: stdout for local runs, line-delimited TCP toward a collector

use std::io::{self, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use log::{debug, info, warn};
use pulselink_core::uplink::Uplink;

/// Prints every published record as `PUBLISH <record>`; always reachable.
#[derive(Default)]
pub struct StdoutUplink {
    connected: bool,
}

impl StdoutUplink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Uplink for StdoutUplink {
    type Error = io::Error;

    async fn bring_up_link(&mut self) -> bool {
        true
    }

    async fn connect(&mut self) -> io::Result<()> {
        self.connected = true;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn publish(&mut self, record: &str) -> io::Result<()> {
        if !self.connected {
            return Err(io::Error::from(io::ErrorKind::NotConnected));
        }
        let mut out = io::stdout().lock();
        writeln!(out, "PUBLISH {}", record)?;
        out.flush()
    }

    fn disconnect(&mut self) {
        self.connected = false;
    }
}

/// Sends one record per line over TCP.
///
/// Every blocking call is bounded by `timeout`, so a dead collector costs at
/// most one timeout per attempt.
pub struct TcpUplink {
    collector: String,
    timeout: Duration,
    resolved: Option<SocketAddr>,
    stream: Option<TcpStream>,
}

impl TcpUplink {
    pub fn new(collector: impl Into<String>, timeout: Duration) -> Self {
        Self {
            collector: collector.into(),
            timeout,
            resolved: None,
            stream: None,
        }
    }

    fn drop_stream(&mut self) {
        if let Some(stream) = self.stream.take()
            && let Err(e) = stream.shutdown(std::net::Shutdown::Both)
        {
            debug!("Shutdown of collector stream failed: {}", e);
        }
    }
}

impl Uplink for TcpUplink {
    type Error = io::Error;

    /// The link counts as up once the collector address resolves.
    async fn bring_up_link(&mut self) -> bool {
        match self.collector.to_socket_addrs() {
            Ok(mut addrs) => {
                self.resolved = addrs.next();
                self.resolved.is_some()
            }
            Err(e) => {
                warn!("Cannot resolve collector {}: {}", self.collector, e);
                false
            }
        }
    }

    async fn connect(&mut self) -> io::Result<()> {
        self.drop_stream();
        let addr = self
            .resolved
            .ok_or_else(|| io::Error::from(io::ErrorKind::AddrNotAvailable))?;

        let stream = TcpStream::connect_timeout(&addr, self.timeout)?;
        stream.set_write_timeout(Some(self.timeout))?;
        stream.set_nodelay(true)?;
        info!("Connected to collector at {}", addr);
        self.stream = Some(stream);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        let Some(stream) = &self.stream else {
            return false;
        };
        if let Err(e) = stream.set_nonblocking(true) {
            debug!("Liveness probe unavailable: {}", e);
            return false;
        }

        // A readable EOF means the collector closed the session
        let mut probe = [0u8; 1];
        let alive = match stream.peek(&mut probe) {
            Ok(0) => false,
            Ok(_) => true,
            Err(e) => e.kind() == io::ErrorKind::WouldBlock,
        };

        if let Err(e) = stream.set_nonblocking(false) {
            debug!("Restoring blocking mode failed: {}", e);
            return false;
        }
        alive
    }

    async fn publish(&mut self, record: &str) -> io::Result<()> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotConnected))?;

        let mut line = Vec::with_capacity(record.len() + 1);
        line.extend_from_slice(record.as_bytes());
        line.push(b'\n');

        if let Err(e) = stream.write_all(&line) {
            warn!("Collector write failed: {}", e);
            self.drop_stream();
            return Err(e);
        }
        Ok(())
    }

    fn disconnect(&mut self) {
        self.drop_stream();
    }
}
