//! Serial link to the controller: connection lifecycle and raw line I/O.
//!
//! The [`Link`] owns the transport exclusively: at most one open port per
//! driver instance. Opening a real port runs a wake sequence that clears
//! the controller's boot banner so it is never misread as a command reply.
//! In virtual mode no port ever exists; the link owns a
//! [`VirtualMachine`] simulator instead and the raw I/O paths are unused.

use crate::config::TimeoutSettings;
use crate::error::Result;
use crate::sim::VirtualMachine;
use log::{debug, info};
use serialport::SerialPort;
use std::io::{Read, Write};
use std::thread;
use std::time::{Duration, Instant};

/// Token written during the wake sequence to reset GRBL's line parser.
const WAKE_TOKEN: &[u8] = b"\r\n\r\n";

/// Poll granularity for the port's own read timeout. The overall deadline
/// is enforced separately in [`Link::read_line`].
const PORT_READ_TIMEOUT: Duration = Duration::from_millis(100);

enum Transport {
    /// A real serial port; `None` until `connect` opens it.
    Serial(Option<Box<dyn SerialPort>>),
    /// Simulated controller; no hardware is ever touched.
    Virtual(VirtualMachine),
}

/// Byte-stream connection to the controller (or its simulation).
pub struct Link {
    port_name: String,
    baud_rate: u32,
    timeouts: TimeoutSettings,
    transport: Transport,
}

impl Link {
    /// A link to real hardware on `port_name`. The port is not opened
    /// until [`Link::connect`] or the first operation that needs it.
    pub fn serial(port_name: &str, baud_rate: u32, timeouts: TimeoutSettings) -> Self {
        Self {
            port_name: port_name.to_string(),
            baud_rate,
            timeouts,
            transport: Transport::Serial(None),
        }
    }

    /// A virtual link backed by a fresh [`VirtualMachine`].
    pub fn simulated(timeouts: TimeoutSettings) -> Self {
        Self {
            port_name: "virtual".to_string(),
            baud_rate: 0,
            timeouts,
            transport: Transport::Virtual(VirtualMachine::new()),
        }
    }

    /// Whether this link simulates the controller instead of driving one.
    pub fn is_virtual(&self) -> bool {
        matches!(self.transport, Transport::Virtual(_))
    }

    /// Whether a real port is currently open. Always false in virtual mode.
    pub fn is_open(&self) -> bool {
        matches!(self.transport, Transport::Serial(Some(_)))
    }

    /// The simulated controller, when in virtual mode.
    pub fn simulator(&self) -> Option<&VirtualMachine> {
        match &self.transport {
            Transport::Virtual(sim) => Some(sim),
            Transport::Serial(_) => None,
        }
    }

    /// Mutable access to the simulated controller, when in virtual mode.
    pub fn simulator_mut(&mut self) -> Option<&mut VirtualMachine> {
        match &mut self.transport {
            Transport::Virtual(sim) => Some(sim),
            Transport::Serial(_) => None,
        }
    }

    /// Opens the transport if it is not already open.
    ///
    /// No-op when already open or in virtual mode. After a real open the
    /// wake sequence runs: discard buffered input, write the line-reset
    /// token, wait for the controller to finish its boot banner, then
    /// discard buffered input again.
    pub fn connect(&mut self) -> Result<()> {
        let opened = match &mut self.transport {
            Transport::Virtual(_) => {
                info!("[virtual] connect is a no-op");
                false
            }
            Transport::Serial(Some(_)) => {
                debug!("serial port {} already open", self.port_name);
                false
            }
            Transport::Serial(slot) => {
                info!(
                    "opening serial port {} @ {} baud",
                    self.port_name, self.baud_rate
                );
                let port = serialport::new(&self.port_name, self.baud_rate)
                    .timeout(PORT_READ_TIMEOUT)
                    .open()?;
                *slot = Some(port);
                true
            }
        };
        if opened {
            self.wake_up()?;
        }
        Ok(())
    }

    /// Closes the transport if open. Never fails; the handle is dropped
    /// regardless, so calling this twice (or without a prior connect) is
    /// safe.
    pub fn close(&mut self) {
        match &mut self.transport {
            Transport::Virtual(_) => info!("[virtual] close is a no-op"),
            Transport::Serial(slot) => {
                if slot.take().is_some() {
                    // Dropping the handle closes the device.
                    info!("closed serial port {}", self.port_name);
                }
            }
        }
    }

    /// Opens the transport on demand; no-op in virtual mode or when open.
    pub fn ensure_connected(&mut self) -> Result<()> {
        match &self.transport {
            Transport::Virtual(_) | Transport::Serial(Some(_)) => Ok(()),
            Transport::Serial(None) => self.connect(),
        }
    }

    fn wake_up(&mut self) -> Result<()> {
        let settle = self.timeouts.wake_settle();
        let Transport::Serial(Some(port)) = &mut self.transport else {
            return Ok(());
        };
        debug!("waking controller and clearing greeting");
        port.clear(serialport::ClearBuffer::Input)?;
        port.write_all(WAKE_TOKEN)?;
        port.flush()?;
        thread::sleep(settle);
        port.clear(serialport::ClearBuffer::Input)?;
        Ok(())
    }

    /// Reads one `\n`-terminated frame, blocking up to `timeout`.
    ///
    /// Returns the trimmed text (lossily decoded, so non-UTF-8 bytes are
    /// never fatal), or an empty string when the deadline passes without a
    /// complete frame. In virtual mode there is nothing to read.
    pub fn read_line(&mut self, timeout: Duration) -> Result<String> {
        self.ensure_connected()?;
        let Transport::Serial(Some(port)) = &mut self.transport else {
            return Ok(String::new());
        };

        let start = Instant::now();
        let mut buf = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            if start.elapsed() > timeout {
                return Ok(String::new());
            }
            match port.read(&mut byte) {
                Ok(0) => {
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        "serial port returned EOF",
                    )
                    .into());
                }
                Ok(_) => {
                    if byte[0] == b'\n' {
                        break;
                    }
                    buf.push(byte[0]);
                }
                Err(e)
                    if e.kind() == std::io::ErrorKind::TimedOut
                        || e.kind() == std::io::ErrorKind::WouldBlock =>
                {
                    // Port-level timeout is shorter than the overall
                    // deadline; keep waiting.
                    continue;
                }
                Err(e) => return Err(e.into()),
            }
        }

        let line = String::from_utf8_lossy(&buf).trim().to_string();
        if !line.is_empty() {
            debug!("<< {}", line);
        }
        Ok(line)
    }

    /// Writes `text` followed by an ASCII newline.
    pub fn write_line(&mut self, text: &str) -> Result<()> {
        self.ensure_connected()?;
        let Transport::Serial(Some(port)) = &mut self.transport else {
            return Ok(());
        };
        port.write_all(text.as_bytes())?;
        port.write_all(b"\n")?;
        port.flush()?;
        Ok(())
    }

    /// Writes raw bytes with no terminator (the `?` status request).
    pub fn write_raw(&mut self, bytes: &[u8]) -> Result<()> {
        self.ensure_connected()?;
        let Transport::Serial(Some(port)) = &mut self.transport else {
            return Ok(());
        };
        port.write_all(bytes)?;
        port.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TimeoutSettings;

    #[test]
    fn test_close_is_idempotent_and_safe_without_connect() {
        let mut link = Link::serial("/dev/ttyUSB0", 115_200, TimeoutSettings::default());
        assert!(!link.is_open());
        link.close();
        link.close();
        assert!(!link.is_open());
    }

    #[test]
    fn test_connect_failure_leaves_link_closed() {
        let mut link = Link::serial(
            "/nonexistent/port/for/tests",
            115_200,
            TimeoutSettings::default(),
        );
        assert!(link.connect().is_err());
        assert!(!link.is_open());
        // The failure does not corrupt the handle.
        link.close();
    }

    #[test]
    fn test_virtual_link_never_opens_hardware() {
        let mut link = Link::simulated(TimeoutSettings::default());
        assert!(link.is_virtual());
        link.connect().unwrap();
        assert!(!link.is_open());
        link.ensure_connected().unwrap();
        assert!(link.read_line(Duration::from_secs(1)).unwrap().is_empty());
        link.write_line("G0 X1").unwrap();
        link.close();
        // The simulator is untouched by raw I/O.
        assert!(link.simulator().unwrap().sent().is_empty());
    }
}
