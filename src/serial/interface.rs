use std::io::{Read, Write};
use std::time::Duration;

use async_trait::async_trait;
use serialport::{SerialPort, SerialPortType};
use tokio::time::{sleep, timeout};

use super::{Result, SerialDeviceInfo, SerialError};
use crate::config::DEFAULT_BAUD_RATE;

/// Byte-level access to an open link. Implemented for real serial ports and
/// by scripted doubles in tests.
#[async_trait]
pub trait SerialPortIO: Send {
    async fn send_data(&mut self, data: &[u8]) -> Result<usize>;
    /// Read whatever is available, waiting at most `timeout_ms` for the first
    /// byte. Returns `Err(Timeout)` when nothing arrived.
    async fn read_data(&mut self, buf: &mut [u8], timeout_ms: u64) -> Result<usize>;
    /// Wait until queued output has left the host.
    async fn flush(&mut self) -> Result<()>;
}

struct SerialportIo {
    port: Box<dyn SerialPort>,
}

#[async_trait]
impl SerialPortIO for SerialportIo {
    async fn send_data(&mut self, data: &[u8]) -> Result<usize> {
        self.port.write_all(data)?;
        Ok(data.len())
    }

    async fn read_data(&mut self, buf: &mut [u8], timeout_ms: u64) -> Result<usize> {
        let read_operation = async {
            loop {
                match self.port.bytes_to_read() {
                    Ok(0) => sleep(Duration::from_millis(5)).await,
                    Ok(_) => match self.port.read(buf) {
                        Ok(n) => return Ok(n),
                        Err(ref e) if e.kind() == std::io::ErrorKind::TimedOut => {}
                        Err(e) => return Err(SerialError::IoError(e)),
                    },
                    Err(e) => return Err(SerialError::SerialportError(e)),
                }
            }
        };

        timeout(Duration::from_millis(timeout_ms), read_operation)
            .await
            .map_err(|_| SerialError::Timeout)?
    }

    async fn flush(&mut self) -> Result<()> {
        loop {
            if self.port.bytes_to_write()? == 0 {
                return Ok(());
            }
            sleep(Duration::from_millis(2)).await;
        }
    }
}

/// Outcome of a line write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteOutcome {
    pub bytes: usize,
    /// False when the flush wait timed out. The bytes were still written.
    pub flushed: bool,
}

pub struct SerialInterface {
    io: Option<Box<dyn SerialPortIO>>,
    port_name: Option<String>,
}

impl SerialInterface {
    pub fn new() -> Self {
        Self { io: None, port_name: None }
    }

    /// Wrap an already open transport.
    pub fn from_io(io: Box<dyn SerialPortIO>, port_name: impl Into<String>) -> Self {
        Self { io: Some(io), port_name: Some(port_name.into()) }
    }

    /// List the serial ports present on this machine.
    pub fn discover_devices() -> Result<Vec<SerialDeviceInfo>> {
        let ports = serialport::available_ports()?;
        let devices = ports
            .into_iter()
            .map(|port| match port.port_type {
                SerialPortType::UsbPort(usb) => SerialDeviceInfo {
                    port_name: port.port_name,
                    vid: Some(usb.vid),
                    pid: Some(usb.pid),
                    serial_number: usb.serial_number,
                    manufacturer: usb.manufacturer,
                    product: usb.product,
                },
                _ => SerialDeviceInfo {
                    port_name: port.port_name,
                    vid: None,
                    pid: None,
                    serial_number: None,
                    manufacturer: None,
                    product: None,
                },
            })
            .collect();
        Ok(devices)
    }

    /// Open `port_name` at `baud_rate`, 8N1, no flow control.
    pub fn connect(&mut self, port_name: &str, baud_rate: u32) -> Result<()> {
        let port_name = port_name.trim();
        if port_name.is_empty() {
            return Err(SerialError::ConnectionFailed {
                port: String::new(),
                description: "Port name is empty".to_string(),
            });
        }
        if self.is_connected() && self.port_name.as_deref() == Some(port_name) {
            return Ok(());
        }
        if self.is_connected() {
            self.disconnect();
        }

        let baud_rate = if baud_rate == 0 { DEFAULT_BAUD_RATE } else { baud_rate };
        let port = serialport::new(port_name, baud_rate)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .flow_control(serialport::FlowControl::None)
            .timeout(Duration::from_millis(10))
            .open()
            .map_err(|e| match e.kind() {
                serialport::ErrorKind::NoDevice => SerialError::PortNotFound(port_name.to_string()),
                _ => SerialError::ConnectionFailed { port: port_name.to_string(), description: e.to_string() },
            })?;

        self.io = Some(Box::new(SerialportIo { port }));
        self.port_name = Some(port_name.to_string());
        log::info!("Opened serial port {} at {} baud", port_name, baud_rate);
        Ok(())
    }

    pub fn disconnect(&mut self) {
        if self.io.take().is_some() {
            if let Some(name) = &self.port_name {
                log::info!("Closing serial port {}", name);
            }
        }
        self.port_name = None;
    }

    pub fn is_connected(&self) -> bool {
        self.io.is_some()
    }

    pub fn port_name(&self) -> Option<&str> {
        self.port_name.as_deref()
    }

    /// Write one protocol line, then wait up to `flush_timeout` for it to
    /// drain. A flush timeout is logged, not returned as an error.
    pub async fn send_line(&mut self, line: &str, flush_timeout: Duration) -> Result<WriteOutcome> {
        let io = self.io.as_mut().ok_or(SerialError::NotConnected)?;
        let mut data = line.as_bytes().to_vec();
        if !data.ends_with(b"\n") {
            data.push(b'\n');
        }
        let bytes = io.send_data(&data).await?;

        let flushed = match timeout(flush_timeout, io.flush()).await {
            Ok(res) => {
                res?;
                true
            }
            Err(_) => {
                log::warn!(
                    "Flush wait timed out after {:?} on {}",
                    flush_timeout,
                    self.port_name.as_deref().unwrap_or("?")
                );
                false
            }
        };
        Ok(WriteOutcome { bytes, flushed })
    }

    pub async fn read_data(&mut self, buf: &mut [u8], timeout_ms: u64) -> Result<usize> {
        let io = self.io.as_mut().ok_or(SerialError::NotConnected)?;
        io.read_data(buf, timeout_ms).await
    }
}

impl Default for SerialInterface {
    fn default() -> Self {
        Self::new()
    }
}
