#![allow(dead_code)]
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use groundlink_lib::serial::{SerialError, SerialInterface, SerialPortIO};
use groundlink_lib::serial::unified::{MetricsSnapshot, UnifiedSerialHandle};
use groundlink_lib::session::SessionEvent;
use tokio::sync::broadcast;

type Responder = Box<dyn Fn(&str) -> Vec<String> + Send>;

#[derive(Default)]
struct Shared {
    inbound: VecDeque<Vec<u8>>,
    written: Vec<String>,
    fail_next_read: bool,
    stall_flush: bool,
}

/// Scripted vehicle: answers each written line with canned chunks.
pub struct ScriptedVehicle {
    shared: Arc<Mutex<Shared>>,
    responder: Responder,
}

/// Test-side view of a [`ScriptedVehicle`] after it has been moved into the link.
#[derive(Clone)]
pub struct VehicleProbe {
    shared: Arc<Mutex<Shared>>,
}

impl VehicleProbe {
    pub fn written(&self) -> Vec<String> {
        self.shared.lock().unwrap().written.clone()
    }

    pub fn inject(&self, bytes: &[u8]) {
        self.shared.lock().unwrap().inbound.push_back(bytes.to_vec());
    }

    pub fn fail_next_read(&self) {
        self.shared.lock().unwrap().fail_next_read = true;
    }

    /// Make every later flush hang, as a wedged USB bridge would.
    pub fn stall_flush(&self) {
        self.shared.lock().unwrap().stall_flush = true;
    }
}

pub fn scripted(responder: impl Fn(&str) -> Vec<String> + Send + 'static) -> (SerialInterface, VehicleProbe) {
    let shared = Arc::new(Mutex::new(Shared::default()));
    let vehicle = ScriptedVehicle { shared: shared.clone(), responder: Box::new(responder) };
    (SerialInterface::from_io(Box::new(vehicle), "sim0"), VehicleProbe { shared })
}

#[async_trait::async_trait]
impl SerialPortIO for ScriptedVehicle {
    async fn send_data(&mut self, data: &[u8]) -> Result<usize, SerialError> {
        let text = String::from_utf8_lossy(data).to_string();
        let replies: Vec<String> = text.lines().flat_map(|l| (self.responder)(l.trim())).collect();
        let mut shared = self.shared.lock().unwrap();
        shared.written.extend(text.lines().map(|l| l.trim().to_string()));
        shared.inbound.extend(replies.into_iter().map(String::into_bytes));
        Ok(data.len())
    }

    async fn read_data(&mut self, buf: &mut [u8], timeout_ms: u64) -> Result<usize, SerialError> {
        let chunk = {
            let mut shared = self.shared.lock().unwrap();
            if shared.fail_next_read {
                shared.fail_next_read = false;
                return Err(SerialError::IoError(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "device removed")));
            }
            shared.inbound.pop_front()
        };
        match chunk {
            Some(mut bytes) => {
                let n = bytes.len().min(buf.len());
                buf[..n].copy_from_slice(&bytes[..n]);
                if n < bytes.len() {
                    let rest = bytes.split_off(n);
                    self.shared.lock().unwrap().inbound.push_front(rest);
                }
                Ok(n)
            }
            None => {
                tokio::time::sleep(Duration::from_millis(timeout_ms.min(5))).await;
                Err(SerialError::Timeout)
            }
        }
    }

    async fn flush(&mut self) -> Result<(), SerialError> {
        let stalled = self.shared.lock().unwrap().stall_flush;
        if stalled {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        Ok(())
    }
}

/// Wait for the first event matching `pred`, skipping others.
pub async fn wait_for<F>(rx: &mut broadcast::Receiver<SessionEvent>, mut pred: F) -> SessionEvent
where
    F: FnMut(&SessionEvent) -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match rx.recv().await {
                Ok(evt) if pred(&evt) => return evt,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event channel closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

/// Poll the metrics watch until `pred` holds.
pub async fn wait_for_metrics<F>(handle: &UnifiedSerialHandle, mut pred: F) -> MetricsSnapshot
where
    F: FnMut(&MetricsSnapshot) -> bool,
{
    let mut rx = handle.metrics_receiver();
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let current = rx.borrow_and_update().clone();
            if pred(&current) {
                return current;
            }
            if rx.changed().await.is_err() {
                panic!("metrics channel closed");
            }
        }
    })
    .await
    .expect("timed out waiting for metrics")
}

/// Poll until the vehicle has seen `line` written.
pub async fn wait_for_write(probe: &VehicleProbe, line: &str) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !probe.written().iter().any(|l| l == line) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("timed out waiting for write");
}
