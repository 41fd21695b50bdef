use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result};
use crossbeam_channel::{bounded, Receiver, Sender};
use rosc::OscPacket;

use super::{parse_datagram, OscOutbound};
use crate::control::FeedbackQueue;

pub const DEFAULT_OSC_HOST: &str = "127.0.0.1";
/// Outbound queue depth; two messages per tick
const SEND_QUEUE_CAPACITY: usize = 1024;
const RECV_TIMEOUT: Duration = Duration::from_millis(50);

pub fn resolve_target(host: &str, port: u16) -> Result<SocketAddr> {
    (host, port)
        .to_socket_addrs()
        .with_context(|| format!("Failed to resolve OSC host {}:{}", host, port))?
        .next()
        .with_context(|| format!("No address for OSC host {}:{}", host, port))
}

/// Listens for control messages and hands them to the audio thread
pub struct OscReceiver {
    port: u16,
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl OscReceiver {
    pub fn bind(port: u16, feedback: Arc<FeedbackQueue>) -> Result<Self> {
        let socket = UdpSocket::bind(("0.0.0.0", port))
            .with_context(|| format!("Failed to bind OSC receive port {}", port))?;
        socket.set_read_timeout(Some(RECV_TIMEOUT))?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&shutdown);
        let handle = thread::Builder::new()
            .name("osc-recv".into())
            .spawn(move || {
                let mut buf = [0u8; 4096];
                while !flag.load(Ordering::Relaxed) {
                    match socket.recv(&mut buf) {
                        Ok(n) => {
                            for event in parse_datagram(&buf[..n]) {
                                if !feedback.push(event) {
                                    log::warn!(target: "osc", "Feedback queue full, dropped {:?}", event);
                                }
                            }
                        }
                        Err(ref e)
                            if matches!(
                                e.kind(),
                                std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                            ) => {}
                        Err(e) => {
                            log::error!(target: "osc", "Receive failed: {}", e);
                            break;
                        }
                    }
                }
            })
            .context("Failed to spawn OSC receive thread")?;

        log::info!(target: "osc", "Listening on port {}", port);
        Ok(Self {
            port,
            shutdown,
            handle: Some(handle),
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for OscReceiver {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Owns the outbound socket. The thread exits once every sender is dropped.
pub struct OscSender {
    tx: Sender<OscOutbound>,
    target: SocketAddr,
}

impl OscSender {
    pub fn spawn(target: SocketAddr) -> Result<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0").context("Failed to bind OSC send socket")?;
        let (tx, rx) = bounded(SEND_QUEUE_CAPACITY);
        thread::Builder::new()
            .name("osc-send".into())
            .spawn(move || send_loop(socket, target, rx))
            .context("Failed to spawn OSC send thread")?;
        log::info!(target: "osc", "Sending to {}", target);
        Ok(Self { tx, target })
    }

    pub fn sender(&self) -> Sender<OscOutbound> {
        self.tx.clone()
    }

    pub fn target(&self) -> SocketAddr {
        self.target
    }

    pub fn retarget(&mut self, target: SocketAddr) {
        if target == self.target {
            return;
        }
        self.target = target;
        if self.tx.send(OscOutbound::Retarget(target)).is_err() {
            log::warn!(target: "osc", "Send thread is gone, cannot retarget");
        }
    }
}

fn send_loop(socket: UdpSocket, mut target: SocketAddr, rx: Receiver<OscOutbound>) {
    let mut failing = false;
    for outbound in rx.iter() {
        if let OscOutbound::Retarget(addr) = outbound {
            log::info!(target: "osc", "Sending to {}", addr);
            target = addr;
            failing = false;
            continue;
        }
        let Some(msg) = outbound.to_message() else {
            continue;
        };
        let bytes = match rosc::encoder::encode(&OscPacket::Message(msg)) {
            Ok(b) => b,
            Err(e) => {
                log::error!(target: "osc", "Encode failed: {}", e);
                continue;
            }
        };
        match socket.send_to(&bytes, target) {
            Ok(_) => failing = false,
            Err(e) => {
                // Log the first failure of a run, not every tick
                if !failing {
                    log::warn!(target: "osc", "Send to {} failed: {}", target, e);
                }
                failing = true;
            }
        }
    }
    log::debug!(target: "osc", "Send thread finished");
}
