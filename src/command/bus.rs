use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};

use super::types::Command;

/// Commands the audio callback may fall behind by before new ones are dropped
pub const COMMAND_QUEUE_CAPACITY: usize = 256;
/// Most commands applied in one callback; the rest wait for the next
pub const COMMANDS_PER_CALLBACK: usize = 64;

/// Command bus from the control side into the audio callback
pub struct CommandBus {
    tx: Sender<Command>,
    rx: Receiver<Command>,
    dropped: Arc<AtomicU64>,
}

impl CommandBus {
    pub fn new() -> Self {
        let (tx, rx) = bounded(COMMAND_QUEUE_CAPACITY);
        Self {
            tx,
            rx,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Cloneable sending half for the UI thread
    pub fn sender(&self) -> CommandSender {
        CommandSender {
            tx: self.tx.clone(),
            dropped: Arc::clone(&self.dropped),
        }
    }

    /// Receiving half, moved into the audio callback
    pub fn receiver(&self) -> CommandReceiver {
        CommandReceiver {
            rx: self.rx.clone(),
        }
    }
}

impl Default for CommandBus {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone)]
pub struct CommandSender {
    tx: Sender<Command>,
    dropped: Arc<AtomicU64>,
}

impl CommandSender {
    /// Never blocks. Returns false if the command was dropped.
    pub fn send(&self, cmd: Command) -> bool {
        match self.tx.try_send(cmd) {
            Ok(()) => {
                log::debug!(target: "command", "{}", cmd.description());
                true
            }
            Err(TrySendError::Full(_)) => {
                let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                log::warn!(
                    target: "command",
                    "Command queue full, dropping {} ({} dropped so far)",
                    cmd.description(),
                    total
                );
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }
}

pub struct CommandReceiver {
    rx: Receiver<Command>,
}

impl CommandReceiver {
    /// Hand up to [`COMMANDS_PER_CALLBACK`] queued commands to `f`, oldest first.
    /// Returns how many were handled.
    pub fn drain(&self, mut f: impl FnMut(Command)) -> usize {
        let mut handled = 0;
        while handled < COMMANDS_PER_CALLBACK {
            match self.rx.try_recv() {
                Ok(cmd) => {
                    f(cmd);
                    handled += 1;
                }
                Err(_) => break,
            }
        }
        handled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(rx: &CommandReceiver) -> Vec<Command> {
        let mut out = Vec::new();
        rx.drain(|cmd| out.push(cmd));
        out
    }

    #[test]
    fn commands_arrive_in_order() {
        let bus = CommandBus::new();
        let tx = bus.sender();
        let rx = bus.receiver();
        assert!(tx.send(Command::Play));
        assert!(tx.send(Command::HardReset));
        assert_eq!(collect(&rx), vec![Command::Play, Command::HardReset]);
        assert!(collect(&rx).is_empty());
    }

    #[test]
    fn full_queue_drops_instead_of_blocking() {
        let bus = CommandBus::new();
        let tx = bus.sender();
        for _ in 0..COMMAND_QUEUE_CAPACITY {
            assert!(tx.send(Command::SoftReset));
        }
        assert!(!tx.send(Command::SoftReset));
        assert_eq!(bus.dropped.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn one_drain_is_capped() {
        let bus = CommandBus::new();
        let tx = bus.sender();
        let rx = bus.receiver();
        for _ in 0..COMMANDS_PER_CALLBACK + 10 {
            tx.send(Command::SequenceReset);
        }
        assert_eq!(rx.drain(|_| {}), COMMANDS_PER_CALLBACK);
        assert_eq!(rx.drain(|_| {}), 10);
    }
}
