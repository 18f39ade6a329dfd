//! Process signals that stop the daemon

use tokio::signal::unix::{signal, Signal, SignalKind};
use tokio::sync::mpsc;
use vmhive_core::ShutdownSignal;

pub struct ShutdownSignals {
    power: Signal,
    terminate: Signal,
    interrupt: Signal,
    quit: Signal,
}

impl ShutdownSignals {
    pub fn install() -> std::io::Result<Self> {
        Ok(Self {
            power: signal(SignalKind::from_raw(nix::libc::SIGPWR))?,
            terminate: signal(SignalKind::terminate())?,
            interrupt: signal(SignalKind::interrupt())?,
            quit: signal(SignalKind::quit())?,
        })
    }

    /// Wait for the next stop signal
    pub async fn recv(&mut self) -> ShutdownSignal {
        tokio::select! {
            _ = self.power.recv() => ShutdownSignal::Power,
            _ = self.terminate.recv() => ShutdownSignal::Terminate,
            _ = self.interrupt.recv() => ShutdownSignal::Other("SIGINT".into()),
            _ = self.quit.recv() => ShutdownSignal::Other("SIGQUIT".into()),
        }
    }

    /// Deliver signals on a channel for as long as the receiver lives
    pub fn forward(mut self) -> mpsc::Receiver<ShutdownSignal> {
        let (tx, rx) = mpsc::channel(4);
        tokio::spawn(async move {
            loop {
                let signal = self.recv().await;
                if tx.send(signal).await.is_err() {
                    break;
                }
            }
        });
        rx
    }
}
