use tokio::sync::watch;

/// Sending half of the shutdown channel, held by whoever listens for termination signals.
#[derive(Debug, Clone)]
pub struct ShutdownTx(watch::Sender<bool>);

impl ShutdownTx {
    pub fn shutdown(&self) -> Result<(), watch::error::SendError<bool>> {
        self.0.send(true)
    }

    pub fn subscribe(&self) -> ShutdownRx {
        ShutdownRx(self.0.subscribe())
    }
}

/// Receiving half of the shutdown channel.
#[derive(Debug, Clone)]
pub struct ShutdownRx(watch::Receiver<bool>);

impl ShutdownRx {
    /// Returns `true` once a shutdown was requested.
    pub fn is_shutdown(&self) -> bool {
        *self.0.borrow()
    }

    /// Waits until a shutdown is requested. Never returns if every sender is dropped first.
    pub async fn wait(&mut self) {
        if self.0.wait_for(|shutdown| *shutdown).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

pub fn create_shutdown_channel() -> (ShutdownTx, ShutdownRx) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTx(tx), ShutdownRx(rx))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_observe_shutdown() {
        let (tx, rx) = create_shutdown_channel();
        let mut late = tx.subscribe();
        assert!(!rx.is_shutdown());

        tx.shutdown().unwrap();

        assert!(rx.is_shutdown());
        late.wait().await;
        assert!(late.is_shutdown());
    }
}
