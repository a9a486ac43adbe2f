use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::store::{GatewayStore, UsageRow};

/// Fire-and-forget usage-log writer.
///
/// Requests enqueue onto a bounded channel; a dedicated task drains it
/// into the store. A full queue drops the record with a warning so that
/// logging never stalls a response.
#[derive(Clone)]
pub struct UsageSink {
    tx: mpsc::Sender<UsageRow>,
}

impl UsageSink {
    pub fn spawn(store: GatewayStore, capacity: usize) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<UsageRow>(capacity);
        let handle = tokio::spawn(async move {
            while let Some(row) = rx.recv().await {
                if let Err(err) = store.insert_usage(row).await {
                    warn!("usage log write failed: {err}");
                }
            }
        });
        (Self { tx }, handle)
    }

    pub fn record(&self, row: UsageRow) {
        if self.tx.try_send(row).is_err() {
            warn!("usage log queue full, dropping record");
        }
    }
}
