//! Lossy single-slot event channels delivered to the embedder
//!
//! Listening on any of the channels is optional. Every channel has capacity
//! one and is written with a non-blocking send: if the consumer has not
//! drained the previous event, the newer event of that kind is dropped.
//! This keeps the SDK's internal loops from ever stalling on an absent
//! consumer.

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

use crate::config::Config;
use crate::error::SdkError;

pub(crate) struct EventChannels {
    allocated_tx: mpsc::Sender<String>,
    deallocated_tx: mpsc::Sender<String>,
    config_tx: mpsc::Sender<Config>,
    error_tx: mpsc::Sender<SdkError>,

    allocated_rx: Mutex<Option<mpsc::Receiver<String>>>,
    deallocated_rx: Mutex<Option<mpsc::Receiver<String>>>,
    config_rx: Mutex<Option<mpsc::Receiver<Config>>>,
    error_rx: Mutex<Option<mpsc::Receiver<SdkError>>>,
}

impl EventChannels {
    pub fn new() -> Self {
        let (allocated_tx, allocated_rx) = mpsc::channel(1);
        let (deallocated_tx, deallocated_rx) = mpsc::channel(1);
        let (config_tx, config_rx) = mpsc::channel(1);
        let (error_tx, error_rx) = mpsc::channel(1);

        Self {
            allocated_tx,
            deallocated_tx,
            config_tx,
            error_tx,
            allocated_rx: Mutex::new(Some(allocated_rx)),
            deallocated_rx: Mutex::new(Some(deallocated_rx)),
            config_rx: Mutex::new(Some(config_rx)),
            error_rx: Mutex::new(Some(error_rx)),
        }
    }

    pub fn push_allocated(&self, allocation_id: String) {
        if self.allocated_tx.try_send(allocation_id).is_err() {
            debug!("allocation event dropped, consumer has not drained");
        }
    }

    pub fn push_deallocated(&self, allocation_id: String) {
        if self.deallocated_tx.try_send(allocation_id).is_err() {
            debug!("deallocation event dropped, consumer has not drained");
        }
    }

    pub fn push_config(&self, config: Config) {
        if self.config_tx.try_send(config).is_err() {
            debug!("configuration event dropped, consumer has not drained");
        }
    }

    pub fn push_error(&self, err: SdkError) {
        if self.error_tx.try_send(err).is_err() {
            debug!("error event dropped, consumer has not drained");
        }
    }

    pub fn take_allocated(&self) -> Option<mpsc::Receiver<String>> {
        self.allocated_rx.lock().take()
    }

    pub fn take_deallocated(&self) -> Option<mpsc::Receiver<String>> {
        self.deallocated_rx.lock().take()
    }

    pub fn take_config(&self) -> Option<mpsc::Receiver<Config>> {
        self.config_rx.lock().take()
    }

    pub fn take_errors(&self) -> Option<mpsc::Receiver<SdkError>> {
        self.error_rx.lock().take()
    }
}
