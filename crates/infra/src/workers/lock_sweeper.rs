use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{debug, warn};

use crate::lock_store::LockStore;

use super::WorkerHandle;

const TICK: Duration = Duration::from_millis(250);

/// Periodically drops expired counter leases.
///
/// Expiry is already enforced lazily on every read, so the sweeper only keeps
/// the store from accumulating dead rows.
#[derive(Debug)]
pub struct LockSweeper;

impl LockSweeper {
    pub fn spawn(locks: Arc<dyn LockStore>, interval: Duration) -> std::io::Result<WorkerHandle> {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let join = thread::Builder::new()
            .name("rxstock-lock-sweeper".to_string())
            .spawn(move || sweep_loop(locks.as_ref(), interval, &shutdown_rx))?;
        Ok(WorkerHandle::new(shutdown_tx, join))
    }
}

fn sweep_loop(locks: &dyn LockStore, interval: Duration, shutdown_rx: &mpsc::Receiver<()>) {
    let mut last = Instant::now();

    loop {
        match shutdown_rx.recv_timeout(TICK) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {}
        }
        if last.elapsed() < interval {
            continue;
        }
        last = Instant::now();

        match locks.sweep_expired(Utc::now()) {
            Ok(0) => {}
            Ok(removed) => debug!(removed, "expired counter leases swept"),
            Err(err) => warn!(error = %err, "lock sweep failed"),
        }
    }
}
