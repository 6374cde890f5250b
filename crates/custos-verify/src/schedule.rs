//! Periodic background verification.
//!
//! `ScheduledVerifier` owns one worker thread that runs a full pass
//! immediately and then once per interval, keeping the most recent report.
//! Dropping the handle (or calling `shutdown`) stops the worker and joins it.

use std::{
    sync::{
        mpsc::{self, RecvTimeoutError, Sender},
        Arc, Mutex,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use tracing::{error, info, warn};

use custos_contracts::{
    error::{CustosError, CustosResult},
    verify::VerificationReport,
};

use crate::engine::ChainVerifier;

/// Handle to a running background verification schedule.
pub struct ScheduledVerifier {
    latest: Arc<Mutex<Option<VerificationReport>>>,
    stop: Option<Sender<()>>,
    worker: Option<JoinHandle<()>>,
}

impl ScheduledVerifier {
    /// Start verifying the whole chain every `interval`.
    pub fn start(verifier: Arc<ChainVerifier>, interval: Duration) -> CustosResult<Self> {
        let latest = Arc::new(Mutex::new(None));
        let (stop_tx, stop_rx) = mpsc::channel::<()>();

        let slot = Arc::clone(&latest);
        let worker = thread::Builder::new()
            .name("custos-verifier".to_string())
            .spawn(move || loop {
                match verifier.verify(None, None) {
                    Ok(report) => {
                        if !report.valid {
                            warn!(
                                first_failure_sequence = ?report.first_failure_sequence,
                                "scheduled verification found an integrity failure"
                            );
                        }
                        match slot.lock() {
                            Ok(mut guard) => *guard = Some(report),
                            Err(e) => {
                                error!(error = %e, "verification report slot poisoned");
                                return;
                            }
                        }
                    }
                    Err(e) => error!(error = %e, "scheduled verification could not run"),
                }

                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => continue,
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => return,
                }
            })
            .map_err(|e| CustosError::Storage {
                reason: format!("failed to spawn verifier thread: {e}"),
            })?;

        info!(interval_secs = interval.as_secs_f64(), "scheduled verification started");

        Ok(Self {
            latest,
            stop: Some(stop_tx),
            worker: Some(worker),
        })
    }

    /// The report from the most recently completed pass.
    pub fn latest(&self) -> Option<VerificationReport> {
        self.latest.lock().ok().and_then(|guard| guard.clone())
    }

    /// Stop the worker and wait for it to exit.
    pub fn shutdown(mut self) {
        self.stop_worker();
    }

    fn stop_worker(&mut self) {
        if let Some(stop) = self.stop.take() {
            // The worker may already have exited; nothing to signal then.
            let _ = stop.send(());
        }
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("verifier thread panicked");
            }
        }
    }
}

impl Drop for ScheduledVerifier {
    fn drop(&mut self) {
        self.stop_worker();
    }
}
