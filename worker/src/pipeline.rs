//! Work queue between the relay session and the batch processors.
//!
//! ```text
//! session ──BatchJob──▶ [work queue] ──▶ N batch workers ──Outbound──▶ [outbound queue] ──▶ emitter
//! ```
//!
//! Batches never share mutable state, so with more than one worker results
//! may complete (and be emitted) in any order.

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use unblink_common::protocol::{FrameBatchEvent, ResultSummary};

use crate::batch::BatchProcessor;
use crate::credentials::Credentials;
use crate::emit::{self, Emitter};

/// A batch to process, with the credentials of the session that received it.
#[derive(Debug)]
pub struct BatchJob {
    pub event: FrameBatchEvent,
    pub credentials: Arc<Credentials>,
}

/// A finished result waiting for emission.
#[derive(Debug)]
pub struct Outbound {
    pub result: ResultSummary,
    pub credentials: Arc<Credentials>,
}

pub struct Pipeline {
    work_tx: mpsc::Sender<BatchJob>,
    workers: Vec<JoinHandle<()>>,
    emitter: JoinHandle<()>,
}

impl Pipeline {
    pub fn start(
        processor: Arc<BatchProcessor>,
        emitter: Emitter,
        workers: usize,
        capacity: usize,
    ) -> Pipeline {
        let (work_tx, work_rx) = mpsc::channel::<BatchJob>(capacity.max(1));
        let (out_tx, out_rx) = mpsc::channel::<Outbound>(capacity.max(1));
        let work_rx = Arc::new(Mutex::new(work_rx));

        let workers = (0..workers.max(1))
            .map(|n| {
                tokio::spawn(run_worker(
                    n,
                    Arc::clone(&work_rx),
                    Arc::clone(&processor),
                    out_tx.clone(),
                ))
            })
            .collect();
        drop(out_tx);

        let emitter = tokio::spawn(emit::handle_queue(out_rx, emitter));
        info!("Batch pipeline started");

        Pipeline {
            work_tx,
            workers,
            emitter,
        }
    }

    /// Producer side of the work queue.
    pub fn sender(&self) -> &mpsc::Sender<BatchJob> {
        &self.work_tx
    }

    /// Let queued batches finish, then wait for their results to be emitted.
    pub async fn shutdown(self) {
        drop(self.work_tx);
        for handle in self.workers {
            handle.await.ok();
        }
        self.emitter.await.ok();
        info!("Batch pipeline stopped");
    }
}

async fn run_worker(
    n: usize,
    work_rx: Arc<Mutex<mpsc::Receiver<BatchJob>>>,
    processor: Arc<BatchProcessor>,
    out_tx: mpsc::Sender<Outbound>,
) {
    loop {
        // Hold the lock only while waiting for the next job.
        let job = work_rx.lock().await.recv().await;
        let Some(BatchJob { event, credentials }) = job else {
            break;
        };

        if let Some(result) = processor.process_logged(&event, &credentials).await {
            if out_tx.send(Outbound { result, credentials }).await.is_err() {
                break;
            }
        }
    }
    debug!("Batch worker {n} finished");
}
