//! Bounded job queue between the scheduler and the workers.
//!
//! With a positive capacity the queue buffers up to that many jobs. With
//! capacity zero every send is a rendezvous: [`JobSender::send`] returns only
//! once a worker has taken the job off the queue.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, Mutex};

use crate::job::Job;

struct Envelope {
    job: Job,
    ack: Option<oneshot::Sender<()>>,
}

/// Create a queue holding at most `capacity` undelivered jobs.
pub fn job_queue(capacity: usize) -> (JobSender, JobReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        JobSender {
            tx,
            rendezvous: capacity == 0,
        },
        JobReceiver {
            rx: Arc::new(Mutex::new(rx)),
        },
    )
}

/// Producer half of the job queue.
///
/// The queue closes once every sender has been dropped.
#[derive(Clone)]
pub struct JobSender {
    tx: mpsc::Sender<Envelope>,
    rendezvous: bool,
}

impl JobSender {
    /// Enqueue a job, waiting for space (or for a taker at capacity zero).
    ///
    /// Returns the job back if every receiver is gone.
    pub async fn send(&self, job: Job) -> Result<(), Job> {
        if !self.rendezvous {
            return self
                .tx
                .send(Envelope { job, ack: None })
                .await
                .map_err(|e| e.0.job);
        }

        let (ack_tx, ack_rx) = oneshot::channel();
        self.tx
            .send(Envelope {
                job,
                ack: Some(ack_tx),
            })
            .await
            .map_err(|e| e.0.job)?;
        // The ack is only dropped when every receiver goes away with the job
        // still queued; that job is lost with the queue and never ran.
        let _ = ack_rx.await;
        Ok(())
    }

    /// True once every receiver has been dropped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Consumer half of the job queue, shared by every worker.
#[derive(Clone)]
pub struct JobReceiver {
    rx: Arc<Mutex<mpsc::Receiver<Envelope>>>,
}

impl JobReceiver {
    /// Take the next job, or `None` once the queue is closed and drained.
    ///
    /// Cancel safe: a job is only removed from the queue when this future
    /// completes.
    pub async fn recv(&self) -> Option<Job> {
        let envelope = self.rx.lock().await.recv().await?;
        if let Some(ack) = envelope.ack {
            let _ = ack.send(());
        }
        Some(envelope.job)
    }
}
