// Latency-compensated notification dispatcher
//
// All listener notifications run on the dispatcher thread. A job is run when its
// delay (the output latency) has elapsed. cancel_pending() drops every job
// submitted before the call.

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};
use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, error};

pub type Job = Box<dyn FnOnce() + Send>;

enum DispatchMsg {
    Run { due: Instant, epoch: u64, job: Job },
    Shutdown,
}

struct Pending {
    due: Instant,
    seq: u64,
    epoch: u64,
    job: Job,
}

impl PartialEq for Pending {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl Eq for Pending {}

impl PartialOrd for Pending {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Pending {
    // Reversed: BinaryHeap is a max-heap, the earliest job must come first
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other
            .due
            .cmp(&self.due)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

pub struct NotificationDispatcher {
    tx: Sender<DispatchMsg>,
    epoch: Arc<AtomicU64>,
}

impl NotificationDispatcher {
    pub fn new() -> std::io::Result<Self> {
        let (tx, rx) = unbounded();
        let epoch = Arc::new(AtomicU64::new(0));
        let thread_epoch = Arc::clone(&epoch);
        std::thread::Builder::new()
            .name("playback-notifications".to_string())
            .spawn(move || run(rx, thread_epoch))?;
        Ok(Self { tx, epoch })
    }

    /// Run `job` on the dispatcher thread after `delay`
    pub fn submit(&self, delay: Duration, job: Job) {
        let msg = DispatchMsg::Run {
            due: Instant::now() + delay,
            epoch: self.epoch.load(Ordering::Acquire),
            job,
        };
        if self.tx.send(msg).is_err() {
            error!("Notification dispatcher is gone, notification dropped");
        }
    }

    /// Drop all jobs not run yet
    pub fn cancel_pending(&self) {
        self.epoch.fetch_add(1, Ordering::AcqRel);
    }
}

impl Drop for NotificationDispatcher {
    fn drop(&mut self) {
        let _ = self.tx.send(DispatchMsg::Shutdown);
    }
}

fn run(rx: Receiver<DispatchMsg>, epoch: Arc<AtomicU64>) {
    let mut pending: BinaryHeap<Pending> = BinaryHeap::new();
    let mut seq = 0u64;

    loop {
        let msg = match pending.peek() {
            Some(next) => {
                let timeout = next.due.saturating_duration_since(Instant::now());
                match rx.recv_timeout(timeout) {
                    Ok(msg) => Some(msg),
                    Err(RecvTimeoutError::Timeout) => None,
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            None => match rx.recv() {
                Ok(msg) => Some(msg),
                Err(_) => break,
            },
        };

        match msg {
            Some(DispatchMsg::Run { due, epoch, job }) => {
                seq += 1;
                pending.push(Pending { due, seq, epoch, job });
            }
            Some(DispatchMsg::Shutdown) => break,
            None => {}
        }

        let now = Instant::now();
        let current = epoch.load(Ordering::Acquire);
        while pending.peek().is_some_and(|p| p.due <= now) {
            let Some(job) = pending.pop() else {
                break;
            };
            if job.epoch == current {
                (job.job)();
            }
        }
        pending.retain(|p| p.epoch == current);
    }
    debug!("Notification dispatcher stopped");
}
