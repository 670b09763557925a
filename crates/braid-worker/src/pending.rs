//! The ordered commit queue.
//!
//! Confirmed rounds are appended here and a single writer loop drains them
//! onto the chain in insertion order. The first write error latches the
//! queue: no further round is accepted or written, everything queued is
//! rolled back, and only once the queue is empty does the error clear and
//! mining resume.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use braid_mempool::TxSource;
use braid_storage::ChainWriter;
use braid_types::Header;
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::work::Work;

/// Queue of confirmed rounds awaiting commit.
pub struct WorkPending {
    queue: Mutex<VecDeque<Work>>,
    /// Header of the round currently being written, still visible to
    /// [`top_header`](Self::top_header) so the round loop keeps building
    /// on it.
    inflight: Mutex<Option<Header>>,
    errored: AtomicBool,
}

impl Default for WorkPending {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkPending {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            inflight: Mutex::new(None),
            errored: AtomicBool::new(false),
        }
    }

    pub fn have_err(&self) -> bool {
        self.errored.load(Ordering::SeqCst)
    }

    /// Append a confirmed round. Refused while the queue is errored (the
    /// round is handed back); this is the sole gate that can reject a
    /// confirmed round.
    pub fn add(&self, work: Work) -> Result<(), Work> {
        let mut queue = self.queue.lock();
        if self.have_err() {
            return Err(work);
        }
        queue.push_back(work);
        Ok(())
    }

    /// Header of the newest queued (or in-flight) round, the parent the
    /// next round should build on. Taken from the sealed block, whose
    /// header carries the derived roots the work header does not.
    pub fn top_header(&self) -> Option<Header> {
        let queue = self.queue.lock();
        if let Some(work) = queue.back() {
            return Some(committed_header(work));
        }
        drop(queue);
        self.inflight.lock().clone()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty() && self.inflight.lock().is_none()
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    /// Clear the error latch. Only legal once the queue has drained.
    pub fn set_no_error(&self) -> bool {
        if !self.is_empty() {
            return false;
        }
        self.errored.store(false, Ordering::SeqCst);
        true
    }

    fn take_head(&self) -> Option<Work> {
        let mut queue = self.queue.lock();
        let work = queue.pop_front()?;
        *self.inflight.lock() = Some(committed_header(&work));
        Some(work)
    }

    fn finish_head(&self) {
        *self.inflight.lock() = None;
    }

    /// The writer loop: every tick, commit queued rounds in order for up
    /// to the configured budget. On a write error, latch and roll back
    /// everything still queued.
    pub async fn run(
        self: Arc<Self>,
        chain: Arc<dyn ChainWriter>,
        tx_source: Arc<dyn TxSource>,
        mut cancel: watch::Receiver<bool>,
        tick: Duration,
        budget: Duration,
    ) {
        let mut ticker = tokio::time::interval(tick);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = ticker.tick() => self.drain_once(&*chain, &*tx_source, budget),
                _ = cancel.changed() => break,
            }
        }
    }

    fn drain_once(&self, chain: &dyn ChainWriter, tx_source: &dyn TxSource, budget: Duration) {
        if self.have_err() {
            while let Some(work) = self.take_head() {
                debug!(number = work.header.number, "rolling back queued round");
                tx_source.work_ended(work.id, work.header.number, false);
                self.finish_head();
            }
            return;
        }
        let start = Instant::now();
        while !self.have_err() {
            if start.elapsed() > budget {
                break;
            }
            let Some(work) = self.take_head() else {
                break;
            };
            match &work.block {
                Some(block) => match chain.write_block_and_state(block, &work.receipts, &work.state)
                {
                    Ok(()) => {
                        info!(
                            number = block.number(),
                            hash = %hex::encode(block.hash()),
                            txs = block.transactions().len(),
                            "block committed"
                        );
                        tx_source.work_ended(work.id, work.header.number, true);
                    }
                    Err(err) => {
                        error!(number = block.number(), %err, "chain write failed");
                        self.errored.store(true, Ordering::SeqCst);
                        tx_source.work_ended(work.id, work.header.number, false);
                    }
                },
                None => {
                    // A confirmed round without a generated block cannot be
                    // committed; treat like a failed write.
                    error!(number = work.header.number, "confirmed round missing its block");
                    self.errored.store(true, Ordering::SeqCst);
                    tx_source.work_ended(work.id, work.header.number, false);
                }
            }
            self.finish_head();
        }
    }
}

fn committed_header(work: &Work) -> Header {
    work.block
        .as_ref()
        .map(|block| block.header.clone())
        .unwrap_or_else(|| work.header.clone())
}
