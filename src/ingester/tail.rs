//! Live tailing
//!
//! A tailer subscribes to a tenant's pushes with a selector. Accepted entries
//! of matching streams are forwarded over a bounded channel; a subscriber that
//! falls behind loses entries instead of slowing down pushes.

use crate::query::{matches_all, Matcher};
use crate::storage::{Entry, LabelSet, LogStream};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Subscriber-side state shared with the tenant instance
#[derive(Debug)]
pub struct Tailer {
    id: Uuid,
    matchers: Vec<Matcher>,
    sender: mpsc::Sender<LogStream>,
    dropped: AtomicU64,
}

impl Tailer {
    pub(crate) fn new(matchers: Vec<Matcher>, buffer: usize) -> (Arc<Self>, mpsc::Receiver<LogStream>) {
        let (sender, receiver) = mpsc::channel(buffer.max(1));
        let tailer = Arc::new(Self {
            id: Uuid::new_v4(),
            matchers,
            sender,
            dropped: AtomicU64::new(0),
        });
        (tailer, receiver)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Entries lost because the subscriber was not keeping up
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    pub fn matches(&self, labels: &LabelSet) -> bool {
        matches_all(&self.matchers, labels)
    }

    /// Forward entries without waiting. Returns false once the subscriber is gone.
    pub(crate) fn send(&self, labels: &str, entries: &[Entry]) -> bool {
        if entries.is_empty() {
            return !self.is_closed();
        }
        match self
            .sender
            .try_send(LogStream::new(labels, entries.to_vec()))
        {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.dropped
                    .fetch_add(entries.len() as u64, Ordering::Relaxed);
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }
}

/// Handle returned to the subscriber
///
/// Dropping it ends the subscription; the tenant forgets the tailer on its
/// next push.
#[derive(Debug)]
pub struct TailSubscription {
    tailer: Arc<Tailer>,
    receiver: mpsc::Receiver<LogStream>,
}

impl TailSubscription {
    pub(crate) fn new(tailer: Arc<Tailer>, receiver: mpsc::Receiver<LogStream>) -> Self {
        Self { tailer, receiver }
    }

    pub fn id(&self) -> Uuid {
        self.tailer.id()
    }

    /// Next batch of entries for one stream; `None` after shutdown
    pub async fn recv(&mut self) -> Option<LogStream> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<LogStream> {
        self.receiver.try_recv().ok()
    }

    pub fn dropped(&self) -> u64 {
        self.tailer.dropped()
    }
}
