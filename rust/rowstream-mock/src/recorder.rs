//! Bounded queue of inbound requests.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime};

use parking_lot::Mutex;
use tokio::sync::Notify;

const DEFAULT_RECORDER_CAPACITY: usize = 16;

/// Capacity used by [`Recorder::default`].
///
/// Overridden with `ROWSTREAM_RECORDER_CAPACITY`.
pub fn recorder_capacity() -> usize {
    rowstream_core::env_or("ROWSTREAM_RECORDER_CAPACITY", DEFAULT_RECORDER_CAPACITY)
}

/// Snapshot of one inbound call.
#[derive(Debug, Clone)]
pub struct RequestRecord<Req> {
    pub request: Req,
    /// Headers in the order the client sent them.
    pub metadata: Vec<(String, String)>,
    /// Deadline the client propagated, if any.
    pub deadline: Option<SystemTime>,
    pub received_at: Instant,
    pub received_wall: SystemTime,
}

impl<Req> RequestRecord<Req> {
    /// First value of header `name`.
    pub fn header<'a>(&'a self, name: &'a str) -> Option<&'a str> {
        self.headers(name).next()
    }

    /// Every value of header `name`, in arrival order.
    pub fn headers<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.metadata
            .iter()
            .filter(move |(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Time left until the propagated deadline when the call arrived.
    pub fn time_remaining(&self) -> Option<Duration> {
        let deadline = self.deadline?;
        Some(
            deadline
                .duration_since(self.received_wall)
                .unwrap_or(Duration::ZERO),
        )
    }
}

/// What a full [`Recorder`] does with a new record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverflowPolicy {
    /// Keep the queue as is and discard the new record.
    #[default]
    DropNewest,
    /// Evict the oldest queued record to make room.
    DropOldest,
}

struct RecorderInner<Req> {
    queue: Mutex<VecDeque<RequestRecord<Req>>>,
    capacity: usize,
    policy: OverflowPolicy,
    dropped: AtomicU64,
    notify: Notify,
}

/// Bounded multi-producer queue of [`RequestRecord`]s.
///
/// [`push`](Self::push) never blocks; records that do not fit are dropped per
/// the [`OverflowPolicy`] and counted in [`dropped`](Self::dropped).
pub struct Recorder<Req> {
    inner: Arc<RecorderInner<Req>>,
}

impl<Req> Clone for Recorder<Req> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<Req> Default for Recorder<Req> {
    fn default() -> Self {
        Self::new(recorder_capacity())
    }
}

impl<Req> std::fmt::Debug for Recorder<Req> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Recorder")
            .field("len", &self.len())
            .field("capacity", &self.inner.capacity)
            .field("policy", &self.inner.policy)
            .field("dropped", &self.dropped())
            .finish()
    }
}

impl<Req> Recorder<Req> {
    pub fn new(capacity: usize) -> Self {
        Self::with_policy(capacity, OverflowPolicy::default())
    }

    pub fn with_policy(capacity: usize, policy: OverflowPolicy) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Arc::new(RecorderInner {
                queue: Mutex::new(VecDeque::with_capacity(capacity)),
                capacity,
                policy,
                dropped: AtomicU64::new(0),
                notify: Notify::new(),
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    pub fn policy(&self) -> OverflowPolicy {
        self.inner.policy
    }

    /// Records lost to overflow so far.
    pub fn dropped(&self) -> u64 {
        self.inner.dropped.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.inner.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Queue a record without blocking.
    pub fn push(&self, record: RequestRecord<Req>) {
        {
            let mut queue = self.inner.queue.lock();
            if queue.len() >= self.inner.capacity {
                self.inner.dropped.fetch_add(1, Ordering::AcqRel);
                match self.inner.policy {
                    OverflowPolicy::DropNewest => {
                        tracing::warn!(
                            capacity = self.inner.capacity,
                            "recorder full; dropping newest record"
                        );
                        return;
                    }
                    OverflowPolicy::DropOldest => {
                        tracing::warn!(
                            capacity = self.inner.capacity,
                            "recorder full; dropping oldest record"
                        );
                        queue.pop_front();
                    }
                }
            }
            queue.push_back(record);
        }
        self.inner.notify.notify_one();
    }

    pub fn try_recv(&self) -> Option<RequestRecord<Req>> {
        self.inner.queue.lock().pop_front()
    }

    /// Wait for the next record.
    pub async fn recv(&self) -> RequestRecord<Req> {
        loop {
            if let Some(record) = self.try_recv() {
                return record;
            }
            self.inner.notify.notified().await;
        }
    }

    /// Wait up to `timeout` for the next record.
    pub async fn recv_timeout(&self, timeout: Duration) -> Option<RequestRecord<Req>> {
        tokio::time::timeout(timeout, self.recv()).await.ok()
    }

    /// Take every queued record.
    pub fn drain(&self) -> Vec<RequestRecord<Req>> {
        self.inner.queue.lock().drain(..).collect()
    }
}
