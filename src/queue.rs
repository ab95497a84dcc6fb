// src/queue.rs
//! Bounded-concurrency dispatch of inbound event bursts. Admission is FIFO;
//! a fixed number of workers run at once so one slow metadata fetch cannot
//! stall a whole batch. Completion order across workers is unordered; the
//! store re-imposes order per source.

use metrics::counter;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::cache::MetaCache;
use crate::model::InboundEvent;
use crate::store::MessageStore;

struct QueueState {
    backlog: VecDeque<InboundEvent>,
    active: usize,
}

pub struct DispatchQueue {
    inner: Arc<QueueInner>,
}

struct QueueInner {
    state: Mutex<QueueState>,
    limit: usize,
    cache: Arc<MetaCache>,
    store: Arc<MessageStore>,
}

impl DispatchQueue {
    pub fn new(limit: usize, cache: Arc<MetaCache>, store: Arc<MessageStore>) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                state: Mutex::new(QueueState {
                    backlog: VecDeque::new(),
                    active: 0,
                }),
                limit: limit.max(1),
                cache,
                store,
            }),
        }
    }

    /// Append all eligible events (self-originated are dropped here) and
    /// kick off draining. Never blocks on the workers.
    pub fn enqueue(&self, events: Vec<InboundEvent>) {
        let mut admitted = 0usize;
        {
            let mut state = self.inner.state.lock().expect("queue mutex poisoned");
            for event in events {
                if event.from_self {
                    counter!("queue_skipped_self_total").increment(1);
                    continue;
                }
                state.backlog.push_back(event);
                admitted += 1;
            }
        }
        counter!("queue_enqueued_total").increment(admitted as u64);
        Self::drain(&self.inner);
    }

    pub fn backlog_len(&self) -> usize {
        self.inner
            .state
            .lock()
            .expect("queue mutex poisoned")
            .backlog
            .len()
    }

    pub fn active(&self) -> usize {
        self.inner.state.lock().expect("queue mutex poisoned").active
    }

    /// Spawn workers while there is backlog and a free slot. Each worker
    /// releases its slot and re-drains when it finishes, so the pool refills
    /// itself until the backlog is empty.
    fn drain(inner: &Arc<QueueInner>) {
        loop {
            let event = {
                let mut state = inner.state.lock().expect("queue mutex poisoned");
                if state.active >= inner.limit {
                    return;
                }
                match state.backlog.pop_front() {
                    Some(ev) => {
                        state.active += 1;
                        ev
                    }
                    None => return,
                }
            };

            let inner = Arc::clone(inner);
            tokio::spawn(async move {
                Self::process(&inner, event).await;
                {
                    let mut state = inner.state.lock().expect("queue mutex poisoned");
                    state.active -= 1;
                }
                Self::drain(&inner);
            });
        }
    }

    /// One worker: resolve the source name, hand the event to the store. A
    /// failure only affects this event; the slot is released regardless.
    async fn process(inner: &QueueInner, event: InboundEvent) {
        let source_name = inner.cache.resolve(&event.source_id).await;
        let outcome = inner.store.add_message(&event, &source_name).await;
        if outcome.is_accepted() {
            counter!("queue_processed_total").increment(1);
        }
    }
}
