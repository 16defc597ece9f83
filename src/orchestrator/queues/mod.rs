use std::collections::VecDeque;
use std::fmt;
use std::sync::{Condvar, Mutex};
use std::time::Instant;

use crate::orchestrator::endpoints::{Endpoint, EndpointSet};
use crate::orchestrator::jobs::Job;

/// Returned by `push` once the queue is closed; hands the item back.
pub struct QueueClosed<T>(pub T);

impl<T> fmt::Debug for QueueClosed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("QueueClosed(..)")
    }
}

impl<T> fmt::Display for QueueClosed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "queue is closed and no longer accepts items")
    }
}

impl<T> std::error::Error for QueueClosed<T> {}

#[derive(Debug, PartialEq, Eq)]
pub enum Pop<T> {
    Item(T),
    TimedOut,
    Closed,
}

struct QueueState<T> {
    items: VecDeque<T>,
    closed: bool,
}

/// FIFO shared by classifier threads (producers) and one endpoint worker.
pub struct EndpointQueue<T> {
    state: Mutex<QueueState<T>>,
    available: Condvar,
}

impl<T> Default for EndpointQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> EndpointQueue<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                closed: false,
            }),
            available: Condvar::new(),
        }
    }

    /// Appends an item and returns the resulting depth.
    pub fn push(&self, item: T) -> Result<usize, QueueClosed<T>> {
        let mut state = self.state.lock().expect("endpoint queue mutex poisoned");
        if state.closed {
            return Err(QueueClosed(item));
        }
        state.items.push_back(item);
        let depth = state.items.len();
        drop(state);
        self.available.notify_one();
        Ok(depth)
    }

    /// Blocks until an item arrives, the queue closes, or `deadline` passes.
    pub fn pop_until(&self, deadline: Instant) -> Pop<T> {
        let mut state = self.state.lock().expect("endpoint queue mutex poisoned");
        loop {
            if state.closed {
                return Pop::Closed;
            }
            if let Some(item) = state.items.pop_front() {
                return Pop::Item(item);
            }

            let now = Instant::now();
            if now >= deadline {
                return Pop::TimedOut;
            }
            let (guard, _) = self
                .available
                .wait_timeout(state, deadline - now)
                .expect("endpoint queue mutex poisoned");
            state = guard;
        }
    }

    pub fn len(&self) -> usize {
        self.state
            .lock()
            .expect("endpoint queue mutex poisoned")
            .items
            .len()
    }

    pub fn close(&self) {
        self.state.lock().expect("endpoint queue mutex poisoned").closed = true;
        self.available.notify_all();
    }

    pub fn drain(&self) -> Vec<T> {
        self.state
            .lock()
            .expect("endpoint queue mutex poisoned")
            .items
            .drain(..)
            .collect()
    }
}

#[cfg(test)]
impl<T> EndpointQueue<T> {
    pub fn try_pop(&self) -> Option<T> {
        self.state
            .lock()
            .expect("endpoint queue mutex poisoned")
            .items
            .pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().expect("endpoint queue mutex poisoned").closed
    }
}

/// One job queue per endpoint, indexed by ordinal.
pub struct EndpointQueues {
    queues: Vec<EndpointQueue<Job>>,
}

impl EndpointQueues {
    pub fn for_endpoints(endpoints: &EndpointSet) -> Self {
        Self {
            queues: endpoints.iter().map(|_| EndpointQueue::new()).collect(),
        }
    }

    pub fn queue(&self, endpoint: &Endpoint) -> &EndpointQueue<Job> {
        &self.queues[endpoint.ordinal()]
    }

    pub fn depths(&self) -> Vec<usize> {
        self.queues.iter().map(EndpointQueue::len).collect()
    }

    pub fn close_all(&self) {
        for queue in &self.queues {
            queue.close();
        }
    }

    pub fn drain_all(&self) -> Vec<Job> {
        self.queues.iter().flat_map(EndpointQueue::drain).collect()
    }
}
