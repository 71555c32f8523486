// FPGA Memory-Mapped DMA Rust Bindings
// Copyright 2025 Henk-Jan Lebbink
// SPDX-License-Identifier: MIT

//! Request and completion queues between callers and a channel worker.
//!
//! These are the only structures a channel shares between threads. Both are
//! a mutex-protected deque with a condition variable for blocking waits.

use crate::error::{DmaError, DmaResult};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;

/// Item taken by a worker.
#[derive(Debug)]
pub enum WorkItem<T> {
    Job { id: u64, payload: T },
    /// Reserved sentinel: the worker exits when it dequeues this.
    Terminate,
}

struct RequestState<T> {
    items: VecDeque<WorkItem<T>>,
    /// Set once the terminate sentinel was queued.
    closed: bool,
}

/// Multi-producer queue of work for one worker.
pub struct RequestQueue<T> {
    state: Mutex<RequestState<T>>,
    ready: Condvar,
}

impl<T> Default for RequestQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> RequestQueue<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(RequestState {
                items: VecDeque::new(),
                closed: false,
            }),
            ready: Condvar::new(),
        }
    }

    /// Queue a job.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` once the queue has been terminated.
    pub fn push(&self, id: u64, payload: T) -> DmaResult<()> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(DmaError::InvalidParameter("channel is closing".into()));
        }
        state.items.push_back(WorkItem::Job { id, payload });
        self.ready.notify_one();
        Ok(())
    }

    /// Queue the terminate sentinel behind any pending jobs.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` if the sentinel was already queued.
    pub fn terminate(&self) -> DmaResult<()> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(DmaError::InvalidParameter("channel already closed".into()));
        }
        state.closed = true;
        state.items.push_back(WorkItem::Terminate);
        self.ready.notify_one();
        Ok(())
    }

    /// Block until an item is available and take it.
    pub fn pop(&self) -> WorkItem<T> {
        let mut state = self.state.lock();
        loop {
            if let Some(item) = state.items.pop_front() {
                return item;
            }
            self.ready.wait(&mut state);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Outcome of one job.
#[derive(Debug)]
pub struct Completion<R> {
    pub id: u64,
    pub result: R,
}

/// Completions keyed by job id, so several callers can share a worker.
pub struct CompletionQueue<R> {
    done: Mutex<VecDeque<Completion<R>>>,
    posted: Condvar,
}

impl<R> Default for CompletionQueue<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R> CompletionQueue<R> {
    pub fn new() -> Self {
        Self {
            done: Mutex::new(VecDeque::new()),
            posted: Condvar::new(),
        }
    }

    pub fn post(&self, id: u64, result: R) {
        self.done.lock().push_back(Completion { id, result });
        self.posted.notify_all();
    }

    /// Block until the completion for `id` is posted and take it.
    pub fn wait_for(&self, id: u64) -> R {
        let mut done = self.done.lock();
        loop {
            if let Some(pos) = done.iter().position(|c| c.id == id) {
                if let Some(c) = done.remove(pos) {
                    return c.result;
                }
            }
            self.posted.wait(&mut done);
        }
    }

    pub fn len(&self) -> usize {
        self.done.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
