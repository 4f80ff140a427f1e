use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// A fetched (or re-adopted) asset waiting for the consumer to pick it up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionRecord<T> {
    pub key: String,
    pub path: PathBuf,
    /// Token handed to `load`, returned untouched.
    pub requester: T,
}

/// Thread-safe FIFO between the fetch worker and the consumer.
///
/// The worker only pushes; the consumer only pops, one record per lock
/// acquisition, so a slow consumer callback never holds the lock.
#[derive(Debug)]
pub struct CompletionBuffer<T> {
    records: Mutex<VecDeque<CompletionRecord<T>>>,
}

impl<T> Default for CompletionBuffer<T> {
    fn default() -> Self {
        Self {
            records: Mutex::new(VecDeque::new()),
        }
    }
}

impl<T> CompletionBuffer<T> {
    pub fn new() -> Self {
        Self::default()
    }

    fn records(&self) -> MutexGuard<'_, VecDeque<CompletionRecord<T>>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push(&self, record: CompletionRecord<T>) {
        self.records().push_back(record);
    }

    pub fn pop(&self) -> Option<CompletionRecord<T>> {
        self.records().pop_front()
    }

    pub fn len(&self) -> usize {
        self.records().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records().is_empty()
    }
}
