// src/queue.rs - FIFO queue with index-addressable reordering
//
// A plain channel cannot support swap/move/insert/pop without breaking a
// suspended consumer, so the authoritative order lives in a VecDeque behind a
// mutex and `get` re-checks it in a Notify loop. A consumer that already left
// `get` with an item is unaffected by later reordering, and a blocked consumer
// always receives whatever occupies position 0 when it wakes.
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;
use tokio::sync::Notify;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("index {index} out of bounds for queue of length {len}")]
    OutOfBounds { index: isize, len: usize },
}

#[derive(Debug, Default)]
pub struct ReorderableQueue<T> {
    items: Mutex<VecDeque<T>>,
    available: Notify,
}

impl<T> ReorderableQueue<T> {
    pub fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            available: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<T>> {
        self.items.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Append an item. Never blocks; immediately visible to `get`.
    pub fn put(&self, item: T) {
        self.lock().push_back(item);
        self.available.notify_one();
    }

    /// Remove and return the item at position 0, waiting until one exists.
    pub async fn get(&self) -> T {
        loop {
            // Register interest before checking, so a put racing with the
            // check cannot be missed.
            let notified = self.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if let Some(item) = self.lock().pop_front() {
                return item;
            }
            notified.await;
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Snapshot of the current contents in order; does not consume.
    pub fn list(&self) -> Vec<T>
    where
        T: Clone,
    {
        self.lock().iter().cloned().collect()
    }

    /// Exchange the items at two indices. Negative indices count from the
    /// end, `-1` being the last element.
    pub fn swap(&self, a: isize, b: isize) -> Result<(), QueueError> {
        let mut items = self.lock();
        let len = items.len();
        let a = resolve(a, len)?;
        let b = resolve(b, len)?;
        if a != b {
            items.swap(a, b);
        }
        Ok(())
    }

    /// Relocate the item at `from` to position `to`, shifting the items in
    /// between. Not equivalent to `swap` for non-adjacent indices.
    pub fn move_item(&self, from: isize, to: isize) -> Result<(), QueueError> {
        let mut items = self.lock();
        let len = items.len();
        let from = resolve(from, len)?;
        let to = resolve(to, len)?;
        if from != to {
            if let Some(item) = items.remove(from) {
                items.insert(to, item);
            }
        }
        Ok(())
    }

    /// Insert at an arbitrary position; `index` may be one past the end.
    pub fn insert(&self, index: isize, item: T) -> Result<(), QueueError> {
        let mut items = self.lock();
        let len = items.len();
        let index = resolve_insert(index, len)?;
        items.insert(index, item);
        drop(items);
        self.available.notify_one();
        Ok(())
    }

    /// Remove and return the item at `index` (`-1` for the last element).
    pub fn pop(&self, index: isize) -> Result<T, QueueError> {
        let mut items = self.lock();
        let len = items.len();
        let resolved = resolve(index, len)?;
        items
            .remove(resolved)
            .ok_or(QueueError::OutOfBounds { index, len })
    }

    /// Index of the first item matching the predicate.
    pub fn index_where(&self, mut pred: impl FnMut(&T) -> bool) -> Option<usize> {
        self.lock().iter().position(|item| pred(item))
    }

    /// Remove and return the first item matching the predicate.
    pub fn remove_where(&self, mut pred: impl FnMut(&T) -> bool) -> Option<T> {
        let mut items = self.lock();
        let index = items.iter().position(|item| pred(item))?;
        items.remove(index)
    }
}

/// Normalize an index into `[0, len - 1]`, accepting negatives from the end.
fn resolve(index: isize, len: usize) -> Result<usize, QueueError> {
    let out_of_bounds = QueueError::OutOfBounds { index, len };
    let normalized = if index < 0 {
        index + len as isize
    } else {
        index
    };
    if normalized < 0 || normalized >= len as isize {
        return Err(out_of_bounds);
    }
    Ok(normalized as usize)
}

/// Insertion bounds are one wider: `len` appends.
fn resolve_insert(index: isize, len: usize) -> Result<usize, QueueError> {
    let out_of_bounds = QueueError::OutOfBounds { index, len };
    let normalized = if index < 0 {
        index + len as isize
    } else {
        index
    };
    if normalized < 0 || normalized > len as isize {
        return Err(out_of_bounds);
    }
    Ok(normalized as usize)
}
