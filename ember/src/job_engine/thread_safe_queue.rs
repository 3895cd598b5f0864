// SPDX-License-Identifier: MIT

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use crate::sync;

/// Mutex-guarded FIFO.
///
/// Every operation holds the lock only for its own duration and none of them
/// waits for data: an empty queue is reported through `None` or [`is_empty`].
/// Blocking is left to whoever pairs the queue with a [`super::Signal`].
///
/// [`is_empty`]: ThreadSafeQueue::is_empty
#[derive(Debug)]
pub struct ThreadSafeQueue<T> {
    inner: Mutex<VecDeque<T>>,
}

impl<T> Default for ThreadSafeQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ThreadSafeQueue<T> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(VecDeque::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<T>> {
        sync::lock(&self.inner)
    }

    pub fn push(&self, value: T) {
        self.lock().push_back(value);
    }

    /// Removes and returns the oldest element.
    pub fn pop(&self) -> Option<T> {
        self.lock().pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Exchanges the contents of two queues.
    pub fn swap(&self, other: &ThreadSafeQueue<T>) {
        if std::ptr::eq(self, other) {
            return;
        }
        // lock in address order so that a.swap(b) racing b.swap(a) cannot deadlock
        let (first, second) = if (self as *const Self) < (other as *const Self) {
            (self, other)
        } else {
            (other, self)
        };
        let mut first = first.lock();
        let mut second = second.lock();
        std::mem::swap(&mut *first, &mut *second);
    }

    /// Takes every queued element, oldest first.
    pub fn drain(&self) -> Vec<T> {
        self.lock().drain(..).collect()
    }
}

impl<T: Clone> ThreadSafeQueue<T> {
    pub fn front(&self) -> Option<T> {
        self.lock().front().cloned()
    }

    pub fn back(&self) -> Option<T> {
        self.lock().back().cloned()
    }
}
