//! Soft pause and flush: hold emissions while a gate is closed and release
//! them in order when it reopens.

use std::collections::VecDeque;

/// What [`PauseGate::push`] did with an item.
#[derive(Debug, PartialEq, Eq)]
pub enum Pushed<T> {
    /// The gate is open; emit the item now.
    Emit(T),
    Queued,
    /// The queue is full. The item is handed back and nothing was queued.
    Overflow(T),
}

/// A bounded ordered queue behind an open/closed flag.
///
/// Every emission for one consumer goes through [`push`](Self::push), which
/// is the single point that decides between sending and queueing.
#[derive(Debug)]
pub struct PauseGate<T> {
    queue: VecDeque<T>,
    capacity: usize,
    paused: bool,
}

impl<T> PauseGate<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: VecDeque::new(),
            capacity,
            paused: false,
        }
    }

    pub fn paused(capacity: usize) -> Self {
        let mut gate = Self::new(capacity);
        gate.pause();
        gate
    }

    pub fn pause(&mut self) {
        self.paused = true;
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn push(&mut self, item: T) -> Pushed<T> {
        if !self.paused {
            return Pushed::Emit(item);
        }
        if self.queue.len() >= self.capacity {
            return Pushed::Overflow(item);
        }
        self.queue.push_back(item);
        Pushed::Queued
    }

    /// Reopen the gate and return everything queued, oldest first.
    pub fn resume(&mut self) -> Vec<T> {
        self.paused = false;
        self.queue.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}
