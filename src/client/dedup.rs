//! One idempotent inbox for events that can arrive twice: once from the live
//! feed and once from a catch-up fetch.

use std::collections::{HashSet, VecDeque};

use uuid::Uuid;

use crate::model::{Message, SignalingEnvelope};

pub trait Keyed {
    fn key(&self) -> Uuid;
}

impl Keyed for SignalingEnvelope {
    fn key(&self) -> Uuid {
        self.id
    }
}

impl Keyed for Message {
    fn key(&self) -> Uuid {
        self.id
    }
}

#[derive(Debug)]
pub struct EventQueue<T> {
    seen: HashSet<Uuid>,
    pending: VecDeque<T>,
}

impl<T> Default for EventQueue<T> {
    fn default() -> Self {
        Self {
            seen: HashSet::new(),
            pending: VecDeque::new(),
        }
    }
}

impl<T: Keyed> EventQueue<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues `item` unless its key was seen before. Returns whether it was queued.
    pub fn push(&mut self, item: T) -> bool {
        if !self.mark_seen(item.key()) {
            return false;
        }
        self.pending.push_back(item);
        true
    }

    /// Records a key without queueing anything, e.g. for locally produced events.
    pub fn mark_seen(&mut self, key: Uuid) -> bool {
        self.seen.insert(key)
    }

    pub fn pop(&mut self) -> Option<T> {
        self.pending.pop_front()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn clear(&mut self) {
        self.seen.clear();
        self.pending.clear();
    }
}
