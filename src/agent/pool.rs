//! Role Pool - FIFO queue of agent indexes for one role
//!
//! The front entry is the agent currently active (or next to activate);
//! entries behind it are waiting. Retired agents are popped and never
//! re-inserted.

use std::collections::VecDeque;

use crate::config::Role;

#[derive(Debug, Clone)]
pub struct RolePool {
    role: Role,
    queue: VecDeque<usize>,
}

impl RolePool {
    pub fn new(role: Role) -> Self {
        Self {
            role,
            queue: VecDeque::new(),
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Append an agent index. Returns false (and leaves the pool unchanged)
    /// if the index is already queued.
    pub fn push_back(&mut self, index: usize) -> bool {
        if self.queue.contains(&index) {
            return false;
        }
        self.queue.push_back(index);
        true
    }

    /// Remove and return the front entry, `None` when empty
    pub fn pop_front(&mut self) -> Option<usize> {
        self.queue.pop_front()
    }

    /// Remove `index` wherever it sits. Returns false if it wasn't queued.
    pub fn remove(&mut self, index: usize) -> bool {
        match self.queue.iter().position(|&queued| queued == index) {
            Some(position) => self.queue.remove(position).is_some(),
            None => false,
        }
    }

    pub fn front(&self) -> Option<usize> {
        self.queue.front().copied()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn contains(&self, index: usize) -> bool {
        self.queue.contains(&index)
    }

    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.queue.iter().copied()
    }
}
