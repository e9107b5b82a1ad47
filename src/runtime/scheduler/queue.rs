//! Shared queue and running registry.
//!
//! Neither type locks on its own: both live inside [`FifoState`], which the
//! scheduler guards with a single mutex so push, pop, registry updates and
//! inspection are serialized against each other.

use std::collections::VecDeque;

use indexmap::IndexMap;

use super::node::{TaskId, TaskNode};

/// FIFO sequence of pending task nodes.
#[derive(Debug, Default)]
pub struct FifoQueue {
    nodes: VecDeque<TaskNode>,
}

impl FifoQueue {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a node at the back.
    #[inline]
    pub fn push(
        &mut self,
        node: TaskNode,
    ) {
        self.nodes.push_back(node);
    }

    /// Remove and return the front node.
    #[inline]
    pub fn pop(&mut self) -> Option<TaskNode> {
        self.nodes.pop_front()
    }

    #[inline]
    pub fn peek(&self) -> Option<&TaskNode> {
        self.nodes.front()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Iterate in dequeue order.
    pub fn iter(&self) -> impl Iterator<Item = &TaskNode> {
        self.nodes.iter()
    }
}

/// Snapshots of the tasks currently executing, keyed by task id.
///
/// Iteration follows dequeue order.
#[derive(Debug, Default)]
pub struct RunningRegistry {
    entries: IndexMap<TaskId, String>,
}

impl RunningRegistry {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(
        &mut self,
        id: TaskId,
        snapshot: String,
    ) {
        self.entries.insert(id, snapshot);
    }

    pub fn remove(
        &mut self,
        id: &TaskId,
    ) -> Option<String> {
        self.entries.shift_remove(id)
    }

    #[inline]
    pub fn contains(
        &self,
        id: &TaskId,
    ) -> bool {
        self.entries.contains_key(id)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Copy of every snapshot string.
    pub fn snapshots(&self) -> Vec<String> {
        self.entries.values().cloned().collect()
    }
}

/// Queue and registry, always accessed together under one lock.
#[derive(Debug, Default)]
pub struct FifoState {
    pub queue: FifoQueue,
    pub running: RunningRegistry,
}

impl FifoState {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Pop the front node and record it as running before handing it out.
    pub fn dequeue(&mut self) -> Option<TaskNode> {
        let node = self.queue.pop()?;
        self.running.insert(node.id(), node.describe());
        Some(node)
    }

    /// Forget a node once its execution has ended.
    #[inline]
    pub fn finish(
        &mut self,
        id: &TaskId,
    ) -> Option<String> {
        self.running.remove(id)
    }
}
