//! Recency list
//!
//! Doubly linked list stored in a slab so nodes can be unlinked or moved to
//! the front in O(1) given their handle. Front is most recent, back is the
//! next eviction candidate.

/// Handle to a node in a [`RecencyList`]
///
/// Valid until the node is removed; the slot may be reused afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeHandle(usize);

struct Node<T> {
    value: T,
    prev: Option<usize>,
    next: Option<usize>,
}

/// Access-ordered list with O(1) unlink-by-handle
pub struct RecencyList<T> {
    nodes: Vec<Option<Node<T>>>,
    head: Option<usize>,
    tail: Option<usize>,
    free_list: Vec<usize>,
    len: usize,
}

impl<T> Default for RecencyList<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> RecencyList<T> {
    /// Create an empty list
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            head: None,
            tail: None,
            free_list: Vec::new(),
            len: 0,
        }
    }

    /// Insert a value as most recent
    pub fn push_front(&mut self, value: T) -> NodeHandle {
        let idx = self.alloc_node();
        self.nodes[idx] = Some(Node {
            value,
            prev: None,
            next: self.head,
        });

        if let Some(head_idx) = self.head {
            if let Some(head) = &mut self.nodes[head_idx] {
                head.prev = Some(idx);
            }
        }

        self.head = Some(idx);
        if self.tail.is_none() {
            self.tail = Some(idx);
        }

        self.len += 1;
        NodeHandle(idx)
    }

    /// Make the node most recent
    pub fn move_to_front(&mut self, handle: NodeHandle) {
        let idx = handle.0;
        if self.head == Some(idx) || !self.is_live(idx) {
            return;
        }

        self.unlink(idx);

        if let Some(node) = &mut self.nodes[idx] {
            node.prev = None;
            node.next = self.head;
        }

        if let Some(head_idx) = self.head {
            if let Some(head) = &mut self.nodes[head_idx] {
                head.prev = Some(idx);
            }
        }

        self.head = Some(idx);
        if self.tail.is_none() {
            self.tail = Some(idx);
        }
    }

    /// Unlink a node and return its value
    pub fn remove(&mut self, handle: NodeHandle) -> Option<T> {
        let idx = handle.0;
        if !self.is_live(idx) {
            return None;
        }

        self.unlink(idx);
        self.free_list.push(idx);
        self.len -= 1;
        self.nodes[idx].take().map(|node| node.value)
    }

    /// Remove the least recent value
    pub fn pop_back(&mut self) -> Option<T> {
        let tail = self.tail?;
        self.remove(NodeHandle(tail))
    }

    /// Handle of the most recent node
    pub fn front(&self) -> Option<NodeHandle> {
        self.head.map(NodeHandle)
    }

    /// Handle of the least recent node
    pub fn back(&self) -> Option<NodeHandle> {
        self.tail.map(NodeHandle)
    }

    /// Borrow the value behind a handle
    pub fn get(&self, handle: NodeHandle) -> Option<&T> {
        self.nodes
            .get(handle.0)
            .and_then(|slot| slot.as_ref())
            .map(|node| &node.value)
    }

    /// Mutably borrow the value behind a handle
    pub fn get_mut(&mut self, handle: NodeHandle) -> Option<&mut T> {
        self.nodes
            .get_mut(handle.0)
            .and_then(|slot| slot.as_mut())
            .map(|node| &mut node.value)
    }

    /// Number of linked nodes
    pub fn len(&self) -> usize {
        self.len
    }

    /// Check if the list is empty
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Remove every node, most recent first
    pub fn drain(&mut self) -> Vec<T> {
        let mut values = Vec::with_capacity(self.len);
        let mut cursor = self.head;
        while let Some(idx) = cursor {
            match self.nodes[idx].take() {
                Some(node) => {
                    cursor = node.next;
                    values.push(node.value);
                }
                None => break,
            }
        }
        self.clear();
        values
    }

    /// Clear the list
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.free_list.clear();
        self.head = None;
        self.tail = None;
        self.len = 0;
    }

    /// Iterate from most recent to least recent
    pub fn iter(&self) -> Iter<'_, T> {
        Iter {
            list: self,
            cursor: self.head,
        }
    }

    fn is_live(&self, idx: usize) -> bool {
        matches!(self.nodes.get(idx), Some(Some(_)))
    }

    fn unlink(&mut self, idx: usize) {
        let (prev, next) = if let Some(node) = &self.nodes[idx] {
            (node.prev, node.next)
        } else {
            return;
        };

        match prev {
            Some(prev_idx) => {
                if let Some(prev_node) = &mut self.nodes[prev_idx] {
                    prev_node.next = next;
                }
            }
            None => {
                self.head = next;
            }
        }

        match next {
            Some(next_idx) => {
                if let Some(next_node) = &mut self.nodes[next_idx] {
                    next_node.prev = prev;
                }
            }
            None => {
                self.tail = prev;
            }
        }
    }

    fn alloc_node(&mut self) -> usize {
        if let Some(idx) = self.free_list.pop() {
            idx
        } else {
            let idx = self.nodes.len();
            self.nodes.push(None);
            idx
        }
    }
}

/// Front-to-back iterator over a [`RecencyList`]
pub struct Iter<'a, T> {
    list: &'a RecencyList<T>,
    cursor: Option<usize>,
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<Self::Item> {
        let idx = self.cursor?;
        let list = self.list;
        let node = list.nodes[idx].as_ref()?;
        self.cursor = node.next;
        Some(&node.value)
    }
}
