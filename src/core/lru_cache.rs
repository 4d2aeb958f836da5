use std::collections::HashMap;
use std::hash::Hash;

struct Node<K, V> {
    key: K,
    value: V,
    prev: Option<usize>,
    next: Option<usize>,
}

/// Bounded map ordered by recency of access.
///
/// Nodes live in a slab (`nodes` + `free_list`) linked into a doubly linked
/// list from `head` (most recent) to `tail` (least recent). Inserting past
/// capacity unlinks the tail and hands it back to the caller, which decides
/// what eviction means (spill to disk, or just drop).
pub struct LruCache<K, V> {
    capacity: usize,
    index: HashMap<K, usize>,
    nodes: Vec<Option<Node<K, V>>>,
    head: Option<usize>,
    tail: Option<usize>,
    free_list: Vec<usize>,
}

impl<K: Eq + Hash + Clone, V> LruCache<K, V> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            index: HashMap::new(),
            nodes: Vec::new(),
            head: None,
            tail: None,
            free_list: Vec::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.index.contains_key(key)
    }

    /// Returns the value and marks it most recently used.
    pub fn get(&mut self, key: &K) -> Option<&V> {
        let idx = *self.index.get(key)?;
        self.move_to_front(idx);
        self.nodes[idx].as_ref().map(|node| &node.value)
    }

    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        let idx = *self.index.get(key)?;
        self.move_to_front(idx);
        self.nodes[idx].as_mut().map(|node| &mut node.value)
    }

    /// Lookup without touching recency.
    pub fn peek(&self, key: &K) -> Option<&V> {
        let idx = *self.index.get(key)?;
        self.nodes[idx].as_ref().map(|node| &node.value)
    }

    /// Inserts or replaces `key`. When the insert pushes the cache past its
    /// capacity the least recently used entry is removed and returned.
    pub fn put(&mut self, key: K, value: V) -> Option<(K, V)> {
        if let Some(&idx) = self.index.get(&key) {
            self.move_to_front(idx);
            if let Some(node) = &mut self.nodes[idx] {
                node.value = value;
            }
            return None;
        }

        let idx = self.allocate_node(key.clone(), value);
        self.index.insert(key, idx);
        self.push_front(idx);

        if self.index.len() > self.capacity {
            self.evict()
        } else {
            None
        }
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        let idx = self.index.remove(key)?;
        self.unlink(idx);
        self.free_list.push(idx);
        self.nodes[idx].take().map(|node| node.value)
    }

    pub fn clear(&mut self) {
        self.index.clear();
        self.nodes.clear();
        self.free_list.clear();
        self.head = None;
        self.tail = None;
    }

    /// Entries from most to least recently used.
    pub fn iter(&self) -> Iter<'_, K, V> {
        Iter {
            nodes: &self.nodes,
            current: self.head,
        }
    }

    fn allocate_node(&mut self, key: K, value: V) -> usize {
        let node = Node {
            key,
            value,
            prev: None,
            next: None,
        };

        if let Some(idx) = self.free_list.pop() {
            self.nodes[idx] = Some(node);
            idx
        } else {
            self.nodes.push(Some(node));
            self.nodes.len() - 1
        }
    }

    fn evict(&mut self) -> Option<(K, V)> {
        let idx = self.tail?;
        self.unlink(idx);
        self.free_list.push(idx);
        let node = self.nodes[idx].take()?;
        self.index.remove(&node.key);
        Some((node.key, node.value))
    }

    fn move_to_front(&mut self, idx: usize) {
        if Some(idx) == self.head {
            return;
        }
        self.unlink(idx);
        self.push_front(idx);
    }

    fn push_front(&mut self, idx: usize) {
        let old_head = self.head;
        if let Some(node) = &mut self.nodes[idx] {
            node.prev = None;
            node.next = old_head;
        }
        if let Some(old) = old_head {
            if let Some(node) = &mut self.nodes[old] {
                node.prev = Some(idx);
            }
        }
        self.head = Some(idx);
        if self.tail.is_none() {
            self.tail = Some(idx);
        }
    }

    fn unlink(&mut self, idx: usize) {
        let (prev_idx, next_idx) = match &self.nodes[idx] {
            Some(node) => (node.prev, node.next),
            None => return,
        };

        if Some(idx) == self.head {
            self.head = next_idx;
        }
        if Some(idx) == self.tail {
            self.tail = prev_idx;
        }
        if let Some(prev) = prev_idx {
            if let Some(node) = &mut self.nodes[prev] {
                node.next = next_idx;
            }
        }
        if let Some(next) = next_idx {
            if let Some(node) = &mut self.nodes[next] {
                node.prev = prev_idx;
            }
        }
        if let Some(node) = &mut self.nodes[idx] {
            node.prev = None;
            node.next = None;
        }
    }
}

pub struct Iter<'a, K, V> {
    nodes: &'a [Option<Node<K, V>>],
    current: Option<usize>,
}

impl<'a, K, V> Iterator for Iter<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.nodes.get(self.current?)?.as_ref()?;
        self.current = node.next;
        Some((&node.key, &node.value))
    }
}
