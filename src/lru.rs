use std::borrow::Borrow;
use std::collections::HashMap;
use std::fmt::Debug;
use std::fmt::Formatter;
use std::fmt::Result as FmtResult;
use std::hash::Hash;
use std::mem::replace;


const NIL: usize = usize::MAX;


struct Node<K, V> {
    key: K,
    value: V,
    /// Index of the next more recently used node.
    prev: usize,
    /// Index of the next less recently used node.
    next: usize,
}


/// A fixed capacity map evicting its least recently used entry when
/// full.
///
/// A capacity of zero disables the map: nothing is ever stored.
pub(crate) struct LruMap<K, V> {
    /// The storage of all nodes. Its length never exceeds `capacity`.
    nodes: Vec<Node<K, V>>,
    /// Mapping from key to index into `nodes`.
    index: HashMap<K, usize>,
    /// The most recently used node.
    head: usize,
    /// The least recently used node.
    tail: usize,
    capacity: usize,
}

impl<K, V> LruMap<K, V>
where
    K: Clone + Eq + Hash,
{
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            nodes: Vec::with_capacity(capacity),
            index: HashMap::with_capacity(capacity),
            head: NIL,
            tail: NIL,
            capacity,
        }
    }

    #[cfg(test)]
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[cfg(test)]
    #[inline]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    fn unlink(&mut self, idx: usize) {
        let (prev, next) = {
            let node = &self.nodes[idx];
            (node.prev, node.next)
        };

        if prev != NIL {
            self.nodes[prev].next = next;
        } else {
            self.head = next;
        }

        if next != NIL {
            self.nodes[next].prev = prev;
        } else {
            self.tail = prev;
        }
    }

    fn push_front(&mut self, idx: usize) {
        {
            let node = &mut self.nodes[idx];
            node.prev = NIL;
            node.next = self.head;
        }

        if self.head != NIL {
            self.nodes[self.head].prev = idx;
        }
        self.head = idx;

        if self.tail == NIL {
            self.tail = idx;
        }
    }

    /// Look up the value for `key`, marking it as most recently used.
    pub fn get<Q>(&mut self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        let idx = *self.index.get(key)?;
        if idx != self.head {
            let () = self.unlink(idx);
            let () = self.push_front(idx);
        }
        Some(&self.nodes[idx].value)
    }

    /// Look up the value for `key` without affecting its recency.
    pub fn peek<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        let idx = *self.index.get(key)?;
        Some(&self.nodes[idx].value)
    }

    /// Insert a value, replacing any value present for the same key.
    ///
    /// If the map is full, the least recently used entry is evicted and
    /// returned.
    pub fn insert(&mut self, key: K, value: V) -> Option<(K, V)> {
        if self.capacity == 0 {
            return None
        }

        if let Some(&idx) = self.index.get(&key) {
            let () = self.unlink(idx);
            let () = self.push_front(idx);
            let old = replace(&mut self.nodes[idx].value, value);
            return Some((key, old))
        }

        if self.nodes.len() < self.capacity {
            let idx = self.nodes.len();
            let () = self.nodes.push(Node {
                key: key.clone(),
                value,
                prev: NIL,
                next: NIL,
            });
            let _prev = self.index.insert(key, idx);
            let () = self.push_front(idx);
            return None
        }

        // Reuse the least recently used node for the new entry.
        let idx = self.tail;
        let () = self.unlink(idx);
        let node = &mut self.nodes[idx];
        let old_key = replace(&mut node.key, key.clone());
        let old_value = replace(&mut node.value, value);
        let _prev = self.index.remove(&old_key);
        let _prev = self.index.insert(key, idx);
        let () = self.push_front(idx);
        Some((old_key, old_value))
    }
}

impl<K, V> Debug for LruMap<K, V> {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("LruMap")
            .field("len", &self.nodes.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}
