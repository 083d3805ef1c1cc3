//! Fixed-capacity ring buffer
//!
//! Slots are allocated once; `push` is O(1) and evicts the oldest entry when
//! full. Iteration is oldest → newest.

/// Bounded history with exact eviction-of-oldest
#[derive(Debug, Clone)]
pub struct RingBuffer<T> {
    slots: Vec<Option<T>>,
    /// Index of the oldest entry
    head: usize,
    len: usize,
}

impl<T> RingBuffer<T> {
    /// Create with `capacity` slots (minimum 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self {
            slots,
            head: 0,
            len: 0,
        }
    }

    /// Build from an iterator, keeping only the newest `capacity` entries
    pub fn from_iter_bounded<I: IntoIterator<Item = T>>(capacity: usize, items: I) -> Self {
        let mut ring = Self::new(capacity);
        for item in items {
            ring.push(item);
        }
        ring
    }

    /// Append, returning the evicted entry if the buffer was full
    #[inline]
    pub fn push(&mut self, value: T) -> Option<T> {
        let cap = self.slots.len();
        if self.len < cap {
            let idx = (self.head + self.len) % cap;
            self.slots[idx] = Some(value);
            self.len += 1;
            None
        } else {
            let evicted = self.slots[self.head].replace(value);
            self.head = (self.head + 1) % cap;
            evicted
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Newest entry
    pub fn last(&self) -> Option<&T> {
        if self.len == 0 {
            return None;
        }
        let idx = (self.head + self.len - 1) % self.slots.len();
        self.slots[idx].as_ref()
    }

    /// Oldest → newest
    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        let cap = self.slots.len();
        (0..self.len).filter_map(move |i| self.slots[(self.head + i) % cap].as_ref())
    }

    pub fn clear(&mut self) {
        for slot in &mut self.slots {
            *slot = None;
        }
        self.head = 0;
        self.len = 0;
    }
}

impl<T: Clone> RingBuffer<T> {
    /// Copy out oldest → newest
    pub fn to_vec(&self) -> Vec<T> {
        self.iter().cloned().collect()
    }
}
