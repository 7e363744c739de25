/// Fixed-capacity ring buffer backed by a preallocated arena.
///
/// Pushing into a full ring evicts the oldest element. Iteration runs from
/// oldest to newest.
#[derive(Debug, Clone)]
pub struct Ring<T> {
    slots: Vec<T>,
    capacity: usize,
    /// Index of the oldest element.
    head: usize,
    len: usize,
}

impl<T: Copy + PartialEq> Ring<T> {
    /// Panics if `capacity` is zero; callers validate the configured size.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "ring capacity must be non-zero");
        Ring {
            slots: Vec::with_capacity(capacity),
            capacity,
            head: 0,
            len: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn push(&mut self, value: T) {
        if self.slots.len() < self.capacity {
            // Still filling the arena for the first time.
            self.slots.push(value);
            self.len += 1;
            return;
        }

        // Arena is full, so the head slot holds the oldest element.
        self.slots[self.head] = value;
        self.head = (self.head + 1) % self.capacity;
    }

    /// Linear scan over the live elements only.
    pub fn contains(&self, value: &T) -> bool {
        self.iter().any(|slot| slot == *value)
    }

    /// Forgets every element; the arena is kept.
    pub fn clear(&mut self) {
        self.head = 0;
        self.len = 0;
        self.slots.clear();
    }

    pub fn last(&self) -> Option<T> {
        if self.len == 0 {
            return None;
        }
        Some(self.slots[(self.head + self.len - 1) % self.capacity])
    }

    pub fn iter(&self) -> impl Iterator<Item = T> + '_ {
        (0..self.len).map(move |i| self.slots[(self.head + i) % self.capacity])
    }

    /// The newest `n` elements, oldest first.
    pub fn tail(&self, n: usize) -> impl Iterator<Item = T> + '_ {
        self.iter().skip(self.len.saturating_sub(n))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_evicts_oldest_when_full() {
        let mut ring = Ring::new(3);
        for v in 1..=5u64 {
            ring.push(v);
        }
        assert_eq!(ring.len(), 3);
        assert_eq!(ring.iter().collect::<Vec<_>>(), vec![3, 4, 5]);
        assert_eq!(ring.last(), Some(5));
        assert!(!ring.contains(&2));
        assert!(ring.contains(&3));
    }

    #[test]
    fn clear_then_refill() {
        let mut ring = Ring::new(2);
        ring.push('a');
        ring.push('b');
        ring.push('c');
        ring.clear();
        assert!(ring.is_empty());
        assert!(!ring.contains(&'c'));
        assert_eq!(ring.last(), None);

        ring.push('x');
        assert_eq!(ring.iter().collect::<String>(), "x");
    }

    #[test]
    fn tail_returns_newest_in_order() {
        let mut ring = Ring::new(8);
        for v in 0..6u32 {
            ring.push(v);
        }
        assert_eq!(ring.tail(2).collect::<Vec<_>>(), vec![4, 5]);
        assert_eq!(ring.tail(100).count(), 6);
    }

    #[test]
    fn never_grows_past_capacity() {
        let mut ring = Ring::new(16);
        for v in 0..10_000u64 {
            ring.push(v);
            assert!(ring.len() <= ring.capacity());
        }
        assert_eq!(ring.len(), 16);
        assert_eq!(ring.iter().next(), Some(10_000 - 16));
    }
}
