/// Fixed-capacity circular buffer.
///
/// `push` into a full buffer overwrites the oldest element. Elements are addressed by age:
/// age 0 is the newest sample, age `len() - 1` the oldest.
#[derive(Debug, Clone)]
pub struct RingBuffer<T: Copy + Default, const N: usize> {
    buf: [T; N],
    head: usize,
    len: usize,
}

impl<T: Copy + Default, const N: usize> Default for RingBuffer<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Copy + Default, const N: usize> RingBuffer<T, N> {
    pub fn new() -> Self {
        assert!(N > 0, "ring buffer capacity must be non-zero");
        Self { buf: [T::default(); N], head: 0, len: 0 }
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len == N
    }

    pub fn clear(&mut self) {
        self.head = 0;
        self.len = 0;
    }

    /// Appends `value`; returns the element that was overwritten, if any.
    pub fn push(&mut self, value: T) -> Option<T> {
        let evicted = if self.is_full() { Some(self.buf[self.head]) } else { None };
        self.buf[self.head] = value;
        self.head = (self.head + 1) % N;
        if self.len < N {
            self.len += 1;
        }
        evicted
    }

    fn slot(&self, age: usize) -> usize {
        (self.head + N - 1 - age) % N
    }

    pub fn get(&self, age: usize) -> Option<&T> {
        if age < self.len {
            Some(&self.buf[self.slot(age)])
        } else {
            None
        }
    }

    pub fn get_mut(&mut self, age: usize) -> Option<&mut T> {
        if age < self.len {
            let slot = self.slot(age);
            Some(&mut self.buf[slot])
        } else {
            None
        }
    }

    pub fn newest(&self) -> Option<&T> {
        self.get(0)
    }

    pub fn newest_mut(&mut self) -> Option<&mut T> {
        self.get_mut(0)
    }

    pub fn oldest(&self) -> Option<&T> {
        if self.len == 0 {
            None
        } else {
            self.get(self.len - 1)
        }
    }

    /// Removes and returns the newest element (LIFO consumption).
    pub fn pop_newest(&mut self) -> Option<T> {
        if self.len == 0 {
            return None;
        }
        self.head = (self.head + N - 1) % N;
        self.len -= 1;
        Some(self.buf[self.head])
    }

    /// Newest-first iteration.
    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        (0..self.len).map(move |age| &self.buf[self.slot(age)])
    }
}
