//! Fixed-capacity delay line
//!
//! Serves as the lookahead buffer of every processor, the dry-path phase
//! compensation delay, and the oversampling compensation delay. Capacity is
//! allocated once in [`DelayLine::allocate`]; the active delay can then change
//! freely up to that capacity without touching the allocator.

#[derive(Debug, Clone, Default)]
pub struct DelayLine {
    buf: Vec<f32>,
    head: usize,
    delay: usize,
}

impl DelayLine {
    /// Allocates room for delays up to `max_delay` samples and clears state.
    pub fn allocate(&mut self, max_delay: usize) {
        self.buf.clear();
        self.buf.resize(max_delay + 1, 0.0);
        self.head = 0;
        self.delay = self.delay.min(max_delay);
    }

    pub fn with_capacity(max_delay: usize) -> Self {
        let mut line = Self::default();
        line.allocate(max_delay);
        line
    }

    /// Largest delay this line can hold.
    pub fn capacity(&self) -> usize {
        self.buf.len().saturating_sub(1)
    }

    /// Sets the delay, clamped to capacity. Contents are kept.
    pub fn set_delay(&mut self, delay: usize) {
        debug_assert!(delay <= self.capacity(), "delay {delay} exceeds capacity");
        self.delay = delay.min(self.capacity());
    }

    pub fn delay(&self) -> usize {
        self.delay
    }

    /// Writes `x` and returns the sample written `delay` pushes ago.
    #[inline]
    pub fn push(&mut self, x: f32) -> f32 {
        let len = self.buf.len();
        if len == 0 {
            return x;
        }
        self.head = (self.head + 1) % len;
        self.buf[self.head] = x;
        self.tap(self.delay)
    }

    /// Reads the sample written `age` pushes ago (0 = most recent).
    #[inline]
    pub fn tap(&self, age: usize) -> f32 {
        let len = self.buf.len();
        if len == 0 {
            return 0.0;
        }
        let age = age.min(len - 1);
        self.buf[(self.head + len - age) % len]
    }

    pub fn clear(&mut self) {
        self.buf.iter_mut().for_each(|s| *s = 0.0);
    }
}
