//! Free-list object pool.
//!
//! [`Pool`] hands out values by move: [`Pool::take`] transfers exclusive
//! ownership to the caller and [`Pool::give`] relinquishes it. Because the
//! value itself moves, a pooled object cannot be returned twice or held by
//! two owners; the type system enforces what a reference-counted pool would
//! have to check at runtime.
//!
//! Returned objects are reset before they are stored so that a later `take`
//! never observes stale state.

/// A stack of reusable objects.
pub struct Pool<T> {
    objects: Vec<T>,
    generator: fn() -> T,
    reset: fn(&mut T),
}

impl<T> Pool<T> {
    /// Create a pool pre-filled with `initial_capacity` objects.
    pub fn new(generator: fn() -> T, reset: fn(&mut T), initial_capacity: usize) -> Self {
        let objects = (0..initial_capacity).map(|_| generator()).collect();
        Self {
            objects,
            generator,
            reset,
        }
    }

    /// Take an object, allocating a fresh one only when the pool is empty.
    pub fn take(&mut self) -> T {
        self.objects.pop().unwrap_or_else(self.generator)
    }

    /// Return an object to the pool.
    pub fn give(&mut self, mut object: T) {
        (self.reset)(&mut object);
        self.objects.push(object);
    }

    /// Number of idle objects currently stored.
    pub fn count(&self) -> usize {
        self.objects.len()
    }

    /// Drop every idle object.
    pub fn clear(&mut self) {
        self.objects.clear();
    }
}

impl<T> std::fmt::Debug for Pool<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool").field("count", &self.objects.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer() -> Vec<u8> {
        Vec::with_capacity(16)
    }

    #[test]
    fn prefilled_to_initial_capacity() {
        let pool = Pool::new(buffer, Vec::clear, 4);
        assert_eq!(pool.count(), 4);
    }

    #[test]
    fn take_then_give_keeps_count_balanced() {
        let mut pool = Pool::new(buffer, Vec::clear, 2);
        let a = pool.take();
        let b = pool.take();
        assert_eq!(pool.count(), 0);
        pool.give(a);
        pool.give(b);
        assert_eq!(pool.count(), 2);
    }

    #[test]
    fn empty_pool_allocates() {
        let mut pool = Pool::new(buffer, Vec::clear, 0);
        let v = pool.take();
        assert!(v.capacity() >= 16);
        pool.give(v);
        assert_eq!(pool.count(), 1);
    }

    #[test]
    fn returned_objects_are_reset() {
        let mut pool = Pool::new(buffer, Vec::clear, 0);
        let mut v = pool.take();
        v.extend_from_slice(b"stale");
        pool.give(v);
        assert!(pool.take().is_empty());
    }
}
