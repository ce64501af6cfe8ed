use std::ops::{Deref, DerefMut};

pub mod collections;
pub mod macros;
pub mod sync;
pub mod thread;

/// Size of a cache line on the targets we care about.
pub const CACHE_LINE: usize = 64;

/// Marks a value as shareable across threads. The owner is responsible for upholding the
/// exclusivity rules that the compiler can't see (eg. "only the claiming worker touches this").
#[repr(transparent)]
pub struct IsSendSync<T: ?Sized>(T);

/// Pads and aligns a value to a cache line so that neighbouring atomics don't false-share.
#[derive(Default, Debug)]
#[repr(align(64))]
pub struct Padded<T>(T);

impl<T> IsSendSync<T> {
    pub fn new(value: T) -> Self {
        Self(value)
    }
    pub fn into_inner(self) -> T {
        self.0
    }
}

unsafe impl<T: ?Sized> Send for IsSendSync<T> {}
unsafe impl<T: ?Sized> Sync for IsSendSync<T> {}

impl<T: ?Sized> Deref for IsSendSync<T> {
    type Target = T;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<T: ?Sized> DerefMut for IsSendSync<T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl<T> Padded<T> {
    pub const fn new(value: T) -> Self {
        Self(value)
    }

    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> Deref for Padded<T> {
    type Target = T;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<T> DerefMut for Padded<T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

#[cfg(test)]
mod tests {
    use super::{CACHE_LINE, Padded};
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn padded_is_cache_aligned() {
        assert_eq!(std::mem::align_of::<Padded<AtomicUsize>>(), CACHE_LINE);
        let values = [Padded::new(AtomicUsize::new(0)), Padded::new(AtomicUsize::new(1))];
        let a = &values[0] as *const _ as usize;
        let b = &values[1] as *const _ as usize;
        assert_eq!(b - a, CACHE_LINE);
    }
}
