//! Reference counting for kernel objects.
use alloc::boxed::Box;
use core::fmt;
use core::mem;
use core::ops::Deref;
use core::ptr::NonNull;
use core::sync::atomic;
use core::sync::atomic::AtomicUsize;
use core::sync::atomic::Ordering;

struct RefCounted<T> {
    counter: AtomicUsize,
    value: T,
}

/// A reference-counted pointer to a kernel object.
///
/// # Why not `Arc`?
///
/// We roll our own so the kernel only pays for what it uses: there are no
/// weak references here, because every kernel object is released through
/// an explicit operation (a handle close or a destroy call), never by a
/// cycle collector.
///
/// The orderings mirror the standard library's `Arc`: relaxed increments
/// on clone, a release decrement on drop, and an acquire fence before the
/// value is freed.
pub struct SharedRef<T> {
    ptr: NonNull<RefCounted<T>>,
}

impl<T> SharedRef<T> {
    pub fn new(value: T) -> SharedRef<T> {
        let ptr = Box::leak(Box::new(RefCounted {
            counter: AtomicUsize::new(1),
            value,
        }));

        SharedRef {
            // SAFETY: Box::leak never returns a null pointer.
            ptr: unsafe { NonNull::new_unchecked(ptr) },
        }
    }

    /// Whether two `SharedRef`s point at the very same object.
    pub fn ptr_eq(a: &SharedRef<T>, b: &SharedRef<T>) -> bool {
        a.ptr == b.ptr
    }

    fn inner(&self) -> &RefCounted<T> {
        // SAFETY: The pointee stays alive at least as long as `self`
        // holds a reference.
        unsafe { self.ptr.as_ref() }
    }
}

impl<T> Clone for SharedRef<T> {
    fn clone(&self) -> SharedRef<T> {
        // Overflowing this counter would need more SharedRef instances
        // than the address space can hold.
        self.inner().counter.fetch_add(1, Ordering::Relaxed);

        SharedRef { ptr: self.ptr }
    }
}

impl<T> Drop for SharedRef<T> {
    fn drop(&mut self) {
        if self.inner().counter.fetch_sub(1, Ordering::Release) == 1 {
            // Keep all uses of the value ordered before its deletion.
            atomic::fence(Ordering::Acquire);

            // SAFETY: This was the last reference.
            mem::drop(unsafe { Box::from_raw(self.ptr.as_ptr()) });
        }
    }
}

impl<T> Deref for SharedRef<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.inner().value
    }
}

impl<T: fmt::Debug> fmt::Debug for SharedRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.inner().value.fmt(f)
    }
}

unsafe impl<T: Sync + Send> Sync for SharedRef<T> {}
unsafe impl<T: Sync + Send> Send for SharedRef<T> {}
