//! Lock-free single-producer/single-consumer ring buffers.
//!
//! One end of every ring lives in the realtime audio callback, so the
//! implementation is wait-free: two atomic indices, no locks, no allocation
//! after construction. Capacity is a power of two and the indices advance
//! modulo `2 * capacity`, which distinguishes a full ring (`write - read ==
//! capacity`) from an empty one (`write == read`) without a separate flag.
//!
//! Memory ordering follows the classic SPSC pairing: the producer publishes
//! element data and then releases its write index; the consumer acquires the
//! write index before touching the data (and vice versa for the read index).

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Shared ring storage. Use [`channel`] to build one and obtain its two
/// endpoint halves; the ring itself only exposes read-only occupancy views,
/// which may be stale but never over-report.
pub struct SpscRing<T> {
    slots: Box<[UnsafeCell<MaybeUninit<T>>]>,
    small_mask: u32,
    big_mask: u32,
    read: AtomicU32,
    write: AtomicU32,
}

unsafe impl<T: Send> Send for SpscRing<T> {}
unsafe impl<T: Send> Sync for SpscRing<T> {}

impl<T> SpscRing<T> {
    fn new(capacity: usize) -> Self {
        assert!(capacity.is_power_of_two(), "ring capacity must be a power of two");
        assert!(capacity <= (1 << 30), "ring capacity too large");
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || UnsafeCell::new(MaybeUninit::uninit()));
        Self {
            slots: slots.into_boxed_slice(),
            small_mask: capacity as u32 - 1,
            big_mask: 2 * capacity as u32 - 1,
            read: AtomicU32::new(0),
            write: AtomicU32::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.small_mask as usize + 1
    }

    /// Elements ready to be read.
    pub fn read_available(&self) -> usize {
        let w = self.write.load(Ordering::Acquire);
        let r = self.read.load(Ordering::Relaxed);
        (w.wrapping_sub(r) & self.big_mask) as usize
    }

    /// Free slots ready to be written.
    pub fn write_available(&self) -> usize {
        self.capacity() - self.used()
    }

    fn used(&self) -> usize {
        let w = self.write.load(Ordering::Relaxed);
        let r = self.read.load(Ordering::Acquire);
        (w.wrapping_sub(r) & self.big_mask) as usize
    }

    fn slot(&self, index: u32) -> *mut MaybeUninit<T> {
        self.slots[(index & self.small_mask) as usize].get()
    }
}

/// Create a ring of the given power-of-two capacity and split it into its
/// producer and consumer halves.
pub fn channel<T>(capacity: usize) -> (Producer<T>, Consumer<T>) {
    let ring = Arc::new(SpscRing::new(capacity));
    (
        Producer { ring: ring.clone() },
        Consumer { ring },
    )
}

/// Writing half. There is exactly one per ring.
pub struct Producer<T> {
    ring: Arc<SpscRing<T>>,
}

impl<T: Copy> Producer<T> {
    /// Copy up to `elems.len()` elements in; returns how many fit.
    pub fn write(&mut self, elems: &[T]) -> usize {
        let n = elems.len().min(self.ring.write_available());
        if n == 0 {
            return 0;
        }
        let w = self.ring.write.load(Ordering::Relaxed);
        for (i, &elem) in elems[..n].iter().enumerate() {
            unsafe {
                (*self.ring.slot(w.wrapping_add(i as u32))).write(elem);
            }
        }
        self.ring
            .write
            .store(w.wrapping_add(n as u32) & self.ring.big_mask, Ordering::Release);
        n
    }

    /// Write a single element; false if the ring is full.
    pub fn push(&mut self, elem: T) -> bool {
        self.write(std::slice::from_ref(&elem)) == 1
    }
}

impl<T> Producer<T> {
    pub fn write_available(&self) -> usize {
        self.ring.write_available()
    }

    /// True once the consumer has drained everything written so far.
    pub fn is_empty(&self) -> bool {
        self.ring.read_available() == 0
    }

    /// Shared view of the ring for occupancy observation.
    pub fn shared(&self) -> Arc<SpscRing<T>> {
        self.ring.clone()
    }
}

/// Reading half. There is exactly one per ring.
pub struct Consumer<T> {
    ring: Arc<SpscRing<T>>,
}

impl<T: Copy> Consumer<T> {
    /// Copy up to `dst.len()` elements out; returns how many were available.
    pub fn read(&mut self, dst: &mut [T]) -> usize {
        let n = dst.len().min(self.ring.read_available());
        if n == 0 {
            return 0;
        }
        let r = self.ring.read.load(Ordering::Relaxed);
        for (i, slot) in dst[..n].iter_mut().enumerate() {
            unsafe {
                *slot = (*self.ring.slot(r.wrapping_add(i as u32))).assume_init();
            }
        }
        self.ring
            .read
            .store(r.wrapping_add(n as u32) & self.ring.big_mask, Ordering::Release);
        n
    }
}

impl<T> Consumer<T> {
    pub fn read_available(&self) -> usize {
        self.ring.read_available()
    }

    /// Borrow the oldest unread element in place without consuming it. The
    /// modulator drains whole messages this way, one zero-copy slot at a
    /// time, releasing the slot with [`advance`](Self::advance) only after
    /// the inter-packet gap.
    pub fn peek(&self) -> Option<&T> {
        if self.ring.read_available() == 0 {
            return None;
        }
        let r = self.ring.read.load(Ordering::Relaxed);
        Some(unsafe { (*self.ring.slot(r)).assume_init_ref() })
    }

    /// Release `n` elements previously observed via [`peek`](Self::peek).
    pub fn advance(&mut self, n: usize) {
        debug_assert!(n <= self.ring.read_available());
        let r = self.ring.read.load(Ordering::Relaxed);
        self.ring
            .read
            .store(r.wrapping_add(n as u32) & self.ring.big_mask, Ordering::Release);
    }

    pub fn shared(&self) -> Arc<SpscRing<T>> {
        self.ring.clone()
    }
}
