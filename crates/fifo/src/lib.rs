//! A wait-free single-producer, single-consumer ring buffer.
//!
//! The audio thread is always the producer. It never blocks: when the ring is full, writes come
//! back short and the caller decides what to drop. The consumer is a housekeeping thread that may
//! sleep between reads.
use std::{
    ops::{Deref, DerefMut},
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use util::Padded;

/// The write end of a ring buffer.
pub struct Sender<T> {
    cap: usize,
    state: Arc<State<T>>,
}

/// A write transaction. See [Sender::write].
pub struct SendTxn<'a, T> {
    writer: &'a mut Sender<T>,
    start: usize,
    length: usize,
}

/// The read end of a ring buffer.
pub struct Receiver<T> {
    cap: usize,
    state: Arc<State<T>>,
}

/// A read transaction. See [Receiver::read].
pub struct RecvTxn<'a, T> {
    reader: &'a mut Receiver<T>,
    start: usize,
    length: usize,
}

struct State<T> {
    head: Padded<AtomicUsize>,
    tail: Padded<AtomicUsize>,
    data: Box<[std::cell::UnsafeCell<T>]>,
}

unsafe impl<T: Send> Send for State<T> {}
unsafe impl<T: Send> Sync for State<T> {}

/// Create a new ring buffer with a fixed, power of two capacity. Slots are filled with `init`.
pub fn channel<T>(cap: usize, init: impl Fn() -> T) -> (Sender<T>, Receiver<T>) {
    assert!(cap.is_power_of_two(), "fifo capacity must be a power of two");
    let data = (0..cap)
        .map(|_| std::cell::UnsafeCell::new(init()))
        .collect::<Vec<_>>()
        .into_boxed_slice();
    let state = Arc::new(State {
        head: Padded::new(AtomicUsize::new(0)),
        tail: Padded::new(AtomicUsize::new(0)),
        data,
    });
    let writer = Sender {
        cap,
        state: state.clone(),
    };
    let reader = Receiver { cap, state };
    (writer, reader)
}

impl<T> State<T> {
    fn slot(&self, index: usize) -> *mut T {
        self.data[index].get()
    }
}

impl<T> Receiver<T> {
    /// Number of messages that can be read in one contiguous transaction.
    pub fn available(&self) -> usize {
        self.region().1
    }

    fn region(&self) -> (usize, usize) {
        let cap = self.cap;
        let head = self.state.head.load(Ordering::Acquire);
        let tail = self.state.tail.load(Ordering::Relaxed);
        let used = head.wrapping_sub(tail);
        let start = tail & (cap - 1);
        (start, used.min(cap - start))
    }

    fn sender_dropped(&self) -> bool {
        Arc::strong_count(&self.state) == 1
    }

    /// Acquire a read transaction over the messages yet to be dequeued (up to the end of the
    /// ring; a second read picks up the wrapped part). Returns `None` when the queue is empty
    /// _and_ the corresponding [Sender] has been dropped.
    pub fn read(&mut self) -> Option<RecvTxn<'_, T>> {
        let (start, length) = self.region();
        if length == 0 && self.sender_dropped() {
            return None;
        }
        Some(RecvTxn {
            reader: self,
            start,
            length,
        })
    }
}

impl<T: Copy> Receiver<T> {
    /// Copy up to `out.len()` messages into `out`, returning how many were read.
    pub fn pop_into(&mut self, out: &mut [T]) -> usize {
        let mut count = 0;
        while count < out.len() {
            let Some(txn) = self.read() else {
                break;
            };
            if txn.is_empty() {
                break;
            }
            let len = txn.len().min(out.len() - count);
            out[count..count + len].copy_from_slice(&txn[0..len]);
            txn.commit_n(len);
            count += len;
        }
        count
    }

    pub fn pop(&mut self) -> Option<T> {
        let txn = self.read()?;
        let value = *txn.first()?;
        txn.commit_n(1);
        Some(value)
    }
}

impl<T> Sender<T> {
    /// Acquire a write transaction of at most `count` slots. Returns None if the corresponding
    /// [Receiver] was dropped. The transaction may be shorter than requested (or empty) when the
    /// ring is full or wraps.
    pub fn write(&mut self, count: usize) -> Option<SendTxn<'_, T>> {
        if self.receiver_dropped() {
            return None;
        }
        let cap = self.cap;
        let head = self.state.head.load(Ordering::Relaxed);
        let tail = self.state.tail.load(Ordering::Acquire);
        let used = head.wrapping_sub(tail);
        let free = cap - used;
        let start = head & (cap - 1);
        let length = free.min(cap - start).min(count);
        Some(SendTxn {
            writer: self,
            start,
            length,
        })
    }

    /// Free slots right now.
    pub fn free(&self) -> usize {
        let head = self.state.head.load(Ordering::Relaxed);
        let tail = self.state.tail.load(Ordering::Acquire);
        self.cap - head.wrapping_sub(tail)
    }

    fn receiver_dropped(&self) -> bool {
        Arc::strong_count(&self.state) == 1
    }
}

impl<T: Copy> Sender<T> {
    /// Push as much of `values` as fits, returning how many were written. Never blocks.
    pub fn push_slice(&mut self, mut values: &[T]) -> usize {
        let mut count = 0;
        while !values.is_empty() {
            let Some(mut txn) = self.write(values.len()) else {
                break;
            };
            if txn.is_empty() {
                break;
            }
            let len = txn.len();
            txn.copy_from_slice(&values[0..len]);
            txn.commit();
            values = &values[len..];
            count += len;
        }
        count
    }

    /// Push one message. Hands it back if the ring is full or the receiver is gone.
    pub fn push(&mut self, value: T) -> Result<(), T> {
        match self.push_slice(std::slice::from_ref(&value)) {
            1 => Ok(()),
            _ => Err(value),
        }
    }
}

impl<T> RecvTxn<'_, T> {
    pub fn commit(self) {
        self.reader
            .state
            .tail
            .fetch_add(self.length, Ordering::Release);
    }

    pub fn commit_n(self, size: usize) {
        debug_assert!(size <= self.length);
        self.reader.state.tail.fetch_add(size, Ordering::Release);
    }
}

impl<T> SendTxn<'_, T> {
    /// Commit the write transaction. This _must_ be called or messages will not appear in the
    /// queue.
    pub fn commit(self) {
        self.writer
            .state
            .head
            .fetch_add(self.length, Ordering::Release);
    }
}

impl<T> Deref for RecvTxn<'_, T> {
    type Target = [T];
    fn deref(&self) -> &Self::Target {
        unsafe { std::slice::from_raw_parts(self.reader.state.slot(self.start), self.length) }
    }
}

impl<T> Deref for SendTxn<'_, T> {
    type Target = [T];
    fn deref(&self) -> &Self::Target {
        unsafe { std::slice::from_raw_parts(self.writer.state.slot(self.start), self.length) }
    }
}

impl<T> DerefMut for SendTxn<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        unsafe { std::slice::from_raw_parts_mut(self.writer.state.slot(self.start), self.length) }
    }
}
