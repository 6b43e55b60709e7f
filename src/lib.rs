//! A triple buffering implementation
//!
//! In this crate, we implement triple buffering, a mechanism for sharing a
//! continuously updated value between two threads in a non-blocking and
//! wait-free fashion: one single producer prepares updates in place and
//! publishes them at its own pace, one single consumer fetches the latest
//! complete value whenever it likes, tolerating staleness but never a stall
//! or a torn read.
//!
//! # Example
//!
//! ```
//! let (mut producer, mut consumer) = tricell::TripleBuffer::new(0).split();
//!
//! *producer.write() = 42;
//! producer.commit();
//!
//! assert_eq!(*consumer.read(), 42);
//! ```

use crossbeam_utils::CachePadded;
use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// A triple buffer, useful for nonblocking and thread-safe data sharing
///
/// A triple buffer is a single-producer single-consumer nonblocking
/// communication channel which behaves like a shared variable: the producer
/// submits regular updates, the consumer accesses the latest available value
/// at any time.
///
/// The producer and consumer ends of this struct are what the two client
/// threads actually use in practice. They can safely be moved away from the
/// TripleBuffer struct after construction, and are further documented below.
/// Since neither end can be cloned and every operation requires `&mut`, the
/// one-producer one-consumer contract is enforced at compile time.
///
#[derive(Debug)]
pub struct TripleBuffer<T> {
    producer: Producer<T>,
    consumer: Consumer<T>,
}
//
impl<T: Clone> TripleBuffer<T> {
    /// Construct a triple buffer with a certain initial value
    pub fn new(initial: T) -> Self {
        Self::with_storage([initial.clone(), initial.clone(), initial])
    }
}
//
impl<T: Default> Default for TripleBuffer<T> {
    /// Construct a triple buffer with default-initialized slots
    fn default() -> Self {
        Self::with_storage([T::default(), T::default(), T::default()])
    }
}
//
impl<T> TripleBuffer<T> {
    /// Extract the producer and consumer ends of the triple buffer
    pub fn split(self) -> (Producer<T>, Consumer<T>) {
        (self.producer, self.consumer)
    }

    /// Set up the initial slot ownership around pre-filled storage
    fn with_storage(values: [T; 3]) -> Self {
        // Start with the shared state: the consumer owns slot 0, the
        // producer owns slot 1, slot 2 waits in the hand-off position with
        // no new data flagged...
        let shared_state = Arc::new(TripleBufferSharedState {
            slots: values.map(|value| CachePadded::new(UnsafeCell::new(value))),
            ready: CachePadded::new(AtomicReadyToken::new(2)),
        });

        // ...then construct the producer and consumer ends
        TripleBuffer {
            producer: Producer {
                shared: shared_state.clone(),
                back: 1,
            },
            consumer: Consumer {
                shared: shared_state,
                front: 0,
            },
        }
    }
}
//
// The Clone and PartialEq traits are used internally for testing.
//
impl<T: Clone> Clone for TripleBuffer<T> {
    fn clone(&self) -> Self {
        // Clone the shared state. This is safe because at this layer of the
        // interface, one needs a Producer/Consumer &mut to mutate the shared
        // state.
        let shared_state = Arc::new(unsafe { (*self.producer.shared).clone() });

        // ...then the producer and consumer ends
        TripleBuffer {
            producer: Producer {
                shared: shared_state.clone(),
                back: self.producer.back,
            },
            consumer: Consumer {
                shared: shared_state,
                front: self.consumer.front,
            },
        }
    }
}
//
impl<T: PartialEq> PartialEq for TripleBuffer<T> {
    fn eq(&self, other: &Self) -> bool {
        // Compare the shared states. This is safe because at this layer of
        // the interface, one needs a Producer/Consumer &mut to mutate the
        // shared state.
        let shared_states_equal = unsafe { (*self.producer.shared).eq(&*other.producer.shared) };

        // Compare the rest of the triple buffer states
        shared_states_equal
            && (self.producer.back == other.producer.back)
            && (self.consumer.front == other.consumer.front)
    }
}

/// Producer end of the triple buffer
///
/// The producer of data can use this struct to prepare values in place and
/// publish them to the consumer whenever it likes. Both operations are
/// nonblocking and wait-free: a collision between the producer and the
/// consumer will result in cache contention, but deadlocks and
/// scheduling-induced slowdowns cannot happen.
///
#[derive(Debug)]
pub struct Producer<T> {
    shared: Arc<TripleBufferSharedState<T>>,
    back: SlotIndex,
}
//
impl<T> Producer<T> {
    /// Access the write buffer, in order to fill in the next value
    ///
    /// No synchronization happens here: the write buffer is exclusively
    /// owned by the producer until the next call to commit(). Calling
    /// write() several times without committing keeps mutating the same
    /// still-unpublished value.
    pub fn write(&mut self) -> &mut T {
        // The consumer never touches the slot behind our back token
        unsafe { &mut *self.shared.slots[self.back].get() }
    }

    /// Publish the current contents of the write buffer as the newest value
    ///
    /// The write buffer is handed over to the shared ready token, with the
    /// new-data flag raised in the same atomic operation, and the slot that
    /// was formerly parked there becomes the new write buffer.
    pub fn commit(&mut self) {
        // Swap the write buffer and the ready slot. Release makes our writes
        // to the slot visible to the consumer; Acquire makes the consumer's
        // last reads of the slot we reclaim visible to us, so that we may
        // overwrite it.
        let former_ready = self
            .shared
            .ready
            .swap(self.back | HAS_NEW_DATA, Ordering::AcqRel);
        self.back = former_ready & INDEX_MASK;
    }

    /// Overwrite the write buffer with a value and publish it immediately
    pub fn update(&mut self, value: T) {
        *self.write() = value;
        self.commit();
    }
}

/// Consumer end of the triple buffer
///
/// The consumer of data can use this struct to access the latest published
/// value from the producer whenever it likes. Readout is nonblocking and
/// wait-free: a collision between the producer and the consumer will result
/// in cache contention, but deadlocks and scheduling-induced slowdowns
/// cannot happen.
///
#[derive(Debug)]
pub struct Consumer<T> {
    shared: Arc<TripleBufferSharedState<T>>,
    front: SlotIndex,
}
//
impl<T> Consumer<T> {
    /// Check if the producer has committed a value since the last read()
    pub fn updated(&self) -> bool {
        // Relaxed is enough for a peek: when the flag turns out to be set,
        // the swap in read() is what synchronizes with the producer
        self.shared.ready.load(Ordering::Relaxed) & HAS_NEW_DATA != 0
    }

    /// Access the latest value from the triple buffer
    ///
    /// This returns the most recently committed value, or the initial value
    /// if the producer has not committed anything yet. Commits that were
    /// overwritten before the consumer got to them are skipped: only the
    /// newest one is ever guaranteed to be visible.
    pub fn read(&mut self) -> &T {
        // Check if the producer has committed an update
        if self.updated() {
            // Swap the read buffer and the ready slot, clearing the
            // new-data flag in the same atomic operation. Acquire makes the
            // producer's writes to the adopted slot visible to us; Release
            // makes our last reads of the returned slot visible to the
            // producer, so that it may overwrite it.
            let former_ready = self.shared.ready.swap(self.front, Ordering::AcqRel);
            self.front = former_ready & INDEX_MASK;
        }

        // Access data from the current (exclusive-access) read buffer
        unsafe { &*self.shared.slots[self.front].get() }
    }
}

/// Triple buffer shared state
///
/// In a triple buffering communication protocol, the producer and consumer
/// share the following storage:
///
/// - Three memory slots suitable for storing the data at hand
/// - One ready token designating the slot that neither side currently owns,
///   combined with a flag telling whether that slot holds a value the
///   consumer has not adopted yet
///
/// The token and the flag live in the same atomic word, which both sides
/// only ever update through a single swap. Keeping them in two separate
/// atomics would allow a commit landing in the middle of a read to bury a
/// freshly committed slot, or leave the flag raised while the ready token
/// designates a slot the consumer has already discarded.
///
#[derive(Debug)]
struct TripleBufferSharedState<T> {
    /// Data storage slots, padded to cache line boundaries so that the two
    /// client threads never share a line
    slots: [CachePadded<UnsafeCell<T>>; 3],

    /// Index of the ready slot, combined with the new-data flag
    ready: CachePadded<AtomicReadyToken>,
}
//
impl<T: Clone> TripleBufferSharedState<T> {
    /// Cloning the shared state is unsafe because you must ensure that no one
    /// is concurrently accessing it, since &self is enough for writing.
    unsafe fn clone(&self) -> Self {
        TripleBufferSharedState {
            slots: [
                CachePadded::new(UnsafeCell::new((*self.slots[0].get()).clone())),
                CachePadded::new(UnsafeCell::new((*self.slots[1].get()).clone())),
                CachePadded::new(UnsafeCell::new((*self.slots[2].get()).clone())),
            ],
            ready: CachePadded::new(AtomicReadyToken::new(self.ready.load(Ordering::Relaxed))),
        }
    }
}
//
impl<T: PartialEq> TripleBufferSharedState<T> {
    /// Equality is unsafe for the same reason as cloning: you must ensure
    /// that no one is concurrently accessing the triple buffer to avoid data
    /// races.
    unsafe fn eq(&self, other: &Self) -> bool {
        // Compare the slot contents...
        let slots_equal = (*self.slots[0].get() == *other.slots[0].get())
            && (*self.slots[1].get() == *other.slots[1].get())
            && (*self.slots[2].get() == *other.slots[2].get());

        // ...then the shared ready token
        slots_equal && self.ready.load(Ordering::Relaxed) == other.ready.load(Ordering::Relaxed)
    }
}
//
// The hand-off protocol above gives each slot to at most one thread at any
// point in time, which is what makes the shared state safe to share.
unsafe impl<T: Send> Sync for TripleBufferSharedState<T> {}

/// Index and token types used for triple buffering
///
/// The ready token packs the index of the hand-off slot in its low bits
/// together with a flag bit marking not-yet-consumed data, so that a commit
/// publishes both facts in one atomic swap.
///
type SlotIndex = usize;
type AtomicReadyToken = AtomicUsize;

/// Mask extracting the slot index from the ready token
const INDEX_MASK: usize = 0b011;

/// Bit of the ready token which is set when the ready slot holds a value
/// that the consumer has not adopted yet
const HAS_NEW_DATA: usize = 0b100;
