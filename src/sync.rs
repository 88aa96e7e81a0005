//! Synchronization primitives shared between ISR context and the worker
//! tasks: the global network lock, the ISR-to-worker wakeup signal, and the
//! bounded deallocation queue.

use core::sync::atomic::{AtomicBool, Ordering};

use heapless::spsc::{Consumer, Producer, Queue};

use crate::bufpool::BufferType;

pub use crate::hal::spin::Mutex as NetLock;

/// A single-slot wakeup signal from ISR context to the Rx worker task.
///
/// A second `signal()` arriving before the worker has observed and cleared
/// the first is coalesced into a no-op rather than queued, matching the
/// ISR's "signal, don't enqueue" contract: the driver tracks the
/// outstanding signal explicitly so a wakeup already pending is never
/// lost and never duplicated.
pub struct Notify {
    pending: AtomicBool,
}

impl Notify {
    pub const fn new() -> Self {
        Self {
            pending: AtomicBool::new(false),
        }
    }

    /// Called from ISR context. Returns `true` if this call actually
    /// transitioned the flag (i.e. the worker was not already signaled),
    /// mirroring the driver's need to know whether a signal "took" so it
    /// can retry on the next interrupt when it didn't ("if the signal
    /// fails, re-enable Rx-done to retry on the next interrupt").
    pub fn signal(&self) -> bool {
        self.pending
            .compare_exchange(false, true, Ordering::Release, Ordering::Relaxed)
            .is_ok()
    }

    /// Called from the worker task. Clears and reports whether a signal was
    /// pending.
    pub fn take(&self) -> bool {
        self.pending.swap(false, Ordering::Acquire)
    }
}

impl Default for Notify {
    fn default() -> Self {
        Self::new()
    }
}

/// A data-region pointer posted from the driver's Tx-completion path to an
/// external deallocation task. Carries only what the task needs to return
/// the region to its pool: the interface it belongs to and the region's
/// starting address.
#[derive(Debug, Clone, Copy)]
pub struct DeallocEntry {
    pub if_nbr: usize,
    pub buf_type: BufferType,
    pub data_addr: usize,
}

/// Bounded SPSC queue from ISR context (producer) to the deallocation task
/// (consumer). `N` is fixed at construction and never grows, per the
/// "preallocate everything at init" non-goal.
pub struct DeallocQueue<const N: usize> {
    queue: Queue<DeallocEntry, N>,
}

impl<const N: usize> DeallocQueue<N> {
    pub const fn new() -> Self {
        Self { queue: Queue::new() }
    }

    /// Splits into a producer usable from ISR context and a consumer usable
    /// from the deallocation task. Matches `heapless::spsc::Queue::split`'s
    /// single-producer/single-consumer contract.
    pub fn split(&mut self) -> (Producer<'_, DeallocEntry, N>, Consumer<'_, DeallocEntry, N>) {
        self.queue.split()
    }
}

impl<const N: usize> Default for DeallocQueue<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// Posts to a producer half without blocking; returns `false` on a full
/// queue rather than blocking, matching the ISR-safe non-blocking-post
/// contract `tx_dealloc_post` needs.
pub fn try_post<const N: usize>(producer: &mut Producer<'_, DeallocEntry, N>, entry: DeallocEntry) -> bool {
    producer.enqueue(entry).is_ok()
}
