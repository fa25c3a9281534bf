use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

/// Identifies one connected handler. `generation` must match the slot's
/// current generation for `cancel` to act on it — a slot recycled after
/// a prior cancel carries a new generation, so a stale `SlotId` can never
/// cancel (or be confused with) whatever reused its index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotId {
    index: usize,
    generation: u64,
}

type Handler<Args> = Arc<dyn Fn(Args) + Send + Sync>;

struct SlotEntry<Args> {
    generation: AtomicU64,
    // A reader lock is held across the handler invocation in `fire`, so
    // `cancel`'s writer lock can't clear the slot (and return) until any
    // call already in flight for it has finished.
    handler: RwLock<Option<Handler<Args>>>,
}

/// Thread-safe multi-subscriber observer, used for watch firing,
/// shard-status changes, and request replies. Connect/cancel/fire may run
/// concurrently from any thread.
///
/// Redesigned from the originating system's bidirectional refcounted
/// signal/slot graph (signal holds slots; each slot holds a back-pointer
/// to the signal through a refcounted manager record) into a generation-
/// tagged slot arena: cancelling a slot is an atomic generation bump, so
/// there's no handler-side back-pointer to race against signal
/// destruction. Rust's ordinary `Drop` already disconnects every slot
/// when the signal itself is dropped.
pub struct Signal<Args> {
    slots: RwLock<Vec<Arc<SlotEntry<Args>>>>,
    free_list: Mutex<Vec<usize>>,
}

impl<Args> Signal<Args> {
    pub fn new() -> Self {
        Signal { slots: RwLock::new(Vec::new()), free_list: Mutex::new(Vec::new()) }
    }

    /// Connects `handler`, reusing a cancelled slot's index when one is
    /// free. Returns the id needed to cancel it later.
    pub fn connect(&self, handler: impl Fn(Args) + Send + Sync + 'static) -> SlotId
    where
        Args: 'static,
    {
        let handler: Handler<Args> = Arc::new(handler);

        let mut free = self.free_list.lock();
        if let Some(index) = free.pop() {
            drop(free);
            let entry = self.slots.read()[index].clone();
            *entry.handler.write() = Some(handler);
            return SlotId { index, generation: entry.generation.load(Ordering::SeqCst) };
        }
        drop(free);

        let mut slots = self.slots.write();
        let index = slots.len();
        slots.push(Arc::new(SlotEntry { generation: AtomicU64::new(0), handler: RwLock::new(Some(handler)) }));
        SlotId { index, generation: 0 }
    }

    /// Disconnects a slot. Idempotent: cancelling twice, or cancelling
    /// after the slot's index has been recycled for a newer connection,
    /// is a no-op the second time because the generation no longer
    /// matches. Blocks until any invocation of this slot already in
    /// flight in `fire` has returned, so the handler is guaranteed never
    /// to run again once `cancel` itself returns.
    pub fn cancel(&self, id: SlotId) -> bool {
        let entry = self.slots.read().get(id.index).cloned();
        let Some(entry) = entry else { return false };
        if entry.generation.load(Ordering::SeqCst) != id.generation {
            return false;
        }
        let mut handler = entry.handler.write();
        *handler = None;
        entry.generation.fetch_add(1, Ordering::SeqCst);
        drop(handler);
        self.free_list.lock().push(id.index);
        true
    }

    /// Invokes every connected handler with a clone of `args`. Each
    /// handler is called while holding its slot's reader lock, so a
    /// concurrent `cancel` on that slot waits for the call to finish
    /// before clearing it and returning.
    pub fn fire(&self, args: Args)
    where
        Args: Clone,
    {
        let entries: Vec<Arc<SlotEntry<Args>>> = self.slots.read().clone();
        for entry in entries {
            let handler = entry.handler.read();
            if let Some(handler) = handler.as_ref() {
                handler(args.clone());
            }
        }
    }

    /// Alias for `fire`, matching the source API's `call`/`fire` pair
    /// (the two are equivalent once a signal has no upstream/downstream
    /// distinction left to make).
    pub fn call(&self, args: Args)
    where
        Args: Clone,
    {
        self.fire(args);
    }

    pub fn slot_count(&self) -> usize {
        self.slots.read().iter().filter(|e| e.handler.read().is_some()).count()
    }
}

impl<Args> Default for Signal<Args> {
    fn default() -> Self {
        Signal::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn fire_invokes_every_connected_handler() {
        let signal: Signal<i32> = Signal::new();
        let total = Arc::new(AtomicUsize::new(0));
        let t1 = total.clone();
        let t2 = total.clone();
        signal.connect(move |n| { t1.fetch_add(n as usize, Ordering::SeqCst); });
        signal.connect(move |n| { t2.fetch_add(n as usize, Ordering::SeqCst); });
        signal.fire(5);
        assert_eq!(total.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn cancelled_slot_is_never_invoked_again() {
        let signal: Signal<i32> = Signal::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        let id = signal.connect(move |_| { c.fetch_add(1, Ordering::SeqCst); });
        signal.fire(1);
        assert!(signal.cancel(id));
        signal.fire(1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn cancel_is_idempotent() {
        let signal: Signal<i32> = Signal::new();
        let id = signal.connect(|_| {});
        assert!(signal.cancel(id));
        assert!(!signal.cancel(id));
    }

    #[test]
    fn recycled_slot_gets_a_fresh_generation_old_id_cannot_cancel_it() {
        let signal: Signal<i32> = Signal::new();
        let id1 = signal.connect(|_| {});
        signal.cancel(id1);
        let id2 = signal.connect(|_| {});
        assert_ne!(id1, id2);
        assert!(!signal.cancel(id1));
        assert!(signal.cancel(id2));
    }

    #[test]
    fn slot_count_reflects_only_connected_handlers() {
        let signal: Signal<i32> = Signal::new();
        let id = signal.connect(|_| {});
        assert_eq!(signal.slot_count(), 1);
        signal.cancel(id);
        assert_eq!(signal.slot_count(), 0);
    }
}
