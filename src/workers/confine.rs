//! Counting semaphore built on a bounded token channel.

use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam_channel::{bounded, Receiver, Sender};

/// Caps how many tasks hold a token at once. A token is taken by sending into a
/// channel of `capacity` slots and handed back by draining one slot.
#[derive(Debug)]
pub struct Confine {
    tokens: Sender<()>,
    returns: Receiver<()>,
    capacity: usize,
    peak: AtomicUsize,
}

/// Held while a task runs; the token goes back on drop, also on error and unwind.
#[derive(Debug)]
pub struct Permit<'a> {
    confine: &'a Confine,
}

impl Confine {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tokens, returns) = bounded(capacity);
        Self { tokens, returns, capacity, peak: AtomicUsize::new(0) }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Blocks while all tokens are out.
    pub fn acquire(&self) -> Permit<'_> {
        // Both channel ends live in `self`, so the send cannot see a disconnect.
        let _ = self.tokens.send(());
        self.note_in_flight();
        Permit { confine: self }
    }

    #[cfg(test)]
    fn try_acquire(&self) -> Option<Permit<'_>> {
        self.tokens.try_send(()).ok()?;
        self.note_in_flight();
        Some(Permit { confine: self })
    }

    /// Tokens currently held.
    #[cfg(test)]
    fn in_flight(&self) -> usize {
        self.tokens.len()
    }

    /// Highest number of tokens held at the same time since construction.
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::Relaxed)
    }

    fn note_in_flight(&self) {
        self.peak.fetch_max(self.tokens.len(), Ordering::Relaxed);
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        let _ = self.confine.returns.try_recv();
    }
}
