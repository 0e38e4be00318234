//! Single-flight request slots.

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

/// Holds at most one pending request of a kind.
///
/// The command thread sets requests; the observation worker services them.
/// A request is serviced at most once and is cleared only after its service
/// finished. The slot lock is held for the whole service, so a request set
/// meanwhile waits and stays pending for the next frame.
pub struct RequestSlot<T> {
    pending: AtomicBool,
    request: Mutex<Option<T>>,
}

impl<T> Default for RequestSlot<T> {
    fn default() -> Self {
        Self {
            pending: AtomicBool::new(false),
            request: Mutex::new(None),
        }
    }
}

impl<T> RequestSlot<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a request. Returns `true` if it replaced an unserviced one.
    pub fn set(&self, request: T) -> bool {
        let mut slot = self.request.lock();
        let replaced = slot.replace(request).is_some();
        self.pending.store(true, Ordering::Release);
        replaced
    }

    /// Cheap check without taking the lock.
    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }

    /// Service the pending request, if any, then clear it.
    ///
    /// Returns `None` when nothing was pending.
    pub fn service<R>(&self, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        if !self.is_pending() {
            return None;
        }

        let mut slot = self.request.lock();
        let request = slot.as_mut()?;
        let result = f(request);
        *slot = None;
        self.pending.store(false, Ordering::Release);
        Some(result)
    }

    /// Drop any pending request.
    pub fn clear(&self) {
        let mut slot = self.request.lock();
        *slot = None;
        self.pending.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_service_runs_once() {
        let slot = RequestSlot::new();
        assert!(slot.service(|_: &mut u32| ()).is_none());

        assert!(!slot.set(7));
        assert!(slot.is_pending());
        assert_eq!(slot.service(|r| *r * 2), Some(14));
        assert!(!slot.is_pending());
        assert_eq!(slot.service(|r| *r), None);
    }

    #[test]
    fn test_set_replaces_unserviced_request() {
        let slot = RequestSlot::new();
        slot.set(1);
        assert!(slot.set(2));
        assert_eq!(slot.service(|r| *r), Some(2));
    }

    #[test]
    fn test_clear() {
        let slot = RequestSlot::new();
        slot.set("x");
        slot.clear();
        assert!(!slot.is_pending());
        assert_eq!(slot.service(|r| *r), None);
    }

    #[test]
    fn test_request_set_during_service_is_kept() {
        let slot = Arc::new(RequestSlot::new());
        slot.set(1u32);

        let servicing = Arc::clone(&slot);
        let (started_tx, started_rx) = crossbeam_channel::bounded(1);
        let worker = thread::spawn(move || {
            servicing.service(|r| {
                started_tx.send(()).unwrap();
                thread::sleep(Duration::from_millis(50));
                *r
            })
        });

        started_rx.recv().unwrap();
        // Blocks until the first service cleared its request.
        slot.set(2);

        assert_eq!(worker.join().unwrap(), Some(1));
        assert!(slot.is_pending());
        assert_eq!(slot.service(|r| *r), Some(2));
    }

    #[test]
    fn test_concurrent_requests_are_serviced_at_most_once() {
        let snapshot = Arc::new(RequestSlot::new());
        let align = Arc::new(RequestSlot::new());
        let serviced = Arc::new(AtomicUsize::new(0));

        let setters: Vec<_> = [Arc::clone(&snapshot), Arc::clone(&align)]
            .into_iter()
            .map(|slot| thread::spawn(move || slot.set(1u32)))
            .collect();

        let workers: Vec<_> = (0..4)
            .map(|_| {
                let snapshot = Arc::clone(&snapshot);
                let align = Arc::clone(&align);
                let serviced = Arc::clone(&serviced);
                thread::spawn(move || {
                    for _ in 0..1000 {
                        for slot in [&snapshot, &align] {
                            slot.service(|_| {
                                serviced.fetch_add(1, Ordering::SeqCst);
                            });
                        }
                    }
                })
            })
            .collect();

        for setter in setters {
            setter.join().unwrap();
        }
        for worker in workers {
            worker.join().unwrap();
        }
        // Drain whatever the workers finished before the setters ran.
        snapshot.service(|_| serviced.fetch_add(1, Ordering::SeqCst));
        align.service(|_| serviced.fetch_add(1, Ordering::SeqCst));

        assert_eq!(serviced.load(Ordering::SeqCst), 2);
    }
}
