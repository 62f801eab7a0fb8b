use std::fmt;
use std::sync::Mutex;

use once_cell::sync::OnceCell;

use crate::error::{VfsError, VfsResult};

type Producer<T> = Box<dyn FnOnce() -> VfsResult<T> + Send>;

/// One-shot memoizing value holder.
///
/// The first caller of [`get`](Memoized::get) runs the producer; the
/// result is published once and the producer is dropped. Subsequent
/// callers observe the stored value through a lock-free read. The
/// producer slot is guarded by a mutex that is only touched during
/// initialization, never on the read path.
///
/// If the producer fails, the failure is returned to that caller and
/// later calls report [`VfsError::Detached`] (the producer has been
/// consumed; a failed producer means the engine it captured is gone).
pub struct Memoized<T> {
    cell: OnceCell<T>,
    producer: Mutex<Option<Producer<T>>>,
}

impl<T> Memoized<T> {
    /// Wraps a producer for later one-shot evaluation.
    pub fn new<F>(producer: F) -> Self
    where
        F: FnOnce() -> VfsResult<T> + Send + 'static,
    {
        Self {
            cell: OnceCell::new(),
            producer: Mutex::new(Some(Box::new(producer))),
        }
    }

    /// A holder that is already resolved to `value`.
    pub fn ready(value: T) -> Self {
        Self {
            cell: OnceCell::with_value(value),
            producer: Mutex::new(None),
        }
    }

    /// Returns the memoized value, running the producer on first use.
    pub fn get(&self) -> VfsResult<&T> {
        self.cell.get_or_try_init(|| {
            let producer = self.producer.lock().expect("lock poisoned").take();
            match producer {
                Some(produce) => produce(),
                None => Err(VfsError::Detached),
            }
        })
    }
}

impl<T> fmt::Debug for Memoized<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = if self.cell.get().is_some() {
            "resolved"
        } else {
            "pending"
        };
        f.debug_struct("Memoized").field("state", &state).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn runs_producer_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let memo = Memoized::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(42)
        });

        assert_eq!(*memo.get().unwrap(), 42);
        assert_eq!(*memo.get().unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn producer_is_not_run_before_first_get() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let memo = Memoized::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        memo.get().unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn ready_value_needs_no_producer() {
        let memo = Memoized::ready("fixed");
        assert_eq!(*memo.get().unwrap(), "fixed");
    }

    #[test]
    fn failure_then_detached() {
        let memo: Memoized<u32> =
            Memoized::new(|| Err(VfsError::Io(std::io::Error::other("boom"))));
        assert!(matches!(memo.get(), Err(VfsError::Io(_))));
        assert!(matches!(memo.get(), Err(VfsError::Detached)));
    }

    #[test]
    fn concurrent_readers_observe_one_value() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let memo = Arc::new(Memoized::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(vec![1, 2, 3])
        }));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let memo = Arc::clone(&memo);
                thread::spawn(move || {
                    let value = memo.get().unwrap();
                    assert_eq!(value, &[1, 2, 3]);
                    value.as_ptr() as usize
                })
            })
            .collect();

        let addrs: Vec<usize> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        // Every thread saw the same published allocation.
        assert!(addrs.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
