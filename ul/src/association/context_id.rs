//! Presentation context identifier allocation.
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};

/// A source of presentation context identifiers.
///
/// Identifiers are handed out in increasing order
/// in the range 1 to 255 inclusive,
/// wrapping back to 1 after 255.
/// Zero is never issued.
///
/// The allocator may be shared between associations and threads.
///
/// # Example
///
/// ```
/// # use dicom_association::association::ContextIdAllocator;
/// let allocator = ContextIdAllocator::new();
/// assert_eq!(allocator.next_context_id(), 1);
/// assert_eq!(allocator.next_context_id(), 2);
///
/// let allocator = ContextIdAllocator::starting_after(255);
/// assert_eq!(allocator.next_context_id(), 1);
/// ```
#[derive(Debug, Default)]
pub struct ContextIdAllocator {
    /// the last identifier issued, 0 if none yet
    last: AtomicU8,
}

impl ContextIdAllocator {
    pub fn new() -> Self {
        ContextIdAllocator::default()
    }

    /// Create an allocator which behaves
    /// as if `last` was the last identifier issued.
    pub fn starting_after(last: u8) -> Self {
        ContextIdAllocator {
            last: AtomicU8::new(last),
        }
    }

    /// The process-wide allocator,
    /// used by associations which were not given one.
    pub fn global() -> Arc<ContextIdAllocator> {
        static GLOBAL: OnceLock<Arc<ContextIdAllocator>> = OnceLock::new();
        Arc::clone(GLOBAL.get_or_init(|| Arc::new(ContextIdAllocator::new())))
    }

    /// Issue the next presentation context identifier.
    pub fn next_context_id(&self) -> u8 {
        let mut current = self.last.load(Ordering::Relaxed);
        loop {
            let next = successor(current);
            match self.last.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return next,
                Err(actual) => current = actual,
            }
        }
    }
}

#[inline]
fn successor(id: u8) -> u8 {
    if id == u8::MAX {
        1
    } else {
        id + 1
    }
}
