use std::sync::atomic::{AtomicU32, Ordering};

/// Hands out `base + 1 ..= base + span`, wrapping back to the start of the
/// range. A span of zero asks the OS for any free port instead.
#[derive(Debug)]
pub struct EphemeralPortAllocator {
    base: u16,
    span: u16,
    counter: AtomicU32,
}

impl EphemeralPortAllocator {
    pub fn new(base: u16, span: u16) -> Self {
        Self {
            base,
            span,
            counter: AtomicU32::new(0),
        }
    }

    pub fn next_port(&self) -> u16 {
        if self.span == 0 {
            return 0;
        }
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        let offset = (n % u32::from(self.span)) + 1;
        u16::try_from(u32::from(self.base) + offset).unwrap_or(0)
    }
}
