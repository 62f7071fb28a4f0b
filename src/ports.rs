//! Port allocation for backend server processes

use crate::error::HubError;
use parking_lot::Mutex;
use std::collections::BTreeSet;

/// Hands out ports from a closed range `[start, end]`.
///
/// A port is either free or held by exactly one session; `acquire` and
/// `release` are safe to call from any task. Allocation is lowest-free-first,
/// which keeps test runs deterministic.
pub struct PortAllocator {
    /// First port (inclusive)
    start: u16,
    /// Last port (inclusive)
    end: u16,
    /// Ports currently held by live sessions
    held: Mutex<BTreeSet<u16>>,
}

impl PortAllocator {
    /// Create an allocator over the closed range `[start, end]`.
    pub fn new(start: u16, end: u16) -> Self {
        Self {
            start,
            end,
            held: Mutex::new(BTreeSet::new()),
        }
    }

    /// Acquire the lowest free port in range.
    ///
    /// Fails fast with `NoPortsAvailable` when the range is exhausted; the
    /// caller surfaces this as a capacity error rather than retrying.
    pub fn acquire(&self) -> Result<u16, HubError> {
        let mut held = self.held.lock();
        for port in self.start..=self.end {
            if !held.contains(&port) {
                held.insert(port);
                return Ok(port);
            }
        }
        Err(HubError::NoPortsAvailable)
    }

    /// Release a previously acquired port. Releasing a free or out-of-range
    /// port is a no-op.
    pub fn release(&self, port: u16) {
        self.held.lock().remove(&port);
    }

    /// Number of ports still free
    pub fn available_count(&self) -> usize {
        let total = (self.end - self.start) as usize + 1;
        total - self.held.lock().len()
    }

    /// Snapshot of the ports currently held, in ascending order
    pub fn held_ports(&self) -> BTreeSet<u16> {
        self.held.lock().clone()
    }
}
