// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A cancel handle is shared between whoever starts a long-running operation and the
/// operation itself. It's the operation's responsibility to respect a cancel request.
/// Checking it never blocks, so the audio thread may poll it.
#[derive(Clone, Default)]
pub struct CancelHandle {
    cancelled: Arc<AtomicBool>,
}

impl CancelHandle {
    pub fn new() -> CancelHandle {
        CancelHandle {
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }
}

/// Identifies one load request for one cell. A delivery is only committed if the token it
/// carries is still the cell's current token and has not been cancelled.
#[derive(Clone)]
pub struct LoadToken {
    slot: usize,
    generation: u64,
    cancel: CancelHandle,
}

impl LoadToken {
    pub(crate) fn new(slot: usize, generation: u64) -> LoadToken {
        LoadToken {
            slot,
            generation,
            cancel: CancelHandle::new(),
        }
    }

    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn cancel(&self) {
        self.cancel.cancel()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// True if `other` was issued by the same request as this token.
    pub fn same_request(&self, other: &LoadToken) -> bool {
        self.slot == other.slot && self.generation == other.generation
    }
}

impl std::fmt::Debug for LoadToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadToken")
            .field("slot", &self.slot)
            .field("generation", &self.generation)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod test {
    use std::thread;

    use super::*;

    #[test]
    fn test_cancel_handle_cancelled() {
        let cancel_handle = CancelHandle::new();
        assert!(!cancel_handle.is_cancelled());

        let clone = cancel_handle.clone();
        thread::spawn(move || clone.cancel()).join().unwrap();
        assert!(cancel_handle.is_cancelled());

        // Cancelling twice is harmless.
        cancel_handle.cancel();
        assert!(cancel_handle.is_cancelled());
    }

    #[test]
    fn test_load_token_identity() {
        let token = LoadToken::new(3, 7);
        let clone = token.clone();
        assert!(token.same_request(&clone));
        assert!(!token.same_request(&LoadToken::new(3, 8)));

        clone.cancel();
        assert!(token.is_cancelled());
    }
}
