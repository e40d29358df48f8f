//! The exit notification channel between a vCPU and its monitor.
//!
//! One submission per qualifying guest exit. The channel deliberately
//! does not coalesce: the pending count is the monitor's exit counter,
//! and a duplicate submission would desynchronize it. Keeping the count
//! exact is the vCPU state machine's job; the channel just counts.
use core::fmt;

use hv_types::error::ErrorCode;

use crate::refcount::SharedRef;
use crate::spinlock::SpinLock;

struct Mutable {
    pending: usize,
}

pub struct ExitSignal {
    mutable: SpinLock<Mutable>,
}

impl ExitSignal {
    pub fn new() -> SharedRef<ExitSignal> {
        SharedRef::new(ExitSignal {
            mutable: SpinLock::new(Mutable { pending: 0 }),
        })
    }

    /// Records one exit notification.
    pub fn submit(&self) {
        let mut mutable = self.mutable.lock();
        mutable.pending += 1;
    }

    /// Takes all pending notifications at once. Fails with
    /// [`ErrorCode::Empty`] when there is nothing to acknowledge, so a
    /// spurious wakeup in the monitor surfaces instead of looking like an
    /// exit.
    pub fn acknowledge(&self) -> Result<usize, ErrorCode> {
        let mut mutable = self.mutable.lock();
        if mutable.pending == 0 {
            return Err(ErrorCode::Empty);
        }

        let count = mutable.pending;
        mutable.pending = 0;
        Ok(count)
    }

    pub fn pending(&self) -> usize {
        self.mutable.lock().pending
    }
}

impl fmt::Debug for ExitSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExitSignal")
            .field("pending", &self.pending())
            .finish()
    }
}
