//! The monitor process: the owner of a handle table.
//!
//! This kernel keeps the process object minimal. Address spaces and
//! threads of the monitor itself live elsewhere; what matters here is
//! which vCPU and signal objects a given monitor may name.
use core::fmt;

use crate::handle::HandleTable;
use crate::refcount::SharedRef;
use crate::spinlock::SpinLock;

pub struct Process {
    handles: SpinLock<HandleTable>,
}

impl Process {
    pub fn create() -> SharedRef<Process> {
        SharedRef::new(Process {
            handles: SpinLock::new(HandleTable::new()),
        })
    }

    pub fn handles(&self) -> &SpinLock<HandleTable> {
        &self.handles
    }
}

impl fmt::Debug for Process {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Process")
    }
}
