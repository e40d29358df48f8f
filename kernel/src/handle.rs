//! Handles: the monitor's capabilities to kernel objects.
//!
//! A handle pairs a reference to a kernel object with the rights its
//! owner holds on it. Syscalls name objects by handle ID through the
//! per-process [`HandleTable`].
use core::fmt;

use hashbrown::HashMap;
use hv_types::error::ErrorCode;
use hv_types::handle::HANDLE_ID_MASK;
use hv_types::handle::HandleId;
use hv_types::handle::HandleRights;

use crate::refcount::SharedRef;
use crate::signal::ExitSignal;
use crate::vm::Vm;

/// The maximum number of open handles per process.
pub const NUM_HANDLES_MAX: usize = 128;

pub struct Handle<T> {
    object: SharedRef<T>,
    rights: HandleRights,
}

impl<T> Handle<T> {
    pub fn new(object: SharedRef<T>, rights: HandleRights) -> Handle<T> {
        Handle { object, rights }
    }

    /// The only way to get at the object. Callers state the rights the
    /// operation needs up front.
    pub fn authorize(&self, required: HandleRights) -> Result<&SharedRef<T>, ErrorCode> {
        if !self.rights.is_capable(required) {
            return Err(ErrorCode::NotAllowed);
        }

        Ok(&self.object)
    }
}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Handle<T> {
        Handle {
            object: self.object.clone(),
            rights: self.rights,
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("object", &self.object)
            .field("rights", &self.rights)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub enum AnyHandle {
    Vm(Handle<Vm>),
    Signal(Handle<ExitSignal>),
}

impl AnyHandle {
    pub fn as_vm(&self) -> Result<&Handle<Vm>, ErrorCode> {
        match self {
            AnyHandle::Vm(handle) => Ok(handle),
            _ => Err(ErrorCode::UnexpectedType),
        }
    }

    pub fn as_signal(&self) -> Result<&Handle<ExitSignal>, ErrorCode> {
        match self {
            AnyHandle::Signal(handle) => Ok(handle),
            _ => Err(ErrorCode::UnexpectedType),
        }
    }
}

impl From<Handle<Vm>> for AnyHandle {
    fn from(handle: Handle<Vm>) -> AnyHandle {
        AnyHandle::Vm(handle)
    }
}

impl From<Handle<ExitSignal>> for AnyHandle {
    fn from(handle: Handle<ExitSignal>) -> AnyHandle {
        AnyHandle::Signal(handle)
    }
}

pub struct HandleTable {
    handles: HashMap<HandleId, AnyHandle>,
    next_id: i32,
}

impl HandleTable {
    pub fn new() -> HandleTable {
        HandleTable {
            handles: HashMap::new(),
            // Zero stays reserved as the "no handle" value.
            next_id: 1,
        }
    }

    pub fn insert<H: Into<AnyHandle>>(&mut self, handle: H) -> Result<HandleId, ErrorCode> {
        if self.handles.len() >= NUM_HANDLES_MAX {
            return Err(ErrorCode::TooManyHandles);
        }

        // The table is below capacity, so probing terminates.
        loop {
            let id = HandleId::from_raw(self.next_id);
            self.next_id = (self.next_id % HANDLE_ID_MASK) + 1;
            if !self.handles.contains_key(&id) {
                self.handles.insert(id, handle.into());
                return Ok(id);
            }
        }
    }

    pub fn get(&self, id: HandleId) -> Result<&AnyHandle, ErrorCode> {
        self.handles.get(&id).ok_or(ErrorCode::NotFound)
    }

    pub fn remove(&mut self, id: HandleId) -> Result<AnyHandle, ErrorCode> {
        self.handles.remove(&id).ok_or(ErrorCode::NotFound)
    }

    pub fn close(&mut self, id: HandleId) -> Result<(), ErrorCode> {
        self.remove(id).map(|_| ())
    }
}

impl Default for HandleTable {
    fn default() -> HandleTable {
        HandleTable::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signal_handle() -> Handle<ExitSignal> {
        Handle::new(ExitSignal::new(), HandleRights::READ)
    }

    #[test]
    fn test_insert_allocates_distinct_ids() {
        let mut table = HandleTable::new();
        let id1 = table.insert(signal_handle()).unwrap();
        let id2 = table.insert(signal_handle()).unwrap();

        assert_ne!(id1, id2);
        assert!(table.get(id1).is_ok());
        assert!(table.get(id2).is_ok());
    }

    #[test]
    fn test_close_frees_slot() {
        let mut table = HandleTable::new();
        let id = table.insert(signal_handle()).unwrap();

        table.close(id).unwrap();
        assert!(matches!(table.get(id), Err(ErrorCode::NotFound)));
        assert!(matches!(table.close(id), Err(ErrorCode::NotFound)));
    }

    #[test]
    fn test_table_capacity_enforced() {
        let mut table = HandleTable::new();
        for _ in 0..NUM_HANDLES_MAX {
            table.insert(signal_handle()).unwrap();
        }

        assert!(matches!(
            table.insert(signal_handle()),
            Err(ErrorCode::TooManyHandles)
        ));
    }

    #[test]
    fn test_wrong_type_downcast_rejected() {
        let mut table = HandleTable::new();
        let id = table.insert(signal_handle()).unwrap();

        let any = table.get(id).unwrap();
        assert!(any.as_signal().is_ok());
        assert!(matches!(any.as_vm(), Err(ErrorCode::UnexpectedType)));
    }

    #[test]
    fn test_rights_checked_on_access() {
        let handle = Handle::new(ExitSignal::new(), HandleRights::READ);

        assert!(handle.authorize(HandleRights::READ).is_ok());
        assert!(matches!(
            handle.authorize(HandleRights::WRITE),
            Err(ErrorCode::NotAllowed)
        ));
    }
}
