use crate::error::ErrorCode;

pub const SYS_HANDLE_CLOSE: u8 = 0;
pub const SYS_VM_RESUME: u8 = 1;
pub const SYS_VM_INJECT_IRQ: u8 = 2;
pub const SYS_VM_DESTROY: u8 = 3;
pub const SYS_SIGNAL_ACK: u8 = 4;

/// The raw return value of a system call. Negative values are error codes.
#[derive(Debug, Clone, Copy)]
#[repr(transparent)]
pub struct RetVal(isize);

impl RetVal {
    pub fn as_isize(&self) -> isize {
        self.0
    }
}

impl<T> From<Result<T, ErrorCode>> for RetVal
where
    T: Into<RetVal>,
{
    fn from(value: Result<T, ErrorCode>) -> Self {
        match value {
            Ok(value) => value.into(),
            Err(err) => RetVal(err as isize),
        }
    }
}

impl From<()> for RetVal {
    fn from(_: ()) -> Self {
        RetVal(0)
    }
}

impl From<usize> for RetVal {
    fn from(value: usize) -> Self {
        RetVal(value as isize)
    }
}

impl From<ErrorCode> for RetVal {
    fn from(value: ErrorCode) -> Self {
        RetVal(value as isize)
    }
}
