use core::fmt;

macro_rules! define_errors {
    ($($name:ident = $value:expr),* $(,)?) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(isize)]
        pub enum ErrorCode {
            $($name = $value,)*
        }

        impl From<isize> for ErrorCode {
            fn from(value: isize) -> Self {
                match value {
                    $($value => ErrorCode::$name,)*
                    _ => ErrorCode::InvalidErrorCode,
                }
            }
        }
    };
}

define_errors!(
    NotSupported = -1,
    NotAllowed = -2,
    NotFound = -3,
    InvalidSyscall = -4,
    UnexpectedType = -5,
    AlreadyExists = -6,
    TooManyHandles = -7,
    OutOfMemory = -8,
    Empty = -9,
    Full = -10,
    InvalidArg = -11,
    InvalidState = -12,
    InUse = -13,
    InvalidErrorCode = -14,
);

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}
