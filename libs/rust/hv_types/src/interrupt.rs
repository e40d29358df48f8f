use crate::error::ErrorCode;

/// An interrupt line number, virtual or physical.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Irq(u32);

impl Irq {
    pub const fn from_raw(irq: u32) -> Self {
        Self(irq)
    }

    pub fn from_raw_isize(raw: isize) -> Result<Self, ErrorCode> {
        match u32::try_from(raw) {
            Ok(raw) => Ok(Self(raw)),
            Err(_) => Err(ErrorCode::InvalidArg),
        }
    }

    pub const fn as_raw(&self) -> u32 {
        self.0
    }
}
