//! The vCPU exit-state buffer shared between the kernel and the monitor.
//!
//! The kernel fills this buffer in on every guest exit; the monitor reads
//! the details out-of-band after it has been notified through the exit
//! signal. The layout is `#[repr(C)]` because both sides map the same
//! memory.
use crate::address::GPAddr;
use crate::error::ErrorCode;
use crate::interrupt::Irq;

/// The identity of one vCPU instance.
///
/// Assigned by whoever constructs the vCPU, immutable afterwards, and
/// never reused while the vCPU is alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VmId(u32);

impl VmId {
    pub const fn from_raw(id: u32) -> VmId {
        VmId(id)
    }

    pub const fn as_raw(&self) -> u32 {
        self.0
    }
}

/// Why the guest trapped back into the kernel. Produced once per exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExitReason {
    /// No exit has been recorded yet.
    None = 0,
    /// A physical interrupt arrived while the guest was running.
    ExternalInterrupt = 1,
    /// The preemption timer fired.
    Timer = 2,
    /// The guest issued a hypercall or trapped on I/O.
    Hypercall = 3,
    /// The guest faulted (e.g. a nested page fault).
    Fault = 4,
    /// The guest asked to shut down.
    ShutdownRequest = 5,
    /// The hardware reported an exit this kernel does not understand.
    Unsupported = 6,
}

impl ExitReason {
    pub const fn from_raw(raw: u8) -> Option<ExitReason> {
        match raw {
            0 => Some(ExitReason::None),
            1 => Some(ExitReason::ExternalInterrupt),
            2 => Some(ExitReason::Timer),
            3 => Some(ExitReason::Hypercall),
            4 => Some(ExitReason::Fault),
            5 => Some(ExitReason::ShutdownRequest),
            6 => Some(ExitReason::Unsupported),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
#[repr(u8)]
pub enum FaultKind {
    None = 0,
    Read = 1,
    Write = 2,
    Execute = 3,
}

#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct ExitHypercall {
    pub nr: u64,
    pub args: [u64; 6],
}

#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct ExitFault {
    pub gpaddr: GPAddr,
    pub kind: FaultKind,
}

#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct ExitInterrupt {
    pub irq: u32,
}

#[derive(Clone, Copy)]
#[repr(C)]
pub union ExitInfo {
    none: (),
    pub hypercall: ExitHypercall,
    pub fault: ExitFault,
    pub interrupt: ExitInterrupt,
}

/// A decoded, borrowed view of [`ExitState`].
#[derive(Debug, Clone, Copy)]
pub enum VmExit {
    ExternalInterrupt { irq: Irq },
    Timer,
    Hypercall { nr: u64, args: [u64; 6] },
    Fault { gpaddr: GPAddr, kind: FaultKind },
    ShutdownRequest,
    Unsupported,
}

/// The state buffer itself: an exit-reason tag plus reason-specific
/// details.
#[derive(Clone, Copy)]
#[repr(C)]
pub struct ExitState {
    reason: u8,
    pub info: ExitInfo,
}

impl ExitState {
    pub fn new() -> Self {
        Self {
            reason: ExitReason::None as u8,
            info: ExitInfo { none: () },
        }
    }

    pub fn reason(&self) -> ExitReason {
        // Unknown tags can only come from a buggy or newer writer. Treat
        // them as unsupported exits rather than trusting the value.
        ExitReason::from_raw(self.reason).unwrap_or(ExitReason::Unsupported)
    }

    pub fn set_external_interrupt(&mut self, irq: Irq) {
        self.reason = ExitReason::ExternalInterrupt as u8;
        self.info = ExitInfo {
            interrupt: ExitInterrupt { irq: irq.as_raw() },
        };
    }

    pub fn set_timer(&mut self) {
        self.reason = ExitReason::Timer as u8;
        self.info = ExitInfo { none: () };
    }

    pub fn set_hypercall(&mut self, nr: u64, args: [u64; 6]) {
        self.reason = ExitReason::Hypercall as u8;
        self.info = ExitInfo {
            hypercall: ExitHypercall { nr, args },
        };
    }

    pub fn set_fault(&mut self, gpaddr: GPAddr, kind: FaultKind) {
        self.reason = ExitReason::Fault as u8;
        self.info = ExitInfo {
            fault: ExitFault { gpaddr, kind },
        };
    }

    pub fn set_shutdown_request(&mut self) {
        self.reason = ExitReason::ShutdownRequest as u8;
        self.info = ExitInfo { none: () };
    }

    pub fn set_unsupported(&mut self) {
        self.reason = ExitReason::Unsupported as u8;
        self.info = ExitInfo { none: () };
    }

    /// Decodes the buffer into a [`VmExit`].
    ///
    /// Fails with [`ErrorCode::Empty`] if no exit has been recorded.
    pub fn as_exit(&self) -> Result<VmExit, ErrorCode> {
        let exit = match self.reason() {
            ExitReason::None => return Err(ErrorCode::Empty),
            ExitReason::ExternalInterrupt => {
                // SAFETY: The tag says the interrupt variant was written.
                let interrupt = unsafe { self.info.interrupt };
                VmExit::ExternalInterrupt {
                    irq: Irq::from_raw(interrupt.irq),
                }
            }
            ExitReason::Timer => VmExit::Timer,
            ExitReason::Hypercall => {
                // SAFETY: The tag says the hypercall variant was written.
                let hypercall = unsafe { self.info.hypercall };
                VmExit::Hypercall {
                    nr: hypercall.nr,
                    args: hypercall.args,
                }
            }
            ExitReason::Fault => {
                // SAFETY: The tag says the fault variant was written.
                let fault = unsafe { self.info.fault };
                VmExit::Fault {
                    gpaddr: fault.gpaddr,
                    kind: fault.kind,
                }
            }
            ExitReason::ShutdownRequest => VmExit::ShutdownRequest,
            ExitReason::Unsupported => VmExit::Unsupported,
        };

        Ok(exit)
    }
}

impl Default for ExitState {
    fn default() -> Self {
        Self::new()
    }
}
