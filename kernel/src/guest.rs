//! The hardware guest-execution boundary.
//!
//! Everything vendor-specific about hardware virtualization (VT-x vs
//! AMD-V instruction sequences, control-structure formats, register
//! save/restore) sits behind [`GuestContext`]. The vCPU core is written
//! against this contract only; the concrete implementation is chosen
//! once, when the vCPU is constructed.
use hv_types::vcpu::ExitReason;
use hv_types::vcpu::ExitState;

/// One vCPU's hardware execution context: the architectural register
/// snapshot and the handle to the hardware control structure.
///
/// Owned exclusively by its vCPU and touched only by the CPU currently
/// running it; affinity plus single-occupancy scheduling serialize all
/// access, so implementations need no internal locking.
pub trait GuestContext: Send {
    /// Performs the vendor-specific guest launch/resume.
    ///
    /// Does not return until the hardware raises a guest exit. By then
    /// the exit details have been recorded into `state` (the buffer the
    /// monitor also maps) and the decoded reason is returned. The calling
    /// kernel thread's register state is transiently overwritten by guest
    /// state during the call.
    fn enter(&mut self, state: &mut ExitState) -> ExitReason;

    /// Decodes the exit reason recorded in `state`. Pure inspection; no
    /// hardware side effects.
    fn decode(&self, state: &ExitState) -> ExitReason;
}

#[cfg(test)]
pub(crate) mod scripted {
    //! A synthetic guest for exercising the vCPU state machine: a queue
    //! of pre-scripted exits played back one per `enter` call.
    use alloc::collections::VecDeque;

    use hv_types::address::GPAddr;
    use hv_types::interrupt::Irq;
    use hv_types::vcpu::FaultKind;

    use super::*;

    #[derive(Clone, Copy)]
    pub enum ScriptedExit {
        ExternalInterrupt(Irq),
        Timer,
        Hypercall { nr: u64, args: [u64; 6] },
        Fault { gpaddr: GPAddr, kind: FaultKind },
        ShutdownRequest,
        Unsupported,
    }

    pub struct ScriptedContext {
        script: VecDeque<ScriptedExit>,
    }

    impl ScriptedContext {
        pub fn new<I: IntoIterator<Item = ScriptedExit>>(script: I) -> ScriptedContext {
            ScriptedContext {
                script: script.into_iter().collect(),
            }
        }
    }

    impl GuestContext for ScriptedContext {
        fn enter(&mut self, state: &mut ExitState) -> ExitReason {
            let exit = self.script.pop_front().expect("script ran out of exits");
            match exit {
                ScriptedExit::ExternalInterrupt(irq) => state.set_external_interrupt(irq),
                ScriptedExit::Timer => state.set_timer(),
                ScriptedExit::Hypercall { nr, args } => state.set_hypercall(nr, args),
                ScriptedExit::Fault { gpaddr, kind } => state.set_fault(gpaddr, kind),
                ScriptedExit::ShutdownRequest => state.set_shutdown_request(),
                ScriptedExit::Unsupported => state.set_unsupported(),
            }
            state.reason()
        }

        fn decode(&self, state: &ExitState) -> ExitReason {
            state.reason()
        }
    }
}
