//! The vCPU kernel object.
//!
//! A [`Vm`] binds an identity, an interrupt pool reference, an exit
//! signal channel, and a hardware guest-execution context into one
//! schedulable entity. The scheduler drives it through [`Job::proceed`],
//! the trap dispatcher through [`Job::exception`]; the two strictly
//! alternate for a given vCPU because it is affined to exactly one CPU
//! and a CPU runs one job at a time.
use alloc::boxed::Box;
use core::cell::UnsafeCell;
use core::fmt;

use hv_types::error::ErrorCode;
use hv_types::interrupt::Irq;
use hv_types::vcpu::ExitReason;
use hv_types::vcpu::ExitState;
use hv_types::vcpu::VmExit;
use hv_types::vcpu::VmId;

use crate::cpu::Cpu;
use crate::cpu::CpuId;
use crate::guest::GuestContext;
use crate::interrupt::IrqPool;
use crate::refcount::SharedRef;
use crate::scheduler::Job;
use crate::scheduler::Priority;
use crate::signal::ExitSignal;
use crate::spinlock::SpinLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Created and registered, waiting for the first resume.
    Constructed,
    /// Eligible to enter the guest once its CPU picks it.
    Runnable,
    /// Between `proceed` and `exception`: the guest is executing, or its
    /// exit is in flight.
    Running,
    /// A qualifying exit was reported; parked until the monitor re-arms
    /// it.
    AwaitingMonitor,
    /// Released. Terminal.
    Destroyed,
}

struct Mutable {
    state: State,
    /// The CPU whose scheduler owns this vCPU. Changes only through
    /// [`Vm::migrate`].
    cpu: &'static Cpu,
}

pub struct Vm {
    id: VmId,
    irq_pool: SharedRef<IrqPool>,
    signal: SharedRef<ExitSignal>,
    /// Shared with the monitor, which reads exit details from it
    /// out-of-band after a notification.
    exit_state: SharedRef<SpinLock<ExitState>>,
    /// Exclusively owned. `UnsafeCell` rather than a lock: the guard
    /// could not be dropped across a guest entry, and no lock is needed
    /// anyway (see the `Sync` impl below).
    ctx: UnsafeCell<Box<dyn GuestContext>>,
    mutable: SpinLock<Mutable>,
}

// SAFETY: `ctx` is touched only between `proceed` and `exception` on the
// CPU this vCPU is affined to. Affinity binding plus the scheduler's
// single-occupancy guarantee serialize those accesses without a lock.
unsafe impl Sync for Vm {}

impl Vm {
    /// The privileged factory call. Binds the new vCPU to `cpu`
    /// immediately; does not start execution.
    ///
    /// `init_ctx` performs the vendor-specific hardware context setup.
    /// If it fails (no virtualization support, control-structure slots
    /// exhausted), the error is returned as-is and no partial vCPU
    /// object survives.
    pub fn create<F>(
        irq_pool: SharedRef<IrqPool>,
        cpu: &'static Cpu,
        exit_state: SharedRef<SpinLock<ExitState>>,
        signal: SharedRef<ExitSignal>,
        init_ctx: F,
        id: VmId,
    ) -> Result<SharedRef<Vm>, ErrorCode>
    where
        F: FnOnce() -> Result<Box<dyn GuestContext>, ErrorCode>,
    {
        let ctx = init_ctx()?;

        Ok(SharedRef::new(Vm {
            id,
            irq_pool,
            signal,
            exit_state,
            ctx: UnsafeCell::new(ctx),
            mutable: SpinLock::new(Mutable {
                state: State::Constructed,
                cpu,
            }),
        }))
    }

    pub fn id(&self) -> VmId {
        self.id
    }

    pub fn is_runnable(&self) -> bool {
        self.mutable.lock().state == State::Runnable
    }

    pub fn is_awaiting_monitor(&self) -> bool {
        self.mutable.lock().state == State::AwaitingMonitor
    }

    /// The guest execution context. Serialized by affinity and
    /// single-occupancy scheduling; see the `Sync` impl.
    #[allow(clippy::mut_from_ref)]
    fn guest_ctx(&self) -> &mut dyn GuestContext {
        unsafe { &mut **self.ctx.get() }
    }

    /// Scheduler entry point: claims the vCPU and enters the guest.
    ///
    /// Does not return until a guest exit has landed back in kernel
    /// context; the trap dispatcher then calls [`Vm::exception`].
    ///
    /// A runqueue pop and this call are not one atomic step, so a legal
    /// destroy or migrate may land in between. That makes the pop stale,
    /// not the kernel buggy: the claim below detects it under the state
    /// lock, skips guest entry, and returns `false` (handing a migrated
    /// vCPU over to its new CPU's runqueue). A `proceed` while `Running`
    /// or parked can never come from that window and stays a fatal
    /// kernel-contract violation.
    pub fn proceed(this: &SharedRef<Vm>, cpu: CpuId) -> bool {
        {
            let mut mutable = this.mutable.lock();
            match mutable.state {
                State::Runnable if mutable.cpu.id() == cpu => {
                    mutable.state = State::Running;
                }
                State::Runnable => {
                    // Migrated after the pop; it runs on the new CPU,
                    // never here.
                    if let Err(err) = mutable.cpu.scheduler().push(this.clone()) {
                        debug_warn!(
                            "vm {}: handover to CPU {} failed: {}",
                            this.id.as_raw(),
                            mutable.cpu.id().as_usize(),
                            err
                        );
                    }
                    return false;
                }
                State::Destroyed => {
                    // Destroyed after the pop; nothing left to run.
                    return false;
                }
                state => panic!("vm {}: proceed while {:?}", this.id.as_raw(), state),
            }
        }

        let reason = {
            let mut exit_state = this.exit_state.lock();
            this.guest_ctx().enter(&mut exit_state)
        };

        // `enter` must have recorded the exit it reported.
        debug_assert_ne!(reason, ExitReason::None);
        true
    }

    /// Trap dispatcher entry point: handles the exit `proceed` came back
    /// with.
    ///
    /// Exits the kernel can service silently (external interrupt, timer)
    /// leave the vCPU runnable with no notification. Everything else
    /// submits exactly one notification on the exit signal and parks the
    /// vCPU until the monitor resumes it.
    pub fn exception(this: &SharedRef<Vm>, cpu: CpuId) {
        let mut mutable = this.mutable.lock();
        if mutable.cpu.id() != cpu {
            panic!(
                "vm {}: exception on CPU {} but affined to CPU {}",
                this.id.as_raw(),
                cpu.as_usize(),
                mutable.cpu.id().as_usize()
            );
        }
        if mutable.state != State::Running {
            panic!(
                "vm {}: exception while {:?}",
                this.id.as_raw(),
                mutable.state
            );
        }

        let (reason, exit) = {
            let exit_state = this.exit_state.lock();
            (this.guest_ctx().decode(&exit_state), exit_state.as_exit())
        };

        match reason {
            ExitReason::ExternalInterrupt => {
                if let Ok(VmExit::ExternalInterrupt { irq }) = exit {
                    if let Err(err) = this.irq_pool.post(irq) {
                        debug_warn!(
                            "vm {}: dropping unroutable irq {}: {}",
                            this.id.as_raw(),
                            irq.as_raw(),
                            err
                        );
                    }
                }
                Self::requeue(this, &mut mutable);
            }
            ExitReason::Timer => {
                // Preemption tick; the hardware already acknowledged it
                // on the way out of the guest.
                Self::requeue(this, &mut mutable);
            }
            ExitReason::None => {
                panic!("vm {}: exception without a recorded exit", this.id.as_raw())
            }
            ExitReason::Hypercall
            | ExitReason::Fault
            | ExitReason::ShutdownRequest
            | ExitReason::Unsupported => {
                // One submission per qualifying exit. The channel does
                // not coalesce; re-arming happens only via an explicit
                // resume once the monitor has read the exit state. A
                // shutdown request is delivered like any other exit and
                // never destroys the vCPU implicitly.
                this.signal.submit();
                mutable.state = State::AwaitingMonitor;
            }
        }
    }

    fn requeue(this: &SharedRef<Vm>, mutable: &mut Mutable) {
        mutable.state = State::Runnable;
        if let Err(err) = mutable.cpu.scheduler().push(this.clone()) {
            debug_warn!("vm {}: requeue failed: {}", this.id.as_raw(), err);
        }
    }

    /// Re-arms a parked vCPU.
    ///
    /// Rejected while `Runnable` or `Running`: a redundant resume means
    /// the caller's exit accounting is off, and surfacing that early
    /// beats desynchronizing it further.
    pub fn resume(this: &SharedRef<Vm>) -> Result<(), ErrorCode> {
        let mut mutable = this.mutable.lock();
        match mutable.state {
            State::Constructed | State::AwaitingMonitor => {
                mutable.cpu.scheduler().push(this.clone())?;
                mutable.state = State::Runnable;
                Ok(())
            }
            State::Runnable | State::Running | State::Destroyed => Err(ErrorCode::InvalidState),
        }
    }

    /// Posts a virtual interrupt to this vCPU. A vCPU parked on its
    /// monitor becomes runnable again: pending interrupts are something
    /// the guest should get to see.
    pub fn inject_irq(this: &SharedRef<Vm>, irq: Irq) -> Result<(), ErrorCode> {
        let mut mutable = this.mutable.lock();
        if mutable.state == State::Destroyed {
            return Err(ErrorCode::InvalidState);
        }

        this.irq_pool.post_to(this.id, irq)?;

        if mutable.state == State::AwaitingMonitor {
            mutable.cpu.scheduler().push(this.clone())?;
            mutable.state = State::Runnable;
        }
        Ok(())
    }

    /// The explicit affinity-change path. Rejected while the vCPU is on
    /// a CPU (`Running`); a queued vCPU moves runqueues atomically.
    pub fn migrate(this: &SharedRef<Vm>, new_cpu: &'static Cpu) -> Result<(), ErrorCode> {
        let mut mutable = this.mutable.lock();
        match mutable.state {
            State::Running => Err(ErrorCode::InUse),
            State::Destroyed => Err(ErrorCode::InvalidState),
            State::Constructed | State::Runnable | State::AwaitingMonitor => {
                let was_queued = mutable.cpu.scheduler().remove(this);
                mutable.cpu = new_cpu;
                if was_queued {
                    new_cpu.scheduler().push(this.clone())?;
                }
                Ok(())
            }
        }
    }

    /// Releases the vCPU.
    ///
    /// Never reachable from `Running`: an in-flight guest entry has to
    /// come back first, so the caller retries after the next exit. This
    /// is the cross-core quiesce, given that only the affined CPU can be
    /// running the vCPU.
    pub fn destroy(this: &SharedRef<Vm>) -> Result<(), ErrorCode> {
        let mut mutable = this.mutable.lock();
        match mutable.state {
            State::Running => Err(ErrorCode::InUse),
            State::Destroyed => Err(ErrorCode::InvalidState),
            State::Constructed | State::Runnable | State::AwaitingMonitor => {
                mutable.cpu.scheduler().remove(this);
                this.irq_pool.unbind_all(this.id);
                mutable.state = State::Destroyed;
                Ok(())
            }
        }
    }
}

impl Job for Vm {
    fn priority(&self) -> Priority {
        // Never competes for CPU time on its own initiative.
        Priority::MIN
    }

    fn quantum(&self) -> u32 {
        0
    }

    fn affinity(&self) -> CpuId {
        self.mutable.lock().cpu.id()
    }

    fn proceed(this: &SharedRef<Self>, cpu: CpuId) -> bool {
        Vm::proceed(this, cpu)
    }

    fn exception(this: &SharedRef<Self>, cpu: CpuId) {
        Vm::exception(this, cpu);
    }
}

impl fmt::Debug for Vm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Vm").field("id", &self.id.as_raw()).finish()
    }
}
