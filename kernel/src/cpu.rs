//! Physical CPU bookkeeping.
//!
//! Each CPU runs its own scheduler instance; a vCPU is affined to exactly
//! one CPU and only ever enters guest execution there.
use hv_types::error::ErrorCode;

use crate::scheduler::Job;
use crate::scheduler::Scheduler;
use crate::vm::Vm;

pub const NUM_CPUS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CpuId(u8);

impl CpuId {
    pub const fn new(id: u8) -> CpuId {
        assert!((id as usize) < NUM_CPUS);
        CpuId(id)
    }

    pub fn from_raw_isize(raw: isize) -> Result<CpuId, ErrorCode> {
        match u8::try_from(raw) {
            Ok(id) if (id as usize) < NUM_CPUS => Ok(CpuId(id)),
            _ => Err(ErrorCode::InvalidArg),
        }
    }

    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }
}

/// One physical CPU: its identity and its runqueues.
pub struct Cpu {
    id: CpuId,
    scheduler: Scheduler<Vm>,
}

impl Cpu {
    pub const fn new(id: CpuId) -> Cpu {
        Cpu {
            id,
            scheduler: Scheduler::new(),
        }
    }

    pub fn id(&self) -> CpuId {
        self.id
    }

    pub fn scheduler(&self) -> &Scheduler<Vm> {
        &self.scheduler
    }

    /// Runs the next runnable vCPU on this CPU, if any.
    ///
    /// `proceed` hands control to the guest and returns only once a guest
    /// exit has landed back in kernel context; the `exception` call right
    /// after is the trap dispatcher's leg of that round trip. On hardware
    /// the two calls bracket the actual world switch.
    pub fn run_next(&self) -> bool {
        let Some(vm) = self.scheduler.schedule() else {
            return false;
        };

        // The pop above and the claim inside `proceed` are two steps; a
        // destroy or migrate landing in between makes this entry stale
        // and `proceed` declines it.
        if !Job::proceed(&vm, self.id) {
            return false;
        }

        Job::exception(&vm, self.id);
        true
    }
}

static CPUS: [Cpu; NUM_CPUS] = [
    Cpu::new(CpuId::new(0)),
    Cpu::new(CpuId::new(1)),
    Cpu::new(CpuId::new(2)),
    Cpu::new(CpuId::new(3)),
];

/// The system-wide CPU table.
pub fn cpu(id: CpuId) -> &'static Cpu {
    &CPUS[id.as_usize()]
}
