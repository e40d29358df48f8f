//! The system-wide interrupt pool.
//!
//! Routes interrupts destined for vCPUs: physical IRQ lines are bound to
//! a vCPU identity, posted lines queue up as pending until the guest (or
//! its monitor) acknowledges them. The pool is shared by every vCPU and
//! synchronizes internally; callers never assume exclusive access.
use arrayvec::ArrayVec;
use hashbrown::HashMap;
use hv_types::error::ErrorCode;
use hv_types::interrupt::Irq;
use hv_types::vcpu::VmId;

use crate::refcount::SharedRef;
use crate::spinlock::SpinLock;

/// How many interrupts may be pending per vCPU before `post` reports
/// overrun. Matches what common interrupt controllers buffer.
const PENDING_MAX: usize = 32;

struct Inner {
    /// Physical IRQ line -> the vCPU it is routed to.
    bindings: HashMap<Irq, VmId>,
    pending: HashMap<VmId, ArrayVec<Irq, PENDING_MAX>>,
}

pub struct IrqPool {
    inner: SpinLock<Inner>,
}

impl IrqPool {
    pub fn new() -> SharedRef<IrqPool> {
        SharedRef::new(IrqPool {
            inner: SpinLock::new(Inner {
                bindings: HashMap::new(),
                pending: HashMap::new(),
            }),
        })
    }

    /// Routes a physical IRQ line to a vCPU. A line has at most one
    /// owner.
    pub fn bind(&self, irq: Irq, vm: VmId) -> Result<(), ErrorCode> {
        let mut inner = self.inner.lock();
        if inner.bindings.contains_key(&irq) {
            return Err(ErrorCode::AlreadyExists);
        }

        inner.bindings.insert(irq, vm);
        Ok(())
    }

    /// Drops every binding and pending interrupt of a vCPU. Called on
    /// vCPU destruction.
    pub fn unbind_all(&self, vm: VmId) {
        let mut inner = self.inner.lock();
        inner.bindings.retain(|_, bound| *bound != vm);
        inner.pending.remove(&vm);
    }

    /// Posts a physical IRQ: marks it pending for whichever vCPU the line
    /// is bound to and reports that vCPU.
    pub fn post(&self, irq: Irq) -> Result<VmId, ErrorCode> {
        let mut inner = self.inner.lock();
        let vm = *inner.bindings.get(&irq).ok_or(ErrorCode::NotFound)?;
        Self::mark_pending(&mut inner, vm, irq)?;
        Ok(vm)
    }

    /// Posts a virtual interrupt directly to a vCPU, bypassing line
    /// routing.
    pub fn post_to(&self, vm: VmId, irq: Irq) -> Result<(), ErrorCode> {
        let mut inner = self.inner.lock();
        Self::mark_pending(&mut inner, vm, irq)
    }

    fn mark_pending(inner: &mut Inner, vm: VmId, irq: Irq) -> Result<(), ErrorCode> {
        let queue = inner.pending.entry(vm).or_default();
        if queue.contains(&irq) {
            // Level-style semantics: an already-pending line stays a
            // single pending entry.
            return Ok(());
        }

        queue.try_push(irq).map_err(|_| ErrorCode::Full)
    }

    /// The oldest pending interrupt for a vCPU, if any. Does not consume
    /// it; delivery completes with [`IrqPool::ack`].
    pub fn pending(&self, vm: VmId) -> Option<Irq> {
        let inner = self.inner.lock();
        inner.pending.get(&vm).and_then(|queue| queue.first().copied())
    }

    /// Completes delivery of a pending interrupt.
    pub fn ack(&self, vm: VmId, irq: Irq) -> Result<(), ErrorCode> {
        let mut inner = self.inner.lock();
        let queue = inner.pending.get_mut(&vm).ok_or(ErrorCode::NotFound)?;
        let pos = queue.iter().position(|p| *p == irq).ok_or(ErrorCode::NotFound)?;
        queue.remove(pos);
        Ok(())
    }
}

/// The pool physical interrupt handlers and vCPUs share, one per system.
pub static SYSTEM_IRQ_POOL: spin::Lazy<SharedRef<IrqPool>> = spin::Lazy::new(IrqPool::new);

/// Entry point for the architecture's interrupt handler: routes a
/// hardware line through the system pool to whichever vCPU it is bound
/// to. Unbound lines belong to the kernel's own drivers, not to a guest.
pub fn handle_physical_irq(irq: Irq) -> Result<VmId, ErrorCode> {
    let vm = SYSTEM_IRQ_POOL.post(irq)?;
    trace!("irq {}: pending for vm {}", irq.as_raw(), vm.as_raw());
    Ok(vm)
}
