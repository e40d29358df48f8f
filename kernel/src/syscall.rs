//! System call handlers.
//!
//! The monitor drives its vCPUs exclusively through this surface. vCPU
//! creation is a privileged kernel-internal operation ([`crate::vm::Vm::create`])
//! and has no syscall; everything here operates on handles the monitor
//! already holds.
use hv_types::error::ErrorCode;
use hv_types::handle::HandleId;
use hv_types::handle::HandleRights;
use hv_types::interrupt::Irq;
use hv_types::syscall::RetVal;
use hv_types::syscall::SYS_HANDLE_CLOSE;
use hv_types::syscall::SYS_SIGNAL_ACK;
use hv_types::syscall::SYS_VM_DESTROY;
use hv_types::syscall::SYS_VM_INJECT_IRQ;
use hv_types::syscall::SYS_VM_RESUME;

use crate::handle::Handle;
use crate::process::Process;
use crate::refcount::SharedRef;
use crate::signal::ExitSignal;
use crate::vm::Vm;

fn handle_close(current: &Process, handle: HandleId) -> Result<(), ErrorCode> {
    current.handles().lock().close(handle)
}

fn lookup_vm(
    current: &Process,
    handle: HandleId,
    required: HandleRights,
) -> Result<SharedRef<Vm>, ErrorCode> {
    let table = current.handles().lock();
    let vm = table.get(handle)?.as_vm()?.authorize(required)?.clone();
    Ok(vm)
}

fn vm_resume(current: &Process, handle: HandleId) -> Result<(), ErrorCode> {
    let vm = lookup_vm(current, handle, HandleRights::EXEC)?;
    Vm::resume(&vm)
}

fn vm_inject_irq(current: &Process, handle: HandleId, irq: Irq) -> Result<(), ErrorCode> {
    let vm = lookup_vm(current, handle, HandleRights::WRITE)?;
    Vm::inject_irq(&vm, irq)
}

fn vm_destroy(current: &Process, handle: HandleId) -> Result<(), ErrorCode> {
    let vm = lookup_vm(current, handle, HandleRights::WRITE)?;

    // The handle outlives a failed attempt so the monitor can retry
    // after the next exit brings the vCPU off its CPU.
    Vm::destroy(&vm)?;
    current.handles().lock().close(handle)
}

fn signal_ack(current: &Process, handle: HandleId) -> Result<usize, ErrorCode> {
    let signal = {
        let table = current.handles().lock();
        table
            .get(handle)?
            .as_signal()?
            .authorize(HandleRights::READ)?
            .clone()
    };

    signal.acknowledge()
}

fn do_syscall_inner(
    current: &Process,
    n: isize,
    a0: isize,
    a1: isize,
) -> Result<RetVal, ErrorCode> {
    let n = u8::try_from(n).map_err(|_| ErrorCode::InvalidSyscall)?;
    match n {
        SYS_HANDLE_CLOSE => {
            let handle = HandleId::from_raw_isize(a0)?;
            handle_close(current, handle)?;
            Ok(().into())
        }
        SYS_VM_RESUME => {
            let handle = HandleId::from_raw_isize(a0)?;
            vm_resume(current, handle)?;
            Ok(().into())
        }
        SYS_VM_INJECT_IRQ => {
            let handle = HandleId::from_raw_isize(a0)?;
            let irq = Irq::from_raw_isize(a1)?;
            vm_inject_irq(current, handle, irq)?;
            Ok(().into())
        }
        SYS_VM_DESTROY => {
            let handle = HandleId::from_raw_isize(a0)?;
            vm_destroy(current, handle)?;
            Ok(().into())
        }
        SYS_SIGNAL_ACK => {
            let handle = HandleId::from_raw_isize(a0)?;
            let count = signal_ack(current, handle)?;
            Ok(count.into())
        }
        _ => Err(ErrorCode::InvalidSyscall),
    }
}

/// The syscall entry point. Errors become negative return values.
pub fn do_syscall(current: &Process, n: isize, a0: isize, a1: isize) -> RetVal {
    match do_syscall_inner(current, n, a0, a1) {
        Ok(ret) => ret,
        Err(err) => {
            trace!("syscall {} failed: {}", n, err);
            err.into()
        }
    }
}

/// Grants a monitor process handles to a vCPU and its exit signal.
/// Part of the privileged setup path, alongside [`Vm::create`].
pub fn grant_vm_handles(
    current: &Process,
    vm: SharedRef<Vm>,
    signal: SharedRef<ExitSignal>,
) -> Result<(HandleId, HandleId), ErrorCode> {
    let mut table = current.handles().lock();
    let vm_id = table.insert(Handle::new(
        vm,
        HandleRights::READ | HandleRights::WRITE | HandleRights::EXEC,
    ))?;
    let signal_id = match table.insert(Handle::new(signal, HandleRights::READ)) {
        Ok(id) => id,
        Err(err) => {
            // Leave no half-granted pair behind.
            let _ = table.close(vm_id);
            return Err(err);
        }
    };

    Ok((vm_id, signal_id))
}

#[cfg(test)]
mod tests {
    use alloc::boxed::Box;

    use hv_types::vcpu::ExitState;
    use hv_types::vcpu::VmExit;
    use hv_types::vcpu::VmId;

    use super::*;
    use crate::cpu::Cpu;
    use crate::cpu::CpuId;
    use crate::guest::GuestContext;
    use crate::guest::scripted::ScriptedContext;
    use crate::guest::scripted::ScriptedExit;
    use crate::interrupt::IrqPool;
    use crate::signal::ExitSignal;
    use crate::spinlock::SpinLock;

    struct World {
        cpu: &'static Cpu,
        process: SharedRef<Process>,
        exit_state: SharedRef<SpinLock<ExitState>>,
        signal: SharedRef<ExitSignal>,
        pool: SharedRef<IrqPool>,
        vm_handle: HandleId,
        signal_handle: HandleId,
    }

    fn world(script: Vec<ScriptedExit>) -> World {
        let cpu: &'static Cpu = Box::leak(Box::new(Cpu::new(CpuId::new(0))));
        let process = Process::create();
        let pool = IrqPool::new();
        let signal = ExitSignal::new();
        let exit_state = SharedRef::new(SpinLock::new(ExitState::new()));

        let vm = Vm::create(
            pool.clone(),
            cpu,
            exit_state.clone(),
            signal.clone(),
            move || Ok(Box::new(ScriptedContext::new(script)) as Box<dyn GuestContext>),
            VmId::from_raw(7),
        )
        .unwrap();

        let (vm_handle, signal_handle) =
            grant_vm_handles(&process, vm, signal.clone()).unwrap();

        World {
            cpu,
            process,
            exit_state,
            signal,
            pool,
            vm_handle,
            signal_handle,
        }
    }

    fn syscall(w: &World, n: u8, a0: isize, a1: isize) -> isize {
        do_syscall(&w.process, n as isize, a0, a1).as_isize()
    }

    #[test]
    fn test_monitor_drives_vcpu_end_to_end() {
        let w = world(vec![
            ScriptedExit::Hypercall {
                nr: 42,
                args: [1, 2, 3, 4, 5, 6],
            },
            ScriptedExit::Timer,
            ScriptedExit::ShutdownRequest,
        ]);

        // Arm the vCPU and let CPU 0 run it into its first exit.
        assert_eq!(syscall(&w, SYS_VM_RESUME, w.vm_handle.as_raw() as isize, 0), 0);
        assert!(w.cpu.run_next());

        // Exactly one notification; details readable out-of-band.
        assert_eq!(
            syscall(&w, SYS_SIGNAL_ACK, w.signal_handle.as_raw() as isize, 0),
            1
        );
        match w.exit_state.lock().as_exit().unwrap() {
            VmExit::Hypercall { nr, args } => {
                assert_eq!(nr, 42);
                assert_eq!(args, [1, 2, 3, 4, 5, 6]);
            }
            exit => panic!("unexpected exit: {:?}", exit),
        }

        // Timer exit is serviced silently; the shutdown request after it
        // produces the next notification.
        assert_eq!(syscall(&w, SYS_VM_RESUME, w.vm_handle.as_raw() as isize, 0), 0);
        assert!(w.cpu.run_next());
        assert!(w.cpu.run_next());
        assert_eq!(
            syscall(&w, SYS_SIGNAL_ACK, w.signal_handle.as_raw() as isize, 0),
            1
        );

        // Shutdown never destroys implicitly; that stays the monitor's
        // decision.
        assert_eq!(syscall(&w, SYS_VM_DESTROY, w.vm_handle.as_raw() as isize, 0), 0);
        assert_eq!(
            syscall(&w, SYS_VM_RESUME, w.vm_handle.as_raw() as isize, 0),
            ErrorCode::NotFound as isize
        );
    }

    #[test]
    fn test_inject_irq_via_syscall() {
        let w = world(vec![ScriptedExit::Hypercall { nr: 0, args: [0; 6] }]);

        assert_eq!(syscall(&w, SYS_VM_RESUME, w.vm_handle.as_raw() as isize, 0), 0);
        assert!(w.cpu.run_next());

        assert_eq!(
            syscall(&w, SYS_VM_INJECT_IRQ, w.vm_handle.as_raw() as isize, 33),
            0
        );
        assert_eq!(w.pool.pending(VmId::from_raw(7)), Some(Irq::from_raw(33)));
        // The pending interrupt re-armed the vCPU without a resume.
        assert_eq!(
            syscall(&w, SYS_VM_RESUME, w.vm_handle.as_raw() as isize, 0),
            ErrorCode::InvalidState as isize
        );
    }

    #[test]
    fn test_rights_enforced_per_operation() {
        let w = world(vec![]);

        // Signal handles are read-only views; vCPU operations on them
        // fail on type, acknowledge on an empty channel fails cleanly.
        assert_eq!(
            syscall(&w, SYS_VM_RESUME, w.signal_handle.as_raw() as isize, 0),
            ErrorCode::UnexpectedType as isize
        );
        assert_eq!(
            syscall(&w, SYS_SIGNAL_ACK, w.vm_handle.as_raw() as isize, 0),
            ErrorCode::UnexpectedType as isize
        );
        assert_eq!(
            syscall(&w, SYS_SIGNAL_ACK, w.signal_handle.as_raw() as isize, 0),
            ErrorCode::Empty as isize
        );

        // A weaker handle to the same vCPU cannot resume it.
        let weak = {
            let table = w.process.handles().lock();
            let vm = table.get(w.vm_handle).unwrap().as_vm().unwrap().clone();
            drop(table);
            let vm = vm.authorize(HandleRights::READ).unwrap().clone();
            w.process
                .handles()
                .lock()
                .insert(Handle::new(vm, HandleRights::READ))
                .unwrap()
        };
        assert_eq!(
            syscall(&w, SYS_VM_RESUME, weak.as_raw() as isize, 0),
            ErrorCode::NotAllowed as isize
        );
    }

    #[test]
    fn test_invalid_syscall_numbers_rejected() {
        let w = world(vec![]);

        assert_eq!(syscall(&w, 200, 0, 0), ErrorCode::InvalidSyscall as isize);
        assert_eq!(
            do_syscall(&w.process, -1, 0, 0).as_isize(),
            ErrorCode::InvalidSyscall as isize
        );
        assert_eq!(
            syscall(&w, SYS_VM_RESUME, 999, 0),
            ErrorCode::NotFound as isize
        );
    }

    #[test]
    fn test_handle_close() {
        let w = world(vec![]);

        assert_eq!(
            syscall(&w, SYS_HANDLE_CLOSE, w.signal_handle.as_raw() as isize, 0),
            0
        );
        assert_eq!(
            syscall(&w, SYS_SIGNAL_ACK, w.signal_handle.as_raw() as isize, 0),
            ErrorCode::NotFound as isize
        );
        // The object itself lives on while other references exist.
        w.signal.submit();
        assert_eq!(w.signal.pending(), 1);
    }
}
