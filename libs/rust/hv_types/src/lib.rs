//! Types shared between the kernel's virtualization backend and the
//! user-level virtual machine monitor.
//!
//! Everything the monitor reads out of kernel-provided memory, or passes
//! across the syscall boundary, is defined here so both sides agree on
//! the exact layout.
#![no_std]

pub mod address;
pub mod error;
pub mod handle;
pub mod interrupt;
pub mod syscall;
pub mod vcpu;
