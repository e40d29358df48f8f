//! The kernel-resident virtualization backend.
//!
//! This crate turns one virtual CPU into a schedulable kernel entity: it
//! drives the vCPU into and out of guest execution, services exits the
//! kernel can handle silently, and notifies the user-level monitor about
//! everything else.
//!
//! The hardware-specific guest entry/exit mechanism lives behind the
//! [`guest::GuestContext`] trait; the capability system, physical IRQ
//! delivery, and the monitor itself are external collaborators.
#![cfg_attr(target_os = "none", no_std)]

extern crate alloc;

#[macro_use]
mod print;

pub mod cpu;
pub mod guest;
pub mod handle;
pub mod interrupt;
mod panic;
pub mod process;
pub mod refcount;
pub mod scheduler;
pub mod signal;
pub mod spinlock;
pub mod syscall;
pub mod vm;
