//! The per-CPU job scheduler seam.
//!
//! The scheduler knows nothing about virtualization: it time-slices
//! anything implementing [`Job`]. A vCPU participates by implementing the
//! trait at the lowest priority with a zero quantum, so it never competes
//! for CPU time on its own initiative; it only runs after an event pushed
//! it onto its affined CPU's runqueue.
use alloc::collections::VecDeque;

use hv_types::error::ErrorCode;

use crate::cpu::CpuId;
use crate::refcount::SharedRef;
use crate::spinlock::SpinLock;

pub const NUM_PRIORITY_LEVELS: usize = 4;

/// A scheduling priority. Higher values win.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Priority(u8);

impl Priority {
    pub const MIN: Priority = Priority(0);
    pub const MAX: Priority = Priority((NUM_PRIORITY_LEVELS - 1) as u8);

    pub const fn from_raw(raw: u8) -> Priority {
        assert!((raw as usize) < NUM_PRIORITY_LEVELS);
        Priority(raw)
    }

    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }
}

/// The capability set the scheduler expects from a schedulable entity.
///
/// `proceed` and `exception` take `this: &SharedRef<Self>` because a job
/// may need to re-enqueue itself while handling an exit.
pub trait Job: Send + Sync {
    /// Fixed scheduling priority.
    fn priority(&self) -> Priority;

    /// Time-slice budget in timer ticks. Zero means the job is
    /// event-driven: it runs until its next exit and is never granted a
    /// default round-robin slice.
    fn quantum(&self) -> u32;

    /// The physical CPU this job is bound to.
    fn affinity(&self) -> CpuId;

    /// Hands control to the job. Returns only once the job has yielded
    /// back to the kernel (for a vCPU: a guest exit has landed).
    ///
    /// Returns whether the job actually ran. `false` means the runqueue
    /// entry went stale between the pop and this call (the job was
    /// destroyed or re-affined in the meantime); nothing was executed
    /// and `exception` must not follow.
    fn proceed(this: &SharedRef<Self>, cpu: CpuId) -> bool
    where
        Self: Sized;

    /// Invoked by the trap dispatcher after `proceed` returned, to handle
    /// whatever made the job yield.
    fn exception(this: &SharedRef<Self>, cpu: CpuId)
    where
        Self: Sized;
}

struct Runqueues<J> {
    queues: [VecDeque<SharedRef<J>>; NUM_PRIORITY_LEVELS],
}

/// One CPU's runqueue set. Each physical CPU owns its own instance;
/// cross-CPU enqueue happens only through explicit migration.
pub struct Scheduler<J: Job> {
    runqueues: SpinLock<Runqueues<J>>,
}

impl<J: Job> Scheduler<J> {
    pub const fn new() -> Scheduler<J> {
        Scheduler {
            runqueues: SpinLock::new(Runqueues {
                queues: [const { VecDeque::new() }; NUM_PRIORITY_LEVELS],
            }),
        }
    }

    /// Enqueues a job. A job may sit in a runqueue at most once;
    /// double-enqueue indicates a state-machine bug in the caller and is
    /// rejected rather than coalesced.
    pub fn push(&self, job: SharedRef<J>) -> Result<(), ErrorCode> {
        let prio = job.priority().as_usize();
        let mut runqueues = self.runqueues.lock();
        let queue = &mut runqueues.queues[prio];

        if queue.iter().any(|queued| SharedRef::ptr_eq(queued, &job)) {
            return Err(ErrorCode::AlreadyExists);
        }

        queue.try_reserve(1).map_err(|_| ErrorCode::OutOfMemory)?;
        queue.push_back(job);
        Ok(())
    }

    /// Picks the next job: the head of the highest-priority non-empty
    /// queue. The job is removed; whether it gets re-enqueued is up to
    /// its exit handling.
    pub fn schedule(&self) -> Option<SharedRef<J>> {
        let mut runqueues = self.runqueues.lock();
        runqueues
            .queues
            .iter_mut()
            .rev()
            .find_map(|queue| queue.pop_front())
    }

    /// Removes a job from the runqueue if it is queued. Returns whether
    /// it was.
    pub fn remove(&self, job: &SharedRef<J>) -> bool {
        let prio = job.priority().as_usize();
        let mut runqueues = self.runqueues.lock();
        let queue = &mut runqueues.queues[prio];
        let before = queue.len();
        queue.retain(|queued| !SharedRef::ptr_eq(queued, job));
        queue.len() != before
    }

    pub fn is_queued(&self, job: &SharedRef<J>) -> bool {
        let prio = job.priority().as_usize();
        let runqueues = self.runqueues.lock();
        runqueues.queues[prio]
            .iter()
            .any(|queued| SharedRef::ptr_eq(queued, job))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct TestJob {
        priority: Priority,
    }

    impl Job for TestJob {
        fn priority(&self) -> Priority {
            self.priority
        }

        fn quantum(&self) -> u32 {
            0
        }

        fn affinity(&self) -> CpuId {
            CpuId::new(0)
        }

        fn proceed(_this: &SharedRef<Self>, _cpu: CpuId) -> bool {
            true
        }

        fn exception(_this: &SharedRef<Self>, _cpu: CpuId) {}
    }

    fn job(priority: Priority) -> SharedRef<TestJob> {
        SharedRef::new(TestJob { priority })
    }

    #[test]
    fn test_higher_priority_wins() {
        let scheduler = Scheduler::new();
        let low = job(Priority::MIN);
        let mid = job(Priority::from_raw(2));
        let high = job(Priority::MAX);

        scheduler.push(low.clone()).unwrap();
        scheduler.push(high.clone()).unwrap();
        scheduler.push(mid.clone()).unwrap();

        assert!(SharedRef::ptr_eq(&scheduler.schedule().unwrap(), &high));
        assert!(SharedRef::ptr_eq(&scheduler.schedule().unwrap(), &mid));
        assert!(SharedRef::ptr_eq(&scheduler.schedule().unwrap(), &low));
        assert!(scheduler.schedule().is_none());
    }

    #[test]
    fn test_fifo_within_priority() {
        let scheduler = Scheduler::new();
        let a = job(Priority::MIN);
        let b = job(Priority::MIN);

        scheduler.push(a.clone()).unwrap();
        scheduler.push(b.clone()).unwrap();

        assert!(SharedRef::ptr_eq(&scheduler.schedule().unwrap(), &a));
        assert!(SharedRef::ptr_eq(&scheduler.schedule().unwrap(), &b));
    }

    #[test]
    fn test_double_push_rejected() {
        let scheduler = Scheduler::new();
        let a = job(Priority::MIN);

        scheduler.push(a.clone()).unwrap();
        assert_eq!(scheduler.push(a.clone()), Err(ErrorCode::AlreadyExists));
        assert!(scheduler.is_queued(&a));
    }

    #[test]
    fn test_remove() {
        let scheduler = Scheduler::new();
        let a = job(Priority::MIN);

        scheduler.push(a.clone()).unwrap();
        assert!(scheduler.remove(&a));
        assert!(!scheduler.remove(&a));
        assert!(scheduler.schedule().is_none());
    }

    #[test]
    fn test_zero_quantum_job_is_not_requeued() {
        // Popping a job removes it for good; an event-driven job must be
        // pushed again by whoever made it runnable.
        let scheduler = Scheduler::new();
        let a = job(Priority::MIN);

        scheduler.push(a.clone()).unwrap();
        let picked = scheduler.schedule().unwrap();
        assert!(SharedRef::ptr_eq(&picked, &a));
        assert!(!scheduler.is_queued(&a));
        assert!(scheduler.schedule().is_none());
    }
}
