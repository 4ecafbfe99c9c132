//! Task state, sleep/wake, and the preemption accounting the rest of the
//! core hangs off.
//!
//! The model is a single logical CPU: cooperative inside the kernel,
//! preempted between tasks by the timer IRQ. Tasks themselves are created
//! by the process layer; this module owns their scheduling state, the
//! ordered list of sleeping tasks, the wait-channel tags used for targeted
//! wake-up, and the two counters that gate rescheduling and interrupt
//! nesting.
//!
//! Context switching is delegated to a switch hook installed by the
//! embedding kernel (the arch layer on hardware, a thread-parking harness
//! under test). `schedule` picks the next runnable task and flips the
//! bookkeeping; the hook is responsible for not returning until the
//! calling task is current again.

use crate::arch::TrapFrame;
use crate::params::MAX_NESTED_IRQS;
use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU32, Ordering};
use spin::{Mutex, RwLock};

pub type Tid = u32;

/// Task scheduling states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Currently executing on the CPU.
    Running,
    /// Ready to run, waiting for the CPU.
    Runnable,
    /// Blocked on a wait channel.
    Sleeping,
    /// Exited, not yet reaped.
    Zombie,
}

/// What a sleeping task is blocked on.
///
/// A tagged variant instead of a raw pointer + kind pair: targeted wake-up
/// compares channels directly, no casts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitChannel {
    /// Blocked in kernel-mutex acquisition; payload is the mutex id.
    Mutex(u64),
}

struct Task {
    state: TaskState,
    wait: Option<WaitChannel>,
    saved_frame: Option<TrapFrame>,
}

struct SchedInner {
    tasks: BTreeMap<Tid, Task>,
    current: Tid,
    /// Sleeping tasks in the order they went to sleep. Wake-up scans from
    /// the front, so the earliest sleeper on a channel wins; this order is
    /// part of the mutex fairness contract and must stay stable.
    sleeping: Vec<Tid>,
}

/// Called by `schedule` after the bookkeeping switch; must not return
/// until the calling task is current again.
pub type SwitchHook = Box<dyn Fn(&Scheduler) + Send + Sync>;

pub struct Scheduler {
    inner: Mutex<SchedInner>,
    next_tid: AtomicU32,
    /// Depth of nested "preemption disabled" regions.
    preempt_count: AtomicU32,
    /// Stack of in-service interrupt vectors; its depth is the interrupt
    /// nesting level.
    nested_irqs: Mutex<heapless::Vec<u8, MAX_NESTED_IRQS>>,
    switch_hook: RwLock<Option<SwitchHook>>,
}

impl Scheduler {
    /// A fresh scheduler with the boot task (tid 1) current and running.
    pub fn new() -> Self {
        let mut tasks = BTreeMap::new();
        tasks.insert(
            1,
            Task {
                state: TaskState::Running,
                wait: None,
                saved_frame: None,
            },
        );
        Self {
            inner: Mutex::new(SchedInner {
                tasks,
                current: 1,
                sleeping: Vec::new(),
            }),
            next_tid: AtomicU32::new(2),
            preempt_count: AtomicU32::new(0),
            nested_irqs: Mutex::new(heapless::Vec::new()),
            switch_hook: RwLock::new(None),
        }
    }

    /// Install the context-switch hook. See [`SwitchHook`].
    pub fn set_switch_hook(&self, hook: SwitchHook) {
        *self.switch_hook.write() = Some(hook);
    }

    /// Register a new runnable task and return its id.
    pub fn create_task(&self) -> Tid {
        let tid = self.next_tid.fetch_add(1, Ordering::Relaxed);
        self.inner.lock().tasks.insert(
            tid,
            Task {
                state: TaskState::Runnable,
                wait: None,
                saved_frame: None,
            },
        );
        tid
    }

    pub fn current_task(&self) -> Tid {
        self.inner.lock().current
    }

    pub fn task_state(&self, tid: Tid) -> Option<TaskState> {
        self.inner.lock().tasks.get(&tid).map(|t| t.state)
    }

    pub fn task_wait_channel(&self, tid: Tid) -> Option<WaitChannel> {
        self.inner.lock().tasks.get(&tid).and_then(|t| t.wait)
    }

    /// Stash the interrupted register frame on the current task.
    pub fn save_state(&self, frame: &TrapFrame) {
        let mut inner = self.inner.lock();
        let cur = inner.current;
        if let Some(t) = inner.tasks.get_mut(&cur) {
            t.saved_frame = Some(*frame);
        }
    }

    pub fn saved_state(&self, tid: Tid) -> Option<TrapFrame> {
        self.inner.lock().tasks.get(&tid).and_then(|t| t.saved_frame)
    }

    // ---- preemption & interrupt nesting -------------------------------

    pub fn disable_preemption(&self) {
        self.preempt_count.fetch_add(1, Ordering::SeqCst);
    }

    pub fn enable_preemption(&self) {
        let prev = self.preempt_count.fetch_sub(1, Ordering::SeqCst);
        assert!(prev > 0, "preemption enabled below zero");
    }

    pub fn preempt_count(&self) -> u32 {
        self.preempt_count.load(Ordering::SeqCst)
    }

    pub fn preemption_enabled(&self) -> bool {
        self.preempt_count() == 0
    }

    /// Record entry into the interrupt context for vector `vec`.
    pub fn push_nested_irq(&self, vec: u8) {
        self.nested_irqs
            .lock()
            .push(vec)
            .expect("interrupt nesting too deep");
    }

    pub fn pop_nested_irq(&self) -> u8 {
        self.nested_irqs
            .lock()
            .pop()
            .expect("interrupt nesting underflow")
    }

    /// Depth of the in-service interrupt stack.
    pub fn irq_depth(&self) -> usize {
        self.nested_irqs.lock().len()
    }

    /// True while running in hardware-interrupt context.
    pub fn in_irq(&self) -> bool {
        self.irq_depth() > 0
    }

    // ---- sleep & wake -------------------------------------------------

    /// Put the current task to sleep on `chan`.
    ///
    /// Must be called with preemption disabled; the caller is expected to
    /// re-enable preemption and yield afterwards. The task is appended to
    /// the sleeping list, preserving wake-up order.
    pub fn sleep_current(&self, chan: WaitChannel) {
        assert!(!self.preemption_enabled(), "sleep with preemption enabled");
        let mut inner = self.inner.lock();
        let cur = inner.current;
        let task = inner.tasks.get_mut(&cur).expect("current task missing");
        debug_assert!(task.wait.is_none());
        task.state = TaskState::Sleeping;
        task.wait = Some(chan);
        inner.sleeping.push(cur);
    }

    /// Wake the first task sleeping on `chan`, if any.
    ///
    /// The task becomes runnable with its wait channel cleared; later
    /// sleepers on the same channel are untouched.
    pub fn wake_first(&self, chan: WaitChannel) -> Option<Tid> {
        let mut inner = self.inner.lock();
        let pos = inner
            .sleeping
            .iter()
            .position(|tid| inner.tasks.get(tid).and_then(|t| t.wait) == Some(chan))?;
        let tid = inner.sleeping.remove(pos);
        let task = inner.tasks.get_mut(&tid).expect("sleeping task missing");
        debug_assert_eq!(task.state, TaskState::Sleeping);
        task.state = TaskState::Runnable;
        task.wait = None;
        Some(tid)
    }

    /// Mark the current task as exited and hand the CPU to the next
    /// runnable one. The exit path never returns to the dead task, so
    /// the switch is pure bookkeeping from its side.
    pub fn exit_current(&self) {
        {
            let mut inner = self.inner.lock();
            let cur = inner.current;
            if let Some(t) = inner.tasks.get_mut(&cur) {
                t.state = TaskState::Zombie;
                t.wait = None;
            }
        }
        if let Some(next) = self.pick_next() {
            self.make_current(next);
        }
    }

    // ---- switching ----------------------------------------------------

    /// Hand the CPU to `tid` (which must be runnable). The previous
    /// current task is demoted to runnable unless it already left the
    /// running state (sleeping, zombie).
    pub fn make_current(&self, tid: Tid) {
        let mut inner = self.inner.lock();
        let prev = inner.current;
        if prev != tid {
            if let Some(t) = inner.tasks.get_mut(&prev) {
                if t.state == TaskState::Running {
                    t.state = TaskState::Runnable;
                }
            }
        }
        let next = inner.tasks.get_mut(&tid).expect("no such task");
        assert!(
            matches!(next.state, TaskState::Runnable | TaskState::Running),
            "switch to non-runnable task"
        );
        next.state = TaskState::Running;
        inner.current = tid;
    }

    /// Pick the next runnable task after `current` in tid order, wrapping
    /// around; falls back to `current` itself if nothing else is runnable.
    fn pick_next(&self) -> Option<Tid> {
        let inner = self.inner.lock();
        let cur = inner.current;
        inner
            .tasks
            .range(cur + 1..)
            .chain(inner.tasks.range(..=cur))
            .find(|(_, t)| matches!(t.state, TaskState::Runnable))
            .map(|(tid, _)| *tid)
    }

    /// The scheduler's outside-interrupt entry.
    ///
    /// Must be entered with preemption disabled exactly once; the disable
    /// is consumed here. Picks the next runnable task, performs the
    /// bookkeeping switch, and then waits in the switch hook until the
    /// calling task runs again.
    pub fn schedule(&self) {
        assert_eq!(self.preempt_count(), 1, "schedule with preemption off");
        let next = self.pick_next();
        // Balance the count before the switch becomes visible: the task
        // picked next must not inherit this disable.
        self.enable_preemption();
        if let Some(next) = next {
            self.make_current(next);
        }
        let hook = self.switch_hook.read();
        if let Some(h) = hook.as_ref() {
            h(self);
        }
    }

    /// Voluntarily give up the CPU.
    pub fn yield_now(&self) {
        self.disable_preemption();
        self.schedule();
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

lazy_static::lazy_static! {
    /// The system scheduler instance.
    pub static ref SCHED: Scheduler = Scheduler::new();
}

/// Id of the task currently on the CPU.
pub fn current_task() -> Tid {
    SCHED.current_task()
}

pub fn disable_preemption() {
    SCHED.disable_preemption();
}

pub fn enable_preemption() {
    SCHED.enable_preemption();
}

#[cfg(test)]
pub mod testutil;
