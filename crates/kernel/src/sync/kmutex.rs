//! Blocking kernel mutex.
//!
//! Unlike a spinlock, a contended `KMutex` puts the caller to sleep and
//! hands ownership over on unlock, so it can guard sections that are far
//! too long to spin on. It is strictly a task-context primitive: taking or
//! releasing one inside an interrupt handler is a bug and asserts.
//!
//! Wake-up order is the order tasks went to sleep (the sleeping list is
//! FIFO and unlock scans it from the front). That order is part of the
//! contract: scheduling stays reproducible across releases.

use crate::sched::{Scheduler, Tid, WaitChannel};
use core::sync::atomic::{AtomicU64, Ordering};
use spin::Mutex;

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct KMutexFlags: u32 {
        /// The owner may relock; a counter tracks the depth.
        const RECURSIVE = 1 << 0;
    }
}

/// Mutex id allocator. Ids are non-zero and monotonic; id 0 marks a
/// destroyed mutex.
static NEXT_MUTEX_ID: AtomicU64 = AtomicU64::new(1);

struct OwnerState {
    task: Option<Tid>,
    /// Relock depth; meaningful only for recursive mutexes.
    count: u32,
}

pub struct KMutex {
    id: AtomicU64,
    flags: KMutexFlags,
    state: Mutex<OwnerState>,
}

impl KMutex {
    pub fn new(flags: KMutexFlags) -> Self {
        Self {
            id: AtomicU64::new(NEXT_MUTEX_ID.fetch_add(1, Ordering::Relaxed)),
            flags,
            state: Mutex::new(OwnerState { task: None, count: 0 }),
        }
    }

    /// Tear the mutex down. The id is cleared so a later operation on the
    /// dead mutex trips the liveness assert instead of corrupting state.
    pub fn destroy(&self) {
        let mut st = self.state.lock();
        assert!(st.task.is_none(), "destroying a held mutex");
        st.count = 0;
        self.id.store(0, Ordering::SeqCst);
    }

    /// Non-zero id of a live mutex.
    pub fn id(&self) -> u64 {
        self.id.load(Ordering::SeqCst)
    }

    fn live_id(&self) -> u64 {
        let id = self.id();
        assert!(id != 0, "operation on a destroyed mutex");
        id
    }

    fn is_recursive(&self) -> bool {
        self.flags.contains(KMutexFlags::RECURSIVE)
    }

    pub fn is_held_by_current(&self, sched: &Scheduler) -> bool {
        self.state.lock().task == Some(sched.current_task())
    }

    /// Owning task, if any. Diagnostic accessor.
    pub fn owner_task(&self) -> Option<Tid> {
        self.state.lock().task
    }

    /// Current relock depth. Diagnostic accessor.
    pub fn lock_count(&self) -> u32 {
        self.state.lock().count
    }

    /// Acquire, sleeping on contention.
    pub fn lock(&self, sched: &Scheduler) {
        assert!(!sched.in_irq(), "kmutex lock from interrupt context");
        let id = self.live_id();

        sched.disable_preemption();
        let me = sched.current_task();
        let mut st = self.state.lock();

        if st.task.is_none() {
            st.task = Some(me);
            if self.is_recursive() {
                st.count = 1;
            }
            drop(st);
            sched.enable_preemption();
            return;
        }

        if self.is_recursive() && st.task == Some(me) {
            st.count += 1;
            drop(st);
            sched.enable_preemption();
            return;
        }

        assert!(
            st.task != Some(me),
            "relock of a non-recursive mutex by its owner"
        );

        // Contended: park on the mutex channel. The unlocker transfers
        // ownership before making us runnable.
        sched.sleep_current(WaitChannel::Mutex(id));
        drop(st);
        sched.enable_preemption();
        sched.yield_now();

        let st = self.state.lock();
        assert_eq!(st.task, Some(me), "woken without ownership");
        if self.is_recursive() {
            debug_assert_eq!(st.count, 1);
        }
    }

    /// Acquire without sleeping. Returns true on success.
    pub fn try_lock(&self, sched: &Scheduler) -> bool {
        assert!(!sched.in_irq(), "kmutex try_lock from interrupt context");
        self.live_id();

        sched.disable_preemption();
        let me = sched.current_task();
        let mut st = self.state.lock();

        let got = if st.task.is_none() {
            st.task = Some(me);
            if self.is_recursive() {
                st.count = 1;
            }
            true
        } else if self.is_recursive() && st.task == Some(me) {
            st.count += 1;
            true
        } else {
            false
        };

        drop(st);
        sched.enable_preemption();
        got
    }

    /// Release; the first sleeper on this mutex (if any) becomes the new
    /// owner and turns runnable.
    pub fn unlock(&self, sched: &Scheduler) {
        assert!(!sched.in_irq(), "kmutex unlock from interrupt context");
        let id = self.live_id();

        sched.disable_preemption();
        let me = sched.current_task();
        let mut st = self.state.lock();

        assert_eq!(st.task, Some(me), "unlock by non-owner");

        if self.is_recursive() && st.count > 1 {
            st.count -= 1;
            drop(st);
            sched.enable_preemption();
            return;
        }

        st.task = None;
        st.count = 0;

        if let Some(next) = sched.wake_first(WaitChannel::Mutex(id)) {
            st.task = Some(next);
            if self.is_recursive() {
                st.count = 1;
            }
        }

        drop(st);
        sched.enable_preemption();
    }
}
