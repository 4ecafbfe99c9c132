//! Host-thread task harness for blocking-path tests.
//!
//! Each kernel task is backed by a host thread. A thread only executes its
//! task body while its task is current; otherwise it parks inside the
//! switch hook. The harness thread (the boot task) orchestrates switches
//! and observes scheduler state, which is exactly the single-logical-CPU
//! model: at most one task body makes progress at a time.

use super::{Scheduler, TaskState, Tid};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::thread;
use std::time::{Duration, Instant};

const POLL: Duration = Duration::from_micros(200);
const TIMEOUT: Duration = Duration::from_secs(10);

std::thread_local! {
    static CURRENT_TID: core::cell::Cell<Tid> = const { core::cell::Cell::new(0) };
}

#[derive(Default)]
struct RigState {
    parked: HashMap<Tid, Arc<AtomicBool>>,
    handles: HashMap<Tid, thread::JoinHandle<()>>,
}

pub struct TaskRig {
    pub sched: Arc<Scheduler>,
    state: StdMutex<RigState>,
}

impl TaskRig {
    /// New rig; the calling thread adopts the boot task (tid 1).
    pub fn new() -> Arc<Self> {
        let rig = Arc::new(Self {
            sched: Arc::new(Scheduler::new()),
            state: StdMutex::new(RigState::default()),
        });
        CURRENT_TID.with(|c| c.set(1));

        // The hook looks the parked flag up through the rig; weak handle
        // to avoid a reference cycle through the scheduler.
        let weak = Arc::downgrade(&rig);
        rig.sched.set_switch_hook(Box::new(move |sched| {
            let me = CURRENT_TID.with(|c| c.get());
            if me == 1 {
                // The harness thread never parks; it keeps orchestrating.
                return;
            }
            let flag = weak
                .upgrade()
                .map(|r| r.parked_flag(me))
                .unwrap_or_else(|| Arc::new(AtomicBool::new(false)));
            flag.store(true, Ordering::SeqCst);
            while sched.current_task() != me {
                thread::park_timeout(POLL);
            }
            flag.store(false, Ordering::SeqCst);
        }));
        rig
    }

    fn parked_flag(&self, tid: Tid) -> Arc<AtomicBool> {
        self.state
            .lock()
            .unwrap()
            .parked
            .entry(tid)
            .or_insert_with(|| Arc::new(AtomicBool::new(false)))
            .clone()
    }

    /// Spawn a task thread. The body does not run until the task is
    /// switched to.
    pub fn spawn(self: &Arc<Self>, body: impl FnOnce(&Scheduler) + Send + 'static) -> Tid {
        let tid = self.sched.create_task();
        let sched = self.sched.clone();
        let flag = self.parked_flag(tid);
        let handle = thread::spawn(move || {
            CURRENT_TID.with(|c| c.set(tid));
            flag.store(true, Ordering::SeqCst);
            while sched.current_task() != tid {
                thread::park_timeout(POLL);
            }
            flag.store(false, Ordering::SeqCst);
            body(&sched);
            sched.exit_current();
        });
        self.state.lock().unwrap().handles.insert(tid, handle);
        tid
    }

    /// Hand the CPU to `tid`. Waits until the backing thread is actually
    /// parked so the switch cannot race the task's own yield path.
    pub fn switch_to(&self, tid: Tid) {
        let flag = self.parked_flag(tid);
        let start = Instant::now();
        while !flag.load(Ordering::SeqCst) {
            assert!(start.elapsed() < TIMEOUT, "task {} never parked", tid);
            thread::sleep(POLL);
        }
        self.sched.make_current(tid);
    }

    /// Wait until `tid` reaches `state` and, if it went to sleep, until
    /// its thread is parked in the switch hook.
    pub fn wait_state(&self, tid: Tid, state: TaskState) {
        let start = Instant::now();
        while self.sched.task_state(tid) != Some(state) {
            assert!(
                start.elapsed() < TIMEOUT,
                "task {} never reached {:?} (now {:?})",
                tid,
                state,
                self.sched.task_state(tid)
            );
            thread::sleep(POLL);
        }
        if state == TaskState::Sleeping {
            let flag = self.parked_flag(tid);
            while !flag.load(Ordering::SeqCst) {
                assert!(start.elapsed() < TIMEOUT, "task {} never parked", tid);
                thread::sleep(POLL);
            }
        }
    }

    /// Join a task thread that has run to completion.
    pub fn join(&self, tid: Tid) {
        let handle = self.state.lock().unwrap().handles.remove(&tid);
        if let Some(h) = handle {
            h.join().expect("task thread panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sched::WaitChannel;

    #[test]
    fn test_rig_runs_bodies_in_switch_order() {
        let rig = TaskRig::new();
        let log: Arc<StdMutex<Vec<u32>>> = Arc::new(StdMutex::new(Vec::new()));

        let l1 = log.clone();
        let a = rig.spawn(move |_| l1.lock().unwrap().push(1));
        let l2 = log.clone();
        let b = rig.spawn(move |_| l2.lock().unwrap().push(2));

        // Nothing runs until switched to.
        thread::sleep(Duration::from_millis(2));
        assert!(log.lock().unwrap().is_empty());

        rig.switch_to(b);
        rig.wait_state(b, TaskState::Zombie);
        rig.switch_to(a);
        rig.wait_state(a, TaskState::Zombie);
        rig.join(b);
        rig.join(a);

        assert_eq!(*log.lock().unwrap(), vec![2, 1]);
    }

    #[test]
    fn test_rig_blocked_task_parks_until_woken() {
        let rig = TaskRig::new();
        let chan = WaitChannel::Mutex(99);

        let a = rig.spawn(move |sched| {
            sched.disable_preemption();
            sched.sleep_current(chan);
            sched.enable_preemption();
            sched.yield_now();
            // Resumed only after wake + switch.
        });

        rig.switch_to(a);
        rig.wait_state(a, TaskState::Sleeping);

        assert_eq!(rig.sched.wake_first(chan), Some(a));
        rig.switch_to(a);
        rig.wait_state(a, TaskState::Zombie);
        rig.join(a);
    }
}
