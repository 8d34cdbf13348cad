//! Cooperative batch barrier between the orchestrator and scorer workers.
//!
//! The orchestrator pauses the workers by opening a new epoch and clearing
//! `active`. Every worker notices at its next check-in, hands over what it
//! produced since its last report and records the epoch it reported for. Once
//! every worker has reported for the current epoch the orchestrator owns a
//! quiet store; `resume` lets the workers continue, possibly on a new slot.
//!
//! A worker can only report for an epoch the orchestrator is still waiting
//! on, so a late check-in around `resume` never counts towards the next pause.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use super::dice::Slot;

/// What one worker produced since its previous report.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WorkerReport {
    pub worker: usize,
    pub slot: Slot,
    /// Rules generalized from sampled walks.
    pub created: u64,
    /// Rules that passed the thresholds and were new.
    pub stored: u64,
    /// Summed reward of the stored rules.
    pub produced: f64,
}

/// Outcome of a worker check-in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckIn {
    /// Keep mining.
    Mine,
    /// The report was taken; reset the counters and wait.
    Reported,
    /// Paused and already reported; wait.
    Wait,
}

pub struct BatchBarrier {
    active: AtomicBool,
    shutdown: AtomicBool,
    epoch: AtomicUsize,
    /// Last epoch each worker reported for.
    reported: Vec<AtomicUsize>,
    slots: Vec<AtomicUsize>,
    reports: Mutex<Vec<WorkerReport>>,
}

impl BatchBarrier {
    /// A barrier for one worker per entry of `initial`, all active.
    pub fn new(initial: &[Slot]) -> Self {
        Self {
            active: AtomicBool::new(true),
            shutdown: AtomicBool::new(false),
            epoch: AtomicUsize::new(0),
            reported: initial.iter().map(|_| AtomicUsize::new(0)).collect(),
            slots: initial.iter().map(|s| AtomicUsize::new(s.index())).collect(),
            reports: Mutex::new(Vec::new()),
        }
    }

    pub fn workers(&self) -> usize {
        self.reported.len()
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// The slot `worker` mines in the current batch.
    pub fn slot(&self, worker: usize) -> Slot {
        Slot::from_index(self.slots[worker].load(Ordering::SeqCst)).unwrap_or(Slot::Zero)
    }

    /// Assign the slot for the next batch; only meaningful while paused.
    pub fn assign(&self, worker: usize, slot: Slot) {
        self.slots[worker].store(slot.index(), Ordering::SeqCst);
    }

    /// Worker check-in. `report` is only called when a report is due.
    pub fn check_in(&self, worker: usize, report: impl FnOnce() -> WorkerReport) -> CheckIn {
        if self.is_active() {
            return CheckIn::Mine;
        }
        let epoch = self.epoch.load(Ordering::SeqCst);
        let Some(last) = self.reported.get(worker) else {
            return CheckIn::Wait;
        };
        if last.load(Ordering::SeqCst) >= epoch {
            return CheckIn::Wait;
        }
        self.reports
            .lock()
            .expect("report lock poisoned")
            .push(report());
        last.store(epoch, Ordering::SeqCst);
        CheckIn::Reported
    }

    /// Ask every worker to stop and report.
    pub fn pause(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.active.store(false, Ordering::SeqCst);
    }

    /// Whether every worker has reported for the current pause.
    pub fn all_reported(&self) -> bool {
        let epoch = self.epoch.load(Ordering::SeqCst);
        self.reported.iter().all(|r| r.load(Ordering::SeqCst) >= epoch)
    }

    /// The reports collected since the last call.
    pub fn take_reports(&self) -> Vec<WorkerReport> {
        std::mem::take(&mut *self.reports.lock().expect("report lock poisoned"))
    }

    /// Let the workers continue.
    pub fn resume(&self) {
        self.active.store(true, Ordering::SeqCst);
    }

    /// Tell every worker to exit at its next check-in.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;

    fn report(worker: usize) -> WorkerReport {
        WorkerReport {
            worker,
            slot: Slot::Cyclic(1),
            created: 4,
            stored: 2,
            produced: 1.5,
        }
    }

    #[test]
    fn active_workers_keep_going() {
        let barrier = BatchBarrier::new(&[Slot::Zero, Slot::Cyclic(2)]);
        assert_eq!(barrier.check_in(0, || report(0)), CheckIn::Mine);
        assert_eq!(barrier.slot(1), Slot::Cyclic(2));
        assert!(barrier.all_reported());
    }

    #[test]
    fn each_worker_reports_once_per_pause() {
        let barrier = BatchBarrier::new(&[Slot::Zero, Slot::Zero]);
        barrier.pause();
        assert!(!barrier.all_reported());
        assert_eq!(barrier.check_in(0, || report(0)), CheckIn::Reported);
        assert_eq!(barrier.check_in(0, || report(0)), CheckIn::Wait);
        assert!(!barrier.all_reported());
        assert_eq!(barrier.check_in(1, || report(1)), CheckIn::Reported);
        assert!(barrier.all_reported());

        let reports = barrier.take_reports();
        assert_eq!(reports.len(), 2);
        assert!(barrier.take_reports().is_empty());

        barrier.assign(1, Slot::Acyclic(1));
        barrier.resume();
        assert_eq!(barrier.check_in(1, || report(1)), CheckIn::Mine);
        assert_eq!(barrier.slot(1), Slot::Acyclic(1));

        barrier.pause();
        assert!(!barrier.all_reported());
    }

    #[test]
    fn workers_report_across_threads() {
        let barrier = Arc::new(BatchBarrier::new(&[Slot::Zero; 4]));
        let handles: Vec<_> = (0..4)
            .map(|id| {
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    let mut reported = 0;
                    while !barrier.is_shutdown() {
                        if barrier.check_in(id, || report(id)) == CheckIn::Reported {
                            reported += 1;
                        }
                        std::thread::sleep(Duration::from_millis(1));
                    }
                    reported
                })
            })
            .collect();

        for _ in 0..3 {
            barrier.pause();
            while !barrier.all_reported() {
                std::thread::sleep(Duration::from_millis(1));
            }
            assert_eq!(barrier.take_reports().len(), 4);
            barrier.resume();
        }
        barrier.shutdown();
        for h in handles {
            assert_eq!(h.join().unwrap(), 3);
        }
    }
}
