// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 tickle contributors

//! Concurrent evaluator
//!
//! A fixed pool of OS worker threads executes sequences from a program
//! of batches. Batches run strictly in order; sequences within a batch
//! run in parallel. A writer-preferring pause lock lets the driver stop
//! workers at their dequeue boundary, drain the queue and swap in a new
//! program while no task is mid-flight.

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::lock_api::RawRwLock as _;
use parking_lot::{Condvar, Mutex, RawRwLock};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, error};

use crate::errors::{TaskError, TickleError, TickleResult};
use crate::graph::WorkUnit;

/// Tasks one worker runs back-to-back
pub type Sequence = Vec<WorkUnit>;

/// Sequences safe to run in parallel
pub type Batch = Vec<Sequence>;

/// Batches in execution order
pub type Program = Vec<Batch>;

/// How long a worker waits on the queue before re-checking shutdown
const WORKER_POLL: Duration = Duration::from_millis(100);

/// How long the main loop naps when no program is present
const IDLE_SLEEP: Duration = Duration::from_millis(50);

/// What the evaluator should do after a task error is reported
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorDisposition {
    /// Stop evaluation and surface the error from `start()`
    Halt,
    /// Discard the remaining program and keep running
    DiscardProgram,
}

/// Injected reaction to task errors
pub type TaskErrorHandler = Box<dyn Fn(&TaskError) -> ErrorDisposition + Send + Sync>;

struct EvalShared {
    worker_count: usize,
    running: AtomicBool,
    paused: AtomicBool,
    workers_active: AtomicBool,
    pause: RawRwLock,
    program: Mutex<VecDeque<Batch>>,
    work_tx: Sender<Sequence>,
    work_rx: Receiver<Sequence>,
    error_tx: Sender<TaskError>,
    error_rx: Receiver<TaskError>,
    pending: Mutex<usize>,
    drained: Condvar,
    on_task_error: TaskErrorHandler,
}

/// Cheaply clonable evaluator handle
#[derive(Clone)]
pub struct Evaluator {
    shared: Arc<EvalShared>,
}

impl Evaluator {
    pub fn new(worker_count: usize, on_task_error: TaskErrorHandler) -> Self {
        let (work_tx, work_rx) = crossbeam_channel::unbounded();
        let (error_tx, error_rx) = crossbeam_channel::unbounded();
        Self {
            shared: Arc::new(EvalShared {
                worker_count: worker_count.max(1),
                running: AtomicBool::new(false),
                paused: AtomicBool::new(false),
                workers_active: AtomicBool::new(false),
                pause: RawRwLock::INIT,
                program: Mutex::new(VecDeque::new()),
                work_tx,
                work_rx,
                error_tx,
                error_rx,
                pending: Mutex::new(0),
                drained: Condvar::new(),
                on_task_error,
            }),
        }
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    pub fn is_paused(&self) -> bool {
        self.shared.paused.load(Ordering::SeqCst)
    }

    /// Launch the workers and dispatch batches until stopped.
    ///
    /// Blocks the calling thread. Returns the task error when the
    /// injected handler asked for a halt.
    pub fn start(&self) -> TickleResult<()> {
        if self.shared.running.swap(true, Ordering::SeqCst) {
            return Err(TickleError::EvaluatorState {
                action: "start",
                condition: "if already running",
            });
        }
        debug!("evaluator start");

        self.shared.workers_active.store(true, Ordering::SeqCst);
        let mut handles = Vec::with_capacity(self.shared.worker_count);
        for index in 0..self.shared.worker_count {
            let shared = Arc::clone(&self.shared);
            let spawned = thread::Builder::new()
                .name(format!("tickle-worker-{}", index + 1))
                .spawn(move || worker_loop(&shared, index + 1));
            match spawned {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    self.shared.running.store(false, Ordering::SeqCst);
                    self.shared.workers_active.store(false, Ordering::SeqCst);
                    for handle in handles {
                        let _ = handle.join();
                    }
                    return Err(e.into());
                }
            }
        }

        let result = self.dispatch_loop();

        self.shared.running.store(false, Ordering::SeqCst);
        self.shared.workers_active.store(false, Ordering::SeqCst);
        for handle in handles {
            if handle.join().is_err() {
                error!("worker thread panicked");
            }
        }
        result
    }

    fn dispatch_loop(&self) -> TickleResult<()> {
        loop {
            if !self.shared.running.load(Ordering::SeqCst) {
                return Ok(());
            }
            if let Ok(task_error) = self.shared.error_rx.try_recv() {
                match (self.shared.on_task_error)(&task_error) {
                    ErrorDisposition::Halt => return Err(task_error.into()),
                    ErrorDisposition::DiscardProgram => {
                        // A redriver recomputes the schedule on the next
                        // relevant file event.
                        if !self.shared.program.lock().is_empty() && self.pause().is_ok() {
                            let _ = self.deprogram();
                            let _ = self.resume();
                        }
                    }
                }
            }
            let batch = self.shared.program.lock().pop_front();
            let Some(batch) = batch else {
                thread::sleep(IDLE_SLEEP);
                continue;
            };
            self.enqueue_batch(batch);
            self.wait_drained();
        }
    }

    fn enqueue_batch(&self, batch: Batch) {
        let mut pending = self.shared.pending.lock();
        *pending += batch.len();
        for sequence in batch {
            let _ = self.shared.work_tx.send(sequence);
        }
    }

    fn wait_drained(&self) {
        let mut pending = self.shared.pending.lock();
        while *pending != 0 {
            self.shared.drained.wait(&mut pending);
        }
    }

    /// Block workers at their dequeue boundary.
    ///
    /// Waits until no worker holds the read side of the pause lock, so
    /// no task is mid-flight once this returns.
    pub fn pause(&self) -> TickleResult<()> {
        if self.shared.paused.swap(true, Ordering::SeqCst) {
            return Err(TickleError::EvaluatorState {
                action: "pause",
                condition: "if already paused",
            });
        }
        debug!("evaluator pause");
        self.shared.pause.lock_exclusive();
        Ok(())
    }

    /// Replace the program. Legal only while paused or not yet started.
    pub fn reprogram(&self, program: Program) -> TickleResult<()> {
        if self.shared.running.load(Ordering::SeqCst) && !self.shared.paused.load(Ordering::SeqCst)
        {
            return Err(TickleError::EvaluatorState {
                action: "reprogram",
                condition: "unless paused",
            });
        }
        debug!("evaluator reprogram");
        self.drain_queue();
        *self.shared.program.lock() = program.into();
        Ok(())
    }

    /// Discard the program. Legal only while paused or not yet started.
    pub fn deprogram(&self) -> TickleResult<()> {
        if self.shared.running.load(Ordering::SeqCst) && !self.shared.paused.load(Ordering::SeqCst)
        {
            return Err(TickleError::EvaluatorState {
                action: "deprogram",
                condition: "unless paused",
            });
        }
        debug!("evaluator deprogram");
        self.drain_queue();
        self.shared.program.lock().clear();
        Ok(())
    }

    fn drain_queue(&self) {
        let mut pending = self.shared.pending.lock();
        while self.shared.work_rx.try_recv().is_ok() {
            *pending = pending.saturating_sub(1);
        }
        if *pending == 0 {
            self.shared.drained.notify_all();
        }
    }

    pub fn resume(&self) -> TickleResult<()> {
        if !self.shared.paused.swap(false, Ordering::SeqCst) {
            return Err(TickleError::EvaluatorState {
                action: "resume",
                condition: "if not paused",
            });
        }
        debug!("evaluator resume");
        unsafe { self.shared.pause.unlock_exclusive() };
        Ok(())
    }

    /// Ask the evaluator to wind down; `start()` returns once the
    /// current batch's in-flight sequences complete.
    pub fn stop(&self) -> TickleResult<()> {
        if !self.shared.running.load(Ordering::SeqCst) {
            return Err(TickleError::EvaluatorState {
                action: "stop",
                condition: "if not running",
            });
        }
        debug!("evaluator stop");
        self.shared.running.store(false, Ordering::SeqCst);
        Ok(())
    }
}

fn worker_loop(shared: &EvalShared, index: usize) {
    while shared.workers_active.load(Ordering::SeqCst) {
        shared.pause.lock_shared();
        match shared.work_rx.recv_timeout(WORKER_POLL) {
            Ok(sequence) => {
                for unit in &sequence {
                    match unit.perform() {
                        Ok(Some(output)) => {
                            debug!("worker {}: {}", index, output.trim_end());
                        }
                        Ok(None) => {}
                        Err(task_error) => {
                            let _ = shared.error_tx.send(task_error);
                            break;
                        }
                    }
                }
                let mut pending = shared.pending.lock();
                *pending = pending.saturating_sub(1);
                if *pending == 0 {
                    shared.drained.notify_all();
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                unsafe { shared.pause.unlock_shared() };
                return;
            }
        }
        unsafe { shared.pause.unlock_shared() };
    }
}
