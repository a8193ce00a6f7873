//! Task execution context
//!
//! Background phases run on a rayon pool and report back over a crossbeam
//! channel; finalization happens on the thread that owns the context. A task
//! is dispatched only when no earlier unfinished task touches any of its
//! segments or pages or edits the same entity, so overlapping edits are
//! applied in submission order.

use super::heightfield::SegmentIndex;
use super::task::{BackgroundJob, BackgroundResult, TerrainTask};
use super::types::{EntityId, TerrainIndex};
use super::{TerrainError, TerrainResult};
use crate::config::concurrency::ThreadPoolConfig;
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::collections::{BTreeSet, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tracing::{debug, info, trace};

// Job control flag values
const JOB_QUEUED: u8 = 0;
const JOB_RUNNING: u8 = 1;
const JOB_CANCELLED: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

impl TaskId {
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Created,
    BackgroundExecuting,
    AwaitingMainThread,
    Finalized,
    Aborted,
}

/// Segments and pages a task reads or writes, and the entity it edits
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskRegion {
    pub segments: BTreeSet<SegmentIndex>,
    pub pages: BTreeSet<TerrainIndex>,
    pub entity: Option<EntityId>,
}

impl TaskRegion {
    pub fn new(
        segments: impl IntoIterator<Item = SegmentIndex>,
        pages: impl IntoIterator<Item = TerrainIndex>,
    ) -> Self {
        Self {
            segments: segments.into_iter().collect(),
            pages: pages.into_iter().collect(),
            entity: None,
        }
    }

    /// Tasks editing the same entity are ordered even when their areas are disjoint
    pub fn with_entity(mut self, entity: EntityId) -> Self {
        self.entity = Some(entity);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty() && self.pages.is_empty() && self.entity.is_none()
    }

    pub fn overlaps(&self, other: &TaskRegion) -> bool {
        let same_entity = matches!((&self.entity, &other.entity), (Some(a), Some(b)) if a == b);
        same_entity || !self.segments.is_disjoint(&other.segments) || !self.pages.is_disjoint(&other.pages)
    }
}

struct PendingTask {
    id: TaskId,
    epoch: u64,
    task: TerrainTask,
    region: TaskRegion,
    state: TaskState,
    control: Option<Arc<AtomicU8>>,
    result: Option<BackgroundResult>,
}

/// A task whose background phase completed, ready for its main-thread phase
pub(crate) struct FinalizableTask {
    pub id: TaskId,
    pub epoch: u64,
    pub task: TerrainTask,
    pub result: BackgroundResult,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutorStats {
    pub queued: usize,
    pub executing: usize,
    pub awaiting: usize,
    /// Jobs handed to the pool whose result has not come back yet
    pub in_flight: usize,
}

type Completion = (TaskId, Option<BackgroundResult>);

pub struct TaskExecutionContext {
    pool: rayon::ThreadPool,
    sender: Sender<Completion>,
    receiver: Receiver<Completion>,
    queue: VecDeque<PendingTask>,
    next_id: u64,
    in_flight: usize,
    shut_down: bool,
}

impl TaskExecutionContext {
    pub fn new(config: &ThreadPoolConfig) -> TerrainResult<Self> {
        let pool = config.build_pool()?;
        let (sender, receiver) = unbounded();
        Ok(Self {
            pool,
            sender,
            receiver,
            queue: VecDeque::new(),
            next_id: 0,
            in_flight: 0,
            shut_down: false,
        })
    }

    /// Queue a task. Never blocks; dispatch happens in [`Self::dispatch_ready`].
    pub fn enqueue(&mut self, task: TerrainTask, region: TaskRegion, epoch: u64) -> TerrainResult<TaskId> {
        if self.shut_down {
            return Err(TerrainError::ShutDown);
        }
        self.next_id += 1;
        let id = TaskId(self.next_id);
        trace!("Queued {} ({})", id, task.kind());
        self.queue.push_back(PendingTask {
            id,
            epoch,
            task,
            region,
            state: TaskState::Created,
            control: None,
            result: None,
        });
        Ok(id)
    }

    /// Hand every unblocked task to the worker pool. `build` runs on this
    /// thread and turns the task into its owned background input.
    pub(crate) fn dispatch_ready(&mut self, mut build: impl FnMut(&TerrainTask) -> BackgroundJob) -> usize {
        if self.shut_down {
            return 0;
        }
        let mut dispatched = 0;
        for i in 0..self.queue.len() {
            if self.queue[i].state != TaskState::Created {
                continue;
            }
            let blocked = (0..i).any(|j| self.queue[j].region.overlaps(&self.queue[i].region));
            if blocked {
                continue;
            }

            let job = build(&self.queue[i].task);
            let control = Arc::new(AtomicU8::new(JOB_QUEUED));
            let flag = Arc::clone(&control);
            let sender = self.sender.clone();
            let id = self.queue[i].id;

            self.pool.spawn(move || {
                if flag
                    .compare_exchange(JOB_QUEUED, JOB_RUNNING, Ordering::AcqRel, Ordering::Acquire)
                    .is_err()
                {
                    let _ = sender.send((id, None));
                    return;
                }
                let result = job.run();
                let _ = sender.send((id, Some(result)));
            });

            let entry = &mut self.queue[i];
            entry.control = Some(control);
            entry.state = TaskState::BackgroundExecuting;
            self.in_flight += 1;
            dispatched += 1;
            debug!("Dispatched {} to the worker pool", id);
        }
        dispatched
    }

    /// Record every background result that has arrived, without blocking
    pub fn collect_completed(&mut self) -> usize {
        let mut count = 0;
        while let Ok((id, result)) = self.receiver.try_recv() {
            self.accept(id, result);
            count += 1;
        }
        count
    }

    /// Block until every job handed to the pool has reported back
    pub fn wait_for_in_flight(&mut self) {
        while self.in_flight > 0 {
            match self.receiver.recv() {
                Ok((id, result)) => self.accept(id, result),
                Err(_) => {
                    self.in_flight = 0;
                    break;
                }
            }
        }
    }

    fn accept(&mut self, id: TaskId, result: Option<BackgroundResult>) {
        self.in_flight = self.in_flight.saturating_sub(1);
        let Some(pos) = self.position(id) else {
            trace!("Dropping result of aborted {}", id);
            return;
        };
        match result {
            Some(result) => {
                let entry = &mut self.queue[pos];
                entry.result = Some(result);
                entry.state = TaskState::AwaitingMainThread;
                entry.control = None;
            }
            None => {
                self.queue.remove(pos);
            }
        }
    }

    /// Remove and return the completed tasks in submission order
    pub(crate) fn take_finalizable(&mut self) -> Vec<FinalizableTask> {
        let mut ready = Vec::new();
        let mut i = 0;
        while i < self.queue.len() {
            if self.queue[i].state != TaskState::AwaitingMainThread {
                i += 1;
                continue;
            }
            if let Some(entry) = self.queue.remove(i) {
                if let Some(result) = entry.result {
                    ready.push(FinalizableTask {
                        id: entry.id,
                        epoch: entry.epoch,
                        task: entry.task,
                        result,
                    });
                }
            }
        }
        ready
    }

    /// Abort one task. A job already running keeps running; its result is dropped.
    pub fn abort(&mut self, id: TaskId) -> bool {
        let Some(pos) = self.position(id) else {
            return false;
        };
        if let Some(entry) = self.queue.remove(pos) {
            Self::release(&entry);
        }
        true
    }

    /// Abort every task matching `predicate`, returning their ids
    pub fn abort_where(&mut self, predicate: impl Fn(TaskState, &TerrainTask) -> bool) -> Vec<TaskId> {
        let mut aborted = Vec::new();
        let mut i = 0;
        while i < self.queue.len() {
            let entry = &self.queue[i];
            if !predicate(entry.state, &entry.task) {
                i += 1;
                continue;
            }
            if let Some(entry) = self.queue.remove(i) {
                Self::release(&entry);
                aborted.push(entry.id);
            }
        }
        aborted
    }

    fn release(entry: &PendingTask) {
        match entry.state {
            TaskState::Created => debug!("Aborted {} before dispatch", entry.id),
            TaskState::BackgroundExecuting => {
                let cancelled = entry.control.as_ref().is_some_and(|flag| {
                    flag.compare_exchange(JOB_QUEUED, JOB_CANCELLED, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                });
                if cancelled {
                    debug!("Aborted {} before its background phase started", entry.id);
                } else {
                    debug!("Aborted {} mid-flight; its result will be discarded", entry.id);
                }
            }
            TaskState::AwaitingMainThread => debug!("Aborted {}; discarding its computed result", entry.id),
            TaskState::Finalized | TaskState::Aborted => {}
        }
    }

    fn position(&self, id: TaskId) -> Option<usize> {
        self.queue.iter().position(|entry| entry.id == id)
    }

    pub fn task_state(&self, id: TaskId) -> Option<TaskState> {
        self.queue.iter().find(|entry| entry.id == id).map(|entry| entry.state)
    }

    /// Unfinished tasks in submission order, with the epoch each was queued in
    pub fn tasks(&self) -> impl Iterator<Item = (TaskId, TaskState, u64, &TerrainTask)> {
        self.queue.iter().map(|entry| (entry.id, entry.state, entry.epoch, &entry.task))
    }

    pub fn is_idle(&self) -> bool {
        self.queue.is_empty() && self.in_flight == 0
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }

    pub fn stats(&self) -> ExecutorStats {
        let mut stats = ExecutorStats {
            in_flight: self.in_flight,
            ..ExecutorStats::default()
        };
        for entry in &self.queue {
            match entry.state {
                TaskState::Created => stats.queued += 1,
                TaskState::BackgroundExecuting => stats.executing += 1,
                TaskState::AwaitingMainThread => stats.awaiting += 1,
                TaskState::Finalized | TaskState::Aborted => {}
            }
        }
        stats
    }

    /// Abort everything and wait for the pool to return all jobs.
    ///
    /// Nothing handed to the pool outlives this call.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;
        let pending = self.queue.len();
        for entry in self.queue.drain(..) {
            Self::release(&entry);
        }
        self.wait_for_in_flight();
        info!("Task execution context shut down ({} pending tasks aborted)", pending);
    }
}

impl Drop for TaskExecutionContext {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for TaskExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskExecutionContext")
            .field("stats", &self.stats())
            .field("shut_down", &self.shut_down)
            .finish()
    }
}
