use serde::Serialize;
use std::collections::VecDeque;
use tracing::{debug, info};

/// Cooperative FIFO of deferred work units, drained one unit per tick.
///
/// The queue only hands out work; the owner executes each unit and reports
/// back with [`TaskQueue::complete_task`]. Counters reset on cancel and on
/// natural drain-to-empty.
#[derive(Debug)]
pub struct TaskQueue<T> {
    tasks: VecDeque<T>,
    paused: bool,
    running: bool,
    total: usize,
    completed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueState {
    Idle,
    Running,
    Paused,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueueStatus {
    pub state: QueueState,
    pub queued: usize,
    pub total: usize,
    pub completed: usize,
    pub progress: f32,
}

impl<T> TaskQueue<T> {
    pub fn new() -> Self {
        Self {
            tasks: VecDeque::new(),
            paused: false,
            running: false,
            total: 0,
            completed: 0,
        }
    }

    /// Appends a task and starts draining unless paused.
    pub fn enqueue(&mut self, task: T) {
        self.tasks.push_back(task);
        self.total += 1;

        if !self.running && !self.paused {
            debug!("Queue started draining");
            self.running = true;
        }
    }

    /// Next unit to execute this tick, if draining.
    pub fn next_task(&mut self) -> Option<T> {
        if self.paused || !self.running {
            return None;
        }

        let task = self.tasks.pop_front();
        if task.is_none() {
            self.running = false;
        }
        task
    }

    /// Records one executed unit. Returns true when this drained the queue.
    pub fn complete_task(&mut self) -> bool {
        self.completed += 1;

        if self.tasks.is_empty() {
            debug!("Queue drained after {} tasks", self.completed);
            self.running = false;
            self.total = 0;
            self.completed = 0;
            return true;
        }
        false
    }

    pub fn pause(&mut self) {
        info!("Pausing sync queue with {} tasks pending", self.tasks.len());
        self.paused = true;
        self.running = false;
    }

    pub fn resume(&mut self) {
        info!("Resuming sync queue");
        self.paused = false;
        self.running = !self.tasks.is_empty();
    }

    /// Drops every pending unit. Already executed units are not undone.
    pub fn cancel_all(&mut self) -> usize {
        let dropped = self.tasks.len();
        self.tasks.clear();
        self.paused = false;
        self.running = false;
        self.total = 0;
        self.completed = 0;
        if dropped > 0 {
            info!("Cancelled {} pending sync tasks", dropped);
        }
        dropped
    }

    pub fn state(&self) -> QueueState {
        if self.paused {
            QueueState::Paused
        } else if self.running {
            QueueState::Running
        } else {
            QueueState::Idle
        }
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn progress(&self) -> f32 {
        if self.total > 0 {
            self.completed as f32 / self.total as f32
        } else {
            0.0
        }
    }

    pub fn status(&self) -> QueueStatus {
        QueueStatus {
            state: self.state(),
            queued: self.tasks.len(),
            total: self.total,
            completed: self.completed,
            progress: self.progress(),
        }
    }
}

impl<T> Default for TaskQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
