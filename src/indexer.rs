//! Background keyword indexing.
//!
//! Ingestion attaches keywords to the catalog right away and queues their
//! embedding here, so exact matching sees them immediately while semantic
//! matching catches up once the task is done. Every submitted task gets an
//! id whose status can be polled, plus a ticket to wait on its outcome.

use std::{
    sync::{mpsc, Arc, Mutex, RwLock},
    thread::JoinHandle,
    time::Duration,
};

use anyhow::{anyhow, bail};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::semantic::SearchService;

/// Finished tasks kept around for status queries.
const KEEP_FINISHED: usize = 100;

pub fn now() -> i64 {
    Utc::now().timestamp_millis()
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Task {
    /// embed keywords that were just attached to a file or frame
    IndexKeywords {
        file_id: Option<u64>,
        keywords: Vec<String>,
    },

    /// embed every catalog keyword that is not indexed yet
    IndexAll,

    /// request to gracefully shutdown task queue
    Shutdown,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Status {
    Pending,
    InProgress,
    Done { indexed: usize },
    Error(String),
}

impl Status {
    pub fn is_finished(&self) -> bool {
        matches!(self, Status::Done { .. } | Status::Error(_))
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TaskDump {
    pub id: String,
    pub task: Task,
    pub status: Status,
    pub updated_at: i64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QueueDump {
    pub queue: Vec<TaskDump>,
    pub now: i64,
}

/// Outcome of one submitted task.
pub struct IndexTicket {
    pub id: String,
    done_rx: mpsc::Receiver<Result<usize, String>>,
}

impl IndexTicket {
    /// Block until the task finishes. Returns the number of newly indexed keywords.
    pub fn wait(self) -> anyhow::Result<usize> {
        self.done_rx
            .recv()
            .map_err(|_| anyhow!("index task {} was dropped", self.id))?
            .map_err(|msg| anyhow!(msg))
    }

    pub fn wait_timeout(self, timeout: Duration) -> anyhow::Result<usize> {
        match self.done_rx.recv_timeout(timeout) {
            Ok(result) => result.map_err(|msg| anyhow!(msg)),
            Err(mpsc::RecvTimeoutError::Timeout) => {
                bail!("index task {} still running after {:?}", self.id, timeout)
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                bail!("index task {} was dropped", self.id)
            }
        }
    }
}

struct Job {
    id: String,
    task: Task,
    done_tx: mpsc::Sender<Result<usize, String>>,
}

pub struct IndexQueue {
    task_tx: mpsc::Sender<Job>,
    tasks: Arc<RwLock<Vec<TaskDump>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl IndexQueue {
    /// Start the worker thread. Tasks run one at a time, in submission order.
    pub fn start(service: Arc<SearchService>) -> Self {
        let (task_tx, task_rx) = mpsc::channel::<Job>();
        let tasks: Arc<RwLock<Vec<TaskDump>>> = Arc::new(RwLock::new(vec![]));

        let worker = std::thread::spawn({
            let tasks = tasks.clone();
            move || start_queue(task_rx, service, tasks)
        });

        Self {
            task_tx,
            tasks,
            worker: Mutex::new(Some(worker)),
        }
    }

    pub fn submit(&self, task: Task) -> anyhow::Result<IndexTicket> {
        if task == Task::Shutdown {
            bail!("use IndexQueue::shutdown to stop the queue");
        }

        let id = rusty_ulid::generate_ulid_string();
        let (done_tx, done_rx) = mpsc::channel();

        set_status(&self.tasks, &id, Some(task.clone()), Status::Pending);

        let sent = self.task_tx.send(Job {
            id: id.clone(),
            task,
            done_tx,
        });
        if sent.is_err() {
            if let Ok(mut tasks) = self.tasks.write() {
                tasks.retain(|t| t.id != id);
            }
            bail!("index queue is shut down");
        }

        Ok(IndexTicket { id, done_rx })
    }

    pub fn status(&self, id: &str) -> Option<Status> {
        let tasks = self.tasks.read().ok()?;
        tasks.iter().find(|t| t.id == id).map(|t| t.status.clone())
    }

    pub fn dump(&self) -> QueueDump {
        let queue = self
            .tasks
            .read()
            .map(|tasks| tasks.clone())
            .unwrap_or_default();
        QueueDump { queue, now: now() }
    }

    /// Finish queued tasks, then stop the worker.
    pub fn shutdown(&self) {
        let (done_tx, _done_rx) = mpsc::channel();
        let _ = self.task_tx.send(Job {
            id: String::new(),
            task: Task::Shutdown,
            done_tx,
        });

        let handle = match self.worker.lock() {
            Ok(mut worker) => worker.take(),
            Err(e) => {
                log::error!("index queue worker lock poisoned: {e}");
                None
            }
        };

        if let Some(handle) = handle {
            if let Err(err) = handle.join() {
                log::error!("index worker panicked: {err:?}");
            }
        }
    }
}

fn start_queue(
    task_rx: mpsc::Receiver<Job>,
    service: Arc<SearchService>,
    tasks: Arc<RwLock<Vec<TaskDump>>>,
) {
    log::debug!("waiting for index jobs");
    while let Ok(job) = task_rx.recv() {
        let result = match &job.task {
            Task::Shutdown => {
                log::info!("index queue shutting down");
                return;
            }
            Task::IndexKeywords { file_id, keywords } => {
                set_status(&tasks, &job.id, None, Status::InProgress);
                log::debug!(
                    "task {}: indexing {} keywords of file {:?}",
                    job.id,
                    keywords.len(),
                    file_id
                );
                service.index_keywords(keywords)
            }
            Task::IndexAll => {
                set_status(&tasks, &job.id, None, Status::InProgress);
                service.index_all()
            }
        };

        let (status, outcome) = match result {
            Ok(indexed) => (Status::Done { indexed }, Ok(indexed)),
            Err(err) => {
                log::error!("task {}: indexing failed: {}", job.id, err);
                (Status::Error(err.to_string()), Err(err.to_string()))
            }
        };

        set_status(&tasks, &job.id, None, status);

        // the submitter may have dropped its ticket
        let _ = job.done_tx.send(outcome);
    }
}

fn set_status(tasks: &RwLock<Vec<TaskDump>>, id: &str, task: Option<Task>, status: Status) {
    let Ok(mut tasks) = tasks.write() else {
        log::error!("index queue status lock poisoned");
        return;
    };

    match tasks.iter_mut().find(|t| t.id == id) {
        Some(dump) => {
            dump.status = status;
            dump.updated_at = now();
        }
        None => {
            if let Some(task) = task {
                tasks.push(TaskDump {
                    id: id.to_string(),
                    task,
                    status,
                    updated_at: now(),
                });
            }
        }
    }

    let finished = tasks.iter().filter(|t| t.status.is_finished()).count();
    if finished > KEEP_FINISHED {
        let mut to_drop = finished - KEEP_FINISHED;
        tasks.retain(|t| {
            if to_drop > 0 && t.status.is_finished() {
                to_drop -= 1;
                false
            } else {
                true
            }
        });
    }
}
