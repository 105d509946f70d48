use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;

/// One-shot unit of pipeline work, keyed by the record it acts on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncTask {
    Upload { name: String },
    Download { name: String },
    DeleteCloud { name: String },
    DeleteLocal { name: String },
}

impl SyncTask {
    pub fn name(&self) -> &str {
        match self {
            SyncTask::Upload { name }
            | SyncTask::Download { name }
            | SyncTask::DeleteCloud { name }
            | SyncTask::DeleteLocal { name } => name,
        }
    }
}

/// Clonable enqueue handle shared by the reconciler and the watcher.
#[derive(Clone)]
pub struct TaskQueue {
    tx: mpsc::UnboundedSender<SyncTask>,
}

impl TaskQueue {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SyncTask>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn enqueue(&self, task: SyncTask) {
        // Receiver gone means shutdown; pending work is rediscovered by the
        // startup resume scan.
        let _ = self.tx.send(task);
    }
}

/// Fixed-size pool draining the shared task queue.
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn start<E, F, Fut>(
        workers: usize,
        rx: mpsc::UnboundedReceiver<SyncTask>,
        execute: F,
    ) -> Self
    where
        E: std::fmt::Display,
        F: Fn(SyncTask) -> Fut + Clone + Send + 'static,
        Fut: Future<Output = Result<(), E>> + Send,
    {
        let rx = Arc::new(Mutex::new(rx));
        let mut handles = Vec::with_capacity(workers.max(1));
        for _ in 0..workers.max(1) {
            let rx = Arc::clone(&rx);
            let execute = execute.clone();
            handles.push(tokio::spawn(async move {
                loop {
                    let task = { rx.lock().await.recv().await };
                    let Some(task) = task else {
                        break;
                    };
                    let name = task.name().to_string();
                    if let Err(err) = execute(task).await {
                        eprintln!("[siasyncd] task failed: name={name} err={err}");
                    }
                }
            }));
        }
        Self { handles }
    }

    pub fn abort(&self) {
        for handle in &self.handles {
            handle.abort();
        }
    }
}

/// Periodic loop with a phase offset so independent cycles do not all fire
/// at once.
pub fn spawn_periodic<F, Fut>(offset: Duration, interval: Duration, mut cycle: F) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send,
{
    tokio::spawn(async move {
        tokio::time::sleep(offset).await;
        loop {
            cycle().await;
            tokio::time::sleep(interval).await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn workers_drain_queued_tasks() {
        let (queue, rx) = TaskQueue::new();
        let executed = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&executed);
        let pool = WorkerPool::start(2, rx, move |_task| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<(), String>(())
            }
        });

        for i in 0..5 {
            queue.enqueue(SyncTask::Upload {
                name: format!("f{i}"),
            });
        }
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(executed.load(Ordering::SeqCst), 5);
        pool.abort();
    }

    #[tokio::test]
    async fn failing_task_does_not_stop_the_pool() {
        let (queue, rx) = TaskQueue::new();
        let executed = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&executed);
        let pool = WorkerPool::start(1, rx, move |task| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                if task.name() == "bad" {
                    Err("boom".to_string())
                } else {
                    Ok(())
                }
            }
        });

        queue.enqueue(SyncTask::Download { name: "bad".into() });
        queue.enqueue(SyncTask::Download { name: "good".into() });
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(executed.load(Ordering::SeqCst), 2);
        pool.abort();
    }

    #[tokio::test]
    async fn periodic_loop_fires_repeatedly() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ticks);
        let handle = spawn_periodic(Duration::ZERO, Duration::from_millis(10), move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.abort();

        assert!(ticks.load(Ordering::SeqCst) >= 3);
    }
}
