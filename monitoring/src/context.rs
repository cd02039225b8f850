use crate::handler::BoxFuture;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Notify;
use tokio::task::{JoinError, JoinSet};

/// Background work that must complete even after the response was returned.
pub type DeferredTask = BoxFuture<'static, ()>;

/// Extensible properties attached to an execution context
pub type Props = serde_json::Map<String, serde_json::Value>;

/// Accepts deferred tasks for background completion.
pub trait WaitUntil: Send + Sync {
    fn wait_until(&self, task: DeferredTask);
}

/// The context shape the monitoring wrapper requires from its caller.
pub trait ExecutionContext: WaitUntil {
    fn pass_through_on_exception(&self);

    fn props(&self) -> &Props;
}

/// Owns deferred tasks submitted to a context and tracks them until they finish.
///
/// Tasks start running as soon as they are submitted and stay owned by the
/// registry until they complete. [`TaskRegistry::drain`] waits for all of
/// them, including tasks submitted while draining, and may be called from
/// several places at once.
#[derive(Default)]
pub struct TaskRegistry {
    tasks: Mutex<JoinSet<()>>,
    pending: Arc<Pending>,
}

#[derive(Default)]
struct Pending {
    count: AtomicUsize,
    idle: Notify,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of submitted tasks that have not completed yet.
    pub fn pending(&self) -> usize {
        self.pending.count.load(Ordering::Acquire)
    }

    pub fn is_idle(&self) -> bool {
        self.pending() == 0
    }

    /// Waits until every submitted task has completed.
    ///
    /// Dropping the returned future stops waiting but leaves the tasks running.
    pub async fn drain(&self) {
        loop {
            let idle = self.pending.idle.notified();
            tokio::pin!(idle);
            // Register before checking so a wakeup between the two is not missed
            idle.as_mut().enable();
            if self.is_idle() {
                break;
            }
            idle.await;
        }
        self.reap();
    }

    fn reap(&self) {
        let mut tasks = self.tasks.lock();
        while let Some(result) = tasks.try_join_next() {
            log_join_error(result);
        }
    }
}

impl WaitUntil for TaskRegistry {
    fn wait_until(&self, task: DeferredTask) {
        self.pending.count.fetch_add(1, Ordering::AcqRel);
        let guard = PendingGuard(self.pending.clone());

        self.reap();
        self.tasks.lock().spawn(async move {
            let _guard = guard;
            task.await;
        });
    }
}

// Decrements the pending count even if the task panics.
struct PendingGuard(Arc<Pending>);

impl Drop for PendingGuard {
    fn drop(&mut self) {
        if self.0.count.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.0.idle.notify_waiters();
        }
    }
}

fn log_join_error(result: Result<(), JoinError>) {
    if let Err(e) = result {
        tracing::error!(error = %e, "Deferred task failed");
    }
}

/// Execution context handed to the monitoring wrapper on behalf of an entity.
///
/// Deferred tasks are forwarded to the owning context and never held here.
/// Exception pass-through has no meaning for entities and is ignored.
pub struct StandInContext {
    owner: Arc<dyn WaitUntil>,
    props: Props,
}

impl StandInContext {
    pub fn new(owner: Arc<dyn WaitUntil>) -> Self {
        Self {
            owner,
            props: Props::new(),
        }
    }
}

impl WaitUntil for StandInContext {
    fn wait_until(&self, task: DeferredTask) {
        self.owner.wait_until(task);
    }
}

impl ExecutionContext for StandInContext {
    fn pass_through_on_exception(&self) {}

    fn props(&self) -> &Props {
        &self.props
    }
}
