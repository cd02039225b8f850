use monitoring::{DeferredTask, ExecutionContext, Props, TaskRegistry, WaitUntil};
use std::sync::atomic::{AtomicBool, Ordering};

/// Execution context of one inbound request.
///
/// Deferred tasks keep running after the response is sent; whoever owns the
/// context must [`drain`](RequestContext::drain) it before dropping it.
#[derive(Default)]
pub struct RequestContext {
    tasks: TaskRegistry,
    pass_through: AtomicBool,
    props: Props,
}

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a handler asked for failures to be passed through to the origin.
    pub fn passes_through(&self) -> bool {
        self.pass_through.load(Ordering::Acquire)
    }

    pub fn pending_tasks(&self) -> usize {
        self.tasks.pending()
    }

    pub async fn drain(&self) {
        self.tasks.drain().await;
    }
}

impl WaitUntil for RequestContext {
    fn wait_until(&self, task: DeferredTask) {
        self.tasks.wait_until(task);
    }
}

impl ExecutionContext for RequestContext {
    fn pass_through_on_exception(&self) {
        self.pass_through.store(true, Ordering::Release);
    }

    fn props(&self) -> &Props {
        &self.props
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn test_request_context() {
        let ctx = RequestContext::new();
        assert!(!ctx.passes_through());
        assert!(ctx.props().is_empty());

        ctx.pass_through_on_exception();
        assert!(ctx.passes_through());

        let done = Arc::new(AtomicUsize::new(0));
        let done_clone = done.clone();
        ctx.wait_until(Box::pin(async move {
            tokio::task::yield_now().await;
            done_clone.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(ctx.pending_tasks(), 1);

        ctx.drain().await;
        assert_eq!(done.load(Ordering::SeqCst), 1);
        assert_eq!(ctx.pending_tasks(), 0);
    }
}
