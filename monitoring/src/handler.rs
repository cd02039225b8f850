use crate::context::ExecutionContext;
use crate::errors::HandlerError;
use async_trait::async_trait;
use hyper::body::Bytes;
use hyper::{Request, Response};
use std::future::Future;
use std::pin::Pin;

pub type HandlerResult = Result<Response<Bytes>, HandlerError>;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Reduced handler signature, as invoked on an entity instance.
#[async_trait]
pub trait Fetch: Send + Sync {
    async fn fetch(&self, request: Request<Bytes>) -> HandlerResult;
}

/// Full handler signature expected by the monitoring wrapper.
#[async_trait]
pub trait ExportedFetch<Env>: Send + Sync
where
    Env: Send + Sync,
{
    async fn fetch(
        &self,
        request: Request<Bytes>,
        env: &Env,
        ctx: &dyn ExecutionContext,
    ) -> HandlerResult;
}

/// Adapts a closure into a [`Fetch`] handler. See [`fetch_fn`].
pub struct FetchFn<F> {
    f: F,
}

/// Creates a [`Fetch`] handler from an async closure.
pub fn fetch_fn<F, Fut>(f: F) -> FetchFn<F>
where
    F: Fn(Request<Bytes>) -> Fut + Send + Sync,
    Fut: Future<Output = HandlerResult> + Send,
{
    FetchFn { f }
}

#[async_trait]
impl<F, Fut> Fetch for FetchFn<F>
where
    F: Fn(Request<Bytes>) -> Fut + Send + Sync,
    Fut: Future<Output = HandlerResult> + Send,
{
    async fn fetch(&self, request: Request<Bytes>) -> HandlerResult {
        (self.f)(request).await
    }
}

/// Presents a reduced handler under the full signature; env and ctx are not
/// passed through.
pub(crate) struct IgnoreContext<H>(pub H);

#[async_trait]
impl<Env, H> ExportedFetch<Env> for IgnoreContext<H>
where
    Env: Send + Sync,
    H: Fetch,
{
    async fn fetch(
        &self,
        request: Request<Bytes>,
        _env: &Env,
        _ctx: &dyn ExecutionContext,
    ) -> HandlerResult {
        self.0.fetch(request).await
    }
}
