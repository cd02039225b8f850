pub mod config;
mod context;
mod dispatcher;
mod env;
mod errors;
mod greeter;
pub mod metrics_defs;
mod service;
mod upstream;

pub use context::RequestContext;
pub use dispatcher::{DispatcherOptions, FrontDispatcher, entity_name, instrumented_dispatcher};
pub use env::{EntityEnv, WorkerEnv};
pub use errors::WorkerError;
pub use greeter::{GreeterEntity, GreeterFactory};
pub use service::{WorkerService, dispatch};
pub use upstream::Upstream;

use monitoring::{MonitorBackend, SentryBackend};
use shared::admin_service::AdminService;
use shared::http::run_http_service;
use std::sync::Arc;

pub async fn run(config: config::Config) -> Result<(), WorkerError> {
    config.validate()?;

    let backend: Arc<dyn MonitorBackend> = Arc::new(SentryBackend::new());
    let env = WorkerEnv::<GreeterFactory>::from_config(&config, backend.clone());
    tracing::info!(namespace = %env.entities.name(), "Starting worker");

    let worker_task = run_http_service(
        &config.listener.host,
        config.listener.port,
        WorkerService::new(env, backend),
    );
    let admin_task = run_http_service(
        &config.admin_listener.host,
        config.admin_listener.port,
        AdminService::<_, WorkerError>::new(|| true),
    );

    tokio::try_join!(worker_task, admin_task)?;
    Ok(())
}
