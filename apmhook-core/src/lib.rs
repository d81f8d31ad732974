//! APM instrumentation adapter for hook-driven request pipelines

pub mod backend;
pub mod carrier;
pub mod config;
pub mod error;
pub mod handles;
pub mod logging;
pub mod mapper;
pub mod pipeline;
pub mod plugin;

pub use carrier::RequestContext;
pub use config::AgentConfig;
pub use logging::{PluginLogger, TracingLogger};
pub use pipeline::LifecyclePlugin;
pub use plugin::ApmPlugin;
