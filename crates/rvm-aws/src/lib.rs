//! AWS bindings for the rvm reconciliation engine.
//!
//! Implements the `rvm-core` trait seams with the official AWS SDK: STS for
//! cross-account credential brokering, S3 for bundle retrieval, and
//! CloudFormation for per-account stack observation and mutation.

pub mod broker;
pub mod client;
pub mod executor;
pub mod loader;
pub mod reader;
pub mod status;
pub mod template;

pub use broker::StsBroker;
pub use executor::CfnExecutor;
pub use loader::S3BundleLoader;
pub use reader::CfnStateReader;
