pub mod config;
pub mod optimizer;
pub mod permission;
pub mod principal;
pub mod query;
pub mod request;
pub mod store;
pub mod types;

pub use config::EngineConfig;
pub use optimizer::{Cursor, OptimizerStats, QueryOptimizer};
pub use permission::{Criteria, PermissionEngine};
pub use principal::Principal;
pub use request::RequestContext;
pub use store::{DocumentSource, DocumentStore};
