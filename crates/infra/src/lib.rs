//! Infrastructure layer: remote catalog adapters, retry policy, configuration.

pub mod catalog;
pub mod config;
pub mod retry;

pub use catalog::{
    CatalogSeed, GraphqlCatalogClient, GraphqlCatalogConfig, InMemoryCatalog, WriteCall,
};
pub use config::{AppConfig, CatalogBackend, ConfigError};
pub use retry::{BackoffStrategy, RetryPolicy};
