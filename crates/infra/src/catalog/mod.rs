//! `CatalogClient` adapters.

mod graphql;
mod in_memory;
mod queries;

pub use graphql::{GraphqlCatalogClient, GraphqlCatalogConfig};
pub use in_memory::{CatalogSeed, InMemoryCatalog, WriteCall};
