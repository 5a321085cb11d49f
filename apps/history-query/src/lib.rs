pub mod aggregate;
pub mod config;
pub mod error;
pub mod http;
pub mod partitions;
pub mod query;
pub mod request;
pub mod selector;
pub mod service;
pub mod sql;
pub mod store;
pub mod types;
pub mod window;

#[cfg(test)]
pub(crate) mod test_support;
