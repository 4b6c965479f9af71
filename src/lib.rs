pub mod config;
pub mod errors;
pub mod filters;
pub mod learning;
pub mod logging;
pub mod query;
pub mod search;
pub mod server;
pub mod store;
