pub mod agent;
pub mod backoff;
pub mod capture;
pub mod client;
pub mod config;
pub mod discovery;
pub mod pipeline;
