pub mod api;
pub mod cleanup;
pub mod config;
pub mod export;
pub mod id;
pub mod naming;
pub mod pipeline;
pub mod poller;
pub mod version;
