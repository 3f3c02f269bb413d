pub mod api;
pub mod broker;
pub mod config;
pub mod control_plane;
pub mod error;
pub mod function;
pub mod invocation;
pub mod messages;
pub mod scheduler;
pub mod shutdown;
pub mod store;
pub mod worker;
