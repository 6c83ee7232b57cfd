//! Configuration access
//!
//! [`ConfigStore`] is the read interface to the hierarchical configuration;
//! [`ConfigTree`] is an in-memory implementation loaded from JSON.
//! [`ServiceSection`] reads one service's options with typed defaults, and
//! [`ServiceConfig`] is the resolved snapshot a running service uses.

pub mod service;
pub mod store;

pub use service::{
    split_service_name, system_section, ServiceConfig, ServiceSection, DEFAULT_MAX_THREADS,
    DEFAULT_MAX_THREADS_PER_FUNCTION, DEFAULT_MAX_WAITING_PETITIONS, DEFAULT_PORT,
};
pub use store::{ConfigStore, ConfigTree};
