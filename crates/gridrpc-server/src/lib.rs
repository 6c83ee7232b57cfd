//! gridrpc server
//!
//! This crate hosts services: a [`MethodRegistry`] of exported methods, the
//! [`Dispatcher`] that authorizes, type-checks and admits each request, and
//! the [`RpcService`] TCP listener that feeds it connections.

pub mod dispatcher;
pub mod registry;
pub mod service;

pub use dispatcher::{Dispatcher, DispatcherStats, PingInfo};
pub use registry::{ArgShape, BoxFuture, CallContext, Handler, MethodEntry, MethodRegistry, PING_METHOD};
pub use service::{RpcService, ShutdownHandle, DEFAULT_MAX_REQUEST_BYTES};
