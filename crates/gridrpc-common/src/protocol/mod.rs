pub mod error;
pub mod requests;
pub mod responses;


pub use error::{Result, RpcError};
pub use requests::{Handshake, MethodName, Request, RpcArgs};
pub use responses::{Failure, FailureKind, RpcResult};
