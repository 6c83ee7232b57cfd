//! gridrpc common types and transport
//!
//! The shared substrate of the gridrpc services and clients:
//!
//! - [`protocol`] - request and result envelopes, and the error taxonomy
//! - [`transport`] - length-prefixed framing and the credentialed [`Transport`]
//! - [`credentials`] - peer identities, authorization rules and the
//!   [`Authenticator`] seam
//! - [`config`] - the configuration store and per-service settings
//! - [`endpoint`] - endpoint URLs and connection protocols
//!
//! # Example
//!
//! ```
//! use gridrpc_common::{Credential, Request, RpcResult};
//! use serde_json::json;
//!
//! let request = Request::new("sayHello", vec![json!("World")]);
//! assert_eq!(request.method_name, "sayHello");
//!
//! let result = RpcResult::ok(json!("Hello World"));
//! assert!(result.is_ok());
//!
//! assert!(Credential::anonymous().satisfies("any"));
//! ```

pub mod config;
pub mod credentials;
pub mod endpoint;
pub mod protocol;
pub mod transport;

pub use credentials::{Authenticator, Credential, SharedSecretAuthenticator};
pub use endpoint::{Endpoint, Protocol, DEFAULT_PROTOCOL};
pub use protocol::*;
pub use transport::{Mode, Transport};
