//! gridrpc Request Types
//!
//! A request names one exported method and carries its positional arguments.

use serde::{Deserialize, Serialize};

pub type MethodName = String;
pub type RpcArgs = Vec<serde_json::Value>;

/// One logical call sent by a client as a single frame.
///
/// On the wire this is `{"methodName": ..., "arguments": [...]}`, optionally
/// followed by the logical service name the client is addressing and an
/// asserted extra group used to narrow the caller's privileges.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    pub method_name: MethodName,
    #[serde(default)]
    pub arguments: RpcArgs,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra_credentials: Option<String>,
}

impl Request {
    pub fn new(method_name: impl Into<String>, arguments: RpcArgs) -> Self {
        Request {
            method_name: method_name.into(),
            arguments,
            service: None,
            extra_credentials: None,
        }
    }

    pub fn for_service(mut self, service: impl Into<String>) -> Self {
        self.service = Some(service.into());
        self
    }

    pub fn with_extra_credentials(mut self, group: impl Into<String>) -> Self {
        self.extra_credentials = Some(group.into());
        self
    }
}

/// First frame a client sends on a `token` protocol connection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Handshake {
    pub token: String,
}
