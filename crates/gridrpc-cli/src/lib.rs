//! # gridrpc CLI
//!
//! Helpers behind the `gridrpc` binary:
//!
//! - `gridrpc serve`: host the demo [`hello`] service from a configuration file
//! - `gridrpc call`: call a method on a configured service or an explicit URL
//! - `gridrpc ping`: call the built-in `ping` method

pub mod hello;

use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use gridrpc_client::{EndpointSet, RpcClient, Selection};
use gridrpc_common::config::{ConfigTree, ServiceConfig};
use gridrpc_common::protocol::RpcArgs;
use gridrpc_common::{Credential, Endpoint, SharedSecretAuthenticator};
use gridrpc_server::{Dispatcher, RpcService};
use serde_json::Value;

/// Loads a JSON configuration file.
pub fn load_config(path: impl AsRef<Path>) -> Result<ConfigTree> {
    let path = path.as_ref();
    ConfigTree::load(path).with_context(|| format!("failed to load configuration from {}", path.display()))
}

/// Parses the positional argument list of `call`; it must be a JSON array.
pub fn parse_call_args(text: &str) -> Result<RpcArgs> {
    match serde_json::from_str::<Value>(text).context("invalid JSON in arguments")? {
        Value::Array(args) => Ok(args),
        other => bail!("arguments must be a JSON array, got {}", other),
    }
}

/// A token accepted by `serve`, written `token=identity[@group]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenGrant {
    pub token: String,
    pub credential: Credential,
}

impl FromStr for TokenGrant {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let (token, who) = s
            .split_once('=')
            .ok_or_else(|| anyhow!("expected token=identity[@group], got '{}'", s))?;
        if token.is_empty() || who.is_empty() {
            bail!("expected token=identity[@group], got '{}'", s);
        }

        let credential = match who.split_once('@') {
            Some((identity, group)) => Credential::new(identity).with_group(group),
            None => Credential::new(who),
        };
        Ok(Self {
            token: token.to_string(),
            credential,
        })
    }
}

/// Binds the Hello service named `service` as configured in `store`.
///
/// `bind` overrides the configured listen address.
pub async fn start_hello_service(
    store: &ConfigTree,
    service: &str,
    bind: Option<&str>,
    grants: Vec<TokenGrant>,
) -> Result<RpcService> {
    let registry = hello::registry(hello::default_whom(store, service))?;
    let config = ServiceConfig::load(store, service, registry.names());
    let bind = bind.map(str::to_string).unwrap_or_else(|| config.bind_address());

    tracing::info!(
        service,
        protocol = %config.protocol,
        url = %config.public_url(),
        "starting service"
    );

    let authenticator = grants
        .into_iter()
        .fold(SharedSecretAuthenticator::new(), |auth, grant| {
            auth.with_token(grant.token, grant.credential)
        });
    if config.protocol.has_handshake() && authenticator.is_empty() {
        tracing::warn!(service, "token protocol configured but no tokens accepted");
    }

    let dispatcher = Dispatcher::new(config, registry).with_authenticator(Arc::new(authenticator));
    let service = RpcService::bind(&bind, dispatcher).await?;
    Ok(service)
}

/// Builds a client for `service`, either from the configured endpoints or
/// against a single `url`.
pub fn build_client(
    store: Option<&ConfigTree>,
    service: &str,
    token: Option<String>,
    group: Option<String>,
) -> Result<RpcClient> {
    let mut client = match store {
        Some(store) => RpcClient::from_config(store, service)?,
        None => RpcClient::new(EndpointSet::new(service)),
    };
    if let Some(token) = token {
        client = client.with_token(token);
    }
    if let Some(group) = group {
        client = client.with_extra_credentials(group);
    }
    Ok(client)
}

/// Calls `method` and returns its value; a failure result becomes an error.
pub async fn call(client: &RpcClient, url: Option<&str>, method: &str, args: RpcArgs) -> Result<Value> {
    let selection = match url {
        Some(url) => Selection::Pinned(Endpoint::parse(url)?),
        None => Selection::Failover,
    };

    let outcome = client.call(selection, method, args).await?;
    tracing::debug!(served_by = %outcome.served_by, "call answered");
    match outcome.result.failure_kind() {
        Some(kind) => bail!("{:?}: {}", kind, outcome.result.message().unwrap_or_default()),
        None => Ok(outcome.into_value()?),
    }
}
