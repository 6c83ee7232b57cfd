//! Peer Credentials and Authentication
//!
//! A [`Credential`] is the authenticated identity of the remote peer on one
//! connection. It is produced once, by the handshake, and never changed
//! afterwards: narrowing the caller's privileges with an extra group yields a
//! new value through [`Credential::with_extra_group`].
//!
//! Turning a raw handshake into a credential is the job of an
//! [`Authenticator`]. [`SharedSecretAuthenticator`] maps pre-shared tokens to
//! credentials.
//!
//! # Authorization Properties
//!
//! Methods declare the properties a caller must satisfy (at least one of):
//!
//! - `any` / `all`: everybody, including anonymous callers
//! - `authenticated`: any caller that completed a handshake
//! - anything else: the caller's effective group, or one of its properties
//!
//! # Example
//!
//! ```
//! use gridrpc_common::credentials::Credential;
//!
//! let anonymous = Credential::anonymous();
//! assert!(anonymous.satisfies("any"));
//! assert!(!anonymous.satisfies("authenticated"));
//!
//! let admin = Credential::new("/DC=org/CN=alice").with_group("dirac_admin");
//! assert!(admin.satisfies("dirac_admin"));
//!
//! // Acting as a narrower group hides the original one.
//! let narrowed = admin.with_extra_group("dirac_user");
//! assert!(!narrowed.satisfies("dirac_admin"));
//! assert!(narrowed.satisfies("dirac_user"));
//! ```

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::protocol::error::{Result, RpcError};
use crate::protocol::Handshake;

pub const PROPERTY_ANY: &str = "any";
pub const PROPERTY_ALL: &str = "all";
pub const PROPERTY_AUTHENTICATED: &str = "authenticated";

/// Authenticated identity of a remote peer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credential {
    /// Identity name; `None` for anonymous peers
    pub identity: Option<String>,
    /// Group or role the identity belongs to
    pub group: Option<String>,
    /// Properties granted to the identity's group
    #[serde(default)]
    pub properties: Vec<String>,
    /// Group the caller asserted for this call, narrowing its privileges
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra_group: Option<String>,
}

impl Credential {
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            identity: Some(identity.into()),
            ..Self::default()
        }
    }

    /// The credential of a peer that performed no handshake.
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    pub fn with_properties<I, P>(mut self, properties: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<String>,
    {
        self.properties = properties.into_iter().map(Into::into).collect();
        self
    }

    /// Returns a copy acting as `group`; `self` is left untouched.
    pub fn with_extra_group(&self, group: impl Into<String>) -> Self {
        let mut narrowed = self.clone();
        narrowed.extra_group = Some(group.into());
        narrowed
    }

    pub fn is_authenticated(&self) -> bool {
        self.identity.is_some()
    }

    /// The group used for authorization: the asserted extra group if any.
    pub fn effective_group(&self) -> Option<&str> {
        self.extra_group.as_deref().or(self.group.as_deref())
    }

    /// Whether this credential satisfies one authorization property.
    pub fn satisfies(&self, property: &str) -> bool {
        if property.eq_ignore_ascii_case(PROPERTY_ANY) || property.eq_ignore_ascii_case(PROPERTY_ALL) {
            return true;
        }
        if property.eq_ignore_ascii_case(PROPERTY_AUTHENTICATED) {
            return self.is_authenticated();
        }
        if self.effective_group() == Some(property) {
            return true;
        }
        // Properties belong to the original group; an extra group drops them.
        self.extra_group.is_none()
            && self.is_authenticated()
            && self.properties.iter().any(|p| p == property)
    }

    /// Whether this credential satisfies at least one of `properties`.
    pub fn satisfies_any<S: AsRef<str>>(&self, properties: &[S]) -> bool {
        properties.iter().any(|p| self.satisfies(p.as_ref()))
    }
}

impl fmt::Display for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.identity, self.effective_group()) {
            (Some(identity), Some(group)) => write!(f, "{}@{}", identity, group),
            (Some(identity), None) => write!(f, "{}", identity),
            (None, _) => write!(f, "anonymous"),
        }
    }
}

/// Turns a transport handshake into a peer credential.
pub trait Authenticator: Send + Sync {
    fn authenticate(&self, handshake: &Handshake) -> Result<Credential>;
}

/// Authenticates peers by pre-shared token.
///
/// Tokens are compared in constant time.
#[derive(Clone, Default)]
pub struct SharedSecretAuthenticator {
    tokens: HashMap<String, Credential>,
}

impl SharedSecretAuthenticator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(mut self, token: impl Into<String>, credential: Credential) -> Self {
        self.tokens.insert(token.into(), credential);
        self
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

impl Authenticator for SharedSecretAuthenticator {
    fn authenticate(&self, handshake: &Handshake) -> Result<Credential> {
        // Walk every entry so the time taken does not depend on which one matched.
        let mut found = None;
        for (token, credential) in &self.tokens {
            if constant_time_eq(token, &handshake.token) {
                found = Some(credential);
            }
        }
        found
            .cloned()
            .ok_or_else(|| RpcError::HandshakeFailed("unknown token".to_string()))
    }
}

impl fmt::Debug for SharedSecretAuthenticator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SharedSecretAuthenticator({} tokens)", self.tokens.len())
    }
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (byte_a, byte_b) in a.bytes().zip(b.bytes()) {
        result |= byte_a ^ byte_b;
    }

    result == 0
}
