//! Method registry
//!
//! Every remotely callable method is registered explicitly at startup with
//! its argument signature and the authorization properties a caller needs.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;

use gridrpc_common::protocol::{Result, RpcArgs, RpcError, RpcResult};
use gridrpc_common::Credential;
use serde_json::Value;

/// Name of the method every dispatcher answers itself.
pub const PING_METHOD: &str = "ping";

pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

/// Coarse type category of one positional argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgShape {
    String,
    /// Any integral number, signed or not.
    Integer,
    /// Any number, integral or not.
    Float,
    Bool,
    List,
    Mapping,
    Any,
    OneOf(Vec<ArgShape>),
}

impl ArgShape {
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            ArgShape::String => value.is_string(),
            ArgShape::Integer => value.is_i64() || value.is_u64(),
            ArgShape::Float => value.is_number(),
            ArgShape::Bool => value.is_boolean(),
            ArgShape::List => value.is_array(),
            ArgShape::Mapping => value.is_object(),
            ArgShape::Any => true,
            ArgShape::OneOf(shapes) => shapes.iter().any(|s| s.matches(value)),
        }
    }
}

impl fmt::Display for ArgShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgShape::String => f.write_str("string"),
            ArgShape::Integer => f.write_str("integer"),
            ArgShape::Float => f.write_str("float"),
            ArgShape::Bool => f.write_str("bool"),
            ArgShape::List => f.write_str("list"),
            ArgShape::Mapping => f.write_str("mapping"),
            ArgShape::Any => f.write_str("any"),
            ArgShape::OneOf(shapes) => {
                let names: Vec<String> = shapes.iter().map(ToString::to_string).collect();
                f.write_str(&names.join("|"))
            }
        }
    }
}

fn shape_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(n) if n.is_f64() => "float",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "mapping",
    }
}

/// What a handler gets to know about the call it serves.
#[derive(Debug, Clone)]
pub struct CallContext {
    /// Caller credential, already narrowed by any extra credentials
    pub credential: Credential,
    pub peer: Option<SocketAddr>,
    pub method: String,
    pub service: String,
}

/// An async method body.
///
/// Implemented for any `Fn(CallContext, RpcArgs) -> impl Future<Output = RpcResult>`,
/// so closures and `async fn`s register directly.
pub trait Handler: Send + Sync + 'static {
    fn call(&self, ctx: CallContext, args: RpcArgs) -> BoxFuture<RpcResult>;
}

impl<F, Fut> Handler for F
where
    F: Fn(CallContext, RpcArgs) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = RpcResult> + Send + 'static,
{
    fn call(&self, ctx: CallContext, args: RpcArgs) -> BoxFuture<RpcResult> {
        Box::pin((self)(ctx, args))
    }
}

pub type BlockingHandler = dyn Fn(CallContext, RpcArgs) -> RpcResult + Send + Sync + 'static;

#[derive(Clone)]
pub(crate) enum HandlerKind {
    Async(Arc<dyn Handler>),
    Blocking(Arc<BlockingHandler>),
}

/// One exported method.
#[derive(Clone)]
pub struct MethodEntry {
    name: String,
    signature: Vec<ArgShape>,
    auth: Vec<String>,
    pub(crate) handler: HandlerKind,
}

impl MethodEntry {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn signature(&self) -> &[ArgShape] {
        &self.signature
    }

    /// Properties of which the caller must hold at least one.
    pub fn auth(&self) -> &[String] {
        &self.auth
    }

    /// Checks `args` against the signature.
    ///
    /// At least as many arguments as declared shapes are required; extra
    /// trailing arguments are passed through unchecked.
    pub fn check_args(&self, args: &[Value]) -> std::result::Result<(), String> {
        if args.len() < self.signature.len() {
            return Err(format!(
                "{} expects {}, got {} argument(s)",
                self.name,
                self.describe_signature(),
                args.len()
            ));
        }

        for (index, (shape, arg)) in self.signature.iter().zip(args).enumerate() {
            if !shape.matches(arg) {
                return Err(format!(
                    "{} expects {}: argument {} should be {}, got {}",
                    self.name,
                    self.describe_signature(),
                    index,
                    shape,
                    shape_of(arg)
                ));
            }
        }
        Ok(())
    }

    fn describe_signature(&self) -> String {
        let shapes: Vec<String> = self.signature.iter().map(ToString::to_string).collect();
        format!("({})", shapes.join(", "))
    }
}

impl fmt::Debug for MethodEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodEntry")
            .field("name", &self.name)
            .field("signature", &self.signature)
            .field("auth", &self.auth)
            .finish_non_exhaustive()
    }
}

/// The table of a service's exported methods. Immutable once the service
/// starts.
///
/// # Example
///
/// ```
/// use gridrpc_server::{ArgShape, MethodRegistry};
/// use gridrpc_common::RpcResult;
/// use serde_json::json;
///
/// let mut registry = MethodRegistry::new();
/// registry
///     .register("echo", vec![ArgShape::Any], vec!["any"], |_ctx, args| async move {
///         RpcResult::ok(args[0].clone())
///     })
///     .unwrap();
///
/// assert!(registry.get("echo").is_some());
/// ```
#[derive(Default)]
pub struct MethodRegistry {
    entries: HashMap<String, MethodEntry>,
}

impl MethodRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an async method.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::DuplicateMethod`] if `name` is already registered
    /// or is the built-in `ping`.
    pub fn register<I, S, F, Fut>(
        &mut self,
        name: impl Into<String>,
        signature: Vec<ArgShape>,
        auth: I,
        handler: F,
    ) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        F: Fn(CallContext, RpcArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = RpcResult> + Send + 'static,
    {
        self.register_handler(name, signature, auth, handler)
    }

    /// Registers a [`Handler`] implementation.
    pub fn register_handler<I, S, H>(
        &mut self,
        name: impl Into<String>,
        signature: Vec<ArgShape>,
        auth: I,
        handler: H,
    ) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        H: Handler,
    {
        self.insert(name.into(), signature, auth, HandlerKind::Async(Arc::new(handler)))
    }

    /// Registers a method whose body blocks; it runs on the blocking pool.
    pub fn register_blocking<I, S, F>(
        &mut self,
        name: impl Into<String>,
        signature: Vec<ArgShape>,
        auth: I,
        handler: F,
    ) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        F: Fn(CallContext, RpcArgs) -> RpcResult + Send + Sync + 'static,
    {
        self.insert(name.into(), signature, auth, HandlerKind::Blocking(Arc::new(handler)))
    }

    fn insert<I, S>(&mut self, name: String, signature: Vec<ArgShape>, auth: I, handler: HandlerKind) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if name == PING_METHOD || self.entries.contains_key(&name) {
            return Err(RpcError::DuplicateMethod(name));
        }

        let entry = MethodEntry {
            name: name.clone(),
            signature,
            auth: auth.into_iter().map(Into::into).collect(),
            handler,
        };
        tracing::debug!(method = %name, auth = ?entry.auth, "registered method");
        self.entries.insert(name, entry);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&MethodEntry> {
        self.entries.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
