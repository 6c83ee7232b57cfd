//! The demo Hello service.

use gridrpc_common::config::{ConfigStore, ServiceSection};
use gridrpc_common::protocol::Result;
use gridrpc_common::RpcResult;
use gridrpc_server::{ArgShape, MethodRegistry};

pub const DEFAULT_WHOM: &str = "World";

/// Whom `sayHello` greets when given an empty name: the service's
/// `DefaultWhom` option, or "World".
pub fn default_whom(store: &dyn ConfigStore, service: &str) -> String {
    ServiceSection::new(store, service)
        .get_option("DefaultWhom")
        .filter(|whom| !whom.is_empty())
        .unwrap_or_else(|| DEFAULT_WHOM.to_string())
}

/// Methods exported by the Hello service.
pub fn registry(default_whom: String) -> Result<MethodRegistry> {
    let mut registry = MethodRegistry::new();
    registry.register("sayHello", vec![ArgShape::String], ["all"], move |_ctx, args| {
        let default_whom = default_whom.clone();
        async move {
            let whom = match args[0].as_str() {
                Some("") | None => default_whom,
                Some(whom) => whom.to_string(),
            };
            tracing::info!(%whom, "sayHello called");
            say_hello(&whom)
        }
    })?;
    Ok(registry)
}

fn say_hello(whom: &str) -> RpcResult {
    if whom.eq_ignore_ascii_case("nobody") {
        return RpcResult::error("Not greeting anybody!");
    }
    RpcResult::ok(format!("Hello {}", whom))
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridrpc_common::config::{ConfigTree, ServiceConfig};
    use gridrpc_common::protocol::{FailureKind, Request};
    use gridrpc_common::Credential;
    use gridrpc_server::Dispatcher;
    use serde_json::json;

    #[test]
    fn test_default_whom() {
        let mut store = ConfigTree::new();
        assert_eq!(default_whom(&store, "Framework/Hello"), "World");

        store.set_option("/Systems/Framework/Services/Hello/DefaultWhom", "Grid");
        assert_eq!(default_whom(&store, "Framework/Hello"), "Grid");
    }

    #[test]
    fn test_registry_exports_say_hello() {
        let registry = registry(DEFAULT_WHOM.to_string()).unwrap();
        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["sayHello"]);
        assert_eq!(registry.get("sayHello").unwrap().auth(), ["all".to_string()]);
    }

    #[test]
    fn test_say_hello() {
        assert_eq!(say_hello("Alice").value(), Some(&json!("Hello Alice")));
        assert_eq!(say_hello("NoBody").failure_kind(), Some(FailureKind::Application));
    }

    #[tokio::test]
    async fn test_registry_through_dispatcher() {
        let dispatcher = Dispatcher::new(ServiceConfig::with_defaults("Framework/Hello"), registry("Grid".into()).unwrap());
        let anonymous = Credential::anonymous();

        let greeted = dispatcher
            .dispatch(&anonymous, None, Request::new("sayHello", vec![json!("")]))
            .await;
        assert_eq!(greeted.value(), Some(&json!("Hello Grid")));

        let refused = dispatcher
            .dispatch(&anonymous, None, Request::new("sayHello", vec![json!("nobody")]))
            .await;
        assert_eq!(refused.message(), Some("Not greeting anybody!"));
    }
}
