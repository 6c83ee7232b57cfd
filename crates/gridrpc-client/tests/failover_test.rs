//! Client call path against real services.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use gridrpc_client::{CacheKey, ConnectionCache, EndpointSet, RpcClient, Selection};
use gridrpc_common::config::ServiceConfig;
use gridrpc_common::protocol::{FailureKind, RpcError, RpcResult};
use gridrpc_common::{Credential, Endpoint, Protocol, SharedSecretAuthenticator};
use gridrpc_server::{ArgShape, Dispatcher, MethodRegistry, RpcService};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::Notify;

fn hello_registry(calls: Arc<AtomicUsize>) -> MethodRegistry {
    let mut registry = MethodRegistry::new();
    registry
        .register("sayHello", vec![ArgShape::String], ["all"], move |ctx, args| {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                match args[0].as_str() {
                    Some("nobody") => RpcResult::error("not greeting nobody"),
                    Some(name) => RpcResult::ok(format!("Hello {} from {}", name, ctx.service)),
                    None => RpcResult::error("no name"),
                }
            }
        })
        .unwrap();
    registry
}

async fn start_service(name: &str, calls: Arc<AtomicUsize>) -> SocketAddr {
    start_dispatcher(Dispatcher::new(ServiceConfig::with_defaults(name), hello_registry(calls))).await
}

async fn start_dispatcher(dispatcher: Dispatcher) -> SocketAddr {
    let service = RpcService::bind("127.0.0.1:0", dispatcher).await.unwrap();
    let addr = service.local_addr().unwrap();
    tokio::spawn(service.run());
    addr
}

/// Accepts connections and drops them immediately, counting them.
async fn start_dropper() -> (SocketAddr, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let accepted = Arc::new(AtomicUsize::new(0));
    let counter = accepted.clone();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            counter.fetch_add(1, Ordering::SeqCst);
            drop(stream);
        }
    });
    (addr, accepted)
}

fn endpoint(addr: SocketAddr) -> Endpoint {
    Endpoint::new(Protocol::Plain, addr.to_string())
}

#[tokio::test]
async fn test_failover_stops_at_first_success() {
    let (dead, dead_accepts) = start_dropper().await;
    let live_calls = Arc::new(AtomicUsize::new(0));
    let live = start_service("Framework/Hello", live_calls.clone()).await;
    let spare_calls = Arc::new(AtomicUsize::new(0));
    let spare = start_service("Framework/Hello", spare_calls.clone()).await;

    let client = RpcClient::new(EndpointSet::new("Framework/Hello"));
    let outcome = client
        .call_endpoints(&[endpoint(dead), endpoint(live), endpoint(spare)], "sayHello", vec![json!("World")])
        .await
        .unwrap();

    assert_eq!(outcome.result.value(), Some(&json!("Hello World from Framework/Hello")));
    assert_eq!(outcome.served_by, endpoint(live));
    assert_eq!(dead_accepts.load(Ordering::SeqCst), 1);
    assert_eq!(live_calls.load(Ordering::SeqCst), 1);
    assert_eq!(spare_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_all_endpoints_failed_reports_last_failure() {
    let (first, _) = start_dropper().await;
    let closed = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };

    let client = RpcClient::new(EndpointSet::new("Framework/Hello"));
    let err = client
        .call_endpoints(&[endpoint(first), endpoint(closed)], "sayHello", vec![json!("x")])
        .await
        .unwrap_err();

    match err {
        RpcError::AllEndpointsFailed(message) => assert!(message.contains(&closed.to_string()), "{}", message),
        other => panic!("unexpected error: {}", other),
    }
}

#[tokio::test]
async fn test_application_failure_is_not_retried() {
    let first_calls = Arc::new(AtomicUsize::new(0));
    let first = start_service("Framework/Hello", first_calls.clone()).await;
    let second_calls = Arc::new(AtomicUsize::new(0));
    let second = start_service("Framework/Hello", second_calls.clone()).await;

    let client = RpcClient::new(EndpointSet::new("Framework/Hello"));
    let outcome = client
        .call_endpoints(&[endpoint(first), endpoint(second)], "sayHello", vec![json!("nobody")])
        .await
        .unwrap();

    assert_eq!(outcome.result.failure_kind(), Some(FailureKind::Application));
    assert_eq!(outcome.served_by, endpoint(first));
    assert_eq!(second_calls.load(Ordering::SeqCst), 0);

    // Shape errors are not availability problems either.
    let outcome = client
        .call_endpoints(&[endpoint(first), endpoint(second)], "sayHello", vec![json!(1)])
        .await
        .unwrap();
    assert_eq!(outcome.result.failure_kind(), Some(FailureKind::BadArgumentShape));
    assert_eq!(second_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_busy_endpoint_fails_over() {
    let gate = Arc::new(Notify::new());
    let entered = Arc::new(Notify::new());
    let mut registry = MethodRegistry::new();
    {
        let gate = gate.clone();
        let entered = entered.clone();
        registry
            .register("sayHello", vec![ArgShape::String], ["all"], move |_ctx, _args| {
                let gate = gate.clone();
                let entered = entered.clone();
                async move {
                    entered.notify_one();
                    gate.notified().await;
                    RpcResult::ok("slow hello")
                }
            })
            .unwrap();
    }
    let busy = start_dispatcher(Dispatcher::new(
        ServiceConfig::with_defaults("Framework/Hello").with_max_threads(1),
        registry,
    ))
    .await;
    let other = start_service("Framework/Hello", Arc::new(AtomicUsize::new(0))).await;

    let client = RpcClient::new(EndpointSet::new("Framework/Hello"));
    let occupying = {
        let client = client.clone();
        tokio::spawn(async move { client.call_endpoints(&[endpoint(busy)], "sayHello", vec![json!("a")]).await })
    };
    entered.notified().await;

    let outcome = client
        .call_endpoints(&[endpoint(busy), endpoint(other)], "sayHello", vec![json!("b")])
        .await
        .unwrap();
    assert_eq!(outcome.served_by, endpoint(other));

    gate.notify_one();
    assert!(occupying.await.unwrap().unwrap().result.is_ok());
}

#[tokio::test]
async fn test_wrong_service_fails_over() {
    let wrong = start_service("Framework/Other", Arc::new(AtomicUsize::new(0))).await;
    let right = start_service("Framework/Hello", Arc::new(AtomicUsize::new(0))).await;

    let endpoints = EndpointSet::new("Framework/Hello").with_replicas(vec![endpoint(wrong), endpoint(right)]);
    let client = RpcClient::new(endpoints);

    for _ in 0..4 {
        let outcome = client.call(Selection::Failover, "sayHello", vec![json!("x")]).await.unwrap();
        assert_eq!(outcome.served_by, endpoint(right));
    }
}

#[tokio::test]
async fn test_pinned_follow_up_and_connection_reuse() {
    let calls = Arc::new(AtomicUsize::new(0));
    let central = start_service("Framework/Hello", calls.clone()).await;

    let client = RpcClient::new(EndpointSet::new("Framework/Hello").with_central(endpoint(central)));
    let first = client.call(Selection::CentralOnly, "sayHello", vec![json!("one")]).await.unwrap();
    assert_eq!(client.cache().idle_count(&CacheKey::new(&endpoint(central), None)).await, 1);

    let second = client
        .call(Selection::Pinned(first.served_by.clone()), "sayHello", vec![json!("two")])
        .await
        .unwrap();
    assert_eq!(second.served_by, first.served_by);
    assert_eq!(client.cache().idle_count(&CacheKey::new(&endpoint(central), None)).await, 1);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_stale_cached_connection_is_replaced() {
    let calls = Arc::new(AtomicUsize::new(0));
    let dispatcher = Dispatcher::new(ServiceConfig::with_defaults("Framework/Hello"), hello_registry(calls.clone()));
    let service = RpcService::bind("127.0.0.1:0", dispatcher).await.unwrap();
    let addr = service.local_addr().unwrap();
    let handle = service.shutdown_handle();
    let running = tokio::spawn(service.run());

    let client = RpcClient::new(EndpointSet::new("Framework/Hello"));
    client.call_endpoints(&[endpoint(addr)], "sayHello", vec![json!("a")]).await.unwrap();

    // Restart the service on the same port; the cached connection is now dead.
    handle.shutdown();
    running.await.unwrap().unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    let dispatcher = Dispatcher::new(ServiceConfig::with_defaults("Framework/Hello"), hello_registry(calls.clone()));
    let service = RpcService::bind(&addr.to_string(), dispatcher).await.unwrap();
    tokio::spawn(service.run());

    let outcome = client.call_endpoints(&[endpoint(addr)], "sayHello", vec![json!("b")]).await.unwrap();
    assert!(outcome.result.is_ok());
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_timeout_moves_on() {
    // Accepts but never answers.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let silent = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            held.push(stream);
        }
    });
    let live = start_service("Framework/Hello", Arc::new(AtomicUsize::new(0))).await;

    let client = RpcClient::new(EndpointSet::new("Framework/Hello")).with_timeout(Duration::from_millis(200));
    let outcome = client
        .call_endpoints(&[endpoint(silent), endpoint(live)], "sayHello", vec![json!("x")])
        .await
        .unwrap();
    assert_eq!(outcome.served_by, endpoint(live));
}

#[tokio::test]
async fn test_token_and_extra_credentials_end_to_end() {
    let mut registry = MethodRegistry::new();
    registry
        .register("adminOnly", vec![], ["admin"], |ctx, _args| async move {
            RpcResult::ok(ctx.credential.to_string())
        })
        .unwrap();
    let mut config = ServiceConfig::with_defaults("Framework/Admin");
    config.protocol = Protocol::Token;
    let authenticator = SharedSecretAuthenticator::new().with_token("k", Credential::new("root").with_group("admin"));
    let addr = start_dispatcher(Dispatcher::new(config, registry).with_authenticator(Arc::new(authenticator))).await;
    let token_endpoint = Endpoint::new(Protocol::Token, addr.to_string());

    let admin = RpcClient::new(EndpointSet::new("Framework/Admin")).with_token("k");
    let outcome = admin.call_endpoints(&[token_endpoint.clone()], "adminOnly", vec![]).await.unwrap();
    assert_eq!(outcome.result.value(), Some(&json!("root@admin")));

    let narrowed = admin.clone().with_extra_credentials("user");
    let outcome = narrowed.call_endpoints(&[token_endpoint], "adminOnly", vec![]).await.unwrap();
    assert_eq!(outcome.result.failure_kind(), Some(FailureKind::AccessDenied));
}

#[tokio::test]
async fn test_shared_cache_keeps_identities_apart() {
    let mut registry = MethodRegistry::new();
    registry
        .register("whoami", vec![], ["authenticated"], |ctx, _args| async move {
            RpcResult::ok(ctx.credential.identity.unwrap_or_default())
        })
        .unwrap();
    let mut config = ServiceConfig::with_defaults("Framework/Who");
    config.protocol = Protocol::Token;
    let authenticator = SharedSecretAuthenticator::new()
        .with_token("alice-token", Credential::new("alice"))
        .with_token("bob-token", Credential::new("bob"));
    let addr = start_dispatcher(Dispatcher::new(config, registry).with_authenticator(Arc::new(authenticator))).await;
    let token_endpoint = [Endpoint::new(Protocol::Token, addr.to_string())];

    let cache = Arc::new(ConnectionCache::default());
    let alice = RpcClient::new(EndpointSet::new("Framework/Who"))
        .with_cache(cache.clone())
        .with_token("alice-token");
    let bob = RpcClient::new(EndpointSet::new("Framework/Who"))
        .with_cache(cache.clone())
        .with_token("bob-token");

    let seen = alice.call_endpoints(&token_endpoint, "whoami", vec![]).await.unwrap();
    assert_eq!(seen.result.value(), Some(&json!("alice")));

    let seen = bob.call_endpoints(&token_endpoint, "whoami", vec![]).await.unwrap();
    assert_eq!(seen.result.value(), Some(&json!("bob")));

    let switched = alice.clone().with_token("bob-token");
    let seen = switched.call_endpoints(&token_endpoint, "whoami", vec![]).await.unwrap();
    assert_eq!(seen.result.value(), Some(&json!("bob")));

    // Alice's connection is still hers.
    let seen = alice.call_endpoints(&token_endpoint, "whoami", vec![]).await.unwrap();
    assert_eq!(seen.result.value(), Some(&json!("alice")));
    assert_eq!(
        cache
            .idle_count(&CacheKey::new(&token_endpoint[0], Some("bob-token")))
            .await,
        1
    );
}
