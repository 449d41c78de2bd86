//! SPDX-FileCopyrightText: © 2025 Cory Parent <goedelsoup+orasi@goedelsoup.io>
//! SPDX-License-Identifier: Apache-2.0
//!

//! Server and client over loopback

use ngrpc::interceptor::{context_interceptor, request_id_interceptor, REQUEST_ID};
use ngrpc::{
    Client, ClientOptions, CustomCredential, EtcdDiscovery, EtcdRegistry, InterceptorChain,
    MemoryStore, Server, ServerOptions, StaticCredentials,
};
use std::sync::Arc;
use std::time::Duration;
use tonic::{Code, Request, Status};
use tonic_health::pb::health_check_response::ServingStatus;
use tonic_health::pb::health_client::HealthClient;
use tonic_health::pb::HealthCheckRequest;

const KEY: &str = "orders-key";
const SECRET: &str = "orders-secret";

fn check(service: &str) -> HealthCheckRequest {
    HealthCheckRequest {
        service: service.to_string(),
    }
}

async fn authenticated_client(address: &str) -> Client {
    Client::new_custom_authentication(
        address,
        CustomCredential::new(KEY, SECRET, false),
        InterceptorChain::new(),
    )
    .await
    .unwrap()
}

#[tokio::test]
async fn test_authenticated_server_registers_and_serves_health() {
    let store = Arc::new(MemoryStore::new());
    let mut server = Server::from_options(
        ServerOptions::new()
            .with_name("orders")
            .with_address("127.0.0.1:0")
            .with_validator(StaticCredentials::new(KEY, SECRET))
            .with_registry(EtcdRegistry::new(store.clone(), "svc")),
    );
    server.start().await.unwrap();

    let address = server.local_addr().unwrap().to_string();
    let key = format!("svc/orders/{}", address);
    assert!(store.get(&key).await.is_some());

    let client = authenticated_client(&address).await;
    let response = HealthClient::new(client.conn())
        .check(check(""))
        .await
        .unwrap();
    assert_eq!(response.into_inner().status(), ServingStatus::Serving);

    let anonymous = Client::new(address.as_str(), InterceptorChain::new())
        .await
        .unwrap();
    let status = HealthClient::new(anonymous.conn())
        .check(check(""))
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::Unauthenticated);

    let wrong = Client::new_custom_authentication(
        address.as_str(),
        CustomCredential::new(KEY, "guess", false),
        InterceptorChain::new(),
    )
    .await
    .unwrap();
    let status = HealthClient::new(wrong.conn())
        .check(check(""))
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::Unauthenticated);

    server.close().await.unwrap();
    assert!(store.get(&key).await.is_none());
    client.close().await.unwrap();
}

#[tokio::test]
async fn test_health_reporter_controls_service_status() {
    let mut server = Server::from_options(
        ServerOptions::new()
            .with_name("orders")
            .with_address("127.0.0.1:0"),
    );
    server.start().await.unwrap();
    let address = server.local_addr().unwrap().to_string();

    let client = Client::new(address.as_str(), InterceptorChain::new())
        .await
        .unwrap();
    let mut health = HealthClient::new(client.conn());
    let serving = health.check(check("orders")).await.unwrap();
    assert_eq!(serving.into_inner().status(), ServingStatus::Serving);

    let mut reporter = server.health_reporter();
    reporter
        .set_service_status("orders", tonic_health::ServingStatus::NotServing)
        .await;
    let not_serving = health.check(check("orders")).await.unwrap();
    assert_eq!(not_serving.into_inner().status(), ServingStatus::NotServing);

    server.close().await.unwrap();
}

#[tokio::test]
async fn test_server_interceptors_run_after_client_interceptors() {
    let require_request_id = |request: Request<()>| -> Result<Request<()>, Status> {
        if request.metadata().get(REQUEST_ID).is_none() {
            return Err(Status::invalid_argument("missing request id"));
        }
        Ok(request)
    };
    let mut server = Server::from_options(
        ServerOptions::new()
            .with_name("orders")
            .with_address("127.0.0.1:0")
            .with_interceptor(require_request_id),
    );
    server.start().await.unwrap();
    let address = server.local_addr().unwrap().to_string();

    let bare = Client::new(address.as_str(), InterceptorChain::new())
        .await
        .unwrap();
    let status = HealthClient::new(bare.conn())
        .check(check(""))
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::InvalidArgument);

    let stamped = Client::new(
        address.as_str(),
        InterceptorChain::new()
            .with(request_id_interceptor())
            .with(context_interceptor(|request: &mut Request<()>| {
                request
                    .metadata_mut()
                    .insert("x-caller", "loopback".parse().unwrap());
            })),
    )
    .await
    .unwrap();
    HealthClient::new(stamped.conn())
        .check(check(""))
        .await
        .unwrap();

    server.close().await.unwrap();
}

#[tokio::test]
async fn test_discovered_client_reaches_registered_server() {
    let store = Arc::new(MemoryStore::new());
    let mut server = Server::from_options(
        ServerOptions::new()
            .with_name("orders")
            .with_address("127.0.0.1:0")
            .with_registry(EtcdRegistry::new(store.clone(), "svc")),
    );
    server.start().await.unwrap();

    let client = Client::connect(
        ClientOptions::new()
            .with_service("orders")
            .with_discovery(EtcdDiscovery::new(store.clone(), "svc")),
    )
    .await
    .unwrap();
    assert_eq!(client.target(), "etcd:///svc/orders");

    let response = tokio::time::timeout(
        Duration::from_secs(5),
        HealthClient::new(client.conn()).check(check("")),
    )
    .await
    .expect("discovered endpoint answers")
    .unwrap();
    assert_eq!(response.into_inner().status(), ServingStatus::Serving);

    client.close().await.unwrap();
    server.close().await.unwrap();
}
