//! HTTP-level tests for the ARM client, run against a local mock server.

use azure_runner_provider::client::{azure::AzureClient, ResourceClient};
use azure_runner_provider::config::{Config, Credentials};
use azure_runner_provider::error::Error;
use pretty_assertions::assert_eq;
use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn test_config() -> Config {
    Config {
        subscription_id: "sub-123".to_string(),
        location: "westeurope".to_string(),
        credentials: Credentials {
            tenant_id: "tenant".to_string(),
            client_id: "client".to_string(),
            client_secret: "secret".to_string(),
        },
        ..Config::default()
    }
}

async fn client_for(server: &MockServer) -> AzureClient {
    AzureClient::with_endpoints(test_config(), &server.uri(), &server.uri()).unwrap()
}

async fn mount_token_endpoint(server: &MockServer, expect: u64) {
    Mock::given(method("POST"))
        .and(path("/tenant/oauth2/v2.0/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "test-token",
            "expires_in": 3600,
            "token_type": "Bearer"
        })))
        .expect(expect)
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_token_is_fetched_once_and_cached() {
    let server = MockServer::start().await;
    mount_token_endpoint(&server, 1).await;

    Mock::given(method("PUT"))
        .and(path("/subscriptions/sub-123/resourcegroups/runner-01"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "/subscriptions/sub-123/resourceGroups/runner-01",
            "name": "runner-01"
        })))
        .expect(2)
        .mount(&server)
        .await;

    let client = client_for(&server).await;
    let tags = Default::default();
    client.create_resource_group("runner-01", &tags).await.unwrap();
    // Second call reuses the cached token; the expect(1) above verifies it.
    client.create_resource_group("runner-01", &tags).await.unwrap();
}

#[tokio::test]
async fn test_create_resource_group_sends_location_and_tags() {
    let server = MockServer::start().await;
    mount_token_endpoint(&server, 1).await;

    Mock::given(method("PUT"))
        .and(path("/subscriptions/sub-123/resourcegroups/runner-01"))
        .and(query_param("api-version", "2021-04-01"))
        .and(body_partial_json(json!({
            "location": "westeurope",
            "tags": { "runner-pool-id": "pool-1" }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "/subscriptions/sub-123/resourceGroups/runner-01",
            "name": "runner-01"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server).await;
    let mut tags = std::collections::HashMap::new();
    tags.insert("runner-pool-id".to_string(), "pool-1".to_string());
    let group = client.create_resource_group("runner-01", &tags).await.unwrap();
    assert_eq!(group.name.as_deref(), Some("runner-01"));
}

#[tokio::test]
async fn test_delete_resource_group_forces_vm_detachment() {
    let server = MockServer::start().await;
    mount_token_endpoint(&server, 1).await;

    Mock::given(method("DELETE"))
        .and(path("/subscriptions/sub-123/resourcegroups/runner-01"))
        .and(query_param(
            "forceDeletionTypes",
            "Microsoft.Compute/virtualMachines,Microsoft.Compute/virtualMachineScaleSets",
        ))
        .respond_with(ResponseTemplate::new(202))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server).await;
    client.delete_resource_group("runner-01", true).await.unwrap();
}

#[tokio::test]
async fn test_missing_resource_maps_to_not_found() {
    let server = MockServer::start().await;
    mount_token_endpoint(&server, 1).await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "error": { "code": "ResourceNotFound" }
        })))
        .mount(&server)
        .await;

    let client = client_for(&server).await;
    let err = client.get_virtual_machine("gone", "gone").await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_api_errors_carry_status_and_body() {
    let server = MockServer::start().await;
    mount_token_endpoint(&server, 1).await;

    Mock::given(method("DELETE"))
        .respond_with(
            ResponseTemplate::new(409)
                .set_body_json(json!({"error": {"code": "ResourceGroupBeingDeleted"}})),
        )
        .mount(&server)
        .await;

    let client = client_for(&server).await;
    let err = client
        .delete_resource_group("runner-01", false)
        .await
        .unwrap_err();
    match err {
        Error::Api { status, message } => {
            assert_eq!(status, 409);
            assert!(message.contains("ResourceGroupBeingDeleted"));
        }
        other => panic!("expected API error, got {other}"),
    }
}

#[tokio::test]
async fn test_rejected_credentials_fail_authentication() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/tenant/oauth2/v2.0/token"))
        .respond_with(
            ResponseTemplate::new(401).set_body_json(json!({"error": "invalid_client"})),
        )
        .mount(&server)
        .await;

    let client = client_for(&server).await;
    let err = client
        .get_virtual_machine("runner-01", "runner-01")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Auth(_)));
}

#[tokio::test]
async fn test_list_filters_by_pool_and_keeps_null_entries() {
    let server = MockServer::start().await;
    mount_token_endpoint(&server, 1).await;

    Mock::given(method("GET"))
        .and(path(
            "/subscriptions/sub-123/providers/Microsoft.Compute/virtualMachines",
        ))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": [
                { "name": "runner-01", "tags": { "runner-pool-id": "pool-1" } },
                { "name": "other", "tags": { "runner-pool-id": "pool-2" } },
                null
            ]
        })))
        .mount(&server)
        .await;

    let client = client_for(&server).await;
    let records = client.list_virtual_machines("pool-1").await.unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(
        records[0].as_ref().and_then(|vm| vm.name.as_deref()),
        Some("runner-01")
    );
    assert!(records[1].is_none());
}

#[tokio::test]
async fn test_max_ephemeral_size_from_sku_capabilities() {
    let server = MockServer::start().await;
    mount_token_endpoint(&server, 1).await;

    Mock::given(method("GET"))
        .and(path(
            "/subscriptions/sub-123/providers/Microsoft.Compute/skus",
        ))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": [
                {
                    "name": "Standard_D2s_v3",
                    "resourceType": "virtualMachines",
                    "capabilities": [
                        { "name": "vCPUs", "value": "2" },
                        { "name": "MaxResourceVolumeMB", "value": "65536" }
                    ]
                },
                {
                    "name": "Standard_B1s",
                    "resourceType": "virtualMachines",
                    "capabilities": []
                }
            ]
        })))
        .mount(&server)
        .await;

    let client = client_for(&server).await;
    assert_eq!(
        client.max_ephemeral_disk_size("Standard_D2s_v3").await.unwrap(),
        64
    );

    let err = client
        .max_ephemeral_disk_size("Standard_B1s")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidSpec(_)));

    let err = client
        .max_ephemeral_disk_size("Standard_Missing")
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}
