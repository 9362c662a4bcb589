//! Scheme store client over the HTTP host, against a mock server.

use mockito::{Matcher, Server};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use vllm_panel::{Configuration, EnvironmentTag, HttpProcessHost, SaveTarget, SchemeError, SchemeId, SchemeStoreClient};

fn client_for(server: &Server) -> SchemeStoreClient {
    let host = HttpProcessHost::new(&server.url(), Duration::from_secs(5)).unwrap();
    SchemeStoreClient::new(Arc::new(host))
}

fn listing() -> serde_json::Value {
    json!({
        "schemes": [
            {"id": 1, "name": "qwen", "envType": "linux",
             "config": {"modelPath": "/mnt/models/qwen", "port": "8001"}},
            {"id": 2, "name": "llama", "config": {}}
        ]
    })
}

#[tokio::test]
async fn test_refresh_and_load_coerce_stored_configuration() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/api/schemes")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(listing().to_string())
        .create_async()
        .await;

    let mut client = client_for(&server);
    assert_eq!(client.refresh().await.unwrap(), 2);

    let (config, env) = client.load(&SchemeId::from("1")).unwrap();
    assert_eq!(config.port, 8001);
    assert_eq!(config.model_path, "/mnt/models/qwen");
    assert_eq!(env, EnvironmentTag::Linux);

    let (config, env) = client.load(&SchemeId::from("2")).unwrap();
    assert_eq!(config, Configuration::default());
    assert_eq!(env, EnvironmentTag::Wsl);
}

#[tokio::test]
async fn test_save_posts_scheme_envelope() {
    let mut server = Server::new_async().await;
    let create = server
        .mock("POST", "/api/schemes")
        .match_body(Matcher::PartialJson(json!({
            "scheme": {"name": "m1", "envType": "linux", "config": {"modelPath": "/mnt/models/m1"}}
        })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            json!({"success": true, "scheme": {"id": 7, "name": "m1", "envType": "linux",
                   "config": {"modelPath": "/mnt/models/m1"}}})
            .to_string(),
        )
        .create_async()
        .await;

    let mut client = client_for(&server);
    let mut config = Configuration::default();
    config.model_path = "/mnt/models/m1".to_string();
    let saved = client
        .save(SaveTarget::New { name: "m1".to_string() }, &config, EnvironmentTag::Linux)
        .await
        .unwrap();

    create.assert_async().await;
    assert_eq!(saved.id, SchemeId::from("7"));
    assert_eq!(client.schemes().len(), 1);
}

#[tokio::test]
async fn test_rename_rolls_back_when_store_fails() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/api/schemes")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(listing().to_string())
        .create_async()
        .await;
    server
        .mock("PUT", "/api/schemes/1")
        .with_status(500)
        .create_async()
        .await;

    let mut client = client_for(&server);
    client.refresh().await.unwrap();
    let result = client.rename(&SchemeId::from("1"), "qwen-72b").await;

    assert!(matches!(result, Err(SchemeError::Transport(_))));
    assert_eq!(client.get(&SchemeId::from("1")).unwrap().name, "qwen");
}

#[tokio::test]
async fn test_rejected_delete_keeps_cache() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/api/schemes")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(listing().to_string())
        .create_async()
        .await;
    server
        .mock("DELETE", "/api/schemes/2")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"success": false, "error": "scheme is locked"}"#)
        .create_async()
        .await;

    let mut client = client_for(&server);
    client.refresh().await.unwrap();
    let result = client.delete(&SchemeId::from("2"), |_| true).await;

    assert_eq!(result, Err(SchemeError::Rejected("scheme is locked".to_string())));
    assert_eq!(client.schemes().len(), 2);
}

#[tokio::test]
async fn test_scheme_with_null_config_loads_defaults() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/api/schemes")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(json!({"schemes": [{"id": 4, "name": "blank", "envType": "linux", "config": null}]}).to_string())
        .create_async()
        .await;

    let mut client = client_for(&server);
    assert_eq!(client.refresh().await.unwrap(), 1);

    let (config, env) = client.load(&SchemeId::from("4")).unwrap();
    assert_eq!(config.port, Configuration::default().port);
    assert_eq!(config.model_path, "");
    assert_eq!(env, EnvironmentTag::Linux);
}
