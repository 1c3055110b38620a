//! Web mirror (C4): an HTTP server exposing a [`vaultree_datastore::Datastore`]
//! over GET/HEAD/PUT/DELETE, and a `reqwest`-based client implementing the
//! same four-operation contract against that server. See spec.md §6 for the
//! wire protocol this pair agrees on.

mod client;
mod error;
mod server;

pub use client::{WebClientConfig, WebClientError, WebClientResult, WebDatastoreClient};
pub use error::{ErrorBody, ErrorCode};
pub use server::{router, serve, AppState, WebServerConfig};

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio::io::AsyncReadExt;
    use vaultree_datastore::Datastore;
    use vaultree_name::{BlobName, BlobType};
    use vaultree_storage_memory::MemoryStore;

    use super::*;

    async fn spawn_server() -> (reqwest::Url, Arc<Datastore>) {
        let datastore = Arc::new(Datastore::with_static_handler(Arc::new(MemoryStore::new())));
        let app = router(AppState::new(datastore.clone()));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        let base = reqwest::Url::parse(&format!("http://{addr}/")).unwrap();
        (base, datastore)
    }

    fn static_name(bytes: &[u8]) -> BlobName {
        use sha2::{Digest, Sha256};
        let hash = Sha256::digest(bytes);
        BlobName::from_hash_and_type(&hash, BlobType::STATIC).unwrap()
    }

    #[tokio::test]
    async fn put_then_get_round_trips_over_http() {
        let (base, _ds) = spawn_server().await;
        let client = WebDatastoreClient::new(base);
        let data = b"hello over http".to_vec();
        let name = static_name(&data);

        client.update(&name, &mut std::io::Cursor::new(data.clone())).await.unwrap();
        assert!(client.exists(&name).await.unwrap());

        let mut out = Vec::new();
        client.read(&name, &mut out).await.unwrap();
        assert_eq!(out, data);
    }

    #[tokio::test]
    async fn head_and_get_report_not_found_for_missing_blob() {
        let (base, _ds) = spawn_server().await;
        let client = WebDatastoreClient::new(base);
        let name = static_name(b"never stored");

        assert!(!client.exists(&name).await.unwrap());
        let mut out = Vec::new();
        let err = client.read(&name, &mut out).await.unwrap_err();
        assert!(matches!(err, WebClientError::NotFound(_)));
    }

    #[tokio::test]
    async fn put_with_mismatched_bytes_fails_validation() {
        let (base, _ds) = spawn_server().await;
        let client = WebDatastoreClient::new(base);
        let real_name = static_name(b"expected");
        let wrong_bytes = b"not expected".to_vec();

        let err = client
            .update(&real_name, &mut std::io::Cursor::new(wrong_bytes))
            .await
            .unwrap_err();
        assert!(matches!(err, WebClientError::ValidationFailed(_)));
        assert!(!client.exists(&real_name).await.unwrap());
    }

    #[tokio::test]
    async fn delete_removes_the_blob() {
        let (base, _ds) = spawn_server().await;
        let client = WebDatastoreClient::new(base);
        let data = b"to be deleted".to_vec();
        let name = static_name(&data);

        client.update(&name, &mut std::io::Cursor::new(data)).await.unwrap();
        assert!(client.exists(&name).await.unwrap());

        client.delete(&name).await.unwrap();
        assert!(!client.exists(&name).await.unwrap());
    }

    #[tokio::test]
    async fn delete_of_missing_blob_is_not_found() {
        let (base, _ds) = spawn_server().await;
        let client = WebDatastoreClient::new(base);
        let name = static_name(b"was never here");

        let err = client.delete(&name).await.unwrap_err();
        assert!(matches!(err, WebClientError::NotFound(_)));
    }

    #[tokio::test]
    async fn invalid_blob_name_in_url_is_rejected() {
        let (base, _ds) = spawn_server().await;
        let resp = reqwest::get(base.join("not-a-valid-blob-name-!!!").unwrap()).await.unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);
        let body: ErrorBody = resp.json().await.unwrap();
        assert_eq!(body.code, "INVALID_BLOB_NAME");
    }

    #[tokio::test]
    async fn multipart_upload_reads_the_file_field() {
        let (base, _ds) = spawn_server().await;
        let data = b"multipart payload".to_vec();
        let name = static_name(&data);

        let form = reqwest::multipart::Form::new().part("file", reqwest::multipart::Part::bytes(data.clone()));
        let url = base.join(&name.to_string()).unwrap();
        let resp = reqwest::Client::new().put(url).multipart(form).send().await.unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::OK);

        let client = WebDatastoreClient::new(base);
        let mut out = Vec::new();
        client.read(&name, &mut out).await.unwrap();
        let mut reader = std::io::Cursor::new(out);
        let mut collected = Vec::new();
        reader.read_to_end(&mut collected).await.unwrap();
        assert_eq!(collected, data);
    }

    #[test]
    fn client_config_defaults_timeout_when_absent() {
        let json = r#"{"base_url":"http://localhost:5522/"}"#;
        let config: WebClientConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.timeout_secs, 30);
    }

    #[tokio::test]
    async fn client_built_from_config_can_reach_the_server() {
        let (base, _ds) = spawn_server().await;
        let config = WebClientConfig {
            base_url: base.to_string(),
            timeout_secs: 5,
        };
        let client = WebDatastoreClient::from_config(config).unwrap();
        let name = static_name(b"built from config");
        assert!(!client.exists(&name).await.unwrap());
    }
}
