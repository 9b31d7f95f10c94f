//! End-to-end tests against a live server on an ephemeral port.

use std::sync::Arc;

use cas::{BlobStore, ContentHash, FileStore};
use reqwest::{header, StatusCode};
use rstr::serve::serve;
use rstr::web::AppState;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

const HELLO_HASH: &str = "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9";

struct TestServer {
    url: String,
    store: Arc<FileStore>,
    shutdown: Option<oneshot::Sender<()>>,
    _temp_dir: TempDir,
}

impl TestServer {
    async fn start() -> anyhow::Result<Self> {
        let temp_dir = TempDir::new()?;
        let store = Arc::new(FileStore::at_path(temp_dir.path().join("store"))?);
        let state = AppState {
            store: Arc::clone(&store),
            list_limit: 100,
        };

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let url = format!("http://{}", listener.local_addr()?);
        let (tx, rx) = oneshot::channel::<()>();

        tokio::spawn(async move {
            let shutdown = async move {
                let _ = rx.await;
            };
            if let Err(e) = serve(listener, state, shutdown).await {
                eprintln!("Test server error: {:?}", e);
            }
        });

        Ok(Self {
            url,
            store,
            shutdown: Some(tx),
            _temp_dir: temp_dir,
        })
    }

    fn blob_url(&self, hash: &str) -> String {
        format!("{}/blobs/{}", self.url, hash)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn hello_world_lifecycle() -> anyhow::Result<()> {
    let server = TestServer::start().await?;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{}/blobs", server.url))
        .header(header::CONTENT_TYPE, "text/plain")
        .body("hello world")
        .send()
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(
        response.headers()[header::LOCATION],
        format!("/blobs/{}", HELLO_HASH)
    );
    let json: serde_json::Value = response.json().await?;
    assert_eq!(json["hash"], HELLO_HASH);
    assert_eq!(json["size"], 11);

    let response = client
        .post(format!("{}/blobs", server.url))
        .body("hello world")
        .send()
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let json: serde_json::Value = response.json().await?;
    assert_eq!(json["hash"], HELLO_HASH);
    assert_eq!(json["created"], false);

    let response = client.get(server.blob_url(HELLO_HASH)).send().await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "text/plain");
    assert_eq!(response.text().await?, "hello world");

    let response = client.head(server.blob_url(HELLO_HASH)).send().await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_LENGTH], "11");

    let response = client
        .get(server.blob_url(HELLO_HASH))
        .header(header::RANGE, "bytes=0-4")
        .send()
        .await?;
    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(response.text().await?, "hello");

    let response = client.delete(server.blob_url(HELLO_HASH)).send().await?;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = client.get(server.blob_url(HELLO_HASH)).send().await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let json: serde_json::Value = response.json().await?;
    assert_eq!(json["error"], "BlobNotFound");

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_uploads_create_once() -> anyhow::Result<()> {
    let server = TestServer::start().await?;
    let client = reqwest::Client::new();

    let payload: Vec<u8> = (0..4 * 1024 * 1024u32).map(|i| (i % 251) as u8).collect();
    let expected = ContentHash::from_data(&payload);

    let mut tasks = Vec::new();
    for _ in 0..6 {
        let client = client.clone();
        let url = format!("{}/blobs", server.url);
        let body = payload.clone();
        tasks.push(tokio::spawn(async move {
            let response = client.post(url).body(body).send().await?;
            let status = response.status();
            let json: serde_json::Value = response.json().await?;
            Ok::<_, reqwest::Error>((status, json))
        }));
    }

    let mut created = 0;
    for task in tasks {
        let (status, json) = task.await??;
        assert!(status == StatusCode::CREATED || status == StatusCode::OK);
        assert_eq!(json["hash"], expected.as_str());
        if status == StatusCode::CREATED {
            created += 1;
        }
    }
    assert_eq!(created, 1);

    let downloaded = client
        .get(server.blob_url(expected.as_str()))
        .send()
        .await?
        .bytes()
        .await?;
    assert_eq!(downloaded.len(), payload.len());
    assert!(downloaded[..] == payload[..]);
    assert!(server.store.exists(&expected));

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn status_and_listing() -> anyhow::Result<()> {
    let server = TestServer::start().await?;
    let client = reqwest::Client::new();

    let response = client.get(format!("{}/status", server.url)).send().await?;
    assert_eq!(response.status(), StatusCode::OK);

    for body in ["a", "b", "c"] {
        client
            .post(format!("{}/blobs", server.url))
            .body(body)
            .send()
            .await?;
    }

    let listed: Vec<String> = client
        .get(format!("{}/blobs", server.url))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(listed.len(), 3);
    let mut sorted = listed.clone();
    sorted.sort();
    assert_eq!(listed, sorted);

    Ok(())
}
