use chrono::Duration as ChronoDuration;
use sealdrop::{
    client::{
        Argon2ChaCha, ClientError, KdfParams, Orchestrator, PayloadCipher, PlaintextContainer,
        Recovered, seal,
    },
    clock,
    routes::{BodyLimits, routes},
    services::{
        cache_store::MemoryCacheStore,
        rate_limiter::{RateLimiter, RatePolicies},
        retrieval::RetrievalService,
        session_store::SessionStore,
        upload::UploadPipeline,
    },
    state::AppState,
    storage::MemoryStorage,
    wire::encode_b64,
};
use serde_json::{Value, json};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use url::Url;

async fn spawn_server() -> Url {
    let clock = clock::system();
    let storage = Arc::new(MemoryStorage::new());
    let cache = Arc::new(MemoryCacheStore::new(clock.clone()));
    let sessions = SessionStore::new(cache.clone(), clock.clone(), ChronoDuration::minutes(30));
    let state = AppState {
        uploads: UploadPipeline::new(storage.clone(), sessions, clock.clone()),
        retrieval: RetrievalService::new(storage.clone(), clock, Duration::from_secs(300)),
        limiter: RateLimiter::new(cache, RatePolicies::default()),
        storage,
    };

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = routes(state, BodyLimits::default());
    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });

    Url::parse(&format!("http://{}/", addr)).unwrap()
}

fn cipher() -> Arc<dyn PayloadCipher> {
    Arc::new(Argon2ChaCha::new(KdfParams {
        m_cost_kib: 8,
        t_cost: 1,
        lanes: 1,
    }))
}

/// Seal `container` and push it through init, two chunks and finalize.
async fn upload(base: &Url, file_id: &str, passphrase: &str, container: &PlaintextContainer) {
    let cipher = cipher();
    let sealed = seal(cipher.as_ref(), passphrase, &container.encode().unwrap()).unwrap();
    let http = reqwest::Client::new();

    let init: Value = http
        .post(base.join("upload/init").unwrap())
        .json(&json!({
            "fileId": file_id,
            "totalChunks": 2,
            "totalSize": sealed.ciphertext.len(),
            "iv": encode_b64(&sealed.iv),
            "salt": encode_b64(&sealed.salt),
            "isMultiFile": false,
            "expirationOption": "7d"
        }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let upload_id = init["uploadId"].as_str().unwrap().to_string();

    let (head, tail) = sealed.ciphertext.split_at(sealed.ciphertext.len() / 2);
    for (index, chunk) in [(1, tail), (0, head)] {
        let status = http
            .put(
                base.join(&format!("upload/{}/chunks/{}", upload_id, index))
                    .unwrap(),
            )
            .body(chunk.to_vec())
            .send()
            .await
            .unwrap()
            .status();
        assert!(status.is_success(), "chunk {} rejected: {}", index, status);
    }

    let status = http
        .post(base.join(&format!("upload/{}/finalize", upload_id)).unwrap())
        .json(&json!({ "fileId": file_id, "expirationDays": 7 }))
        .send()
        .await
        .unwrap()
        .status();
    assert!(status.is_success(), "finalize rejected: {}", status);
}

#[tokio::test(flavor = "multi_thread")]
async fn receiver_recovers_the_original_file() {
    let base = spawn_server().await;
    let original = PlaintextContainer::new("report.pdf", "", b"%PDF-1.7 pretend".to_vec());
    upload(&base, "report-1", "hunter2 hunter2", &original).await;

    let receiver = Orchestrator::new(base, cipher());
    let Recovered::File(file) = receiver.download("report-1", "hunter2 hunter2").await.unwrap()
    else {
        panic!("expected a single file");
    };
    assert_eq!(file.name, "report.pdf");
    assert_eq!(file.mime_type, "application/pdf");
    assert_eq!(file.content, b"%PDF-1.7 pretend");
}

#[tokio::test(flavor = "multi_thread")]
async fn wrong_passphrase_and_unknown_ids_fail_cleanly() {
    let base = spawn_server().await;
    let original = PlaintextContainer::new("a.txt", "text/plain", b"secret".to_vec());
    upload(&base, "secret-1", "right", &original).await;

    let receiver = Orchestrator::new(base, cipher());
    assert!(matches!(
        receiver.download("secret-1", "wrong").await,
        Err(ClientError::DecryptionFailed)
    ));
    assert!(matches!(
        receiver.download("nope", "right").await,
        Err(ClientError::NotFound(id)) if id == "nope"
    ));
}
