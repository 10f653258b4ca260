use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, Response, StatusCode};
use axum::Router;
use jsonwebtoken::{encode, EncodingKey, Header};
use p384::pkcs8::{EncodePrivateKey, EncodePublicKey, LineEnding};
use p384::SecretKey;
use rand::rngs::OsRng;
use serde_json::{json, Value};
use tempfile::TempDir;
use tessera_crypto::{InlineKeyProvider, UNIT_PLAINTEXT_LEN};
use tessera_server::hub::{BucketKind, MemoryHub};
use tessera_server::middleware::{TokenVerifier, DEFAULT_CLIENT_ID_CLAIM};
use tessera_server::objects::{MemoryObjectStore, ObjectStore};
use tessera_server::{app, AppState};
use tower::ServiceExt;

const PUBLIC_URL: &str = "http://tessera.test";
const ADMIN: &str = "hub-adapter";
const BOUNDARY: &str = "tessera-test-boundary";

struct Node {
    app: Router,
    objects: Arc<MemoryObjectStore>,
    pool: tessera_db::DbPool,
    _dir: TempDir,
}

fn node(hub: Arc<MemoryHub>, key: &SecretKey) -> Node {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("ledger.db");
    let pool = tessera_db::open_ledger(
        db_path.to_str().unwrap(),
        tessera_db::DbRuntimeSettings {
            pool_max_size: 4,
            ..tessera_db::DbRuntimeSettings::default()
        },
    )
    .unwrap();

    let pem = key.to_pkcs8_pem(LineEnding::LF).unwrap();
    let keys = InlineKeyProvider::from_pem_bytes(pem.as_bytes()).unwrap();
    let objects = Arc::new(MemoryObjectStore::new());

    let state = AppState {
        pool: pool.clone(),
        objects: objects.clone(),
        hub,
        keys: Arc::new(keys),
        tokens: Arc::new(TokenVerifier::unverified(DEFAULT_CLIENT_ID_CLAIM)),
        public_url: PUBLIC_URL.to_string(),
        admin_client_id: ADMIN.to_string(),
    };

    Node {
        app: app(state),
        objects,
        pool,
        _dir: dir,
    }
}

fn public_key_hex(key: &SecretKey) -> String {
    let pem = key.public_key().to_public_key_pem(LineEnding::LF).unwrap();
    hex::encode(pem.as_bytes())
}

fn token_for(client_id: &str) -> String {
    encode(
        &Header::default(),
        &json!({ "client_id": client_id }),
        &EncodingKey::from_secret(b"test"),
    )
    .unwrap()
}

fn multipart(fields: &[(&str, &str)], file: Option<(&str, &str, &[u8])>) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            )
            .as_bytes(),
        );
    }
    if let Some((file_name, content_type, data)) = file {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{file_name}\"\r\nContent-Type: {content_type}\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(data);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

async fn send(app: &Router, request: Request<Body>) -> Response<Body> {
    app.clone().oneshot(request).await.unwrap()
}

fn get(uri: &str, client_id: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {}", token_for(client_id)))
        .body(Body::empty())
        .unwrap()
}

fn with_method(method: &str, uri: &str, client_id: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {}", token_for(client_id)))
        .body(Body::empty())
        .unwrap()
}

fn form_request(method: &str, uri: &str, client_id: &str, body: Vec<u8>) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {}", token_for(client_id)))
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap()
}

async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec()
}

async fn body_json(response: Response<Body>) -> Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

fn count(pool: &tessera_db::DbPool, table: &str) -> i64 {
    pool.get()
        .unwrap()
        .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
        .unwrap()
}

fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

#[tokio::test]
async fn health_check_returns_ok() {
    let hub = Arc::new(MemoryHub::new());
    let node = node(hub, &SecretKey::random(&mut OsRng));

    let response = send(
        &node.app,
        Request::builder().uri("/healthz").body(Body::empty()).unwrap(),
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "ok");
    assert_eq!(json["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn requests_without_a_bearer_token_are_rejected() {
    let hub = Arc::new(MemoryHub::new());
    let node = node(hub, &SecretKey::random(&mut OsRng));

    let response = send(
        &node.app,
        Request::builder().uri("/local/tags").body(Body::empty()).unwrap(),
    )
    .await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let json = body_json(response).await;
    assert_eq!(json["error"], "Not authenticated");
}

#[tokio::test]
async fn garbage_tokens_are_forbidden() {
    let hub = Arc::new(MemoryHub::new());
    let node = node(hub, &SecretKey::random(&mut OsRng));

    let response = send(
        &node.app,
        Request::builder()
            .uri("/local/tags")
            .header(header::AUTHORIZATION, "Bearer not-a-jwt")
            .body(Body::empty())
            .unwrap(),
    )
    .await;

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn local_results_can_be_uploaded_tagged_and_read_back() {
    let hub = Arc::new(MemoryHub::new());
    hub.add_analysis("analysis-1", "project-1");
    let node = node(hub, &SecretKey::random(&mut OsRng));
    let data: &[u8] = b"id,score\n1,0.5\n";

    let response = send(
        &node.app,
        form_request(
            "PUT",
            "/local",
            "analysis-1",
            multipart(&[("tag", "run-1")], Some(("results.csv", "text/csv", data))),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let uploaded = body_json(response).await;
    let object_id = uploaded["object_id"].as_str().unwrap().to_string();
    assert_eq!(
        uploaded["url"],
        format!("{PUBLIC_URL}/local/{object_id}")
    );

    let tags = body_json(send(&node.app, get("/local/tags", "analysis-1")).await).await;
    assert_eq!(
        tags,
        json!({ "tags": [{ "name": "run-1", "url": format!("{PUBLIC_URL}/local/tags/run-1") }] })
    );

    let results = body_json(send(&node.app, get("/local/tags/run-1", "analysis-1")).await).await;
    assert_eq!(
        results,
        json!({ "results": [{
            "filename": "results.csv",
            "url": format!("{PUBLIC_URL}/local/{object_id}"),
        }] })
    );

    let response = send(&node.app, get(&format!("/local/{object_id}"), "analysis-1")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "text/csv");
    assert_eq!(body_bytes(response).await, data);
}

#[tokio::test]
async fn local_results_are_scoped_to_the_callers_project() {
    let hub = Arc::new(MemoryHub::new());
    hub.add_analysis("analysis-1", "project-1");
    hub.add_analysis("analysis-2", "project-2");
    let node = node(hub, &SecretKey::random(&mut OsRng));

    let uploaded = body_json(
        send(
            &node.app,
            form_request(
                "PUT",
                "/local",
                "analysis-1",
                multipart(&[("tag", "shared")], Some(("a.bin", "application/octet-stream", b"a".as_slice()))),
            ),
        )
        .await,
    )
    .await;
    let object_id = uploaded["object_id"].as_str().unwrap();

    let response = send(&node.app, get(&format!("/local/{object_id}"), "analysis-2")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let tags = body_json(send(&node.app, get("/local/tags", "analysis-2")).await).await;
    assert_eq!(tags, json!({ "tags": [] }));
}

#[tokio::test]
async fn unknown_callers_and_bad_ids_are_rejected() {
    let hub = Arc::new(MemoryHub::new());
    hub.add_analysis("analysis-1", "project-1");
    let node = node(hub, &SecretKey::random(&mut OsRng));

    let response = send(&node.app, get("/local/tags", "no-such-analysis")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = send(&node.app, get("/local/not-a-uuid", "analysis-1")).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let missing = uuid::Uuid::new_v4();
    let response = send(&node.app, get(&format!("/local/{missing}"), "analysis-1")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn invalid_tags_are_rejected_before_anything_is_stored() {
    let hub = Arc::new(MemoryHub::new());
    hub.add_analysis("analysis-1", "project-1");
    let node = node(hub, &SecretKey::random(&mut OsRng));

    let response = send(
        &node.app,
        form_request(
            "PUT",
            "/local",
            "analysis-1",
            multipart(&[("tag", "-bad-")], Some(("a.bin", "application/octet-stream", b"a".as_slice()))),
        ),
    )
    .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(node.objects.list("local/project-1/").await.unwrap().is_empty());
    assert_eq!(count(&node.pool, "results"), 0);
}

#[tokio::test]
async fn retagging_an_object_under_another_filename_conflicts() {
    let hub = Arc::new(MemoryHub::new());
    hub.add_analysis("analysis-1", "project-1");
    let node = node(hub, &SecretKey::random(&mut OsRng));

    let upload = |tag: Option<&str>| {
        let fields: Vec<(&str, &str)> = tag.map(|t| vec![("tag", t)]).unwrap_or_default();
        form_request(
            "PUT",
            "/local",
            "analysis-1",
            multipart(&fields, Some(("report.txt", "text/plain", b"contents".as_slice()))),
        )
    };

    let first = body_json(send(&node.app, upload(Some("final"))).await).await;
    let second = body_json(send(&node.app, upload(None)).await).await;
    let first_id = first["object_id"].as_str().unwrap();
    let second_id = second["object_id"].as_str().unwrap();

    let response = send(
        &node.app,
        with_method(
            "POST",
            &format!("/local/tags?tag_name=archive&object_id={first_id}&filename=renamed.txt"),
            "analysis-1",
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // Repeating the original request is a no-op.
    let response = send(
        &node.app,
        with_method(
            "POST",
            &format!("/local/tags?tag_name=final&object_id={first_id}&filename=report.txt"),
            "analysis-1",
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        body_json(response).await,
        json!({ "filename": "report.txt", "url": format!("{PUBLIC_URL}/local/{first_id}") })
    );

    // Without a filename the default name is recorded.
    let response = send(
        &node.app,
        with_method(
            "POST",
            &format!("/local/tags?tag_name=final&object_id={second_id}"),
            "analysis-1",
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["filename"], "data.bin");

    let results = body_json(send(&node.app, get("/local/tags/final", "analysis-1")).await).await;
    assert_eq!(results["results"].as_array().unwrap().len(), 2);
    assert_eq!(count(&node.pool, "results"), 2);
    assert_eq!(count(&node.pool, "tags"), 1);
}

#[tokio::test]
async fn tagging_an_unknown_object_is_not_found() {
    let hub = Arc::new(MemoryHub::new());
    hub.add_analysis("analysis-1", "project-1");
    let node = node(hub, &SecretKey::random(&mut OsRng));

    let missing = uuid::Uuid::new_v4();
    let response = send(
        &node.app,
        with_method(
            "POST",
            &format!("/local/tags?tag_name=t&object_id={missing}"),
            "analysis-1",
        ),
    )
    .await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(count(&node.pool, "tags"), 0);
}

#[tokio::test]
async fn project_deletion_is_reserved_for_the_admin_client() {
    let hub = Arc::new(MemoryHub::new());
    hub.add_analysis("analysis-1", "project-1");
    let node = node(hub.clone(), &SecretKey::random(&mut OsRng));

    send(
        &node.app,
        form_request(
            "PUT",
            "/local",
            "analysis-1",
            multipart(&[("tag", "t")], Some(("a.bin", "application/octet-stream", b"a".as_slice()))),
        ),
    )
    .await;

    let response = send(
        &node.app,
        with_method("DELETE", "/local?project_id=project-1", "analysis-1"),
    )
    .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    // The project still exists on the hub.
    let response = send(
        &node.app,
        with_method("DELETE", "/local?project_id=project-1", ADMIN),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    assert_eq!(node.objects.list("local/project-1/").await.unwrap().len(), 1);
    assert_eq!(count(&node.pool, "results"), 1);
}

#[tokio::test]
async fn deleting_a_removed_project_purges_objects_and_ledger_rows() {
    let hub = Arc::new(MemoryHub::new());
    hub.add_analysis("analysis-1", "project-1");
    hub.add_analysis("analysis-2", "project-2");
    let node = node(hub.clone(), &SecretKey::random(&mut OsRng));

    for (analysis, tag) in [("analysis-1", "a"), ("analysis-1", "b"), ("analysis-2", "a")] {
        let response = send(
            &node.app,
            form_request(
                "PUT",
                "/local",
                analysis,
                multipart(&[("tag", tag)], Some((tag, "application/octet-stream", b"x".as_slice()))),
            ),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    hub.remove_project("project-1");

    let response = send(
        &node.app,
        with_method("DELETE", "/local?project_id=project-1", ADMIN),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        body_json(response).await,
        json!({ "objects_removed": 2, "results_deleted": 2, "tags_deleted": 2 })
    );

    assert!(node.objects.list("local/project-1/").await.unwrap().is_empty());
    assert_eq!(node.objects.list("local/project-2/").await.unwrap().len(), 1);
    assert_eq!(count(&node.pool, "results"), 1);
    assert_eq!(count(&node.pool, "tags"), 1);
}

struct Pair {
    hub: Arc<MemoryHub>,
    sender: Node,
    receiver: Node,
}

/// Two nodes sharing one hub. `node-a` sends, `node-b` receives.
fn pair(chunk_len: usize) -> Pair {
    let hub = Arc::new(MemoryHub::with_chunk_len(chunk_len));
    let key_a = SecretKey::random(&mut OsRng);
    let key_b = SecretKey::random(&mut OsRng);
    hub.add_node("node-a", Some(public_key_hex(&key_a)));
    hub.add_node("node-b", Some(public_key_hex(&key_b)));
    hub.add_analysis("analysis-a", "project-1");
    hub.add_analysis("analysis-b", "project-1");
    hub.add_bucket("analysis-a", BucketKind::Temp);
    hub.add_bucket("analysis-b", BucketKind::Temp);

    Pair {
        sender: node(hub.clone(), &key_a),
        receiver: node(hub.clone(), &key_b),
        hub,
    }
}

#[tokio::test]
async fn encrypted_intermediate_results_decrypt_on_the_receiving_node() {
    let pair = pair(10_007);
    let data = payload(2 * UNIT_PLAINTEXT_LEN + 1234);

    let response = send(
        &pair.sender.app,
        form_request(
            "PUT",
            "/intermediate",
            "analysis-a",
            multipart(
                &[("remote_node_id", "node-b")],
                Some(("partial.bin", "application/octet-stream", data.as_slice())),
            ),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let uploaded = body_json(response).await;
    let object_id = uploaded["object_id"].as_str().unwrap().to_string();
    assert_eq!(
        uploaded["url"],
        format!("{PUBLIC_URL}/intermediate/{object_id}")
    );

    let stored = pair.hub.file(&object_id).unwrap();
    assert_eq!(stored.file_name, "partial.bin");
    assert_eq!(stored.data.len(), data.len() + 3 * 28);
    assert_ne!(&stored.data[..], &data[..]);
    assert_eq!(pair.hub.links().len(), 1);

    let response = send(
        &pair.receiver.app,
        get(
            &format!("/intermediate/{object_id}?node_id=node-a"),
            "analysis-b",
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_bytes(response).await, data);
}

#[tokio::test]
async fn decrypting_with_the_wrong_peer_fails_before_any_bytes_are_sent() {
    let pair = pair(4096);
    let stranger = SecretKey::random(&mut OsRng);
    pair.hub.add_node("node-c", Some(public_key_hex(&stranger)));

    let uploaded = body_json(
        send(
            &pair.sender.app,
            form_request(
                "PUT",
                "/intermediate",
                "analysis-a",
                multipart(
                    &[("remote_node_id", "node-b")],
                    Some(("partial.bin", "application/octet-stream", b"secret".as_slice())),
                ),
            ),
        )
        .await,
    )
    .await;
    let object_id = uploaded["object_id"].as_str().unwrap();

    let response = send(
        &pair.receiver.app,
        get(
            &format!("/intermediate/{object_id}?node_id=node-c"),
            "analysis-b",
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert!(json["error"].is_string());
}

#[tokio::test]
async fn plaintext_intermediate_results_pass_through() {
    let pair = pair(1000);
    let data = payload(5000);

    let uploaded = body_json(
        send(
            &pair.sender.app,
            form_request(
                "PUT",
                "/intermediate",
                "analysis-a",
                multipart(&[], Some(("plain.bin", "application/octet-stream", data.as_slice()))),
            ),
        )
        .await,
    )
    .await;
    let object_id = uploaded["object_id"].as_str().unwrap();
    assert_eq!(&pair.hub.file(object_id).unwrap().data[..], &data[..]);

    let response = send(
        &pair.receiver.app,
        get(&format!("/intermediate/{object_id}"), "analysis-b"),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_bytes(response).await, data);
}

#[tokio::test]
async fn intermediate_lookups_fail_cleanly() {
    let pair = pair(1000);

    let missing = uuid::Uuid::new_v4();
    let response = send(
        &pair.receiver.app,
        get(&format!("/intermediate/{missing}"), "analysis-b"),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    // An analysis without a TEMP bucket cannot upload.
    pair.hub.add_analysis("analysis-c", "project-1");
    let response = send(
        &pair.sender.app,
        form_request(
            "PUT",
            "/intermediate",
            "analysis-c",
            multipart(&[], Some(("x.bin", "application/octet-stream", b"x".as_slice()))),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    // Unknown recipients are reported before anything is uploaded.
    let response = send(
        &pair.sender.app,
        form_request(
            "PUT",
            "/intermediate",
            "analysis-a",
            multipart(
                &[("remote_node_id", "node-z")],
                Some(("x.bin", "application/octet-stream", b"x".as_slice())),
            ),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert!(pair.hub.links().is_empty());
}

#[tokio::test]
async fn uploads_without_a_file_part_are_rejected() {
    let pair = pair(1000);

    let response = send(
        &pair.sender.app,
        form_request(
            "PUT",
            "/intermediate",
            "analysis-a",
            multipart(&[("remote_node_id", "node-b")], None),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn local_results_can_be_forwarded_encrypted_to_a_peer() {
    let pair = pair(3000);
    let data = payload(UNIT_PLAINTEXT_LEN + 10);

    let uploaded = body_json(
        send(
            &pair.sender.app,
            form_request(
                "PUT",
                "/local",
                "analysis-a",
                multipart(&[("tag", "model")], Some(("weights.bin", "application/octet-stream", data.as_slice()))),
            ),
        )
        .await,
    )
    .await;
    let local_id = uploaded["object_id"].as_str().unwrap();

    let response = send(
        &pair.sender.app,
        form_request(
            "PUT",
            &format!("/local/upload?object_id={local_id}"),
            "analysis-a",
            multipart(&[("remote_node_id", "node-b")], None),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let forwarded = body_json(response).await;
    let remote_id = forwarded["object_id"].as_str().unwrap();

    assert_eq!(pair.hub.file(remote_id).unwrap().file_name, "weights.bin");

    let response = send(
        &pair.receiver.app,
        get(
            &format!("/intermediate/{remote_id}?node_id=node-a"),
            "analysis-b",
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_bytes(response).await, data);
}

#[tokio::test]
async fn final_results_land_in_the_result_bucket() {
    let hub = Arc::new(MemoryHub::new());
    hub.add_analysis("analysis-1", "project-1");
    hub.add_bucket("analysis-1", BucketKind::Temp);
    let result_bucket = hub.add_bucket("analysis-1", BucketKind::Result);
    let node = node(hub.clone(), &SecretKey::random(&mut OsRng));

    let response = send(
        &node.app,
        form_request(
            "PUT",
            "/final",
            "analysis-1",
            multipart(&[], Some(("final.json", "application/json", b"{}".as_slice()))),
        ),
    )
    .await;

    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    let links = hub.links();
    assert_eq!(links.len(), 1);
    assert_eq!(links[0].analysis_bucket_id, result_bucket.id);
    assert_eq!(links[0].bucket_id, result_bucket.bucket_id);
}
