//! Integration tests for the sign, upload, confirm and serve workflow.

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use bytes::Bytes;
use common::{TEST_BASE_URL, TestServer, router_path, test_audio};
use serde_json::{Value, json};

const WRITER: &str = r#"["catalog:write"]"#;

/// Ask for an upload destination and return the response body.
async fn sign(server: &TestServer, token: &str, fish_id: i64, size: u64) -> Value {
    let (status, body) = server
        .json(
            "POST",
            &format!("/v1/fish/{fish_id}/media/audio/sign"),
            Some(json!({
                "file_name": "pronunciation.mp3",
                "content_type": "audio/mpeg",
                "size_bytes": size,
            })),
            Some(token),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "sign failed: {body}");
    body
}

async fn put(
    server: &TestServer,
    upload_url: &str,
    content_type: &str,
    data: Bytes,
) -> (StatusCode, Value) {
    let request = Request::builder()
        .method("PUT")
        .uri(router_path(upload_url))
        .header("Content-Type", content_type)
        .body(Body::from(data))
        .unwrap();
    let (status, _, body) = server.raw(request).await;
    let json = serde_json::from_slice(&body).unwrap_or(Value::Null);
    (status, json)
}

async fn confirm(
    server: &TestServer,
    token: &str,
    fish_id: i64,
    body: Value,
) -> (StatusCode, Value) {
    server
        .json(
            "POST",
            &format!("/v1/fish/{fish_id}/media/audio/confirm"),
            Some(body),
            Some(token),
        )
        .await
}

#[tokio::test]
async fn test_upload_confirm_and_serve() {
    let server = TestServer::new().await;
    let writer = server.create_token(WRITER).await;
    let fish_id = server.create_fish(&writer, "Ikan Bobara").await;
    let data = test_audio(4096);

    let signed = sign(&server, &writer, fish_id, data.len() as u64).await;
    let object_key = signed["object_key"].as_str().unwrap().to_string();
    assert!(object_key.starts_with(&format!("pending/audio/{fish_id}/")));
    assert!(object_key.ends_with(".mp3"));
    assert_eq!(signed["method"], "PUT");
    assert_eq!(signed["headers"]["Content-Type"], "audio/mpeg");
    assert_eq!(signed["max_bytes"], 20 * 1024 * 1024);

    let upload_url = signed["upload_url"].as_str().unwrap();
    assert!(upload_url.starts_with(&format!("{TEST_BASE_URL}/v1/uploads/")));

    let (status, receipt) = put(&server, upload_url, "audio/mpeg", data.clone()).await;
    assert_eq!(status, StatusCode::OK, "{receipt}");
    assert_eq!(receipt["object_key"], object_key.as_str());
    assert_eq!(receipt["size_bytes"], 4096);

    let (status, media) = confirm(
        &server,
        &writer,
        fish_id,
        json!({ "object_key": object_key, "title": "Elder pronunciation", "duration_ms": 2300 }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{media}");
    assert_eq!(media["already_confirmed"], false);
    assert_eq!(media["size_bytes"], 4096);
    assert_eq!(media["content_type"], "audio/mpeg");
    assert_eq!(media["duration_ms"], 2300);
    let permanent_key = object_key.strip_prefix("pending/").unwrap();
    assert_eq!(media["object_key"], permanent_key);
    assert_eq!(
        media["url"],
        format!("{TEST_BASE_URL}/media/{permanent_key}").as_str()
    );

    // The pending object is gone once promoted.
    assert!(!server.storage().exists(&object_key).await.unwrap());

    let (status, again) =
        confirm(&server, &writer, fish_id, json!({ "object_key": object_key })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(again["already_confirmed"], true);
    assert_eq!(again["id"], media["id"]);

    let request = Request::builder()
        .uri(format!("/media/{permanent_key}"))
        .body(Body::empty())
        .unwrap();
    let (status, headers, body) = server.raw(request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers["content-type"], "audio/mpeg");
    assert!(
        headers["cache-control"]
            .to_str()
            .unwrap()
            .contains("immutable")
    );
    assert_eq!(body, data);

    let (_, detail) = server
        .json("GET", &format!("/v1/fish/{fish_id}"), None, None)
        .await;
    assert_eq!(detail["media"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_pending_objects_are_not_served() {
    let server = TestServer::new().await;
    let writer = server.create_token(WRITER).await;
    let fish_id = server.create_fish(&writer, "Ikan Kakap").await;

    let signed = sign(&server, &writer, fish_id, 16).await;
    let upload_url = signed["upload_url"].as_str().unwrap();
    let (status, _) = put(&server, upload_url, "audio/mpeg", test_audio(16)).await;
    assert_eq!(status, StatusCode::OK);

    let object_key = signed["object_key"].as_str().unwrap();
    let request = Request::builder()
        .uri(format!("/media/{object_key}"))
        .body(Body::empty())
        .unwrap();
    let (status, _, _) = server.raw(request).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let request = Request::builder()
        .uri("/media/audio/1/not-a-uuid.mp3")
        .body(Body::empty())
        .unwrap();
    let (status, _, _) = server.raw(request).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_unsupported_content_types_rejected() {
    let server = TestServer::new().await;
    let writer = server.create_token(WRITER).await;
    let fish_id = server.create_fish(&writer, "Ikan Lema").await;

    let (status, body) = server
        .json(
            "POST",
            &format!("/v1/fish/{fish_id}/media/image/sign"),
            Some(json!({
                "file_name": "song.mp3",
                "content_type": "audio/mpeg",
                "size_bytes": 10,
            })),
            Some(&writer),
        )
        .await;
    assert_eq!(status, StatusCode::UNSUPPORTED_MEDIA_TYPE);
    assert_eq!(body["code"], "unsupported_media_type");

    let (status, _) = server
        .json(
            "POST",
            &format!("/v1/fish/{fish_id}/media/video/sign"),
            Some(json!({
                "file_name": "clip.mp4",
                "content_type": "video/mp4",
                "size_bytes": 10,
            })),
            Some(&writer),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // The PUT must carry the content type the grant was issued for.
    let signed = sign(&server, &writer, fish_id, 16).await;
    let upload_url = signed["upload_url"].as_str().unwrap();
    let (status, _) = put(&server, upload_url, "image/png", test_audio(16)).await;
    assert_eq!(status, StatusCode::UNSUPPORTED_MEDIA_TYPE);

    // Parameters are ignored when matching.
    let (status, _) = put(&server, upload_url, "Audio/MPEG; charset=binary", test_audio(16)).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_size_limits_enforced() {
    let server = TestServer::with_config(|config| {
        config.uploads.max_audio_bytes = 64;
    })
    .await;
    let writer = server.create_token(WRITER).await;
    let fish_id = server.create_fish(&writer, "Ikan Julung").await;

    let (status, body) = server
        .json(
            "POST",
            &format!("/v1/fish/{fish_id}/media/audio/sign"),
            Some(json!({
                "file_name": "long.mp3",
                "content_type": "audio/mpeg",
                "size_bytes": 65,
            })),
            Some(&writer),
        )
        .await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(body["code"], "payload_too_large");

    let (status, _) = server
        .json(
            "POST",
            &format!("/v1/fish/{fish_id}/media/audio/sign"),
            Some(json!({
                "file_name": "empty.mp3",
                "content_type": "audio/mpeg",
                "size_bytes": 0,
            })),
            Some(&writer),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Declaring a small size does not let the body exceed the kind limit.
    let signed = sign(&server, &writer, fish_id, 8).await;
    let upload_url = signed["upload_url"].as_str().unwrap();
    let (status, _) = put(&server, upload_url, "audio/mpeg", test_audio(100)).await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);

    let object_key = signed["object_key"].as_str().unwrap();
    assert!(!server.storage().exists(object_key).await.unwrap());
}

#[tokio::test]
async fn test_confirm_rejects_oversized_pending_object() {
    let server = TestServer::with_config(|config| {
        config.uploads.max_audio_bytes = 64;
    })
    .await;
    let writer = server.create_token(WRITER).await;
    let fish_id = server.create_fish(&writer, "Ikan Julung").await;

    // Presigned uploads go straight to the bucket, so only confirm sees the size.
    let signed = sign(&server, &writer, fish_id, 32).await;
    let object_key = signed["object_key"].as_str().unwrap();
    server
        .storage()
        .put(object_key, test_audio(100))
        .await
        .unwrap();

    let (status, body) =
        confirm(&server, &writer, fish_id, json!({ "object_key": object_key })).await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(body["code"], "payload_too_large");
    assert!(!server.storage().exists(object_key).await.unwrap());

    let permanent_key = object_key.strip_prefix("pending/").unwrap();
    assert!(!server.storage().exists(permanent_key).await.unwrap());
}

#[tokio::test]
async fn test_confirm_resumes_after_object_was_moved() {
    let server = TestServer::new().await;
    let writer = server.create_token(WRITER).await;
    let fish_id = server.create_fish(&writer, "Ikan Bobara").await;

    let signed = sign(&server, &writer, fish_id, 16).await;
    let object_key = signed["object_key"].as_str().unwrap();
    let permanent_key = object_key.strip_prefix("pending/").unwrap();

    // An earlier confirm moved the object and failed before recording the row.
    server
        .storage()
        .put(permanent_key, test_audio(16))
        .await
        .unwrap();

    let (status, body) =
        confirm(&server, &writer, fish_id, json!({ "object_key": object_key })).await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["already_confirmed"], false);
    assert_eq!(body["object_key"], permanent_key);
    assert_eq!(body["size_bytes"], 16);

    let (status, body) =
        confirm(&server, &writer, fish_id, json!({ "object_key": object_key })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["already_confirmed"], true);
}

#[tokio::test]
async fn test_confirm_without_upload() {
    let server = TestServer::new().await;
    let writer = server.create_token(WRITER).await;
    let fish_id = server.create_fish(&writer, "Ikan Bobara").await;

    let signed = sign(&server, &writer, fish_id, 16).await;
    let object_key = signed["object_key"].as_str().unwrap();

    let (status, body) =
        confirm(&server, &writer, fish_id, json!({ "object_key": object_key })).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "upload_not_found");

    // A key for a different fish is rejected before storage is consulted.
    let other = server.create_fish(&writer, "Ikan Kakap").await;
    let (status, _) =
        confirm(&server, &writer, other, json!({ "object_key": object_key })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = confirm(
        &server,
        &writer,
        fish_id,
        json!({ "object_key": "audio/1/0b8a7c3e-2f57-4d5c-9f0e-8d3c2b1a0f9e.mp3" }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "validation_error");
}

#[tokio::test]
async fn test_tampered_grant_rejected() {
    let server = TestServer::new().await;
    let writer = server.create_token(WRITER).await;
    let fish_id = server.create_fish(&writer, "Ikan Lema").await;

    let first = sign(&server, &writer, fish_id, 16).await;
    let second = sign(&server, &writer, fish_id, 16).await;
    let first_url = first["upload_url"].as_str().unwrap();
    let second_url = second["upload_url"].as_str().unwrap();

    // Payload of one grant with the signature of another.
    let (payload, _) = first_url.rsplit_once('.').unwrap();
    let (_, signature) = second_url.rsplit_once('.').unwrap();
    let forged = format!("{payload}.{signature}");

    let (status, body) = put(&server, &forged, "audio/mpeg", test_audio(16)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "invalid_grant");

    let (status, _) = put(
        &server,
        &format!("{TEST_BASE_URL}/v1/uploads/garbage"),
        "audio/mpeg",
        test_audio(16),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_delete_media_removes_object() {
    let server = TestServer::new().await;
    let writer = server.create_token(WRITER).await;
    let fish_id = server.create_fish(&writer, "Ikan Kakap").await;

    let signed = sign(&server, &writer, fish_id, 32).await;
    let upload_url = signed["upload_url"].as_str().unwrap();
    put(&server, upload_url, "audio/mpeg", test_audio(32)).await;
    let (_, media) = confirm(
        &server,
        &writer,
        fish_id,
        json!({ "object_key": signed["object_key"] }),
    )
    .await;
    let media_id = media["id"].as_i64().unwrap();
    let object_key = media["object_key"].as_str().unwrap().to_string();

    let (status, fetched) = server
        .json("GET", &format!("/v1/media/{media_id}"), None, None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["object_key"], object_key.as_str());

    let (status, _) = server
        .json("DELETE", &format!("/v1/media/{media_id}"), None, None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = server
        .json("DELETE", &format!("/v1/media/{media_id}"), None, Some(&writer))
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert!(!server.storage().exists(&object_key).await.unwrap());

    let (status, _) = server
        .json("GET", &format!("/v1/media/{media_id}"), None, None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_image_rejects_duration() {
    let server = TestServer::new().await;
    let writer = server.create_token(WRITER).await;
    let fish_id = server.create_fish(&writer, "Ikan Julung").await;

    let (status, signed) = server
        .json(
            "POST",
            &format!("/v1/fish/{fish_id}/media/image/sign"),
            Some(json!({
                "file_name": "photo.png",
                "content_type": "image/png",
                "size_bytes": 16,
            })),
            Some(&writer),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = server
        .json(
            "POST",
            &format!("/v1/fish/{fish_id}/media/image/confirm"),
            Some(json!({ "object_key": signed["object_key"], "duration_ms": 10 })),
            Some(&writer),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
