//! Integration tests for tokens, whoami, purge jobs and the media audit.

mod common;

use axum::http::StatusCode;
use bytes::Bytes;
use common::{ADMIN_TOKEN, TestServer, test_audio};
use fishlore_metadata::models::{NewMedia, PurgeJobRow};
use fishlore_metadata::repos::{MediaRepo, PurgeJobRepo};
use fishlore_server::purge::{recover_orphaned_purge_jobs, spawn_purge_job};
use serde_json::{Value, json};
use std::time::Duration;
use time::OffsetDateTime;
use uuid::Uuid;

/// Poll a purge job until it leaves the active states.
async fn wait_for_job(server: &TestServer, job_id: &str) -> Value {
    for _ in 0..100 {
        let (status, job) = server
            .json(
                "GET",
                &format!("/v1/admin/purge/{job_id}"),
                None,
                Some(ADMIN_TOKEN),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        if job["state"] != "queued" && job["state"] != "running" {
            return job;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("purge job {job_id} did not finish");
}

#[tokio::test]
async fn test_token_lifecycle() {
    let server = TestServer::new().await;

    let (status, created) = server
        .json(
            "POST",
            "/v1/admin/tokens",
            Some(json!({
                "scopes": ["catalog:write"],
                "expires_in": 3600,
                "description": "field recorder",
            })),
            Some(ADMIN_TOKEN),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{created}");
    let token_id = created["token_id"].as_str().unwrap().to_string();
    let secret = created["token_secret"].as_str().unwrap().to_string();
    assert!(created["expires_at"].is_string());

    let (status, me) = server
        .json("GET", "/v1/auth/whoami", None, Some(&secret))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(me["token_id"], token_id.as_str());
    assert_eq!(me["scopes"], json!(["catalog:write"]));
    assert_eq!(me["description"], "field recorder");

    // The new token can write but not administer.
    server.create_fish(&secret, "Ikan Bobara").await;
    let (status, _) = server
        .json("GET", "/v1/admin/tokens", None, Some(&secret))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, tokens) = server
        .json("GET", "/v1/admin/tokens", None, Some(ADMIN_TOKEN))
        .await;
    assert_eq!(status, StatusCode::OK);
    let listed = tokens
        .as_array()
        .unwrap()
        .iter()
        .find(|t| t["token_id"] == token_id.as_str())
        .expect("created token is listed");
    assert!(listed.get("token_hash").is_none());
    assert!(listed.get("token_secret").is_none());
    assert_eq!(listed["description"], "field recorder");

    let (status, _) = server
        .json(
            "DELETE",
            &format!("/v1/admin/tokens/{token_id}"),
            None,
            Some(ADMIN_TOKEN),
        )
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = server
        .json("GET", "/v1/auth/whoami", None, Some(&secret))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = server
        .json(
            "DELETE",
            &format!("/v1/admin/tokens/{}", Uuid::new_v4()),
            None,
            Some(ADMIN_TOKEN),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_token_request_validation() {
    let server = TestServer::new().await;

    for body in [
        json!({ "scopes": [] }),
        json!({ "scopes": ["catalog:everything"] }),
        json!({ "scopes": ["catalog:read"], "expires_in": 0 }),
        json!({ "scopes": ["catalog:read"], "description": "d".repeat(201) }),
    ] {
        let (status, response) = server
            .json("POST", "/v1/admin/tokens", Some(body.clone()), Some(ADMIN_TOKEN))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{body} -> {response}");
    }

    let (status, _) = server
        .json("DELETE", "/v1/admin/tokens/not-a-uuid", None, Some(ADMIN_TOKEN))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_whoami_requires_token() {
    let server = TestServer::new().await;

    let (status, _) = server.json("GET", "/v1/auth/whoami", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, me) = server
        .json("GET", "/v1/auth/whoami", None, Some(ADMIN_TOKEN))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(me["scopes"], json!(["catalog:admin"]));
}

#[tokio::test]
async fn test_purge_deletes_stale_pending_uploads() {
    let server = TestServer::with_config(|config| {
        config.purge.pending_ttl_secs = 0;
        config.purge.auto_schedule_enabled = false;
    })
    .await;

    let stale = format!("pending/audio/1/{}.mp3", Uuid::new_v4());
    server
        .storage()
        .put(&stale, test_audio(10))
        .await
        .unwrap();
    let confirmed = format!("audio/1/{}.mp3", Uuid::new_v4());
    server
        .storage()
        .put(&confirmed, test_audio(10))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    // Dry run reports without deleting.
    let (status, triggered) = server
        .json(
            "POST",
            "/v1/admin/purge",
            Some(json!({ "dry_run": true })),
            Some(ADMIN_TOKEN),
        )
        .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(triggered["dry_run"], true);
    let job = wait_for_job(&server, triggered["job_id"].as_str().unwrap()).await;
    assert_eq!(job["state"], "finished");
    assert_eq!(job["stats"]["deleted"], 1);
    assert!(server.storage().exists(&stale).await.unwrap());

    // No body falls back to the configured mode.
    let (status, triggered) = server
        .json("POST", "/v1/admin/purge", None, Some(ADMIN_TOKEN))
        .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(triggered["dry_run"], false);
    let job = wait_for_job(&server, triggered["job_id"].as_str().unwrap()).await;
    assert_eq!(job["state"], "finished");
    assert_eq!(job["stats"]["scanned"], 1);
    assert_eq!(job["stats"]["bytes_reclaimed"], 10);
    assert!(job["finished_at"].is_string());

    assert!(!server.storage().exists(&stale).await.unwrap());
    assert!(server.storage().exists(&confirmed).await.unwrap());

    let (status, jobs) = server
        .json("GET", "/v1/admin/purge?limit=1", None, Some(ADMIN_TOKEN))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(jobs.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_purge_conflicts_with_active_job() {
    let server = TestServer::new().await;

    server
        .metadata()
        .create_purge_job(&PurgeJobRow {
            purge_job_id: Uuid::new_v4(),
            state: "running".to_string(),
            dry_run: false,
            started_at: Some(OffsetDateTime::now_utc()),
            finished_at: None,
            stats_json: None,
            error: None,
        })
        .await
        .unwrap();

    let (status, body) = server
        .json("POST", "/v1/admin/purge", None, Some(ADMIN_TOKEN))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "conflict");

    let (status, _) = server
        .json(
            "GET",
            &format!("/v1/admin/purge/{}", Uuid::new_v4()),
            None,
            Some(ADMIN_TOKEN),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_orphaned_purge_job_recovered_on_startup() {
    let server = TestServer::with_config(|config| {
        config.purge.auto_schedule_enabled = false;
    })
    .await;
    let metadata = server.metadata();

    let orphan_id = Uuid::new_v4();
    metadata
        .create_purge_job(&PurgeJobRow {
            purge_job_id: orphan_id,
            state: "running".to_string(),
            dry_run: false,
            started_at: Some(OffsetDateTime::now_utc()),
            finished_at: None,
            stats_json: None,
            error: None,
        })
        .await
        .unwrap();

    let recovered = recover_orphaned_purge_jobs(&metadata).await.unwrap();
    assert_eq!(recovered, 1);

    let row = metadata.get_purge_job(orphan_id).await.unwrap().unwrap();
    assert_eq!(row.state, "failed");
    assert!(row.finished_at.is_some());
    assert!(row.error.is_some());
    assert!(metadata.get_active_purge_jobs().await.unwrap().is_empty());

    // Nothing left to recover, and the active-job slot is free again.
    assert_eq!(recover_orphaned_purge_jobs(&metadata).await.unwrap(), 0);
    let job_id = spawn_purge_job(&server.state, true).await.unwrap();
    let job = wait_for_job(&server, &job_id.to_string()).await;
    assert_eq!(job["state"], "finished");
}

#[tokio::test]
async fn test_purge_requires_admin() {
    let server = TestServer::new().await;
    let writer = server.create_token(r#"["catalog:write"]"#).await;

    let (status, _) = server
        .json("POST", "/v1/admin/purge", None, Some(&writer))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_audit_reports_missing_objects() {
    let server = TestServer::new().await;
    let writer = server.create_token(r#"["catalog:write"]"#).await;
    let fish_id = server.create_fish(&writer, "Ikan Kakap").await;

    let present = format!("audio/{fish_id}/{}.mp3", Uuid::new_v4());
    server
        .storage()
        .put(&present, Bytes::from_static(b"present"))
        .await
        .unwrap();

    let missing_key = format!("audio/{fish_id}/{}.mp3", Uuid::new_v4());

    let metadata = server.metadata();
    for object_key in [present.clone(), missing_key.clone()] {
        metadata
            .record_media(&NewMedia {
                fish_id,
                kind: "audio".to_string(),
                pending_key: format!("pending/{object_key}"),
                object_key,
                content_type: "audio/mpeg".to_string(),
                size_bytes: 7,
                title: None,
                duration_ms: None,
                created_at: OffsetDateTime::now_utc(),
            })
            .await
            .unwrap();
    }

    let (status, report) = server
        .json("GET", "/v1/admin/audit/media", None, Some(ADMIN_TOKEN))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["checked"], 2);
    assert_eq!(report["errors"], 0);
    let missing = report["missing"].as_array().unwrap();
    assert_eq!(missing.len(), 1);
    assert_eq!(missing[0]["object_key"], missing_key.as_str());
    assert_eq!(missing[0]["fish_id"], fish_id);
}
