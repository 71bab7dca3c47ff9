//! Integration tests for catalog endpoints: fish, captures, classifications,
//! search and facets.

mod common;

use axum::http::StatusCode;
use common::{ADMIN_TOKEN, TestServer};
use serde_json::json;

const WRITER: &str = r#"["catalog:write"]"#;
const READER: &str = r#"["catalog:read"]"#;

#[tokio::test]
async fn test_health_is_public() {
    let server = TestServer::new().await;
    let (status, body) = server.json("GET", "/v1/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_writes_require_write_scope() {
    let server = TestServer::new().await;
    let reader = server.create_token(READER).await;
    let fish = json!({ "name": "Ikan Bobara" });

    let (status, body) = server
        .json("POST", "/v1/fish", Some(fish.clone()), None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "unauthorized");

    let (status, body) = server
        .json("POST", "/v1/fish", Some(fish.clone()), Some(&reader))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "forbidden");

    let (status, body) = server
        .json("POST", "/v1/fish", Some(fish), Some("not-a-real-token"))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["message"], "unauthorized: invalid token");
}

#[tokio::test]
async fn test_fish_crud_roundtrip() {
    let server = TestServer::new().await;
    let writer = server.create_token(WRITER).await;

    let (status, created) = server
        .json(
            "POST",
            "/v1/fish",
            Some(json!({
                "name": "  Ikan Kakap  ",
                "scientific_name": "Lutjanus argentimaculatus",
                "common_name": "Mangrove red snapper",
            })),
            Some(&writer),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["name"], "Ikan Kakap");
    let id = created["id"].as_i64().unwrap();

    let (status, detail) = server
        .json("GET", &format!("/v1/fish/{id}"), None, None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(detail["scientific_name"], "Lutjanus argentimaculatus");
    assert_eq!(detail["captures"], json!([]));
    assert_eq!(detail["classifications"], json!([]));
    assert_eq!(detail["media"], json!([]));
    assert!(detail.get("deleted_at").is_none());

    let (status, updated) = server
        .json(
            "PUT",
            &format!("/v1/fish/{id}"),
            Some(json!({ "name": "Ikan Kakap Merah" })),
            Some(&writer),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["name"], "Ikan Kakap Merah");
    assert_eq!(updated["scientific_name"], json!(null));
}

#[tokio::test]
async fn test_fish_validation_errors() {
    let server = TestServer::new().await;
    let writer = server.create_token(WRITER).await;

    let (status, body) = server
        .json("POST", "/v1/fish", Some(json!({ "name": "   " })), Some(&writer))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "validation_error");

    let (status, _) = server
        .json(
            "POST",
            "/v1/fish",
            Some(json!({ "name": "x".repeat(101) })),
            Some(&writer),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = server
        .json(
            "POST",
            "/v1/fish",
            Some(json!({ "name": "Ikan", "colour": "red" })),
            Some(&writer),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "bad_request");

    let (status, _) = server.json("GET", "/v1/fish/0", None, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = server.json("GET", "/v1/fish/999", None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_soft_delete_hides_fish_until_restored() {
    let server = TestServer::new().await;
    let writer = server.create_token(WRITER).await;
    let id = server.create_fish(&writer, "Ikan Julung").await;

    let (status, _) = server
        .json("DELETE", &format!("/v1/fish/{id}"), None, Some(&writer))
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = server
        .json("GET", &format!("/v1/fish/{id}"), None, None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, page) = server.json("GET", "/v1/fish", None, None).await;
    assert_eq!(page["items"], json!([]));

    // Deleting twice is a 404.
    let (status, _) = server
        .json("DELETE", &format!("/v1/fish/{id}"), None, Some(&writer))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // Restore is admin only.
    let (status, _) = server
        .json("POST", &format!("/v1/fish/{id}/restore"), None, Some(&writer))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, restored) = server
        .json(
            "POST",
            &format!("/v1/fish/{id}/restore"),
            None,
            Some(ADMIN_TOKEN),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(restored["name"], "Ikan Julung");

    let (status, _) = server
        .json("GET", &format!("/v1/fish/{id}"), None, None)
        .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_captures_and_classifications() {
    let server = TestServer::new().await;
    let writer = server.create_token(WRITER).await;
    let id = server.create_fish(&writer, "Ikan Lema").await;

    let (status, capture) = server
        .json(
            "POST",
            &format!("/v1/fish/{id}/captures"),
            Some(json!({
                "tribe": "Biak",
                "location": "Padaido",
                "method": "Kalawai",
                "captured_on": "2024-03-09",
            })),
            Some(&writer),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(capture["captured_on"], "2024-03-09");
    let capture_id = capture["id"].as_i64().unwrap();

    let (status, body) = server
        .json(
            "POST",
            &format!("/v1/fish/{id}/captures"),
            Some(json!({
                "tribe": "Biak",
                "location": "Padaido",
                "method": "Kalawai",
                "captured_on": "09/03/2024",
            })),
            Some(&writer),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");

    let (status, classification) = server
        .json(
            "POST",
            &format!("/v1/fish/{id}/classifications"),
            Some(json!({
                "tribe": "Moi",
                "local_name": "Kla",
                "category": "Taboo",
                "processing_method": "Smoked",
            })),
            Some(&writer),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let classification_id = classification["id"].as_i64().unwrap();

    let (_, detail) = server
        .json("GET", &format!("/v1/fish/{id}"), None, None)
        .await;
    assert_eq!(detail["captures"].as_array().unwrap().len(), 1);
    assert_eq!(detail["classifications"][0]["local_name"], "Kla");

    let (status, updated) = server
        .json(
            "PUT",
            &format!("/v1/captures/{capture_id}"),
            Some(json!({ "tribe": "Biak", "location": "Numfor", "method": "Jaring" })),
            Some(&writer),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["location"], "Numfor");
    assert_eq!(updated["captured_on"], json!(null));

    let (status, _) = server
        .json(
            "DELETE",
            &format!("/v1/classifications/{classification_id}"),
            None,
            Some(&writer),
        )
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, list) = server
        .json("GET", &format!("/v1/fish/{id}/classifications"), None, None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list, json!([]));

    let (status, _) = server
        .json(
            "DELETE",
            &format!("/v1/captures/{capture_id}"),
            None,
            Some(&writer),
        )
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = server
        .json(
            "DELETE",
            &format!("/v1/captures/{capture_id}"),
            None,
            Some(&writer),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_search_paginates_by_cursor() {
    let server = TestServer::new().await;
    let writer = server.create_token(WRITER).await;
    let mut ids = Vec::new();
    for name in ["Ikan A", "Ikan B", "Ikan C", "Ikan D", "Ikan E"] {
        ids.push(server.create_fish(&writer, name).await);
    }

    let (status, page) = server
        .json("GET", "/v1/fish?per_page=2", None, None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["items"].as_array().unwrap().len(), 2);
    assert_eq!(page["page_info"]["has_more"], true);
    assert_eq!(page["page_info"]["next_cursor"], ids[1]);

    let (_, page) = server
        .json(
            "GET",
            &format!("/v1/fish?per_page=2&last_id={}", ids[1]),
            None,
            None,
        )
        .await;
    assert_eq!(page["items"][0]["id"], ids[2]);
    assert_eq!(page["page_info"]["next_cursor"], ids[3]);

    let (_, page) = server
        .json(
            "GET",
            &format!("/v1/fish?per_page=2&last_id={}", ids[3]),
            None,
            None,
        )
        .await;
    assert_eq!(page["items"].as_array().unwrap().len(), 1);
    assert_eq!(page["page_info"]["has_more"], false);
    assert_eq!(page["page_info"]["next_cursor"], json!(null));

    // Out-of-range page sizes are clamped.
    let (_, page) = server
        .json("GET", "/v1/fish?per_page=0", None, None)
        .await;
    assert_eq!(page["page_info"]["per_page"], 1);

    let (status, page) = server
        .json(
            "GET",
            "/v1/fish?per_page=99999999999999999999999999999999999999999",
            None,
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["page_info"]["per_page"], 100);
}

#[tokio::test]
async fn test_search_rejects_bad_parameters() {
    let server = TestServer::new().await;

    let (status, body) = server
        .json("GET", "/v1/fish?last_id=abc", None, None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "invalid_search");

    let (status, _) = server
        .json("GET", "/v1/fish?per_page=lots", None, None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let long = "a".repeat(101);
    let (status, _) = server
        .json("GET", &format!("/v1/fish?q={long}"), None, None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_search_filters_and_facets() {
    let server = TestServer::new().await;
    let writer = server.create_token(WRITER).await;
    let bobara = server.create_fish(&writer, "Ikan Bobara").await;
    let kakap = server.create_fish(&writer, "Ikan Kakap").await;

    server
        .json(
            "POST",
            &format!("/v1/fish/{bobara}/captures"),
            Some(json!({ "tribe": "Biak", "location": "Padaido", "method": "Kalawai" })),
            Some(&writer),
        )
        .await;
    server
        .json(
            "POST",
            &format!("/v1/fish/{kakap}/classifications"),
            Some(json!({ "tribe": "Moi", "category": "Food" })),
            Some(&writer),
        )
        .await;

    let (_, page) = server
        .json("GET", "/v1/fish?tribe=biak", None, None)
        .await;
    let items = page["items"].as_array().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["id"], bobara);

    // Tribe also matches classifications.
    let (_, page) = server
        .json("GET", "/v1/fish?tribe=Moi", None, None)
        .await;
    assert_eq!(page["items"][0]["id"], kakap);

    let (_, page) = server
        .json("GET", "/v1/fish?category=food&q=kakap", None, None)
        .await;
    assert_eq!(page["items"].as_array().unwrap().len(), 1);

    let (_, page) = server
        .json("GET", "/v1/fish?location=Padaido&method=Jaring", None, None)
        .await;
    assert_eq!(page["items"], json!([]));

    let (status, facets) = server.json("GET", "/v1/facets", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(facets["tribes"], json!(["Biak", "Moi"]));
    assert_eq!(facets["locations"], json!(["Padaido"]));
    assert_eq!(facets["methods"], json!(["Kalawai"]));
    assert_eq!(facets["categories"], json!(["Food"]));
}

#[tokio::test]
async fn test_trace_id_is_echoed() {
    let server = TestServer::new().await;
    let request = axum::http::Request::builder()
        .uri("/v1/health")
        .header("x-trace-id", "field-trip-42")
        .body(axum::body::Body::empty())
        .unwrap();
    let (status, headers, _) = server.raw(request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers["x-trace-id"], "field-trip-42");
}
