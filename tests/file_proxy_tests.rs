use std::sync::Arc;

use axum::{
    body::{Body, to_bytes},
    http::{Request, StatusCode, header},
};
use chrono::Utc;
use sea_orm::{DatabaseConnection, Set, prelude::DateTimeWithTimeZone};
use serde_json::json;
use studydesk::{
    error::ServiceError,
    file_proxy::{FileAction, FileRequest},
    models::course_content,
    repositories::CourseContentRepository,
    server::create_app,
};
use tower::ServiceExt;
use uuid::Uuid;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{method, path},
};
mod test_utils;
use test_utils::{insert_connection, mint_jwt, setup_test_db, test_state};

const USER: &str = "user-1";
const TOKEN: &str = "abc123";
const FILE_PATH: &str = "/pluginfile.php/12/mod_resource/content/1/slides.pdf";

async fn insert_module(
    db: &DatabaseConnection,
    user_id: &str,
    connection_id: Uuid,
    module_id: i64,
    fileurl: &str,
) {
    let now: DateTimeWithTimeZone = Utc::now().into();
    let row = course_content::ActiveModel {
        user_id: Set(user_id.to_string()),
        course_id: Set(101),
        module_id: Set(module_id),
        connection_id: Set(connection_id),
        section_id: Set(Some(10)),
        section_name: Set(Some("Week 1".to_string())),
        module_name: Set("Week 1 Slides".to_string()),
        modname: Set(Some("resource".to_string())),
        url: Set(None),
        raw: Set(json!({
            "id": module_id,
            "name": "Week 1 Slides",
            "contents": [{
                "type": "file",
                "filename": "slides.pdf",
                "fileurl": fileurl,
                "mimetype": "application/pdf"
            }]
        })),
        read: Set(false),
        created_at: Set(now),
        updated_at: Set(now),
    };
    CourseContentRepository::new(Arc::new(db.clone()))
        .upsert_many(vec![row])
        .await
        .expect("module stored");
}

async fn mount_file(server: &MockServer, response: ResponseTemplate) {
    Mock::given(method("GET"))
        .and(path(FILE_PATH))
        .respond_with(response)
        .mount(server)
        .await;
}

async fn token_params(server: &MockServer) -> Vec<Vec<String>> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .map(|req| {
            req.url
                .query_pairs()
                .filter(|(k, _)| k == "token")
                .map(|(_, v)| v.into_owned())
                .collect()
        })
        .collect()
}

fn open(module_id: i64) -> FileRequest {
    FileRequest {
        module_id,
        action: FileAction::Open,
        index: 0,
    }
}

#[tokio::test]
async fn test_foreign_module_is_forbidden_without_upstream_call() {
    let server = MockServer::start().await;
    let db = setup_test_db().await.unwrap();
    let conn = insert_connection(&db, "someone-else", &server.uri(), TOKEN).await.unwrap();
    insert_module(&db, "someone-else", conn.id, 501, &format!("{}{FILE_PATH}", server.uri())).await;

    let err = test_state(db)
        .file_proxy()
        .fetch(USER, open(501))
        .await
        .expect_err("not the owner");

    assert!(matches!(err, ServiceError::Forbidden));
    assert!(server.received_requests().await.unwrap_or_default().is_empty());
}

#[tokio::test]
async fn test_unknown_module_is_not_found() {
    let db = setup_test_db().await.unwrap();

    let err = test_state(db)
        .file_proxy()
        .fetch(USER, open(999))
        .await
        .expect_err("missing module");

    assert!(matches!(err, ServiceError::ModuleNotFound(999)));
}

#[tokio::test]
async fn test_token_is_appended_exactly_once() {
    let server = MockServer::start().await;
    mount_file(
        &server,
        ResponseTemplate::new(200).set_body_raw(b"%PDF-1.7".to_vec(), "application/pdf"),
    )
    .await;
    let db = setup_test_db().await.unwrap();
    let conn = insert_connection(&db, USER, &server.uri(), TOKEN).await.unwrap();
    insert_module(&db, USER, conn.id, 501, &format!("{}{FILE_PATH}?forcedownload=1", server.uri())).await;

    let file = test_state(db)
        .file_proxy()
        .fetch(USER, open(501))
        .await
        .expect("file fetched");

    assert_eq!(file.content_type, "application/pdf");
    assert_eq!(file.content_disposition, "inline; filename=\"Week_1_Slides.pdf\"");
    assert_eq!(file.upstream.bytes().await.unwrap().as_ref(), b"%PDF-1.7");
    assert_eq!(token_params(&server).await, vec![vec![TOKEN.to_string()]]);
}

#[tokio::test]
async fn test_existing_token_param_is_not_duplicated() {
    let server = MockServer::start().await;
    mount_file(&server, ResponseTemplate::new(200).set_body_bytes(b"data".to_vec())).await;
    let db = setup_test_db().await.unwrap();
    let conn = insert_connection(&db, USER, &server.uri(), TOKEN).await.unwrap();
    insert_module(&db, USER, conn.id, 501, &format!("{}{FILE_PATH}?token={TOKEN}", server.uri())).await;

    test_state(db)
        .file_proxy()
        .fetch(USER, open(501))
        .await
        .expect("file fetched");

    assert_eq!(token_params(&server).await, vec![vec![TOKEN.to_string()]]);
}

#[tokio::test]
async fn test_relative_file_url_resolves_against_site() {
    let server = MockServer::start().await;
    mount_file(&server, ResponseTemplate::new(200).set_body_bytes(b"data".to_vec())).await;
    let db = setup_test_db().await.unwrap();
    let conn = insert_connection(&db, USER, &server.uri(), TOKEN).await.unwrap();
    insert_module(&db, USER, conn.id, 501, FILE_PATH).await;

    test_state(db)
        .file_proxy()
        .fetch(USER, open(501))
        .await
        .expect("file fetched");

    assert_eq!(token_params(&server).await.len(), 1);
}

#[tokio::test]
async fn test_foreign_origin_never_receives_token() {
    let server = MockServer::start().await;
    let db = setup_test_db().await.unwrap();
    let conn = insert_connection(&db, USER, &server.uri(), TOKEN).await.unwrap();
    insert_module(&db, USER, conn.id, 501, "https://files.elsewhere.example/x.pdf").await;

    let err = test_state(db)
        .file_proxy()
        .fetch(USER, open(501))
        .await
        .expect_err("origin mismatch");

    assert!(matches!(err, ServiceError::Validation(_)));
    assert!(server.received_requests().await.unwrap_or_default().is_empty());
}

#[tokio::test]
async fn test_upstream_404_reports_redacted_snippet() {
    let server = MockServer::start().await;
    mount_file(
        &server,
        ResponseTemplate::new(404).set_body_string(format!("file not found for token {TOKEN}")),
    )
    .await;
    let db = setup_test_db().await.unwrap();
    let conn = insert_connection(&db, USER, &server.uri(), TOKEN).await.unwrap();
    insert_module(&db, USER, conn.id, 501, &format!("{}{FILE_PATH}", server.uri())).await;

    let err = test_state(db)
        .file_proxy()
        .fetch(USER, open(501))
        .await
        .expect_err("upstream 404");

    match err {
        ServiceError::UpstreamFetchFailed {
            status,
            body_snippet,
        } => {
            assert_eq!(status, 404);
            let snippet = body_snippet.expect("snippet kept");
            assert!(!snippet.contains(TOKEN));
            assert!(snippet.contains("[REDACTED]"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_download_over_http_streams_attachment() {
    let server = MockServer::start().await;
    mount_file(
        &server,
        ResponseTemplate::new(200).set_body_raw(b"%PDF-1.7".to_vec(), "application/pdf"),
    )
    .await;
    let db = setup_test_db().await.unwrap();
    let conn = insert_connection(&db, USER, &server.uri(), TOKEN).await.unwrap();
    insert_module(&db, USER, conn.id, 501, &format!("{}{FILE_PATH}", server.uri())).await;
    let app = create_app(test_state(db));

    let response = app
        .oneshot(
            Request::builder()
                .uri("/moodle/files/501?action=download")
                .header("Authorization", format!("Bearer {}", mint_jwt(USER)))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_DISPOSITION],
        "attachment; filename=\"Week_1_Slides.pdf\""
    );
    assert_eq!(response.headers()[header::CACHE_CONTROL], "private, no-store");
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(body.as_ref(), b"%PDF-1.7");
}

#[tokio::test]
async fn test_bad_action_is_a_validation_problem() {
    let db = setup_test_db().await.unwrap();
    let app = create_app(test_state(db));

    let response = app
        .oneshot(
            Request::builder()
                .uri("/moodle/files/501?action=print")
                .header("Authorization", format!("Bearer {}", mint_jwt(USER)))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "application/problem+json"
    );
}
