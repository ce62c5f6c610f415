use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Method, Request, StatusCode, header},
};
use serde_json::{Value, json};
use tower::ServiceExt;
use wiremock::{MockServer, ResponseTemplate};
mod test_utils;
use test_utils::{
    OPERATOR_TOKEN, insert_connection, invalid_token_body, mint_jwt, mock_course_contents,
    mock_site_info, mock_ws, setup_test_db, test_state,
};

const USER: &str = "user-1";

async fn app() -> (Router, sea_orm::DatabaseConnection) {
    let db = setup_test_db().await.unwrap();
    (studydesk::server::create_app(test_state(db.clone())), db)
}

async fn send(app: &Router, method: Method, uri: &str, bearer: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(bearer) = bearer {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {bearer}"));
    }
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, json)
}

#[tokio::test]
async fn test_root_and_health_are_public() {
    let (app, _db) = app().await;

    let (status, body) = send(&app, Method::GET, "/", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["service"], "studydesk");

    let (status, body) = send(&app, Method::GET, "/healthz", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["database"], "ok");
}

#[tokio::test]
async fn test_user_routes_reject_missing_or_bad_bearer() {
    let (app, _db) = app().await;

    let (status, body) = send(&app, Method::GET, "/moodle/connections", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "UNAUTHORIZED");

    let (status, _) = send(&app, Method::GET, "/moodle/connections", Some("not-a-jwt"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // Operator tokens are not user credentials
    let (status, _) = send(&app, Method::GET, "/moodle/courses", Some(OPERATOR_TOKEN), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_connect_then_list_and_primary() {
    let server = MockServer::start().await;
    mock_site_info(&server, 7).await;
    let (app, _db) = app().await;
    let jwt = mint_jwt(USER);

    let (status, created) = send(
        &app,
        Method::POST,
        "/moodle/connect",
        Some(&jwt),
        Some(json!({"base_url": server.uri(), "token": "abc123"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{created}");
    assert_eq!(created["status"], "active");
    assert!(created.get("token_ciphertext").is_none());

    let (status, listed) = send(&app, Method::GET, "/moodle/connections", Some(&jwt), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed["connections"].as_array().unwrap().len(), 1);

    let (status, primary) =
        send(&app, Method::GET, "/moodle/connections/primary", Some(&jwt), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(primary["id"], created["id"]);

    // Another user sees nothing
    let other = mint_jwt("user-2");
    let (status, _) = send(&app, Method::GET, "/moodle/connections/primary", Some(&other), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_connect_with_rejected_token_is_422() {
    let server = MockServer::start().await;
    mock_ws(&server, "core_webservice_get_site_info", invalid_token_body()).await;
    let (app, _db) = app().await;

    let (status, body) = send(
        &app,
        Method::POST,
        "/moodle/connect",
        Some(&mint_jwt(USER)),
        Some(json!({"base_url": server.uri(), "token": "revoked"})),
    )
    .await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "INVALID_TOKEN");
    assert!(!body.to_string().contains("revoked"));
}

#[tokio::test]
async fn test_malformed_connect_body_is_400() {
    let (app, _db) = app().await;

    let (status, body) = send(
        &app,
        Method::POST,
        "/moodle/connect",
        Some(&mint_jwt(USER)),
        Some(json!({"token": "abc123"})),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_FAILED");
}

#[tokio::test]
async fn test_sync_then_read_mirror() {
    let server = MockServer::start().await;
    mock_ws(
        &server,
        "core_enrol_get_users_courses",
        json!([{"id": 101, "fullname": "Algorithms"}]),
    )
    .await;
    let far_future = chrono::Utc::now().timestamp() + 30 * 86_400;
    let soon = chrono::Utc::now().timestamp() + 86_400;
    mock_ws(
        &server,
        "mod_assign_get_assignments",
        json!({"courses": [{"id": 101, "assignments": [
            {"id": 1, "name": "Graded", "grade": 90, "duedate": 1},
            {"id": 2, "name": "Late", "duedate": 1000},
            {"id": 3, "name": "Soon", "duedate": soon},
            {"id": 4, "name": "Later", "duedate": far_future}
        ]}]}),
    )
    .await;
    mock_course_contents(
        &server,
        101,
        ResponseTemplate::new(200).set_body_json(json!([{
            "id": 10,
            "name": "Week 1",
            "modules": [{"id": 501, "name": "Slides", "contents": [
                {"filename": "a.pdf", "fileurl": format!("{}/pluginfile.php/a.pdf", server.uri())},
                {"filename": "no-url.txt"}
            ]}]
        }])),
    )
    .await;

    let (app, db) = app().await;
    insert_connection(&db, USER, &server.uri(), "abc123").await.unwrap();
    let jwt = mint_jwt(USER);

    let (status, report) = send(&app, Method::POST, "/moodle/sync", Some(&jwt), Some(json!({}))).await;
    assert_eq!(status, StatusCode::OK, "{report}");
    assert_eq!(report["courses"], 1);
    assert_eq!(report["assignments"], 4);
    assert_eq!(report["contents"], 1);

    let (_, courses) = send(&app, Method::GET, "/moodle/courses", Some(&jwt), None).await;
    assert_eq!(courses["courses"][0]["fullname"], "Algorithms");

    let (_, contents) =
        send(&app, Method::GET, "/moodle/courses/101/contents", Some(&jwt), None).await;
    let files = contents["modules"][0]["files"].as_array().unwrap();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0]["index"], 0);

    let (_, groups) = send(&app, Method::GET, "/moodle/assignments", Some(&jwt), None).await;
    assert_eq!(groups["completed"][0]["assignment_id"], 1);
    assert_eq!(groups["overdue"][0]["assignment_id"], 2);
    assert_eq!(groups["due_soon"][0]["assignment_id"], 3);
    assert_eq!(groups["upcoming"][0]["assignment_id"], 4);

    // Mirror reads are scoped to the caller
    let (_, others) = send(&app, Method::GET, "/moodle/courses", Some(&mint_jwt("user-2")), None).await;
    assert!(others["courses"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_bodiless_sync_uses_primary_connection() {
    let server = MockServer::start().await;
    mock_ws(&server, "core_enrol_get_users_courses", json!([])).await;
    let (app, db) = app().await;
    let conn = insert_connection(&db, USER, &server.uri(), "abc123").await.unwrap();

    let (status, report) = send(&app, Method::POST, "/moodle/sync", Some(&mint_jwt(USER)), None).await;

    assert_eq!(status, StatusCode::OK, "{report}");
    assert_eq!(report["connection_id"], conn.id.to_string());
}

#[tokio::test]
async fn test_due_today_single_assignment_and_read_flag() {
    let server = MockServer::start().await;
    mock_ws(
        &server,
        "core_enrol_get_users_courses",
        json!([{"id": 101, "fullname": "Algorithms"}]),
    )
    .await;
    // One second before the end of the current UTC day
    let now = chrono::Utc::now().timestamp();
    let end_of_today = now - now.rem_euclid(86_400) + 86_399;
    mock_ws(
        &server,
        "mod_assign_get_assignments",
        json!({"courses": [{"id": 101, "assignments": [
            {"id": 8, "name": "Tonight", "duedate": end_of_today, "intro": "<p>Read chapter 3</p>"}
        ]}]}),
    )
    .await;
    mock_course_contents(
        &server,
        101,
        ResponseTemplate::new(200).set_body_json(json!([{
            "id": 10,
            "name": "Week 1",
            "modules": [{"id": 501, "name": "Slides"}]
        }])),
    )
    .await;

    let (app, db) = app().await;
    insert_connection(&db, USER, &server.uri(), "abc123").await.unwrap();
    let jwt = mint_jwt(USER);
    let (status, _) = send(&app, Method::POST, "/moodle/sync", Some(&jwt), Some(json!({}))).await;
    assert_eq!(status, StatusCode::OK);

    let (_, groups) = send(&app, Method::GET, "/moodle/assignments", Some(&jwt), None).await;
    if end_of_today > chrono::Utc::now().timestamp() {
        assert_eq!(groups["due_today"][0]["assignment_id"], 8);
    }

    let (status, detail) = send(&app, Method::GET, "/moodle/assignments/8", Some(&jwt), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(detail["assignment"]["name"], "Tonight");
    assert_eq!(detail["raw"]["intro"], "<p>Read chapter 3</p>");

    let (status, body) =
        send(&app, Method::GET, "/moodle/assignments/8", Some(&mint_jwt("user-2")), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NOT_FOUND");

    let (status, receipt) =
        send(&app, Method::POST, "/moodle/contents/501/read", Some(&jwt), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(receipt["read"], true);

    // The flag survives a resync
    send(&app, Method::POST, "/moodle/sync", Some(&jwt), None).await;
    let (_, contents) =
        send(&app, Method::GET, "/moodle/courses/101/contents", Some(&jwt), None).await;
    assert_eq!(contents["modules"][0]["read"], true);

    let (status, _) = send(&app, Method::POST, "/moodle/contents/999/read", Some(&jwt), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_sync_without_connection_is_404() {
    let (app, _db) = app().await;

    let (status, body) = send(
        &app,
        Method::POST,
        "/moodle/sync",
        Some(&mint_jwt(USER)),
        Some(json!({"base_url": "https://lms.example.edu"})),
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_operator_sync_requires_operator_token() {
    let server = MockServer::start().await;
    mock_ws(&server, "core_enrol_get_users_courses", json!([])).await;
    let (app, db) = app().await;
    let conn = insert_connection(&db, USER, &server.uri(), "abc123").await.unwrap();
    let uri = format!("/operator/connections/{}/sync", conn.id);

    let (status, _) = send(&app, Method::POST, &uri, Some(&mint_jwt(USER)), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, report) = send(&app, Method::POST, &uri, Some(OPERATOR_TOKEN), None).await;
    assert_eq!(status, StatusCode::OK, "{report}");
    assert_eq!(report["connection_id"], conn.id.to_string());
    assert_eq!(report["courses"], 0);
}

#[tokio::test]
async fn test_request_id_is_echoed_and_lands_in_problem_body() {
    let (app, _db) = app().await;

    let response = app
        .oneshot(
            Request::builder()
                .uri("/moodle/courses")
                .header("x-request-id", "req-42")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(response.headers()["x-request-id"], "req-42");
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["trace_id"], "req-42");
}
