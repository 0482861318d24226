use std::sync::Arc;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;
use wiremock::matchers::{body_partial_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use schedule_cell::router::schedule_routes;
use shared_config::AppConfig;

const TOKEN: &str = "test-token";

fn create_test_app(server: &MockServer) -> Router {
    schedule_routes(Arc::new(AppConfig::for_store(server.uri(), "test-anon-key")))
}

fn json_request(http_method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(http_method)
        .uri(uri)
        .header("Authorization", format!("Bearer {}", TOKEN))
        .header("Content-Type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get_request(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .header("Authorization", format!("Bearer {}", TOKEN))
        .body(Body::empty())
        .unwrap()
}

async fn read_json(response: axum::response::Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&body).unwrap()
}

/// Mondays 09:00-10:00 from 2024-01-01, with 2024-01-08 cancelled.
async fn mount_weekly_schedule(server: &MockServer, id: Uuid, rule: &str) {
    Mock::given(method("GET"))
        .and(path("/rest/v1/doctor_schedules"))
        .and(query_param("id", format!("eq.{}", id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
            "id": id,
            "doctor_id": Uuid::new_v4(),
            "location_id": Uuid::new_v4(),
            "start_time": "2024-01-01T09:00:00Z",
            "end_time": "2024-01-01T10:00:00Z",
            "recurrence_rule": rule,
            "version": 4
        }])))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/schedule_exceptions"))
        .respond_with(ResponseTemplate::new(200)
            .set_body_json(json!([{ "occurrence_start": "2024-01-08T09:00:00Z" }])))
        .mount(server)
        .await;
}

fn edit_body(occurrence_start: &str, recurrence: Value, scope: Option<&str>) -> Value {
    json!({
        "occurrence_start": occurrence_start,
        "doctor_id": Uuid::new_v4(),
        "location_id": Uuid::new_v4(),
        "start_time_of_day": "11:00:00",
        "end_time_of_day": "12:00:00",
        "recurrence": recurrence,
        "scope": scope
    })
}

#[tokio::test]
async fn test_create_recurring_schedule() {
    let server = MockServer::start().await;
    let (id, doctor_id, location_id) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

    Mock::given(method("POST"))
        .and(path("/rest/v1/doctor_schedules"))
        .and(body_partial_json(json!({
            "recurrence_rule": "FREQ=WEEKLY;INTERVAL=1;BYDAY=MO,WE;COUNT=4"
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([{
            "id": id,
            "doctor_id": doctor_id,
            "location_id": location_id,
            "start_time": "2024-01-01T09:00:00Z",
            "end_time": "2024-01-01T10:00:00Z",
            "recurrence_rule": "FREQ=WEEKLY;INTERVAL=1;BYDAY=MO,WE;COUNT=4",
            "version": 1
        }])))
        .expect(1)
        .mount(&server)
        .await;

    let request = json_request("POST", "/", json!({
        "doctor_id": doctor_id,
        "location_id": location_id,
        "start_time": "2024-01-01T09:00:00Z",
        "end_time": "2024-01-01T10:00:00Z",
        "recurrence": { "frequency": "weekly", "weekdays": ["Wed", "Mon"], "count": 4 }
    }));

    let response = create_test_app(&server).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = read_json(response).await;
    assert_eq!(body["id"], json!(id));
}

#[tokio::test]
async fn test_create_rejects_both_terminations() {
    let server = MockServer::start().await;

    let request = json_request("POST", "/", json!({
        "doctor_id": Uuid::new_v4(),
        "location_id": Uuid::new_v4(),
        "start_time": "2024-01-01T09:00:00Z",
        "end_time": "2024-01-01T10:00:00Z",
        "recurrence": { "frequency": "daily", "until": "2024-02-01T00:00:00Z", "count": 4 }
    }));

    let response = create_test_app(&server).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_list_occurrences_skips_cancelled() {
    let server = MockServer::start().await;
    let id = Uuid::new_v4();
    mount_weekly_schedule(&server, id, "FREQ=WEEKLY;INTERVAL=1;BYDAY=MO").await;

    let uri = format!(
        "/{}/occurrences?from=2024-01-01T00:00:00Z&to=2024-01-22T00:00:00Z",
        id
    );
    let response = create_test_app(&server).oneshot(get_request(&uri)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = read_json(response).await;
    assert_eq!(body["total"], 2);
    assert_eq!(body["occurrences"][0]["start_time"], "2024-01-01T09:00:00Z");
    assert_eq!(body["occurrences"][1]["start_time"], "2024-01-15T09:00:00Z");
}

#[tokio::test]
async fn test_list_occurrences_window_too_wide() {
    let server = MockServer::start().await;

    let uri = format!(
        "/{}/occurrences?from=2024-01-01T00:00:00Z&to=2026-01-01T00:00:00Z",
        Uuid::new_v4()
    );
    let response = create_test_app(&server).oneshot(get_request(&uri)).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_unreadable_stored_rule() {
    let server = MockServer::start().await;
    let id = Uuid::new_v4();
    mount_weekly_schedule(&server, id, "FREQ=YEARLY").await;

    let uri = format!(
        "/{}/occurrences?from=2024-01-01T00:00:00Z&to=2024-02-01T00:00:00Z",
        id
    );
    let response = create_test_app(&server).oneshot(get_request(&uri)).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_classify_rule_change() {
    let server = MockServer::start().await;
    let id = Uuid::new_v4();
    mount_weekly_schedule(&server, id, "FREQ=WEEKLY;INTERVAL=1;BYDAY=MO").await;

    let request = json_request(
        "POST",
        &format!("/{}/occurrences/classify", id),
        edit_body("2024-01-15T09:00:00Z", json!({ "frequency": "weekly", "weekdays": ["Tue"] }), None),
    );
    let response = create_test_app(&server).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = read_json(response).await;
    assert_eq!(body["case"], "recurring_info_and_rrule");
    assert_eq!(body["offered_scopes"], json!(["this_and_following"]));
    assert_eq!(body["needs_scope_prompt"], true);
}

#[tokio::test]
async fn test_edit_without_scope_lists_choices() {
    let server = MockServer::start().await;
    let id = Uuid::new_v4();
    mount_weekly_schedule(&server, id, "FREQ=WEEKLY;INTERVAL=1;BYDAY=MO").await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/rpc/apply_schedule_plan"))
        .respond_with(ResponseTemplate::new(204))
        .expect(0)
        .mount(&server)
        .await;

    let request = json_request(
        "PUT",
        &format!("/{}/occurrences", id),
        edit_body("2024-01-15T09:00:00Z", json!({ "frequency": "weekly", "weekdays": ["Mon"] }), None),
    );
    let response = create_test_app(&server).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = read_json(response).await;
    let message = body["error"].as_str().unwrap();
    assert!(message.contains("this_occurrence_only"));
    assert!(message.contains("entire_series"));
}

#[tokio::test]
async fn test_edit_single_occurrence() {
    let server = MockServer::start().await;
    let id = Uuid::new_v4();
    mount_weekly_schedule(&server, id, "FREQ=WEEKLY;INTERVAL=1;BYDAY=MO").await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/rpc/apply_schedule_plan"))
        .and(body_partial_json(json!({
            "p_schedule_id": id,
            "p_expected_version": 4
        })))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let request = json_request(
        "PUT",
        &format!("/{}/occurrences", id),
        edit_body(
            "2024-01-15T09:00:00Z",
            json!({ "frequency": "weekly" }),
            Some("this_occurrence_only"),
        ),
    );
    let response = create_test_app(&server).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = read_json(response).await;
    assert_eq!(body["case"], "recurring_info_only");
    assert_eq!(body["scope"], "this_occurrence_only");
}

#[tokio::test]
async fn test_edit_unknown_occurrence() {
    let server = MockServer::start().await;
    let id = Uuid::new_v4();
    mount_weekly_schedule(&server, id, "FREQ=WEEKLY;INTERVAL=1;BYDAY=MO").await;

    // 2024-01-08 is cancelled; 2024-01-16 is a Tuesday.
    for start in ["2024-01-08T09:00:00Z", "2024-01-16T09:00:00Z"] {
        let request = json_request(
            "PUT",
            &format!("/{}/occurrences", id),
            edit_body(start, Value::Null, Some("entire_series")),
        );
        let response = create_test_app(&server).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}

#[tokio::test]
async fn test_delete_single_occurrence() {
    let server = MockServer::start().await;
    let id = Uuid::new_v4();
    mount_weekly_schedule(&server, id, "FREQ=WEEKLY;INTERVAL=1;BYDAY=MO").await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/rpc/apply_schedule_plan"))
        .and(body_partial_json(json!({
            "p_steps": [{ "op": "insert_exception", "occurrence_start": "2024-01-22T09:00:00Z" }]
        })))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let request = json_request(
        "DELETE",
        &format!("/{}/occurrences", id),
        json!({ "occurrence_start": "2024-01-22T09:00:00Z", "scope": "this_occurrence_only" }),
    );
    let response = create_test_app(&server).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = read_json(response).await;
    assert_eq!(body["scope"], "this_occurrence_only");
}

#[tokio::test]
async fn test_missing_bearer_token() {
    let server = MockServer::start().await;

    let request = Request::builder()
        .method("GET")
        .uri(format!(
            "/{}/occurrences?from=2024-01-01T00:00:00Z&to=2024-02-01T00:00:00Z",
            Uuid::new_v4()
        ))
        .body(Body::empty())
        .unwrap();
    let response = create_test_app(&server).oneshot(request).await.unwrap();
    assert!(response.status().is_client_error());
}
