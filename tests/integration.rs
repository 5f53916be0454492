use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::Utc;
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

use waste_dispatch::api::rest::router;
use waste_dispatch::backend::Table;
use waste_dispatch::config::Config;
use waste_dispatch::state::AppState;

fn setup() -> (axum::Router, Arc<AppState>) {
    let state = Arc::new(AppState::in_memory(&Config::default()));
    (router(state.clone()), state)
}

fn as_user(builder: axum::http::request::Builder, user: (Uuid, &str)) -> axum::http::request::Builder {
    builder
        .header("x-user-id", user.0.to_string())
        .header("x-user-role", user.1)
}

fn json_request(method: &str, uri: &str, user: (Uuid, &str), body: Value) -> Request<Body> {
    as_user(Request::builder().method(method).uri(uri), user)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_string(&body).unwrap()))
        .unwrap()
}

fn get_request(uri: &str, user: (Uuid, &str)) -> Request<Body> {
    as_user(Request::builder().method("GET").uri(uri), user)
        .body(Body::empty())
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn body_string(response: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

async fn add_worker(state: &AppState, name: &str, lat: f64, lng: f64) -> Uuid {
    let user_id = Uuid::new_v4();
    state
        .store
        .insert(
            Table::Profiles,
            json!({
                "user_id": user_id,
                "full_name": name,
                "email": format!("{}@city.test", name.to_lowercase()),
                "role": "municipality",
                "address": format!("{name} Municipal Office"),
                "current_location_lat": lat,
                "current_location_lng": lng,
                "availability_status": "available",
                "last_location_update": Utc::now(),
            }),
        )
        .await
        .unwrap();
    user_id
}

fn citizen() -> (Uuid, &'static str) {
    (Uuid::new_v4(), "citizen")
}

fn government() -> (Uuid, &'static str) {
    (Uuid::new_v4(), "government")
}

async fn create_report(app: &axum::Router, user: (Uuid, &str), body: Value) -> Value {
    let response = app
        .clone()
        .oneshot(json_request("POST", "/reports", user, body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    body_json(response).await
}

#[tokio::test]
async fn health_returns_ok() {
    let (app, _state) = setup();
    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["workers"], 0);
    assert_eq!(body["strict_transitions"], true);
}

#[tokio::test]
async fn metrics_returns_prometheus_format() {
    let (app, _state) = setup();
    create_report(&app, citizen(), json!({ "title": "Bin", "waste_type": "wet" })).await;

    let response = app
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let content_type = response
        .headers()
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(content_type.starts_with("text/plain"));

    let body = body_string(response).await;
    assert!(body.contains("reports_created_total 1"));
    assert!(body.contains("change_events_total"));
}

#[tokio::test]
async fn requests_without_session_headers_are_unauthorized() {
    let (app, _state) = setup();
    let response = app
        .oneshot(Request::builder().uri("/reports").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(response).await;
    assert!(body["error"].as_str().unwrap().contains("x-user-id"));
}

#[tokio::test]
async fn blank_title_is_a_validation_error() {
    let (app, _state) = setup();
    let response = app
        .oneshot(json_request(
            "POST",
            "/reports",
            citizen(),
            json!({ "title": "  ", "waste_type": "dry" }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn report_lifecycle_with_auto_assignment() {
    let (app, state) = setup();
    let near = add_worker(&state, "Downtown", 10.0, 20.0).await;
    let uptown = add_worker(&state, "Uptown", 10.1, 20.1).await;

    let reporter = citizen();
    let report = create_report(
        &app,
        reporter,
        json!({
            "title": "Overflowing bin",
            "description": "bags on the pavement",
            "waste_type": "dry",
            "location": { "lat": 10.0, "lng": 20.0 },
            "address": "5 Oak Avenue, Downtown",
        }),
    )
    .await;
    assert_eq!(report["status"], "pending");
    assert_eq!(report["priority"], "medium");
    let report_id = report["id"].as_str().unwrap().to_string();

    let official = government();
    let premature = app
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/reports/{report_id}/auto-assign"),
            official,
            json!({}),
        ))
        .await
        .unwrap();
    assert_eq!(premature.status(), StatusCode::CONFLICT);

    let verified = app
        .clone()
        .oneshot(json_request(
            "PATCH",
            &format!("/reports/{report_id}/status"),
            official,
            json!({ "status": "verified" }),
        ))
        .await
        .unwrap();
    assert_eq!(verified.status(), StatusCode::OK);

    let assigned = app
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/reports/{report_id}/auto-assign"),
            official,
            json!({}),
        ))
        .await
        .unwrap();
    assert_eq!(assigned.status(), StatusCode::OK);
    let task = body_json(assigned).await;
    assert_eq!(task["assigned_to"], near.to_string());
    assert_eq!(task["status"], "assigned");

    let reassigned = app
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/reports/{report_id}/assign"),
            official,
            json!({ "worker_id": uptown }),
        ))
        .await
        .unwrap();
    assert_eq!(reassigned.status(), StatusCode::CONFLICT);

    let worker = (near, "municipality");
    let tasks = body_json(
        app.clone()
            .oneshot(get_request("/tasks", worker))
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(tasks.as_array().unwrap().len(), 1);

    let inbox = body_json(
        app.clone()
            .oneshot(get_request("/notifications", worker))
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(inbox[0]["type"], "task_assigned");

    let task_id = task["id"].as_str().unwrap();
    let done = app
        .clone()
        .oneshot(json_request(
            "PATCH",
            &format!("/tasks/{task_id}/status"),
            worker,
            json!({ "status": "completed", "notes": "cleared" }),
        ))
        .await
        .unwrap();
    assert_eq!(done.status(), StatusCode::OK);
    assert_eq!(body_json(done).await["status"], "completed");

    let feedback = app
        .oneshot(json_request(
            "POST",
            &format!("/reports/{report_id}/feedback"),
            reporter,
            json!({ "rating": 5, "comment": "fast" }),
        ))
        .await
        .unwrap();
    assert_eq!(feedback.status(), StatusCode::OK);
}

#[tokio::test]
async fn auto_assign_without_coordinates_is_rejected() {
    let (app, _state) = setup();
    let report = create_report(&app, citizen(), json!({ "title": "Bin", "waste_type": "wet" })).await;
    let report_id = report["id"].as_str().unwrap();

    let official = government();
    app.clone()
        .oneshot(json_request(
            "PATCH",
            &format!("/reports/{report_id}/status"),
            official,
            json!({ "status": "verified" }),
        ))
        .await
        .unwrap();

    let response = app
        .oneshot(json_request(
            "POST",
            &format!("/reports/{report_id}/auto-assign"),
            official,
            json!({}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn citizens_see_only_their_reports() {
    let (app, _state) = setup();
    let alice = citizen();
    create_report(&app, alice, json!({ "title": "Alice", "waste_type": "dry" })).await;
    create_report(&app, citizen(), json!({ "title": "Bob", "waste_type": "dry" })).await;

    let mine = body_json(app.clone().oneshot(get_request("/reports", alice)).await.unwrap()).await;
    assert_eq!(mine.as_array().unwrap().len(), 1);
    assert_eq!(mine[0]["title"], "Alice");

    let all = body_json(app.oneshot(get_request("/reports", government())).await.unwrap()).await;
    assert_eq!(all.as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn workers_are_ranked_by_distance() {
    let (app, state) = setup();
    add_worker(&state, "Far", 10.5, 20.5).await;
    add_worker(&state, "Near", 10.01, 20.01).await;

    let ranked = body_json(
        app.clone()
            .oneshot(get_request("/workers?lat=10.0&lng=20.0", government()))
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(ranked[0]["full_name"], "Near");
    assert!(ranked[0]["distance_km"].as_f64().unwrap() < ranked[1]["distance_km"].as_f64().unwrap());

    let closest = body_json(
        app.oneshot(get_request("/workers/closest?lat=10.5&lng=20.5", government()))
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(closest["full_name"], "Far");
}

#[tokio::test]
async fn worker_positions_are_for_government_only() {
    let (app, state) = setup();
    add_worker(&state, "Downtown", 10.0, 20.0).await;

    for uri in ["/workers", "/workers/closest?lat=10.0&lng=20.0"] {
        let response = app.clone().oneshot(get_request(uri, citizen())).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN, "{uri}");
    }
}

#[tokio::test]
async fn closest_worker_with_no_one_available() {
    let (app, _state) = setup();
    let response = app
        .oneshot(get_request("/workers/closest?lat=1.0&lng=1.0", government()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn address_matches_a_municipality() {
    let (app, state) = setup();
    add_worker(&state, "Downtown", 1.0, 1.0).await;
    add_worker(&state, "Uptown", 2.0, 2.0).await;

    let matched = body_json(
        app.clone()
            .oneshot(get_request(
                "/municipalities/match?address=123%20Oak%20Avenue%2C%20Downtown",
                citizen(),
            ))
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(matched["full_name"], "Downtown");

    let unmatched = body_json(
        app.oneshot(get_request("/municipalities/match?address=Riverside", citizen()))
            .await
            .unwrap(),
    )
    .await;
    assert!(unmatched.is_null());
}

#[tokio::test]
async fn announced_municipalities_show_online() {
    let (app, state) = setup();
    let ward = add_worker(&state, "Downtown", 1.0, 1.0).await;
    add_worker(&state, "Uptown", 2.0, 2.0).await;

    let announce = app
        .clone()
        .oneshot(json_request("POST", "/me/presence", (ward, "municipality"), json!({})))
        .await
        .unwrap();
    assert_eq!(announce.status(), StatusCode::NO_CONTENT);

    let snapshot = body_json(
        app.clone()
            .oneshot(get_request("/municipalities/presence", government()))
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(snapshot["total_count"], 2);
    assert_eq!(snapshot["online_count"], 1);

    let forbidden = app
        .oneshot(get_request("/municipalities/presence", citizen()))
        .await
        .unwrap();
    assert_eq!(forbidden.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn worker_location_updates_profile() {
    let (app, state) = setup();
    let worker = add_worker(&state, "Mobile", 1.0, 1.0).await;

    let response = app
        .clone()
        .oneshot(json_request(
            "PUT",
            "/me/location",
            (worker, "municipality"),
            json!({ "lat": 12.5, "lng": 77.5 }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let fix = body_json(response).await;
    assert_eq!(fix["coordinate"]["lat"], 12.5);
    assert!(!fix["address"].as_str().unwrap().is_empty());

    let ranked = body_json(
        app.oneshot(get_request("/workers?search=mobile", government()))
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(ranked[0]["location"]["lat"], 12.5);
}

#[tokio::test]
async fn job_board_flow() {
    let (app, _state) = setup();
    let official = government();

    let job = body_json(
        app.clone()
            .oneshot(json_request(
                "POST",
                "/jobs",
                official,
                json!({
                    "title": "Driver",
                    "description": "Collection truck driver",
                    "job_type": "municipality",
                }),
            ))
            .await
            .unwrap(),
    )
    .await;
    let job_id = job["id"].as_str().unwrap();

    let applicant = citizen();
    let first = app
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/jobs/{job_id}/applications"),
            applicant,
            json!({ "cover_letter": "I drive well" }),
        ))
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::OK);

    let second = app
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/jobs/{job_id}/applications"),
            applicant,
            json!({}),
        ))
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::CONFLICT);

    let all = body_json(app.clone().oneshot(get_request("/applications", official)).await.unwrap()).await;
    assert_eq!(all.as_array().unwrap().len(), 1);
    assert_eq!(all[0]["job"]["title"], "Driver");

    let listed = body_json(app.oneshot(get_request("/jobs", applicant)).await.unwrap()).await;
    assert_eq!(listed.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn photo_upload_returns_public_urls() {
    let (app, _state) = setup();
    let boundary = "XBOUNDARY";
    let body = format!(
        "--{boundary}\r\n\
         Content-Disposition: form-data; name=\"files\"; filename=\"bin.jpg\"\r\n\
         Content-Type: image/jpeg\r\n\r\n\
         not-really-a-jpeg\r\n\
         --{boundary}--\r\n"
    );

    let user = citizen();
    let request = as_user(Request::builder().method("POST").uri("/uploads/photos"), user)
        .header(
            "content-type",
            format!("multipart/form-data; boundary={boundary}"),
        )
        .body(Body::from(body))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    let url = body["urls"][0].as_str().unwrap();
    assert!(url.contains("/report-photos/"));
    assert!(url.contains(&user.0.to_string()));
    assert!(url.ends_with("-0-bin.jpg"));
}
