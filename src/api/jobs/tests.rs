use axum::http::{Method, StatusCode};
use tower::ServiceExt;

use crate::test_support::{self, bearer_token, json_request, read_json};

#[tokio::test]
async fn trigger_ocr_creates_job_and_marks_problem_pending() {
    let ctx = test_support::setup_test_context().await;
    let user = test_support::insert_user(ctx.state.db(), "alice").await;
    let token = bearer_token(&user.id, ctx.state.settings());
    let collection = test_support::insert_collection(ctx.state.db(), &user.id, "Algebra").await;
    let problem = test_support::insert_problem(ctx.state.db(), &user.id, &collection.id).await;

    let response = ctx
        .app
        .clone()
        .oneshot(json_request(
            Method::POST,
            &format!("/api/v1/problems/{}/ocr", problem.id),
            Some(&token),
            Some(serde_json::json!({})),
        ))
        .await
        .expect("trigger response");
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let submitted = read_json(response).await;
    let job_id = submitted["job_id"].as_str().expect("job id").to_string();

    let response = ctx
        .app
        .clone()
        .oneshot(json_request(
            Method::GET,
            &format!("/api/v1/jobs/{job_id}"),
            Some(&token),
            None,
        ))
        .await
        .expect("status response");
    assert_eq!(response.status(), StatusCode::OK);
    let status = read_json(response).await;
    assert_eq!(status["status"], "pending");
    assert_eq!(status["result"], serde_json::Value::Null);
    assert_eq!(status["error_message"], serde_json::Value::Null);

    let response = ctx
        .app
        .clone()
        .oneshot(json_request(
            Method::GET,
            &format!("/api/v1/problems/{}", problem.id),
            Some(&token),
            None,
        ))
        .await
        .expect("problem response");
    let fetched = read_json(response).await;
    assert_eq!(fetched["status"], "ocr_pending");
}

#[tokio::test]
async fn duplicate_ocr_submissions_return_the_same_job() {
    let ctx = test_support::setup_test_context().await;
    let user = test_support::insert_user(ctx.state.db(), "dupe").await;
    let token = bearer_token(&user.id, ctx.state.settings());
    let collection = test_support::insert_collection(ctx.state.db(), &user.id, "Algebra").await;
    let problem = test_support::insert_problem(ctx.state.db(), &user.id, &collection.id).await;

    let body = serde_json::json!({ "idempotency_key": "abc" });
    let uri = format!("/api/v1/problems/{}/ocr", problem.id);

    let response = ctx
        .app
        .clone()
        .oneshot(json_request(Method::POST, &uri, Some(&token), Some(body.clone())))
        .await
        .expect("first trigger");
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let first = read_json(response).await;

    let response = ctx
        .app
        .clone()
        .oneshot(json_request(Method::POST, &uri, Some(&token), Some(body)))
        .await
        .expect("second trigger");
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let second = read_json(response).await;

    assert_eq!(first["job_id"], second["job_id"]);

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM jobs")
        .fetch_one(ctx.state.db())
        .await
        .expect("count jobs");
    assert_eq!(count, 1);
}

#[tokio::test]
async fn jobs_are_scoped_to_their_requester() {
    let ctx = test_support::setup_test_context().await;
    let owner = test_support::insert_user(ctx.state.db(), "owner").await;
    let stranger = test_support::insert_user(ctx.state.db(), "stranger").await;
    let token = bearer_token(&owner.id, ctx.state.settings());
    let collection = test_support::insert_collection(ctx.state.db(), &owner.id, "Algebra").await;
    let problem = test_support::insert_problem(ctx.state.db(), &owner.id, &collection.id).await;

    let response = ctx
        .app
        .clone()
        .oneshot(json_request(
            Method::POST,
            &format!("/api/v1/problems/{}/ocr", problem.id),
            Some(&token),
            Some(serde_json::json!({})),
        ))
        .await
        .expect("trigger response");
    let submitted = read_json(response).await;
    let job_id = submitted["job_id"].as_str().expect("job id").to_string();

    let stranger_token = bearer_token(&stranger.id, ctx.state.settings());
    let response = ctx
        .app
        .clone()
        .oneshot(json_request(
            Method::GET,
            &format!("/api/v1/jobs/{job_id}"),
            Some(&stranger_token),
            None,
        ))
        .await
        .expect("foreign status response");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = ctx
        .app
        .clone()
        .oneshot(json_request(
            Method::GET,
            &format!("/api/v1/jobs/{}", uuid::Uuid::new_v4()),
            Some(&token),
            None,
        ))
        .await
        .expect("unknown status response");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn cancel_sets_the_marker() {
    let ctx = test_support::setup_test_context().await;
    let user = test_support::insert_user(ctx.state.db(), "canceller").await;
    let token = bearer_token(&user.id, ctx.state.settings());
    let collection = test_support::insert_collection(ctx.state.db(), &user.id, "Algebra").await;
    let problem = test_support::insert_problem(ctx.state.db(), &user.id, &collection.id).await;

    let response = ctx
        .app
        .clone()
        .oneshot(json_request(
            Method::POST,
            &format!("/api/v1/problems/{}/ocr", problem.id),
            Some(&token),
            Some(serde_json::json!({})),
        ))
        .await
        .expect("trigger response");
    let submitted = read_json(response).await;
    let job_id = submitted["job_id"].as_str().expect("job id").to_string();

    let response = ctx
        .app
        .clone()
        .oneshot(json_request(
            Method::POST,
            &format!("/api/v1/jobs/{job_id}/cancel"),
            Some(&token),
            None,
        ))
        .await
        .expect("cancel response");
    assert_eq!(response.status(), StatusCode::OK);
    let cancelled = read_json(response).await;
    assert_eq!(cancelled["cancel_requested"], true);
    assert_eq!(cancelled["status"], "pending");
}

#[tokio::test]
async fn export_pdf_submits_a_job() {
    let ctx = test_support::setup_test_context().await;
    let user = test_support::insert_user(ctx.state.db(), "exporter").await;
    let token = bearer_token(&user.id, ctx.state.settings());
    let collection = test_support::insert_collection(ctx.state.db(), &user.id, "Algebra").await;

    let response = ctx
        .app
        .clone()
        .oneshot(json_request(
            Method::POST,
            &format!("/api/v1/collections/{}/export_pdf", collection.id),
            Some(&token),
            Some(serde_json::json!({ "idempotency_key": "pdf-1" })),
        ))
        .await
        .expect("export response");
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let submitted = read_json(response).await;
    let job_id = submitted["job_id"].as_str().expect("job id").to_string();

    let kind: String = sqlx::query_scalar("SELECT kind::text FROM jobs WHERE id = $1")
        .bind(&job_id)
        .fetch_one(ctx.state.db())
        .await
        .expect("job kind");
    assert_eq!(kind, "pdf_export");
}

#[tokio::test]
async fn submissions_require_authentication() {
    let ctx = test_support::setup_test_context().await;
    let user = test_support::insert_user(ctx.state.db(), "anon-target").await;
    let collection = test_support::insert_collection(ctx.state.db(), &user.id, "Algebra").await;
    let problem = test_support::insert_problem(ctx.state.db(), &user.id, &collection.id).await;

    let response = ctx
        .app
        .clone()
        .oneshot(json_request(
            Method::POST,
            &format!("/api/v1/problems/{}/ocr", problem.id),
            None,
            Some(serde_json::json!({})),
        ))
        .await
        .expect("unauthenticated response");
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}
