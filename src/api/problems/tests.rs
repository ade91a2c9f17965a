use axum::http::{Method, StatusCode};
use tower::ServiceExt;

use crate::test_support::{self, bearer_token, json_request, read_json};

#[tokio::test]
async fn problem_create_and_get() {
    let ctx = test_support::setup_test_context().await;
    let user = test_support::insert_user(ctx.state.db(), "alice").await;
    let token = bearer_token(&user.id, ctx.state.settings());
    let collection = test_support::insert_collection(ctx.state.db(), &user.id, "Algebra").await;

    let response = ctx
        .app
        .clone()
        .oneshot(json_request(
            Method::POST,
            "/api/v1/problems",
            Some(&token),
            Some(serde_json::json!({
                "collection_id": collection.id,
                "original_image_url": "https://images.example/p1.png",
            })),
        ))
        .await
        .expect("create response");
    assert_eq!(response.status(), StatusCode::CREATED);
    let created = read_json(response).await;
    assert_eq!(created["status"], "draft");
    assert_eq!(created["version"], 1);

    let problem_id = created["id"].as_str().expect("problem id");
    let response = ctx
        .app
        .clone()
        .oneshot(json_request(
            Method::GET,
            &format!("/api/v1/problems/{problem_id}"),
            Some(&token),
            None,
        ))
        .await
        .expect("get response");
    assert_eq!(response.status(), StatusCode::OK);
    let fetched = read_json(response).await;
    assert_eq!(fetched["original_image_url"], "https://images.example/p1.png");
}

#[tokio::test]
async fn create_problem_rejects_foreign_collection() {
    let ctx = test_support::setup_test_context().await;
    let owner = test_support::insert_user(ctx.state.db(), "owner").await;
    let stranger = test_support::insert_user(ctx.state.db(), "stranger").await;
    let collection = test_support::insert_collection(ctx.state.db(), &owner.id, "Private").await;

    let token = bearer_token(&stranger.id, ctx.state.settings());
    let response = ctx
        .app
        .clone()
        .oneshot(json_request(
            Method::POST,
            "/api/v1/problems",
            Some(&token),
            Some(serde_json::json!({
                "collection_id": collection.id,
                "original_image_url": "https://images.example/p1.png",
            })),
        ))
        .await
        .expect("create response");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn stale_version_update_conflicts_and_changes_nothing() {
    let ctx = test_support::setup_test_context().await;
    let user = test_support::insert_user(ctx.state.db(), "editor").await;
    let token = bearer_token(&user.id, ctx.state.settings());
    let collection = test_support::insert_collection(ctx.state.db(), &user.id, "Algebra").await;
    let problem = test_support::insert_problem(ctx.state.db(), &user.id, &collection.id).await;

    // Caller X updates at the version both callers read.
    let response = ctx
        .app
        .clone()
        .oneshot(json_request(
            Method::PATCH,
            &format!("/api/v1/problems/{}", problem.id),
            Some(&token),
            Some(serde_json::json!({ "version": 1, "note": "note from X" })),
        ))
        .await
        .expect("first update");
    assert_eq!(response.status(), StatusCode::OK);
    let updated = read_json(response).await;
    assert_eq!(updated["version"], 2);

    // Caller Y still holds version 1 and must lose.
    let response = ctx
        .app
        .clone()
        .oneshot(json_request(
            Method::PATCH,
            &format!("/api/v1/problems/{}", problem.id),
            Some(&token),
            Some(serde_json::json!({ "version": 1, "note": "note from Y" })),
        ))
        .await
        .expect("stale update");
    assert_eq!(response.status(), StatusCode::CONFLICT);

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
        .expect("get response");
    let fetched = read_json(response).await;
    assert_eq!(fetched["note"], "note from X");
    assert_eq!(fetched["version"], 2);
}

#[tokio::test]
async fn moving_a_problem_goes_through_the_version_check() {
    let ctx = test_support::setup_test_context().await;
    let user = test_support::insert_user(ctx.state.db(), "mover").await;
    let token = bearer_token(&user.id, ctx.state.settings());
    let source = test_support::insert_collection(ctx.state.db(), &user.id, "Source").await;
    let target = test_support::insert_collection(ctx.state.db(), &user.id, "Target").await;
    let problem = test_support::insert_problem(ctx.state.db(), &user.id, &source.id).await;

    let response = ctx
        .app
        .clone()
        .oneshot(json_request(
            Method::PATCH,
            &format!("/api/v1/problems/{}", problem.id),
            Some(&token),
            Some(serde_json::json!({ "version": 1, "collection_id": target.id })),
        ))
        .await
        .expect("move response");
    assert_eq!(response.status(), StatusCode::OK);
    let moved = read_json(response).await;
    assert_eq!(moved["version"], 2);

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
        .expect("get response");
    let fetched = read_json(response).await;
    assert_eq!(fetched["collection_id"], serde_json::json!(target.id));

    // Moving into a collection the user does not own is rejected up front.
    let stranger = test_support::insert_user(ctx.state.db(), "stranger").await;
    let foreign = test_support::insert_collection(ctx.state.db(), &stranger.id, "Foreign").await;
    let response = ctx
        .app
        .clone()
        .oneshot(json_request(
            Method::PATCH,
            &format!("/api/v1/problems/{}", problem.id),
            Some(&token),
            Some(serde_json::json!({ "version": 2, "collection_id": foreign.id })),
        ))
        .await
        .expect("foreign move response");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn list_problems_supports_updated_after_filter() {
    let ctx = test_support::setup_test_context().await;
    let user = test_support::insert_user(ctx.state.db(), "lister").await;
    let token = bearer_token(&user.id, ctx.state.settings());
    let collection = test_support::insert_collection(ctx.state.db(), &user.id, "Algebra").await;
    test_support::insert_problem(ctx.state.db(), &user.id, &collection.id).await;
    test_support::insert_problem(ctx.state.db(), &user.id, &collection.id).await;

    let response = ctx
        .app
        .clone()
        .oneshot(json_request(
            Method::GET,
            &format!("/api/v1/collections/{}/problems", collection.id),
            Some(&token),
            None,
        ))
        .await
        .expect("list response");
    assert_eq!(response.status(), StatusCode::OK);
    let listed = read_json(response).await;
    assert_eq!(listed.as_array().map(Vec::len), Some(2));

    let response = ctx
        .app
        .clone()
        .oneshot(json_request(
            Method::GET,
            &format!(
                "/api/v1/collections/{}/problems?updated_after=2099-01-01T00:00:00Z",
                collection.id
            ),
            Some(&token),
            None,
        ))
        .await
        .expect("filtered response");
    let filtered = read_json(response).await;
    assert_eq!(filtered.as_array().map(Vec::len), Some(0));

    let response = ctx
        .app
        .clone()
        .oneshot(json_request(
            Method::GET,
            &format!("/api/v1/collections/{}/problems?updated_after=yesterday", collection.id),
            Some(&token),
            None,
        ))
        .await
        .expect("invalid filter response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn delete_problem_is_scoped_and_terminal() {
    let ctx = test_support::setup_test_context().await;
    let user = test_support::insert_user(ctx.state.db(), "deleter").await;
    let token = bearer_token(&user.id, ctx.state.settings());
    let collection = test_support::insert_collection(ctx.state.db(), &user.id, "Algebra").await;
    let problem = test_support::insert_problem(ctx.state.db(), &user.id, &collection.id).await;

    let response = ctx
        .app
        .clone()
        .oneshot(json_request(
            Method::DELETE,
            &format!("/api/v1/problems/{}", problem.id),
            Some(&token),
            None,
        ))
        .await
        .expect("delete response");
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = ctx
        .app
        .clone()
        .oneshot(json_request(
            Method::DELETE,
            &format!("/api/v1/problems/{}", problem.id),
            Some(&token),
            None,
        ))
        .await
        .expect("second delete response");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
