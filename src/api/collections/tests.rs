use axum::http::{Method, StatusCode};
use tower::ServiceExt;

use crate::test_support::{self, bearer_token, json_request, read_json};

#[tokio::test]
async fn collection_crud_flow() {
    let ctx = test_support::setup_test_context().await;
    let user = test_support::insert_user(ctx.state.db(), "alice").await;
    let token = bearer_token(&user.id, ctx.state.settings());

    let response = ctx
        .app
        .clone()
        .oneshot(json_request(
            Method::POST,
            "/api/v1/collections",
            Some(&token),
            Some(serde_json::json!({ "name": "Algebra" })),
        ))
        .await
        .expect("create response");
    assert_eq!(response.status(), StatusCode::CREATED);
    let created = read_json(response).await;
    let collection_id = created["id"].as_str().expect("collection id").to_string();
    assert_eq!(created["name"], "Algebra");

    // Same name for the same user is rejected.
    let response = ctx
        .app
        .clone()
        .oneshot(json_request(
            Method::POST,
            "/api/v1/collections",
            Some(&token),
            Some(serde_json::json!({ "name": "Algebra" })),
        ))
        .await
        .expect("duplicate response");
    assert_eq!(response.status(), StatusCode::CONFLICT);

    test_support::insert_problem(ctx.state.db(), &user.id, &collection_id).await;

    let response = ctx
        .app
        .clone()
        .oneshot(json_request(Method::GET, "/api/v1/collections", Some(&token), None))
        .await
        .expect("list response");
    assert_eq!(response.status(), StatusCode::OK);
    let listed = read_json(response).await;
    assert_eq!(listed.as_array().map(Vec::len), Some(1));
    assert_eq!(listed[0]["problem_count"], 1);

    let response = ctx
        .app
        .clone()
        .oneshot(json_request(
            Method::PATCH,
            &format!("/api/v1/collections/{collection_id}"),
            Some(&token),
            Some(serde_json::json!({ "name": "Geometry" })),
        ))
        .await
        .expect("rename response");
    assert_eq!(response.status(), StatusCode::OK);
    let renamed = read_json(response).await;
    assert_eq!(renamed["name"], "Geometry");

    // Deleting a collection that still has problems is a conflict.
    let response = ctx
        .app
        .clone()
        .oneshot(json_request(
            Method::DELETE,
            &format!("/api/v1/collections/{collection_id}"),
            Some(&token),
            None,
        ))
        .await
        .expect("delete response");
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn delete_empty_collection_succeeds() {
    let ctx = test_support::setup_test_context().await;
    let user = test_support::insert_user(ctx.state.db(), "bob").await;
    let token = bearer_token(&user.id, ctx.state.settings());
    let collection = test_support::insert_collection(ctx.state.db(), &user.id, "Scratch").await;

    let response = ctx
        .app
        .clone()
        .oneshot(json_request(
            Method::DELETE,
            &format!("/api/v1/collections/{}", collection.id),
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
            Method::GET,
            &format!("/api/v1/collections/{}", collection.id),
            Some(&token),
            None,
        ))
        .await
        .expect("get response");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn collections_are_scoped_to_their_owner() {
    let ctx = test_support::setup_test_context().await;
    let owner = test_support::insert_user(ctx.state.db(), "owner").await;
    let stranger = test_support::insert_user(ctx.state.db(), "stranger").await;
    let collection = test_support::insert_collection(ctx.state.db(), &owner.id, "Private").await;

    let stranger_token = bearer_token(&stranger.id, ctx.state.settings());
    let response = ctx
        .app
        .clone()
        .oneshot(json_request(
            Method::GET,
            &format!("/api/v1/collections/{}", collection.id),
            Some(&stranger_token),
            None,
        ))
        .await
        .expect("get response");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = ctx
        .app
        .clone()
        .oneshot(json_request(
            Method::GET,
            &format!("/api/v1/collections/{}", collection.id),
            None,
            None,
        ))
        .await
        .expect("unauthenticated response");
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}
