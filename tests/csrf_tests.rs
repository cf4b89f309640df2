mod common;

use axum::{
    body::Body,
    http::{Request, StatusCode, header},
};
use common::*;

fn post_with(uri: &str, session: &Session, csrf_header: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::COOKIE, session.cookie_header());
    if let Some(csrf) = csrf_header {
        builder = builder.header("x-csrf-token", csrf);
    }
    builder.body(Body::empty()).unwrap()
}

#[tokio::test]
async fn test_missing_csrf_header_rejected() {
    let (app, db) = create_test_app().await;
    let session = register(&app, "alice").await;

    let response = send(&app, post_with("/api/auth/refresh-token", &session, None)).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let json = body_json(response).await;
    assert_eq!(json["error"], "EBADCSRFTOKEN");
    assert_eq!(json["message"], "Invalid CSRF token");

    // The session was not touched
    let records = db.tokens().list_for_user(&session.user_id).await.unwrap();
    assert!(!records[0].is_revoked);
}

#[tokio::test]
async fn test_mismatched_csrf_header_rejected() {
    let (app, _db) = create_test_app().await;
    let session = register(&app, "alice").await;

    let response = send(
        &app,
        post_with("/api/auth/logout", &session, Some("not-the-token")),
    )
    .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert!(set_cookies(&response).is_empty());
}

#[tokio::test]
async fn test_csrf_header_without_cookie_rejected() {
    let (app, _db) = create_test_app().await;
    let session = register(&app, "alice").await;
    let no_cookie = Session {
        csrf: String::new(),
        ..session.clone()
    };

    let response = send(
        &app,
        post_with("/api/auth/refresh-token", &no_cookie, Some(&session.csrf)),
    )
    .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_safe_methods_skip_csrf() {
    let (app, _db) = create_test_app().await;
    let session = register(&app, "alice").await;

    let request = Request::builder()
        .uri("/api/auth/is-authenticated")
        .header(header::COOKIE, session.cookie_header())
        .body(Body::empty())
        .unwrap();

    let response = send(&app, request).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_csrf_token_endpoint() {
    let (app, _db) = create_test_app().await;

    let fresh = send(
        &app,
        Request::builder()
            .uri("/api/auth/csrf-token")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(fresh.status(), StatusCode::OK);
    let issued = set_cookies(&fresh)["csrf_token"].clone();
    let json = body_json(fresh).await;
    assert_eq!(json["data"]["csrf"], issued.as_str());
    assert!(!issued.is_empty());

    // An existing token is re-issued, not replaced
    let again = send(
        &app,
        Request::builder()
            .uri("/api/auth/csrf-token")
            .header(header::COOKIE, format!("csrf_token={}", issued))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    let json = body_json(again).await;
    assert_eq!(json["data"]["csrf"], issued.as_str());
}

#[tokio::test]
async fn test_login_and_register_exempt() {
    let (app, _db) = create_test_app().await;
    // Neither helper sends a CSRF header
    register(&app, "alice").await;
    login(&app, "alice").await;
}
