mod common;

use common::*;
use parley::{
    auth::DEV_COOKIE_NAMES,
    client::{ApiClient, ApiRequest, ClientError, HttpTransport, Registration, Transport},
    db::Database,
    start_server,
};
use std::time::Duration;

async fn start(access_ttl: u64) -> (ApiClient<HttpTransport>, Database) {
    let db = Database::open(":memory:").await.unwrap();
    let mut config = test_config(db.clone());
    config.access_ttl = access_ttl;

    let (_handle, addr) = start_server(config, 0).await.unwrap();
    let transport = HttpTransport::new(&format!("http://{}/", addr)).unwrap();
    (ApiClient::new(transport, DEV_COOKIE_NAMES), db)
}

fn alice() -> Registration {
    Registration {
        username: "alice".into(),
        email: "alice@example.com".into(),
        password: PASSWORD.into(),
        full_name: None,
    }
}

#[tokio::test]
async fn test_register_syncs_tokens_with_cookies() {
    let (client, _db) = start(900).await;

    let user = client.register(&alice()).await.unwrap();
    assert_eq!(user.username, "alice");
    assert!(client.state().authenticated);

    let fp = client.tokens().fingerprint().unwrap();
    assert_eq!(client.transport().cookie("x-fingerprint"), Some(fp));
    assert_eq!(client.transport().cookie("csrf_token"), client.tokens().csrf());
    // HttpOnly cookies live in the jar too, the client just never copies them
    assert!(client.transport().cookie("access_token").is_some());

    assert!(!client.sync_all_tokens().changed());

    let me = client.me().await.unwrap();
    assert_eq!(me.user_id, user.user_id);
}

#[tokio::test]
async fn test_check_auth_status_rotates_fingerprint() {
    let (client, db) = start(900).await;
    let user = client.register(&alice()).await.unwrap();
    let before = client.tokens().fingerprint().unwrap();

    assert!(client.check_auth_status().await.unwrap());

    let after = client.tokens().fingerprint().unwrap();
    assert_ne!(before, after);
    assert_eq!(client.transport().cookie("x-fingerprint"), Some(after));

    let records = db.tokens().list_for_user(&user.user_id).await.unwrap();
    assert_eq!(records.iter().filter(|r| !r.is_revoked).count(), 1);
}

#[tokio::test]
async fn test_stale_csrf_recovered_once() {
    let (client, _db) = start(900).await;
    client.register(&alice()).await.unwrap();
    let real = client.tokens().csrf();

    client.tokens().sync_csrf(Some("stale-token"));
    client
        .send(ApiRequest::post("/api/auth/refresh-token", None))
        .await
        .unwrap();

    assert_eq!(client.tokens().csrf(), real);
}

#[tokio::test]
async fn test_expired_access_token_refreshed_transparently() {
    let (client, _db) = start(1).await;
    client.register(&alice()).await.unwrap();
    let before = client.tokens().fingerprint();

    tokio::time::sleep(Duration::from_millis(2100)).await;

    let me = client.me().await.unwrap();
    assert_eq!(me.username, "alice");
    assert_ne!(client.tokens().fingerprint(), before);
    assert!(client.state().authenticated);
}

#[tokio::test]
async fn test_logout_clears_client_state() {
    let (client, db) = start(900).await;
    let user = client.register(&alice()).await.unwrap();

    client.logout().await.unwrap();

    assert!(!client.state().authenticated);
    assert_eq!(client.tokens().fingerprint(), None);
    assert_eq!(client.transport().cookie("x-fingerprint"), None);

    let records = db.tokens().list_for_user(&user.user_id).await.unwrap();
    assert!(records.iter().all(|r| r.is_revoked));

    // No session left to recover
    let err = client.me().await.unwrap_err();
    assert!(matches!(err, ClientError::SessionExpired));
}

#[tokio::test]
async fn test_login_wrong_password_sets_error() {
    let (client, _db) = start(900).await;
    client.register(&alice()).await.unwrap();
    client.logout().await.unwrap();

    let err = client.login("alice", "wrong password").await.unwrap_err();
    assert_eq!(err.status(), Some(401));
    assert_eq!(client.state().error.as_deref(), Some("Invalid credentials"));

    client.login("alice", PASSWORD).await.unwrap();
    assert!(client.state().authenticated);
    assert!(client.state().error.is_none());
}
