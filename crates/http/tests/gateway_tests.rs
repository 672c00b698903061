//! Integration tests for the request pipeline: classification, refresh and retry

use blogx_http::{
    ApiRequest, AuthPolicy, Gateway, GatewayError, Navigator, StaticCsrfToken, TokenGrant,
};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use mockall::mock;
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

mock! {
    pub Navigator {}

    impl Navigator for Navigator {
        fn redirect_to(&self, path: &str);
    }
}

fn grant(access: &str, expiry: DateTime<Utc>) -> TokenGrant {
    TokenGrant {
        access_token: access.to_string(),
        refresh_token: "refresh-token".to_string(),
        access_expiry: Some(expiry),
    }
}

fn expired() -> DateTime<Utc> {
    Utc::now() - ChronoDuration::minutes(5)
}

fn valid() -> DateTime<Utc> {
    Utc::now() + ChronoDuration::hours(1)
}

fn quiet_navigator() -> Arc<dyn Navigator> {
    let mut navigator = MockNavigator::new();
    navigator.expect_redirect_to().never();
    Arc::new(navigator)
}

fn redirect_once() -> Arc<dyn Navigator> {
    let mut navigator = MockNavigator::new();
    navigator
        .expect_redirect_to()
        .withf(|path: &str| path == "/login")
        .times(1)
        .return_const(());
    Arc::new(navigator)
}

fn gateway(server: &MockServer, navigator: Arc<dyn Navigator>) -> Gateway {
    Gateway::builder()
        .base_url(server.uri())
        .navigator(navigator)
        .build()
        .unwrap()
}

async fn mount_refresh(server: &MockServer, access: &str, delay: Duration, calls: u64) {
    Mock::given(method("POST"))
        .and(path("/auth/token/refresh/"))
        .and(body_json(json!({"refresh": "refresh-token"})))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"access": access}))
                .set_delay(delay),
        )
        .expect(calls)
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_concurrent_requests_share_one_refresh() {
    let server = MockServer::start().await;
    mount_refresh(&server, "new-token", Duration::from_millis(200), 1).await;

    for endpoint in ["/posts/", "/users/me/"] {
        Mock::given(method("GET"))
            .and(path(endpoint))
            .and(header("authorization", "Bearer new-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
            .expect(1)
            .mount(&server)
            .await;
    }

    let gateway = gateway(&server, quiet_navigator());
    gateway
        .establish_session(grant("old-token", expired()))
        .await
        .unwrap();

    let (posts, me) = tokio::join!(
        gateway.send(ApiRequest::get("posts/").with_auth(AuthPolicy::Always)),
        gateway.get::<Value>("users/me/"),
    );

    assert_eq!(posts.unwrap().status(), 200);
    assert_eq!(me.unwrap()["ok"], true);

    let credential = gateway.current_credential().unwrap();
    assert_eq!(credential.access_token, "new-token");
    // refresh token is kept when the server does not rotate it
    assert_eq!(credential.refresh_token, "refresh-token");
}

#[tokio::test]
async fn test_many_waiters_see_one_refresh_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/token/refresh/"))
        .respond_with(
            ResponseTemplate::new(401)
                .set_body_json(json!({"detail": "Token is invalid or expired"}))
                .set_delay(Duration::from_millis(100)),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/users/me/"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let gateway = gateway(&server, redirect_once());
    gateway
        .establish_session(grant("old-token", expired()))
        .await
        .unwrap();

    let calls = (0..5).map(|_| gateway.get::<Value>("users/me/"));
    let results = futures::future::join_all(calls).await;

    for result in results {
        assert!(matches!(result, Err(GatewayError::RefreshFailed(_))));
    }
    assert!(!gateway.is_logged_in());
}

#[tokio::test]
async fn test_protected_endpoint_without_credential_sends_nothing() {
    let server = MockServer::start().await;
    let gateway = gateway(&server, quiet_navigator());

    let result: Result<Value, _> = gateway
        .post("posts/create/", &json!({"title": "Draft"}))
        .await;

    assert!(matches!(result, Err(GatewayError::Unauthenticated)));
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_not_found_is_api_error_without_refresh() {
    let server = MockServer::start().await;
    mount_refresh(&server, "unused", Duration::ZERO, 0).await;
    Mock::given(method("GET"))
        .and(path("/users/7/profile/"))
        .and(header("authorization", "Bearer live-token"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({"detail": "Not found."})))
        .expect(1)
        .mount(&server)
        .await;

    let gateway = gateway(&server, quiet_navigator());
    gateway
        .establish_session(grant("live-token", valid()))
        .await
        .unwrap();

    let err = gateway.get::<Value>("users/7/profile/").await.unwrap_err();
    assert_eq!(err.status(), Some(404));
    assert!(matches!(err, GatewayError::ApiError { ref body, .. } if body.contains("Not found")));
    assert!(gateway.is_logged_in());
}

#[tokio::test]
async fn test_rejected_token_is_refreshed_and_retried() {
    let server = MockServer::start().await;
    mount_refresh(&server, "new-token", Duration::ZERO, 1).await;
    Mock::given(method("GET"))
        .and(path("/users/me/"))
        .and(header("authorization", "Bearer revoked-token"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/users/me/"))
        .and(header("authorization", "Bearer new-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"username": "ada"})))
        .expect(1)
        .mount(&server)
        .await;

    let gateway = gateway(&server, quiet_navigator());
    gateway
        .establish_session(grant("revoked-token", valid()))
        .await
        .unwrap();

    let me: Value = gateway.get("users/me/").await.unwrap();
    assert_eq!(me["username"], "ada");
    assert_eq!(
        gateway.current_credential().unwrap().access_token,
        "new-token"
    );
}

#[tokio::test]
async fn test_second_rejection_ends_session() {
    let server = MockServer::start().await;
    mount_refresh(&server, "new-token", Duration::ZERO, 1).await;
    Mock::given(method("GET"))
        .and(path("/users/me/"))
        .respond_with(ResponseTemplate::new(401))
        .expect(2)
        .mount(&server)
        .await;

    let gateway = gateway(&server, redirect_once());
    gateway
        .establish_session(grant("revoked-token", valid()))
        .await
        .unwrap();

    let result = gateway.get::<Value>("users/me/").await;
    assert!(matches!(result, Err(GatewayError::SessionExpired)));
    assert!(!gateway.is_logged_in());
}

#[tokio::test]
async fn test_failed_reactive_refresh_is_session_expired() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/token/refresh/"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/posts/3/"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;

    let gateway = gateway(&server, redirect_once());
    gateway
        .establish_session(grant("revoked-token", valid()))
        .await
        .unwrap();

    let result = gateway.delete("posts/3/").await;
    assert!(matches!(result, Err(GatewayError::SessionExpired)));
    assert!(gateway.current_credential().is_none());
}

#[tokio::test]
async fn test_public_request_ignores_401() {
    let server = MockServer::start().await;
    mount_refresh(&server, "unused", Duration::ZERO, 0).await;
    Mock::given(method("GET"))
        .and(path("/posts/"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;

    let gateway = gateway(&server, quiet_navigator());
    gateway
        .establish_session(grant("live-token", valid()))
        .await
        .unwrap();

    let err = gateway.get::<Value>("posts/").await.unwrap_err();
    assert_eq!(err.status(), Some(401));
    assert!(gateway.is_logged_in());

    let sent = server.received_requests().await.unwrap();
    assert!(sent[0].headers.get("authorization").is_none());
}

#[tokio::test]
async fn test_refresh_survives_cancelled_caller() {
    let server = MockServer::start().await;
    mount_refresh(&server, "new-token", Duration::from_millis(200), 1).await;
    Mock::given(method("GET"))
        .and(path("/users/me/"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let gateway = gateway(&server, quiet_navigator());
    gateway
        .establish_session(grant("old-token", expired()))
        .await
        .unwrap();

    let caller = {
        let gateway = gateway.clone();
        tokio::spawn(async move { gateway.get::<Value>("users/me/").await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    caller.abort();

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(
        gateway.current_credential().unwrap().access_token,
        "new-token"
    );
}

#[tokio::test]
async fn test_conditional_endpoint_follows_session() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/posts/5/upvote/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"upvotes": 1})))
        .expect(2)
        .mount(&server)
        .await;

    let gateway = gateway(&server, quiet_navigator());

    let anonymous: Value = gateway.post("posts/5/upvote/", &json!({})).await.unwrap();
    assert_eq!(anonymous["upvotes"], 1);

    gateway
        .establish_session(grant("live-token", valid()))
        .await
        .unwrap();
    let _: Value = gateway.post("posts/5/upvote/", &json!({})).await.unwrap();

    let sent = server.received_requests().await.unwrap();
    assert!(sent[0].headers.get("authorization").is_none());
    assert_eq!(
        sent[1].headers.get("authorization").unwrap(),
        "Bearer live-token"
    );
}

#[tokio::test]
async fn test_csrf_header_only_on_mutating_requests() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/posts/create/"))
        .and(header("x-csrftoken", "csrf-abc"))
        .and(header("content-type", "application/json"))
        .and(body_json(json!({"title": "Hello"})))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": 9})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/posts/9/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 9})))
        .expect(1)
        .mount(&server)
        .await;

    let gateway = Gateway::builder()
        .base_url(server.uri())
        .csrf_source(Arc::new(StaticCsrfToken::new("csrf-abc")))
        .navigator(quiet_navigator())
        .build()
        .unwrap();
    gateway
        .establish_session(grant("live-token", valid()))
        .await
        .unwrap();

    let created: Value = gateway
        .post("posts/create/", &json!({"title": "Hello"}))
        .await
        .unwrap();
    assert_eq!(created["id"], 9);

    let _: Value = gateway.get("posts/9/").await.unwrap();
    let sent = server.received_requests().await.unwrap();
    assert!(sent[1].headers.get("x-csrftoken").is_none());
}

#[tokio::test]
async fn test_csrf_token_read_from_cookie() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/auth/check-authentication/"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("set-cookie", "csrftoken=cookie-token; Path=/")
                .set_body_json(json!({"authenticated": false})),
        )
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/comments/4/upvote/"))
        .and(header("x-csrftoken", "cookie-token"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    // cookies are scoped to a host name
    let gateway = Gateway::builder()
        .base_url(format!("http://localhost:{}", server.address().port()))
        .navigator(quiet_navigator())
        .build()
        .unwrap();
    let _: Value = gateway.get("auth/check-authentication/").await.unwrap();

    let response = gateway
        .send(ApiRequest::post("comments/4/upvote/"))
        .await
        .unwrap();
    assert_eq!(response.status(), 204);
}

#[tokio::test]
async fn test_timeout_is_network_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/posts/"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
        .mount(&server)
        .await;

    let gateway = Gateway::builder()
        .base_url(server.uri())
        .timeout(Duration::from_millis(100))
        .navigator(quiet_navigator())
        .build()
        .unwrap();

    let result = gateway.get::<Value>("posts/").await;
    assert!(matches!(result, Err(GatewayError::Network(_))));
}

#[tokio::test]
async fn test_unreachable_server_is_network_error() {
    let server = MockServer::start().await;
    let uri = server.uri();
    drop(server);

    let gateway = Gateway::builder()
        .base_url(uri)
        .navigator(quiet_navigator())
        .build()
        .unwrap();
    let result = gateway.get::<Value>("tags/").await;
    assert!(matches!(result, Err(GatewayError::Network(_))));
}

#[tokio::test]
async fn test_malformed_body_is_decode_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/tags/"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
        .mount(&server)
        .await;

    let gateway = gateway(&server, quiet_navigator());
    let result = gateway.get::<Vec<String>>("tags/").await;
    assert!(matches!(result, Err(GatewayError::Decode(_))));
}

#[tokio::test]
async fn test_absolute_url_to_other_host_is_rejected() {
    let server = MockServer::start().await;
    let other = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&other)
        .await;

    let gateway = gateway(&server, quiet_navigator());
    gateway
        .establish_session(grant("secret-token", valid()))
        .await
        .unwrap();

    let result = gateway
        .send(ApiRequest::get(format!("{}/users/me/", other.uri())).with_auth(AuthPolicy::Always))
        .await;

    assert!(matches!(result, Err(GatewayError::InvalidRequest(_))));
    assert!(other.received_requests().await.unwrap().is_empty());
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_refresh_recovers_after_failed_task() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/token/refresh/"))
        .respond_with(ResponseTemplate::new(401))
        .expect(2)
        .mount(&server)
        .await;

    // the first redirect panics and takes the refresh task down with it
    let redirects = Arc::new(AtomicUsize::new(0));
    let navigator = {
        let redirects = redirects.clone();
        move |_: &str| {
            assert_ne!(redirects.fetch_add(1, Ordering::SeqCst), 0, "navigator unavailable");
        }
    };
    let gateway = gateway(&server, Arc::new(navigator));

    gateway
        .establish_session(grant("first-token", expired()))
        .await
        .unwrap();
    let first = gateway.get::<Value>("users/me/").await;
    assert!(matches!(first, Err(GatewayError::RefreshFailed(_))));
    assert!(!gateway.is_logged_in());

    gateway
        .establish_session(grant("second-token", expired()))
        .await
        .unwrap();
    let second = gateway.get::<Value>("users/me/").await;
    assert!(matches!(second, Err(GatewayError::RefreshFailed(_))));
    assert!(!gateway.is_logged_in());
    assert_eq!(redirects.load(Ordering::SeqCst), 2);
}
