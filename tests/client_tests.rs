use std::{collections::HashMap, sync::Arc, time::Duration};

use anyhow::Result;
use chrono::Utc;
use notification_orchestrator::{
    clients::{
        build_http_client,
        circuit_breaker::CircuitBreaker,
        template::{HttpTemplateClient, TEMPLATE_SERVICE, TemplateClient},
        user::{HttpUserClient, USER_SERVICE, UserPreferencesClient},
    },
    context::RequestContext,
    error::{ClientError, ErrorKind},
    models::circuit_breaker::{CircuitBreakerConfig, CircuitState},
};
use serde_json::json;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{body_partial_json, method, path, query_param},
};

use crate::common::fast_retry;

fn breaker(service: &str, max_failures: u32) -> Arc<CircuitBreaker> {
    Arc::new(CircuitBreaker::new(
        service,
        CircuitBreakerConfig {
            max_failures,
            timeout: Duration::from_secs(60),
            half_open_max: 1,
        },
    ))
}

fn user_client(server: &MockServer, attempts: u32, breaker: Arc<CircuitBreaker>) -> HttpUserClient {
    HttpUserClient::new(
        build_http_client(Duration::from_secs(2)).expect("http client"),
        &server.uri(),
        fast_retry(attempts),
        breaker,
    )
}

fn template_client(server: &MockServer, attempts: u32) -> HttpTemplateClient {
    HttpTemplateClient::new(
        build_http_client(Duration::from_secs(2)).expect("http client"),
        &server.uri(),
        fast_retry(attempts),
        breaker(TEMPLATE_SERVICE, 5),
    )
}

fn ctx() -> RequestContext {
    RequestContext::new(Duration::from_secs(5))
}

/// Test: Preferences are decoded with defaults for omitted fields
#[tokio::test]
async fn test_get_preferences_decodes_response() -> Result<()> {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/v1/users/u1/preferences"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "user_id": "u1",
            "email_enabled": true,
            "push_enabled": false,
            "email": "u1@example.com",
            "language": "fr"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = user_client(&server, 3, breaker(USER_SERVICE, 5));
    let prefs = client.get_preferences(&ctx(), "u1").await?;

    assert!(prefs.email_enabled);
    assert!(!prefs.push_enabled);
    assert!(prefs.email_verified);
    assert!(prefs.notification_enabled);
    assert_eq!(prefs.language.as_deref(), Some("fr"));

    Ok(())
}

/// Test: 5xx responses are retried until the service recovers
#[tokio::test]
async fn test_server_errors_are_retried() -> Result<()> {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/v1/users/u2/preferences"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/v1/users/u2/preferences"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "email_enabled": true,
            "push_enabled": true
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = user_client(&server, 3, breaker(USER_SERVICE, 5));
    let prefs = client.get_preferences(&ctx(), "u2").await?;

    assert!(prefs.push_enabled);

    Ok(())
}

/// Test: 404 is not retried
#[tokio::test]
async fn test_not_found_is_not_retried() -> Result<()> {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/v1/users/ghost/preferences"))
        .respond_with(ResponseTemplate::new(404).set_body_string("user not found"))
        .expect(1)
        .mount(&server)
        .await;

    let client = user_client(&server, 3, breaker(USER_SERVICE, 5));
    let err = client.get_preferences(&ctx(), "ghost").await.unwrap_err();

    assert!(matches!(err, ClientError::Status { status: 404, .. }));
    assert_eq!(err.kind(), ErrorKind::DependencyRejected);

    Ok(())
}

/// Test: Repeated failures open the breaker and later calls never reach the service
#[tokio::test]
async fn test_breaker_opens_and_short_circuits() -> Result<()> {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/v1/users/u3/preferences"))
        .respond_with(ResponseTemplate::new(500))
        .expect(2)
        .mount(&server)
        .await;

    let user_breaker = breaker(USER_SERVICE, 2);
    let client = user_client(&server, 1, Arc::clone(&user_breaker));

    for _ in 0..2 {
        let err = client.get_preferences(&ctx(), "u3").await.unwrap_err();
        assert!(matches!(err, ClientError::Status { status: 500, .. }));
    }
    assert_eq!(user_breaker.state(), CircuitState::Open);

    let err = client.get_preferences(&ctx(), "u3").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CircuitOpen);
    assert!(err.to_string().contains("temporarily unavailable"));

    Ok(())
}

/// Test: Render posts the expected body and decodes the rendered content
#[tokio::test]
async fn test_render_template_request_shape() -> Result<()> {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/v1/templates/welcome_email/render"))
        .and(body_partial_json(json!({
            "language": "en",
            "version": "latest",
            "preview_mode": false,
            "variables": { "name": "John Doe" }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "template_id": "welcome_email",
            "language": "en",
            "version": "2.3.0",
            "rendered": {
                "subject": "Welcome, John Doe!",
                "body": { "html": "<h1>Welcome John Doe!</h1>", "text": "Welcome John Doe!" }
            },
            "rendered_at": Utc::now(),
            "variables_used": ["name"]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = template_client(&server, 3);
    let variables = HashMap::from([("name".to_string(), json!("John Doe"))]);

    let rendered = client
        .render_template(&ctx(), "welcome_email", "en", &variables)
        .await?;

    assert_eq!(rendered.version, "2.3.0");
    assert_eq!(rendered.rendered.subject.as_deref(), Some("Welcome, John Doe!"));
    assert_eq!(rendered.rendered.body.text, "Welcome John Doe!");
    assert_eq!(rendered.variables_used, vec!["name".to_string()]);

    Ok(())
}

/// Test: 422 from render is not retried
#[tokio::test]
async fn test_render_validation_error_is_not_retried() -> Result<()> {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/v1/templates/welcome_email/render"))
        .respond_with(ResponseTemplate::new(422).set_body_string("missing required variable: name"))
        .expect(1)
        .mount(&server)
        .await;

    let client = template_client(&server, 3);
    let err = client
        .render_template(&ctx(), "welcome_email", "en", &HashMap::new())
        .await
        .unwrap_err();

    assert!(matches!(err, ClientError::Status { status: 422, .. }));

    Ok(())
}

/// Test: Template definitions are fetched by language
#[tokio::test]
async fn test_get_template_passes_language() -> Result<()> {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/v1/templates/password_reset"))
        .and(query_param("language", "de"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "template_id": "password_reset",
            "name": "Password Reset",
            "language": "de",
            "subject": "Passwort zurücksetzen",
            "body": { "text": "{{reset_url}}" },
            "variables": [{ "name": "reset_url", "required": true }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = template_client(&server, 1);
    let template = client.get_template(&ctx(), "password_reset", "de").await?;

    assert_eq!(template.language, "de");
    assert_eq!(template.variables.len(), 1);
    assert!(template.variables[0].required);
    assert_eq!(template.body.html, None);

    Ok(())
}

/// Test: Last notification time is reported with a PUT
#[tokio::test]
async fn test_record_notification_sent() -> Result<()> {
    let server = MockServer::start().await;

    Mock::given(method("PUT"))
        .and(path("/api/v1/users/u1/last-notification"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let client = user_client(&server, 1, breaker(USER_SERVICE, 5));
    client
        .record_notification_sent(&ctx(), "u1", Utc::now())
        .await?;

    Ok(())
}

/// Test: Failed last-notification updates never trip the preferences breaker
#[tokio::test]
async fn test_tracking_failures_do_not_open_preferences_breaker() -> Result<()> {
    let server = MockServer::start().await;

    Mock::given(method("PUT"))
        .and(path("/api/v1/users/u4/last-notification"))
        .respond_with(ResponseTemplate::new(404))
        .expect(3)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/v1/users/u4/preferences"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "email_enabled": true,
            "push_enabled": true
        })))
        .expect(1)
        .mount(&server)
        .await;

    let user_breaker = breaker(USER_SERVICE, 2);
    let client = user_client(&server, 1, Arc::clone(&user_breaker));

    for _ in 0..3 {
        let err = client
            .record_notification_sent(&ctx(), "u4", Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Status { status: 404, .. }));
    }

    assert_eq!(user_breaker.state(), CircuitState::Closed);
    assert_eq!(user_breaker.snapshot().consecutive_failures, 0);

    let prefs = client.get_preferences(&ctx(), "u4").await?;
    assert!(prefs.email_enabled);

    Ok(())
}

/// Test: Each dependency has its own breaker; an open user-service breaker
/// leaves template rendering untouched
#[tokio::test]
async fn test_breakers_are_isolated_per_dependency() -> Result<()> {
    let user_server = MockServer::start().await;
    let template_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/v1/users/u5/preferences"))
        .respond_with(ResponseTemplate::new(503))
        .expect(2)
        .mount(&user_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/api/v1/templates/push_notification/render"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "template_id": "push_notification",
            "language": "en",
            "version": "1.0.0",
            "rendered": { "body": { "text": "Hello" } },
            "rendered_at": Utc::now(),
            "variables_used": []
        })))
        .expect(1)
        .mount(&template_server)
        .await;

    let user_breaker = breaker(USER_SERVICE, 2);
    let template_breaker = breaker(TEMPLATE_SERVICE, 2);

    let users = user_client(&user_server, 1, Arc::clone(&user_breaker));
    let templates = HttpTemplateClient::new(
        build_http_client(Duration::from_secs(2)).expect("http client"),
        &template_server.uri(),
        fast_retry(1),
        Arc::clone(&template_breaker),
    );

    for _ in 0..2 {
        users.get_preferences(&ctx(), "u5").await.unwrap_err();
    }
    let err = users.get_preferences(&ctx(), "u5").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CircuitOpen);

    assert_eq!(user_breaker.state(), CircuitState::Open);
    assert_eq!(template_breaker.state(), CircuitState::Closed);

    let rendered = templates
        .render_template(&ctx(), "push_notification", "en", &HashMap::new())
        .await?;
    assert_eq!(rendered.rendered.body.text, "Hello");
    assert_eq!(template_breaker.state(), CircuitState::Closed);

    Ok(())
}
