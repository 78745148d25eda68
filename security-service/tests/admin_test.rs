mod common;

use axum::http::StatusCode;
use common::{body_json, get, post_json, settle, TestApp};
use security_service::{
    clock::Clock,
    models::{EncryptionKey, Identity, Role},
    scheduler,
    services::ClientInfo,
    store::{EncryptedRecordStore, KeyStore},
};
use serde_json::json;
use uuid::Uuid;

#[tokio::test]
async fn security_administration_is_admin_only() {
    let app = TestApp::new();
    let builder = app.login(Identity::new("builder-1").with_role(Role::Builder));

    for request in [
        get("/security/alerts", Some(&builder)),
        get("/security/keys", Some(&builder)),
        post_json("/security/keys/rotate", Some(&builder), json!({})),
        post_json("/security/monitoring/run", Some(&builder), json!({})),
    ] {
        assert_eq!(app.send(request).await.status(), StatusCode::FORBIDDEN);
    }
}

#[tokio::test]
async fn rotation_re_encrypts_existing_records() {
    let app = TestApp::new();
    let admin = app.admin();

    let response = app
        .send(post_json("/security/keys/rotate", Some(&admin), json!({})))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["newVersion"], 1);
    assert_eq!(body["success"], true);

    let mut ids = Vec::new();
    for i in 0..3 {
        let record = app
            .state
            .encrypted_fields
            .store_field("owner-1", "phone", &format!("+1-555-010{}", i))
            .await
            .unwrap();
        assert_eq!(record.key_version, 1);
        ids.push(record.id);
    }

    let body = body_json(
        app.send(post_json("/security/keys/rotate", Some(&admin), json!({})))
            .await,
    )
    .await;
    assert_eq!(body["oldVersion"], 1);
    assert_eq!(body["newVersion"], 2);
    assert_eq!(body["recordsReEncrypted"], 3);
    assert_eq!(body["success"], true);

    for (i, id) in ids.iter().enumerate() {
        assert_eq!(
            app.state.encrypted_fields.read_field(*id).await.unwrap(),
            format!("+1-555-010{}", i)
        );
    }

    let keys = body_json(app.send(get("/security/keys", Some(&admin))).await).await;
    let keys = keys.as_array().unwrap();
    assert_eq!(keys.len(), 2);
    assert_eq!(keys.iter().filter(|k| k["isActive"] == true).count(), 1);
    assert!(keys.iter().all(|k| k.get("key").is_none()));

    settle().await;
    let rotations: Vec<_> = app
        .store
        .audit_entries()
        .into_iter()
        .filter(|e| e.action == "key_rotation")
        .collect();
    assert_eq!(rotations.len(), 2);
    assert!(rotations
        .iter()
        .any(|e| e.resource_id.as_deref() == Some("v2")));
}

#[tokio::test]
async fn monitoring_raises_and_mails_alerts_that_can_be_acknowledged() {
    let app = TestApp::new();
    let admin = app.admin();

    let client = ClientInfo {
        ip_address: Some("192.0.2.66".to_string()),
        user_agent: Some("curl/8".to_string()),
    };
    for i in 0..20 {
        app.state
            .login_security
            .log_login_attempt(&format!("target{}@example.com", i), None, false, &client, None)
            .await;
    }

    let response = app
        .send(post_json("/security/monitoring/run", Some(&admin), json!({})))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let report = body_json(response).await;
    assert_eq!(report["alertsRaised"], 1);
    assert!(report["errors"].as_array().unwrap().is_empty());

    settle().await;
    let sent = app.email.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, "security@example.com");
    assert!(sent[0].subject.starts_with("[CRITICAL]"));
    assert!(sent[0].html.contains("192.0.2.66"));

    let listing = body_json(app.send(get("/security/alerts", Some(&admin))).await).await;
    assert_eq!(listing["count"], 1);
    let alert = &listing["alerts"][0];
    assert_eq!(alert["type"], "brute_force_attack");
    assert_eq!(alert["severity"], "critical");
    let id = alert["id"].as_str().unwrap().to_string();

    let response = app
        .send(post_json(
            &format!("/security/alerts/{}/acknowledge", id),
            Some(&admin),
            json!({}),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let open = body_json(
        app.send(get(
            "/security/alerts?unacknowledgedOnly=true",
            Some(&admin),
        ))
        .await,
    )
    .await;
    assert_eq!(open["count"], 0);

    settle().await;
    let acknowledged = app
        .store
        .audit_entries()
        .into_iter()
        .find(|e| e.action == "alert_acknowledged")
        .unwrap();
    assert_eq!(acknowledged.resource_id.as_deref(), Some(id.as_str()));
}

#[tokio::test]
async fn unknown_alert_and_bad_limits_are_client_errors() {
    let app = TestApp::new();
    let admin = app.admin();

    let response = app
        .send(post_json(
            &format!("/security/alerts/{}/acknowledge", Uuid::new_v4()),
            Some(&admin),
            json!({}),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app
        .send(get("/security/alerts?limit=0", Some(&admin)))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .send(post_json(
            "/security/alerts/not-a-uuid/acknowledge",
            Some(&admin),
            json!({}),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn idle_rotation_ticks_retry_records_left_on_older_keys() {
    let app = TestApp::new();
    scheduler::key_rotation_tick(&app.state).await;

    let record = app
        .state
        .encrypted_fields
        .store_field("owner-2", "email", "owner@example.com")
        .await
        .unwrap();
    assert_eq!(record.key_version, 1);

    // a rotation whose re-encryption never reached this record
    let now = app.clock.now();
    app.store
        .activate_new_key(
            1,
            &EncryptionKey {
                version: 2,
                key: secrecy::SecretString::new("second-key-material".to_string()),
                is_active: true,
                created_at: now,
                deactivated_at: None,
            },
            now,
        )
        .await
        .unwrap();

    for _ in 0..2 {
        scheduler::key_rotation_tick(&app.state).await;
    }

    let stored = app
        .store
        .find_encrypted_record(record.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.key_version, 2);
    assert_eq!(
        app.state.encrypted_fields.read_field(record.id).await.unwrap(),
        "owner@example.com"
    );
}
