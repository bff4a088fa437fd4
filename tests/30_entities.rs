mod common;

use anyhow::Result;
use reqwest::StatusCode;
use serde_json::{json, Value};

use common::{create_clinic, unique_clinic};

#[tokio::test]
async fn appointment_crud_is_tenant_scoped() -> Result<()> {
    let server = common::ensure_server().await?;
    let client = reqwest::Client::new();
    let alpha = create_clinic(server, &unique_clinic("Alpha Clinic")).await?;
    let beta = create_clinic(server, &unique_clinic("Beta Clinic")).await?;

    let res = client
        .post(server.url("/api/entities/appointments"))
        .bearer_auth(&alpha.token)
        .json(&json!({ "status": "scheduled", "reason": "checkup", "id": "ignored" }))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::CREATED);
    let created: Value = res.json().await?;
    let id = created["data"]["id"].as_str().unwrap().to_string();
    assert_ne!(id, "ignored");
    assert!(created["data"]["created_at"].is_string());

    // Visible to the owning clinic, with equality filters
    let res = client
        .get(server.url("/api/entities/appointments?status=scheduled"))
        .bearer_auth(&alpha.token)
        .send()
        .await?;
    let body: Value = res.json().await?;
    assert_eq!(body["data"].as_array().map(Vec::len), Some(1));

    // Invisible to every other clinic
    let res = client
        .get(server.url("/api/entities/appointments"))
        .bearer_auth(&beta.token)
        .send()
        .await?;
    let body: Value = res.json().await?;
    assert_eq!(body["data"].as_array().map(Vec::len), Some(0));

    let res = client
        .get(server.url(&format!("/api/entities/appointments/{}", id)))
        .bearer_auth(&beta.token)
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    // Update and delete
    let res = client
        .patch(server.url(&format!("/api/entities/appointments/{}", id)))
        .bearer_auth(&alpha.token)
        .json(&json!({ "status": "completed" }))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await?;
    assert_eq!(body["data"]["status"], "completed");
    assert_eq!(body["data"]["reason"], "checkup");

    let res = client
        .delete(server.url(&format!("/api/entities/appointments/{}", id)))
        .bearer_auth(&alpha.token)
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::NO_CONTENT);

    let res = client
        .get(server.url(&format!("/api/entities/appointments/{}", id)))
        .bearer_auth(&alpha.token)
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    // Every mutation left an audit entry
    let res = client
        .get(server.url("/api/entities/activity_logs?entity=Appointment"))
        .bearer_auth(&alpha.token)
        .send()
        .await?;
    let body: Value = res.json().await?;
    let mut actions: Vec<String> = body["data"]
        .as_array()
        .cloned()
        .unwrap_or_default()
        .iter()
        .filter_map(|entry| entry["action"].as_str().map(str::to_string))
        .collect();
    actions.sort();
    assert_eq!(actions, vec!["create", "delete", "update"]);
    Ok(())
}

#[tokio::test]
async fn users_are_read_only_and_redacted() -> Result<()> {
    let server = common::ensure_server().await?;
    let client = reqwest::Client::new();
    let clinic = create_clinic(server, &unique_clinic("Redacted")).await?;

    let res = client
        .get(server.url("/api/entities/users"))
        .bearer_auth(&clinic.token)
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await?;
    let users = body["data"].as_array().cloned().unwrap_or_default();
    assert_eq!(users.len(), 1);
    assert!(users[0].get("password_hash").is_none());
    assert!(users[0].get("verification_code").is_none());

    let res = client
        .post(server.url("/api/entities/users"))
        .bearer_auth(&clinic.token)
        .json(&json!({ "email": "sneaky@x.test", "role": "admin", "password_hash": "x" }))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
    Ok(())
}

#[tokio::test]
async fn rejects_unknown_entities_and_bad_input() -> Result<()> {
    let server = common::ensure_server().await?;
    let client = reqwest::Client::new();
    let clinic = create_clinic(server, &unique_clinic("Strict")).await?;

    let res = client
        .get(server.url("/api/entities/spaceships"))
        .bearer_auth(&clinic.token)
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    let res = client
        .get(server.url("/api/entities/invoices/not-a-uuid"))
        .bearer_auth(&clinic.token)
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let res = client
        .post(server.url("/api/entities/invoices"))
        .bearer_auth(&clinic.token)
        .json(&json!(["not", "an", "object"]))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let res = client
        .get(server.url("/api/entities/invoices"))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    Ok(())
}
