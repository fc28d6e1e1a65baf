mod common;

use anyhow::Result;
use axum::http::{Method, StatusCode};

#[tokio::test]
async fn health_reports_database_and_policy_state() -> Result<()> {
    let app = common::spawn().await?;

    let (status, body) = app.send(Method::GET, "/api/health", None, None).await?;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["db_ok"], true);
    assert_eq!(body["policy"]["generation"], 1);
    assert_eq!(body["policy"]["rules"], 12);
    assert_eq!(body["policy"]["assignments"], 1);
    assert_eq!(body["policy"]["last_change"]["kind"], "startup");
    assert!(body["policy"]["last_error"].is_null());

    Ok(())
}

#[tokio::test]
async fn health_needs_no_token_and_tracks_reloads() -> Result<()> {
    let app = common::spawn().await?;
    let admin = app.admin_token().await?;

    let (status, _) = app.send(Method::DELETE, "/api/v1/menus/12", Some(admin.as_str()), None).await?;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (_, body) = app.send(Method::GET, "/api/health", None, None).await?;
    assert_eq!(body["policy"]["generation"], 2);
    assert_eq!(body["policy"]["rules"], 11);
    assert_eq!(body["policy"]["last_change"]["kind"], "menu");
    assert_eq!(body["policy"]["last_change"]["id"], 12);

    Ok(())
}
