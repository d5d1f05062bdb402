// Integration tests for the HTTP control API
//
// Requests are served in-process through the axum router with
// tower::ServiceExt::oneshot; no sockets are opened.

mod common;

use anyhow::Result;
use axum::body::{to_bytes, Body};
use axum::http::{Method, Request, StatusCode};
use common::Harness;
use podlive::{create_router, AppState, TeardownPolicy};
use serde_json::Value;
use tower::ServiceExt;

async fn call(h: &Harness, method: Method, uri: &str) -> Result<(StatusCode, Value)> {
    let app = create_router(AppState::new(h.manager.clone()));
    let response = app
        .oneshot(Request::builder().method(method).uri(uri).body(Body::empty())?)
        .await?;

    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await?;
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::String(
        String::from_utf8_lossy(&bytes).into_owned(),
    ));
    Ok((status, body))
}

#[tokio::test]
async fn test_health_check() -> Result<()> {
    let h = Harness::new(TeardownPolicy::WhenEnded)?;
    let (status, body) = call(&h, Method::GET, "/health").await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "OK");
    Ok(())
}

#[tokio::test]
async fn test_room_status_reports_presence() -> Result<()> {
    let h = Harness::new(TeardownPolicy::WhenEnded)?;
    let _host = h.join("host", "r1", true);
    let _guest = h.join("guest", "r1", false);
    let _other = h.join("solo", "r2", true);

    let (status, body) = call(&h, Method::GET, "/rooms/r1").await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["room_id"], "r1");
    assert_eq!(body["lifecycle"], "live");
    assert_eq!(body["presence"]["members"].as_array().unwrap().len(), 2);
    assert_eq!(body["events"]["session"], 2);
    assert!(body["recording"].is_null());

    let (status, body) = call(&h, Method::GET, "/rooms").await?;
    assert_eq!(status, StatusCode::OK);
    let ids: Vec<&str> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["room_id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec!["r1", "r2"]);

    let (status, body) = call(&h, Method::GET, "/rooms/nope").await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("nope"));
    Ok(())
}

#[tokio::test]
async fn test_end_live_tears_down_empty_room() -> Result<()> {
    let h = Harness::new(TeardownPolicy::WhenEnded)?;
    let _host = h.join("host", "r1", true);

    let (status, _) = call(&h, Method::PUT, "/rooms/r1/episode/ep5").await?;
    assert_eq!(status, StatusCode::OK);

    h.manager.disconnect("host", "r1");

    let (status, body) = call(&h, Method::POST, "/rooms/r1/end").await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["teardown"]["episode_id"], "ep5");
    assert!(body["teardown"]["logs"]["session"]
        .as_str()
        .unwrap()
        .contains("session_log_ep5_"));

    let (status, _) = call(&h, Method::POST, "/rooms/r1/end").await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn test_end_live_with_members_drains() -> Result<()> {
    let h = Harness::new(TeardownPolicy::WhenEnded)?;
    let mut guest = h.join("guest", "r1", false);

    let (status, body) = call(&h, Method::POST, "/rooms/r1/end").await?;
    assert_eq!(status, StatusCode::OK);
    assert!(body["teardown"].is_null());
    assert_eq!(guest.drain_kind("live-ended").len(), 1);

    let (_, body) = call(&h, Method::GET, "/rooms/r1").await?;
    assert_eq!(body["lifecycle"], "draining");
    Ok(())
}

#[tokio::test]
async fn test_snapshot_requires_active_recording() -> Result<()> {
    let h = Harness::new(TeardownPolicy::WhenEnded)?;
    let host = h.join("host", "r1", true);

    let (status, _) = call(&h, Method::POST, "/rooms/r1/recording/snapshot").await?;
    assert_eq!(status, StatusCode::CONFLICT);

    h.send(&host, r#"{"type":"start-recording","mimeType":"audio/webm"}"#).await;
    h.send(&host, r#"{"type":"audio-chunk","audio":"AAEC"}"#).await;

    let (status, body) = call(&h, Method::POST, "/rooms/r1/recording/snapshot").await?;
    assert_eq!(status, StatusCode::OK);
    assert!(body["path"].as_str().unwrap().contains("summary_room_r1_"));

    let (_, body) = call(&h, Method::GET, "/rooms/r1").await?;
    assert_eq!(body["recording"], "recording");
    Ok(())
}

#[tokio::test]
async fn test_episode_logs_are_readable_after_teardown() -> Result<()> {
    let h = Harness::new(TeardownPolicy::WhenEnded)?;

    let (status, _) = call(&h, Method::GET, "/episodes/ep9/logs/session").await?;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // First lifetime of the episode
    let host = h.join("host", "r1", true);
    h.manager.associate_episode("r1", "ep9");
    h.send(&host, r#"{"type":"chat-message","message":"first"}"#).await;
    h.manager.disconnect("host", "r1");
    h.manager.end_live_session("r1").unwrap().await?;

    // Second lifetime, same episode
    let host = h.join("host", "r2", true);
    h.manager.associate_episode("r2", "ep9");
    h.send(&host, r#"{"type":"chat-message","message":"second"}"#).await;
    h.manager.disconnect("host", "r2");
    h.manager.end_live_session("r2").unwrap().await?;

    let (status, body) = call(&h, Method::GET, "/episodes/ep9/logs/comments").await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["room_id"], "r2");
    assert_eq!(body["messages"][0]["message"], "second");

    let (status, body) = call(&h, Method::GET, "/episodes/ep9/logs/session").await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["episode_id"], "ep9");

    let (status, _) = call(&h, Method::GET, "/episodes/ep9/logs/speech").await?;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let chat_dir = &h.config.storage.chat_log_dir;
    assert_eq!(common::files_in(chat_dir).len(), 2);
    Ok(())
}
