// SPDX-FileCopyrightText: © 2024 Matt Williams <matt.williams@bristol.ac.uk>
// SPDX-License-Identifier: MIT

//! End-to-end authentication against a local identity provider.

use std::net::SocketAddr;

use anyhow::{Context, Result};
use axum::{http::StatusCode, response::Redirect, routing::get, Json, Router};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};
use mapiam::{
    auth::{Answer, ConversationError, PromptStyle, CONFIG_ARG},
    AuthFlags, Conversation, DenyReason, HttpIdentityProvider, Outcome,
};
use serde_json::json;

async fn userinfo(
    TypedHeader(Authorization(bearer)): TypedHeader<Authorization<Bearer>>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    match bearer.token() {
        "alice-token" => Ok(Json(json!({
            "sub": "38bf61bb-d1db-45e6-a36d-670e63aed301",
            "name": "Alice Example",
            "preferred_username": "alice",
            "email": "alice@example.com",
            "email_verified": true,
            "groups": ["staff"],
        }))),
        "mallory-token" => Ok(Json(json!({ "preferred_username": "mallory" }))),
        _ => Err(StatusCode::UNAUTHORIZED),
    }
}

async fn identity_provider() -> Result<SocketAddr> {
    serve(Router::new().route("/userinfo", get(userinfo))).await
}

async fn serve(app: Router) -> Result<SocketAddr> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move { axum::serve(listener, app).await });
    Ok(addr)
}

/// Answers the token prompt with a fixed token.
struct Token(&'static str);

impl Conversation for Token {
    fn prompt(
        &mut self,
        _style: PromptStyle,
        _message: &str,
    ) -> Result<Answer, ConversationError> {
        Ok(Answer::Text(self.0.to_string()))
    }
}

/// Never answers the token prompt.
struct Silent;

impl Conversation for Silent {
    fn prompt(
        &mut self,
        _style: PromptStyle,
        _message: &str,
    ) -> Result<Answer, ConversationError> {
        Ok(Answer::Missing)
    }
}

struct Fixture {
    _dir: tempfile::TempDir,
    args: Vec<String>,
}

fn write_config(url: &str) -> Result<Fixture> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("pam_nss.conf");
    std::fs::write(
        &path,
        format!(
            r#"
debug = 2

[[mappings]]
name = "corp"
url = "{url}"
users = [{{ from = "alice", to = "a1" }}]
"#
        ),
    )
    .context("Could not write config.")?;
    Ok(Fixture {
        args: vec![format!("{CONFIG_ARG}{}", path.display())],
        _dir: dir,
    })
}

async fn login(fixture: &Fixture, user: &str, token: &'static str) -> Result<Outcome> {
    let provider = HttpIdentityProvider::new()?;
    Ok(mapiam::authenticate(
        &fixture.args,
        Some(user),
        AuthFlags::default(),
        &mut Token(token),
        &provider,
    )
    .await)
}

#[tokio::test]
async fn valid_token_is_accepted() -> Result<()> {
    let addr = identity_provider().await?;
    let fixture = write_config(&format!("http://{addr}/userinfo"))?;

    assert!(login(&fixture, "alice", "alice-token").await?.is_accept());
    assert!(login(&fixture, "alice@corp", "alice-token")
        .await?
        .is_accept());
    Ok(())
}

#[tokio::test]
async fn token_for_someone_else_is_denied() -> Result<()> {
    let addr = identity_provider().await?;
    let fixture = write_config(&format!("http://{addr}/userinfo"))?;

    let outcome = login(&fixture, "alice", "mallory-token").await?;
    assert!(matches!(
        outcome,
        Outcome::Deny(DenyReason::IdentityMismatch { .. })
    ));
    Ok(())
}

#[tokio::test]
async fn rejected_token_is_denied() -> Result<()> {
    let addr = identity_provider().await?;
    let fixture = write_config(&format!("http://{addr}/userinfo"))?;

    let outcome = login(&fixture, "alice", "forged-token").await?;
    assert!(matches!(
        outcome,
        Outcome::Deny(DenyReason::RemoteStatus(status)) if status == StatusCode::UNAUTHORIZED
    ));
    Ok(())
}

#[tokio::test]
async fn unreachable_provider_is_denied() -> Result<()> {
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
        listener.local_addr()?.port()
    };
    let fixture = write_config(&format!("http://127.0.0.1:{port}/userinfo"))?;

    let outcome = login(&fixture, "alice", "alice-token").await?;
    assert!(matches!(outcome, Outcome::Deny(DenyReason::Transport(_))));
    Ok(())
}

#[tokio::test]
async fn unmapped_user_is_denied() -> Result<()> {
    let addr = identity_provider().await?;
    let fixture = write_config(&format!("http://{addr}/userinfo"))?;

    let outcome = login(&fixture, "mallory", "mallory-token").await?;
    assert!(matches!(
        outcome,
        Outcome::Deny(DenyReason::UnknownIdentity(_))
    ));
    Ok(())
}

#[tokio::test]
async fn redirect_is_not_followed() -> Result<()> {
    // Answers for anyone, without looking at the token.
    let elsewhere = serve(Router::new().route(
        "/elsewhere",
        get(|| async { Json(json!({ "preferred_username": "alice" })) }),
    ))
    .await?;
    let target = format!("http://{elsewhere}/elsewhere");
    let addr = serve(Router::new().route(
        "/userinfo",
        get(move || async move { Redirect::temporary(&target) }),
    ))
    .await?;
    let fixture = write_config(&format!("http://{addr}/userinfo"))?;

    let outcome = login(&fixture, "alice", "alice-token").await?;
    assert!(matches!(
        outcome,
        Outcome::Deny(DenyReason::RemoteStatus(status)) if status.is_redirection()
    ));
    Ok(())
}

#[tokio::test]
async fn missing_response_is_denied() -> Result<()> {
    let addr = identity_provider().await?;
    let fixture = write_config(&format!("http://{addr}/userinfo"))?;
    let provider = HttpIdentityProvider::new()?;

    let outcome = mapiam::authenticate(
        &fixture.args,
        Some("alice"),
        AuthFlags::default(),
        &mut Silent,
        &provider,
    )
    .await;
    assert!(matches!(outcome, Outcome::Deny(DenyReason::NoResponse)));
    Ok(())
}
