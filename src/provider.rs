// SPDX-FileCopyrightText: © 2024 Matt Williams <matt.williams@bristol.ac.uk>
// SPDX-License-Identifier: MIT

//! Talking to a group's identity provider.

use std::future::Future;

use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

/// The most `groups` a userinfo document may list.
pub const MAX_GROUPS: usize = 6;

#[derive(Debug, Error)]
#[error("Could not reach the identity provider.")]
pub struct ProviderError(#[from] reqwest::Error);

#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("Could not decode userinfo document.")]
    Decode(#[from] serde_json::Error),
    #[error("Userinfo lists {count} groups, more than the {max} allowed.", max = MAX_GROUPS)]
    TooManyGroups { count: usize },
}

/// The status and body of a userinfo request.
#[derive(Clone, Debug)]
pub struct ProviderReply {
    pub status: StatusCode,
    pub body: String,
}

/// An OpenID Connect userinfo response.
#[derive(Clone, PartialEq, Debug, Deserialize)]
pub struct UserInfo {
    pub preferred_username: String,
    pub sub: Option<String>,
    pub name: Option<String>,
    pub given_name: Option<String>,
    pub family_name: Option<String>,
    pub picture: Option<String>,
    /// Providers disagree on whether this is a timestamp or a date string.
    pub updated_at: Option<serde_json::Value>,
    pub email: Option<String>,
    pub email_verified: Option<bool>,
    #[serde(default)]
    pub groups: Vec<String>,
    pub organisation_name: Option<String>,
}

impl UserInfo {
    pub fn from_json(body: &str) -> Result<Self, PayloadError> {
        let info: Self = serde_json::from_str(body)?;
        if info.groups.len() > MAX_GROUPS {
            return Err(PayloadError::TooManyGroups {
                count: info.groups.len(),
            });
        }
        Ok(info)
    }
}

/// Fetches userinfo for a bearer token.
pub trait IdentityProvider {
    /// Make exactly one request; callers do not retry.
    fn userinfo(
        &self,
        endpoint: &url::Url,
        token: &str,
    ) -> impl Future<Output = Result<ProviderReply, ProviderError>> + Send;
}

#[derive(Clone, Debug)]
pub struct HttpIdentityProvider {
    client: reqwest::Client,
}

impl HttpIdentityProvider {
    pub fn new() -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            // Only the validated endpoint may answer; a 3xx is a deny.
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self { client })
    }
}

impl IdentityProvider for HttpIdentityProvider {
    #[tracing::instrument(skip_all, fields(endpoint = %endpoint))]
    async fn userinfo(
        &self,
        endpoint: &url::Url,
        token: &str,
    ) -> Result<ProviderReply, ProviderError> {
        let response = self
            .client
            .get(endpoint.clone())
            .bearer_auth(token)
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;
        debug!(%status, bytes = body.len(), "Received userinfo response.");
        Ok(ProviderReply { status, body })
    }
}
