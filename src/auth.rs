// SPDX-FileCopyrightText: © 2024 Matt Williams <matt.williams@bristol.ac.uk>
// SPDX-License-Identifier: MIT

//! The authentication call site: verifying a login with an access token.
//!
//! An attempt resolves the login to an identity group, checks the endpoint
//! it resolved to against the group's own URL, asks for a token, and lets
//! the group's identity provider say whose token it is. Every failure is a
//! plain deny; the reason is only logged.

use std::path::Path;

use reqwest::StatusCode;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
    address::{Address, AddressError},
    config::{self, ConfigError},
    provider::{IdentityProvider, PayloadError, ProviderError, UserInfo},
    resolve::{LookupError, ResolveMode},
    store::Directory,
};

pub const CONFIG_ARG: &str = "pam_nss_conf=";
pub const TOKEN_PROMPT: &str = "Access token: ";
/// Conversation helpers answer with this when they could not get a token.
pub const REJECTED_MARKER: &str = "INCORRECT";

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum PromptStyle {
    EchoOn,
}

/// What a conversation gave back for one prompt.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum Answer {
    /// No response came back at all.
    Missing,
    /// A response came back without any text in it.
    Null,
    Text(String),
}

#[derive(Debug, Error)]
#[error("Conversation failed: {0}")]
pub struct ConversationError(pub String);

/// Asks the person logging in for input.
pub trait Conversation {
    fn prompt(&mut self, style: PromptStyle, message: &str) -> Result<Answer, ConversationError>;
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct AuthFlags {
    /// Deny an [`Answer::Null`] instead of sending it as an empty token.
    pub disallow_null_authtok: bool,
}

/// How far an attempt had got.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Stage {
    Start,
    ConfigReady,
    IdentityResolved,
    EndpointValidated,
    TokenCollected,
    RemoteVerified,
}

#[derive(Debug, Error)]
pub enum DenyReason {
    #[error("Expected exactly one `{arg}<path>` argument, got {0:?}.", arg = CONFIG_ARG)]
    BadArguments(Vec<String>),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("No user name was supplied.")]
    NoUser,
    #[error("Could not split login `{login}`.")]
    BadAddress {
        login: String,
        #[source]
        source: Option<AddressError>,
    },
    #[error(transparent)]
    UnknownIdentity(#[from] LookupError),
    #[error("Endpoint `{endpoint}` has no usable host.")]
    InvalidEndpoint { endpoint: String },
    #[error("Endpoint host `{resolved}` does not match group host `{canonical}`.")]
    EndpointMismatch { resolved: String, canonical: String },
    #[error(transparent)]
    Conversation(#[from] ConversationError),
    #[error("The token prompt got no response.")]
    NoResponse,
    #[error("No token was given.")]
    EmptyToken,
    #[error("The token prompt reported a failure.")]
    RejectedToken,
    #[error(transparent)]
    Transport(#[from] ProviderError),
    #[error("Identity provider answered {0}.")]
    RemoteStatus(StatusCode),
    #[error(transparent)]
    Payload(#[from] PayloadError),
    #[error("Token belongs to `{actual}`, not `{expected}`.")]
    IdentityMismatch { expected: String, actual: String },
}

impl DenyReason {
    /// The last stage the attempt completed before this failure.
    pub fn stage(&self) -> Stage {
        match self {
            Self::BadArguments(_) | Self::Config(_) => Stage::Start,
            Self::NoUser | Self::BadAddress { .. } | Self::UnknownIdentity(_) => {
                Stage::ConfigReady
            }
            Self::InvalidEndpoint { .. } | Self::EndpointMismatch { .. } => {
                Stage::IdentityResolved
            }
            Self::Conversation(_)
            | Self::NoResponse
            | Self::EmptyToken
            | Self::RejectedToken => Stage::EndpointValidated,
            Self::Transport(_)
            | Self::RemoteStatus(_)
            | Self::Payload(_)
            | Self::IdentityMismatch { .. } => Stage::TokenCollected,
        }
    }
}

#[derive(Debug)]
pub enum Outcome {
    Accept,
    Deny(DenyReason),
}

impl Outcome {
    pub fn is_accept(&self) -> bool {
        matches!(self, Self::Accept)
    }
}

impl From<Result<(), DenyReason>> for Outcome {
    fn from(result: Result<(), DenyReason>) -> Self {
        match result {
            Ok(()) => Self::Accept,
            Err(reason) => Self::Deny(reason),
        }
    }
}

/// A login resolved to the group that will verify it.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct ResolvedEndpoint {
    /// The login name without its group qualifier.
    pub username: String,
    pub group: String,
    pub endpoint: String,
}

fn host_of(endpoint: &str) -> Result<(url::Url, String), DenyReason> {
    let invalid = || DenyReason::InvalidEndpoint {
        endpoint: endpoint.to_string(),
    };
    let url = url::Url::parse(endpoint).map_err(|_| invalid())?;
    let host = url.host_str().ok_or_else(invalid)?.to_string();
    Ok((url, host))
}

/// One authentication attempt against an already loaded [`Directory`].
pub struct Handshake<'a, P> {
    directory: &'a Directory,
    provider: &'a P,
    flags: AuthFlags,
}

impl<'a, P: IdentityProvider> Handshake<'a, P> {
    pub fn new(directory: &'a Directory, provider: &'a P, flags: AuthFlags) -> Self {
        Self {
            directory,
            provider,
            flags,
        }
    }

    /// Find the group and endpoint for `login`.
    pub fn resolve(&self, login: &str) -> Result<ResolvedEndpoint, DenyReason> {
        let address = Address::parse(login).map_err(|e| DenyReason::BadAddress {
            login: login.to_string(),
            source: Some(e),
        })?;
        if address.username.is_empty() {
            return Err(DenyReason::BadAddress {
                login: login.to_string(),
                source: None,
            });
        }
        let store = &self.directory.store;
        let (group, endpoint) = match &address.location {
            Some(location) => {
                let group = store
                    .find_group(location)
                    .ok_or_else(|| LookupError::UnknownGroup(location.clone()))?;
                (group.name.as_str(), group.url.as_str())
            }
            None => {
                let found = store.resolve_unique(&address.username)?;
                (found.group.name.as_str(), found.value(ResolveMode::Endpoint))
            }
        };
        debug!(username = %address.username, group, endpoint, "Resolved login.");
        Ok(ResolvedEndpoint {
            username: address.username,
            group: group.to_string(),
            endpoint: endpoint.to_string(),
        })
    }

    /// Check that the endpoint points at the same host as its group record,
    /// looked up again by name.
    pub fn validate(&self, resolved: &ResolvedEndpoint) -> Result<url::Url, DenyReason> {
        let (endpoint, host) = host_of(&resolved.endpoint)?;
        let group = self
            .directory
            .store
            .find_group(&resolved.group)
            .ok_or_else(|| LookupError::UnknownGroup(resolved.group.clone()))?;
        let (_, canonical) = host_of(group.url.as_str())?;
        if host != canonical {
            return Err(DenyReason::EndpointMismatch {
                resolved: host,
                canonical,
            });
        }
        Ok(endpoint)
    }

    fn collect_token<C: Conversation>(&self, conversation: &mut C) -> Result<String, DenyReason> {
        debug!(prompt = TOKEN_PROMPT, "Prompting for token.");
        let token = match conversation.prompt(PromptStyle::EchoOn, TOKEN_PROMPT)? {
            Answer::Text(token) => token,
            Answer::Missing => return Err(DenyReason::NoResponse),
            Answer::Null if self.flags.disallow_null_authtok => {
                return Err(DenyReason::EmptyToken)
            }
            Answer::Null => String::new(),
        };
        if token.contains(REJECTED_MARKER) {
            return Err(DenyReason::RejectedToken);
        }
        Ok(token)
    }

    async fn verify(
        &self,
        endpoint: &url::Url,
        token: &str,
        username: &str,
    ) -> Result<(), DenyReason> {
        let reply = self.provider.userinfo(endpoint, token).await?;
        if !reply.status.is_success() {
            return Err(DenyReason::RemoteStatus(reply.status));
        }
        let info = UserInfo::from_json(&reply.body)?;
        debug!(
            preferred_username = %info.preferred_username,
            name = info.name.as_deref(),
            "Identity provider answered."
        );
        if info.preferred_username != username {
            return Err(DenyReason::IdentityMismatch {
                expected: username.to_string(),
                actual: info.preferred_username,
            });
        }
        Ok(())
    }

    /// Run the attempt from a resolved endpoint onwards.
    pub async fn run_resolved<C: Conversation>(
        &self,
        resolved: &ResolvedEndpoint,
        conversation: &mut C,
    ) -> Result<(), DenyReason> {
        let endpoint = self.validate(resolved)?;
        debug!(stage = ?Stage::EndpointValidated, %endpoint);
        let token = self.collect_token(conversation)?;
        debug!(stage = ?Stage::TokenCollected);
        self.verify(&endpoint, &token, &resolved.username).await?;
        debug!(stage = ?Stage::RemoteVerified);
        Ok(())
    }

    pub async fn run<C: Conversation>(
        &self,
        login: &str,
        conversation: &mut C,
    ) -> Result<(), DenyReason> {
        let resolved = self.resolve(login)?;
        debug!(stage = ?Stage::IdentityResolved);
        self.run_resolved(&resolved, conversation).await
    }
}

/// Read the config path out of the module arguments.
pub fn config_path(args: &[String]) -> Result<&str, DenyReason> {
    match args {
        [arg] => arg
            .strip_prefix(CONFIG_ARG)
            .filter(|path| !path.is_empty())
            .ok_or_else(|| DenyReason::BadArguments(args.to_vec())),
        _ => Err(DenyReason::BadArguments(args.to_vec())),
    }
}

/// The authentication entry point.
///
/// The configuration is parsed afresh for every attempt and dropped at the
/// end of it, whatever the outcome.
#[tracing::instrument(skip_all, fields(user = user))]
pub async fn authenticate<C, P>(
    args: &[String],
    user: Option<&str>,
    flags: AuthFlags,
    conversation: &mut C,
    provider: &P,
) -> Outcome
where
    C: Conversation,
    P: IdentityProvider,
{
    let outcome: Outcome = attempt(args, user, flags, conversation, provider)
        .await
        .into();
    match &outcome {
        Outcome::Accept => info!("Authentication succeeded."),
        Outcome::Deny(reason) => warn!(
            stage = ?reason.stage(),
            reason = %reason,
            "Authentication denied."
        ),
    }
    outcome
}

async fn attempt<C, P>(
    args: &[String],
    user: Option<&str>,
    flags: AuthFlags,
    conversation: &mut C,
    provider: &P,
) -> Result<(), DenyReason>
where
    C: Conversation,
    P: IdentityProvider,
{
    let path = config_path(args)?;
    let directory = config::parse(Path::new(path))?;
    debug!(stage = ?Stage::ConfigReady);
    let user = user.ok_or(DenyReason::NoUser)?;
    Handshake::new(&directory, provider, flags)
        .run(user, conversation)
        .await
}
