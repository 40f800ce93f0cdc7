// SPDX-FileCopyrightText: © 2024 Matt Williams <matt.williams@bristol.ac.uk>
// SPDX-License-Identifier: MIT

//! Federated identity mapping for SSH logins.
//!
//! A TOML file describes identity groups, each with the URL of its identity
//! provider and a list of external login names mapped onto local accounts.
//! Two call sites read it: [`nss::NameService`] synthesizes local accounts
//! for mapped names, and [`auth::authenticate`] checks a one-time access
//! token against the identity provider of the group a login belongs to.

// Used by the `mapiam` binary.
use anyhow as _;
use clap as _;
use tokio as _;

pub mod account;
pub mod address;
pub mod auth;
pub mod config;
pub mod logging;
pub mod nss;
pub mod provider;
pub mod resolve;
pub mod store;

pub use crate::address::Address;
pub use crate::auth::{
    authenticate, Answer, AuthFlags, Conversation, DenyReason, Handshake, Outcome,
};
pub use crate::config::{ConfigError, ConfigLoader, Load, Verbosity, DEFAULT_CONFIG_PATH};
pub use crate::nss::{NameService, NssStatus};
pub use crate::provider::{HttpIdentityProvider, IdentityProvider, UserInfo};
pub use crate::resolve::{LookupError, Resolution, ResolveMode};
pub use crate::store::{Directory, ExclusionList, IdentityGroup, MappingStore, UserMapping};
