// SPDX-FileCopyrightText: © 2024 Matt Williams <matt.williams@bristol.ac.uk>
// SPDX-License-Identifier: MIT

//! Reading the mapping configuration and noticing when it changes.
//!
//! ```toml
//! debug = 1
//! excluded_users = ["root"]
//!
//! [[mappings]]
//! name = "corp"
//! url = "https://idp.example/corp/userinfo"
//! users = [{ from = "alice", to = "a1" }]
//! ```

use std::{
    os::unix::fs::MetadataExt as _,
    path::{Path, PathBuf},
};

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
    logging::LogFormat,
    store::{Directory, ExclusionList, IdentityGroup, MappingStore, UserMapping},
};

pub const DEFAULT_CONFIG_PATH: &str = "/etc/pam_nss.conf";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Could not read config file `{}`.", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: config::ConfigError,
    },
    #[error("Config file `{}` has no `mappings` section.", .path.display())]
    NoMappings { path: PathBuf },
}

/// How much diagnostic logging the configuration asks for.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug, Default)]
pub struct Verbosity(u8);

impl Verbosity {
    pub fn from_level(level: i64) -> Self {
        Self(level.clamp(0, i64::from(u8::MAX)) as u8)
    }

    pub fn level(&self) -> u8 {
        self.0
    }

    /// An `EnvFilter` directive for this level.
    pub fn directive(&self) -> String {
        let level = match self.0 {
            0 => return "warn".to_string(),
            1 => "info",
            2 => "debug",
            _ => "trace",
        };
        format!("warn,{}={level}", env!("CARGO_CRATE_NAME"))
    }
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(default)]
    debug: i64,
    #[serde(default)]
    excluded_users: Vec<String>,
    mappings: Option<Vec<RawGroup>>,
}

#[derive(Debug, Deserialize)]
struct RawGroup {
    name: Option<String>,
    url: Option<String>,
    users: Option<Vec<RawMapping>>,
}

#[derive(Debug, Deserialize)]
struct RawMapping {
    from: Option<String>,
    to: Option<String>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

impl RawGroup {
    /// Turn a `[[mappings]]` section into a group, or `None` if it is unusable.
    fn validate(self, index: usize) -> Option<IdentityGroup> {
        let (Some(name), Some(url), Some(users)) = (
            non_empty(self.name),
            non_empty(self.url),
            self.users.filter(|u| !u.is_empty()),
        ) else {
            warn!(index, "Skipping mapping section without name, url or users.");
            return None;
        };
        let url = match url::Url::parse(&url) {
            Ok(url) if url.host_str().is_some() => url,
            Ok(_) => {
                warn!(group = %name, %url, "Skipping mapping section whose URL has no host.");
                return None;
            }
            Err(e) => {
                warn!(group = %name, %url, error = %e, "Skipping mapping section with invalid URL.");
                return None;
            }
        };
        let mappings: Vec<UserMapping> = users
            .into_iter()
            .filter_map(|user| match (non_empty(user.from), non_empty(user.to)) {
                (Some(from), Some(to)) => Some(UserMapping { from, to }),
                _ => {
                    warn!(group = %name, "Skipping user entry without from or to.");
                    None
                }
            })
            .collect();
        debug!(group = %name, users = mappings.len(), "Read mapping section.");
        Some(IdentityGroup::new(name, url, mappings))
    }
}

fn read_raw<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, config::ConfigError> {
    config::Config::builder()
        .add_source(config::File::from(path).format(config::FileFormat::Toml))
        .build()?
        .try_deserialize()
}

/// Parse the configuration file into a fresh [`Directory`].
pub fn parse(path: &Path) -> Result<Directory, ConfigError> {
    let raw: RawConfig = read_raw(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let verbosity = Verbosity::from_level(raw.debug);
    let mappings = raw.mappings.ok_or_else(|| ConfigError::NoMappings {
        path: path.to_path_buf(),
    })?;
    let store: MappingStore = mappings
        .into_iter()
        .enumerate()
        .filter_map(|(index, group)| group.validate(index))
        .collect();
    let excluded: ExclusionList = raw.excluded_users.into_iter().collect();
    info!(
        path = %path.display(),
        groups = store.len(),
        excluded = excluded.len(),
        "Parsed mapping configuration."
    );
    Ok(Directory {
        store,
        excluded,
        verbosity,
    })
}

/// Logging settings, read on their own so they can be applied before
/// anything else is logged.
#[derive(Debug, Default, Deserialize)]
pub struct LogSettings {
    #[serde(default)]
    pub debug: i64,
    #[serde(default)]
    pub log_format: LogFormat,
}

impl LogSettings {
    /// Falls back to the defaults if the file cannot be read; the loader
    /// reports that error properly later.
    pub fn read(path: &Path) -> Self {
        read_raw(path).unwrap_or_default()
    }

    pub fn verbosity(&self) -> Verbosity {
        Verbosity::from_level(self.debug)
    }
}

/// The parts of a file's metadata that change whenever it is replaced or
/// edited.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct FileIdentity {
    ino: u64,
    mtime: (i64, i64),
    ctime: (i64, i64),
}

impl FileIdentity {
    pub fn of(path: &Path) -> std::io::Result<Self> {
        let meta = std::fs::metadata(path)?;
        Ok(Self {
            ino: meta.ino(),
            mtime: (meta.mtime(), meta.mtime_nsec()),
            ctime: (meta.ctime(), meta.ctime_nsec()),
        })
    }
}

#[derive(Debug)]
pub enum Load {
    /// The file was parsed; the caller must replace its directory with this one.
    Reparsed(Directory),
    /// Nothing changed since the last successful parse.
    Unchanged,
}

/// Parses the config file on first use and again whenever it changes.
#[derive(Debug)]
pub struct ConfigLoader {
    path: PathBuf,
    last: Option<FileIdentity>,
}

impl ConfigLoader {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: path.into(),
            last: None,
        }
    }

    /// Forget the last parse so the next [`Self::load`] reparses.
    pub fn reset(&mut self) {
        self.last = None;
    }

    #[tracing::instrument(skip_all, fields(path = %self.path.display()))]
    pub fn load(&mut self) -> Result<Load, ConfigError> {
        let current = FileIdentity::of(&self.path);
        if let Some(last) = self.last.take() {
            match &current {
                Ok(current) if *current == last => {
                    self.last = Some(last);
                    return Ok(Load::Unchanged);
                }
                Ok(_) => info!("Configuration file changed, re-initializing."),
                Err(e) => warn!(error = %e, "Could not stat configuration file."),
            }
        }
        let directory = parse(&self.path)?;
        self.last = current.ok();
        Ok(Load::Reparsed(directory))
    }
}
