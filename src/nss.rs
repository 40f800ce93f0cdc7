// SPDX-FileCopyrightText: © 2024 Matt Williams <matt.williams@bristol.ac.uk>
// SPDX-License-Identifier: MIT

//! The name-service call site: answering `getpwnam` for mapped users.
//!
//! Every mapped name gets an account, so this source has to come last in
//! the passwd lookup order.

use std::path::PathBuf;

use tracing::{debug, info, warn};

use crate::{
    account::{self, AccountSource, SyntheticAccount},
    config::{ConfigError, ConfigLoader, Load},
    resolve::ResolveMode,
    store::Directory,
};

/// Programs that manage accounts and must see only real ones.
const ACCOUNT_TOOLS: &[&str] = &["useradd", "usermod", "userdel", "adduser", "deluser"];

#[derive(Debug)]
pub enum NssStatus {
    Success(SyntheticAccount),
    /// Not ours to answer; the next source decides.
    NotFound,
    /// The configuration could not be loaded.
    Unavailable,
}

pub fn is_account_tool(program: &str) -> bool {
    ACCOUNT_TOOLS.contains(&program)
}

/// The names the current process goes by: its executable name and its
/// kernel command name, which differs for interpreted scripts.
fn current_program_names() -> Vec<String> {
    let mut names = Vec::new();
    if let Some(exe) = std::env::args_os().next() {
        if let Some(base) = std::path::Path::new(&exe).file_name() {
            names.push(base.to_string_lossy().into_owned());
        }
    }
    match std::fs::read_to_string("/proc/self/comm") {
        Ok(comm) => names.extend(comm.split_whitespace().next().map(str::to_string)),
        Err(e) => debug!(error = %e, "Could not read /proc/self/comm."),
    }
    names
}

fn running_account_tool() -> bool {
    current_program_names().iter().any(|name| {
        let skip = is_account_tool(name);
        if skip {
            debug!(program = %name, "Running from an account tool, skipping lookup.");
        }
        skip
    })
}

pub struct NameService {
    loader: ConfigLoader,
    directory: Option<Directory>,
    sources: Vec<Box<dyn AccountSource + Send + Sync>>,
}

impl NameService {
    pub fn new<P: Into<PathBuf>>(config_path: P) -> Self {
        Self::with_sources(config_path, account::default_sources())
    }

    pub fn with_sources<P: Into<PathBuf>>(
        config_path: P,
        sources: Vec<Box<dyn AccountSource + Send + Sync>>,
    ) -> Self {
        Self {
            loader: ConfigLoader::new(config_path),
            directory: None,
            sources,
        }
    }

    /// The directory from the latest successful load.
    pub fn directory(&self) -> Option<&Directory> {
        self.directory.as_ref()
    }

    /// Make sure the directory reflects the file on disk.
    pub fn refresh(&mut self) -> Result<(), ConfigError> {
        if self.directory.is_none() {
            self.loader.reset();
        }
        match self.loader.load() {
            Ok(Load::Reparsed(directory)) => self.directory = Some(directory),
            Ok(Load::Unchanged) => (),
            Err(e) => {
                self.directory = None;
                return Err(e);
            }
        }
        Ok(())
    }

    /// Look up the account for login `name`, with `buflen` bytes available
    /// for its strings.
    #[tracing::instrument(skip(self))]
    pub fn getpwnam(&mut self, name: &str, buflen: usize) -> NssStatus {
        if running_account_tool() {
            return NssStatus::NotFound;
        }
        if let Err(e) = self.refresh() {
            warn!(error = %e, "Could not load mapping configuration.");
            return NssStatus::Unavailable;
        }
        let Some(directory) = &self.directory else {
            return NssStatus::Unavailable;
        };
        let canonical = match directory.store.lookup(name, ResolveMode::CanonicalName) {
            Ok(canonical) => canonical,
            Err(e) => {
                debug!(error = %e, "Could not map.");
                return NssStatus::NotFound;
            }
        };
        if canonical == name || directory.excluded.contains(name) {
            info!("Skipped local or excluded user.");
            return NssStatus::NotFound;
        }
        debug!(canonical, "Mapped user.");
        match account::make_mapped_account(&self.sources, canonical, buflen) {
            Ok(account) => NssStatus::Success(account),
            Err(e) => {
                debug!(error = %e, "Could not build mapped account.");
                NssStatus::NotFound
            }
        }
    }
}
