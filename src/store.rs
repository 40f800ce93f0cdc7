// SPDX-FileCopyrightText: © 2024 Matt Williams <matt.williams@bristol.ac.uk>
// SPDX-License-Identifier: MIT

//! The in-memory registry of identity groups and excluded users.

use std::collections::HashSet;

use tracing::warn;

use crate::config::Verbosity;

/// An external login name and the local account it maps onto.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct UserMapping {
    pub from: String,
    pub to: String,
}

impl UserMapping {
    pub fn new<F: Into<String>, T: Into<String>>(from: F, to: T) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct IdentityGroup {
    pub name: String,
    /// Where tokens for members of this group are verified.
    pub url: url::Url,
    pub mappings: Vec<UserMapping>,
}

impl IdentityGroup {
    pub fn new<N: Into<String>>(name: N, url: url::Url, mappings: Vec<UserMapping>) -> Self {
        Self {
            name: name.into(),
            url,
            mappings,
        }
    }

    pub fn mapping_for(&self, from: &str) -> Option<&UserMapping> {
        self.mappings.iter().find(|m| m.from == from)
    }
}

/// Identity groups in configuration order. Group names are unique.
#[derive(Clone, Debug, Default)]
pub struct MappingStore {
    groups: Vec<IdentityGroup>,
}

impl MappingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a group, refusing it if a group with the same name exists.
    pub fn insert(&mut self, group: IdentityGroup) -> bool {
        if self.find_group(&group.name).is_some() {
            warn!(group = %group.name, "Skipping duplicate identity group.");
            return false;
        }
        self.groups.push(group);
        true
    }

    pub fn find_group(&self, name: &str) -> Option<&IdentityGroup> {
        self.groups.iter().find(|g| g.name == name)
    }

    pub fn groups(&self) -> impl Iterator<Item = &IdentityGroup> {
        self.groups.iter()
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

impl FromIterator<IdentityGroup> for MappingStore {
    fn from_iter<I: IntoIterator<Item = IdentityGroup>>(iter: I) -> Self {
        let mut store = Self::new();
        for group in iter {
            store.insert(group);
        }
        store
    }
}

/// Usernames that are never mapped.
#[derive(Clone, Debug, Default)]
pub struct ExclusionList(HashSet<String>);

impl ExclusionList {
    pub fn contains(&self, name: &str) -> bool {
        self.0.contains(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl<S: Into<String>> FromIterator<S> for ExclusionList {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

/// Everything read from one parse of the configuration file.
///
/// It is built whole by [`crate::ConfigLoader`] and replaced whole on
/// reload; nothing mutates it in place.
#[derive(Clone, Debug, Default)]
pub struct Directory {
    pub store: MappingStore,
    pub excluded: ExclusionList,
    pub verbosity: Verbosity,
}
