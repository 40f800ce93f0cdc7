// SPDX-FileCopyrightText: © 2024 Matt Williams <matt.williams@bristol.ac.uk>
// SPDX-License-Identifier: MIT

//! Lookups over the [`MappingStore`].
//!
//! A bare name must be claimed by exactly one mapping in the whole store.
//! A name that two groups both claim is refused rather than guessed, since
//! picking either group would let one tenant's users authenticate against
//! the other's identity provider. A name qualified with a group
//! (`user@group`) skips that rule: the caller has already chosen the group.

use std::collections::BTreeMap;

use thiserror::Error;
use tracing::debug;

use crate::{
    address::{Address, AddressError},
    store::{IdentityGroup, MappingStore, UserMapping},
};

/// Which value of a matching mapping a lookup yields.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ResolveMode {
    /// The URL of the group the mapping belongs to.
    Endpoint,
    /// The local account the mapping points at.
    CanonicalName,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LookupError {
    #[error("No identity group maps `{0}`.")]
    NotFound(String),
    #[error("No identity group is named `{0}`.")]
    UnknownGroup(String),
    #[error("`{name}` is mapped {count} times; refusing to pick one.")]
    Ambiguous { name: String, count: usize },
    #[error("Could not split the login name.")]
    Address(#[from] AddressError),
}

/// The single mapping a lookup settled on.
#[derive(Clone, Copy, Debug)]
pub struct Resolution<'a> {
    pub group: &'a IdentityGroup,
    pub mapping: &'a UserMapping,
}

impl<'a> Resolution<'a> {
    pub fn value(&self, mode: ResolveMode) -> &'a str {
        match mode {
            ResolveMode::Endpoint => self.group.url.as_str(),
            ResolveMode::CanonicalName => &self.mapping.to,
        }
    }
}

impl MappingStore {
    /// Find the one mapping in any group whose external name is `username`.
    pub fn resolve_unique(&self, username: &str) -> Result<Resolution<'_>, LookupError> {
        let mut count = 0;
        let mut candidate = None;
        for group in self.groups() {
            for mapping in group.mappings.iter().filter(|m| m.from == username) {
                count += 1;
                candidate = Some(Resolution { group, mapping });
            }
        }
        debug!(username, count, "Counted mappings for bare name.");
        match candidate {
            Some(resolution) if count == 1 => Ok(resolution),
            Some(_) => Err(LookupError::Ambiguous {
                name: username.to_string(),
                count,
            }),
            None => Err(LookupError::NotFound(username.to_string())),
        }
    }

    /// Find `username` in the group called `location` only.
    pub fn resolve_in_group(
        &self,
        location: &str,
        username: &str,
    ) -> Result<Resolution<'_>, LookupError> {
        let group = self
            .find_group(location)
            .ok_or_else(|| LookupError::UnknownGroup(location.to_string()))?;
        let mapping = group
            .mapping_for(username)
            .ok_or_else(|| LookupError::NotFound(format!("{username}@{location}")))?;
        Ok(Resolution { group, mapping })
    }

    pub fn resolve(&self, address: &Address) -> Result<Resolution<'_>, LookupError> {
        match &address.location {
            Some(location) => self.resolve_in_group(location, &address.username),
            None => self.resolve_unique(&address.username),
        }
    }

    /// Resolve a login name as typed, with or without a group qualifier.
    pub fn lookup(&self, login: &str, mode: ResolveMode) -> Result<&str, LookupError> {
        let address = Address::parse(login)?;
        Ok(self.resolve(&address)?.value(mode))
    }

    /// External names claimed more than once, with their claim counts.
    pub fn ambiguous_names(&self) -> BTreeMap<&str, usize> {
        let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
        for mapping in self.groups().flat_map(|g| g.mappings.iter()) {
            *counts.entry(mapping.from.as_str()).or_default() += 1;
        }
        counts.retain(|_, count| *count > 1);
        counts
    }
}

#[allow(clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn group(name: &str, url: &str, mappings: &[(&str, &str)]) -> IdentityGroup {
        IdentityGroup::new(
            name,
            url::Url::parse(url).expect("Could not parse URL."),
            mappings
                .iter()
                .map(|(from, to)| UserMapping::new(*from, *to))
                .collect(),
        )
    }

    #[rstest::fixture]
    fn federation() -> MappingStore {
        [
            group(
                "corp",
                "https://idp.example/corp",
                &[("alice", "a1"), ("bob", "b1")],
            ),
            group(
                "lab",
                "https://lab.example/userinfo",
                &[("alice", "a2"), ("carol", "c2")],
            ),
        ]
        .into_iter()
        .collect()
    }

    #[rstest::rstest]
    fn ambiguous_bare_name_is_refused(federation: MappingStore) {
        assert_eq!(
            federation.lookup("alice", ResolveMode::CanonicalName),
            Err(LookupError::Ambiguous {
                name: "alice".to_string(),
                count: 2
            })
        );
        assert!(federation.lookup("alice", ResolveMode::Endpoint).is_err());
    }

    #[rstest::rstest]
    fn unique_bare_name_resolves(federation: MappingStore) {
        assert_eq!(federation.lookup("bob", ResolveMode::CanonicalName), Ok("b1"));
        assert_eq!(
            federation.lookup("carol", ResolveMode::Endpoint),
            Ok("https://lab.example/userinfo")
        );
    }

    #[rstest::rstest]
    fn unknown_bare_name(federation: MappingStore) {
        assert_eq!(
            federation.lookup("dave", ResolveMode::CanonicalName),
            Err(LookupError::NotFound("dave".to_string()))
        );
    }

    #[rstest::rstest]
    fn qualified_name_bypasses_uniqueness(federation: MappingStore) {
        assert_eq!(
            federation.lookup("alice@corp", ResolveMode::CanonicalName),
            Ok("a1")
        );
        assert_eq!(
            federation.lookup("alice@lab", ResolveMode::CanonicalName),
            Ok("a2")
        );
        assert_eq!(
            federation.lookup("alice@corp", ResolveMode::Endpoint),
            Ok("https://idp.example/corp")
        );
    }

    #[rstest::rstest]
    fn qualified_name_must_be_in_that_group(federation: MappingStore) {
        assert_eq!(
            federation.lookup("carol@corp", ResolveMode::CanonicalName),
            Err(LookupError::NotFound("carol@corp".to_string()))
        );
        assert_eq!(
            federation.lookup("bob@nowhere", ResolveMode::CanonicalName),
            Err(LookupError::UnknownGroup("nowhere".to_string()))
        );
    }

    #[test]
    fn removing_a_duplicate_restores_resolution() {
        let corp = group("corp", "https://idp.example/corp", &[("alice", "a1")]);
        let lab = group("lab", "https://lab.example/", &[("alice", "a2")]);

        let both: MappingStore = [corp.clone(), lab].into_iter().collect();
        assert!(both.resolve_unique("alice").is_err());
        assert_eq!(both.ambiguous_names(), [("alice", 2)].into());

        let single: MappingStore = [corp].into_iter().collect();
        let resolution = single.resolve_unique("alice").expect("Should resolve.");
        assert_eq!(resolution.value(ResolveMode::CanonicalName), "a1");
        assert_eq!(resolution.group.name, "corp");
        assert!(single.ambiguous_names().is_empty());
    }

    #[test]
    fn repeated_name_within_one_group_is_ambiguous() {
        let store: MappingStore = [group(
            "corp",
            "https://idp.example/",
            &[("alice", "a1"), ("alice", "a3")],
        )]
        .into_iter()
        .collect();
        assert!(matches!(
            store.resolve_unique("alice"),
            Err(LookupError::Ambiguous { count: 2, .. })
        ));
    }
}
