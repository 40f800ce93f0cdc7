// SPDX-FileCopyrightText: © 2024 Matt Williams <matt.williams@bristol.ac.uk>
// SPDX-License-Identifier: MIT

//! Splitting of `user@location` login addresses.

use std::fmt;

use thiserror::Error;

const SEPARATOR: char = '@';

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AddressError {
    #[error("No address given.")]
    MissingAddress,
    #[error("No output buffer given for the {0}.")]
    MissingBuffer(&'static str),
    #[error("The {field} needs {needed} bytes but its buffer holds {capacity}.")]
    Overflow {
        field: &'static str,
        needed: usize,
        capacity: usize,
    },
}

/// A text buffer whose capacity is fixed by its owner.
///
/// Writes that would exceed the capacity are refused instead of growing the
/// buffer.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct FieldBuf {
    text: String,
    capacity: usize,
}

impl FieldBuf {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            text: String::with_capacity(capacity),
            capacity,
        }
    }

    /// A buffer holding `value`, sized to fit exactly that value.
    pub fn sized_for(value: &str) -> Self {
        let mut buf = Self::with_capacity(value.len());
        buf.text.push_str(value);
        buf
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    fn write(&mut self, field: &'static str, value: &str) -> Result<(), AddressError> {
        if value.len() > self.capacity {
            return Err(AddressError::Overflow {
                field,
                needed: value.len(),
                capacity: self.capacity,
            });
        }
        self.text.clear();
        self.text.push_str(value);
        Ok(())
    }

    fn clear(&mut self) {
        self.text.clear();
    }
}

/// Split `address` on its first `@` into the two caller-owned buffers.
///
/// Without an `@` the username is the address cut down to the username
/// buffer's capacity, and the location is emptied. A trailing `@` also
/// leaves the location empty.
pub fn split_into(
    address: Option<&str>,
    username: Option<&mut FieldBuf>,
    location: Option<&mut FieldBuf>,
) -> Result<(), AddressError> {
    let address = address.ok_or(AddressError::MissingAddress)?;
    let username = username.ok_or(AddressError::MissingBuffer("username"))?;
    let location = location.ok_or(AddressError::MissingBuffer("location"))?;

    match address.split_once(SEPARATOR) {
        Some((user, loc)) => {
            username.write("username", user)?;
            if loc.is_empty() {
                location.clear();
            } else {
                location.write("location", loc)?;
            }
        }
        None => {
            let mut end = username.capacity().min(address.len());
            while !address.is_char_boundary(end) {
                end -= 1;
            }
            username.write("username", &address[..end])?;
            location.clear();
        }
    }
    Ok(())
}

/// A login name with its optional identity group qualifier.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Address {
    pub username: String,
    pub location: Option<String>,
}

impl Address {
    pub fn parse(address: &str) -> Result<Self, AddressError> {
        let mut username = FieldBuf::sized_for(address);
        let mut location = FieldBuf::sized_for(address);
        split_into(Some(address), Some(&mut username), Some(&mut location))?;
        Ok(Self {
            username: username.as_str().to_string(),
            location: (!location.is_empty()).then(|| location.as_str().to_string()),
        })
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.location {
            Some(location) => write!(f, "{}{SEPARATOR}{location}", self.username),
            None => f.write_str(&self.username),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn split(
        address: Option<&str>,
        user_capacity: usize,
        location_capacity: usize,
    ) -> Result<(FieldBuf, FieldBuf), AddressError> {
        let mut username = FieldBuf::with_capacity(user_capacity);
        let mut location = FieldBuf::with_capacity(location_capacity);
        split_into(address, Some(&mut username), Some(&mut location))?;
        Ok((username, location))
    }

    #[test]
    fn user_and_location() -> Result<(), AddressError> {
        let (username, location) = split(Some("alice@corp"), 16, 16)?;
        assert_eq!(username.as_str(), "alice");
        assert_eq!(location.as_str(), "corp");
        Ok(())
    }

    #[test]
    fn bare_name_is_bounded_by_username_buffer() -> Result<(), AddressError> {
        let (username, location) = split(Some("aliceliddell"), 5, 16)?;
        assert_eq!(username.as_str(), "alice");
        assert!(location.is_empty());

        let (username, _) = split(Some("bob"), 5, 16)?;
        assert_eq!(username.as_str(), "bob");
        Ok(())
    }

    #[test]
    fn bare_name_truncation_respects_char_boundaries() -> Result<(), AddressError> {
        let (username, _) = split(Some("zoë"), 3, 3)?;
        assert_eq!(username.as_str(), "zo");
        Ok(())
    }

    #[test]
    fn trailing_separator_clears_location() -> Result<(), AddressError> {
        let mut username = FieldBuf::with_capacity(8);
        let mut location = FieldBuf::sized_for("stale");
        split_into(Some("a@"), Some(&mut username), Some(&mut location))?;
        assert_eq!(username.as_str(), "a");
        assert!(location.is_empty());
        Ok(())
    }

    #[test]
    fn only_first_separator_splits() -> Result<(), AddressError> {
        let (username, location) = split(Some("a@b@c"), 8, 8)?;
        assert_eq!(username.as_str(), "a");
        assert_eq!(location.as_str(), "b@c");
        Ok(())
    }

    #[test]
    fn missing_inputs_fail() {
        assert_eq!(split(None, 8, 8), Err(AddressError::MissingAddress));
        let mut location = FieldBuf::with_capacity(8);
        assert_eq!(
            split_into(Some("alice"), None, Some(&mut location)),
            Err(AddressError::MissingBuffer("username"))
        );
        let mut username = FieldBuf::with_capacity(8);
        assert_eq!(
            split_into(Some("alice"), Some(&mut username), None),
            Err(AddressError::MissingBuffer("location"))
        );
    }

    #[test]
    fn oversized_parts_fail() {
        assert_eq!(
            split(Some("alice@corp"), 3, 16),
            Err(AddressError::Overflow {
                field: "username",
                needed: 5,
                capacity: 3
            })
        );
        assert_eq!(
            split(Some("alice@corporation"), 16, 4),
            Err(AddressError::Overflow {
                field: "location",
                needed: 11,
                capacity: 4
            })
        );
    }

    #[test]
    fn parse_and_display() -> Result<(), AddressError> {
        let address = Address::parse("alice@corp")?;
        assert_eq!(address.username, "alice");
        assert_eq!(address.location.as_deref(), Some("corp"));
        assert_eq!(address.to_string(), "alice@corp");

        let bare = Address::parse("bob")?;
        assert_eq!(bare.location, None);
        assert_eq!(bare.to_string(), "bob");
        Ok(())
    }
}
