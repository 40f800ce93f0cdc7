// SPDX-FileCopyrightText: © 2024 Matt Williams <matt.williams@bristol.ac.uk>
// SPDX-License-Identifier: MIT

//! Building the local account record for a mapped user.
//!
//! The record is copied from the canonical account, renamed, and written
//! into a single buffer no larger than the caller allowed.

use std::{
    ops::Range,
    path::PathBuf,
    str::FromStr,
};

use thiserror::Error;
use tracing::{debug, warn};

pub const PASSWD_FILE: &str = "/etc/passwd";

#[derive(Debug, Error)]
pub enum AccountError {
    #[error("Account buffer too small: need {needed} bytes, have {available}.")]
    BufferTooSmall { needed: usize, available: usize },
    #[error("No account named `{0}` exists.")]
    NotFound(String),
    #[error("Could not read accounts from {source_name}.")]
    Io {
        source_name: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Enumerating system accounts failed: {0}")]
    Enumerate(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("Malformed passwd entry: {0}")]
pub struct ParseRecordError(String);

/// One line of a passwd database.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct AccountRecord {
    pub name: String,
    pub passwd: String,
    pub uid: u32,
    pub gid: u32,
    pub gecos: String,
    pub dir: String,
    pub shell: String,
}

impl FromStr for AccountRecord {
    type Err = ParseRecordError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = line.split(':').collect();
        let [name, passwd, uid, gid, gecos, dir, shell] = fields[..] else {
            return Err(ParseRecordError(format!(
                "expected 7 fields, found {}",
                fields.len()
            )));
        };
        if name.is_empty() {
            return Err(ParseRecordError("empty account name".to_string()));
        }
        let id = |field: &str, what: &str| {
            field
                .parse::<u32>()
                .map_err(|_| ParseRecordError(format!("{what} `{field}` of `{name}`")))
        };
        Ok(Self {
            name: name.to_string(),
            passwd: passwd.to_string(),
            uid: id(uid, "uid")?,
            gid: id(gid, "gid")?,
            gecos: gecos.to_string(),
            dir: dir.to_string(),
            shell: shell.to_string(),
        })
    }
}

/// Find the first record called `name` in passwd-formatted bytes.
///
/// Each line is decoded on its own, so a line in another encoding does not
/// hide the records after it.
fn find_in_passwd(text: &[u8], name: &str) -> Option<AccountRecord> {
    text.split(|&b| b == b'\n')
        .map(String::from_utf8_lossy)
        .filter_map(|line| {
            let line = line.trim_end();
            if line.is_empty() || line.starts_with('#') {
                return None;
            }
            match line.parse::<AccountRecord>() {
                Ok(record) => Some(record),
                Err(e) => {
                    debug!(error = %e, "Skipping passwd line.");
                    None
                }
            }
        })
        .find(|record| record.name == name)
}

/// Somewhere account records can be looked up by name.
pub trait AccountSource {
    fn find(&self, name: &str) -> Result<Option<AccountRecord>, AccountError>;

    /// Used in logs.
    fn describe(&self) -> String;
}

/// A passwd-format file read directly, bypassing the name service.
#[derive(Clone, Debug)]
pub struct PasswdFile {
    path: PathBuf,
}

impl PasswdFile {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }
}

impl Default for PasswdFile {
    fn default() -> Self {
        Self::new(PASSWD_FILE)
    }
}

impl AccountSource for PasswdFile {
    fn find(&self, name: &str) -> Result<Option<AccountRecord>, AccountError> {
        let text = std::fs::read(&self.path).map_err(|source| AccountError::Io {
            source_name: self.describe(),
            source,
        })?;
        Ok(find_in_passwd(&text, name))
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// Every account the system knows of, enumerated with `getent passwd`.
#[derive(Clone, Debug, Default)]
pub struct SystemAccounts;

impl AccountSource for SystemAccounts {
    fn find(&self, name: &str) -> Result<Option<AccountRecord>, AccountError> {
        let output = std::process::Command::new("getent")
            .arg("passwd")
            .output()
            .map_err(|source| AccountError::Io {
                source_name: self.describe(),
                source,
            })?;
        if !output.status.success() {
            return Err(AccountError::Enumerate(format!(
                "getent exited with {}",
                output.status
            )));
        }
        Ok(find_in_passwd(&output.stdout, name))
    }

    fn describe(&self) -> String {
        "system account database".to_string()
    }
}

/// The default lookup order: the local passwd file, then the whole system.
pub fn default_sources() -> Vec<Box<dyn AccountSource + Send + Sync>> {
    vec![Box::new(PasswdFile::default()), Box::new(SystemAccounts)]
}

/// A string buffer with a hard size limit. Each string is followed by a NUL
/// byte, which counts against the limit.
#[derive(Debug)]
struct AccountBuffer {
    buf: String,
    capacity: usize,
}

impl AccountBuffer {
    fn new(capacity: usize) -> Self {
        Self {
            buf: String::new(),
            capacity,
        }
    }

    fn push(&mut self, value: &str) -> Result<Range<usize>, AccountError> {
        let needed = self.buf.len() + value.len() + 1;
        if needed > self.capacity {
            return Err(AccountError::BufferTooSmall {
                needed,
                available: self.capacity,
            });
        }
        let start = self.buf.len();
        self.buf.push_str(value);
        self.buf.push('\0');
        Ok(start..start + value.len())
    }
}

/// A mapped account whose strings all live in one bounded buffer.
#[derive(Debug)]
pub struct SyntheticAccount {
    buf: String,
    name: Range<usize>,
    passwd: Range<usize>,
    shell: Range<usize>,
    gecos: Range<usize>,
    dir: Range<usize>,
    pub uid: u32,
    pub gid: u32,
}

impl SyntheticAccount {
    pub fn name(&self) -> &str {
        &self.buf[self.name.clone()]
    }

    pub fn passwd(&self) -> &str {
        &self.buf[self.passwd.clone()]
    }

    pub fn shell(&self) -> &str {
        &self.buf[self.shell.clone()]
    }

    pub fn gecos(&self) -> &str {
        &self.buf[self.gecos.clone()]
    }

    pub fn dir(&self) -> &str {
        &self.buf[self.dir.clone()]
    }

    /// Bytes of buffer used, NUL terminators included.
    pub fn buffer_len(&self) -> usize {
        self.buf.len()
    }

    /// The record in `/etc/passwd` line format.
    pub fn to_passwd_line(&self) -> String {
        format!(
            "{}:{}:{}:{}:{}:{}:{}",
            self.name(),
            self.passwd(),
            self.uid,
            self.gid,
            self.gecos(),
            self.dir(),
            self.shell()
        )
    }
}

/// Replace the last component of `dir` with `name`.
fn mapped_home(dir: &str, name: &str) -> String {
    match dir.rsplit_once('/') {
        Some((parent, _)) => format!("{parent}/{name}"),
        None => dir.to_string(),
    }
}

/// Copy `source` into a new account called `name`, in at most `capacity` bytes.
pub fn synthesize(
    source: &AccountRecord,
    name: &str,
    capacity: usize,
) -> Result<SyntheticAccount, AccountError> {
    let gecos = format!("{name} mapped user");
    let dir = mapped_home(&source.dir, name);
    let needed = [name, "x", source.shell.as_str(), gecos.as_str(), dir.as_str()]
        .iter()
        .map(|s| s.len() + 1)
        .sum::<usize>();
    if needed > capacity {
        debug!(needed, capacity, "Provided account buffer too small.");
        return Err(AccountError::BufferTooSmall {
            needed,
            available: capacity,
        });
    }
    let mut buf = AccountBuffer::new(capacity);
    let name = buf.push(name)?;
    let passwd = buf.push("x")?;
    let shell = buf.push(&source.shell)?;
    let gecos = buf.push(&gecos)?;
    let dir = buf.push(&dir)?;
    Ok(SyntheticAccount {
        buf: buf.buf,
        name,
        passwd,
        shell,
        gecos,
        dir,
        uid: source.uid,
        gid: source.gid,
    })
}

/// Look up `canonical` in each source in turn and build its mapped account
/// from the first record found.
///
/// A source that fails is logged and skipped. Only a missing record moves on
/// to the next source: a record that does not fit the buffer is an error.
pub fn make_mapped_account<S>(
    sources: &[S],
    canonical: &str,
    capacity: usize,
) -> Result<SyntheticAccount, AccountError>
where
    S: AsRef<dyn AccountSource + Send + Sync>,
{
    for source in sources {
        let source = source.as_ref();
        match source.find(canonical) {
            Ok(Some(record)) => {
                debug!(account = canonical, source = %source.describe(), "Found account.");
                return synthesize(&record, canonical, capacity);
            }
            Ok(None) => debug!(account = canonical, source = %source.describe(), "Account not present."),
            Err(e) => warn!(error = %e, source = %source.describe(), "Could not search accounts."),
        }
    }
    Err(AccountError::NotFound(canonical.to_string()))
}
