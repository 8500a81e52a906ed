//! User and group resolution against the container's own databases.
//!
//! Names in an image config refer to the image's `/etc/passwd` and
//! `/etc/group`, never the host's.

use std::fs;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use mole_common::error::{MoleError, Result};
use mole_core::credential::Credential;

const PASSWD: &str = "etc/passwd";
const GROUP: &str = "etc/group";

/// A matched colon-delimited record.
#[derive(Debug)]
struct Record {
    file: PathBuf,
    line: usize,
    fields: Vec<String>,
}

impl Record {
    /// Parses field `index` as a numeric id.
    fn id(&self, index: usize) -> Result<u32> {
        let value = self.fields.get(index).map_or("", String::as_str);
        value.parse().map_err(|_| MoleError::IdentityParse {
            file: self.file.clone(),
            line: self.line,
            value: value.to_string(),
        })
    }
}

/// Scans `<rootfs>/<db>` for the first record whose first field is `name`.
///
/// An absent database is the same as one without a match.
fn find_record(rootfs: &Path, db: &str, name: &str) -> Result<Option<Record>> {
    let file = rootfs.join(db);
    let handle = match fs::File::open(&file) {
        Ok(handle) => handle,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(MoleError::io(file, e)),
    };

    for (idx, line) in BufReader::new(handle).lines().enumerate() {
        let line = line.map_err(|e| MoleError::io(&file, e))?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let fields: Vec<String> = trimmed.split(':').map(str::to_string).collect();
        if fields.first().is_some_and(|f| f == name) {
            return Ok(Some(Record {
                file,
                line: idx + 1,
                fields,
            }));
        }
    }
    Ok(None)
}

/// Looks up the uid of `name` in `<rootfs>/etc/passwd`.
///
/// Returns `Ok(None)` when no record matches.
///
/// # Errors
///
/// Returns [`MoleError::IdentityParse`] if the matching record's uid field
/// is not numeric, or an I/O error if the file cannot be read.
pub fn resolve_uid(rootfs: &Path, name: &str) -> Result<Option<u32>> {
    find_record(rootfs, PASSWD, name)?
        .map(|r| r.id(2))
        .transpose()
}

/// Looks up the gid of `name` in `<rootfs>/etc/group`.
///
/// Returns `Ok(None)` when no record matches.
///
/// # Errors
///
/// Returns [`MoleError::IdentityParse`] if the matching record's gid field
/// is not numeric, or an I/O error if the file cannot be read.
pub fn resolve_gid(rootfs: &Path, name: &str) -> Result<Option<u32>> {
    find_record(rootfs, GROUP, name)?
        .map(|r| r.id(2))
        .transpose()
}

/// Resolves a `config.user` value into numeric ids.
///
/// Accepts `user`, `user:group`, `uid` and `uid:gid`, names taking
/// precedence over numeric interpretation. Without a group, a named user
/// gets the primary gid from its passwd record; a bare numeric uid gets
/// gid 0.
///
/// # Errors
///
/// Returns [`MoleError::UserNotFound`] or [`MoleError::GroupNotFound`]
/// when a part is neither a known name nor a number.
pub fn resolve_user_spec(rootfs: &Path, spec: &str) -> Result<Credential> {
    let (user, group) = match spec.split_once(':') {
        Some((user, group)) => (user, Some(group)),
        None => (spec, None),
    };

    let record = find_record(rootfs, PASSWD, user)?;
    let uid = match &record {
        Some(r) => r.id(2)?,
        None => user.parse().map_err(|_| MoleError::UserNotFound {
            name: user.to_string(),
        })?,
    };

    let gid = match group.filter(|g| !g.is_empty()) {
        Some(group) => match resolve_gid(rootfs, group)? {
            Some(gid) => gid,
            None => group.parse().map_err(|_| MoleError::GroupNotFound {
                name: group.to_string(),
            })?,
        },
        None => record.as_ref().map_or(Ok(0), |r| r.id(3))?,
    };

    let credential = Credential::new(uid, gid);
    tracing::debug!(spec, credential = %credential, "resolved container identity");
    Ok(credential)
}
