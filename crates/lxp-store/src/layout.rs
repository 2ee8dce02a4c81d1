//! On-disk layout of a store and the naming rules that protect it.
//!
//! ```text
//! <root>/REPOS/<repository>/<bucket>/
//!     META/<KIND>                   empty marker naming the bucket kind
//!     META/TYPELABEL                decimal type id, if bound
//!     TRANSACTIONS/<oid>            shadow files awaiting commit/rollback
//!     INDICES/INDEX<label>/<value>  newline-separated oids per value
//!     <oid>                         one JSON object per tuple
//! ```
//!
//! Valid repository and bucket names:
//! - Must be non-empty and at most 255 bytes
//! - Must not contain `/`, `\`, or NUL
//! - Must not start with `.`
//! - Must not be one of the reserved directory names

use std::fs;
use std::io::{self, Write};
use std::path::Path;

use crate::error::{StoreError, StoreResult};

pub const REPOS_DIR: &str = "REPOS";
pub const META_DIR: &str = "META";
pub const TRANSACTIONS_DIR: &str = "TRANSACTIONS";
pub const INDICES_DIR: &str = "INDICES";
pub const INDEX_PREFIX: &str = "INDEX";
pub const TYPELABEL_FILE: &str = "TYPELABEL";

const RESERVED: &[&str] = &[META_DIR, TRANSACTIONS_DIR, INDICES_DIR];
const FORBIDDEN_CHARS: &[char] = &['/', '\\', '\0'];
const MAX_NAME_LEN: usize = 255;

/// Validate a repository or bucket name.
pub fn validate_name(name: &str) -> StoreResult<()> {
    let reject = |reason: &str| {
        Err(StoreError::IllegalName {
            name: name.to_string(),
            reason: reason.to_string(),
        })
    };

    if name.is_empty() {
        return reject("name must not be empty");
    }
    if name.len() > MAX_NAME_LEN {
        return reject("name is longer than 255 bytes");
    }
    if let Some(ch) = name.chars().find(|c| FORBIDDEN_CHARS.contains(c)) {
        return reject(&format!("contains forbidden character: {ch:?}"));
    }
    if name.starts_with('.') {
        return reject("must not start with '.'");
    }
    if RESERVED.contains(&name) {
        return reject("reserved directory name");
    }
    Ok(())
}

/// Turn an indexed value into a legal file name.
///
/// `%`, `/`, NUL, and a leading `.` are percent-escaped; the empty string
/// becomes a lone `%`.
pub fn escape_index_value(value: &str) -> String {
    if value.is_empty() {
        return "%".to_string();
    }
    let mut out = String::with_capacity(value.len());
    for (i, ch) in value.chars().enumerate() {
        match ch {
            '%' => out.push_str("%25"),
            '/' => out.push_str("%2F"),
            '\0' => out.push_str("%00"),
            '.' if i == 0 => out.push_str("%2E"),
            c => out.push(c),
        }
    }
    out
}

/// Inverse of [`escape_index_value`]. Returns `None` for names it never produces.
pub fn unescape_index_value(name: &str) -> Option<String> {
    if name == "%" {
        return Some(String::new());
    }
    let mut out = String::with_capacity(name.len());
    let mut rest = name;
    while let Some(pos) = rest.find('%') {
        out.push_str(&rest[..pos]);
        let code = rest.get(pos + 1..pos + 3)?;
        out.push(match code {
            "25" => '%',
            "2F" => '/',
            "00" => '\0',
            "2E" => '.',
            _ => return None,
        });
        rest = &rest[pos + 3..];
    }
    out.push_str(rest);
    Some(out)
}

/// Longest index file name written as a plain escaped value.
const MAX_INDEX_NAME_LEN: usize = 255;
/// Escaped bytes kept in front of the hash of an over-long value.
const HASHED_PREFIX_LEN: usize = 128;
/// Separates the prefix from the hash; [`escape_index_value`] never emits it.
const HASHED_MARK: &str = "%~";

/// File name for an indexed value within an index directory.
///
/// Values whose escaped form fits are named by it directly. Longer ones get
/// an escaped prefix, [`HASHED_MARK`], and the BLAKE3 hash of the value; the
/// full value is then kept in the file itself (see [`is_hashed_index_name`]).
pub fn index_file_name(value: &str) -> String {
    let escaped = escape_index_value(value);
    if escaped.len() <= MAX_INDEX_NAME_LEN {
        return escaped;
    }
    let mut cut = HASHED_PREFIX_LEN;
    while !escaped.is_char_boundary(cut) {
        cut -= 1;
    }
    // Never split an escape sequence.
    if let Some(pos) = escaped[..cut].rfind('%') {
        if pos + 3 > cut {
            cut = pos;
        }
    }
    format!(
        "{}{HASHED_MARK}{}",
        &escaped[..cut],
        blake3::hash(value.as_bytes()).to_hex()
    )
}

/// Whether `name` was produced by [`index_file_name`] for an over-long value.
pub fn is_hashed_index_name(name: &str) -> bool {
    name.contains(HASHED_MARK)
}

/// Write `content` to `target`, which must not exist yet.
///
/// The bytes go to a temporary file in `scratch_dir` first and are then
/// hard-linked into place, so readers never see a partial record and an
/// existing target is reported as [`io::ErrorKind::AlreadyExists`].
pub fn write_new_file(scratch_dir: &Path, target: &Path, content: &[u8], sync: bool) -> io::Result<()> {
    let mut temp = tempfile::NamedTempFile::new_in(scratch_dir)?;
    temp.write_all(content)?;
    if sync {
        temp.as_file().sync_all()?;
    }
    fs::hard_link(temp.path(), target)
}

/// Create `path` exclusively and fill it with `content`.
pub fn create_exclusive(path: &Path, content: &[u8], sync: bool) -> io::Result<()> {
    let mut file = fs::OpenOptions::new().write(true).create_new(true).open(path)?;
    file.write_all(content)?;
    if sync {
        file.sync_all()?;
    }
    Ok(())
}
