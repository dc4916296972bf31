//! Filename validation for the flat storage namespace.

use std::path::{Component, Path, PathBuf};

use crate::error::{SessionError, SessionResult};
use crate::protocol::MAX_FILENAME_LEN;

use uuid::Uuid;

const TEMP_SUFFIX: &str = ".part";

/// Hex digits of the per-transfer tag in a temp name.
const TEMP_TAG_LEN: usize = 8;

/// Bytes a temp name adds to the final name: leading dot, `.<tag>` and suffix.
pub const TEMP_NAME_OVERHEAD: usize = 1 + 1 + TEMP_TAG_LEN + TEMP_SUFFIX.len();

/// Hidden sibling used while a transfer is in flight: `.<name>.<tag>.part`.
/// Every call picks a fresh tag, so concurrent transfers of one name never
/// share a file.
pub fn temp_path_for(dest: &Path) -> PathBuf {
    let name = dest
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tag = Uuid::new_v4().simple().to_string();
    dest.with_file_name(format!(".{}.{}{}", name, &tag[..TEMP_TAG_LEN], TEMP_SUFFIX))
}

pub fn is_temp_name(name: &str) -> bool {
    name.starts_with('.') && name.ends_with(TEMP_SUFFIX) && name.len() > 1 + TEMP_SUFFIX.len()
}

/// Check a peer-supplied filename: a single non-empty path component with no
/// separators, NUL or control characters.
pub fn validate_filename(name: &str) -> SessionResult<()> {
    if name.is_empty() {
        return Err(SessionError::Filesystem("empty filename".into()));
    }
    if name.len() > MAX_FILENAME_LEN {
        return Err(SessionError::Filesystem(format!(
            "filename longer than {} bytes",
            MAX_FILENAME_LEN
        )));
    }
    if name.contains(['/', '\\']) {
        return Err(SessionError::Filesystem(format!(
            "filename contains a path separator: {:?}",
            name
        )));
    }
    if name.chars().any(char::is_control) {
        return Err(SessionError::Filesystem(
            "filename contains control characters".into(),
        ));
    }
    if is_temp_name(name) {
        return Err(SessionError::Filesystem(format!(
            "filename is reserved for in-flight transfers: {:?}",
            name
        )));
    }
    // Windows ADS defense
    #[cfg(windows)]
    if name.contains(':') {
        return Err(SessionError::Filesystem(
            "filename contains colon (potential ADS attack)".into(),
        ));
    }
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        (Some(c), _) => Err(SessionError::Filesystem(format!(
            "filename contains disallowed component: {:?}",
            c
        ))),
        (None, _) => Err(SessionError::Filesystem("empty filename".into())),
    }
}

/// Resolve `name` to a path directly under `root`.
pub fn resolve_under_root(root: &Path, name: &str) -> SessionResult<PathBuf> {
    validate_filename(name)?;
    let joined = root.join(name);

    // A symlink inside the root must not lead outside it.
    if let Ok(canon) = joined.canonicalize() {
        let canon_root = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());
        if !canon.starts_with(&canon_root) {
            return Err(SessionError::Filesystem(format!(
                "{:?} escapes the storage root",
                name
            )));
        }
    }
    Ok(joined)
}

/// Resolve `name` to an existing regular file under `root`.
pub fn resolve_existing_file(root: &Path, name: &str) -> SessionResult<PathBuf> {
    let path = resolve_under_root(root, name)?;
    match std::fs::metadata(&path) {
        Ok(md) if md.is_file() => Ok(path),
        Ok(_) => Err(SessionError::Filesystem(format!(
            "{:?} is not a regular file",
            name
        ))),
        Err(e) => Err(SessionError::Filesystem(format!("{:?}: {}", name, e))),
    }
}
