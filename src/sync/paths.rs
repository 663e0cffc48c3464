// Copyright PingCAP Inc. 2025.
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; version 2 of the License.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

use crate::storage::META_DIR;
use crate::sync::SyncError;
use std::path::{Path, PathBuf};

/// Normalize a client supplied project path to `a/b/c` form.
///
/// Rejects empty and absolute paths, drive prefixes, `..` segments, NUL
/// bytes and anything under the reserved metadata directory. `.` and empty
/// segments are dropped; `\` is treated as a separator.
pub fn normalize(raw: &str) -> Result<String, SyncError> {
    let invalid = |why: &str| SyncError::InvalidPath(format!("{raw:?}: {why}"));

    if raw.contains('\0') {
        return Err(invalid("contains NUL byte"));
    }
    let unified = raw.replace('\\', "/");
    if unified.starts_with('/') {
        return Err(invalid("absolute paths are not allowed"));
    }

    let mut parts = Vec::new();
    for segment in unified.split('/') {
        match segment {
            "" | "." => continue,
            ".." => return Err(invalid("path escapes the project directory")),
            s if parts.is_empty() && s.len() == 2 && s.ends_with(':') => {
                return Err(invalid("drive prefixes are not allowed"))
            }
            s => parts.push(s),
        }
    }

    match parts.first() {
        None => Err(invalid("empty path")),
        Some(&first) if first == META_DIR => Err(invalid("reserved directory")),
        Some(_) => Ok(parts.join("/")),
    }
}

/// Join a normalized path onto the project directory.
pub fn resolve(project_dir: &Path, normalized: &str) -> PathBuf {
    let mut path = project_dir.to_path_buf();
    for comp in normalized.split('/') {
        path.push(comp);
    }
    path
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_and_normalizes_relative_paths() {
        assert_eq!(normalize("data/a.geojson").unwrap(), "data/a.geojson");
        assert_eq!(normalize("./data//a.geojson").unwrap(), "data/a.geojson");
        assert_eq!(normalize("web\\components\\app.js").unwrap(), "web/components/app.js");
        assert_eq!(normalize("..data/x").unwrap(), "..data/x");
    }

    #[test]
    fn rejects_traversal_and_reserved_paths() {
        for bad in [
            "../x",
            "data/../../x",
            "data/..",
            "/etc/passwd",
            "\\server\\share",
            "C:/windows",
            "",
            "./",
            ".meta/files.json",
            "a\0b",
        ] {
            assert!(
                matches!(normalize(bad), Err(SyncError::InvalidPath(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn resolve_stays_inside_project() {
        let root = Path::new("/publish/alice/roads");
        let p = resolve(root, &normalize("data/a.geojson").unwrap());
        assert_eq!(p, Path::new("/publish/alice/roads/data/a.geojson"));
        assert!(p.starts_with(root));
    }
}
