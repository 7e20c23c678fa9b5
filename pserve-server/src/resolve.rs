//! Request path resolution confined to the document root

use crate::server::RequestError;
use std::path::{Component, Path, PathBuf};

/// Resolve a request-supplied relative path against the document root.
///
/// `root` must already be canonicalized. The path is first normalized
/// lexically (`.`/`..`, absolute segments), then canonicalized so symlinks
/// are resolved before the containment check. Containment uses
/// `Path::starts_with`, which compares whole components, so a sibling
/// directory sharing the root's name as a string prefix never passes.
///
/// Only confinement and existence are checked here; whether the target is a
/// regular file is the caller's concern.
pub async fn resolve(root: &Path, rel: &str) -> Result<PathBuf, RequestError> {
    if rel.contains('\0') {
        return Err(RequestError::PathTraversal);
    }

    let mut normalized = PathBuf::new();
    for component in Path::new(rel.trim_start_matches('/')).components() {
        match component {
            Component::Normal(part) => normalized.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                // Popping past the start means the path escapes the root.
                if !normalized.pop() {
                    return Err(RequestError::PathTraversal);
                }
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(RequestError::PathTraversal);
            }
        }
    }

    let candidate = root.join(&normalized);
    let resolved = tokio::fs::canonicalize(&candidate)
        .await
        .map_err(|_| RequestError::NotFound)?;

    if !resolved.starts_with(root) {
        return Err(RequestError::PathTraversal);
    }

    Ok(resolved)
}
