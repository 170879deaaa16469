//! Path sandbox shared by the file tools.
//!
//! Every file tool resolves model-supplied paths against one base
//! directory and refuses anything that would land outside it. The check
//! is lexical: `..` components may never climb past the base, absolute
//! paths are reinterpreted as relative, and only text-like extensions
//! pass.

use std::ffi::OsStr;
use std::path::{Component, Path, PathBuf};

/// Extensions the file tools will touch. Everything else is assumed
/// binary. Files without any extension (Makefile, dotfiles) are allowed.
pub(crate) const ALLOWED_EXTENSIONS: &[&str] = &[
    ".txt",
    ".md",
    ".json",
    ".yaml",
    ".yml",
    ".csv",
    ".log",
    ".js",
    ".ts",
    ".mjs",
    ".cjs",
    ".html",
    ".css",
    ".xml",
    ".py",
    ".sh",
    ".bash",
    ".zsh",
    ".env",
    ".gitignore",
];

/// Whether a path's extension is on the allowlist.
pub(crate) fn is_allowed_extension(path: &Path) -> bool {
    match path.extension().and_then(OsStr::to_str) {
        None => true,
        Some(ext) => {
            let ext = ext.to_ascii_lowercase();
            ALLOWED_EXTENSIONS.iter().any(|allowed| allowed[1..] == ext)
        }
    }
}

/// Resolve a model-supplied path inside `base`.
///
/// Leading slashes are stripped so absolute-looking paths become
/// relative. Components are normalized lexically; a `..` that would
/// escape the base yields `None`.
pub(crate) fn resolve_in_base(base: &Path, raw: &str) -> Option<PathBuf> {
    let trimmed = raw.trim().trim_start_matches('/');

    let mut parts: Vec<&OsStr> = Vec::new();
    for component in Path::new(trimmed).components() {
        match component {
            Component::Normal(part) => parts.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                if parts.pop().is_none() {
                    return None;
                }
            }
            Component::RootDir | Component::Prefix(_) => return None,
        }
    }

    let mut path = base.to_path_buf();
    path.extend(parts);
    Some(path)
}

/// Render the base directory with the home directory folded to `~`.
pub(crate) fn display_base(base: &Path) -> String {
    let home = crabwire_config::dirs_home();
    match base.strip_prefix(&home) {
        Ok(rest) if rest.as_os_str().is_empty() => "~".to_string(),
        Ok(rest) => format!("~/{}", rest.display()),
        Err(_) => base.display().to_string(),
    }
}
