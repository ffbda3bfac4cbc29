//! Per-user key namespaces and file-name validation.
//!
//! Every object a user owns lives under `user_<id>/`. A [`FileName`] is always
//! a single path segment, so a key built from it cannot leave the namespace.

// lazy_regex! keeps the pattern in a once_cell static, validated at compile time
#![allow(clippy::non_std_lazy_statics)]

use super::error::RelayError;
use crate::config::MAX_FILE_NAME_LEN;
use lazy_regex::lazy_regex;
use std::fmt;

/// Characters an uploaded file name may keep as-is
static RE_UNSAFE_CHARS: lazy_regex::Lazy<regex::Regex> = lazy_regex!(r"[^A-Za-z0-9 _.\-]");

const FALLBACK_NAME: &str = "file";

/// Storage namespace of a single user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UserNamespace(i64);

impl UserNamespace {
    /// Namespace of the given Telegram user
    #[must_use]
    pub const fn new(user_id: i64) -> Self {
        Self(user_id)
    }

    /// Owning user id
    #[must_use]
    pub const fn user_id(self) -> i64 {
        self.0
    }

    /// Key prefix, e.g. `user_42/`
    #[must_use]
    pub fn prefix(self) -> String {
        format!("user_{}/", self.0)
    }

    /// Object key of `name` inside this namespace
    #[must_use]
    pub fn key_for(self, name: &FileName) -> String {
        format!("{}{}", self.prefix(), name.as_str())
    }

    /// Strips this namespace's prefix from `key`.
    ///
    /// Returns `None` for keys of other namespaces and for the bare prefix.
    #[must_use]
    pub fn strip<'a>(self, key: &'a str) -> Option<&'a str> {
        key.strip_prefix(&self.prefix())
            .filter(|name| !name.is_empty())
    }
}

/// A validated single-segment file name
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FileName(String);

impl FileName {
    /// Validates a name typed by the user.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::InvalidInput`] when the name is empty, too long,
    /// `.`/`..`, or contains a path separator or control character.
    pub fn parse(raw: &str) -> Result<Self, RelayError> {
        let name = raw.trim();
        if name.is_empty() {
            return Err(RelayError::InvalidInput("File name is missing.".into()));
        }
        if name.chars().count() > MAX_FILE_NAME_LEN {
            return Err(RelayError::InvalidInput(format!(
                "File name is longer than {MAX_FILE_NAME_LEN} characters."
            )));
        }
        if name == "." || name == ".." {
            return Err(RelayError::InvalidInput(format!(
                "'{name}' is not a file name."
            )));
        }
        if name.contains(['/', '\\']) || name.chars().any(char::is_control) {
            return Err(RelayError::InvalidInput(
                "File name must not contain path separators.".into(),
            ));
        }
        Ok(Self(name.to_string()))
    }

    /// Derives a safe name from an attachment's original name.
    ///
    /// Keeps only the basename, replaces characters outside
    /// `[A-Za-z0-9 _.-]` with `_` and shortens long names while keeping
    /// the extension. The result always passes [`FileName::parse`].
    #[must_use]
    pub fn sanitize(raw: &str) -> Self {
        let basename = raw.rsplit(['/', '\\']).next().unwrap_or_default();
        let cleaned = RE_UNSAFE_CHARS.replace_all(basename, "_");
        let trimmed = cleaned.trim();

        let name = if trimmed.len() > MAX_FILE_NAME_LEN {
            shorten_keeping_extension(trimmed).trim_end().to_string()
        } else {
            trimmed.to_string()
        };

        if name.is_empty() || name == "." || name == ".." {
            Self(FALLBACK_NAME.to_string())
        } else {
            Self(name)
        }
    }

    /// The name as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FileName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// Input is ASCII after sanitizing, so byte slicing is safe
fn shorten_keeping_extension(name: &str) -> String {
    match name.rfind('.') {
        Some(dot) if dot > 0 && name.len() - dot < MAX_FILE_NAME_LEN => {
            let ext = &name[dot..];
            let stem = &name[..MAX_FILE_NAME_LEN - ext.len()];
            format!("{stem}{ext}")
        }
        _ => name[..MAX_FILE_NAME_LEN].to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::ErrorKind;

    #[test]
    fn test_namespace_keys() -> Result<(), RelayError> {
        let ns = UserNamespace::new(42);
        assert_eq!(ns.prefix(), "user_42/");
        assert_eq!(ns.key_for(&FileName::parse("report.pdf")?), "user_42/report.pdf");
        Ok(())
    }

    #[test]
    fn test_strip_only_own_keys() {
        let ns = UserNamespace::new(4);
        assert_eq!(ns.strip("user_4/a.txt"), Some("a.txt"));
        assert_eq!(ns.strip("user_4/"), None);
        assert_eq!(ns.strip("user_42/a.txt"), None);
        assert_eq!(ns.strip("user_5/a.txt"), None);
    }

    #[test]
    fn test_parse_trims_and_keeps_spaces() -> Result<(), RelayError> {
        assert_eq!(FileName::parse("  my notes.txt ")?.as_str(), "my notes.txt");
        Ok(())
    }

    #[test]
    fn test_parse_rejects_traversal() {
        for raw in ["", "   ", ".", "..", "../user_1/secret", "a/b", "a\\b", "bad\nname"] {
            let err = FileName::parse(raw).err();
            assert_eq!(
                err.map(|e| e.kind()),
                Some(ErrorKind::InvalidInput),
                "{raw:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_parse_rejects_long_names() {
        let long = "a".repeat(MAX_FILE_NAME_LEN + 1);
        assert!(FileName::parse(&long).is_err());
        assert!(FileName::parse(&long[1..]).is_ok());
    }

    #[test]
    fn test_sanitize_replaces_unsafe_characters() {
        assert_eq!(FileName::sanitize("report (final).pdf").as_str(), "report _final_.pdf");
        assert_eq!(FileName::sanitize("/tmp/bot/video.mp4").as_str(), "video.mp4");
        assert_eq!(FileName::sanitize("..\\..\\evil.sh").as_str(), "evil.sh");
        assert_eq!(FileName::sanitize("отчёт.pdf").as_str(), "_____.pdf");
    }

    #[test]
    fn test_sanitize_falls_back_for_empty_names() {
        assert_eq!(FileName::sanitize("").as_str(), "file");
        assert_eq!(FileName::sanitize("..").as_str(), "file");
        assert_eq!(FileName::sanitize("dir/").as_str(), "file");
    }

    #[test]
    fn test_sanitize_shortens_but_keeps_extension() {
        let raw = format!("{}.mkv", "x".repeat(300));
        let name = FileName::sanitize(&raw);
        assert_eq!(name.as_str().len(), MAX_FILE_NAME_LEN);
        assert!(name.as_str().ends_with(".mkv"));
    }
}
