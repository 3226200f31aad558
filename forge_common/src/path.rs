//! Case-insensitive, forward-slash-normalized build paths.
//!
//! Identifiers that travel through the build graph, the package paths and
//! the archive catalogs all use this form. Validation rejects anything that
//! could escape a root or collide with a DOS device name on Windows hosts.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use crate::error::{Error, Result};

const RESERVED_NAMES: &[&str] = &[
    "con", "prn", "aux", "nul", "com1", "com2", "com3", "com4", "com5", "com6", "com7", "com8",
    "com9", "lpt1", "lpt2", "lpt3", "lpt4", "lpt5", "lpt6", "lpt7", "lpt8", "lpt9",
];

const EXTRA_CHARS: &[u8] = b"_-. +~#()";

/// A validated build path.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BuildPath(String);

impl BuildPath {
    /// Normalizes (`\` to `/`, ASCII lowercase) and validates `path`.
    pub fn new(path: &str) -> Result<Self> {
        let normalized = normalize(path);

        if !is_valid_path(&normalized) {
            return Err(Error::InvalidPath(path.to_owned()));
        }

        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn join(&self, tail: &BuildPath) -> BuildPath {
        BuildPath(format!("{}/{}", self.0, tail.0))
    }

    pub fn join_str(&self, tail: &str) -> Result<BuildPath> {
        let tail = BuildPath::new(tail)?;
        Ok(self.join(&tail))
    }

    pub fn components(&self) -> impl Iterator<Item = &str> {
        self.0.split('/')
    }

    /// Splits off the first component; `None` if the path has only one.
    pub fn split_first(&self) -> Option<(&str, &str)> {
        self.0.split_once('/')
    }

    pub fn file_name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }

    pub fn file_stem(&self) -> &str {
        let name = self.file_name();
        match name.rfind('.') {
            Some(0) | None => name,
            Some(pos) => &name[..pos],
        }
    }

    pub fn extension(&self) -> Option<&str> {
        let name = self.file_name();
        match name.rfind('.') {
            Some(0) | None => None,
            Some(pos) => Some(&name[pos + 1..]),
        }
    }

    pub fn parent(&self) -> Option<BuildPath> {
        self.0
            .rsplit_once('/')
            .map(|(head, _)| BuildPath(head.to_owned()))
    }
}

impl Display for BuildPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl AsRef<str> for BuildPath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for BuildPath {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

pub fn normalize(path: &str) -> String {
    path.chars()
        .map(|c| match c {
            '\\' => '/',
            c => c.to_ascii_lowercase(),
        })
        .collect()
}

/// Validates an already-normalized path.
pub fn is_valid_path(path: &str) -> bool {
    !path.is_empty() && path.split('/').all(is_valid_component)
}

fn is_valid_component(component: &str) -> bool {
    let bytes = component.as_bytes();

    let Some((&first, _)) = bytes.split_first() else {
        return false;
    };
    let last = bytes[bytes.len() - 1];

    if first == b' ' || last == b' ' || last == b'.' {
        return false;
    }

    if RESERVED_NAMES.contains(&component) {
        return false;
    }

    let mut prev = 0u8;
    for &c in bytes {
        if c == b'.' && prev == b'.' {
            return false;
        }

        let valid = c.is_ascii_lowercase() || c.is_ascii_digit() || EXTRA_CHARS.contains(&c);
        if !valid {
            return false;
        }

        prev = c;
    }

    true
}

#[cfg(test)]
mod tests {
    use super::{is_valid_path, BuildPath};

    #[test]
    fn accepts_normal_paths() {
        for path in [
            "textures/stone.png",
            "a/b/c.txt",
            "file with space.dat",
            "wip~#(1)/x.rpl",
            "com10/ok",
        ] {
            assert!(BuildPath::new(path).is_ok(), "{path}");
        }
    }

    #[test]
    fn normalizes_case_and_separators() {
        let path = BuildPath::new("Textures\\Stone.PNG").unwrap();
        assert_eq!(path.as_str(), "textures/stone.png");
    }

    #[test]
    fn rejects_bad_paths() {
        for path in [
            "",
            "a//b",
            "/leading",
            "trailing/",
            "a/../b",
            "..",
            "con",
            "sub/NUL/x",
            "com1/y",
            "ends. ",
            "ends.",
            "ends ",
            " starts",
            "questionable?",
            "col:on",
            "star*",
            "qu\"ote",
            "pip|e",
            "uni\u{e9}",
        ] {
            assert!(BuildPath::new(path).is_err(), "{path}");
        }
    }

    #[test]
    fn reserved_names_match_whole_component_only() {
        assert!(is_valid_path("console/log.txt"));
        assert!(is_valid_path("aux2"));
        assert!(!is_valid_path("logs/aux"));
    }

    #[test]
    fn name_helpers() {
        let path = BuildPath::new("rpll/g_3/pipelines.rpl").unwrap();
        assert_eq!(path.file_name(), "pipelines.rpl");
        assert_eq!(path.file_stem(), "pipelines");
        assert_eq!(path.extension(), Some("rpl"));
        assert_eq!(path.parent().unwrap().as_str(), "rpll/g_3");
        assert_eq!(path.split_first(), Some(("rpll", "g_3/pipelines.rpl")));

        let bare = BuildPath::new(".hidden").unwrap();
        assert_eq!(bare.extension(), None);
        assert_eq!(bare.file_stem(), ".hidden");
    }
}
