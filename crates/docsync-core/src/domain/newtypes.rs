//! Domain newtypes with validation
//!
//! This module provides strongly-typed wrappers for paths, identifiers and
//! digests. Each newtype ensures data validity at construction time.
//!
//! ## Path model
//!
//! Three path flavours meet in the reconciliation core:
//!
//! - [`PathPrefix`] - the absolute local root; persisted so stored paths
//!   survive a relocation of the synchronized folder
//! - [`RelativePath`] - the normalized, slash-separated key every cache
//!   record and triplet is indexed by
//! - [`RemotePath`] - the repository-side hierarchical path

use std::fmt::{self, Display, Formatter};
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::errors::DomainError;

// ============================================================================
// RelativePath
// ============================================================================

/// A normalized path relative to the synchronized root
///
/// The representation is OS-independent:
/// - segments are separated by `/`
/// - no leading or trailing separator
/// - no empty, `.` or `..` segments
///
/// The empty path denotes the root itself.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RelativePath(String);

impl RelativePath {
    /// Create a new RelativePath from its normalized string form
    ///
    /// # Errors
    /// Returns `DomainError::InvalidPath` if any segment is empty, `.`, `..`
    /// or contains a backslash or NUL byte.
    pub fn new(path: impl Into<String>) -> Result<Self, DomainError> {
        let path = path.into();
        if path.is_empty() {
            return Ok(Self::root());
        }

        for segment in path.split('/') {
            Self::validate_segment(segment).map_err(|_| {
                DomainError::InvalidPath(format!("Invalid segment in '{path}': '{segment}'"))
            })?;
        }

        Ok(Self(path))
    }

    /// The synchronized root itself
    #[must_use]
    pub fn root() -> Self {
        Self(String::new())
    }

    /// Whether this path denotes the root
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// Get the inner string reference
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Append one segment
    ///
    /// # Errors
    /// Returns error if `name` is not a single valid segment
    pub fn join(&self, name: &str) -> Result<Self, DomainError> {
        Self::validate_segment(name)
            .map_err(|_| DomainError::InvalidPath(format!("Invalid path component: {name}")))?;

        if self.is_root() {
            Ok(Self(name.to_string()))
        } else {
            Ok(Self(format!("{}/{}", self.0, name)))
        }
    }

    /// The parent path, or `None` for the root
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        if self.is_root() {
            return None;
        }
        match self.0.rfind('/') {
            Some(pos) => Some(Self(self.0[..pos].to_string())),
            None => Some(Self::root()),
        }
    }

    /// The last segment, or `""` for the root
    #[must_use]
    pub fn file_name(&self) -> &str {
        match self.0.rfind('/') {
            Some(pos) => &self.0[pos + 1..],
            None => &self.0,
        }
    }

    /// Number of segments (0 for the root)
    #[must_use]
    pub fn depth(&self) -> usize {
        if self.is_root() {
            0
        } else {
            self.0.split('/').count()
        }
    }

    /// Whether `self` lies strictly below `ancestor`
    #[must_use]
    pub fn is_descendant_of(&self, ancestor: &RelativePath) -> bool {
        if ancestor.is_root() {
            return !self.is_root();
        }
        self.0.len() > ancestor.0.len()
            && self.0.starts_with(&ancestor.0)
            && self.0.as_bytes()[ancestor.0.len()] == b'/'
    }

    /// Re-key this path after `from` was moved to `to`
    ///
    /// Returns `None` when `self` is neither `from` nor one of its descendants.
    #[must_use]
    pub fn rebase(&self, from: &RelativePath, to: &RelativePath) -> Option<Self> {
        if self == from {
            return Some(to.clone());
        }
        if !self.is_descendant_of(from) {
            return None;
        }
        let rest = if from.is_root() {
            self.0.as_str()
        } else {
            &self.0[from.0.len() + 1..]
        };
        if to.is_root() {
            Some(Self(rest.to_string()))
        } else {
            Some(Self(format!("{}/{}", to.0, rest)))
        }
    }

    /// A sibling path with the same parent and a different last segment
    ///
    /// # Errors
    /// Returns error for the root or an invalid name
    pub fn with_file_name(&self, name: &str) -> Result<Self, DomainError> {
        let parent = self
            .parent()
            .ok_or_else(|| DomainError::InvalidPath("The root has no siblings".to_string()))?;
        parent.join(name)
    }

    fn validate_segment(segment: &str) -> Result<(), ()> {
        if segment.is_empty()
            || segment == "."
            || segment == ".."
            || segment.contains('/')
            || segment.contains('\\')
            || segment.contains('\0')
        {
            return Err(());
        }
        Ok(())
    }
}

impl Display for RelativePath {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            write!(f, "/")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

impl FromStr for RelativePath {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for RelativePath {
    type Error = DomainError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<RelativePath> for String {
    fn from(path: RelativePath) -> Self {
        path.0
    }
}

// ============================================================================
// PathPrefix
// ============================================================================

/// The absolute local root that [`RelativePath`]s are anchored to
///
/// PathPrefix ensures the path is:
/// - Absolute
/// - Lexically normalized (no `.` or `..` components)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "PathBuf", into = "PathBuf")]
pub struct PathPrefix(PathBuf);

impl PathPrefix {
    /// Create a new PathPrefix, validating it is absolute
    ///
    /// # Errors
    /// Returns `DomainError::InvalidPath` if the path is not absolute or
    /// escapes the filesystem root
    pub fn new(path: PathBuf) -> Result<Self, DomainError> {
        if !path.is_absolute() {
            return Err(DomainError::InvalidPath(format!(
                "Path must be absolute: {}",
                path.display()
            )));
        }

        // We don't use fs::canonicalize() as the root might not exist yet
        Ok(Self(normalize_path(&path)?))
    }

    /// Get the inner path reference
    #[must_use]
    pub fn as_path(&self) -> &Path {
        &self.0
    }

    /// Strip the prefix from an absolute local path
    ///
    /// # Errors
    /// Returns error if `path` is not within this prefix or contains
    /// non-UTF-8 segments
    pub fn normalize(&self, path: &Path) -> Result<RelativePath, DomainError> {
        let normalized = normalize_path(path)?;
        let rest = normalized.strip_prefix(&self.0).map_err(|_| {
            DomainError::PathNotInSyncRoot(format!(
                "{} is not within {}",
                path.display(),
                self.0.display()
            ))
        })?;

        let mut relative = RelativePath::root();
        for component in rest.components() {
            let Component::Normal(segment) = component else {
                return Err(DomainError::InvalidPath(format!(
                    "Unexpected component in {}",
                    path.display()
                )));
            };
            let segment = segment.to_str().ok_or_else(|| {
                DomainError::InvalidPath(format!("Non UTF-8 path: {}", path.display()))
            })?;
            relative = relative.join(segment)?;
        }
        Ok(relative)
    }

    /// Rebuild the absolute local path of a normalized path
    #[must_use]
    pub fn denormalize(&self, path: &RelativePath) -> PathBuf {
        let mut absolute = self.0.clone();
        if !path.is_root() {
            for segment in path.as_str().split('/') {
                absolute.push(segment);
            }
        }
        absolute
    }
}

/// Normalize a path by resolving `.` and `..` components
fn normalize_path(path: &Path) -> Result<PathBuf, DomainError> {
    let mut normalized = PathBuf::new();

    for component in path.components() {
        match component {
            Component::Prefix(p) => normalized.push(p.as_os_str()),
            Component::RootDir => normalized.push(Component::RootDir.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() {
                    return Err(DomainError::InvalidPath(
                        "Path escapes root via ..".to_string(),
                    ));
                }
            }
            Component::Normal(c) => normalized.push(c),
        }
    }

    Ok(normalized)
}

impl Display for PathPrefix {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

impl TryFrom<PathBuf> for PathPrefix {
    type Error = DomainError;

    fn try_from(path: PathBuf) -> Result<Self, Self::Error> {
        Self::new(path)
    }
}

impl From<PathPrefix> for PathBuf {
    fn from(prefix: PathPrefix) -> Self {
        prefix.0
    }
}

impl AsRef<Path> for PathPrefix {
    fn as_ref(&self) -> &Path {
        &self.0
    }
}

// ============================================================================
// RemotePath
// ============================================================================

/// A repository path (must start with /)
///
/// Represents hierarchical paths on the remote side, e.g.
/// "/Sites/team/documentLibrary/report.odt".
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RemotePath(String);

impl RemotePath {
    /// Create a new RemotePath
    ///
    /// # Errors
    /// Returns error if the path doesn't start with / or has a trailing /
    pub fn new(path: String) -> Result<Self, DomainError> {
        if !path.starts_with('/') {
            return Err(DomainError::InvalidRemotePath(format!(
                "Remote path must start with /: {path}"
            )));
        }

        if path.len() > 1 && path.ends_with('/') {
            return Err(DomainError::InvalidRemotePath(format!(
                "Remote path must not end with /: {path}"
            )));
        }

        if path.contains("//") {
            return Err(DomainError::InvalidRemotePath(format!(
                "Remote path contains an empty segment: {path}"
            )));
        }

        Ok(Self(path))
    }

    /// The repository root "/"
    #[must_use]
    pub fn root() -> Self {
        Self("/".to_string())
    }

    /// Get the inner string reference
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Join a single name to this path
    ///
    /// # Errors
    /// Returns error if the component contains a separator
    pub fn join(&self, component: &str) -> Result<Self, DomainError> {
        if component.is_empty() || component.contains('/') {
            return Err(DomainError::InvalidRemotePath(format!(
                "Invalid path component: {component}"
            )));
        }

        if self.0 == "/" {
            Self::new(format!("/{component}"))
        } else {
            Self::new(format!("{}/{component}", self.0))
        }
    }

    /// Map a normalized local path onto this remote folder
    #[must_use]
    pub fn resolve(&self, path: &RelativePath) -> Self {
        if path.is_root() {
            self.clone()
        } else if self.0 == "/" {
            Self(format!("/{}", path.as_str()))
        } else {
            Self(format!("{}/{}", self.0, path.as_str()))
        }
    }

    /// The path of `self` relative to `root`, or `None` when `self` lies
    /// outside of it
    #[must_use]
    pub fn relative_to(&self, root: &RemotePath) -> Option<RelativePath> {
        if self == root {
            return Some(RelativePath::root());
        }
        let rest = if root.0 == "/" {
            self.0.strip_prefix('/')?
        } else {
            self.0.strip_prefix(root.0.as_str())?.strip_prefix('/')?
        };
        RelativePath::new(rest).ok()
    }

    /// Get the parent path
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        if self.0 == "/" {
            return None;
        }

        match self.0.rfind('/') {
            Some(0) => Some(Self::root()),
            Some(pos) => Some(Self(self.0[..pos].to_string())),
            None => None,
        }
    }

    /// Get the final component of the path
    #[must_use]
    pub fn file_name(&self) -> Option<&str> {
        if self.0 == "/" {
            return None;
        }
        self.0.rsplit('/').next()
    }
}

impl Display for RemotePath {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RemotePath {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.to_string())
    }
}

impl TryFrom<String> for RemotePath {
    type Error = DomainError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<RemotePath> for String {
    fn from(path: RemotePath) -> Self {
        path.0
    }
}

// ============================================================================
// Opaque remote values
// ============================================================================

/// Repository object identifier (opaque, non-empty)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RemoteId(String);

impl RemoteId {
    /// Create a new RemoteId
    ///
    /// # Errors
    /// Returns error if the ID is empty or contains whitespace
    pub fn new(id: impl Into<String>) -> Result<Self, DomainError> {
        let id = id.into();
        if id.is_empty() {
            return Err(DomainError::InvalidRemoteId(
                "Remote ID cannot be empty".to_string(),
            ));
        }

        if id.chars().any(char::is_whitespace) {
            return Err(DomainError::InvalidRemoteId(format!(
                "Remote ID contains whitespace: {id}"
            )));
        }

        Ok(Self(id))
    }

    /// Get the inner string reference
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for RemoteId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RemoteId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for RemoteId {
    type Error = DomainError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<RemoteId> for String {
    fn from(id: RemoteId) -> Self {
        id.0
    }
}

/// SHA-256 content digest, lowercase hex encoded
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Checksum(String);

impl Checksum {
    /// Length of a hex-encoded SHA-256 digest
    const HEX_LEN: usize = 64;

    /// Create a new Checksum
    ///
    /// # Errors
    /// Returns error if the value is not 64 lowercase hex characters
    pub fn new(hash: impl Into<String>) -> Result<Self, DomainError> {
        let hash = hash.into();
        if hash.len() != Self::HEX_LEN {
            return Err(DomainError::InvalidChecksum(format!(
                "expected {} hex characters, got {}",
                Self::HEX_LEN,
                hash.len()
            )));
        }

        if !hash
            .chars()
            .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
        {
            return Err(DomainError::InvalidChecksum(format!(
                "not lowercase hex: {hash}"
            )));
        }

        Ok(Self(hash))
    }

    /// Get the inner string reference
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for Checksum {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Checksum {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for Checksum {
    type Error = DomainError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<Checksum> for String {
    fn from(hash: Checksum) -> Self {
        hash.0
    }
}

/// Change-feed cursor issued by the repository
///
/// The token is opaque. An empty token is valid: some servers report it
/// when they keep no change history yet.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChangeCursor(String);

impl ChangeCursor {
    /// Wrap a server-issued token
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Get the inner string reference
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the server reported no change history
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Display for ChangeCursor {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
