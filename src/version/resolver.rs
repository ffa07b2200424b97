// Versioned-download resolution: maps (path, version) onto a file to serve.
//
// History of `dir/name.ext` is kept beside it as `dir/name_1.ext`,
// `dir/name_2.ext`, ... while `dir/name.ext` always holds the newest content.
// A client that cached version N of the file can ask for it again by number:
// historical versions are served directly, and the number one past the last
// archived version means "the canonical file".

use std::fmt;
use std::sync::Arc;

use tracing::{debug, info};

use crate::storage::traits::StorageProbe;

/// A requested path split into the part before the extension and the extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileIdentifier {
    pub base: String,
    pub extension: String,
}

impl FileIdentifier {
    /// Split at the last `.` of the final path element.
    ///
    /// The split is positional. Trimming the extension text off the end of the
    /// path would eat into names such as `docs.csv`, whose stem ends in
    /// characters that also occur in `.csv`.
    pub fn parse(path: &str) -> Self {
        let name_start = path.rfind('/').map_or(0, |i| i + 1);
        match path[name_start..].rfind('.') {
            Some(dot) => {
                let (base, extension) = path.split_at(name_start + dot);
                Self {
                    base: base.to_string(),
                    extension: extension.to_string(),
                }
            }
            None => Self {
                base: path.to_string(),
                extension: String::new(),
            },
        }
    }

    /// `base_<version>extension`
    pub fn versioned(&self, version: impl fmt::Display) -> String {
        format!("{}_{}{}", self.base, version, self.extension)
    }
}

/// Result of resolving a download request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolutionOutcome {
    /// Serve this exact path.
    ServeExact(String),
    /// The requested version is the current one; serve the canonical path.
    ServeLatest(String),
    NotFound,
}

impl ResolutionOutcome {
    pub fn path(&self) -> Option<&str> {
        match self {
            ResolutionOutcome::ServeExact(path) | ResolutionOutcome::ServeLatest(path) => {
                Some(path)
            }
            ResolutionOutcome::NotFound => None,
        }
    }
}

/// Numeric value of a version token. Anything that is not a non-negative
/// integer counts as 0, which no scan can ever match.
pub fn version_number(token: &str) -> u64 {
    token.parse().unwrap_or(0)
}

pub struct VersionResolver {
    probe: Arc<dyn StorageProbe>,
}

impl VersionResolver {
    pub fn new(probe: Arc<dyn StorageProbe>) -> Self {
        Self { probe }
    }

    /// Decide what to serve for `requested_path` at `version`.
    ///
    /// An absent or empty version serves the path unchanged. Never fails:
    /// every negative answer is `NotFound`.
    pub async fn resolve(&self, requested_path: &str, version: Option<&str>) -> ResolutionOutcome {
        let token = match version {
            Some(token) if !token.is_empty() => token,
            _ => return ResolutionOutcome::ServeExact(requested_path.to_string()),
        };

        let id = FileIdentifier::parse(requested_path);
        let direct = id.versioned(token);
        if self.probe.exists(&direct).await {
            debug!("version {} of {} found at {}", token, requested_path, direct);
            return ResolutionOutcome::ServeExact(direct);
        }

        info!("check if version {} is current version of {}", token, requested_path);
        let archived = self.count_contiguous_versions(&id).await;
        if version_number(token) == archived + 1 {
            ResolutionOutcome::ServeLatest(requested_path.to_string())
        } else {
            info!(
                "version {} of {} was not found (current is {})",
                token,
                requested_path,
                archived + 1
            );
            ResolutionOutcome::NotFound
        }
    }

    /// Number of archived versions `base_1.ext ..= base_n.ext` present without a gap.
    ///
    /// Probes run one at a time in increasing order and stop at the first miss.
    pub async fn count_contiguous_versions(&self, id: &FileIdentifier) -> u64 {
        let mut count = 0;
        while self.probe.exists(&id.versioned(count + 1)).await {
            count += 1;
        }
        count
    }

    /// Slot the current canonical content of `path` moves to when it is superseded.
    pub async fn next_version_path(&self, path: &str) -> String {
        let id = FileIdentifier::parse(path);
        let next = self.count_contiguous_versions(&id).await + 1;
        id.versioned(next)
    }
}
