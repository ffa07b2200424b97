// Resolution of `version` requests on download.

pub mod resolver;

pub use resolver::{FileIdentifier, ResolutionOutcome, VersionResolver};
