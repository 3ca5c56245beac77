//! Repository fetching and work area management.

pub mod cloner;
pub mod workarea;

pub use cloner::{CloneOptions, GitFetcher, SourceFetcher};
pub use workarea::{ScratchRoot, WorkArea};
