//! Recording library module
//!
//! Everything derived from the files the pipeline leaves on disk:
//! - the recording index (listing, pagination, delete/rename)
//! - the thumbnail matcher pairing recordings with periodic snapshots

pub mod index;
pub mod thumbnail;

pub use index::{LibraryError, Page, RecordingEntry};
