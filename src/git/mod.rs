//! Git integration layer.
//!
//! This module wraps the backend implementation (`git2_backend`) and
//! re-exports only what the client needs: cloning the working checkout,
//! committing pointer files and the DVC layout, pushing, and reading history.

mod git2_backend;

pub use git2_backend::{clone_checkout, commit_dirs, commit_paths, last_modified, push_head};
