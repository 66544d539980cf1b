//! Sandboxed execution of index jobs.
//!
//! A job runs in two phases, both through a [`Commander`]:
//!
//! ```text
//! fetch:   git init → git fetch <clone-url> <commit> → git checkout <commit>
//! index:   docker run --rm -v <workspace>:/data <image> bash -c "<indexer> && src lsif upload ..."
//! ```
//!
//! The [`Workspace`] holding the checkout is removed when it goes out of
//! scope, and a failed or cancelled container run is force-removed.

pub mod commander;
pub mod fetch;
pub mod sandbox;
pub mod workspace;

pub use commander::{Commander, ProcessCommander};
pub use fetch::{fetch_repository, make_clone_url, validate_commit, validate_repository_name};
pub use sandbox::{index_script, Sandbox, SandboxConfig};
pub use workspace::Workspace;
