//! Node-group configuration drafts
//!
//! - [`draft`]: `create-nodegroup` documents, templates and overrides
//! - [`extract`]: Rewrite an existing node group against a resolved release
//! - [`inspect`]: Report the driver a running node group ships
//! - [`aws`]: AWS SDK collaborators (cluster version, node groups, SSM)
//! - [`error`]: Error types for drafts, the CLI and extraction

pub mod aws;
pub mod draft;
pub mod error;
pub mod extract;
pub mod inspect;

pub use draft::{NodegroupConfigDraft, NodegroupOverrides};
pub use extract::{NodegroupDescription, NodegroupExtractor};
pub use inspect::{Inspection, inspect};
