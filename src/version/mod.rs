//! Release catalog and driver version resolution
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │  Raw rows   │────▶│   Catalog   │◀────│  Resolver   │
//! │ (changelog) │     │ (immutable) │     │ (strategy)  │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!                                                │
//!                            ┌───────────────────┼───────────────────┐
//!                            ▼                   ▼                   ▼
//!                     ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//!                     │   Matcher   │     │   Release   │     │   Driver    │
//!                     │ (tokens)    │     │  (EKS ver)  │     │  packages   │
//!                     └─────────────┘     └─────────────┘     └─────────────┘
//! ```
//!
//! # Modules
//!
//! - [`token`]: Dotted numeric version tokens with precision-scoped comparison
//! - [`kubernetes`]: Kubernetes version ordering and the AL2 support window
//! - [`catalog`]: Immutable index of AMI releases
//! - [`matcher`]: Exact, major-only and fuzzy driver matching
//! - [`resolver`]: AMI-first and container-first strategies
//! - [`release`]: EKS `releaseVersion` rendering from regional builds
//! - [`driver_package`]: Container userspace package names and URLs
//! - [`repository`]: NVIDIA apt repository listings for package checks
//! - [`error`]: Error types for resolution and catalog rows

pub mod catalog;
pub mod driver_package;
pub mod error;
pub mod kubernetes;
pub mod matcher;
pub mod release;
pub mod repository;
pub mod resolver;
pub mod token;
