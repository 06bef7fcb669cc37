//! Align NVIDIA driver versions between EKS GPU AMIs and container images.

pub mod changelog;
pub mod config;
pub mod nodegroup;
pub mod version;
