//! etcdadm bootstrap CRD Definitions
//!
//! Kubernetes Custom Resource Definitions for the etcdadm bootstrap controller.

pub mod conditions;
pub mod etcdadm_config;

pub use conditions::*;
pub use etcdadm_config::*;
