//! Lifecycle agent library.
//!
//! The agent runs on a single-node cluster and turns it into a seed: a
//! captured image from which other clusters are upgraded.
//!
//! ## Architecture
//!
//! - **Controller**: watches the SeedGenerator singleton and triggers
//!   reconciles
//! - **Seed generation**: phase classification, validation, the
//!   compensating generation sequence and finalization
//! - **Recovery**: re-creates objects deleted before capture, at startup
//! - **Collaborators**: cluster access (`lca-cluster`), host commands
//!   ([`exec`]), health checks ([`health`]), each with a test double

pub mod cluster_info;
pub mod compensation;
pub mod config;
pub mod controller;
pub mod crd;
pub mod exec;
pub mod health;
pub mod imager;
pub mod recovery;
pub mod seedgen;
pub mod workspace;

pub use config::Config;
pub use controller::Requeue;
pub use crd::{SeedGenerator, SeedGeneratorSpec, SeedGeneratorStatus};
pub use seedgen::{Phase, SeedGenReconciler};
