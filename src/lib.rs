//! Kubernetes operator for Cluster API providers
//!
//! Watches `CoreProvider`, `BootstrapProvider`, `ControlPlaneProvider` and
//! `InfrastructureProvider` objects and installs, upgrades or removes the
//! provider components they describe.
//!
//! # Modules
//!
//! - [`controller`] - reconcile loop shared by the four provider kinds
//! - [`events`] - Kubernetes Events published on provider objects
//! - [`error`] - reconcile error type
//!
//! The pipeline itself lives in `capi-operator-phases`; repositories in
//! `capi-operator-repository`; CRDs and shared utilities in
//! `capi-operator-common`.

#![deny(missing_docs)]

pub mod controller;
pub mod error;
pub mod events;

pub use error::ReconcileError;

/// Reporting component on published Events
pub const CONTROLLER_NAME: &str = "capi-operator";
