//! Collaborators that sit on top of the kernel: resource discovery,
//! datacenters, a broker, and the scenario that wires them together.
//!
//! None of these are privileged. They only use [`KernelContext`] like any
//! other entity would, which makes them a working reference for the
//! message protocol.
//!
//! # Module structure
//!
//! | Sub-module | Contents |
//! |---|---|
//! | [`information_service`] | [`InformationService`] |
//! | [`datacenter`] | [`Datacenter`] |
//! | [`broker`] | [`Broker`], [`Workload`], [`BrokerPhase`] |
//! | [`policy`] | [`AllocationPolicy`], [`ExecutionModel`] and bundled implementations |
//! | [`scenario`] | [`Scenario`] builder |
//!
//! [`KernelContext`]: crate::kernel::KernelContext

pub mod broker;
pub mod datacenter;
pub mod information_service;
pub mod policy;
pub mod scenario;

pub use broker::{Broker, BrokerPhase, Workload};
pub use datacenter::Datacenter;
pub use information_service::{InformationService, INFORMATION_SERVICE};
pub use policy::{AllocationPolicy, ExecutionModel, FirstFitPolicy, Host, MipsExecutionModel};
pub use scenario::Scenario;
