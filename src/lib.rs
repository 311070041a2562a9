//! # Cirrus: Deterministic Cloud Simulation Kernel
//!
//! A discrete-event dispatch kernel for simulating cloud datacenters.
//! Entities (information service, datacenters, brokers) never call each
//! other: they exchange tagged, timestamped events, and a virtual clock
//! advances strictly by event time. Same inputs, same trace.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │                 Kernel                    │ ← step / run, end-of-run rules
//! │  ┌──────────────┐   ┌──────────────────┐  │
//! │  │ FutureEvent  │   │  EntityRegistry   │  │ ← (time, id) order / id → entity
//! │  │    Queue     │   └──────────────────┘  │
//! │  └──────────────┘   ┌──────────────────┐  │
//! │                     │  AckCorrelator    │  │ ← request ↔ acknowledgement
//! │                     └──────────────────┘  │
//! └───────────────┬──────────────────────────┘
//!                 │ KernelContext
//!   ┌─────────────┼───────────────┐
//!   ▼             ▼               ▼
//! InformationService  Datacenter ──▶ VmRecord / CloudletRecord
//!                     Broker
//! ```
//!
//! | Module | Contents |
//! |---|---|
//! | [`time`] | [`VirtualTime`] |
//! | [`tag`] | [`Tag`] catalog, reply tags, sender/receiver roles |
//! | [`payload`] | [`Payload`] shapes and identifiers |
//! | [`event`] | [`Event`], [`Envelope`], [`EventHandle`] |
//! | [`queue`] | [`FutureEventQueue`] |
//! | [`ack`] | [`AckCorrelator`] |
//! | [`entity`] | [`Entity`] trait and [`EntityRegistry`] |
//! | [`kernel`] | [`Kernel`], [`KernelContext`], [`RunReport`] |
//! | [`lifecycle`] | VM and cloudlet state machines |
//! | [`cloud`] | bundled collaborators and [`Scenario`] |
//! | [`config`] | TOML-loadable configuration |

pub mod ack;
pub mod cloud;
pub mod config;
pub mod entity;
pub mod error;
pub mod event;
pub mod kernel;
pub mod lifecycle;
pub mod payload;
pub mod queue;
pub mod tag;
pub mod time;

// Re-exports for convenience.
pub use ack::{AckCorrelator, AckId, AckStatus};
pub use cloud::{Broker, Datacenter, InformationService, Scenario};
pub use config::{KernelConfig, ScenarioConfig};
pub use entity::{Entity, EntityId, EntityRegistry, Role};
pub use error::{KernelError, KernelResult};
pub use event::{Envelope, Event, EventHandle, EventId};
pub use kernel::{EndReason, Kernel, KernelContext, RunReport};
pub use lifecycle::{CloudletState, VmState};
pub use payload::Payload;
pub use queue::FutureEventQueue;
pub use tag::{CustomTag, Tag};
pub use time::VirtualTime;
