//! Entities: independently addressed actors that talk only through events.
//!
//! # Module structure
//!
//! | Sub-module | Contents |
//! |---|---|
//! | [`id`] | [`EntityId`] newtype |
//! | [`traits`] | [`Entity`] trait, [`Role`] |
//! | [`registry`] | [`EntityRegistry`] |
//! | [`trace`] | [`TraceEntry`] and the replay digest |

pub mod id;
pub mod registry;
pub mod trace;
pub mod traits;

pub use id::EntityId;
pub use registry::EntityRegistry;
pub use trace::{hash_combine, trace_digest, TraceEntry};
pub use traits::{Entity, Role};
