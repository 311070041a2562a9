//! Registry of resource providers that brokers query to find datacenters.

use tracing::{debug, warn};

use crate::entity::{Entity, EntityId, Role};
use crate::error::KernelError;
use crate::event::Event;
use crate::kernel::KernelContext;
use crate::payload::{AckOutcome, Payload};
use crate::tag::Tag;

/// Name under which the information service registers.
pub const INFORMATION_SERVICE: &str = "information-service";

/// Keeps the list of registered datacenters.
#[derive(Debug, Default)]
pub struct InformationService {
    resources: Vec<EntityId>,
    ar_resources: Vec<EntityId>,
}

impl InformationService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every registered resource, in registration order.
    pub fn resources(&self) -> &[EntityId] {
        &self.resources
    }

    /// Resources that support advance reservation.
    pub fn ar_resources(&self) -> &[EntityId] {
        &self.ar_resources
    }

    fn register(&mut self, resource: EntityId, advance_reservation: bool) {
        if !self.resources.contains(&resource) {
            self.resources.push(resource);
        }
        if advance_reservation && !self.ar_resources.contains(&resource) {
            self.ar_resources.push(resource);
        }
    }
}

impl Entity for InformationService {
    fn role(&self) -> Role {
        Role::InformationService
    }

    fn on_event(&mut self, ctx: &mut KernelContext, event: &Event) {
        let outcome = match (event.tag, &event.payload) {
            (Tag::RegisterResource | Tag::RegisterResourceAr, Payload::Registration(reg)) => {
                let ar = event.tag == Tag::RegisterResourceAr;
                debug!(resource = %reg.resource, name = %reg.name, ar, "resource registered");
                self.register(reg.resource, ar);
                ctx.acknowledge(event, AckOutcome::Success).map(|_| ())
            }
            (Tag::ResourceList, Payload::Empty) => ctx
                .reply(event, Payload::ResourceList(self.resources.clone()))
                .map(|_| ()),
            (Tag::ResourceArList, Payload::Empty) => ctx
                .reply(event, Payload::ResourceList(self.ar_resources.clone()))
                .map(|_| ()),
            (tag, payload) => {
                warn!(tag = %tag, payload = %payload, "information service ignoring event");
                Err(KernelError::PayloadMismatch {
                    tag,
                    found: payload.kind().to_string(),
                })
            }
        };
        if let Err(e) = outcome {
            ctx.record(e);
        }
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}
