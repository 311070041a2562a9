//! A broker acting for one user: discovers datacenters, creates VMs,
//! spreads cloudlets over them and tears everything down at the end.
//!
//! ```text
//! RESOURCE_LIST ─▶ RESOURCE_CHARACTERISTICS_REQUEST (each datacenter)
//!        ─▶ VM_CREATE (first datacenter, then the next for VMs that failed)
//!        ─▶ CLOUDLET_SUBMIT (round-robin) ─▶ CLOUDLET_RETURN (all)
//!        ─▶ VM_DESTROY ─▶ END_OF_SIMULATION
//! ```
//!
//! Every request that expects an answer is opened through the kernel's
//! correlator; the broker keeps what to do next in a continuation table
//! keyed by the returned `AckId`.

use std::collections::{BTreeMap, HashMap};

use tracing::{debug, info, warn};

use super::information_service::INFORMATION_SERVICE;
use crate::ack::{AckId, AckStatus};
use crate::config::{BrokerConfig, CloudletTemplate, ScenarioConfig, VmTemplate};
use crate::entity::{hash_combine, Entity, EntityId, Role};
use crate::error::KernelResult;
use crate::event::{Event, EventHandle};
use crate::kernel::KernelContext;
use crate::payload::{
    AckOutcome, AckReply, BrokerEvent, CloudletId, CloudletResult, CloudletSpec, FailureReason,
    Payload, ResourceCharacteristics, Subject, VmId, VmSpec,
};
use crate::tag::Tag;

/// What the broker submits.
#[derive(Debug, Clone, PartialEq)]
pub struct Workload {
    pub vms: usize,
    pub cloudlets: usize,
    pub vm: VmTemplate,
    pub cloudlet: CloudletTemplate,
}

impl Workload {
    pub fn from_config(config: &ScenarioConfig) -> Self {
        Workload {
            vms: config.vms,
            cloudlets: config.cloudlets,
            vm: config.vm.clone(),
            cloudlet: config.cloudlet.clone(),
        }
    }
}

impl Default for Workload {
    fn default() -> Self {
        Workload::from_config(&ScenarioConfig::default())
    }
}

/// Where the broker is in its workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerPhase {
    Discovering,
    Characterizing,
    CreatingVms,
    Running,
    Releasing,
    Done,
}

/// What to do when an acknowledgement comes back.
#[derive(Debug, Clone, PartialEq)]
enum Continuation {
    ResourceList,
    Characteristics(EntityId),
    VmCreate { vm: VmId, datacenter: EntityId },
    CloudletSubmit(CloudletId),
    VmDestroy(VmId),
}

/// The bundled broker entity.
pub struct Broker {
    config: BrokerConfig,
    workload: Workload,
    phase: BrokerPhase,
    datacenters: Vec<EntityId>,
    characteristics: BTreeMap<EntityId, ResourceCharacteristics>,
    /// Index into the answering datacenters of the next one to try.
    next_datacenter: usize,
    pending: BTreeMap<AckId, Continuation>,
    deadlines: HashMap<AckId, EventHandle>,
    awaiting: usize,
    placements: BTreeMap<VmId, EntityId>,
    submitted: usize,
    results: Vec<CloudletResult>,
}

impl Broker {
    pub fn new(config: BrokerConfig, workload: Workload) -> Self {
        Broker {
            config,
            workload,
            phase: BrokerPhase::Discovering,
            datacenters: Vec::new(),
            characteristics: BTreeMap::new(),
            next_datacenter: 0,
            pending: BTreeMap::new(),
            deadlines: HashMap::new(),
            awaiting: 0,
            placements: BTreeMap::new(),
            submitted: 0,
            results: Vec::new(),
        }
    }

    pub fn phase(&self) -> BrokerPhase {
        self.phase
    }

    /// Datacenters named by the information service.
    pub fn datacenters(&self) -> &[EntityId] {
        &self.datacenters
    }

    pub fn characteristics(&self, datacenter: EntityId) -> Option<&ResourceCharacteristics> {
        self.characteristics.get(&datacenter)
    }

    /// VMs that were created, and where.
    pub fn placements(&self) -> &BTreeMap<VmId, EntityId> {
        &self.placements
    }

    pub fn submitted(&self) -> usize {
        self.submitted
    }

    /// Returned cloudlets, in arrival order.
    pub fn results(&self) -> &[CloudletResult] {
        &self.results
    }

    // ── Sending ───────────────────────────────────────────

    /// Send a request and remember what to do with its answer.
    fn request(
        &mut self,
        ctx: &mut KernelContext,
        tag: Tag,
        destination: EntityId,
        payload: Payload,
        then: Continuation,
    ) -> KernelResult<()> {
        let (_, ack) = ctx.request(tag, destination, 0.0, payload)?;
        self.pending.insert(ack, then);
        self.awaiting += 1;
        if let Some(timeout) = self.config.ack_timeout {
            let deadline = ctx.schedule_self(
                Tag::VmBrokerEvent,
                timeout,
                Payload::Broker(BrokerEvent::AckDeadline(ack)),
            )?;
            self.deadlines.insert(ack, deadline);
        }
        Ok(())
    }

    /// Answering datacenters, in the order the information service gave.
    fn candidates(&self) -> Vec<EntityId> {
        self.datacenters
            .iter()
            .filter(|dc| self.characteristics.contains_key(dc))
            .copied()
            .collect()
    }

    fn create_vms(&mut self, ctx: &mut KernelContext, datacenter: EntityId) -> KernelResult<()> {
        self.phase = BrokerPhase::CreatingVms;
        let missing: Vec<VmId> = (0..self.workload.vms as u32)
            .map(VmId::new)
            .filter(|vm| !self.placements.contains_key(vm))
            .collect();
        debug!(datacenter = %datacenter, vms = missing.len(), "requesting vms");
        for vm in missing {
            let spec = VmSpec {
                id: vm,
                owner: ctx.self_id(),
                mips: self.workload.vm.mips,
                pes: self.workload.vm.pes,
                ram_mb: self.workload.vm.ram_mb,
            };
            self.request(
                ctx,
                Tag::VmCreate,
                datacenter,
                Payload::VmCreate(spec),
                Continuation::VmCreate { vm, datacenter },
            )?;
        }
        Ok(())
    }

    /// Decide what follows a finished round of VM creation.
    fn after_vm_round(&mut self, ctx: &mut KernelContext) -> KernelResult<()> {
        if self.placements.len() < self.workload.vms {
            if let Some(&next) = self.candidates().get(self.next_datacenter) {
                self.next_datacenter += 1;
                return self.create_vms(ctx, next);
            }
        }
        if self.placements.is_empty() {
            warn!(wanted = self.workload.vms, "no vm could be created");
            return self.finish(ctx);
        }
        self.submit_cloudlets(ctx)
    }

    fn submit_cloudlets(&mut self, ctx: &mut KernelContext) -> KernelResult<()> {
        self.phase = BrokerPhase::Running;
        let vms: Vec<(VmId, EntityId)> = self.placements.iter().map(|(v, d)| (*v, *d)).collect();
        for i in 0..self.workload.cloudlets {
            let (vm, datacenter) = vms[i % vms.len()];
            let id = CloudletId::new(i as u32);
            let payload = Payload::CloudletSubmit {
                cloudlet: CloudletSpec {
                    id,
                    owner: ctx.self_id(),
                    length: self.workload.cloudlet.length,
                    pes: self.workload.cloudlet.pes,
                },
                vm,
            };
            if self.config.request_acks {
                self.request(
                    ctx,
                    Tag::CloudletSubmit,
                    datacenter,
                    payload,
                    Continuation::CloudletSubmit(id),
                )?;
            } else {
                ctx.schedule_now(Tag::CloudletSubmit, datacenter, payload);
            }
            self.submitted += 1;
        }
        info!(cloudlets = self.submitted, vms = vms.len(), "cloudlets submitted");
        if self.submitted == 0 {
            return self.release_vms(ctx);
        }
        Ok(())
    }

    fn release_vms(&mut self, ctx: &mut KernelContext) -> KernelResult<()> {
        self.phase = BrokerPhase::Releasing;
        let vms: Vec<(VmId, EntityId)> = self.placements.iter().map(|(v, d)| (*v, *d)).collect();
        for (vm, datacenter) in vms {
            if self.config.request_acks {
                self.request(
                    ctx,
                    Tag::VmDestroy,
                    datacenter,
                    Payload::Vm(vm),
                    Continuation::VmDestroy(vm),
                )?;
            } else {
                ctx.schedule_now(Tag::VmDestroy, datacenter, Payload::Vm(vm));
            }
        }
        if self.awaiting == 0 {
            return self.finish(ctx);
        }
        Ok(())
    }

    fn finish(&mut self, ctx: &mut KernelContext) -> KernelResult<()> {
        self.phase = BrokerPhase::Done;
        info!(
            returned = self.results.len(),
            submitted = self.submitted,
            vms = self.placements.len(),
            "broker done"
        );
        if self.config.end_when_done {
            ctx.end_simulation(0.0)?;
        }
        Ok(())
    }

    // ── Receiving ─────────────────────────────────────────

    fn on_reply(&mut self, ctx: &mut KernelContext, ack: AckId, event: &Event) -> KernelResult<()> {
        let Some(then) = self.pending.remove(&ack) else {
            debug!(ack = %ack, tag = %event.tag, "reply without continuation");
            return Ok(());
        };
        self.awaiting = self.awaiting.saturating_sub(1);
        if let Some(deadline) = self.deadlines.remove(&ack) {
            ctx.cancel(deadline);
        }
        let outcome = match &event.payload {
            Payload::Ack(reply) => reply.outcome.clone(),
            _ => AckOutcome::Success,
        };

        match then {
            Continuation::ResourceList => {
                if let Payload::ResourceList(ids) = &event.payload {
                    self.datacenters = ids.clone();
                }
                if self.datacenters.is_empty() {
                    warn!(%outcome, "no datacenter available");
                    return self.finish(ctx);
                }
                self.phase = BrokerPhase::Characterizing;
                for dc in self.datacenters.clone() {
                    self.request(
                        ctx,
                        Tag::ResourceCharacteristicsRequest,
                        dc,
                        Payload::Empty,
                        Continuation::Characteristics(dc),
                    )?;
                }
            }
            Continuation::Characteristics(dc) => {
                match &event.payload {
                    Payload::Characteristics(c) => {
                        self.characteristics.insert(dc, c.clone());
                    }
                    _ => warn!(datacenter = %dc, %outcome, "no characteristics"),
                }
                if self.awaiting == 0 {
                    return self.after_vm_round(ctx);
                }
            }
            Continuation::VmCreate { vm, datacenter } => {
                if outcome.is_success() {
                    self.placements.insert(vm, datacenter);
                } else {
                    debug!(vm = %vm, datacenter = %datacenter, %outcome, "vm creation failed");
                }
                if self.awaiting == 0 {
                    return self.after_vm_round(ctx);
                }
            }
            Continuation::CloudletSubmit(id) => {
                if !outcome.is_success() {
                    debug!(cloudlet = %id, %outcome, "submission refused");
                }
            }
            Continuation::VmDestroy(vm) => {
                if !outcome.is_success() {
                    warn!(vm = %vm, %outcome, "vm destruction failed");
                }
                if self.awaiting == 0 && self.phase == BrokerPhase::Releasing {
                    return self.finish(ctx);
                }
            }
        }
        Ok(())
    }

    fn on_return(&mut self, ctx: &mut KernelContext, result: &CloudletResult) -> KernelResult<()> {
        debug!(cloudlet = %result.cloudlet, state = %result.state, "cloudlet returned");
        self.results.push(result.clone());
        if self.phase == BrokerPhase::Running && self.results.len() >= self.submitted {
            return self.release_vms(ctx);
        }
        Ok(())
    }

    /// Give up on `ack` if it is still open by resolving it ourselves.
    fn on_deadline(&mut self, ctx: &mut KernelContext, ack: AckId) -> KernelResult<()> {
        self.deadlines.remove(&ack);
        if ctx.ack_status(ack) != AckStatus::Pending {
            return Ok(());
        }
        let target = ctx
            .pending_ack(ack)
            .map(|p| p.target)
            .unwrap_or(EntityId::KERNEL);
        warn!(ack = %ack, target = %target, "acknowledgement timed out");
        let reply = AckReply::failure(Subject::Resource(target), FailureReason::TimedOut);
        ctx.resolve(
            ack,
            AckOutcome::Failure(FailureReason::TimedOut),
            Payload::Ack(reply),
            0.0,
        )?;
        Ok(())
    }
}

impl Entity for Broker {
    fn role(&self) -> Role {
        Role::Broker
    }

    fn on_start(&mut self, ctx: &mut KernelContext) {
        let Some(gis) = ctx.lookup(INFORMATION_SERVICE) else {
            warn!("no information service; broker has nothing to do");
            self.phase = BrokerPhase::Done;
            return;
        };
        if let Err(e) = self.request(ctx, Tag::ResourceList, gis, Payload::Empty, Continuation::ResourceList) {
            ctx.record(e);
        }
    }

    fn on_event(&mut self, ctx: &mut KernelContext, event: &Event) {
        let handled = match (event.tag, &event.payload) {
            (Tag::VmBrokerEvent, Payload::Broker(BrokerEvent::AckDeadline(ack))) => {
                self.on_deadline(ctx, *ack)
            }
            (Tag::CloudletReturn, Payload::CloudletReturn(result)) => self.on_return(ctx, result),
            _ => match event.reply_to() {
                Some(ack) => self.on_reply(ctx, ack, event),
                None => {
                    debug!(tag = %event.tag, payload = %event.payload, "broker ignoring event");
                    Ok(())
                }
            },
        };
        if let Err(e) = handled {
            ctx.record(e);
        }
    }

    fn on_shutdown(&mut self, _ctx: &mut KernelContext) {
        info!(
            phase = ?self.phase,
            returned = self.results.len(),
            open_requests = self.pending.len(),
            "broker shut down"
        );
    }

    fn has_pending_work(&self) -> bool {
        self.phase != BrokerPhase::Done
    }

    fn state_hash(&self) -> u64 {
        let mut h = hash_combine(self.phase as u64, self.submitted as u64);
        for (vm, dc) in &self.placements {
            h = hash_combine(h, vm.raw() as u64);
            h = hash_combine(h, dc.raw() as u64);
        }
        for result in &self.results {
            h = hash_combine(h, result.cloudlet.raw() as u64);
            h = hash_combine(h, result.state as u64);
        }
        h
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}
