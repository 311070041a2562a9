//! Resource provider: hosts VMs and runs cloudlets on them.
//!
//! Every state change goes through the lifecycle records, so a request
//! that arrives in the wrong state is refused with a failure
//! acknowledgement and a diagnostic instead of corrupting the record.
//! Timed follow-ups (boot, migration, cloudlet start/finish) are internal
//! `VM_DATACENTER_EVENT`s whose handles are kept so that pause, cancel,
//! move and destroy can withdraw them.
//!
//! Records belong to a broker. Creation and submission file them under the
//! owner named in the spec; later requests address the sender's records.

use std::collections::{BTreeMap, HashMap};

use tracing::{debug, info, warn};

use super::information_service::INFORMATION_SERVICE;
use super::policy::{AllocationPolicy, ExecutionModel, FirstFitPolicy, Host, MipsExecutionModel};
use crate::config::DatacenterConfig;
use crate::entity::{hash_combine, Entity, EntityId, Role};
use crate::error::KernelError;
use crate::event::{Event, EventHandle};
use crate::kernel::KernelContext;
use crate::lifecycle::{CloudletRecord, CloudletState, VmRecord, VmState};
use crate::payload::{
    AckOutcome, CloudletId, CloudletSnapshot, CloudletSpec, DataFile, DatacenterEvent,
    FailureReason, HostId, Payload, ResourceCharacteristics, ResourceRegistration, Subject, VmId,
    VmSpec,
};
use crate::tag::Tag;

/// Why a request was turned down.
#[derive(Debug)]
enum Refusal {
    /// Expected outcome (no room, missing file); answered but not diagnosed.
    Declined(FailureReason),
    /// Protocol error; answered and recorded.
    Error(KernelError),
}

impl From<KernelError> for Refusal {
    fn from(e: KernelError) -> Self {
        Refusal::Error(e)
    }
}

fn unknown(subject: Subject, tag: Tag) -> Refusal {
    Refusal::Error(KernelError::UnknownSubject { subject, tag })
}

type Handled = Result<(), Refusal>;

/// Brokers number their own VMs and cloudlets, so records are keyed by owner.
type VmKey = (EntityId, VmId);
type CloudletKey = (EntityId, CloudletId);

/// A datacenter entity.
pub struct Datacenter {
    name: String,
    config: DatacenterConfig,
    hosts: Vec<Host>,
    policy: Box<dyn AllocationPolicy>,
    model: Box<dyn ExecutionModel>,
    vms: BTreeMap<VmKey, VmRecord>,
    cloudlets: BTreeMap<CloudletKey, CloudletRecord>,
    files: BTreeMap<String, DataFile>,
    /// Pending boot or migration completion per VM.
    vm_timers: HashMap<VmKey, EventHandle>,
    /// Pending start, finish or rebound per cloudlet.
    cloudlet_timers: HashMap<CloudletKey, EventHandle>,
}

impl Datacenter {
    /// A datacenter with first-fit placement and MIPS-based execution.
    pub fn new(name: impl Into<String>, config: DatacenterConfig) -> Self {
        let hosts = config
            .hosts
            .iter()
            .enumerate()
            .map(|(i, h)| Host::new(HostId::new(i as u32), h))
            .collect();
        Datacenter {
            name: name.into(),
            config,
            hosts,
            policy: Box::new(FirstFitPolicy),
            model: Box::new(MipsExecutionModel),
            vms: BTreeMap::new(),
            cloudlets: BTreeMap::new(),
            files: BTreeMap::new(),
            vm_timers: HashMap::new(),
            cloudlet_timers: HashMap::new(),
        }
    }

    pub fn with_policy(mut self, policy: Box<dyn AllocationPolicy>) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_execution_model(mut self, model: Box<dyn ExecutionModel>) -> Self {
        self.model = model;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn hosts(&self) -> &[Host] {
        &self.hosts
    }

    pub fn vm(&self, owner: EntityId, id: VmId) -> Option<&VmRecord> {
        self.vms.get(&(owner, id))
    }

    pub fn vms(&self) -> impl Iterator<Item = &VmRecord> {
        self.vms.values()
    }

    pub fn cloudlet(&self, owner: EntityId, id: CloudletId) -> Option<&CloudletRecord> {
        self.cloudlets.get(&(owner, id))
    }

    pub fn cloudlets(&self) -> impl Iterator<Item = &CloudletRecord> {
        self.cloudlets.values()
    }

    pub fn has_file(&self, name: &str) -> bool {
        self.files.contains_key(name)
    }

    fn host_mut(&mut self, id: HostId) -> Option<&mut Host> {
        self.hosts.get_mut(id.raw() as usize)
    }

    fn characteristics(&self, ctx: &KernelContext) -> ResourceCharacteristics {
        ResourceCharacteristics {
            resource: ctx.self_id(),
            name: self.name.clone(),
            hosts: self.hosts.len(),
            total_pes: self.hosts.iter().map(|h| h.pes).sum(),
            free_pes: self.hosts.iter().map(|h| h.free_pes()).sum(),
            vms: self.vms.values().filter(|v| !v.state().is_terminal()).count(),
        }
    }

    /// Time the remaining work of `key` takes on its bound VM.
    fn duration_of(&self, key: CloudletKey) -> f64 {
        let Some(record) = self.cloudlets.get(&key) else {
            return 0.0;
        };
        match record.vm().and_then(|vm| self.vms.get(&(key.0, vm))) {
            Some(vm) => self
                .model
                .duration(&record.spec, record.remaining_length(), &vm.spec),
            None => 0.0,
        }
    }

    fn withdraw_cloudlet_timer(&mut self, ctx: &mut KernelContext, key: CloudletKey) {
        if let Some(timer) = self.cloudlet_timers.remove(&key) {
            ctx.cancel(timer);
        }
    }

    fn arm_cloudlet_timer(
        &mut self,
        ctx: &mut KernelContext,
        key: CloudletKey,
        delay: f64,
        event: DatacenterEvent,
    ) -> Handled {
        let timer = ctx.schedule_self(Tag::VmDatacenterEvent, delay, Payload::Datacenter(event))?;
        self.cloudlet_timers.insert(key, timer);
        Ok(())
    }

    fn return_cloudlet(ctx: &mut KernelContext, record: &CloudletRecord) {
        let result = record.result(ctx.now());
        ctx.schedule_now(Tag::CloudletReturn, record.spec.owner, Payload::CloudletReturn(result));
    }

    // ── VMs ───────────────────────────────────────────────

    fn create_vm(&mut self, ctx: &mut KernelContext, event: &Event, spec: &VmSpec) -> Handled {
        let key = (spec.owner, spec.id);
        if let Some(existing) = self.vms.get(&key) {
            // Kept records have left Requested, so creating one again is rejected.
            existing.expect_state(Tag::VmCreate, &[VmState::Requested])?;
        }
        let mut record = VmRecord::new(spec.clone());
        let placed = self
            .policy
            .select_host(&self.hosts, spec)
            .filter(|id| self.host_mut(*id).is_some_and(|h| h.allocate(spec)));

        let Some(host) = placed else {
            record.reject()?;
            self.vms.insert(key, record);
            return Err(Refusal::Declined(FailureReason::NoResources));
        };
        record.place(host)?;
        self.vms.insert(key, record);
        let timer = ctx.schedule_self(
            Tag::VmDatacenterEvent,
            self.config.vm_boot_delay,
            Payload::Datacenter(DatacenterEvent::VmBooted(spec.owner, spec.id)),
        )?;
        self.vm_timers.insert(key, timer);
        debug!(datacenter = %self.name, vm = %spec.id, host = %host, "vm placed");
        acknowledge(ctx, event, AckOutcome::Success);
        Ok(())
    }

    fn destroy_vm(&mut self, ctx: &mut KernelContext, event: &Event, vm: VmId) -> Handled {
        let key = (event.source, vm);
        let record = self
            .vms
            .get_mut(&key)
            .ok_or_else(|| unknown(Subject::Vm(vm), Tag::VmDestroy))?;
        let released = record.destroy()?;
        let spec = record.spec.clone();
        if let Some(host) = released.and_then(|h| self.host_mut(h)) {
            host.release(&spec);
        }
        if let Some(timer) = self.vm_timers.remove(&key) {
            ctx.cancel(timer);
        }

        let bound: Vec<CloudletKey> = self
            .cloudlets
            .iter()
            .filter(|(k, c)| k.0 == key.0 && c.vm() == Some(vm) && !c.state().is_terminal())
            .map(|(k, _)| *k)
            .collect();
        for bound_key in bound {
            self.withdraw_cloudlet_timer(ctx, bound_key);
            if let Some(record) = self.cloudlets.get_mut(&bound_key) {
                record.fail(Tag::VmDestroy, ctx.now())?;
                Self::return_cloudlet(ctx, record);
            }
        }
        debug!(datacenter = %self.name, vm = %vm, "vm destroyed");
        acknowledge(ctx, event, AckOutcome::Success);
        Ok(())
    }

    fn migrate_vm(
        &mut self,
        ctx: &mut KernelContext,
        event: &Event,
        vm: VmId,
        target: HostId,
    ) -> Handled {
        let key = (event.source, vm);
        let record = self
            .vms
            .get_mut(&key)
            .ok_or_else(|| unknown(Subject::Vm(vm), Tag::VmMigrate))?;
        // Target must be another host with room for the VM.
        let fits = record.host() != Some(target)
            && self
                .hosts
                .get(target.raw() as usize)
                .is_some_and(|h| h.fits(&record.spec));
        if !fits && record.state() == VmState::Running {
            return Err(Refusal::Declined(FailureReason::NoResources));
        }
        record.begin_migration(target)?;
        let spec = record.spec.clone();
        if let Some(host) = self.host_mut(target) {
            host.allocate(&spec);
        }

        let delay = self.config.migration_delay;
        let timer = ctx.schedule_self(
            Tag::VmDatacenterEvent,
            delay,
            Payload::Datacenter(DatacenterEvent::MigrationComplete(key.0, vm)),
        )?;
        self.vm_timers.insert(key, timer);
        debug!(datacenter = %self.name, vm = %vm, target = %target, "migration started");
        if let Err(e) = ctx.acknowledge_after(event, AckOutcome::Success, delay) {
            ctx.record(e);
        }
        Ok(())
    }

    fn boot_vm(&mut self, key: VmKey) -> Handled {
        self.vm_timers.remove(&key);
        let record = self
            .vms
            .get_mut(&key)
            .ok_or_else(|| unknown(Subject::Vm(key.1), Tag::VmDatacenterEvent))?;
        record.boot()?;
        Ok(())
    }

    fn finish_migration(&mut self, key: VmKey) -> Handled {
        self.vm_timers.remove(&key);
        let record = self
            .vms
            .get_mut(&key)
            .ok_or_else(|| unknown(Subject::Vm(key.1), Tag::VmDatacenterEvent))?;
        let previous = record.complete_migration()?;
        let spec = record.spec.clone();
        if let Some(host) = previous.and_then(|h| self.host_mut(h)) {
            host.release(&spec);
        }
        debug!(datacenter = %self.name, vm = %key.1, "migration complete");
        Ok(())
    }

    // ── Storage ───────────────────────────────────────────

    fn add_file(&mut self, ctx: &mut KernelContext, event: &Event, file: &DataFile) -> Handled {
        if self.files.contains_key(&file.name) {
            return Err(Refusal::Declined(FailureReason::AlreadyExists));
        }
        self.files.insert(file.name.clone(), file.clone());
        acknowledge(ctx, event, AckOutcome::Success);
        Ok(())
    }

    fn delete_file(&mut self, ctx: &mut KernelContext, event: &Event, name: &str) -> Handled {
        if self.files.remove(name).is_none() {
            return Err(Refusal::Declined(FailureReason::UnknownSubject));
        }
        acknowledge(ctx, event, AckOutcome::Success);
        Ok(())
    }

    // ── Cloudlets ─────────────────────────────────────────

    fn submit_cloudlet(
        &mut self,
        ctx: &mut KernelContext,
        event: &Event,
        spec: &CloudletSpec,
        vm: VmId,
    ) -> Handled {
        let key = (spec.owner, spec.id);
        if let Some(existing) = self.cloudlets.get(&key) {
            existing.expect_state(Tag::CloudletSubmit, &[CloudletState::Created])?;
        }
        let mut record = CloudletRecord::new(spec.clone());
        let usable = self
            .vms
            .get(&(spec.owner, vm))
            .is_some_and(|v| v.state().accepts_work());
        if !usable {
            record.fail(Tag::CloudletSubmit, ctx.now())?;
            Self::return_cloudlet(ctx, &record);
            self.cloudlets.insert(key, record);
            return Err(Refusal::Declined(FailureReason::VmUnavailable(vm)));
        }
        record.submit(vm)?;
        self.cloudlets.insert(key, record);
        let start = DatacenterEvent::CloudletStart(spec.owner, spec.id);
        self.arm_cloudlet_timer(ctx, key, 0.0, start)?;
        acknowledge(ctx, event, AckOutcome::Success);
        Ok(())
    }

    /// Start (or restart after a move) execution on the bound VM.
    fn start_cloudlet(&mut self, ctx: &mut KernelContext, key: CloudletKey) -> Handled {
        self.cloudlet_timers.remove(&key);
        let duration = self.duration_of(key);
        let record = self
            .cloudlets
            .get_mut(&key)
            .ok_or_else(|| unknown(Subject::Cloudlet(key.1), Tag::VmDatacenterEvent))?;
        record.start(ctx.now(), duration)?;
        let finish = DatacenterEvent::CloudletFinish(key.0, key.1);
        self.arm_cloudlet_timer(ctx, key, duration, finish)
    }

    fn finish_cloudlet(&mut self, ctx: &mut KernelContext, key: CloudletKey) -> Handled {
        self.cloudlet_timers.remove(&key);
        let record = self
            .cloudlets
            .get_mut(&key)
            .ok_or_else(|| unknown(Subject::Cloudlet(key.1), Tag::VmDatacenterEvent))?;
        record.finish(ctx.now())?;
        debug!(datacenter = %self.name, cloudlet = %key.1, "cloudlet finished");
        Self::return_cloudlet(ctx, record);
        Ok(())
    }

    fn cancel_cloudlet(&mut self, ctx: &mut KernelContext, event: &Event, id: CloudletId) -> Handled {
        let key = (event.source, id);
        let record = self
            .cloudlets
            .get_mut(&key)
            .ok_or_else(|| unknown(Subject::Cloudlet(id), Tag::CloudletCancel))?;
        record.cancel(ctx.now())?;
        let snapshot = record.snapshot();
        self.withdraw_cloudlet_timer(ctx, key);
        ctx.reply(event, Payload::CloudletStatus(snapshot))?;
        Ok(())
    }

    fn pause_cloudlet(&mut self, ctx: &mut KernelContext, event: &Event, id: CloudletId) -> Handled {
        let key = (event.source, id);
        let record = self
            .cloudlets
            .get_mut(&key)
            .ok_or_else(|| unknown(Subject::Cloudlet(id), Tag::CloudletPause))?;
        record.pause(ctx.now())?;
        self.withdraw_cloudlet_timer(ctx, key);
        acknowledge(ctx, event, AckOutcome::Success);
        Ok(())
    }

    fn resume_cloudlet(&mut self, ctx: &mut KernelContext, event: &Event, id: CloudletId) -> Handled {
        let key = (event.source, id);
        let duration = self.duration_of(key);
        let record = self
            .cloudlets
            .get_mut(&key)
            .ok_or_else(|| unknown(Subject::Cloudlet(id), Tag::CloudletResume))?;
        record.resume(ctx.now(), duration)?;
        let finish = DatacenterEvent::CloudletFinish(key.0, id);
        self.arm_cloudlet_timer(ctx, key, duration, finish)?;
        acknowledge(ctx, event, AckOutcome::Success);
        Ok(())
    }

    fn move_cloudlet(
        &mut self,
        ctx: &mut KernelContext,
        event: &Event,
        id: CloudletId,
        vm: VmId,
    ) -> Handled {
        let key = (event.source, id);
        let usable = self
            .vms
            .get(&(key.0, vm))
            .is_some_and(|v| v.state().accepts_work());
        let record = self
            .cloudlets
            .get_mut(&key)
            .ok_or_else(|| unknown(Subject::Cloudlet(id), Tag::CloudletMove))?;
        if !usable && !record.state().is_terminal() {
            return Err(Refusal::Declined(FailureReason::VmUnavailable(vm)));
        }
        record.move_to(vm, ctx.now())?;
        self.withdraw_cloudlet_timer(ctx, key);
        let delay = self.config.cloudlet_move_delay;
        self.arm_cloudlet_timer(ctx, key, delay, DatacenterEvent::CloudletRebound(key.0, id))?;
        acknowledge(ctx, event, AckOutcome::Success);
        Ok(())
    }

    fn cloudlet_status(&self, ctx: &mut KernelContext, event: &Event, id: CloudletId) -> Handled {
        let snapshot = self
            .cloudlets
            .get(&(event.source, id))
            .map(CloudletRecord::snapshot)
            .unwrap_or(CloudletSnapshot {
                cloudlet: id,
                state: None,
                vm: None,
            });
        ctx.reply(event, Payload::CloudletStatus(snapshot))?;
        Ok(())
    }

    fn on_internal(&mut self, ctx: &mut KernelContext, internal: &DatacenterEvent) -> Handled {
        match internal {
            DatacenterEvent::VmBooted(owner, vm) => self.boot_vm((*owner, *vm)),
            DatacenterEvent::MigrationComplete(owner, vm) => self.finish_migration((*owner, *vm)),
            DatacenterEvent::CloudletStart(owner, id)
            | DatacenterEvent::CloudletRebound(owner, id) => self.start_cloudlet(ctx, (*owner, *id)),
            DatacenterEvent::CloudletFinish(owner, id) => self.finish_cloudlet(ctx, (*owner, *id)),
        }
    }

    fn refuse(&self, ctx: &mut KernelContext, event: &Event, refusal: Refusal) {
        let reason = match refusal {
            Refusal::Declined(reason) => {
                debug!(datacenter = %self.name, tag = %event.tag, %reason, "request declined");
                reason
            }
            Refusal::Error(error) => {
                let reason = match &error {
                    KernelError::InvalidTransition { from, .. } => {
                        FailureReason::InvalidState(from.clone())
                    }
                    KernelError::UnknownSubject { .. } => FailureReason::UnknownSubject,
                    _ => FailureReason::MalformedRequest,
                };
                ctx.record(error);
                reason
            }
        };
        acknowledge(ctx, event, AckOutcome::Failure(reason));
    }
}

/// Resolve the sender's acknowledgement, if it asked for one.
fn acknowledge(ctx: &mut KernelContext, event: &Event, outcome: AckOutcome) {
    if let Err(e) = ctx.acknowledge(event, outcome) {
        ctx.record(e);
    }
}

impl Entity for Datacenter {
    fn role(&self) -> Role {
        Role::Datacenter
    }

    fn on_start(&mut self, ctx: &mut KernelContext) {
        let Some(gis) = ctx.lookup(INFORMATION_SERVICE) else {
            warn!(datacenter = %self.name, "no information service to register with");
            return;
        };
        let tag = if self.config.advance_reservation {
            Tag::RegisterResourceAr
        } else {
            Tag::RegisterResource
        };
        let registration = ResourceRegistration {
            resource: ctx.self_id(),
            name: self.name.clone(),
        };
        ctx.schedule_now(tag, gis, Payload::Registration(registration));
        info!(datacenter = %self.name, hosts = self.hosts.len(), "datacenter started");
    }

    fn on_event(&mut self, ctx: &mut KernelContext, event: &Event) {
        let handled = match (event.tag, &event.payload) {
            (Tag::ResourceCharacteristicsRequest, _) => {
                let characteristics = self.characteristics(ctx);
                ctx.reply(event, Payload::Characteristics(characteristics))
                    .map(|_| ())
                    .map_err(Refusal::from)
            }
            (Tag::VmCreate, Payload::VmCreate(spec)) => self.create_vm(ctx, event, spec),
            (Tag::VmDestroy, Payload::Vm(vm)) => self.destroy_vm(ctx, event, *vm),
            (Tag::VmMigrate, Payload::VmMigrate { vm, host }) => {
                self.migrate_vm(ctx, event, *vm, *host)
            }
            (Tag::VmDataAdd, Payload::File(file)) => self.add_file(ctx, event, file),
            (Tag::VmDataDel, Payload::FileName(name)) => self.delete_file(ctx, event, name),
            (Tag::CloudletSubmit, Payload::CloudletSubmit { cloudlet, vm }) => {
                self.submit_cloudlet(ctx, event, cloudlet, *vm)
            }
            (Tag::CloudletCancel, Payload::Cloudlet(id)) => self.cancel_cloudlet(ctx, event, *id),
            (Tag::CloudletPause, Payload::Cloudlet(id)) => self.pause_cloudlet(ctx, event, *id),
            (Tag::CloudletResume, Payload::Cloudlet(id)) => self.resume_cloudlet(ctx, event, *id),
            (Tag::CloudletMove, Payload::CloudletMove { cloudlet, vm }) => {
                self.move_cloudlet(ctx, event, *cloudlet, *vm)
            }
            (Tag::CloudletStatus, Payload::Cloudlet(id)) => self.cloudlet_status(ctx, event, *id),
            (Tag::VmDatacenterEvent, Payload::Datacenter(internal)) => {
                self.on_internal(ctx, internal)
            }
            (tag, payload) => Err(Refusal::Error(KernelError::PayloadMismatch {
                tag,
                found: payload.kind().to_string(),
            })),
        };
        if let Err(refusal) = handled {
            self.refuse(ctx, event, refusal);
        }
    }

    fn on_shutdown(&mut self, _ctx: &mut KernelContext) {
        let returned = self
            .cloudlets
            .values()
            .filter(|c| c.state() == CloudletState::Returned)
            .count();
        info!(
            datacenter = %self.name,
            vms = self.vms.len(),
            cloudlets = self.cloudlets.len(),
            returned,
            "datacenter shut down"
        );
    }

    fn has_pending_work(&self) -> bool {
        self.cloudlets.values().any(|c| !c.state().is_terminal())
    }

    fn state_hash(&self) -> u64 {
        let mut h = 0u64;
        for ((owner, id), vm) in &self.vms {
            h = hash_combine(h, owner.raw() as u64);
            h = hash_combine(h, id.raw() as u64);
            h = hash_combine(h, vm.state() as u64);
        }
        for ((owner, id), cloudlet) in &self.cloudlets {
            h = hash_combine(h, owner.raw() as u64);
            h = hash_combine(h, id.raw() as u64);
            h = hash_combine(h, cloudlet.state() as u64);
        }
        hash_combine(h, self.files.len() as u64)
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}
