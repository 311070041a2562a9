//! Collaborator seams of a datacenter: where VMs go and how long work takes.

use crate::config::HostConfig;
use crate::payload::{CloudletSpec, HostId, VmSpec};

// ── Hosts ─────────────────────────────────────────────────────────────

/// Capacity bookkeeping for one physical host.
#[derive(Debug, Clone, PartialEq)]
pub struct Host {
    pub id: HostId,
    pub pes: u32,
    pub mips: f64,
    pub ram_mb: u64,
    free_pes: u32,
    free_ram_mb: u64,
}

impl Host {
    pub fn new(id: HostId, config: &HostConfig) -> Self {
        Host {
            id,
            pes: config.pes,
            mips: config.mips,
            ram_mb: config.ram_mb,
            free_pes: config.pes,
            free_ram_mb: config.ram_mb,
        }
    }

    pub fn free_pes(&self) -> u32 {
        self.free_pes
    }

    pub fn free_ram_mb(&self) -> u64 {
        self.free_ram_mb
    }

    /// Whether `vm` fits in what is left.
    pub fn fits(&self, vm: &VmSpec) -> bool {
        vm.pes <= self.free_pes && vm.ram_mb <= self.free_ram_mb && vm.mips <= self.mips
    }

    /// Reserve room for `vm`. Returns `false` without changing anything
    /// if it does not fit.
    pub fn allocate(&mut self, vm: &VmSpec) -> bool {
        if !self.fits(vm) {
            return false;
        }
        self.free_pes -= vm.pes;
        self.free_ram_mb -= vm.ram_mb;
        true
    }

    pub fn release(&mut self, vm: &VmSpec) {
        self.free_pes = (self.free_pes + vm.pes).min(self.pes);
        self.free_ram_mb = (self.free_ram_mb + vm.ram_mb).min(self.ram_mb);
    }
}

// ── Allocation ────────────────────────────────────────────────────────

/// Decides which host receives a new VM.
pub trait AllocationPolicy {
    /// Pick a host for `vm`, or `None` when nothing fits.
    fn select_host(&mut self, hosts: &[Host], vm: &VmSpec) -> Option<HostId>;
}

/// First host with enough free capacity, in host order.
#[derive(Debug, Clone, Copy, Default)]
pub struct FirstFitPolicy;

impl AllocationPolicy for FirstFitPolicy {
    fn select_host(&mut self, hosts: &[Host], vm: &VmSpec) -> Option<HostId> {
        hosts.iter().find(|h| h.fits(vm)).map(|h| h.id)
    }
}

// ── Execution ─────────────────────────────────────────────────────────

/// Decides how long a cloudlet runs.
pub trait ExecutionModel {
    /// Simulated seconds to execute `remaining_length` million
    /// instructions of `cloudlet` on `vm`.
    fn duration(&self, cloudlet: &CloudletSpec, remaining_length: f64, vm: &VmSpec) -> f64;
}

/// Work divided by the VM's aggregate speed over the PEs the cloudlet
/// can use.
#[derive(Debug, Clone, Copy, Default)]
pub struct MipsExecutionModel;

impl ExecutionModel for MipsExecutionModel {
    fn duration(&self, cloudlet: &CloudletSpec, remaining_length: f64, vm: &VmSpec) -> f64 {
        let pes = cloudlet.pes.min(vm.pes).max(1) as f64;
        let rate = vm.mips * pes;
        if rate > 0.0 && remaining_length > 0.0 {
            remaining_length / rate
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntityId;
    use crate::payload::{CloudletId, VmId};

    fn vm(pes: u32, mips: f64) -> VmSpec {
        VmSpec {
            id: VmId::new(0),
            owner: EntityId::new(1),
            mips,
            pes,
            ram_mb: 1024,
        }
    }

    fn hosts() -> Vec<Host> {
        let small = HostConfig {
            pes: 1,
            mips: 1000.0,
            ram_mb: 4096,
        };
        let big = HostConfig {
            pes: 8,
            mips: 2000.0,
            ram_mb: 4096,
        };
        vec![Host::new(HostId::new(0), &small), Host::new(HostId::new(1), &big)]
    }

    #[test]
    fn test_first_fit_skips_full_hosts() {
        let hosts = hosts();
        let mut policy = FirstFitPolicy;
        assert_eq!(policy.select_host(&hosts, &vm(1, 500.0)), Some(HostId::new(0)));
        assert_eq!(policy.select_host(&hosts, &vm(2, 500.0)), Some(HostId::new(1)));
        assert_eq!(policy.select_host(&hosts, &vm(16, 500.0)), None);
        assert_eq!(policy.select_host(&hosts, &vm(1, 5000.0)), None);
    }

    #[test]
    fn test_allocate_and_release() {
        let mut host = hosts().remove(1);
        let v = vm(6, 100.0);
        assert!(host.allocate(&v));
        assert_eq!(host.free_pes(), 2);
        assert!(!host.allocate(&v), "no room left");
        assert_eq!(host.free_pes(), 2);
        host.release(&v);
        assert_eq!(host.free_pes(), 8);
        assert_eq!(host.free_ram_mb(), 4096);
    }

    #[test]
    fn test_mips_duration() {
        let model = MipsExecutionModel;
        let cloudlet = CloudletSpec {
            id: CloudletId::new(0),
            owner: EntityId::new(1),
            length: 4000.0,
            pes: 2,
        };
        assert_eq!(model.duration(&cloudlet, 4000.0, &vm(2, 1000.0)), 2.0);
        assert_eq!(model.duration(&cloudlet, 4000.0, &vm(1, 1000.0)), 4.0);
        assert_eq!(model.duration(&cloudlet, 0.0, &vm(1, 1000.0)), 0.0);
    }
}
