//! Configuration types for the kernel and the bundled cloud scenario.
//!
//! Every struct deserializes with `#[serde(default)]`, so a TOML file only
//! needs to name the values it changes.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{KernelError, KernelResult};

fn check_delay(name: &str, value: f64) -> KernelResult<()> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(KernelError::InvalidConfig(format!(
            "{} must be finite and non-negative, got {}",
            name, value
        )))
    }
}

fn check_positive(name: &str, value: f64) -> KernelResult<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(KernelError::InvalidConfig(format!(
            "{} must be positive, got {}",
            name, value
        )))
    }
}

// ── Kernel ────────────────────────────────────────────────────────────

/// Settings of the dispatch loop itself.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    /// Stop after this many deliveries.
    pub max_events: Option<u64>,
    /// Schedule END_OF_SIMULATION at this absolute time when the run starts.
    pub terminate_at: Option<f64>,
    /// Keep a per-dispatch trace and report its digest.
    pub record_trace: bool,
    /// Record a diagnostic when a tag reaches an entity whose role may not
    /// receive it.
    pub check_roles: bool,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            max_events: None,
            terminate_at: None,
            record_trace: true,
            check_roles: true,
        }
    }
}

impl KernelConfig {
    pub fn with_max_events(mut self, max: u64) -> Self {
        self.max_events = Some(max);
        self
    }

    pub fn with_terminate_at(mut self, at: f64) -> Self {
        self.terminate_at = Some(at);
        self
    }

    pub fn with_trace(mut self, record: bool) -> Self {
        self.record_trace = record;
        self
    }

    pub fn with_role_checks(mut self, check: bool) -> Self {
        self.check_roles = check;
        self
    }

    pub fn validate(&self) -> KernelResult<()> {
        if self.max_events == Some(0) {
            return Err(KernelError::InvalidConfig(
                "max_events must be at least 1".into(),
            ));
        }
        if let Some(at) = self.terminate_at {
            check_delay("terminate_at", at)?;
        }
        Ok(())
    }
}

// ── Datacenter ────────────────────────────────────────────────────────

/// One physical host.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    pub pes: u32,
    /// Capacity of each PE, in million instructions per second.
    pub mips: f64,
    pub ram_mb: u64,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            pes: 4,
            mips: 1000.0,
            ram_mb: 16_384,
        }
    }
}

/// Settings of a resource provider.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatacenterConfig {
    pub hosts: Vec<HostConfig>,
    /// Time between a successful VM_CREATE and the VM running.
    pub vm_boot_delay: f64,
    /// Time a live migration takes.
    pub migration_delay: f64,
    /// Time a moved cloudlet waits before it executes on its new VM.
    pub cloudlet_move_delay: f64,
    /// Register with the information service as advance-reservation capable.
    pub advance_reservation: bool,
}

impl Default for DatacenterConfig {
    fn default() -> Self {
        Self {
            hosts: vec![HostConfig::default(); 2],
            vm_boot_delay: 0.1,
            migration_delay: 1.0,
            cloudlet_move_delay: 0.0,
            advance_reservation: false,
        }
    }
}

impl DatacenterConfig {
    pub fn with_hosts(mut self, hosts: Vec<HostConfig>) -> Self {
        self.hosts = hosts;
        self
    }

    pub fn with_vm_boot_delay(mut self, delay: f64) -> Self {
        self.vm_boot_delay = delay;
        self
    }

    pub fn with_migration_delay(mut self, delay: f64) -> Self {
        self.migration_delay = delay;
        self
    }

    pub fn with_cloudlet_move_delay(mut self, delay: f64) -> Self {
        self.cloudlet_move_delay = delay;
        self
    }

    pub fn validate(&self) -> KernelResult<()> {
        if self.hosts.is_empty() {
            return Err(KernelError::InvalidConfig(
                "a datacenter needs at least one host".into(),
            ));
        }
        for (i, host) in self.hosts.iter().enumerate() {
            if host.pes == 0 {
                return Err(KernelError::InvalidConfig(format!("host {} has no PEs", i)));
            }
            check_positive("host mips", host.mips)?;
        }
        check_delay("vm_boot_delay", self.vm_boot_delay)?;
        check_delay("migration_delay", self.migration_delay)?;
        check_delay("cloudlet_move_delay", self.cloudlet_move_delay)
    }
}

// ── Broker ────────────────────────────────────────────────────────────

/// Settings of the bundled broker.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Ask for acknowledgements of VM and cloudlet requests.
    pub request_acks: bool,
    /// Give up on an acknowledgement after this long.
    pub ack_timeout: Option<f64>,
    /// Send END_OF_SIMULATION once every cloudlet is back and VMs are gone.
    pub end_when_done: bool,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            request_acks: true,
            ack_timeout: None,
            end_when_done: true,
        }
    }
}

impl BrokerConfig {
    pub fn with_acks(mut self, request: bool) -> Self {
        self.request_acks = request;
        self
    }

    pub fn with_ack_timeout(mut self, timeout: f64) -> Self {
        self.ack_timeout = Some(timeout);
        self
    }

    pub fn with_end_when_done(mut self, end: bool) -> Self {
        self.end_when_done = end;
        self
    }

    pub fn validate(&self) -> KernelResult<()> {
        match self.ack_timeout {
            Some(t) => check_positive("ack_timeout", t),
            None => Ok(()),
        }
    }
}

// ── Scenario ──────────────────────────────────────────────────────────

/// Shape of every VM the broker requests.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VmTemplate {
    pub mips: f64,
    pub pes: u32,
    pub ram_mb: u64,
}

impl Default for VmTemplate {
    fn default() -> Self {
        Self {
            mips: 1000.0,
            pes: 1,
            ram_mb: 2048,
        }
    }
}

/// Shape of every cloudlet the broker submits.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CloudletTemplate {
    /// Length in million instructions.
    pub length: f64,
    pub pes: u32,
}

impl Default for CloudletTemplate {
    fn default() -> Self {
        Self {
            length: 4000.0,
            pes: 1,
        }
    }
}

/// A complete run: kernel, providers, one broker and its workload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScenarioConfig {
    pub kernel: KernelConfig,
    pub datacenter: DatacenterConfig,
    pub broker: BrokerConfig,
    /// Number of identical datacenters.
    pub datacenters: usize,
    pub vms: usize,
    pub cloudlets: usize,
    pub vm: VmTemplate,
    pub cloudlet: CloudletTemplate,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            kernel: KernelConfig::default(),
            datacenter: DatacenterConfig::default(),
            broker: BrokerConfig::default(),
            datacenters: 1,
            vms: 2,
            cloudlets: 4,
            vm: VmTemplate::default(),
            cloudlet: CloudletTemplate::default(),
        }
    }
}

impl ScenarioConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(s: &str) -> KernelResult<Self> {
        let config: ScenarioConfig =
            toml::from_str(s).map_err(|e| KernelError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    pub fn load(path: impl AsRef<Path>) -> KernelResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            KernelError::InvalidConfig(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&text)
    }

    pub fn with_kernel(mut self, kernel: KernelConfig) -> Self {
        self.kernel = kernel;
        self
    }

    pub fn with_datacenter(mut self, datacenter: DatacenterConfig) -> Self {
        self.datacenter = datacenter;
        self
    }

    pub fn with_broker(mut self, broker: BrokerConfig) -> Self {
        self.broker = broker;
        self
    }

    pub fn with_datacenters(mut self, count: usize) -> Self {
        self.datacenters = count;
        self
    }

    pub fn with_vms(mut self, vms: usize) -> Self {
        self.vms = vms;
        self
    }

    pub fn with_cloudlets(mut self, cloudlets: usize) -> Self {
        self.cloudlets = cloudlets;
        self
    }

    pub fn validate(&self) -> KernelResult<()> {
        self.kernel.validate()?;
        self.datacenter.validate()?;
        self.broker.validate()?;
        if self.datacenters == 0 {
            return Err(KernelError::InvalidConfig(
                "at least one datacenter is required".into(),
            ));
        }
        check_positive("vm mips", self.vm.mips)?;
        check_positive("cloudlet length", self.cloudlet.length)?;
        if self.vm.pes == 0 || self.cloudlet.pes == 0 {
            return Err(KernelError::InvalidConfig("pes must be at least 1".into()));
        }
        Ok(())
    }
}
