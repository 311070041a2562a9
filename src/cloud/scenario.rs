//! Wires a complete run from a [`ScenarioConfig`].

use tracing::info;

use super::broker::{Broker, Workload};
use super::datacenter::Datacenter;
use super::information_service::{InformationService, INFORMATION_SERVICE};
use crate::config::ScenarioConfig;
use crate::entity::EntityId;
use crate::error::KernelResult;
use crate::kernel::{Kernel, RunReport};

/// A kernel populated with one information service, the configured
/// datacenters and a single broker.
pub struct Scenario {
    pub kernel: Kernel,
    pub information_service: EntityId,
    pub datacenters: Vec<EntityId>,
    pub broker: EntityId,
}

impl Scenario {
    /// Validate `config` and register every entity. Nothing runs yet.
    pub fn build(config: &ScenarioConfig) -> KernelResult<Self> {
        config.validate()?;
        let mut kernel = Kernel::with_config(config.kernel.clone());
        let information_service =
            kernel.register(INFORMATION_SERVICE, Box::new(InformationService::new()))?;
        let datacenters = (0..config.datacenters)
            .map(|i| {
                let name = format!("datacenter-{}", i);
                let dc = Datacenter::new(name.clone(), config.datacenter.clone());
                kernel.register(&name, Box::new(dc))
            })
            .collect::<KernelResult<Vec<_>>>()?;
        let broker = kernel.register(
            "broker",
            Box::new(Broker::new(
                config.broker.clone(),
                Workload::from_config(config),
            )),
        )?;
        info!(
            datacenters = datacenters.len(),
            vms = config.vms,
            cloudlets = config.cloudlets,
            "scenario built"
        );
        Ok(Scenario {
            kernel,
            information_service,
            datacenters,
            broker,
        })
    }

    pub fn run(&mut self) -> RunReport {
        self.kernel.run()
    }

    pub fn broker(&self) -> Option<&Broker> {
        self.kernel.entity::<Broker>(self.broker)
    }

    pub fn datacenter(&self, index: usize) -> Option<&Datacenter> {
        self.datacenters
            .get(index)
            .and_then(|id| self.kernel.entity::<Datacenter>(*id))
    }
}
