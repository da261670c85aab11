//! # Topology Loader
//!
//! Reads the service-address file of a benchmark topology. Each entry names a
//! service of the system under test and where its instances listen. Two entry
//! shapes are accepted:
//!
//! ```json
//! {"addresses": [
//!   {"name": "service1", "hostname": "localhost", "port": "9000", "agent_port": "5050"},
//!   {"name": "service2", "deploy_addr": "10.0.0.2",
//!    "instances": [{"hostname": "localhost", "port": "9001", "agent_port": "5051"}]}
//! ]}
//! ```
//!
//! Ports may be written as strings or numbers. Services are kept in file order;
//! the first service is the trigger origin for trigger-based tracers.

use crate::cli::Benchmark;
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// One listening instance of a service
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Instance {
    pub hostname: String,
    pub port: String,
    pub agent_port: String,
}

/// A named service of the system under test
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceEndpoint {
    pub name: String,
    pub deploy_addr: Option<String>,
    pub instances: Vec<Instance>,
}

impl ServiceEndpoint {
    /// `hostname:port` addresses clients connect to
    pub fn connection_addresses(&self) -> Vec<String> {
        self.instances
            .iter()
            .map(|i| format!("{}:{}", i.hostname, i.port))
            .collect()
    }
}

#[derive(Deserialize)]
struct AddressFile {
    addresses: Vec<RawAddress>,
}

#[derive(Deserialize)]
struct RawAddress {
    name: String,
    #[serde(default)]
    deploy_addr: Option<String>,
    #[serde(default)]
    hostname: Option<String>,
    #[serde(default, deserialize_with = "opt_port")]
    port: Option<String>,
    #[serde(default, deserialize_with = "opt_port")]
    agent_port: Option<String>,
    #[serde(default)]
    instances: Option<Vec<RawInstance>>,
}

#[derive(Deserialize)]
struct RawInstance {
    hostname: String,
    #[serde(deserialize_with = "port")]
    port: String,
    #[serde(deserialize_with = "port")]
    agent_port: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PortValue {
    Text(String),
    Number(u64),
}

impl From<PortValue> for String {
    fn from(value: PortValue) -> Self {
        match value {
            PortValue::Text(s) => s,
            PortValue::Number(n) => n.to_string(),
        }
    }
}

fn port<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    PortValue::deserialize(d).map(String::from)
}

fn opt_port<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    Option::<PortValue>::deserialize(d).map(|v| v.map(String::from))
}

impl RawAddress {
    fn into_endpoint(self) -> Result<ServiceEndpoint> {
        let instances = match self.instances {
            Some(raw) => raw
                .into_iter()
                .map(|i| Instance {
                    hostname: i.hostname,
                    port: i.port,
                    agent_port: i.agent_port,
                })
                .collect(),
            None => {
                let missing = |field: &str| anyhow!("service '{}' has no '{}'", self.name, field);
                vec![Instance {
                    hostname: self.hostname.clone().ok_or_else(|| missing("hostname"))?,
                    port: self.port.clone().ok_or_else(|| missing("port"))?,
                    agent_port: self.agent_port.clone().ok_or_else(|| missing("agent_port"))?,
                }]
            }
        };
        if instances.is_empty() {
            return Err(anyhow!("service '{}' has no instances", self.name));
        }
        Ok(ServiceEndpoint {
            name: self.name,
            deploy_addr: self.deploy_addr,
            instances,
        })
    }
}

/// The services of one benchmark and the configuration files describing it
#[derive(Debug, Clone)]
pub struct Topology {
    benchmark: Benchmark,
    config_dir: PathBuf,
    services: Vec<ServiceEndpoint>,
}

impl Topology {
    /// Load the address file of `benchmark` from `config_dir`
    pub fn load(benchmark: Benchmark, config_dir: &Path) -> Result<Self> {
        let path = Self::addresses_path(benchmark, config_dir);
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read addresses file {}", path.display()))?;
        let services = Self::parse_services(&text)
            .with_context(|| format!("Invalid addresses file {}", path.display()))?;
        Ok(Self {
            benchmark,
            config_dir: config_dir.to_path_buf(),
            services,
        })
    }

    /// Build a topology from address JSON already in memory
    pub fn from_json_str(benchmark: Benchmark, config_dir: &Path, json: &str) -> Result<Self> {
        Ok(Self {
            benchmark,
            config_dir: config_dir.to_path_buf(),
            services: Self::parse_services(json)?,
        })
    }

    fn parse_services(json: &str) -> Result<Vec<ServiceEndpoint>> {
        let file: AddressFile = serde_json::from_str(json)?;
        let mut seen = HashSet::new();
        let mut services = Vec::with_capacity(file.addresses.len());
        for raw in file.addresses {
            if !seen.insert(raw.name.clone()) {
                return Err(anyhow!("duplicate service '{}'", raw.name));
            }
            services.push(raw.into_endpoint()?);
        }
        Ok(services)
    }

    fn addresses_path(benchmark: Benchmark, config_dir: &Path) -> PathBuf {
        config_dir.join(format!("{}_addresses.json", benchmark.topology_name()))
    }

    pub fn benchmark(&self) -> Benchmark {
        self.benchmark
    }

    /// Services in address-file order
    pub fn services(&self) -> &[ServiceEndpoint] {
        &self.services
    }

    pub fn service(&self, name: &str) -> Option<&ServiceEndpoint> {
        self.services.iter().find(|s| s.name == name)
    }

    pub fn addresses_file(&self) -> PathBuf {
        Self::addresses_path(self.benchmark, &self.config_dir)
    }

    pub fn topology_file(&self) -> PathBuf {
        self.config_dir
            .join(format!("{}_topology.json", self.benchmark.topology_name()))
    }

    pub fn otel_config_file(&self) -> PathBuf {
        self.config_dir.join("sample_otel_collector_config.yaml")
    }

    pub fn gateways(&self) -> Vec<String> {
        self.benchmark.gateways()
    }
}
