/*
* Copyright 2019 Comcast Cable Communications Management, LLC
*
* Licensed under the Apache License, Version 2.0 (the "License");
* you may not use this file except in compliance with the License.
* You may obtain a copy of the License at
*
* http://www.apache.org/licenses/LICENSE-2.0
*
* Unless required by applicable law or agreed to in writing, software
* distributed under the License is distributed on an "AS IS" BASIS,
* WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
* See the License for the specific language governing permissions and
* limitations under the License.
*
* SPDX-License-Identifier: Apache-2.0
*/

//! Toml-based configuration for the probe.
//!
//! # Example
//!
//! ```
//! app_name = "netflow"
//! worker_cores = [0, 1, 2, 3]
//!
//! [mempool]
//!     capacity = 65535
//!     cache_size = 256
//!
//! [rxtx]
//!     rxd = 512
//!     txd = 128
//!
//! [flow_table]
//!     entries = 4194304
//!     bucket_entries = 4
//!
//! [[ports]]
//!     name = "eth0"
//!     device = "net_ring0"
//!
//! [[ports]]
//!     name = "eth1"
//!     device = "net_tap0"
//!     args = "socket=0"
//!     cores = [2, 3]
//! ```

use crate::eal::dev::Offloads;
use crate::eal::mempool::{DEFAULT_BUF_SIZE, MEMPOOL_CACHE_MAX_SIZE};
use crate::eal::CoreId;
use crate::ensure;
use anyhow::{Context, Result};
use clap::{clap_app, crate_version};
use serde::{Deserialize, Deserializer};
use std::fmt;
use std::fs;
use std::path::Path;
use thiserror::Error;

// make `CoreId` serde deserializable.
impl<'de> Deserialize<'de> for CoreId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let i = usize::deserialize(deserializer)?;
        Ok(CoreId::new(i))
    }
}

/// Configuration validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required list is empty.
    #[error("'{0}' must not be empty.")]
    Empty(&'static str),

    /// A value is out of range.
    #[error("'{0}' is invalid: {1}")]
    Invalid(&'static str, String),

    /// An offload name is not recognized.
    #[error("unknown {0} offload '{1}'.")]
    UnknownOffload(&'static str, String),

    /// A port uses a core that is not a worker core.
    #[error("port '{0}' uses {1:?}, which is not a worker core.")]
    UnknownCore(String, CoreId),

    /// Two ports share a name or a device.
    #[error("duplicate port {0} '{1}'.")]
    DuplicatePort(&'static str, String),
}

/// Probe configuration settings.
#[derive(Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProbeConfig {
    /// Application name. Prefixes the names of the memory objects the
    /// probe reserves.
    pub app_name: String,

    /// The cores that run the reception workers. Each core's socket gets
    /// a buffer pool and, with per-socket placement, a flow table.
    pub worker_cores: Vec<CoreId>,

    /// Whether pools, queues and tables are placed on the socket of the
    /// cores using them. When `false`, everything goes on socket 0.
    /// Defaults to `true`.
    #[serde(default = "default_true")]
    pub numa: bool,

    /// Memory in MiB available on each socket, indexed by socket id.
    /// Unlimited when not set.
    #[serde(default)]
    pub socket_mem: Option<Vec<usize>>,

    /// Whether the memory layout is printed to stdout after bring-up.
    /// Defaults to `true`.
    #[serde(default = "default_true")]
    pub dump_memory: bool,

    /// Per socket buffer pool settings.
    #[serde(default)]
    pub mempool: MempoolConfig,

    /// Receive and transmit queue settings shared by all ports.
    #[serde(default)]
    pub rxtx: RxTxConfig,

    /// Flow table settings.
    #[serde(default)]
    pub flow_table: FlowTableConfig,

    /// Explicit core to socket mapping. Read from sysfs when not set.
    #[serde(default)]
    pub topology: Option<TopologyConfig>,

    /// The ports to bring up. Must have at least one.
    pub ports: Vec<PortConfig>,
}

fn default_true() -> bool {
    true
}

impl ProbeConfig {
    /// Returns the cores assigned to a port, all the worker cores if the
    /// port does not name any.
    pub fn port_cores(&self, port: &PortConfig) -> Vec<CoreId> {
        if port.cores.is_empty() {
            self.worker_cores.clone()
        } else {
            port.cores.clone()
        }
    }

    /// Checks the settings are consistent.
    ///
    /// # Errors
    ///
    /// Returns the first inconsistency found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        ensure!(!self.app_name.is_empty(), ConfigError::Empty("app_name"));
        ensure!(
            !self.worker_cores.is_empty(),
            ConfigError::Empty("worker_cores")
        );
        ensure!(!self.ports.is_empty(), ConfigError::Empty("ports"));

        self.mempool.validate()?;
        self.rxtx.validate()?;
        self.flow_table.validate()?;

        for (idx, port) in self.ports.iter().enumerate() {
            if let Some(core) = port
                .cores
                .iter()
                .find(|core| !self.worker_cores.contains(core))
            {
                return Err(ConfigError::UnknownCore(port.name.clone(), *core));
            }

            for other in self.ports[..idx].iter() {
                ensure!(
                    other.name != port.name,
                    ConfigError::DuplicatePort("name", port.name.clone())
                );
                ensure!(
                    other.device != port.device,
                    ConfigError::DuplicatePort("device", port.device.clone())
                );
            }
        }

        Ok(())
    }
}

impl fmt::Debug for ProbeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("probe");
        d.field("app_name", &self.app_name)
            .field("worker_cores", &self.worker_cores)
            .field("numa", &self.numa);
        if let Some(socket_mem) = &self.socket_mem {
            d.field("socket_mem", socket_mem);
        }
        d.field("dump_memory", &self.dump_memory)
            .field("mempool", &self.mempool)
            .field("rxtx", &self.rxtx)
            .field("flow_table", &self.flow_table);
        if let Some(topology) = &self.topology {
            d.field("topology", &topology.sockets);
        }
        d.field("ports", &self.ports).finish()
    }
}

/// Mempool configuration settings.
#[derive(Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MempoolConfig {
    /// The number of buffers in each socket's pool. The optimum size (in
    /// terms of memory usage) is when n is a power of two minus one.
    /// Defaults to `65535` or `2 ^ 16 - 1`.
    #[serde(default = "default_capacity")]
    pub capacity: usize,

    /// The size of the per core object cache. Must not exceed `512` nor
    /// two thirds of the capacity. Defaults to `256`.
    #[serde(default = "default_cache_size")]
    pub cache_size: usize,

    /// The size of each buffer in bytes, headroom included. Defaults to
    /// `2176`.
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
}

fn default_capacity() -> usize {
    65535
}

fn default_cache_size() -> usize {
    256
}

fn default_buffer_size() -> usize {
    DEFAULT_BUF_SIZE
}

impl MempoolConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        ensure!(
            self.capacity > 0,
            ConfigError::Invalid("mempool.capacity", "must be positive.".to_owned())
        );
        ensure!(
            self.buffer_size > 0,
            ConfigError::Invalid("mempool.buffer_size", "must be positive.".to_owned())
        );
        ensure!(
            self.cache_size <= MEMPOOL_CACHE_MAX_SIZE && self.cache_size * 3 <= self.capacity * 2,
            ConfigError::Invalid(
                "mempool.cache_size",
                format!(
                    "{} exceeds {} or 2/3 of the capacity.",
                    self.cache_size, MEMPOOL_CACHE_MAX_SIZE
                )
            )
        );
        Ok(())
    }
}

impl Default for MempoolConfig {
    fn default() -> Self {
        MempoolConfig {
            capacity: default_capacity(),
            cache_size: default_cache_size(),
            buffer_size: default_buffer_size(),
        }
    }
}

impl fmt::Debug for MempoolConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("mempool")
            .field("capacity", &self.capacity)
            .field("cache_size", &self.cache_size)
            .field("buffer_size", &self.buffer_size)
            .finish()
    }
}

/// Receive and transmit settings applied to every port.
#[derive(Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RxTxConfig {
    /// Receive queues per port. More than one enables receive side
    /// scaling. Defaults to `1`.
    #[serde(default = "default_queues")]
    pub rxqs: u16,

    /// Transmit queues per port. Defaults to `1`.
    #[serde(default = "default_queues")]
    pub txqs: u16,

    /// Descriptors per receive ring. Defaults to `512`.
    #[serde(default = "default_rxd")]
    pub rxd: u16,

    /// Descriptors per transmit ring. Defaults to `128`.
    #[serde(default = "default_txd")]
    pub txd: u16,

    /// Receive offloads to enable, e.g. `["ipv4_cksum"]`. Defaults to
    /// none.
    #[serde(default)]
    pub rx_offloads: Vec<String>,

    /// Transmit offloads to enable, e.g. `["multi_segs"]`. Defaults to
    /// none.
    #[serde(default)]
    pub tx_offloads: Vec<String>,
}

fn default_queues() -> u16 {
    1
}

fn default_rxd() -> u16 {
    512
}

fn default_txd() -> u16 {
    128
}

impl RxTxConfig {
    /// Returns the requested receive offloads.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::UnknownOffload` for an unrecognized name.
    pub fn rx_offloads(&self) -> Result<Offloads, ConfigError> {
        Offloads::parse_rx(&self.rx_offloads).map_err(|name| ConfigError::UnknownOffload("rx", name))
    }

    /// Returns the requested transmit offloads.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::UnknownOffload` for an unrecognized name.
    pub fn tx_offloads(&self) -> Result<Offloads, ConfigError> {
        Offloads::parse_tx(&self.tx_offloads).map_err(|name| ConfigError::UnknownOffload("tx", name))
    }

    fn validate(&self) -> Result<(), ConfigError> {
        ensure!(
            self.rxqs > 0,
            ConfigError::Invalid("rxtx.rxqs", "must be positive.".to_owned())
        );
        ensure!(
            self.txqs > 0,
            ConfigError::Invalid("rxtx.txqs", "must be positive.".to_owned())
        );
        ensure!(
            self.rxd > 0,
            ConfigError::Invalid("rxtx.rxd", "must be positive.".to_owned())
        );
        ensure!(
            self.txd > 0,
            ConfigError::Invalid("rxtx.txd", "must be positive.".to_owned())
        );
        self.rx_offloads()?;
        self.tx_offloads()?;
        Ok(())
    }
}

impl Default for RxTxConfig {
    fn default() -> Self {
        RxTxConfig {
            rxqs: default_queues(),
            txqs: default_queues(),
            rxd: default_rxd(),
            txd: default_txd(),
            rx_offloads: vec![],
            tx_offloads: vec![],
        }
    }
}

impl fmt::Debug for RxTxConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("rxtx")
            .field("rxqs", &self.rxqs)
            .field("txqs", &self.txqs)
            .field("rxd", &self.rxd)
            .field("txd", &self.txd)
            .field("rx_offloads", &self.rx_offloads)
            .field("tx_offloads", &self.tx_offloads)
            .finish()
    }
}

/// Where flow tables are created.
#[derive(Copy, Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum Placement {
    /// One table on every socket that runs workers.
    PerSocket,
    /// A single table on the lowest socket, shared by all workers.
    Shared,
}

impl Default for Placement {
    fn default() -> Self {
        Placement::PerSocket
    }
}

/// Flow table configuration settings.
#[derive(Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FlowTableConfig {
    /// The number of entries in each table, a power of two. Defaults to
    /// `4194304` or `2 ^ 22`.
    #[serde(default = "default_entries")]
    pub entries: usize,

    /// The number of entries per bucket, a power of two. Defaults to `4`.
    #[serde(default = "default_bucket_entries")]
    pub bucket_entries: usize,

    /// The initial value of the hash. Defaults to `0`.
    #[serde(default)]
    pub hash_seed: u32,

    /// Where tables are created. Defaults to `per-socket`.
    #[serde(default)]
    pub placement: Placement,
}

fn default_entries() -> usize {
    4_194_304
}

fn default_bucket_entries() -> usize {
    4
}

impl FlowTableConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        ensure!(
            self.entries.is_power_of_two(),
            ConfigError::Invalid(
                "flow_table.entries",
                format!("{} is not a power of two.", self.entries)
            )
        );
        ensure!(
            self.bucket_entries.is_power_of_two() && self.bucket_entries <= self.entries,
            ConfigError::Invalid(
                "flow_table.bucket_entries",
                format!(
                    "{} is not a power of two no larger than entries.",
                    self.bucket_entries
                )
            )
        );
        Ok(())
    }
}

impl Default for FlowTableConfig {
    fn default() -> Self {
        FlowTableConfig {
            entries: default_entries(),
            bucket_entries: default_bucket_entries(),
            hash_seed: 0,
            placement: Placement::default(),
        }
    }
}

impl fmt::Debug for FlowTableConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("flow_table")
            .field("entries", &self.entries)
            .field("bucket_entries", &self.bucket_entries)
            .field("hash_seed", &format_args!("{:#x}", self.hash_seed))
            .field("placement", &self.placement)
            .finish()
    }
}

/// Explicit core to socket mapping.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TopologyConfig {
    /// The cores of each socket, indexed by socket id.
    pub sockets: Vec<Vec<usize>>,
}

/// Port configuration settings.
#[derive(Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PortConfig {
    /// The application assigned logical name of the port.
    pub name: String,

    /// The device name of the port. It can be the following formats,
    ///
    ///   * PCIe address, for example `0000:02:00.0`
    ///   * virtual device, for example `net_[null0|ring0|tap0]`
    pub device: String,

    /// Additional arguments to configure a virtual device, e.g.
    /// `socket=1,max_rxq=4`.
    #[serde(default)]
    pub args: Option<String>,

    /// The worker cores serving the port. Defaults to all worker cores.
    #[serde(default)]
    pub cores: Vec<CoreId>,
}

impl fmt::Debug for PortConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("port");
        d.field("name", &self.name);
        d.field("device", &self.device);
        if let Some(args) = &self.args {
            d.field("args", args);
        }
        d.field("cores", &self.cores).finish()
    }
}

/// Loads and validates the probe config from a TOML file.
///
/// # Errors
///
/// Returns an error if the file cannot be read, parsed or validated.
pub fn load_config_from<P: AsRef<Path>>(path: P) -> Result<ProbeConfig> {
    let path = path.as_ref();
    let content = fs::read_to_string(path)
        .with_context(|| format!("cannot read config '{}'.", path.display()))?;
    let config: ProbeConfig = toml::from_str(&content)
        .with_context(|| format!("cannot parse config '{}'.", path.display()))?;
    config.validate()?;
    Ok(config)
}

/// Loads the probe config from the TOML file named on the command line.
///
/// # Example
///
/// ```
/// home$ ./netflow-probe -f netflow.toml
/// ```
pub fn load_config() -> Result<ProbeConfig> {
    let matches = clap_app!(netflow_probe =>
        (version: crate_version!())
        (@arg file: -f --file +required +takes_value "configuration file")
    )
    .get_matches();

    // `file` is a required argument, clap exits before this without it.
    let path = matches.value_of("file").unwrap_or_default();
    load_config_from(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults() {
        const CONFIG: &str = r#"
            app_name = "probe"
            worker_cores = [0, 1]

            [[ports]]
                name = "eth0"
                device = "net_null0"
        "#;

        let config: ProbeConfig = toml::from_str(CONFIG).unwrap();

        assert!(config.numa);
        assert!(config.dump_memory);
        assert_eq!(None, config.socket_mem);
        assert_eq!(65535, config.mempool.capacity);
        assert_eq!(256, config.mempool.cache_size);
        assert_eq!(2176, config.mempool.buffer_size);
        assert_eq!(1, config.rxtx.rxqs);
        assert_eq!(1, config.rxtx.txqs);
        assert_eq!(512, config.rxtx.rxd);
        assert_eq!(128, config.rxtx.txd);
        assert_eq!(4_194_304, config.flow_table.entries);
        assert_eq!(4, config.flow_table.bucket_entries);
        assert_eq!(Placement::PerSocket, config.flow_table.placement);
        assert!(config.topology.is_none());
        assert_eq!(None, config.ports[0].args);
        assert_eq!(
            vec![CoreId::new(0), CoreId::new(1)],
            config.port_cores(&config.ports[0])
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn config_full() {
        const CONFIG: &str = r#"
            app_name = "probe"
            worker_cores = [0, 1, 8, 9]
            numa = false
            socket_mem = [256, 256]
            dump_memory = false

            [mempool]
                capacity = 8191
                cache_size = 128
                buffer_size = 9216

            [rxtx]
                rxqs = 2
                txqs = 2
                rxd = 1024
                txd = 256
                rx_offloads = ["ipv4_cksum", "tcp_cksum"]
                tx_offloads = ["multi_segs"]

            [flow_table]
                entries = 65536
                bucket_entries = 8
                hash_seed = 0xdeadbeef
                placement = "shared"

            [topology]
                sockets = [[0, 1], [8, 9]]

            [[ports]]
                name = "eth0"
                device = "net_tap0"
                args = "socket=1"
                cores = [8, 9]
        "#;

        let config: ProbeConfig = toml::from_str(CONFIG).unwrap();

        assert!(!config.numa);
        assert_eq!(Some(vec![256, 256]), config.socket_mem);
        assert_eq!(9216, config.mempool.buffer_size);
        assert_eq!(
            Offloads::RX_IPV4_CKSUM | Offloads::RX_TCP_CKSUM,
            config.rxtx.rx_offloads().unwrap()
        );
        assert_eq!(Offloads::TX_MULTI_SEGS, config.rxtx.tx_offloads().unwrap());
        assert_eq!(0xdead_beef, config.flow_table.hash_seed);
        assert_eq!(Placement::Shared, config.flow_table.placement);
        assert_eq!(vec![vec![0, 1], vec![8, 9]], config.topology.as_ref().unwrap().sockets);
        assert_eq!(Some("socket=1".to_owned()), config.ports[0].args);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn reject_unknown_fields() {
        const CONFIG: &str = r#"
            app_name = "probe"
            worker_cores = [0]
            master_core = 0
            ports = []
        "#;

        assert!(toml::from_str::<ProbeConfig>(CONFIG).is_err());
    }

    #[test]
    fn validate_rejects_inconsistent_values() {
        const CONFIG: &str = r#"
            app_name = "probe"
            worker_cores = [0, 1]

            [[ports]]
                name = "eth0"
                device = "net_null0"
        "#;

        let base: ProbeConfig = toml::from_str(CONFIG).unwrap();

        let mut config = base.clone();
        config.worker_cores.clear();
        assert!(matches!(config.validate(), Err(ConfigError::Empty("worker_cores"))));

        let mut config = base.clone();
        config.ports.clear();
        assert!(matches!(config.validate(), Err(ConfigError::Empty("ports"))));

        let mut config = base.clone();
        config.mempool.cache_size = 1024;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid("mempool.cache_size", _))
        ));

        let mut config = base.clone();
        config.flow_table.entries = 1000;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid("flow_table.entries", _))
        ));

        let mut config = base.clone();
        config.flow_table.bucket_entries = 3;
        assert!(config.validate().is_err());

        let mut config = base.clone();
        config.rxtx.rx_offloads = vec!["teleport".to_owned()];
        assert!(matches!(
            config.validate(),
            Err(ConfigError::UnknownOffload("rx", _))
        ));

        let mut config = base.clone();
        config.ports[0].cores = vec![CoreId::new(5)];
        assert!(matches!(
            config.validate(),
            Err(ConfigError::UnknownCore(_, _))
        ));

        let mut config = base;
        let dup = config.ports[0].clone();
        config.ports.push(dup);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::DuplicatePort("name", _))
        ));
    }

    #[test]
    fn load_from_file() {
        let path = std::env::temp_dir().join(format!("probe-config-{}.toml", std::process::id()));
        fs::write(
            &path,
            r#"
            app_name = "probe"
            worker_cores = [0]

            [[ports]]
                name = "eth0"
                device = "net_ring0"
        "#,
        )
        .unwrap();

        let config = load_config_from(&path).unwrap();
        let _ = fs::remove_file(&path);

        assert_eq!("probe", config.app_name);
        assert!(load_config_from(path.with_extension("missing")).is_err());
    }
}
