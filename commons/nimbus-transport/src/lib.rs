use std::str::FromStr;

use envconfig::Envconfig;
use zenoh_config::{EndPoint, ModeDependentValue, WhatAmI};

mod bus;
pub mod memory;
mod message;
pub mod util;
pub mod zenoh_bus;

pub use bus::{BusError, MessageBus, Subscription, subject_to_key_expr};
pub use memory::MemoryBus;
pub use message::{Headers, InFlight, InFlightGuard, Message, ReplySink};
pub use zenoh_bus::ZenohBus;

#[derive(Envconfig, Clone, Debug)]
pub struct ZenohConfig {
    #[envconfig(from = "NIMBUS_ZENOH_PORT", default = "0")]
    pub zenoh_port: u16,

    #[envconfig(from = "NIMBUS_ZENOH_PROTOCOL")]
    pub protocol: Option<String>,

    #[envconfig(from = "NIMBUS_ZENOH_PEERS")]
    pub peers: Option<String>,

    #[envconfig(from = "NIMBUS_ZENOH_MODE", default = "peer")]
    pub mode: WhatAmI,

    #[envconfig(from = "NIMBUS_ZENOH_GOSSIP_ENABLED")]
    pub gossip_enabled: Option<bool>,
    #[envconfig(from = "NIMBUS_ZENOH_GOSSIP_MULTIHOP")]
    pub gossip_multihop: Option<bool>,

    #[envconfig(from = "NIMBUS_ZENOH_LINKSTATE", default = "false")]
    pub linkstate: bool,

    #[envconfig(from = "NIMBUS_ZENOH_MAX_SESSIONS", default = "4096")]
    pub max_sessions: usize,

    #[envconfig(from = "NIMBUS_ZENOH_MAX_LINKS", default = "16")]
    pub max_links: usize,

    #[envconfig(from = "NIMBUS_ZENOH_BUFFER_SIZE")]
    pub buffer_size: Option<u64>,

    #[envconfig(from = "NIMBUS_ZENOH_SCOUTING_MULTICAST_ENABLED")]
    pub scouting_multicast_enabled: Option<bool>,
}

impl Default for ZenohConfig {
    fn default() -> Self {
        Self {
            zenoh_port: 0,
            protocol: None,
            peers: None,
            mode: WhatAmI::Peer,
            gossip_enabled: Some(true),
            linkstate: false,
            max_sessions: 4096,
            max_links: 16,
            buffer_size: None,
            scouting_multicast_enabled: None,
            gossip_multihop: None,
        }
    }
}

impl ZenohConfig {
    pub fn listen_endpoint(&self) -> String {
        let protocol = self.protocol.as_deref().unwrap_or("tcp");
        format!("{}/[::]:{}", protocol, self.zenoh_port)
    }

    pub fn peer_endpoints(&self) -> Vec<String> {
        match &self.peers {
            Some(peers) => peers
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(String::from)
                .collect(),
            None => vec![],
        }
    }

    pub fn create_zenoh(&self) -> Result<zenoh::Config, BusError> {
        let mut conf = zenoh::Config::default();
        let mut listen_conf = zenoh_config::ListenConfig::default();
        let endpoint = parse_endpoint(&self.listen_endpoint())?;
        listen_conf
            .set_endpoints(ModeDependentValue::Unique(vec![endpoint]))
            .map_err(|_| config_err("listen endpoints"))?;

        conf.set_listen(listen_conf)
            .map_err(|_| config_err("listen"))?;
        conf.set_mode(Some(self.mode))
            .map_err(|_| config_err("mode"))?;
        if Some(true) == self.gossip_enabled {
            conf.scouting
                .gossip
                .set_enabled(Some(true))
                .map_err(|_| config_err("gossip"))?;
        }
        if Some(true) == self.gossip_multihop {
            conf.scouting
                .gossip
                .set_multihop(Some(true))
                .map_err(|_| config_err("gossip multihop"))?;
        }
        conf.scouting
            .multicast
            .set_enabled(self.scouting_multicast_enabled)
            .map_err(|_| config_err("multicast scouting"))?;

        if self.linkstate {
            conf.routing
                .peer
                .set_mode(Some("linkstate".into()))
                .map_err(|_| config_err("routing mode"))?;
        }

        conf.transport
            .unicast
            .set_max_sessions(self.max_sessions)
            .map_err(|_| config_err("max sessions"))?;
        conf.transport
            .unicast
            .set_max_links(self.max_links)
            .map_err(|_| config_err("max links"))?;
        if let Some(buffer_size) = self.buffer_size {
            conf.transport
                .link
                .rx
                .set_buffer_size(buffer_size as usize)
                .map_err(|_| config_err("rx buffer size"))?;
        }

        let mut connect_conf = zenoh_config::ConnectConfig::default();
        let peers = self
            .peer_endpoints()
            .iter()
            .map(|p| parse_endpoint(p))
            .collect::<Result<Vec<_>, _>>()?;
        if !peers.is_empty() {
            connect_conf
                .set_endpoints(ModeDependentValue::Unique(peers))
                .map_err(|_| config_err("connect endpoints"))?;
        }
        conf.set_connect(connect_conf)
            .map_err(|_| config_err("connect"))?;
        Ok(conf)
    }
}

fn parse_endpoint(raw: &str) -> Result<EndPoint, BusError> {
    EndPoint::from_str(raw)
        .map_err(|e| BusError::Config(format!("endpoint '{raw}': {e}")))
}

fn config_err(field: &str) -> BusError {
    BusError::Config(format!("rejected zenoh setting: {field}"))
}
