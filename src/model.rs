//! Domain model derived from cluster resources.

use std::collections::BTreeMap;
use std::collections::btree_map;
use std::fmt;

/// Discovered spec documents keyed by route.
pub type SpecMap = BTreeMap<String, Vec<u8>>;

/// Ordered list of ports.
pub type PortList = Vec<Port>;

/// Application protocol spoken on a port.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Protocol {
    /// Plain TCP.
    Tcp,
    /// Plain UDP.
    Udp,
    /// HTTP/1.1.
    Http,
    /// HTTP over TLS.
    Https,
    /// HTTP/2.
    Http2,
    /// `gRPC`.
    Grpc,
    /// `MongoDB` wire protocol.
    Mongo,
    /// Redis protocol.
    Redis,
    /// Anything not recognized.
    Unsupported,
}

impl Protocol {
    /// Maps a port name prefix to a protocol by exact match.
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        match name {
            "tcp" => Self::Tcp,
            "udp" => Self::Udp,
            "http" => Self::Http,
            "https" => Self::Https,
            "http2" => Self::Http2,
            "grpc" => Self::Grpc,
            "mongo" => Self::Mongo,
            "redis" => Self::Redis,
            _ => Self::Unsupported,
        }
    }

    /// Returns `true` for protocols a spec document can be fetched over.
    #[must_use]
    pub fn is_http(self) -> bool {
        matches!(self, Self::Http | Self::Https | Self::Http2)
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Tcp => "TCP",
            Self::Udp => "UDP",
            Self::Http => "HTTP",
            Self::Https => "HTTPS",
            Self::Http2 => "HTTP2",
            Self::Grpc => "GRPC",
            Self::Mongo => "Mongo",
            Self::Redis => "Redis",
            Self::Unsupported => "UNSUPPORTED",
        };
        f.write_str(s)
    }
}

/// A named service port.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Port {
    /// Port name, as declared or synthesized (`mgmt-<port>`).
    pub name: String,
    /// Port number.
    pub port: u16,
    /// Protocol spoken on the port.
    pub protocol: Protocol,
}

impl Port {
    /// Creates a new port.
    #[must_use]
    pub fn new(name: impl Into<String>, port: u16, protocol: Protocol) -> Self {
        Self {
            name: name.into(),
            port,
            protocol,
        }
    }

    /// Creates a management port for a health probe.
    #[must_use]
    pub fn management(port: u16, protocol: Protocol) -> Self {
        Self::new(format!("mgmt-{port}"), port, protocol)
    }
}

/// A service known to the catalog.
///
/// The hostname is fixed at construction; `load_balancing_disabled` is derived
/// from the address and external name so a headless service is always marked.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Service {
    hostname: String,
    ports: PortList,
    address: Option<String>,
    external_name: Option<String>,
    load_balancing_disabled: bool,
}

impl Service {
    /// Creates a service.
    #[must_use]
    pub fn new(
        hostname: impl Into<String>,
        ports: PortList,
        address: Option<String>,
        external_name: Option<String>,
    ) -> Self {
        let load_balancing_disabled = address.is_none() && external_name.is_none();

        Self {
            hostname: hostname.into(),
            ports,
            address,
            external_name,
            load_balancing_disabled,
        }
    }

    /// Fully qualified service hostname; the catalog key.
    #[must_use]
    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// Ports in declaration order.
    #[must_use]
    pub fn ports(&self) -> &[Port] {
        &self.ports
    }

    /// Cluster address, if any.
    #[must_use]
    pub fn address(&self) -> Option<&str> {
        self.address.as_deref()
    }

    /// External DNS name, if the service is externally named.
    #[must_use]
    pub fn external_name(&self) -> Option<&str> {
        self.external_name.as_deref()
    }

    /// `true` for headless services.
    #[must_use]
    pub fn load_balancing_disabled(&self) -> bool {
        self.load_balancing_disabled
    }

    /// `true` if the service points at an external name.
    #[must_use]
    pub fn external(&self) -> bool {
        self.external_name.is_some()
    }
}

/// A workload; changes to it trigger re-evaluation of known services.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Deployment {
    /// Deployment name.
    pub name: String,
    /// Observed `metadata.generation`.
    pub generation: i64,
    /// Management ports derived from the pod template's probes.
    pub management_ports: PortList,
}

impl Deployment {
    /// Creates a deployment with no management ports.
    #[must_use]
    pub fn new(name: impl Into<String>, generation: i64) -> Self {
        Self {
            name: name.into(),
            generation,
            management_ports: PortList::new(),
        }
    }
}

/// Kind of change delivered by a watcher.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Event {
    /// The object was first seen.
    Add,
    /// The object changed, or is re-delivered on resync.
    Update,
    /// The object was removed.
    Delete,
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Add => "add",
            Self::Update => "update",
            Self::Delete => "delete",
        };
        f.write_str(s)
    }
}

/// Services keyed by hostname.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ServiceMap {
    services: BTreeMap<String, Service>,
}

impl ServiceMap {
    /// Creates an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a service, replacing any entry with the same hostname.
    pub fn insert(&mut self, service: Service) {
        self.services.insert(service.hostname.clone(), service);
    }

    /// Removes the entry for the service's hostname, if present.
    pub fn delete(&mut self, service: &Service) {
        self.services.remove(&service.hostname);
    }

    /// Looks up a service by hostname.
    #[must_use]
    pub fn get(&self, hostname: &str) -> Option<&Service> {
        self.services.get(hostname)
    }

    /// Number of services.
    #[must_use]
    pub fn len(&self) -> usize {
        self.services.len()
    }

    /// Returns `true` if the map holds no services.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    /// Iterates services in hostname order.
    pub fn iter(&self) -> btree_map::Values<'_, String, Service> {
        self.services.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_service(hostname: &str, address: Option<&str>) -> Service {
        Service::new(
            hostname,
            vec![Port::new("http", 8080, Protocol::Http)],
            address.map(String::from),
            None,
        )
    }

    #[test]
    fn headless_service_disables_load_balancing() {
        let svc = make_service("a.default.svc.cluster.local", None);
        assert!(svc.load_balancing_disabled());
        assert!(!svc.external());
    }

    #[test]
    fn addressed_service_keeps_load_balancing() {
        let svc = make_service("a.default.svc.cluster.local", Some("10.0.0.1"));
        assert!(!svc.load_balancing_disabled());
        assert_eq!(svc.address(), Some("10.0.0.1"));
    }

    #[test]
    fn external_service_keeps_load_balancing() {
        let svc = Service::new("a.default.svc.cluster.local", vec![], None, Some("example.com".into()));
        assert!(!svc.load_balancing_disabled());
        assert!(svc.external());
    }

    #[test]
    fn protocol_table_is_exact_match() {
        assert_eq!(Protocol::from_name("http"), Protocol::Http);
        assert_eq!(Protocol::from_name("http2"), Protocol::Http2);
        assert_eq!(Protocol::from_name("HTTP"), Protocol::Unsupported);
        assert_eq!(Protocol::from_name("httptest"), Protocol::Unsupported);
    }

    #[test]
    fn management_port_name() {
        let port = Port::management(9080, Protocol::Http);
        assert_eq!(port.name, "mgmt-9080");
        assert_eq!(port.port, 9080);
    }

    #[test]
    fn service_map_insert_replaces() {
        let mut map = ServiceMap::new();
        map.insert(make_service("a.default.svc.cluster.local", None));
        map.insert(make_service("a.default.svc.cluster.local", Some("10.0.0.1")));

        assert_eq!(map.len(), 1);
        assert_eq!(
            map.get("a.default.svc.cluster.local").and_then(Service::address),
            Some("10.0.0.1")
        );
    }

    #[test]
    fn service_map_delete_is_idempotent() {
        let svc = make_service("a.default.svc.cluster.local", None);
        let mut map = ServiceMap::new();
        map.insert(svc.clone());

        map.delete(&svc);
        map.delete(&svc);

        assert!(map.is_empty());
    }
}
