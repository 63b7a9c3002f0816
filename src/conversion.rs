//! Conversion of Kubernetes objects into the discovery model.
//!
//! Everything here is a pure function over `k8s-openapi` types: no I/O and no
//! shared state, so the watcher can call it inline for every event.

use std::collections::HashMap;

use k8s_openapi::api::apps::v1::Deployment as K8sDeployment;
use k8s_openapi::api::core::v1::{Container, PodSpec, Probe, Service as K8sService, ServicePort};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::ResourceExt;

use crate::error::{ConversionError, ConversionErrors};
use crate::model::{Deployment, Port, PortList, Protocol, Service};

const CLUSTER_IP_NONE: &str = "None";
const SERVICE_TYPE_EXTERNAL_NAME: &str = "ExternalName";
const PROTOCOL_TCP: &str = "TCP";
const PROTOCOL_UDP: &str = "UDP";

/// Produces the FQDN of a Kubernetes service.
#[must_use]
pub fn service_hostname(name: &str, namespace: &str, domain_suffix: &str) -> String {
    format!("{name}.{namespace}.svc.{domain_suffix}")
}

/// Returns `namespace/name`, or `name` if the namespace is empty.
#[must_use]
pub fn key_func(name: &str, namespace: &str) -> String {
    if namespace.is_empty() {
        name.to_string()
    } else {
        format!("{namespace}/{name}")
    }
}

/// Extracts the service name and namespace from a service hostname.
#[must_use]
pub fn parse_hostname(hostname: &str) -> Option<(&str, &str)> {
    let mut parts = hostname.split('.');
    let name = parts.next().filter(|s| !s.is_empty())?;
    let namespace = parts.next().filter(|s| !s.is_empty())?;
    Some((name, namespace))
}

/// Infers the protocol of a port from its name and declared transport.
///
/// UDP stays UDP. For TCP the name prefix (up to the first `-`) selects the
/// application protocol; unknown prefixes stay TCP. An unset transport is
/// treated as TCP, which is what the API server defaults it to.
#[must_use]
pub fn convert_protocol(name: &str, protocol: Option<&str>) -> Protocol {
    match protocol.unwrap_or(PROTOCOL_TCP) {
        PROTOCOL_UDP => Protocol::Udp,
        PROTOCOL_TCP => {
            let prefix = name.split_once('-').map_or(name, |(prefix, _)| prefix);
            match Protocol::from_name(prefix) {
                Protocol::Udp | Protocol::Unsupported => Protocol::Tcp,
                protocol => protocol,
            }
        }
        _ => Protocol::Tcp,
    }
}

/// Converts a service port. Returns `None` if the port number is out of range.
#[must_use]
pub fn convert_port(port: &ServicePort) -> Option<Port> {
    let name = port.name.clone().unwrap_or_default();
    let Ok(number) = u16::try_from(port.port) else {
        tracing::warn!("skipping service port {name:?} with invalid number {}", port.port);
        return None;
    };
    if number == 0 {
        tracing::warn!("skipping service port {name:?} with number 0");
        return None;
    }

    let protocol = convert_protocol(&name, port.protocol.as_deref());
    Some(Port::new(name, number, protocol))
}

/// Converts a Kubernetes service into the discovery model.
#[must_use]
pub fn convert_service(svc: &K8sService, domain_suffix: &str) -> Service {
    let spec = svc.spec.as_ref();

    let address = spec
        .and_then(|s| s.cluster_ip.as_deref())
        .filter(|ip| !ip.is_empty() && *ip != CLUSTER_IP_NONE)
        .map(String::from);

    let external_name = spec
        .filter(|s| s.type_.as_deref() == Some(SERVICE_TYPE_EXTERNAL_NAME))
        .and_then(|s| s.external_name.as_deref())
        .filter(|name| !name.is_empty())
        .map(String::from);

    let ports = spec
        .and_then(|s| s.ports.as_ref())
        .map(|ports| ports.iter().filter_map(convert_port).collect())
        .unwrap_or_default();

    let namespace = svc.namespace().unwrap_or_default();
    let hostname = service_hostname(&svc.name_any(), &namespace, domain_suffix);

    Service::new(hostname, ports, address, external_name)
}

/// Resolves the port a probe checks into a management port.
///
/// Returns `Ok(None)` when the probe has neither an HTTP nor a TCP action.
///
/// # Errors
///
/// Fails if a named port is not declared by the container, or if the port
/// value is not a valid port number.
pub fn convert_probe_port(
    container: &Container,
    probe: &Probe,
) -> Result<Option<Port>, ConversionError> {
    // Kubernetes allows only one handler per probe
    let (value, protocol) = if let Some(action) = &probe.http_get {
        (&action.port, Protocol::Http)
    } else if let Some(action) = &probe.tcp_socket {
        (&action.port, Protocol::Tcp)
    } else {
        return Ok(None);
    };

    let number = match value {
        IntOrString::Int(n) => *n,
        IntOrString::String(name) => container
            .ports
            .iter()
            .flatten()
            .find(|p| p.name.as_deref() == Some(name.as_str()))
            .map(|p| p.container_port)
            .ok_or_else(|| ConversionError::MissingNamedPort(name.clone()))?,
    };

    match u16::try_from(number) {
        Ok(port) if port != 0 => Ok(Some(Port::management(port, protocol))),
        _ => Err(ConversionError::IncorrectPortType(number.to_string())),
    }
}

/// Collects the management ports of every liveness and readiness probe.
///
/// Ports are deduplicated by name (HTTP and TCP probes on the same port count
/// once, first one wins) and sorted by port number. Resolution errors are
/// gathered rather than aborting, so the ports that did resolve are returned
/// alongside them.
#[must_use]
pub fn convert_probes_to_ports(spec: &PodSpec) -> (PortList, Option<ConversionErrors>) {
    let mut set: HashMap<String, Port> = HashMap::new();
    let mut errs = ConversionErrors::default();

    for container in &spec.containers {
        let probes = [&container.liveness_probe, &container.readiness_probe];

        for probe in probes.into_iter().flatten() {
            match convert_probe_port(container, probe) {
                Ok(Some(port)) => {
                    set.entry(port.name.clone()).or_insert(port);
                }
                Ok(None) => {}
                Err(e) => errs.push(e),
            }
        }
    }

    let mut ports: PortList = set.into_values().collect();
    ports.sort_by_key(|p| p.port);

    (ports, errs.into_option())
}

/// Converts a Kubernetes deployment, deriving management ports from its pod template.
#[must_use]
pub fn convert_deployment(dpl: &K8sDeployment) -> (Deployment, Option<ConversionErrors>) {
    let (management_ports, errs) = dpl
        .spec
        .as_ref()
        .and_then(|s| s.template.spec.as_ref())
        .map(convert_probes_to_ports)
        .unwrap_or_default();

    let deployment = Deployment {
        name: dpl.name_any(),
        generation: dpl.metadata.generation.unwrap_or_default(),
        management_ports,
    };

    (deployment, errs)
}
