use std::net::Ipv4Addr;

/// A local IPv4 address with the netmask of its subnet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterfaceAddr {
    pub ip: Ipv4Addr,
    pub netmask: Ipv4Addr,
}

impl InterfaceAddr {
    pub fn new(ip: Ipv4Addr, netmask: Ipv4Addr) -> Self {
        InterfaceAddr { ip, netmask }
    }

    pub fn broadcast(&self) -> Ipv4Addr {
        broadcast_address(self.ip, self.netmask)
    }
}

/// Source of the local interface list, consulted on every announce tick.
pub trait InterfaceSource: Send {
    /// Non-loopback IPv4 addresses. Empty means not connected.
    fn ipv4_interfaces(&self) -> Vec<InterfaceAddr>;
}

/// Enumerates the host's network interfaces.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemInterfaces;

impl InterfaceSource for SystemInterfaces {
    fn ipv4_interfaces(&self) -> Vec<InterfaceAddr> {
        list_local_interfaces()
    }
}

/// Fixed interface list, for pinned deployments and tests.
#[derive(Debug, Default, Clone)]
pub struct StaticInterfaces(pub Vec<InterfaceAddr>);

impl InterfaceSource for StaticInterfaces {
    fn ipv4_interfaces(&self) -> Vec<InterfaceAddr> {
        self.0.clone()
    }
}

/// Every non-loopback IPv4 address on the host. Order is system dependent.
/// Enumeration failures are treated as having no usable interface.
pub fn list_local_interfaces() -> Vec<InterfaceAddr> {
    let Ok(interfaces) = if_addrs::get_if_addrs() else {
        return Vec::new();
    };

    interfaces
        .into_iter()
        .filter(|iface| !iface.is_loopback())
        .filter_map(|iface| match iface.addr {
            if_addrs::IfAddr::V4(v4) => Some(InterfaceAddr::new(v4.ip, v4.netmask)),
            _ => None,
        })
        .collect()
}

/// Subnet broadcast address: every host bit under `netmask` set to one.
pub fn broadcast_address(ip: Ipv4Addr, netmask: Ipv4Addr) -> Ipv4Addr {
    Ipv4Addr::from(u32::from(ip) | !u32::from(netmask))
}

/// Dotted-quad variant of [`broadcast_address`]; `None` if either side does not parse.
pub fn parse_broadcast_address(ip: &str, netmask: &str) -> Option<Ipv4Addr> {
    Some(broadcast_address(ip.parse().ok()?, netmask.parse().ok()?))
}
