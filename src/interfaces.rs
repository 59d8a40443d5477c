use std::{
  io,
  net::{IpAddr, Ipv4Addr, Ipv6Addr},
};

use smallvec_wrapper::TinyVec;
use smol_str::SmolStr;

// Interface flag bits, see netdevice(7)
#[cfg(target_os = "linux")]
const IFF_UP: u32 = 0x1;
#[cfg(target_os = "linux")]
const IFF_MULTICAST: u32 = 0x1000;

#[derive(Debug, Clone, Copy)]
struct InterfaceFlags {
  up: bool,
  multicast: bool,
}

/// Reads the operational flags of a named interface from the OS.
///
/// Returns `None` when the platform exposes no flag source; callers then
/// assume the interface is up and multicast-capable, since it would not
/// have been enumerated with an address otherwise.
#[cfg(target_os = "linux")]
fn interface_flags(name: &str) -> Option<InterfaceFlags> {
  let raw = std::fs::read_to_string(format!("/sys/class/net/{name}/flags")).ok()?;
  let bits = u32::from_str_radix(raw.trim().trim_start_matches("0x"), 16).ok()?;
  Some(InterfaceFlags {
    up: bits & IFF_UP != 0,
    multicast: bits & IFF_MULTICAST != 0,
  })
}

#[cfg(not(target_os = "linux"))]
fn interface_flags(_name: &str) -> Option<InterfaceFlags> {
  None
}

/// A usable network interface, as seen by the engine.
///
/// The OS interface name is the stable id: two handles describe the same
/// NIC iff their names match. A handle is created when the interface is
/// discovered and retired when a later snapshot no longer contains it.
#[derive(Debug, Clone)]
pub struct NetworkInterface {
  name: SmolStr,
  index: Option<u32>,
  up: bool,
  multicast: bool,
  loopback: bool,
  addrs: TinyVec<IpAddr>,
}

impl NetworkInterface {
  /// Returns the OS name of the interface, its stable id.
  #[inline]
  pub fn name(&self) -> &SmolStr {
    &self.name
  }

  /// Returns the OS index of the interface, when known.
  #[inline]
  pub const fn index(&self) -> Option<u32> {
    self.index
  }

  /// Returns `true` if the interface was operationally up at snapshot
  /// time.
  #[inline]
  pub const fn is_up(&self) -> bool {
    self.up
  }

  /// Returns `true` if the interface advertises multicast support.
  #[inline]
  pub const fn supports_multicast(&self) -> bool {
    self.multicast
  }

  /// Returns `true` if this is a loopback interface.
  #[inline]
  pub const fn is_loopback(&self) -> bool {
    self.loopback
  }

  /// Returns the unicast addresses of the interface.
  #[inline]
  pub fn addrs(&self) -> &[IpAddr] {
    &self.addrs
  }

  /// Returns the IPv4 unicast addresses of the interface.
  pub fn ipv4_addrs(&self) -> impl Iterator<Item = &Ipv4Addr> {
    self.addrs.iter().filter_map(|addr| match addr {
      IpAddr::V4(v4) => Some(v4),
      IpAddr::V6(_) => None,
    })
  }

  /// Returns the IPv6 unicast addresses of the interface.
  pub fn ipv6_addrs(&self) -> impl Iterator<Item = &Ipv6Addr> {
    self.addrs.iter().filter_map(|addr| match addr {
      IpAddr::V4(_) => None,
      IpAddr::V6(v6) => Some(v6),
    })
  }
}

/// Takes a snapshot of the interfaces currently usable for multicast.
///
/// An interface is usable when it is operationally up, carries at least
/// one non-unspecified unicast address and advertises multicast support.
/// The kernel loops multicast over loopback without advertising the flag,
/// so loopback interfaces are exempt from the multicast check; they are
/// included only when `include_loopback` is set, or as a fallback when no
/// other usable interface exists. Order within the snapshot is
/// unspecified.
pub(crate) fn usable_interfaces(include_loopback: bool) -> io::Result<Vec<NetworkInterface>> {
  let mut interfaces: Vec<NetworkInterface> = Vec::new();
  let mut loopbacks: Vec<NetworkInterface> = Vec::new();

  for iface in if_addrs::get_if_addrs()? {
    let ip = iface.ip();
    if ip.is_unspecified() {
      continue;
    }

    let loopback = iface.is_loopback();
    let flags = interface_flags(&iface.name).unwrap_or(InterfaceFlags {
      up: true,
      multicast: true,
    });
    if !flags.up {
      continue;
    }
    if !loopback && !flags.multicast {
      // a tun or ppp device with an address still cannot join the group
      continue;
    }

    let bucket = if loopback && !include_loopback {
      &mut loopbacks
    } else {
      &mut interfaces
    };

    match bucket.iter().position(|i| *i.name == *iface.name) {
      Some(pos) => {
        let existing = &mut bucket[pos];
        if !existing.addrs.contains(&ip) {
          existing.addrs.push(ip);
        }
      }
      None => {
        let mut addrs = TinyVec::new();
        addrs.push(ip);
        bucket.push(NetworkInterface {
          name: SmolStr::new(&iface.name),
          index: iface.index,
          up: flags.up,
          multicast: flags.multicast,
          loopback,
          addrs,
        });
      }
    }
  }

  // a host with nothing but loopback still gets to talk to itself
  if interfaces.is_empty() {
    interfaces = loopbacks;
  }

  Ok(interfaces)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn snapshot_has_unique_stable_ids() {
    let interfaces = usable_interfaces(true).unwrap();
    for (i, a) in interfaces.iter().enumerate() {
      assert!(!a.name().is_empty());
      assert!(!a.addrs().is_empty());
      for b in interfaces.iter().skip(i + 1) {
        assert_ne!(a.name(), b.name());
      }
    }
  }

  #[test]
  fn snapshot_only_contains_usable_interfaces() {
    for interface in usable_interfaces(true).unwrap() {
      assert!(interface.is_up());
      if !interface.is_loopback() {
        assert!(interface.supports_multicast());
      }
    }
  }

  #[test]
  fn loopback_is_excluded_unless_it_is_all_there_is() {
    let interfaces = usable_interfaces(false).unwrap();
    let any_loopback = interfaces.iter().any(|i| i.is_loopback());
    let all_loopback = interfaces.iter().all(|i| i.is_loopback());

    // either the fallback kicked in (loopback only) or no loopback is listed
    assert!(!any_loopback || all_loopback);
  }
}
