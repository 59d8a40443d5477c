use std::{
  io,
  net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV6, UdpSocket as StdUdpSocket},
};

use crate::IPV4_MDNS;

/// RFC 6762 section 11: all outbound mDNS sockets use an IP TTL of 255.
const MDNS_TTL: u32 = 255;

#[cfg(unix)]
pub(crate) use unix_impl::*;

#[cfg(unix)]
mod unix_impl {
  use super::*;
  use rustix::net::{AddressFamily, SocketType, bind, ipproto, socket, sockopt};

  pub(crate) fn unicast_udp4_socket() -> io::Result<StdUdpSocket> {
    let sock = socket(AddressFamily::INET, SocketType::DGRAM, Some(ipproto::UDP))?;
    sockopt::set_ip_ttl(&sock, MDNS_TTL)?;
    sockopt::set_ip_multicast_ttl(&sock, MDNS_TTL)?;

    let addr: SocketAddr = (Ipv4Addr::UNSPECIFIED, 0).into();
    bind(&sock, &addr)?;

    let sock = StdUdpSocket::from(sock);
    sock.set_nonblocking(true)?;
    Ok(sock)
  }

  pub(crate) fn unicast_udp6_socket() -> io::Result<StdUdpSocket> {
    let sock = socket(AddressFamily::INET6, SocketType::DGRAM, Some(ipproto::UDP))?;
    sockopt::set_ipv6_v6only(&sock, true)?;
    sockopt::set_ipv6_unicast_hops(&sock, Some(MDNS_TTL as u8))?;
    sockopt::set_ipv6_multicast_hops(&sock, MDNS_TTL)?;

    let addr: SocketAddr = (Ipv6Addr::UNSPECIFIED, 0).into();
    bind(&sock, &addr)?;

    let sock = StdUdpSocket::from(sock);
    sock.set_nonblocking(true)?;
    Ok(sock)
  }

  pub(crate) fn multicast_udp4_receiver(port: u16) -> io::Result<StdUdpSocket> {
    let sock = socket(AddressFamily::INET, SocketType::DGRAM, Some(ipproto::UDP))?;
    sockopt::set_socket_reuseaddr(&sock, true)?;
    sockopt::set_socket_reuseport(&sock, true)?;
    sockopt::set_ip_ttl(&sock, MDNS_TTL)?;
    sockopt::set_ip_multicast_ttl(&sock, MDNS_TTL)?;

    let addr: SocketAddr = (Ipv4Addr::UNSPECIFIED, port).into();
    bind(&sock, &addr)?;

    let sock = StdUdpSocket::from(sock);
    sock.set_multicast_loop_v4(true)?;
    sock.set_nonblocking(true)?;
    Ok(sock)
  }

  pub(crate) fn multicast_udp6_receiver(port: u16) -> io::Result<StdUdpSocket> {
    let sock = socket(AddressFamily::INET6, SocketType::DGRAM, Some(ipproto::UDP))?;
    sockopt::set_socket_reuseaddr(&sock, true)?;
    sockopt::set_socket_reuseport(&sock, true)?;
    sockopt::set_ipv6_v6only(&sock, true)?;
    sockopt::set_ipv6_unicast_hops(&sock, Some(MDNS_TTL as u8))?;
    sockopt::set_ipv6_multicast_hops(&sock, MDNS_TTL)?;

    let addr: SocketAddr = (Ipv6Addr::UNSPECIFIED, port).into();
    bind(&sock, &addr)?;

    let sock = StdUdpSocket::from(sock);
    sock.set_multicast_loop_v6(true)?;
    sock.set_nonblocking(true)?;
    Ok(sock)
  }

  pub(crate) fn multicast_udp4_sender(local: Ipv4Addr, port: u16) -> io::Result<StdUdpSocket> {
    let sock = socket(AddressFamily::INET, SocketType::DGRAM, Some(ipproto::UDP))?;
    sockopt::set_socket_reuseaddr(&sock, true)?;
    sockopt::set_socket_reuseport(&sock, true)?;
    sockopt::set_ip_ttl(&sock, MDNS_TTL)?;
    sockopt::set_ip_multicast_ttl(&sock, MDNS_TTL)?;

    let addr: SocketAddr = (local, port).into();
    bind(&sock, &addr)?;

    sockopt::set_ip_multicast_if(&sock, &local)?;

    let sock = StdUdpSocket::from(sock);
    sock.join_multicast_v4(&IPV4_MDNS, &local)?;
    sock.set_multicast_loop_v4(true)?;
    sock.set_nonblocking(true)?;
    Ok(sock)
  }

  pub(crate) fn multicast_udp6_sender(
    local: Ipv6Addr,
    index: u32,
    group: Ipv6Addr,
    port: u16,
  ) -> io::Result<StdUdpSocket> {
    let sock = socket(AddressFamily::INET6, SocketType::DGRAM, Some(ipproto::UDP))?;
    sockopt::set_socket_reuseaddr(&sock, true)?;
    sockopt::set_socket_reuseport(&sock, true)?;
    sockopt::set_ipv6_v6only(&sock, true)?;
    sockopt::set_ipv6_unicast_hops(&sock, Some(MDNS_TTL as u8))?;
    sockopt::set_ipv6_multicast_hops(&sock, MDNS_TTL)?;

    let addr: SocketAddr = SocketAddrV6::new(local, port, 0, index).into();
    bind(&sock, &addr)?;

    if index != 0 {
      sockopt::set_ipv6_multicast_if(&sock, index)?;
    }

    let sock = StdUdpSocket::from(sock);
    sock.join_multicast_v6(&group, index)?;
    sock.set_multicast_loop_v6(true)?;
    sock.set_nonblocking(true)?;
    Ok(sock)
  }
}

#[cfg(windows)]
pub(crate) use windows_impl::*;

#[cfg(windows)]
mod windows_impl {
  use super::*;
  use socket2::{Domain, Protocol, Socket, Type};

  pub(crate) fn unicast_udp4_socket() -> io::Result<StdUdpSocket> {
    let sock = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    sock.set_ttl(MDNS_TTL)?;
    sock.set_multicast_ttl_v4(MDNS_TTL)?;

    let addr: SocketAddr = (Ipv4Addr::UNSPECIFIED, 0).into();
    sock.bind(&addr.into())?;

    let sock = StdUdpSocket::from(sock);
    sock.set_nonblocking(true)?;
    Ok(sock)
  }

  pub(crate) fn unicast_udp6_socket() -> io::Result<StdUdpSocket> {
    let sock = Socket::new(Domain::IPV6, Type::DGRAM, Some(Protocol::UDP))?;
    sock.set_only_v6(true)?;
    sock.set_unicast_hops_v6(MDNS_TTL)?;
    sock.set_multicast_hops_v6(MDNS_TTL)?;

    let addr: SocketAddr = (Ipv6Addr::UNSPECIFIED, 0).into();
    sock.bind(&addr.into())?;

    let sock = StdUdpSocket::from(sock);
    sock.set_nonblocking(true)?;
    Ok(sock)
  }

  pub(crate) fn multicast_udp4_receiver(port: u16) -> io::Result<StdUdpSocket> {
    let sock = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    sock.set_reuse_address(true)?;
    sock.set_ttl(MDNS_TTL)?;
    sock.set_multicast_ttl_v4(MDNS_TTL)?;

    let addr: SocketAddr = (Ipv4Addr::UNSPECIFIED, port).into();
    sock.bind(&addr.into())?;

    let sock = StdUdpSocket::from(sock);
    sock.set_multicast_loop_v4(true)?;
    sock.set_nonblocking(true)?;
    Ok(sock)
  }

  pub(crate) fn multicast_udp6_receiver(port: u16) -> io::Result<StdUdpSocket> {
    let sock = Socket::new(Domain::IPV6, Type::DGRAM, Some(Protocol::UDP))?;
    sock.set_reuse_address(true)?;
    sock.set_only_v6(true)?;
    sock.set_unicast_hops_v6(MDNS_TTL)?;
    sock.set_multicast_hops_v6(MDNS_TTL)?;

    let addr: SocketAddr = (Ipv6Addr::UNSPECIFIED, port).into();
    sock.bind(&addr.into())?;

    let sock = StdUdpSocket::from(sock);
    sock.set_multicast_loop_v6(true)?;
    sock.set_nonblocking(true)?;
    Ok(sock)
  }

  pub(crate) fn multicast_udp4_sender(local: Ipv4Addr, port: u16) -> io::Result<StdUdpSocket> {
    let sock = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    sock.set_reuse_address(true)?;
    sock.set_ttl(MDNS_TTL)?;
    sock.set_multicast_ttl_v4(MDNS_TTL)?;

    let addr: SocketAddr = (local, port).into();
    sock.bind(&addr.into())?;

    sock.set_multicast_if_v4(&local)?;

    let sock = StdUdpSocket::from(sock);
    sock.join_multicast_v4(&IPV4_MDNS, &local)?;
    sock.set_multicast_loop_v4(true)?;
    sock.set_nonblocking(true)?;
    Ok(sock)
  }

  pub(crate) fn multicast_udp6_sender(
    local: Ipv6Addr,
    index: u32,
    group: Ipv6Addr,
    port: u16,
  ) -> io::Result<StdUdpSocket> {
    let sock = Socket::new(Domain::IPV6, Type::DGRAM, Some(Protocol::UDP))?;
    sock.set_reuse_address(true)?;
    sock.set_only_v6(true)?;
    sock.set_unicast_hops_v6(MDNS_TTL)?;
    sock.set_multicast_hops_v6(MDNS_TTL)?;

    let addr: SocketAddr = SocketAddrV6::new(local, port, 0, index).into();
    sock.bind(&addr.into())?;

    if index != 0 {
      sock.set_multicast_if_v6(index)?;
    }

    let sock = StdUdpSocket::from(sock);
    sock.join_multicast_v6(&group, index)?;
    sock.set_multicast_loop_v6(true)?;
    sock.set_nonblocking(true)?;
    Ok(sock)
  }
}
