use std::{
  collections::{HashMap, HashSet},
  io,
  net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6},
  sync::Weak,
};

use agnostic_net::{
  Net, UdpSocket,
  runtime::{AsyncSpawner, RuntimeLite},
};
use async_channel::{Receiver, Sender};
use atomic_refcell::AtomicRefCell;
use futures::{FutureExt, StreamExt as _, stream::FuturesUnordered};
use triomphe::Arc;

use crate::{
  IPV4_MDNS, MAX_PAYLOAD_SIZE,
  interfaces::NetworkInterface,
  utils::{
    multicast_udp4_receiver, multicast_udp4_sender, multicast_udp6_receiver,
    multicast_udp6_sender,
  },
};

/// IPv6 multicast scope, the `x` digit of the `FF0x::FB` destination
/// group (RFC 4291 section 2.7).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
#[non_exhaustive]
pub enum MulticastScope {
  /// Interface-local scope (`FF01::FB`)
  InterfaceLocal,
  /// Link-local scope (`FF02::FB`), the scope mDNS normally operates in
  #[default]
  LinkLocal,
  /// Realm-local scope (`FF03::FB`)
  RealmLocal,
  /// Admin-local scope (`FF04::FB`)
  AdminLocal,
  /// Site-local scope (`FF05::FB`)
  SiteLocal,
  /// Organization-local scope (`FF08::FB`)
  OrganizationLocal,
  /// Global scope (`FF0E::FB`)
  Global,
}

impl MulticastScope {
  /// Returns the mDNS multicast group for this scope.
  pub const fn group(&self) -> Ipv6Addr {
    let scope = match self {
      Self::InterfaceLocal => 0x1,
      Self::LinkLocal => 0x2,
      Self::RealmLocal => 0x3,
      Self::AdminLocal => 0x4,
      Self::SiteLocal => 0x5,
      Self::OrganizationLocal => 0x8,
      Self::Global => 0xE,
    };
    Ipv6Addr::new(0xff00 | scope, 0, 0, 0, 0, 0, 0, 0xfb)
  }
}

/// Picks the IPv6 multicast scope used when sending from a given local
/// address. The default selector always chooses [`MulticastScope::LinkLocal`].
pub type ScopeSelector = std::sync::Arc<dyn Fn(&Ipv6Addr) -> MulticastScope + Send + Sync>;

/// Receives raw datagrams from the transport's receive loops.
pub(crate) trait PacketSink: Send + Sync + 'static {
  fn deliver(&self, from: SocketAddr, packet: &[u8]);
}

pub(crate) struct TransportOptions {
  pub(crate) use_ipv4: bool,
  pub(crate) use_ipv6: bool,
  pub(crate) port: u16,
  pub(crate) scope: ScopeSelector,
}

struct MulticastSender<N: Net> {
  dest: SocketAddr,
  conn: Arc<N::UdpSocket>,
}

/// Per-interface multicast plumbing.
///
/// A transport is active from construction until [`dispose`] and is never
/// restarted; a change in the usable interface set replaces the whole
/// instance.
///
/// [`dispose`]: Transport::dispose
pub(crate) struct Transport<N: Net> {
  senders: HashMap<IpAddr, MulticastSender<N>>,
  handles: AtomicRefCell<
    FuturesUnordered<<<N::Runtime as RuntimeLite>::Spawner as AsyncSpawner>::JoinHandle<()>>,
  >,
  shutdown_tx: Sender<()>,
}

impl<N: Net> Drop for Transport<N> {
  fn drop(&mut self) {
    self.shutdown_tx.close();
  }
}

impl<N: Net> Transport<N> {
  /// Builds sockets for the given interface snapshot and starts one
  /// receive loop per receiver socket.
  pub(crate) fn bind(
    interfaces: &[NetworkInterface],
    opts: &TransportOptions,
    sink: Weak<dyn PacketSink>,
  ) -> io::Result<Self> {
    let (shutdown_tx, shutdown_rx) = async_channel::bounded::<()>(1);
    let handles = FuturesUnordered::new();
    let mut receivers = 0usize;

    if opts.use_ipv4 {
      match Self::bind_receiver4(interfaces, opts.port) {
        Ok(conn) => {
          handles.push(<N::Runtime as RuntimeLite>::Spawner::spawn(receive_loop::<N>(
            Arc::new(conn),
            sink.clone(),
            shutdown_rx.clone(),
          )));
          receivers += 1;
        }
        Err(e) => {
          tracing::error!(err=%e, "mdns transport: failed to bind IPv4 receiver");
        }
      }
    }

    if opts.use_ipv6 {
      match Self::bind_receiver6(interfaces, opts) {
        Ok(conn) => {
          handles.push(<N::Runtime as RuntimeLite>::Spawner::spawn(receive_loop::<N>(
            Arc::new(conn),
            sink.clone(),
            shutdown_rx.clone(),
          )));
          receivers += 1;
        }
        Err(e) => {
          tracing::error!(err=%e, "mdns transport: failed to bind IPv6 receiver");
        }
      }
    }

    if receivers == 0 {
      shutdown_tx.close();
      return Err(io::Error::new(
        io::ErrorKind::InvalidInput,
        "no multicast listeners could be started",
      ));
    }

    let senders = Self::bind_senders(interfaces, opts);

    Ok(Self {
      senders,
      handles: AtomicRefCell::new(handles),
      shutdown_tx,
    })
  }

  fn bind_receiver4(interfaces: &[NetworkInterface], port: u16) -> io::Result<N::UdpSocket> {
    let conn = multicast_udp4_receiver(port)?;

    let mut joined = false;
    for interface in interfaces {
      for addr in interface.ipv4_addrs() {
        match conn.join_multicast_v4(&IPV4_MDNS, addr) {
          Ok(()) => joined = true,
          Err(e) => {
            tracing::error!(err=%e, interface=%interface.name(), addr=%addr, "mdns transport: failed to join IPv4 group");
          }
        }
      }
    }

    if !joined {
      // fall back to whatever interface the OS considers default
      conn.join_multicast_v4(&IPV4_MDNS, &Ipv4Addr::UNSPECIFIED)?;
    }

    <N::UdpSocket as TryFrom<_>>::try_from(conn)
  }

  fn bind_receiver6(
    interfaces: &[NetworkInterface],
    opts: &TransportOptions,
  ) -> io::Result<N::UdpSocket> {
    let conn = multicast_udp6_receiver(opts.port)?;

    let mut joined = false;
    let mut groups: HashSet<(Ipv6Addr, u32)> = HashSet::new();
    for interface in interfaces {
      let index = interface.index().unwrap_or(0);
      for addr in interface.ipv6_addrs() {
        let group = (opts.scope)(addr).group();
        if !groups.insert((group, index)) {
          continue;
        }

        match conn.join_multicast_v6(&group, index) {
          Ok(()) => joined = true,
          Err(e) => {
            tracing::error!(err=%e, interface=%interface.name(), %group, "mdns transport: failed to join IPv6 group");
          }
        }
      }
    }

    if !joined {
      conn.join_multicast_v6(&MulticastScope::LinkLocal.group(), 0)?;
    }

    <N::UdpSocket as TryFrom<_>>::try_from(conn)
  }

  /// One sender socket per local unicast address, bound to
  /// `(local, port)` with the interface as the outgoing multicast route.
  /// A transient `AddrNotAvailable` bind failure (a VPN address mid-flap)
  /// only skips that sender.
  fn bind_senders(
    interfaces: &[NetworkInterface],
    opts: &TransportOptions,
  ) -> HashMap<IpAddr, MulticastSender<N>> {
    let mut senders = HashMap::new();

    for interface in interfaces {
      for addr in interface.addrs() {
        let built = match addr {
          IpAddr::V4(local) => {
            if !opts.use_ipv4 {
              continue;
            }
            multicast_udp4_sender(*local, opts.port).map(|conn| {
              (
                SocketAddr::V4(SocketAddrV4::new(IPV4_MDNS, opts.port)),
                conn,
              )
            })
          }
          IpAddr::V6(local) => {
            if !opts.use_ipv6 {
              continue;
            }
            let group = (opts.scope)(local).group();
            let index = interface.index().unwrap_or(0);
            multicast_udp6_sender(*local, index, group, opts.port).map(|conn| {
              (
                SocketAddr::V6(SocketAddrV6::new(group, opts.port, 0, 0)),
                conn,
              )
            })
          }
        };

        match built.and_then(|(dest, conn)| {
          <N::UdpSocket as TryFrom<_>>::try_from(conn).map(|conn| (dest, conn))
        }) {
          Ok((dest, conn)) => {
            senders.insert(
              *addr,
              MulticastSender {
                dest,
                conn: Arc::new(conn),
              },
            );
          }
          Err(e) if e.kind() == io::ErrorKind::AddrNotAvailable => {
            tracing::debug!(interface=%interface.name(), addr=%addr, "mdns transport: address not available, skipping sender");
          }
          Err(e) => {
            tracing::error!(err=%e, interface=%interface.name(), addr=%addr, "mdns transport: failed to bind sender");
          }
        }
      }
    }

    senders
  }

  /// Multicasts one datagram from every sender socket. Per-sender
  /// failures are logged and do not abort the rest of the broadcast.
  pub(crate) async fn send(&self, packet: &[u8]) {
    for (local, sender) in self.senders.iter() {
      tracing::trace!(local=%local, dest=%sender.dest, len=%packet.len(), "mdns transport: sending packet");
      if let Err(e) = sender.conn.send_to(packet, sender.dest).await {
        tracing::error!(err=%e, local=%local, dest=%sender.dest, "mdns transport: failed to send packet");
      }
    }
  }

  /// Shuts the transport down and waits for its receive loops to exit.
  ///
  /// This method is concurrent safe and can be called multiple times, but
  /// only the first call has an effect.
  pub(crate) async fn dispose(&self) {
    if !self.shutdown_tx.close() {
      return;
    }

    let mut handles = core::mem::take(&mut *self.handles.borrow_mut());
    while handles.next().await.is_some() {}
  }
}

pub(crate) async fn receive_loop<N: Net>(
  conn: Arc<N::UdpSocket>,
  sink: Weak<dyn PacketSink>,
  shutdown_rx: Receiver<()>,
) {
  let local_addr = match conn.local_addr() {
    Ok(addr) => addr,
    Err(e) => {
      tracing::error!(err=%e, "mdns transport: receiver has no local address");
      return;
    }
  };

  let mut buf = vec![0; MAX_PAYLOAD_SIZE];
  loop {
    futures::select! {
      _ = shutdown_rx.recv().fuse() => {
        tracing::trace!(local=%local_addr, "mdns transport: shutting down receive loop");
        return;
      },
      res = conn.recv_from(&mut buf).fuse() => {
        match res {
          Ok((len, from)) => {
            if len == 0 {
              continue;
            }

            let Some(sink) = sink.upgrade() else {
              return;
            };
            tracing::trace!(local=%local_addr, from=%from, len=%len, "mdns transport: received packet");
            sink.deliver(from, &buf[..len]);
          }
          Err(e) => {
            tracing::error!(err=%e, local=%local_addr, "mdns transport: failed to receive from UDP socket");
            <N::Runtime as RuntimeLite>::yield_now().await;
          }
        }
      }
    }
  }
}
