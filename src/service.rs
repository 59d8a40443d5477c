use std::{
  collections::HashSet,
  io,
  net::SocketAddr,
  panic::AssertUnwindSafe,
  sync::{
    Arc as StdArc, Weak as StdWeak,
    atomic::{AtomicU64, Ordering},
  },
  time::Duration,
};

use agnostic_net::{
  Net, UdpSocket,
  runtime::{AsyncSpawner, RuntimeLite},
};
use async_channel::{Receiver, Sender};
use futures::{FutureExt, StreamExt as _, stream::FuturesUnordered};
use iprobe::{ipv4, ipv6};
use parking_lot::Mutex;
use smol_str::SmolStr;
use triomphe::Arc;

use crate::{
  Error, IP_UDP_OVERHEAD, MAX_PAYLOAD_SIZE, MDNS_PORT,
  interfaces::{NetworkInterface, usable_interfaces},
  recent::RecentMessages,
  transport::{MulticastScope, PacketSink, ScopeSelector, Transport, TransportOptions, receive_loop},
  types::{DNSClass, Message, Name, OP_CODE_QUERY, RESPONSE_CODE_NO_ERROR, RecordType},
  utils::{unicast_udp4_socket, unicast_udp6_socket},
};

/// RFC 6762 section 10: responses to legacy unicast queries use TTLs of
/// at most ten seconds.
const MAX_LEGACY_UNICAST_TTL: u32 = 10;

const DEFAULT_HOST_RECORD_TTL: u32 = 120;
const DEFAULT_NON_HOST_TTL: u32 = 4500;
const DEFAULT_INTERFACE_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// A predicate over discovered interfaces; interfaces it rejects are not
/// used by the transport.
pub type InterfaceFilter = StdArc<dyn Fn(&NetworkInterface) -> bool + Send + Sync>;

/// The options for [`MulticastService`], read once at
/// [`start`](MulticastService::start).
#[derive(Clone)]
pub struct ServiceOptions {
  use_ipv4: bool,
  use_ipv6: bool,
  ignore_duplicate_messages: bool,
  include_loopback: bool,
  enable_unicast_answers: bool,
  host_record_ttl: u32,
  non_host_ttl: u32,
  interface_filter: Option<InterfaceFilter>,
  ipv6_scope: ScopeSelector,
  interface_poll_interval: Duration,
}

impl Default for ServiceOptions {
  #[inline]
  fn default() -> Self {
    Self::new()
  }
}

impl core::fmt::Debug for ServiceOptions {
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    f.debug_struct("ServiceOptions")
      .field("use_ipv4", &self.use_ipv4)
      .field("use_ipv6", &self.use_ipv6)
      .field("ignore_duplicate_messages", &self.ignore_duplicate_messages)
      .field("include_loopback", &self.include_loopback)
      .field("enable_unicast_answers", &self.enable_unicast_answers)
      .field("host_record_ttl", &self.host_record_ttl)
      .field("non_host_ttl", &self.non_host_ttl)
      .field("interface_poll_interval", &self.interface_poll_interval)
      .finish_non_exhaustive()
  }
}

impl ServiceOptions {
  /// Returns a new instance of [`ServiceOptions`].
  ///
  /// IPv4 and IPv6 each default to whether the OS supports the family.
  pub fn new() -> Self {
    Self {
      use_ipv4: ipv4(),
      use_ipv6: ipv6(),
      ignore_duplicate_messages: true,
      include_loopback: false,
      enable_unicast_answers: true,
      host_record_ttl: DEFAULT_HOST_RECORD_TTL,
      non_host_ttl: DEFAULT_NON_HOST_TTL,
      interface_filter: None,
      ipv6_scope: StdArc::new(|_| MulticastScope::LinkLocal),
      interface_poll_interval: DEFAULT_INTERFACE_POLL_INTERVAL,
    }
  }

  /// Sets whether the service participates in the IPv4 group.
  #[inline]
  pub fn with_ipv4(mut self, use_ipv4: bool) -> Self {
    self.use_ipv4 = use_ipv4;
    self
  }

  /// Returns whether the service participates in the IPv4 group.
  #[inline]
  pub const fn ipv4(&self) -> bool {
    self.use_ipv4
  }

  /// Sets whether the service participates in the IPv6 group.
  #[inline]
  pub fn with_ipv6(mut self, use_ipv6: bool) -> Self {
    self.use_ipv6 = use_ipv6;
    self
  }

  /// Returns whether the service participates in the IPv6 group.
  #[inline]
  pub const fn ipv6(&self) -> bool {
    self.use_ipv6
  }

  /// Sets whether byte-identical packets received within one second are
  /// delivered only once.
  ///
  /// Default is `true`.
  ///
  /// ## Example
  ///
  /// ```rust
  /// use multicast_dns::ServiceOptions;
  ///
  /// let opts = ServiceOptions::new().with_ignore_duplicate_messages(false);
  /// assert!(!opts.ignore_duplicate_messages());
  /// ```
  #[inline]
  pub fn with_ignore_duplicate_messages(mut self, ignore: bool) -> Self {
    self.ignore_duplicate_messages = ignore;
    self
  }

  /// Returns whether duplicate inbound packets are suppressed.
  #[inline]
  pub const fn ignore_duplicate_messages(&self) -> bool {
    self.ignore_duplicate_messages
  }

  /// Sets whether loopback interfaces are used even when other usable
  /// interfaces exist.
  ///
  /// Default is `false`; a host whose only usable interface is loopback
  /// uses it regardless of this flag.
  #[inline]
  pub fn with_include_loopback(mut self, include_loopback: bool) -> Self {
    self.include_loopback = include_loopback;
    self
  }

  /// Returns whether loopback interfaces are always included.
  #[inline]
  pub const fn include_loopback(&self) -> bool {
    self.include_loopback
  }

  /// Sets whether answers directed at a specific endpoint are sent
  /// unicast. When disabled, such answers fall back to multicast; replies
  /// to legacy unicast queries are always sent unicast.
  ///
  /// Default is `true`.
  #[inline]
  pub fn with_enable_unicast_answers(mut self, enable: bool) -> Self {
    self.enable_unicast_answers = enable;
    self
  }

  /// Returns whether endpoint-directed answers are sent unicast.
  #[inline]
  pub const fn enable_unicast_answers(&self) -> bool {
    self.enable_unicast_answers
  }

  /// Sets the TTL, in seconds, applied to outbound host records
  /// (A, AAAA, SRV, HINFO and PTR).
  ///
  /// Default is 120 seconds.
  ///
  /// ## Example
  ///
  /// ```rust
  /// use multicast_dns::ServiceOptions;
  ///
  /// let opts = ServiceOptions::new().with_host_record_ttl(60);
  /// assert_eq!(opts.host_record_ttl(), 60);
  /// ```
  #[inline]
  pub fn with_host_record_ttl(mut self, ttl: u32) -> Self {
    self.host_record_ttl = ttl;
    self
  }

  /// Returns the TTL applied to outbound host records, in seconds.
  #[inline]
  pub const fn host_record_ttl(&self) -> u32 {
    self.host_record_ttl
  }

  /// Sets the TTL, in seconds, applied to outbound records that do not
  /// describe a host.
  ///
  /// Default is 4500 seconds (75 minutes).
  #[inline]
  pub fn with_non_host_ttl(mut self, ttl: u32) -> Self {
    self.non_host_ttl = ttl;
    self
  }

  /// Returns the TTL applied to outbound non-host records, in seconds.
  #[inline]
  pub const fn non_host_ttl(&self) -> u32 {
    self.non_host_ttl
  }

  /// Sets a predicate over discovered interfaces; the transport only
  /// binds interfaces the predicate accepts.
  #[inline]
  pub fn with_interface_filter(mut self, filter: InterfaceFilter) -> Self {
    self.interface_filter = Some(filter);
    self
  }

  /// Returns the interface predicate, if one is set.
  #[inline]
  pub fn interface_filter(&self) -> Option<&InterfaceFilter> {
    self.interface_filter.as_ref()
  }

  /// Sets the selector mapping a local IPv6 address to the multicast
  /// scope used when sending from it.
  ///
  /// The default selector always picks the link-local group `FF02::FB`.
  #[inline]
  pub fn with_ipv6_scope(mut self, selector: ScopeSelector) -> Self {
    self.ipv6_scope = selector;
    self
  }

  /// Returns the IPv6 scope selector.
  #[inline]
  pub fn ipv6_scope(&self) -> &ScopeSelector {
    &self.ipv6_scope
  }

  /// Sets how often the service re-snapshots the usable interfaces to
  /// detect additions and removals.
  ///
  /// Default is 10 seconds.
  #[inline]
  pub fn with_interface_poll_interval(mut self, interval: Duration) -> Self {
    self.interface_poll_interval = interval;
    self
  }

  /// Returns the interface poll interval.
  #[inline]
  pub const fn interface_poll_interval(&self) -> Duration {
    self.interface_poll_interval
  }
}

/// A query received from a remote endpoint.
#[derive(Debug, Clone)]
pub struct QueryEvent {
  message: Message,
  from: SocketAddr,
}

impl QueryEvent {
  /// Returns the decoded query message.
  #[inline]
  pub const fn message(&self) -> &Message {
    &self.message
  }

  /// Returns the endpoint the query came from.
  #[inline]
  pub const fn from(&self) -> SocketAddr {
    self.from
  }

  /// Returns `true` if the querier is a legacy unicast resolver.
  ///
  /// RFC 6762 section 6.7: a query is legacy iff its source port is not
  /// the mDNS port. Such queriers need a unicast reply mirroring their
  /// message id and questions.
  #[inline]
  pub fn is_legacy_unicast(&self) -> bool {
    self.from.port() != MDNS_PORT
  }
}

/// An answer message received from a remote endpoint.
#[derive(Debug, Clone)]
pub struct AnswerEvent {
  message: Message,
  from: SocketAddr,
}

impl AnswerEvent {
  /// Returns the decoded answer message.
  #[inline]
  pub const fn message(&self) -> &Message {
    &self.message
  }

  /// Returns the endpoint the answer came from.
  #[inline]
  pub const fn from(&self) -> SocketAddr {
    self.from
  }
}

static NEXT_SUBSCRIPTION: AtomicU64 = AtomicU64::new(0);

struct Listeners<T: ?Sized> {
  inner: StdArc<Mutex<Vec<(u64, StdArc<dyn Fn(&T) + Send + Sync>)>>>,
}

impl<T: ?Sized> Listeners<T> {
  fn new() -> Self {
    Self {
      inner: StdArc::new(Mutex::new(Vec::new())),
    }
  }

  fn subscribe<F>(&self, callback: F) -> Subscription
  where
    F: Fn(&T) + Send + Sync + 'static,
    T: 'static,
  {
    let id = NEXT_SUBSCRIPTION.fetch_add(1, Ordering::Relaxed);
    self.inner.lock().push((id, StdArc::new(callback)));

    let weak = StdArc::downgrade(&self.inner);
    Subscription {
      cancel: Some(Box::new(move || {
        if let Some(list) = weak.upgrade() {
          list.lock().retain(|(i, _)| *i != id);
        }
      })),
    }
  }

  /// Callbacks are invoked outside the registry lock, so a callback may
  /// register or drop subscriptions. A panicking callback is logged and
  /// never unwinds into the dispatch loop.
  fn emit(&self, event: &T) {
    let callbacks: Vec<_> = self
      .inner
      .lock()
      .iter()
      .map(|(_, callback)| callback.clone())
      .collect();

    for callback in callbacks {
      if std::panic::catch_unwind(AssertUnwindSafe(|| callback(event))).is_err() {
        tracing::error!("mdns service: event callback panicked");
      }
    }
  }

  fn clear(&self) {
    self.inner.lock().clear();
  }
}

/// A handle to a registered event callback. Dropping the handle
/// unregisters the callback.
pub struct Subscription {
  cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
  /// Leaves the callback registered until the service is stopped.
  #[inline]
  pub fn forget(mut self) {
    self.cancel = None;
  }
}

impl Drop for Subscription {
  fn drop(&mut self) {
    if let Some(cancel) = self.cancel.take() {
      cancel();
    }
  }
}

impl core::fmt::Debug for Subscription {
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    f.debug_struct("Subscription").finish_non_exhaustive()
  }
}

/// A handle to cancel a [`resolve`](MulticastService::resolve).
#[derive(Debug, Clone)]
pub struct Canceller {
  tx: Sender<()>,
  rx: Receiver<()>,
}

impl Default for Canceller {
  #[inline]
  fn default() -> Self {
    Self::new()
  }
}

impl Canceller {
  /// Returns a new canceller.
  pub fn new() -> Self {
    let (tx, rx) = async_channel::bounded(1);
    Self { tx, rx }
  }

  /// Cancels the associated operation.
  ///
  /// Returns `true` if this call performed the cancellation, `false` if
  /// it was already cancelled.
  #[inline]
  pub fn cancel(&self) -> bool {
    self.tx.close()
  }
}

struct Active<N: Net> {
  max_payload: usize,
  transport: Option<Arc<Transport<N>>>,
  unicast4: Option<Arc<N::UdpSocket>>,
  unicast6: Option<Arc<N::UdpSocket>>,
  shutdown_tx: Sender<()>,
  handles: FuturesUnordered<<<N::Runtime as RuntimeLite>::Spawner as AsyncSpawner>::JoinHandle<()>>,
}

struct Inner<N: Net> {
  opts: ServiceOptions,
  weak: StdWeak<Inner<N>>,
  state: Mutex<Option<Active<N>>>,
  known_interfaces: Mutex<HashSet<SmolStr>>,
  inbound: RecentMessages,
  outbound: RecentMessages,
  query_listeners: Listeners<QueryEvent>,
  answer_listeners: Listeners<AnswerEvent>,
  malformed_listeners: Listeners<[u8]>,
  interface_listeners: Listeners<[NetworkInterface]>,
}

/// The mDNS multicast engine: per-interface transport, inbound dispatch
/// and RFC 6762 answer handling.
///
/// Consumers register callbacks for [queries](MulticastService::on_query),
/// [answers](MulticastService::on_answer),
/// [malformed packets](MulticastService::on_malformed_message) and
/// [interface changes](MulticastService::on_interfaces_discovered), then
/// call [`start`](MulticastService::start).
pub struct MulticastService<N: Net> {
  inner: StdArc<Inner<N>>,
}

impl<N: Net> Default for MulticastService<N> {
  #[inline]
  fn default() -> Self {
    Self::new(ServiceOptions::default())
  }
}

impl<N: Net> MulticastService<N> {
  /// Creates a new service with the given options. No sockets are opened
  /// until [`start`](MulticastService::start).
  pub fn new(opts: ServiceOptions) -> Self {
    Self {
      inner: StdArc::new_cyclic(|weak| Inner {
        opts,
        weak: weak.clone(),
        state: Mutex::new(None),
        known_interfaces: Mutex::new(HashSet::new()),
        inbound: RecentMessages::new(),
        outbound: RecentMessages::new(),
        query_listeners: Listeners::new(),
        answer_listeners: Listeners::new(),
        malformed_listeners: Listeners::new(),
        interface_listeners: Listeners::new(),
      }),
    }
  }

  /// Returns the options of the service.
  #[inline]
  pub fn options(&self) -> &ServiceOptions {
    &self.inner.opts
  }

  /// Registers a callback invoked for every query received from the
  /// network. Dropping the returned handle unregisters it.
  pub fn on_query<F>(&self, callback: F) -> Subscription
  where
    F: Fn(&QueryEvent) + Send + Sync + 'static,
  {
    self.inner.query_listeners.subscribe(callback)
  }

  /// Registers a callback invoked for every answer message received from
  /// the network. Dropping the returned handle unregisters it.
  pub fn on_answer<F>(&self, callback: F) -> Subscription
  where
    F: Fn(&AnswerEvent) + Send + Sync + 'static,
  {
    self.inner.answer_listeners.subscribe(callback)
  }

  /// Registers a callback invoked with the raw bytes of every inbound
  /// packet the codec rejects. Dropping the returned handle unregisters it.
  pub fn on_malformed_message<F>(&self, callback: F) -> Subscription
  where
    F: Fn(&[u8]) + Send + Sync + 'static,
  {
    self.inner.malformed_listeners.subscribe(callback)
  }

  /// Registers a callback invoked with newly discovered interfaces after
  /// each interface-set change. Dropping the returned handle unregisters it.
  pub fn on_interfaces_discovered<F>(&self, callback: F) -> Subscription
  where
    F: Fn(&[NetworkInterface]) + Send + Sync + 'static,
  {
    self.inner.interface_listeners.subscribe(callback)
  }

  /// Starts the service: discovers the usable interfaces, builds the
  /// multicast transport and the unicast sockets, and begins watching for
  /// interface changes.
  ///
  /// Calling `start` on a running service is a no-op; a stopped service
  /// can be started again.
  pub async fn start(&self) -> Result<(), Error> {
    let inner = &self.inner;
    let mut state = inner.state.lock();
    if state.is_some() {
      return Ok(());
    }

    if !inner.opts.use_ipv4 && !inner.opts.use_ipv6 {
      return Err(Error::Io(io::Error::new(
        io::ErrorKind::InvalidInput,
        "at least one of IPv4 and IPv6 must be enabled",
      )));
    }

    let interfaces = inner.discover_interfaces()?;
    {
      let mut known = inner.known_interfaces.lock();
      known.clear();
      known.extend(interfaces.iter().map(|i| i.name().clone()));
    }

    let (shutdown_tx, shutdown_rx) = async_channel::bounded::<()>(1);
    let handles = FuturesUnordered::new();
    let sink: StdWeak<dyn PacketSink> = inner.weak.clone();

    let transport = Transport::<N>::bind(&interfaces, &inner.transport_options(), sink.clone())?;

    let unicast4 = if inner.opts.use_ipv4 {
      match unicast_udp4_socket().and_then(<N::UdpSocket as TryFrom<_>>::try_from) {
        Ok(conn) => {
          let conn = Arc::new(conn);
          handles.push(<N::Runtime as RuntimeLite>::Spawner::spawn(receive_loop::<N>(
            conn.clone(),
            sink.clone(),
            shutdown_rx.clone(),
          )));
          Some(conn)
        }
        Err(e) => {
          tracing::error!(err=%e, "mdns service: failed to bind IPv4 unicast socket");
          None
        }
      }
    } else {
      None
    };

    let unicast6 = if inner.opts.use_ipv6 {
      match unicast_udp6_socket().and_then(<N::UdpSocket as TryFrom<_>>::try_from) {
        Ok(conn) => {
          let conn = Arc::new(conn);
          handles.push(<N::Runtime as RuntimeLite>::Spawner::spawn(receive_loop::<N>(
            conn.clone(),
            sink.clone(),
            shutdown_rx.clone(),
          )));
          Some(conn)
        }
        Err(e) => {
          tracing::error!(err=%e, "mdns service: failed to bind IPv6 unicast socket");
          None
        }
      }
    } else {
      None
    };

    handles.push(<N::Runtime as RuntimeLite>::Spawner::spawn(interface_watch::<N>(
      inner.weak.clone(),
      inner.opts.interface_poll_interval,
      shutdown_rx,
    )));

    tracing::info!(interfaces = interfaces.len(), "mdns service: started");

    *state = Some(Active {
      max_payload: MAX_PAYLOAD_SIZE - IP_UDP_OVERHEAD,
      transport: Some(Arc::new(transport)),
      unicast4,
      unicast6,
      shutdown_tx,
      handles,
    });

    Ok(())
  }

  /// Stops the service: clears all registered callbacks, stops watching
  /// for interface changes and disposes the transport. The service can be
  /// started again afterwards.
  pub async fn stop(&self) {
    let active = self.inner.state.lock().take();
    let Some(mut active) = active else {
      return;
    };

    self.inner.query_listeners.clear();
    self.inner.answer_listeners.clear();
    self.inner.malformed_listeners.clear();
    self.inner.interface_listeners.clear();

    active.shutdown_tx.close();
    if let Some(transport) = active.transport.take() {
      transport.dispose().await;
    }

    let mut handles = active.handles;
    while handles.next().await.is_some() {}

    tracing::info!("mdns service: stopped");
  }

  /// Sends a query message to the multicast groups. The outbound
  /// duplicate check is not applied to queries.
  pub async fn send_query(&self, mut message: Message) -> Result<(), Error> {
    self.inner.update_ttls(&mut message, false);
    let packet = message.encode()?;
    self.inner.send_multicast(&packet, false).await
  }

  /// Sends a one-question query for `name`.
  ///
  /// Pass [`RecordType::ANY`] and [`DNSClass::IN`] unless a narrower
  /// question is wanted.
  pub async fn query(&self, name: Name, ty: RecordType, class: DNSClass) -> Result<(), Error> {
    self.send_query(Message::query(name, ty, class, false)).await
  }

  /// Sends a one-question query for `name` with the QU bit set, telling
  /// responders this querier accepts a unicast reply.
  pub async fn query_unicast(
    &self,
    name: Name,
    ty: RecordType,
    class: DNSClass,
  ) -> Result<(), Error> {
    self.send_query(Message::query(name, ty, class, true)).await
  }

  /// Sends the request and completes with the first answer message whose
  /// answer records cover every question name in the request.
  ///
  /// No timeout is applied; cancel through the provided [`Canceller`] to
  /// give up, which completes with [`Error::Cancelled`].
  pub async fn resolve(&self, request: Message, canceller: Canceller) -> Result<Message, Error> {
    let names: Vec<Name> = request
      .questions()
      .iter()
      .map(|q| q.name().clone())
      .collect();

    let (tx, rx) = async_channel::bounded::<Message>(1);
    let _subscription = self.on_answer(move |event| {
      let msg = event.message();
      if names.iter().all(|n| msg.answers().iter().any(|r| r.name() == n)) {
        let _ = tx.try_send(msg.clone());
      }
    });

    self.send_query(request).await?;

    futures::select! {
      res = rx.recv().fuse() => res.map_err(|_| Error::Cancelled),
      _ = canceller.rx.recv().fuse() => Err(Error::Cancelled),
    }
  }

  /// Normalizes and multicasts an answer message, suppressing packets
  /// identical to one sent within the last second.
  pub async fn send_answer(&self, answer: Message) -> Result<(), Error> {
    self.send_answer_with(answer, true, None).await
  }

  /// Normalizes an answer message and sends it.
  ///
  /// Normalization enforces the RFC 6762 section 18 header rules: id 0,
  /// authoritative response with opcode `QUERY`, all other flags clear and
  /// no questions. TTLs are rewritten per the service's TTL policy and the
  /// message is truncated to the maximum payload, setting the TC bit if
  /// records had to be dropped.
  ///
  /// With a `unicast_endpoint` (and unicast answers enabled) the packet
  /// goes out the matching-family unicast socket instead of the
  /// multicast transport. Pass `check_duplicate = false` to bypass the
  /// outbound duplicate filter, e.g. for periodic announcements.
  pub async fn send_answer_with(
    &self,
    mut answer: Message,
    check_duplicate: bool,
    unicast_endpoint: Option<SocketAddr>,
  ) -> Result<(), Error> {
    self.inner.normalize_answer(&mut answer);
    self.inner.update_ttls(&mut answer, false);

    let endpoint = match unicast_endpoint {
      Some(endpoint) if self.inner.opts.enable_unicast_answers => Some(endpoint),
      _ => None,
    };
    self.finish_answer(answer, check_duplicate, endpoint).await
  }

  /// Answers a received query.
  ///
  /// For a legacy unicast query this mirrors the query's id and
  /// questions, clamps TTLs to ten seconds and replies unicast to the
  /// querier, per RFC 6762 section 6.7. Any other query is answered like
  /// [`send_answer_with`](MulticastService::send_answer_with) without an
  /// endpoint.
  pub async fn respond(
    &self,
    mut answer: Message,
    query: &QueryEvent,
    check_duplicate: bool,
  ) -> Result<(), Error> {
    if !query.is_legacy_unicast() {
      return self.send_answer_with(answer, check_duplicate, None).await;
    }

    self.inner.normalize_answer(&mut answer);
    answer.header_mut().set_id(query.message().id());
    *answer.questions_mut() = query.message().questions().to_vec();
    self.inner.update_ttls(&mut answer, true);

    self
      .finish_answer(answer, check_duplicate, Some(query.from()))
      .await
  }

  /// Re-snapshots the usable interfaces immediately instead of waiting
  /// for the next poll, rebuilding the transport if the set changed.
  pub async fn refresh_interfaces(&self) -> Result<(), Error> {
    if self.inner.state.lock().is_none() {
      return Err(Error::NotStarted);
    }

    self.inner.refresh_interfaces().await;
    Ok(())
  }

  /// Feeds a raw datagram through the inbound dispatch pipeline as if it
  /// had arrived from `from` on one of the receiver sockets.
  #[cfg(test)]
  pub(crate) fn inject_datagram(&self, from: SocketAddr, packet: &[u8]) {
    self.inner.handle_datagram(from, packet);
  }

  async fn finish_answer(
    &self,
    mut answer: Message,
    check_duplicate: bool,
    unicast_endpoint: Option<SocketAddr>,
  ) -> Result<(), Error> {
    let max_payload = match self.inner.state.lock().as_ref() {
      Some(active) => active.max_payload,
      None => return Err(Error::NotStarted),
    };

    answer.truncate(max_payload).map_err(|_| Error::MessageTooLarge {
      size: answer.encoded_len(),
      max: max_payload,
    })?;

    let packet = answer.encode()?;

    if check_duplicate && !self.inner.outbound.try_add(&packet) {
      tracing::trace!("mdns service: suppressing duplicate answer packet");
      return Ok(());
    }

    match unicast_endpoint {
      Some(endpoint) => self.inner.send_unicast(&packet, endpoint).await,
      None => self.inner.send_transport(&packet).await,
    }

    Ok(())
  }
}

impl<N: Net> Inner<N> {
  fn transport_options(&self) -> TransportOptions {
    TransportOptions {
      use_ipv4: self.opts.use_ipv4,
      use_ipv6: self.opts.use_ipv6,
      port: MDNS_PORT,
      scope: self.opts.ipv6_scope.clone(),
    }
  }

  fn discover_interfaces(&self) -> io::Result<Vec<NetworkInterface>> {
    let mut interfaces = usable_interfaces(self.opts.include_loopback)?;
    if let Some(filter) = self.opts.interface_filter.as_ref() {
      interfaces.retain(|interface| filter(interface));
    }
    Ok(interfaces)
  }

  /// Sends a pre-encoded packet to the multicast groups, enforcing the
  /// maximum payload and, optionally, the outbound duplicate filter.
  async fn send_multicast(&self, packet: &[u8], check_duplicate: bool) -> Result<(), Error> {
    let (transport, max_payload) = match self.state.lock().as_ref() {
      Some(active) => (active.transport.clone(), active.max_payload),
      None => return Err(Error::NotStarted),
    };

    if packet.len() > max_payload {
      return Err(Error::MessageTooLarge {
        size: packet.len(),
        max: max_payload,
      });
    }

    if check_duplicate && !self.outbound.try_add(packet) {
      tracing::trace!("mdns service: suppressing duplicate outbound packet");
      return Ok(());
    }

    match transport {
      Some(transport) => transport.send(packet).await,
      None => tracing::warn!("mdns service: no transport available, dropping outbound packet"),
    }

    Ok(())
  }

  async fn send_transport(&self, packet: &[u8]) {
    let transport = self
      .state
      .lock()
      .as_ref()
      .and_then(|active| active.transport.clone());

    match transport {
      Some(transport) => transport.send(packet).await,
      None => tracing::warn!("mdns service: no transport available, dropping outbound packet"),
    }
  }

  async fn send_unicast(&self, packet: &[u8], endpoint: SocketAddr) {
    let conn = match self.state.lock().as_ref() {
      Some(active) => {
        if endpoint.is_ipv4() {
          active.unicast4.clone()
        } else {
          active.unicast6.clone()
        }
      }
      None => None,
    };

    match conn {
      Some(conn) => {
        tracing::trace!(dest=%endpoint, len=%packet.len(), "mdns service: sending unicast answer");
        if let Err(e) = conn.send_to(packet, endpoint).await {
          tracing::error!(err=%e, dest=%endpoint, "mdns service: failed to send unicast answer");
        }
      }
      None => {
        tracing::warn!(dest=%endpoint, "mdns service: no unicast socket for the endpoint's family");
      }
    }
  }

  /// Rewrites record TTLs over every record section: host records get
  /// the host TTL, everything else the non-host TTL, and legacy replies
  /// are clamped to ten seconds. Zero TTLs announce a withdrawal and are
  /// preserved.
  fn update_ttls(&self, message: &mut Message, legacy: bool) {
    for record in message.records_mut() {
      if record.ttl() == 0 {
        continue;
      }

      let mut ttl = if record.ty().is_host_record() {
        self.opts.host_record_ttl
      } else {
        self.opts.non_host_ttl
      };
      if legacy {
        ttl = ttl.min(MAX_LEGACY_UNICAST_TTL);
      }
      record.set_ttl(ttl);
    }
  }

  /// RFC 6762 section 18 header rules for responses:
  /// 18.1 id zero, 18.2 QR set, 18.3 opcode zero, 18.4 AA set, and the
  /// TC/RD/RA/AD/CD bits and the response code all zero. mDNS responses
  /// carry no questions.
  fn normalize_answer(&self, message: &mut Message) {
    let header = message.header_mut();
    header.set_id(0);
    header.set_response(true);
    header.set_opcode(OP_CODE_QUERY);
    header.set_authoritative(true);
    header.set_truncated(false);
    header.set_recursion_desired(false);
    header.set_recursion_available(false);
    header.set_authentic_data(false);
    header.set_checking_disabled(false);
    header.set_response_code(RESPONSE_CODE_NO_ERROR);
    message.questions_mut().clear();
  }

  fn handle_datagram(&self, from: SocketAddr, packet: &[u8]) {
    if self.opts.ignore_duplicate_messages && !self.inbound.try_add(packet) {
      tracing::trace!(from=%from, "mdns service: ignoring duplicate packet");
      return;
    }

    let message = match Message::decode(packet) {
      Ok(message) => message,
      Err(e) => {
        tracing::error!(from=%from, err=%e, "mdns service: failed to decode packet");
        self.malformed_listeners.emit(packet);
        return;
      }
    };

    if !message.passes_mdns_filter() {
      tracing::trace!(
        from=%from,
        opcode=%message.header().opcode(),
        rcode=%message.header().response_code(),
        "mdns service: silently ignoring message"
      );
      return;
    }

    if message.is_query() && !message.questions().is_empty() {
      self.query_listeners.emit(&QueryEvent { message, from });
    } else if message.is_response() && !message.answers().is_empty() {
      self.answer_listeners.emit(&AnswerEvent { message, from });
    }
  }

  /// Takes a fresh interface snapshot, and if the set changed by stable
  /// id, replaces the transport wholesale and reports the added
  /// interfaces.
  async fn refresh_interfaces(&self) {
    let interfaces = match self.discover_interfaces() {
      Ok(interfaces) => interfaces,
      Err(e) => {
        tracing::error!(err=%e, "mdns service: failed to snapshot interfaces");
        return;
      }
    };

    let added: Vec<NetworkInterface> = {
      let mut known = self.known_interfaces.lock();
      let current: HashSet<SmolStr> = interfaces.iter().map(|i| i.name().clone()).collect();
      if current == *known {
        return;
      }

      let added = interfaces
        .iter()
        .filter(|i| !known.contains(i.name()))
        .cloned()
        .collect();
      *known = current;
      added
    };

    tracing::info!(added = added.len(), "mdns service: interface set changed, rebuilding transport");

    let old = {
      let mut state = self.state.lock();
      let Some(active) = state.as_mut() else {
        return;
      };

      let sink: StdWeak<dyn PacketSink> = self.weak.clone();
      let transport = match Transport::<N>::bind(&interfaces, &self.transport_options(), sink) {
        Ok(transport) => Some(Arc::new(transport)),
        Err(e) => {
          tracing::error!(err=%e, "mdns service: failed to rebuild transport");
          None
        }
      };

      core::mem::replace(&mut active.transport, transport)
    };

    if let Some(old) = old {
      old.dispose().await;
    }

    if !added.is_empty() {
      self.interface_listeners.emit(&added);
    }
  }
}

impl<N: Net> PacketSink for Inner<N> {
  fn deliver(&self, from: SocketAddr, packet: &[u8]) {
    self.handle_datagram(from, packet);
  }
}

async fn interface_watch<N: Net>(
  inner: StdWeak<Inner<N>>,
  interval: Duration,
  shutdown_rx: Receiver<()>,
) {
  loop {
    let sleep = <N::Runtime as RuntimeLite>::sleep(interval);
    futures::pin_mut!(sleep);

    futures::select! {
      _ = shutdown_rx.recv().fuse() => {
        tracing::trace!("mdns service: shutting down interface watch");
        return;
      },
      _ = (&mut sleep).fuse() => {}
    }

    let Some(inner) = inner.upgrade() else {
      return;
    };
    inner.refresh_interfaces().await;
  }
}

#[cfg(test)]
mod tests {
  use std::{
    net::{Ipv4Addr, SocketAddrV4},
    sync::atomic::AtomicUsize,
  };

  use triomphe::Arc as TriArc;

  use super::*;
  use crate::types::{RecordData, ResourceRecord, SRV};

  type TestNet = agnostic_net::tokio::Net;

  fn remote(port: u16) -> SocketAddr {
    SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::new(192, 0, 2, 99), port))
  }

  fn query_packet(name: &str) -> Vec<u8> {
    Message::query(Name::from(name), RecordType::ANY, DNSClass::IN, false)
      .encode()
      .unwrap()
  }

  fn response_packet(name: &str) -> Vec<u8> {
    let mut msg = Message::new();
    msg.header_mut().set_response(true);
    msg.header_mut().set_authoritative(true);
    msg.answers_mut().push(ResourceRecord::new(
      Name::from(name),
      120,
      RecordData::A(Ipv4Addr::new(192, 0, 2, 7)),
    ));
    msg.encode().unwrap()
  }

  fn counted_query_subscription(
    svc: &MulticastService<TestNet>,
  ) -> (StdArc<AtomicUsize>, Subscription) {
    let count = StdArc::new(AtomicUsize::new(0));
    let c = count.clone();
    let sub = svc.on_query(move |_| {
      c.fetch_add(1, Ordering::SeqCst);
    });
    (count, sub)
  }

  #[test]
  fn identical_packets_within_window_fire_once() {
    let svc = MulticastService::<TestNet>::new(ServiceOptions::default());
    let (count, _sub) = counted_query_subscription(&svc);

    let packet = query_packet("x.local");
    svc.inject_datagram(remote(53000), &packet);
    svc.inject_datagram(remote(53001), &packet);

    assert_eq!(count.load(Ordering::SeqCst), 1);
  }

  #[test]
  fn duplicates_are_delivered_when_filter_disabled() {
    let svc = MulticastService::<TestNet>::new(
      ServiceOptions::new().with_ignore_duplicate_messages(false),
    );
    let (count, _sub) = counted_query_subscription(&svc);

    let packet = query_packet("x.local");
    svc.inject_datagram(remote(53000), &packet);
    svc.inject_datagram(remote(53000), &packet);

    assert_eq!(count.load(Ordering::SeqCst), 2);
  }

  #[test]
  fn malformed_packet_emits_event_exactly_once() {
    let svc = MulticastService::<TestNet>::new(ServiceOptions::default());
    let (queries, _q) = counted_query_subscription(&svc);

    let seen: StdArc<Mutex<Vec<Vec<u8>>>> = StdArc::new(Mutex::new(Vec::new()));
    let s = seen.clone();
    let _sub = svc.on_malformed_message(move |bytes| {
      s.lock().push(bytes.to_vec());
    });

    let garbage = [0xFF, 0x03, 0x07];
    svc.inject_datagram(remote(53000), &garbage);

    let seen = seen.lock();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0], garbage);
    assert_eq!(queries.load(Ordering::SeqCst), 0);
  }

  #[test]
  fn nonzero_opcode_and_rcode_are_silently_dropped() {
    let svc = MulticastService::<TestNet>::new(ServiceOptions::default());
    let (queries, _q) = counted_query_subscription(&svc);
    let answers = StdArc::new(AtomicUsize::new(0));
    let a = answers.clone();
    let _sub = svc.on_answer(move |_| {
      a.fetch_add(1, Ordering::SeqCst);
    });

    let mut msg = Message::query(Name::from("x.local"), RecordType::ANY, DNSClass::IN, false);
    msg.header_mut().set_opcode(2);
    svc.inject_datagram(remote(53000), &msg.encode().unwrap());

    let mut msg = Message::decode(&response_packet("x.local")).unwrap();
    msg.header_mut().set_response_code(5);
    svc.inject_datagram(remote(53000), &msg.encode().unwrap());

    assert_eq!(queries.load(Ordering::SeqCst), 0);
    assert_eq!(answers.load(Ordering::SeqCst), 0);
  }

  #[test]
  fn query_without_questions_is_ignored() {
    let svc = MulticastService::<TestNet>::new(ServiceOptions::default());
    let (count, _sub) = counted_query_subscription(&svc);

    svc.inject_datagram(remote(53000), &Message::new().encode().unwrap());
    assert_eq!(count.load(Ordering::SeqCst), 0);
  }

  #[test]
  fn response_with_answers_fires_answer_event() {
    let svc = MulticastService::<TestNet>::new(ServiceOptions::default());

    let events: StdArc<Mutex<Vec<(SocketAddr, usize)>>> = StdArc::new(Mutex::new(Vec::new()));
    let e = events.clone();
    let _sub = svc.on_answer(move |event| {
      e.lock().push((event.from(), event.message().answers().len()));
    });

    svc.inject_datagram(remote(5353), &response_packet("x.local"));

    let events = events.lock();
    assert_eq!(*events, vec![(remote(5353), 1)]);
  }

  #[test]
  fn subscription_drop_unregisters_the_callback() {
    let svc = MulticastService::<TestNet>::new(ServiceOptions::default());
    let (count, sub) = counted_query_subscription(&svc);

    drop(sub);
    svc.inject_datagram(remote(53000), &query_packet("x.local"));
    assert_eq!(count.load(Ordering::SeqCst), 0);
  }

  #[test]
  fn panicking_callback_does_not_stop_dispatch() {
    let svc = MulticastService::<TestNet>::new(ServiceOptions::default());

    let _bad = svc.on_query(|_| panic!("boom"));
    let (count, _sub) = counted_query_subscription(&svc);

    svc.inject_datagram(remote(53000), &query_packet("x.local"));
    assert_eq!(count.load(Ordering::SeqCst), 1);
  }

  #[test]
  fn legacy_unicast_is_any_source_port_but_5353() {
    let legacy = QueryEvent {
      message: Message::new(),
      from: remote(53000),
    };
    assert!(legacy.is_legacy_unicast());

    let mdns = QueryEvent {
      message: Message::new(),
      from: remote(MDNS_PORT),
    };
    assert!(!mdns.is_legacy_unicast());
  }

  fn ttl_fixture() -> Message {
    let mut msg = Message::new();
    msg.header_mut().set_response(true);
    msg.answers_mut().push(ResourceRecord::new(
      Name::from("host.local"),
      300,
      RecordData::A(Ipv4Addr::new(192, 0, 2, 1)),
    ));
    msg.answers_mut().push(ResourceRecord::new(
      Name::from("svc._http._tcp.local"),
      300,
      RecordData::SRV(SRV::new(0, 0, 80, Name::from("host.local"))),
    ));
    msg.authorities_mut().push(ResourceRecord::new(
      Name::from("svc._http._tcp.local"),
      9999,
      RecordData::TXT(TriArc::from_iter(["k=v".into()])),
    ));
    // goodbye record, TTL stays zero
    msg.additionals_mut().push(ResourceRecord::new(
      Name::from("gone.local"),
      0,
      RecordData::A(Ipv4Addr::new(192, 0, 2, 2)),
    ));
    msg.additionals_mut().push(ResourceRecord::new(
      Name::from("host.local"),
      77,
      RecordData::Unknown {
        ty: 47,
        data: TriArc::from_iter([0u8, 1]),
      },
    ));
    msg
  }

  #[test]
  fn ttl_policy_rewrites_nonzero_ttls() {
    let svc = MulticastService::<TestNet>::new(ServiceOptions::default());
    let mut msg = ttl_fixture();
    svc.inner.update_ttls(&mut msg, false);

    assert_eq!(msg.answers()[0].ttl(), 120); // A
    assert_eq!(msg.answers()[1].ttl(), 120); // SRV
    assert_eq!(msg.authorities()[0].ttl(), 4500); // TXT
    assert_eq!(msg.additionals()[0].ttl(), 0); // goodbye preserved
    assert_eq!(msg.additionals()[1].ttl(), 4500); // unknown type
  }

  #[test]
  fn legacy_ttl_policy_clamps_to_ten_seconds() {
    let svc = MulticastService::<TestNet>::new(ServiceOptions::default());
    let mut msg = ttl_fixture();
    svc.inner.update_ttls(&mut msg, true);

    for record in msg.answers().iter().chain(msg.authorities()) {
      assert_eq!(record.ttl(), 10);
    }
    assert_eq!(msg.additionals()[0].ttl(), 0);
  }

  #[test]
  fn configured_ttls_are_applied() {
    let svc = MulticastService::<TestNet>::new(
      ServiceOptions::new().with_host_record_ttl(60).with_non_host_ttl(900),
    );
    let mut msg = ttl_fixture();
    svc.inner.update_ttls(&mut msg, false);

    assert_eq!(msg.answers()[0].ttl(), 60);
    assert_eq!(msg.authorities()[0].ttl(), 900);
  }

  #[test]
  fn answer_normalization_enforces_section_18() {
    let svc = MulticastService::<TestNet>::new(ServiceOptions::default());

    let mut msg = Message::query(Name::from("x.local"), RecordType::ANY, DNSClass::IN, false);
    msg.header_mut().set_id(0x7777);
    msg.header_mut().set_recursion_desired(true);
    msg.header_mut().set_truncated(true);
    svc.inner.normalize_answer(&mut msg);

    assert_eq!(msg.id(), 0);
    assert!(msg.is_response());
    assert!(msg.header().authoritative());
    assert_eq!(msg.header().opcode(), OP_CODE_QUERY);
    assert!(!msg.header().truncated());
    assert!(!msg.header().recursion_desired());
    assert!(!msg.header().recursion_available());
    assert!(msg.questions().is_empty());
  }
}
