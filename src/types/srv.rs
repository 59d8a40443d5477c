use super::Name;

/// [RFC 2782, DNS SRV RR, February 2000](https://tools.ietf.org/html/rfc2782)
///
/// ```text
/// The format of the SRV RR
///
///  _Service._Proto.Name TTL Class SRV Priority Weight Port Target
/// ```
#[derive(Debug, PartialEq, Eq, Hash, Clone)]
#[allow(clippy::upper_case_acronyms)]
pub struct SRV {
  priority: u16,
  weight: u16,
  port: u16,
  target: Name,
}

impl SRV {
  /// Creates a new SRV record data.
  ///
  /// # Arguments
  ///
  /// * `priority` - lower values have a higher priority and clients will attempt to use these
  ///                first.
  /// * `weight` - for servers with the same priority, higher weights will be chosen more often.
  /// * `port` - the socket port number on which the service is listening.
  /// * `target` - like CNAME, this is the target domain name to which the service is associated.
  #[inline]
  pub const fn new(priority: u16, weight: u16, port: u16, target: Name) -> Self {
    Self {
      priority,
      weight,
      port,
      target,
    }
  }

  /// The priority of this target host. A client MUST attempt to
  /// contact the target host with the lowest-numbered priority it can
  /// reach.
  #[inline]
  pub const fn priority(&self) -> u16 {
    self.priority
  }

  /// A server selection mechanism, specifying a relative weight for
  /// entries with the same priority.
  #[inline]
  pub const fn weight(&self) -> u16 {
    self.weight
  }

  /// The port on this target host of this service.
  #[inline]
  pub const fn port(&self) -> u16 {
    self.port
  }

  /// The domain name of the target host. Per RFC 2782, name compression
  /// is not to be used for this field.
  #[inline]
  pub const fn target(&self) -> &Name {
    &self.target
  }

  /// Consumes the SRV record data and returns the target.
  #[inline]
  pub fn into_target(self) -> Name {
    self.target
  }
}
