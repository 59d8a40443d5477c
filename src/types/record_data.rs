use std::net::{Ipv4Addr, Ipv6Addr};

use smol_str::SmolStr;
use triomphe::Arc;

use super::{Name, RecordType, SRV};

/// The data of an mDNS resource record.
///
/// Record types the engine does not interpret are kept as [`Unknown`]
/// with their raw RDATA, so they pass through a decode/encode round trip
/// untouched.
///
/// [`Unknown`]: RecordData::Unknown
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum RecordData {
  /// ```text
  /// 3.4.1. A RDATA format
  ///
  ///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
  ///     |                    ADDRESS                    |
  ///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
  ///
  /// ADDRESS         A 32 bit Internet address.
  /// ```
  A(Ipv4Addr),
  /// ```text
  /// 2.2 AAAA data format
  ///
  ///    A 128 bit IPv6 address is encoded in the data portion of an AAAA
  ///    resource record in network byte order (high-order byte first).
  /// ```
  AAAA(Ipv6Addr),
  /// ```text
  /// 3.3.12. PTR RDATA format
  ///
  ///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
  ///     /                   PTRDNAME                    /
  ///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
  ///
  /// PTRDNAME        A <domain-name> which points to some location in the
  ///                 domain name space.
  /// ```
  PTR(Name),
  /// ```text
  /// The format of the SRV RR
  ///
  ///  _Service._Proto.Name TTL Class SRV Priority Weight Port Target
  /// ```
  SRV(SRV),
  /// ```text
  /// 3.3.14. TXT RDATA format
  ///
  ///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
  ///     /                   TXT-DATA                    /
  ///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
  ///
  /// TXT-DATA        One or more <character-string>s.
  /// ```
  TXT(Arc<[SmolStr]>),
  /// ```text
  /// 3.3.2. HINFO RDATA format
  ///
  ///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
  ///     /                      CPU                      /
  ///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
  ///     /                       OS                      /
  ///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
  ///
  /// CPU and OS are <character-string>s.
  /// ```
  HINFO {
    /// The CPU field of the record.
    cpu: SmolStr,
    /// The OS field of the record.
    os: SmolStr,
  },
  /// Opaque RDATA of a record type this library does not interpret.
  Unknown {
    /// The wire value of the record type.
    ty: u16,
    /// The raw RDATA bytes.
    data: Arc<[u8]>,
  },
}

impl From<Ipv4Addr> for RecordData {
  #[inline]
  fn from(value: Ipv4Addr) -> Self {
    Self::A(value)
  }
}

impl From<Ipv6Addr> for RecordData {
  #[inline]
  fn from(value: Ipv6Addr) -> Self {
    Self::AAAA(value)
  }
}

impl From<SRV> for RecordData {
  #[inline]
  fn from(value: SRV) -> Self {
    Self::SRV(value)
  }
}

impl RecordData {
  /// Returns the type of the record data.
  #[inline]
  pub fn ty(&self) -> RecordType {
    match self {
      Self::A(_) => RecordType::A,
      Self::AAAA(_) => RecordType::AAAA,
      Self::PTR(_) => RecordType::PTR,
      Self::SRV(_) => RecordType::SRV,
      Self::TXT(_) => RecordType::TXT,
      Self::HINFO { .. } => RecordType::HINFO,
      Self::Unknown { ty, .. } => RecordType::from(*ty),
    }
  }
}
