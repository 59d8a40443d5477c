use std::str::FromStr;

use smol_str::SmolStr;

const AVALUE: u16 = 1;
const AAAAVALUE: u16 = 28;
const ANYVALUE: u16 = 255;
const HINFOVALUE: u16 = 13;
const PTRVALUE: u16 = 12;
const SRVVALUE: u16 = 33;
const TXTVALUE: u16 = 16;

/// Returned when parsing a record type from a string fails.
#[derive(Debug, Clone, PartialEq, Eq, Hash, thiserror::Error)]
#[error("unknown record type string: {0}")]
pub struct UnknownRecordTypeStr(pub SmolStr);

/// A subset of the DNS record types, which only contains the types that
/// are relevant to mDNS. Every other type is carried as [`UNKNOWN`],
/// so records of any type survive a decode/encode round trip.
///
/// [`UNKNOWN`]: RecordType::UNKNOWN
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[non_exhaustive]
#[allow(clippy::upper_case_acronyms)]
pub enum RecordType {
  /// [RFC 1035](https://tools.ietf.org/html/rfc1035) IPv4 Address record
  A,
  /// [RFC 3596](https://tools.ietf.org/html/rfc3596) IPv6 address record
  AAAA,
  /// [RFC 1035](https://tools.ietf.org/html/rfc1035) All cached records, aka ANY
  ANY,
  /// [RFC 1035](https://tools.ietf.org/html/rfc1035) Host information record
  HINFO,
  /// [RFC 1035](https://tools.ietf.org/html/rfc1035) Pointer record
  PTR,
  /// [RFC 2782](https://tools.ietf.org/html/rfc2782) Service locator
  SRV,
  /// [RFC 1035](https://tools.ietf.org/html/rfc1035) Text record
  TXT,
  /// Any record type this library carries opaquely
  UNKNOWN(u16),
}

impl RecordType {
  /// Returns `true` for the record types that describe a specific host
  /// (RFC 6762 section 10: address, SRV, HINFO and the reverse pointer).
  #[inline]
  pub const fn is_host_record(&self) -> bool {
    matches!(
      self,
      Self::A | Self::AAAA | Self::SRV | Self::HINFO | Self::PTR
    )
  }
}

impl From<RecordType> for u16 {
  #[inline]
  fn from(value: RecordType) -> u16 {
    match value {
      RecordType::A => AVALUE,
      RecordType::AAAA => AAAAVALUE,
      RecordType::ANY => ANYVALUE,
      RecordType::HINFO => HINFOVALUE,
      RecordType::PTR => PTRVALUE,
      RecordType::SRV => SRVVALUE,
      RecordType::TXT => TXTVALUE,
      RecordType::UNKNOWN(v) => v,
    }
  }
}

impl From<u16> for RecordType {
  #[inline]
  fn from(value: u16) -> Self {
    match value {
      AVALUE => Self::A,
      AAAAVALUE => Self::AAAA,
      ANYVALUE => Self::ANY,
      HINFOVALUE => Self::HINFO,
      PTRVALUE => Self::PTR,
      SRVVALUE => Self::SRV,
      TXTVALUE => Self::TXT,
      _ => Self::UNKNOWN(value),
    }
  }
}

impl RecordType {
  /// Returns the string representation of the record type.
  #[inline]
  pub const fn as_str(&self) -> &'static str {
    match self {
      Self::A => "A",
      Self::AAAA => "AAAA",
      Self::ANY => "ANY",
      Self::HINFO => "HINFO",
      Self::PTR => "PTR",
      Self::SRV => "SRV",
      Self::TXT => "TXT",
      Self::UNKNOWN(_) => "UNKNOWN",
    }
  }
}

impl core::fmt::Display for RecordType {
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    match self {
      Self::UNKNOWN(v) => write!(f, "TYPE{v}"),
      other => write!(f, "{}", other.as_str()),
    }
  }
}

impl TryFrom<&str> for RecordType {
  type Error = UnknownRecordTypeStr;

  #[inline]
  fn try_from(value: &str) -> Result<Self, Self::Error> {
    Ok(match value.trim() {
      "A" | "a" => RecordType::A,
      "AAAA" | "aaaa" => RecordType::AAAA,
      "ANY" | "any" => RecordType::ANY,
      "HINFO" | "hinfo" => RecordType::HINFO,
      "PTR" | "ptr" => RecordType::PTR,
      "SRV" | "srv" => RecordType::SRV,
      "TXT" | "txt" => RecordType::TXT,
      _ => return Err(UnknownRecordTypeStr(value.into())),
    })
  }
}

impl FromStr for RecordType {
  type Err = UnknownRecordTypeStr;

  #[inline]
  fn from_str(s: &str) -> Result<Self, Self::Err> {
    RecordType::try_from(s)
  }
}
