use super::{
  CLASS_TOP_BIT, CompressionMap, DNSClass, Name, ProtoError, RecordType, U16_SIZE, read_u16,
};

/// A single entry in the question section of a message.
///
/// The top bit of the wire class is the unicast-response (QU) bit; it is
/// split off on decode, so [`class`](Question::class) is always the
/// effective 15-bit class, and OR'd back on encode.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Question {
  name: Name,
  ty: RecordType,
  class: DNSClass,
  unicast_response: bool,
}

impl Question {
  /// Creates a new question.
  #[inline]
  pub const fn new(name: Name, ty: RecordType, class: DNSClass) -> Self {
    Self {
      name,
      ty,
      class,
      unicast_response: false,
    }
  }

  /// Sets whether the querier accepts a unicast reply (the QU bit).
  ///
  /// RFC 6762, section 18.12: in the Question Section of a Multicast DNS
  /// query, the top bit of the qclass field is used to indicate that
  /// unicast responses are preferred for this particular question.
  #[inline]
  pub fn with_unicast_response(mut self, unicast_response: bool) -> Self {
    self.unicast_response = unicast_response;
    self
  }

  /// Returns the name of the question.
  #[inline]
  pub const fn name(&self) -> &Name {
    &self.name
  }

  /// Returns the record type of the question.
  #[inline]
  pub const fn ty(&self) -> RecordType {
    self.ty
  }

  /// Returns the effective class of the question, with the QU bit masked off.
  #[inline]
  pub const fn class(&self) -> DNSClass {
    self.class
  }

  /// Returns `true` if the QU bit was set.
  #[inline]
  pub const fn unicast_response(&self) -> bool {
    self.unicast_response
  }

  pub(super) fn decode(src: &[u8], off: usize) -> Result<(Self, usize), ProtoError> {
    let (name, mut off) = Name::decode(src, off)?;

    let ty = RecordType::from(read_u16(src, off)?);
    off += U16_SIZE;

    let bclass = read_u16(src, off)?;
    off += U16_SIZE;

    Ok((
      Self {
        name,
        ty,
        class: DNSClass::from(bclass & !CLASS_TOP_BIT),
        unicast_response: bclass & CLASS_TOP_BIT != 0,
      },
      off,
    ))
  }

  pub(super) fn encode(
    &self,
    buf: &mut Vec<u8>,
    cmap: &mut Option<CompressionMap>,
    compress: bool,
  ) -> Result<(), ProtoError> {
    self.name.encode(buf, cmap, compress)?;
    buf.extend_from_slice(&u16::from(self.ty).to_be_bytes());

    let mut qclass = u16::from(self.class);
    if self.unicast_response {
      qclass |= CLASS_TOP_BIT;
    }
    buf.extend_from_slice(&qclass.to_be_bytes());
    Ok(())
  }

  pub(super) fn encoded_len(&self) -> usize {
    self.name.encoded_len() + U16_SIZE + U16_SIZE
  }
}
