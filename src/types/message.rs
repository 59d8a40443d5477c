use super::{
  CompressionMap, DNSClass, MESSAGE_HEADER_SIZE, Name, OP_CODE_QUERY, ProtoError, Question,
  RESPONSE_CODE_NO_ERROR, RecordType, ResourceRecord, read_u16,
};

const QR_BIT: u16 = 1 << 15;
const OPCODE_SHIFT: u16 = 11;
const OPCODE_MASK: u16 = 0xF;
const AA_BIT: u16 = 1 << 10;
const TC_BIT: u16 = 1 << 9;
const RD_BIT: u16 = 1 << 8;
const RA_BIT: u16 = 1 << 7;
const Z_BIT: u16 = 1 << 6;
const AD_BIT: u16 = 1 << 5;
const CD_BIT: u16 = 1 << 4;
const RCODE_MASK: u16 = 0xF;

/// The header of an mDNS message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Header {
  id: u16,
  response: bool,
  opcode: u16,
  authoritative: bool,
  truncated: bool,
  recursion_desired: bool,
  recursion_available: bool,
  zero: bool,
  authentic_data: bool,
  checking_disabled: bool,
  response_code: u16,
}

impl Header {
  /// Returns the message id.
  #[inline]
  pub const fn id(&self) -> u16 {
    self.id
  }

  /// Sets the message id.
  #[inline]
  pub fn set_id(&mut self, id: u16) {
    self.id = id;
  }

  /// Returns `true` if the QR bit is set (the message is a response).
  #[inline]
  pub const fn is_response(&self) -> bool {
    self.response
  }

  /// Sets the QR bit.
  #[inline]
  pub fn set_response(&mut self, response: bool) {
    self.response = response;
  }

  /// Returns the opcode.
  #[inline]
  pub const fn opcode(&self) -> u16 {
    self.opcode
  }

  /// Sets the opcode.
  #[inline]
  pub fn set_opcode(&mut self, opcode: u16) {
    self.opcode = opcode & OPCODE_MASK;
  }

  /// Returns `true` if the AA (authoritative answer) bit is set.
  #[inline]
  pub const fn authoritative(&self) -> bool {
    self.authoritative
  }

  /// Sets the AA bit.
  #[inline]
  pub fn set_authoritative(&mut self, authoritative: bool) {
    self.authoritative = authoritative;
  }

  /// Returns `true` if the TC (truncated) bit is set.
  #[inline]
  pub const fn truncated(&self) -> bool {
    self.truncated
  }

  /// Sets the TC bit.
  #[inline]
  pub fn set_truncated(&mut self, truncated: bool) {
    self.truncated = truncated;
  }

  /// Returns `true` if the RD (recursion desired) bit is set.
  #[inline]
  pub const fn recursion_desired(&self) -> bool {
    self.recursion_desired
  }

  /// Sets the RD bit.
  #[inline]
  pub fn set_recursion_desired(&mut self, recursion_desired: bool) {
    self.recursion_desired = recursion_desired;
  }

  /// Returns `true` if the RA (recursion available) bit is set.
  #[inline]
  pub const fn recursion_available(&self) -> bool {
    self.recursion_available
  }

  /// Sets the RA bit.
  #[inline]
  pub fn set_recursion_available(&mut self, recursion_available: bool) {
    self.recursion_available = recursion_available;
  }

  /// Returns `true` if the AD (authentic data) bit is set.
  #[inline]
  pub const fn authentic_data(&self) -> bool {
    self.authentic_data
  }

  /// Sets the AD bit.
  #[inline]
  pub fn set_authentic_data(&mut self, authentic_data: bool) {
    self.authentic_data = authentic_data;
  }

  /// Returns `true` if the CD (checking disabled) bit is set.
  #[inline]
  pub const fn checking_disabled(&self) -> bool {
    self.checking_disabled
  }

  /// Sets the CD bit.
  #[inline]
  pub fn set_checking_disabled(&mut self, checking_disabled: bool) {
    self.checking_disabled = checking_disabled;
  }

  /// Returns the response code.
  #[inline]
  pub const fn response_code(&self) -> u16 {
    self.response_code
  }

  /// Sets the response code.
  #[inline]
  pub fn set_response_code(&mut self, response_code: u16) {
    self.response_code = response_code & RCODE_MASK;
  }

  fn decode(src: &[u8]) -> Result<(Self, [usize; 4]), ProtoError> {
    if src.len() < MESSAGE_HEADER_SIZE {
      return Err(ProtoError::NotEnoughData);
    }

    let id = read_u16(src, 0)?;
    let bits = read_u16(src, 2)?;
    let counts = [
      read_u16(src, 4)? as usize,
      read_u16(src, 6)? as usize,
      read_u16(src, 8)? as usize,
      read_u16(src, 10)? as usize,
    ];

    Ok((
      Self {
        id,
        response: bits & QR_BIT != 0,
        opcode: (bits >> OPCODE_SHIFT) & OPCODE_MASK,
        authoritative: bits & AA_BIT != 0,
        truncated: bits & TC_BIT != 0,
        recursion_desired: bits & RD_BIT != 0,
        recursion_available: bits & RA_BIT != 0,
        zero: bits & Z_BIT != 0,
        authentic_data: bits & AD_BIT != 0,
        checking_disabled: bits & CD_BIT != 0,
        response_code: bits & RCODE_MASK,
      },
      counts,
    ))
  }

  fn bits(&self) -> u16 {
    let mut bits = ((self.opcode & OPCODE_MASK) << OPCODE_SHIFT) | (self.response_code & RCODE_MASK);
    if self.response {
      bits |= QR_BIT;
    }
    if self.authoritative {
      bits |= AA_BIT;
    }
    if self.truncated {
      bits |= TC_BIT;
    }
    if self.recursion_desired {
      bits |= RD_BIT;
    }
    if self.recursion_available {
      bits |= RA_BIT;
    }
    if self.zero {
      bits |= Z_BIT;
    }
    if self.authentic_data {
      bits |= AD_BIT;
    }
    if self.checking_disabled {
      bits |= CD_BIT;
    }
    bits
  }

  fn encode(&self, counts: [usize; 4], buf: &mut Vec<u8>) {
    buf.extend_from_slice(&self.id.to_be_bytes());
    buf.extend_from_slice(&self.bits().to_be_bytes());
    for count in counts {
      buf.extend_from_slice(&(count as u16).to_be_bytes());
    }
  }
}

/// A DNS message, with the mDNS reinterpretations applied by the codec:
/// the QU bit on question classes and the cache-flush bit on record
/// classes are split off on decode and merged back on encode.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Message {
  header: Header,
  questions: Vec<Question>,
  answers: Vec<ResourceRecord>,
  authorities: Vec<ResourceRecord>,
  additionals: Vec<ResourceRecord>,
}

impl Message {
  /// Creates an empty query message.
  #[inline]
  pub fn new() -> Self {
    Self::default()
  }

  /// Creates a message holding a single question.
  pub fn query(name: Name, ty: RecordType, class: DNSClass, unicast_response: bool) -> Self {
    Self {
      questions: vec![Question::new(name, ty, class).with_unicast_response(unicast_response)],
      ..Default::default()
    }
  }

  /// Returns the header of the message.
  #[inline]
  pub const fn header(&self) -> &Header {
    &self.header
  }

  /// Returns a mutable reference to the header of the message.
  #[inline]
  pub fn header_mut(&mut self) -> &mut Header {
    &mut self.header
  }

  /// Returns the message id, shorthand for `header().id()`.
  #[inline]
  pub const fn id(&self) -> u16 {
    self.header.id()
  }

  /// Returns `true` if this message is a query.
  #[inline]
  pub const fn is_query(&self) -> bool {
    !self.header.is_response()
  }

  /// Returns `true` if this message is a response.
  #[inline]
  pub const fn is_response(&self) -> bool {
    self.header.is_response()
  }

  /// Returns the questions of the message.
  #[inline]
  pub fn questions(&self) -> &[Question] {
    &self.questions
  }

  /// Returns a mutable reference to the questions of the message.
  #[inline]
  pub fn questions_mut(&mut self) -> &mut Vec<Question> {
    &mut self.questions
  }

  /// Returns the answer records of the message.
  #[inline]
  pub fn answers(&self) -> &[ResourceRecord] {
    &self.answers
  }

  /// Returns a mutable reference to the answer records of the message.
  #[inline]
  pub fn answers_mut(&mut self) -> &mut Vec<ResourceRecord> {
    &mut self.answers
  }

  /// Returns the authority records of the message.
  #[inline]
  pub fn authorities(&self) -> &[ResourceRecord] {
    &self.authorities
  }

  /// Returns a mutable reference to the authority records of the message.
  #[inline]
  pub fn authorities_mut(&mut self) -> &mut Vec<ResourceRecord> {
    &mut self.authorities
  }

  /// Returns the additional records of the message.
  #[inline]
  pub fn additionals(&self) -> &[ResourceRecord] {
    &self.additionals
  }

  /// Returns a mutable reference to the additional records of the message.
  #[inline]
  pub fn additionals_mut(&mut self) -> &mut Vec<ResourceRecord> {
    &mut self.additionals
  }

  /// Returns a mutable iterator over the answer, authority and
  /// additional sections.
  #[inline]
  pub fn records_mut(&mut self) -> impl Iterator<Item = &mut ResourceRecord> {
    self
      .answers
      .iter_mut()
      .chain(self.authorities.iter_mut())
      .chain(self.additionals.iter_mut())
  }

  /// Decodes a message from wire format.
  pub fn decode(src: &[u8]) -> Result<Self, ProtoError> {
    let (header, [qd, an, ns, ar]) = Header::decode(src)?;
    let mut off = MESSAGE_HEADER_SIZE;

    let mut questions = Vec::with_capacity(qd.min(8));
    for _ in 0..qd {
      let (q, next) = Question::decode(src, off)?;
      questions.push(q);
      off = next;
    }

    let mut decode_records = |count: usize, off: &mut usize| -> Result<Vec<ResourceRecord>, ProtoError> {
      let mut records = Vec::with_capacity(count.min(16));
      for _ in 0..count {
        let (r, next) = ResourceRecord::decode(src, *off)?;
        records.push(r);
        *off = next;
      }
      Ok(records)
    };

    let answers = decode_records(an, &mut off)?;
    let authorities = decode_records(ns, &mut off)?;
    let additionals = decode_records(ar, &mut off)?;

    Ok(Self {
      header,
      questions,
      answers,
      authorities,
      additionals,
    })
  }

  /// Encodes the message into wire format, applying name compression.
  pub fn encode(&self) -> Result<Vec<u8>, ProtoError> {
    self.encode_with(true)
  }

  fn encode_with(&self, compress: bool) -> Result<Vec<u8>, ProtoError> {
    if self.questions.len() > u16::MAX as usize
      || self.answers.len() > u16::MAX as usize
      || self.authorities.len() > u16::MAX as usize
      || self.additionals.len() > u16::MAX as usize
    {
      return Err(ProtoError::Overflow);
    }

    let mut buf = Vec::with_capacity(self.encoded_len());
    self.header.encode(
      [
        self.questions.len(),
        self.answers.len(),
        self.authorities.len(),
        self.additionals.len(),
      ],
      &mut buf,
    );

    let mut cmap = Some(CompressionMap::new());

    for q in self.questions.iter() {
      q.encode(&mut buf, &mut cmap, compress)?;
    }

    for r in self
      .answers
      .iter()
      .chain(self.authorities.iter())
      .chain(self.additionals.iter())
    {
      r.encode(&mut buf, &mut cmap, compress)?;
    }

    Ok(buf)
  }

  /// Returns an upper bound on the encoded size of the message, computed
  /// without name compression.
  pub fn encoded_len(&self) -> usize {
    MESSAGE_HEADER_SIZE
      + self
        .questions
        .iter()
        .map(Question::encoded_len)
        .sum::<usize>()
      + self
        .answers
        .iter()
        .chain(self.authorities.iter())
        .chain(self.additionals.iter())
        .map(ResourceRecord::encoded_len)
        .sum::<usize>()
  }

  /// Drops trailing records until the message fits within `max` bytes,
  /// removing additionals first, then authorities, then answers, and
  /// sets the TC bit iff any record was removed. Questions are never
  /// dropped; if the header and questions alone exceed `max` this fails.
  pub fn truncate(&mut self, max: usize) -> Result<(), ProtoError> {
    let base = MESSAGE_HEADER_SIZE
      + self
        .questions
        .iter()
        .map(Question::encoded_len)
        .sum::<usize>();
    if base > max {
      return Err(ProtoError::QuestionsExceedPayload(max));
    }

    let mut size = self.encoded_len();
    let mut dropped = false;

    for section in [
      &mut self.additionals,
      &mut self.authorities,
      &mut self.answers,
    ] {
      while size > max {
        match section.pop() {
          Some(r) => {
            size -= r.encoded_len();
            dropped = true;
          }
          None => break,
        }
      }
    }

    if dropped {
      self.header.set_truncated(true);
    }

    Ok(())
  }

  /// Returns `true` if the opcode is `QUERY` and the response code is
  /// `NOERROR`. RFC 6762 section 18.3: messages received with any other
  /// opcode or response code MUST be silently ignored.
  #[inline]
  pub(crate) fn passes_mdns_filter(&self) -> bool {
    self.header.opcode() == OP_CODE_QUERY && self.header.response_code() == RESPONSE_CODE_NO_ERROR
  }
}

#[cfg(test)]
mod tests {
  use std::net::{Ipv4Addr, Ipv6Addr};

  use triomphe::Arc;

  use super::super::{RecordData, SRV};
  use super::*;

  fn sample_message() -> Message {
    let mut msg = Message::query(
      Name::from("_http._tcp.local"),
      RecordType::PTR,
      DNSClass::IN,
      true,
    );
    msg.header_mut().set_id(0x1234);

    msg.answers_mut().push(ResourceRecord::new(
      Name::from("_http._tcp.local"),
      4500,
      RecordData::PTR(Name::from("web._http._tcp.local")),
    ));
    msg.answers_mut().push(
      ResourceRecord::new(
        Name::from("web._http._tcp.local"),
        120,
        RecordData::SRV(SRV::new(0, 0, 80, Name::from("host.local"))),
      )
      .with_cache_flush(true),
    );
    msg.additionals_mut().push(
      ResourceRecord::new(
        Name::from("host.local"),
        120,
        RecordData::A(Ipv4Addr::new(192, 0, 2, 10)),
      )
      .with_cache_flush(true),
    );
    msg.additionals_mut().push(ResourceRecord::new(
      Name::from("host.local"),
      120,
      RecordData::AAAA(Ipv6Addr::LOCALHOST),
    ));
    msg.additionals_mut().push(ResourceRecord::new(
      Name::from("web._http._tcp.local"),
      4500,
      RecordData::TXT(Arc::from_iter(["path=/".into()])),
    ));
    msg.additionals_mut().push(ResourceRecord::new(
      Name::from("host.local"),
      120,
      RecordData::HINFO {
        cpu: "ARM64".into(),
        os: "LINUX".into(),
      },
    ));
    msg
  }

  #[test]
  fn round_trip() {
    let msg = sample_message();
    let encoded = msg.encode().unwrap();
    let decoded = Message::decode(&encoded).unwrap();
    assert_eq!(decoded, msg);
  }

  #[test]
  fn compression_shrinks_but_preserves() {
    let msg = sample_message();
    let compressed = msg.encode().unwrap();
    let plain = msg.encode_with(false).unwrap();
    assert!(compressed.len() < plain.len());
    assert_eq!(Message::decode(&plain).unwrap(), Message::decode(&compressed).unwrap());
  }

  #[test]
  fn unknown_record_type_round_trips() {
    let mut msg = Message::new();
    msg.header_mut().set_response(true);
    msg.answers_mut().push(ResourceRecord::new(
      Name::from("host.local"),
      120,
      RecordData::Unknown {
        ty: 47, // NSEC
        data: Arc::from_iter([0x00, 0x04, 0x40, 0x00, 0x00, 0x08]),
      },
    ));

    let decoded = Message::decode(&msg.encode().unwrap()).unwrap();
    assert_eq!(decoded.answers()[0].ty(), RecordType::UNKNOWN(47));
    assert_eq!(decoded, msg);
  }

  #[test]
  fn qu_bit_survives_and_class_is_masked() {
    let msg = Message::query(Name::from("x.local"), RecordType::ANY, DNSClass::IN, true);
    let encoded = msg.encode().unwrap();

    // qclass is the last two bytes of the single question
    let qclass = u16::from_be_bytes([encoded[encoded.len() - 2], encoded[encoded.len() - 1]]);
    assert_eq!(qclass, 0x8001);

    let decoded = Message::decode(&encoded).unwrap();
    let q = &decoded.questions()[0];
    assert!(q.unicast_response());
    assert_eq!(q.class(), DNSClass::IN);
  }

  #[test]
  fn cache_flush_bit_survives_and_class_is_masked() {
    let mut msg = Message::new();
    msg.header_mut().set_response(true);
    msg.answers_mut().push(
      ResourceRecord::new(
        Name::from("host.local"),
        120,
        RecordData::A(Ipv4Addr::new(192, 0, 2, 1)),
      )
      .with_cache_flush(true),
    );

    let decoded = Message::decode(&msg.encode().unwrap()).unwrap();
    let r = &decoded.answers()[0];
    assert!(r.cache_flush());
    assert_eq!(r.class(), DNSClass::IN);
    assert_eq!(r.ttl(), 120);
  }

  #[test]
  fn header_bits_round_trip() {
    let mut msg = Message::new();
    msg.header_mut().set_id(0xBEEF);
    msg.header_mut().set_response(true);
    msg.header_mut().set_authoritative(true);
    msg.header_mut().set_opcode(2);
    msg.header_mut().set_response_code(3);

    let encoded = msg.encode().unwrap();
    assert_eq!(&encoded[..2], &[0xBE, 0xEF]);

    let decoded = Message::decode(&encoded).unwrap();
    assert!(decoded.header().is_response());
    assert!(decoded.header().authoritative());
    assert_eq!(decoded.header().opcode(), 2);
    assert_eq!(decoded.header().response_code(), 3);
    assert!(!decoded.passes_mdns_filter());
  }

  #[test]
  fn decode_rejects_short_buffers() {
    assert_eq!(
      Message::decode(&[0, 0, 0]).unwrap_err(),
      ProtoError::NotEnoughData
    );

    // header claims one question but the section is missing
    let mut raw = vec![0u8; MESSAGE_HEADER_SIZE];
    raw[5] = 1;
    assert!(Message::decode(&raw).is_err());
  }

  #[test]
  fn truncate_drops_additionals_first() {
    let mut msg = sample_message();
    let full = msg.encoded_len();
    let answers = msg.answers().len();

    msg.truncate(full - 1).unwrap();
    assert!(msg.header().truncated());
    assert_eq!(msg.answers().len(), answers);
    assert!(msg.additionals().len() < 4);
    assert_eq!(msg.questions().len(), 1);
    assert!(msg.encode().unwrap().len() <= full - 1);
  }

  #[test]
  fn truncate_keeps_fitting_message_untouched() {
    let mut msg = sample_message();
    let before = msg.clone();
    msg.truncate(msg.encoded_len()).unwrap();
    assert_eq!(msg, before);
    assert!(!msg.header().truncated());
  }

  #[test]
  fn truncate_drops_all_records_when_needed() {
    let mut msg = sample_message();
    let base = MESSAGE_HEADER_SIZE
      + msg
        .questions()
        .iter()
        .map(Question::encoded_len)
        .sum::<usize>();

    msg.truncate(base).unwrap();
    assert!(msg.header().truncated());
    assert!(msg.answers().is_empty());
    assert!(msg.authorities().is_empty());
    assert!(msg.additionals().is_empty());
    assert_eq!(msg.questions().len(), 1);
  }

  #[test]
  fn truncate_fails_when_questions_do_not_fit() {
    let mut msg = sample_message();
    let err = msg.truncate(MESSAGE_HEADER_SIZE).unwrap_err();
    assert_eq!(err, ProtoError::QuestionsExceedPayload(MESSAGE_HEADER_SIZE));
  }
}
