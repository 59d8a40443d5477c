use triomphe::Arc;

use super::{
  CLASS_TOP_BIT, CompressionMap, DNSClass, IPV4_LEN, IPV6_LEN, Name, ProtoError,
  RECORD_HEADER_ENCODED_WITHOUT_NAME_SIZE, RecordData, RecordType, SRV, U16_SIZE, U32_SIZE,
  decode_character_string, encode_character_string, read_u16, read_u32,
};

/// An mDNS resource record.
///
/// The top bit of the wire class is the cache-flush bit (RFC 6762 section
/// 10.2); it is split off on decode, so [`class`](ResourceRecord::class) is
/// always the effective 15-bit class, and OR'd back on encode.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceRecord {
  name: Name,
  class: DNSClass,
  cache_flush: bool,
  ttl: u32,
  data: RecordData,
}

impl ResourceRecord {
  /// Creates a new record with class `IN` and the cache-flush bit clear.
  #[inline]
  pub const fn new(name: Name, ttl: u32, data: RecordData) -> Self {
    Self {
      name,
      class: DNSClass::IN,
      cache_flush: false,
      ttl,
      data,
    }
  }

  /// Sets the class of the record.
  #[inline]
  pub fn with_class(mut self, class: DNSClass) -> Self {
    self.class = class;
    self
  }

  /// Sets the cache-flush bit, marking the record as a member of a
  /// unique resource record set.
  #[inline]
  pub fn with_cache_flush(mut self, cache_flush: bool) -> Self {
    self.cache_flush = cache_flush;
    self
  }

  /// Returns the name of the record.
  #[inline]
  pub const fn name(&self) -> &Name {
    &self.name
  }

  /// Returns the type of the record.
  #[inline]
  pub fn ty(&self) -> RecordType {
    self.data.ty()
  }

  /// Returns the effective class of the record, with the cache-flush bit
  /// masked off.
  #[inline]
  pub const fn class(&self) -> DNSClass {
    self.class
  }

  /// Returns `true` if the cache-flush bit was set.
  #[inline]
  pub const fn cache_flush(&self) -> bool {
    self.cache_flush
  }

  /// Returns the time-to-live of the record, in seconds.
  #[inline]
  pub const fn ttl(&self) -> u32 {
    self.ttl
  }

  /// Sets the time-to-live of the record, in seconds.
  #[inline]
  pub fn set_ttl(&mut self, ttl: u32) {
    self.ttl = ttl;
  }

  /// Returns a reference to the record data.
  #[inline]
  pub const fn data(&self) -> &RecordData {
    &self.data
  }

  /// Consumes the record and returns its name and data.
  #[inline]
  pub fn into_components(self) -> (Name, RecordData) {
    (self.name, self.data)
  }

  pub(super) fn decode(src: &[u8], off: usize) -> Result<(Self, usize), ProtoError> {
    let (name, mut off) = Name::decode(src, off)?;

    let ty = read_u16(src, off)?;
    off += U16_SIZE;
    let bclass = read_u16(src, off)?;
    off += U16_SIZE;
    let ttl = read_u32(src, off)?;
    off += U32_SIZE;
    let rdlen = read_u16(src, off)? as usize;
    off += U16_SIZE;

    let rdata_end = off + rdlen;
    if rdata_end > src.len() {
      return Err(ProtoError::NotEnoughData);
    }

    let data = match RecordType::from(ty) {
      RecordType::A => {
        if rdlen != IPV4_LEN {
          return Err(ProtoError::InvalidRdata);
        }
        let octets: [u8; IPV4_LEN] = src[off..off + IPV4_LEN].try_into().unwrap();
        RecordData::A(octets.into())
      }
      RecordType::AAAA => {
        if rdlen != IPV6_LEN {
          return Err(ProtoError::InvalidRdata);
        }
        let octets: [u8; IPV6_LEN] = src[off..off + IPV6_LEN].try_into().unwrap();
        RecordData::AAAA(octets.into())
      }
      RecordType::PTR => {
        // decode against the whole message so compression pointers in
        // the RDATA can refer back past the record boundary
        let (target, _) = Name::decode(src, off)?;
        RecordData::PTR(target)
      }
      RecordType::SRV => {
        if rdlen < 3 * U16_SIZE {
          return Err(ProtoError::NotEnoughData);
        }

        let priority = read_u16(src, off)?;
        let weight = read_u16(src, off + U16_SIZE)?;
        let port = read_u16(src, off + 2 * U16_SIZE)?;
        let (target, _) = Name::decode(src, off + 3 * U16_SIZE)?;
        RecordData::SRV(SRV::new(priority, weight, port, target))
      }
      RecordType::TXT => {
        let mut txts = Vec::new();
        let mut pos = off;
        while pos < rdata_end {
          let (s, next) = decode_character_string(&src[..rdata_end], pos)?;
          txts.push(s);
          pos = next;
        }
        RecordData::TXT(Arc::from_iter(txts))
      }
      RecordType::HINFO => {
        let (cpu, next) = decode_character_string(&src[..rdata_end], off)?;
        let (os, _) = decode_character_string(&src[..rdata_end], next)?;
        RecordData::HINFO { cpu, os }
      }
      _ => RecordData::Unknown {
        ty,
        data: Arc::from_iter(src[off..rdata_end].iter().copied()),
      },
    };

    Ok((
      Self {
        name,
        class: DNSClass::from(bclass & !CLASS_TOP_BIT),
        cache_flush: bclass & CLASS_TOP_BIT != 0,
        ttl,
        data,
      },
      rdata_end,
    ))
  }

  pub(super) fn encode(
    &self,
    buf: &mut Vec<u8>,
    cmap: &mut Option<CompressionMap>,
    compress: bool,
  ) -> Result<(), ProtoError> {
    self.name.encode(buf, cmap, compress)?;

    buf.extend_from_slice(&u16::from(self.ty()).to_be_bytes());

    let mut class = u16::from(self.class);
    if self.cache_flush {
      class |= CLASS_TOP_BIT;
    }
    buf.extend_from_slice(&class.to_be_bytes());
    buf.extend_from_slice(&self.ttl.to_be_bytes());
    buf.extend_from_slice(&0u16.to_be_bytes()); // rdlen, updated below

    let heoff = buf.len();

    match &self.data {
      RecordData::A(addr) => buf.extend_from_slice(&addr.octets()),
      RecordData::AAAA(addr) => buf.extend_from_slice(&addr.octets()),
      RecordData::PTR(target) => target.encode(buf, cmap, compress)?,
      RecordData::SRV(srv) => {
        buf.extend_from_slice(&srv.priority().to_be_bytes());
        buf.extend_from_slice(&srv.weight().to_be_bytes());
        buf.extend_from_slice(&srv.port().to_be_bytes());
        // RFC 2782: name compression is not to be used for the target
        srv.target().encode(buf, cmap, false)?;
      }
      RecordData::TXT(txts) => {
        if txts.is_empty() {
          buf.push(0);
        } else {
          for s in txts.iter() {
            encode_character_string(s, buf)?;
          }
        }
      }
      RecordData::HINFO { cpu, os } => {
        encode_character_string(cpu, buf)?;
        encode_character_string(os, buf)?;
      }
      RecordData::Unknown { data, .. } => buf.extend_from_slice(data),
    }

    let rdlen = buf.len() - heoff;
    if rdlen > u16::MAX as usize {
      return Err(ProtoError::InvalidRdata);
    }
    buf[heoff - U16_SIZE..heoff].copy_from_slice(&(rdlen as u16).to_be_bytes());

    Ok(())
  }

  pub(super) fn encoded_len(&self) -> usize {
    let rdlen = match &self.data {
      RecordData::A(_) => IPV4_LEN,
      RecordData::AAAA(_) => IPV6_LEN,
      RecordData::PTR(target) => target.encoded_len(),
      RecordData::SRV(srv) => 3 * U16_SIZE + srv.target().encoded_len(),
      RecordData::TXT(txts) => {
        if txts.is_empty() {
          1
        } else {
          txts.iter().map(|s| s.len() + 1).sum()
        }
      }
      RecordData::HINFO { cpu, os } => cpu.len() + 1 + os.len() + 1,
      RecordData::Unknown { data, .. } => data.len(),
    };

    self.name.encoded_len() + RECORD_HEADER_ENCODED_WITHOUT_NAME_SIZE + rdlen
  }
}
