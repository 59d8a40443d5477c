use smol_str::{SmolStr, format_smolstr};

use super::{
  CompressionMap, MAX_COMPRESSION_OFFSET, MAX_COMPRESSION_POINTERS, MAX_DOMAIN_NAME_WIRE_OCTETS,
  MAX_LABEL_OCTETS, ProtoError, SlicableSmolStr, ddd_to_byte, escape_byte, is_ddd,
};

/// A fully qualified domain name in presentation format.
///
/// Names are stored with a trailing dot; the root name is `"."`. Equality and
/// hashing are ASCII case-insensitive, following RFC 1035 section 2.3.3.
#[derive(Debug, Clone)]
pub struct Name(SmolStr);

impl Default for Name {
  #[inline]
  fn default() -> Self {
    Self(SmolStr::new_static("."))
  }
}

impl core::fmt::Display for Name {
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    write!(f, "{}", self.0)
  }
}

impl From<&str> for Name {
  fn from(s: &str) -> Self {
    if s.is_empty() {
      return Self::default();
    }

    if s.ends_with('.') {
      Self(SmolStr::new(s))
    } else {
      Self(format_smolstr!("{}.", s))
    }
  }
}

impl From<SmolStr> for Name {
  fn from(s: SmolStr) -> Self {
    Self::from(s.as_str())
  }
}

impl PartialEq for Name {
  fn eq(&self, other: &Self) -> bool {
    self.0.eq_ignore_ascii_case(&other.0)
  }
}

impl Eq for Name {}

impl core::hash::Hash for Name {
  fn hash<H: core::hash::Hasher>(&self, state: &mut H) {
    for b in self.0.as_bytes() {
      state.write_u8(b.to_ascii_lowercase());
    }
  }
}

impl Name {
  /// Returns the name in presentation format, with a trailing dot.
  #[inline]
  pub fn as_str(&self) -> &str {
    &self.0
  }

  /// Returns `true` if this is the root name.
  #[inline]
  pub fn is_root(&self) -> bool {
    self.0 == "."
  }

  pub(super) fn decode(msg: &[u8], mut off: usize) -> Result<(Self, usize), ProtoError> {
    // Start with a smaller capacity and let it grow as needed
    let mut s = InlineDomain::with_capacity(23); // Most domain names are shorter than 32 bytes
    let mut off1 = 0;
    let lenmsg = msg.len();
    let mut budget = MAX_DOMAIN_NAME_WIRE_OCTETS as isize;
    let mut ptr = 0; // number of pointers followed

    loop {
      if off >= lenmsg {
        return Err(ProtoError::BufferTooSmall);
      }

      let c = msg[off];
      off += 1;

      match c & 0xC0 {
        0x00 => {
          if c == 0x00 {
            // end of name
            break;
          }

          // literal string
          let label_len = c as usize;
          if off + label_len > lenmsg {
            return Err(ProtoError::BufferTooSmall);
          }

          budget -= (label_len as isize) + 1; // +1 for the label separator
          if budget <= 0 {
            return Err(ProtoError::NameTooLong);
          }

          for &b in msg[off..off + label_len].iter() {
            if is_domain_name_label_special(b) {
              s.extend_from_slice(&[b'\\', b]);
            } else if !(b' '..=b'~').contains(&b) {
              s.extend_from_slice(&escape_byte(b));
            } else {
              s.push(b);
            }
          }
          s.push(b'.');
          off += label_len;
        }
        0xC0 => {
          // pointer to somewhere else in msg.
          // remember location after first ptr,
          // since that's how many bytes we consumed.
          // also, don't follow too many pointers --
          // maybe there's a loop.
          if off >= lenmsg {
            return Err(ProtoError::NotEnoughData);
          }

          let c1 = msg[off];
          off += 1;

          if ptr == 0 {
            off1 = off;
          }

          ptr += 1;
          if ptr > MAX_COMPRESSION_POINTERS {
            return Err(ProtoError::TooManyPointers);
          }

          off = ((c as usize ^ 0xC0) << 8) | c1 as usize;
        }
        _ => return Err(ProtoError::InvalidRdata),
      }
    }

    if ptr == 0 {
      off1 = off;
    }

    if s.is_empty() {
      Ok((Self::default(), off1))
    } else {
      // We only added ASCII bytes and properly escaped non-ASCII
      let s = core::str::from_utf8(s.as_slice()).expect("we only added ASCII bytes");
      Ok((Self(SmolStr::new(s)), off1))
    }
  }

  /// Writes the name in wire format.
  ///
  /// When a compression map is supplied and `compress` is set, tail suffixes
  /// already present in the map are replaced with a pointer; pointers always
  /// refer to earlier positions, and offsets past the 14-bit range are never
  /// recorded, so such suffixes are emitted as plain labels.
  pub(super) fn encode(
    &self,
    buf: &mut Vec<u8>,
    cmap: &mut Option<CompressionMap>,
    compress: bool,
  ) -> Result<(), ProtoError> {
    let s = self.0.as_str();
    if s.is_empty() || s == "." {
      buf.push(0);
      return Ok(());
    }

    let bytes = s.as_bytes();
    let mut wire_len = 1usize; // terminal zero
    let mut pos = 0usize;
    let mut label = Vec::with_capacity(MAX_LABEL_OCTETS);

    while pos < bytes.len() {
      if let Some(map) = cmap.as_mut() {
        if compress {
          if let Some(ptr) = map.find(&s[pos..]) {
            buf.extend_from_slice(&(0xC000u16 | ptr).to_be_bytes());
            return Ok(());
          }
        }

        if buf.len() < MAX_COMPRESSION_OFFSET {
          map.insert(
            SlicableSmolStr::new(self.0.clone(), pos, s.len()),
            buf.len() as u16,
          );
        }
      }

      label.clear();
      let mut i = pos;
      while i < bytes.len() {
        match bytes[i] {
          b'\\' => {
            if is_ddd(&bytes[i + 1..]) {
              label.push(ddd_to_byte(&bytes[i + 1..i + 4]));
              i += 4;
            } else if i + 1 < bytes.len() {
              label.push(bytes[i + 1]);
              i += 2;
            } else {
              return Err(ProtoError::InvalidRdata);
            }
          }
          b'.' => break,
          b => {
            label.push(b);
            i += 1;
          }
        }
      }

      if label.is_empty() {
        return Err(ProtoError::InvalidRdata);
      }

      if label.len() > MAX_LABEL_OCTETS {
        return Err(ProtoError::LabelTooLong);
      }

      wire_len += label.len() + 1;
      if wire_len > MAX_DOMAIN_NAME_WIRE_OCTETS {
        return Err(ProtoError::NameTooLong);
      }

      buf.push(label.len() as u8);
      buf.extend_from_slice(&label);

      pos = if i < bytes.len() { i + 1 } else { i };
    }

    buf.push(0);
    Ok(())
  }

  /// Returns the wire length of the name without compression.
  pub(super) fn encoded_len(&self) -> usize {
    let s = self.0.as_str();
    if s.is_empty() || s == "." {
      return 1;
    }

    let bytes = s.as_bytes();
    let mut total = 1usize; // terminal zero
    let mut cur = 0usize;
    let mut i = 0usize;

    while i < bytes.len() {
      match bytes[i] {
        b'\\' => {
          if is_ddd(&bytes[i + 1..]) {
            cur += 1;
            i += 4;
          } else {
            cur += 1;
            i += 2;
          }
        }
        b'.' => {
          total += cur + 1;
          cur = 0;
          i += 1;
        }
        _ => {
          cur += 1;
          i += 1;
        }
      }
    }

    if cur > 0 {
      total += cur + 1;
    }

    total
  }
}

// Returns true if
// a domain name label byte should be prefixed
// with an escaping backslash.
#[inline]
const fn is_domain_name_label_special(b: u8) -> bool {
  matches!(
    b,
    b'.' | b' ' | b'\'' | b'@' | b';' | b'(' | b')' | b'"' | b'\\'
  )
}

smallvec_wrapper::smallvec_wrapper!(
  InlineDomain<T>([T; 23]);
);

#[cfg(test)]
mod tests {
  use super::*;

  const MAX_PRINTABLE_LABEL: &str =
    "abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789x";

  #[test]
  fn empty_domain() {
    let input = [0];
    let (name, _) = Name::decode(&input, 0).unwrap();
    assert_eq!(name.as_str(), ".");
  }

  #[test]
  fn long_label() {
    let s = [b"?".as_slice(), MAX_PRINTABLE_LABEL.as_bytes(), b"\x00"].concat();
    let exp = [MAX_PRINTABLE_LABEL, "."].concat();
    let (name, _) = Name::decode(&s, 0).unwrap();
    assert_eq!(name.as_str(), exp);
  }

  #[test]
  fn long_domain() {
    let input = b"5abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ01abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVW1abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVW1abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVW1abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVW\x00";

    let exp = "abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0.abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVW.abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVW.abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVW.abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVW.";

    let name = Name::decode(input, 0).unwrap().0;
    assert_eq!(name.as_str(), exp);
  }

  #[test]
  fn compression_pointer() {
    let input = [
      3, b'f', b'o', b'o', 5, 3, b'c', b'o', b'm', 0, 7, b'e', b'x', b'a', b'm', b'p', b'l', b'e',
      0xC0, 5,
    ];

    let exp = "foo.\\003com\\000.example.com.";
    let (name, _) = Name::decode(&input, 0).unwrap();
    assert_eq!(name.as_str(), exp);
  }

  #[test]
  fn too_long_domain() {
    let input = b"6xabcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ01abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVW1abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVW1abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVW1abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVW";

    let name = Name::decode(input, 0).unwrap_err();
    assert_eq!(name, ProtoError::NameTooLong);
  }

  #[test]
  fn truncated_name() {
    let input = [7, b'e', b'x', b'a', b'm', b'p', b'l', b'e', 3];
    let err = Name::decode(&input, 0).unwrap_err();
    assert_eq!(err, ProtoError::BufferTooSmall);
  }

  #[test]
  fn non_absolute_name() {
    let input = [
      7, b'e', b'x', b'a', b'm', b'p', b'l', b'e', 3, b'c', b'o', b'm',
    ];
    let err = Name::decode(&input, 0).unwrap_err();
    assert_eq!(err, ProtoError::BufferTooSmall);
  }

  #[test]
  fn compression_pointer_cycle_too_many() {
    let input = [0xC0, 0x00];
    let err = Name::decode(&input, 0).unwrap_err();
    assert_eq!(err, ProtoError::TooManyPointers);
  }

  #[test]
  fn compression_pointer_cycle_too_long() {
    let input = [
      3, b'f', b'o', b'o', 3, b'b', b'a', b'r', 7, b'e', b'x', b'a', b'm', b'p', b'l', b'e', 0xC0,
      0x04,
    ];
    let err = Name::decode(&input, 0).unwrap_err();
    assert_eq!(err, ProtoError::NameTooLong);
  }

  #[test]
  fn forward_pointer() {
    let input = [2, 0xC0, 0xFF, 0xC0, 0x01];
    let err = Name::decode(&input, 0).unwrap_err();
    assert_eq!(err, ProtoError::BufferTooSmall);
  }

  #[test]
  fn reserved_compression_pointer_0b10() {
    let input = [7, b'e', b'x', b'a', b'm', b'p', b'l', b'e', 0x80];
    let err = Name::decode(&input, 0).unwrap_err();
    assert_eq!(err, ProtoError::InvalidRdata);
  }

  #[test]
  fn reserved_compression_pointer_0b01() {
    let input = [7, b'e', b'x', b'a', b'm', b'p', b'l', b'e', 0x40];
    let err = Name::decode(&input, 0).unwrap_err();
    assert_eq!(err, ProtoError::InvalidRdata);
  }

  #[test]
  fn encode_round_trip() {
    let name = Name::from("hostname._http._tcp.local");
    let mut buf = Vec::new();
    name.encode(&mut buf, &mut None, false).unwrap();
    assert_eq!(buf.len(), name.encoded_len());

    let (decoded, consumed) = Name::decode(&buf, 0).unwrap();
    assert_eq!(consumed, buf.len());
    assert_eq!(decoded, name);
    assert_eq!(decoded.as_str(), "hostname._http._tcp.local.");
  }

  #[test]
  fn encode_root() {
    let mut buf = Vec::new();
    Name::default().encode(&mut buf, &mut None, false).unwrap();
    assert_eq!(buf, [0]);
    assert_eq!(Name::default().encoded_len(), 1);
  }

  #[test]
  fn encode_compresses_suffix() {
    let mut cmap = Some(CompressionMap::new());
    let mut buf = Vec::new();

    Name::from("foo.local.")
      .encode(&mut buf, &mut cmap, true)
      .unwrap();
    let first = buf.len();

    Name::from("bar.local.")
      .encode(&mut buf, &mut cmap, true)
      .unwrap();

    // second name shares the "local." tail via a pointer to offset 4
    assert!(buf.len() < first + Name::from("bar.local.").encoded_len());
    assert_eq!(&buf[first..], &[3, b'b', b'a', b'r', 0xC0, 0x04]);

    let (name, _) = Name::decode(&buf, first).unwrap();
    assert_eq!(name.as_str(), "bar.local.");
  }

  #[test]
  fn encode_exact_match_uses_pointer() {
    let mut cmap = Some(CompressionMap::new());
    let mut buf = Vec::new();

    Name::from("x.local.").encode(&mut buf, &mut cmap, true).unwrap();
    let first = buf.len();
    Name::from("x.local.").encode(&mut buf, &mut cmap, true).unwrap();

    assert_eq!(&buf[first..], &[0xC0, 0x00]);
  }

  #[test]
  fn encode_label_too_long() {
    let label = "a".repeat(64);
    let err = Name::from(label.as_str())
      .encode(&mut Vec::new(), &mut None, false)
      .unwrap_err();
    assert_eq!(err, ProtoError::LabelTooLong);
  }

  #[test]
  fn escaped_labels_round_trip() {
    let input = [3, b'a', b'.', b'b', 0];
    let (name, consumed) = Name::decode(&input, 0).unwrap();
    assert_eq!(name.as_str(), "a\\.b.");
    assert_eq!(consumed, 5);

    let mut buf = Vec::new();
    name.encode(&mut buf, &mut None, false).unwrap();
    assert_eq!(buf, input);
  }

  #[test]
  fn case_insensitive_equality() {
    assert_eq!(Name::from("X.Local"), Name::from("x.local."));

    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};
    let hash = |n: &Name| {
      let mut h = DefaultHasher::new();
      n.hash(&mut h);
      h.finish()
    };
    assert_eq!(hash(&Name::from("X.Local")), hash(&Name::from("x.local.")));
  }
}
