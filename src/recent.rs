use std::{
  collections::{HashMap, VecDeque},
  time::{Duration, Instant},
};

use parking_lot::Mutex;
use triomphe::Arc;

const DEFAULT_INTERVAL: Duration = Duration::from_secs(1);
const DEFAULT_CAPACITY: usize = 128;

/// A short-window membership test over recently seen byte packets.
///
/// One instance suppresses duplicate inbound datagrams (the same packet
/// arriving on several per-interface sockets), another suppresses
/// re-sending identical answers. Entries expire after the interval and are
/// collected lazily; under capacity pressure the oldest entry is dropped,
/// which is indistinguishable from expiry. Lookup is keyed by the full
/// packet bytes, so hash collisions cannot produce false positives.
pub(crate) struct RecentMessages {
  interval: Duration,
  capacity: usize,
  inner: Mutex<Inner>,
}

struct Inner {
  seen: HashMap<Arc<[u8]>, Instant>,
  order: VecDeque<(Instant, Arc<[u8]>)>,
}

impl Default for RecentMessages {
  #[inline]
  fn default() -> Self {
    Self::new()
  }
}

impl RecentMessages {
  /// Returns a new filter with the default 1 second window.
  pub(crate) fn new() -> Self {
    Self::with_interval(DEFAULT_INTERVAL)
  }

  /// Returns a new filter with the given expiry window.
  pub(crate) fn with_interval(interval: Duration) -> Self {
    Self {
      interval,
      capacity: DEFAULT_CAPACITY,
      inner: Mutex::new(Inner {
        seen: HashMap::new(),
        order: VecDeque::new(),
      }),
    }
  }

  /// Sets the maximum number of tracked packets.
  #[cfg(test)]
  pub(crate) fn with_capacity(mut self, capacity: usize) -> Self {
    self.capacity = capacity.max(1);
    self
  }

  /// Records the packet, returning `true` iff it was not already present.
  /// An entry inserted more than the expiry interval ago counts as absent.
  pub(crate) fn try_add(&self, packet: &[u8]) -> bool {
    let now = Instant::now();
    let mut inner = self.inner.lock();

    // lazy expiry from the oldest end; an entry is only removed from the
    // map when this queue slot is the one that inserted its timestamp
    while let Some(&(t, _)) = inner.order.front() {
      if now.duration_since(t) < self.interval {
        break;
      }

      let (t, key) = inner.order.pop_front().unwrap();
      if inner.seen.get(&key) == Some(&t) {
        inner.seen.remove(&key);
      }
    }

    if let Some(inserted) = inner.seen.get(packet) {
      if now.duration_since(*inserted) < self.interval {
        return false;
      }
    }

    let key: Arc<[u8]> = Arc::from_iter(packet.iter().copied());
    inner.seen.insert(key.clone(), now);
    inner.order.push_back((now, key));

    while inner.seen.len() > self.capacity {
      match inner.order.pop_front() {
        Some((t, key)) => {
          if inner.seen.get(&key) == Some(&t) {
            inner.seen.remove(&key);
          }
        }
        None => break,
      }
    }

    true
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn duplicate_within_window_is_rejected() {
    let recent = RecentMessages::new();
    assert!(recent.try_add(b"hello"));
    assert!(!recent.try_add(b"hello"));
    assert!(recent.try_add(b"world"));
    assert!(!recent.try_add(b"world"));
  }

  #[test]
  fn entry_expires_after_interval() {
    let recent = RecentMessages::with_interval(Duration::from_millis(50));
    assert!(recent.try_add(b"hello"));
    assert!(!recent.try_add(b"hello"));

    std::thread::sleep(Duration::from_millis(60));
    assert!(recent.try_add(b"hello"));
  }

  #[test]
  fn equality_is_over_full_packet_bytes() {
    let recent = RecentMessages::new();
    assert!(recent.try_add(b"packet-a"));
    assert!(recent.try_add(b"packet-b"));
    assert!(!recent.try_add(b"packet-a"));
  }

  #[test]
  fn oldest_is_dropped_under_pressure() {
    let recent = RecentMessages::new().with_capacity(2);
    assert!(recent.try_add(b"one"));
    assert!(recent.try_add(b"two"));
    assert!(recent.try_add(b"three"));

    // "one" was evicted, so it counts as unseen again
    assert!(recent.try_add(b"one"));
    assert!(!recent.try_add(b"three"));
  }
}
