use std::io;

use crate::types::ProtoError;

/// The error type returned by the public service operations.
///
/// Recoverable network failures (a sender that cannot bind, a datagram
/// that fails to send) never surface here; they are logged and swallowed
/// by the component that encountered them.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
  /// The outbound packet exceeds the maximum mDNS payload.
  #[error("message of {size} bytes exceeds the maximum payload of {max} bytes")]
  MessageTooLarge {
    /// The encoded size of the rejected message.
    size: usize,
    /// The maximum payload the service can send.
    max: usize,
  },
  /// A send or query operation was invoked before [`start`].
  ///
  /// [`start`]: crate::MulticastService::start
  #[error("the service has not been started")]
  NotStarted,
  /// A [`resolve`] completed because its canceller fired.
  ///
  /// [`resolve`]: crate::MulticastService::resolve
  #[error("the operation was cancelled")]
  Cancelled,
  /// The wire codec rejected a message.
  #[error(transparent)]
  Proto(#[from] ProtoError),
  /// An I/O error that is attributable to the caller's request.
  #[error(transparent)]
  Io(#[from] io::Error),
}
