#![doc = include_str!("../README.md")]
#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![allow(unexpected_cfgs)]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![cfg_attr(docsrs, allow(unused_attributes))]

#[cfg(test)]
mod tests;

use std::net::Ipv4Addr;

const IPV4_MDNS: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 251);
const MDNS_PORT: u16 = 5353;
// See RFC 6762, https://datatracker.ietf.org/doc/rfc6762/
const MAX_PAYLOAD_SIZE: usize = 9000;
// Reserved for the IP and UDP headers when computing the payload bound.
const IP_UDP_OVERHEAD: usize = 48;

mod error;
pub use error::Error;

mod interfaces;
pub use interfaces::NetworkInterface;

mod recent;

mod service;
pub use service::{
  AnswerEvent, Canceller, InterfaceFilter, MulticastService, QueryEvent, ServiceOptions,
  Subscription,
};

mod transport;
pub use transport::{MulticastScope, ScopeSelector};

mod types;
pub use types::{
  DNSClass, Header, Message, Name, ProtoError, Question, RecordData, RecordType, ResourceRecord,
  SRV, UnknownRecordTypeStr,
};

mod utils;

pub use agnostic_net as net;
pub use iprobe as netprobe;
pub use smol_str::SmolStr;

/// Types for `tokio` runtime
#[cfg(feature = "tokio")]
#[cfg_attr(docsrs, doc(cfg(feature = "tokio")))]
pub mod tokio {
  pub use agnostic_net::{runtime::tokio::TokioRuntime as Runtime, tokio::Net};

  /// A service that can be used with `tokio` runtime
  pub type Service = super::MulticastService<Net>;
}

/// Types for `smol` runtime
#[cfg(feature = "smol")]
#[cfg_attr(docsrs, doc(cfg(feature = "smol")))]
pub mod smol {
  pub use agnostic_net::{runtime::smol::SmolRuntime as Runtime, smol::Net};

  /// A service that can be used with `smol` runtime
  pub type Service = super::MulticastService<Net>;
}

/// Types for `async-std` runtime
#[cfg(feature = "async-std")]
#[cfg_attr(docsrs, doc(cfg(feature = "async-std")))]
pub mod async_std {
  pub use agnostic_net::{async_std::Net, runtime::async_std::AsyncStdRuntime as Runtime};

  /// A service that can be used with `async-std` runtime
  pub type Service = super::MulticastService<Net>;
}
