use std::{
  sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
  },
  time::Duration,
};

use agnostic_net::{Net, runtime::RuntimeLite};
use smol_str::SmolStr;

use crate::{
  Canceller, DNSClass, Error, Message, MulticastService, Name, RecordData, RecordType,
  ResourceRecord, ServiceOptions,
};

fn query_message(name: &str) -> Message {
  Message::query(Name::from(name), RecordType::ANY, DNSClass::IN, false)
}

fn oversized_records(name: &str) -> Vec<ResourceRecord> {
  let blob: SmolStr = "x".repeat(250).into();
  (0..40)
    .map(|_| {
      ResourceRecord::new(
        Name::from(name),
        4500,
        RecordData::TXT(triomphe::Arc::from_iter([blob.clone()])),
      )
    })
    .collect()
}

async fn start_stop<N: Net>() {
  let svc = MulticastService::<N>::new(ServiceOptions::default());
  svc.start().await.unwrap();
  // starting a running service is a no-op
  svc.start().await.unwrap();

  svc.stop().await;
  // stopping a stopped service is a no-op
  svc.stop().await;
}

async fn restart<N: Net>() {
  let svc = MulticastService::<N>::new(ServiceOptions::default());

  svc.start().await.unwrap();
  svc.stop().await;

  svc.start().await.unwrap();
  svc
    .query(Name::from("x.local"), RecordType::ANY, DNSClass::IN)
    .await
    .unwrap();
  svc.stop().await;
}

async fn not_started<N: Net>() {
  let svc = MulticastService::<N>::new(ServiceOptions::default());

  assert!(matches!(
    svc
      .query(Name::from("x.local"), RecordType::ANY, DNSClass::IN)
      .await,
    Err(Error::NotStarted)
  ));
  assert!(matches!(
    svc.send_answer(Message::new()).await,
    Err(Error::NotStarted)
  ));
  assert!(matches!(
    svc.refresh_interfaces().await,
    Err(Error::NotStarted)
  ));
}

async fn requires_at_least_one_family<N: Net>() {
  let svc =
    MulticastService::<N>::new(ServiceOptions::new().with_ipv4(false).with_ipv6(false));
  assert!(svc.start().await.is_err());
}

async fn resolve_completes_on_matching_answer<N: Net>() {
  let svc = MulticastService::<N>::new(ServiceOptions::default());
  svc.start().await.unwrap();

  let answer_packet = {
    let mut msg = Message::new();
    msg.header_mut().set_response(true);
    msg.header_mut().set_authoritative(true);
    msg.answers_mut().push(ResourceRecord::new(
      Name::from("x.local"),
      120,
      RecordData::A("192.0.2.7".parse().unwrap()),
    ));
    msg.encode().unwrap()
  };

  let resolve = svc.resolve(query_message("x.local"), Canceller::new());
  let inject = async {
    // give resolve a chance to subscribe and send before injecting
    <N::Runtime as RuntimeLite>::sleep(Duration::from_millis(50)).await;
    svc.inject_datagram("192.0.2.7:5353".parse().unwrap(), &answer_packet);
  };

  let (res, ()) = futures::join!(resolve, inject);
  let msg = res.unwrap();
  assert_eq!(msg.answers()[0].name(), &Name::from("x.local"));

  svc.stop().await;
}

async fn resolve_cancelled<N: Net>() {
  let svc = MulticastService::<N>::new(ServiceOptions::default());
  svc.start().await.unwrap();

  let canceller = Canceller::new();
  canceller.cancel();

  let res = svc.resolve(query_message("x.local"), canceller).await;
  assert!(matches!(res, Err(Error::Cancelled)));

  svc.stop().await;
}

async fn oversized_query_is_rejected<N: Net>() {
  let svc = MulticastService::<N>::new(ServiceOptions::default());
  svc.start().await.unwrap();

  let mut query = query_message("big.local");
  query.answers_mut().extend(oversized_records("big.local"));
  assert!(matches!(
    svc.send_query(query).await,
    Err(Error::MessageTooLarge { .. })
  ));

  // the answer path truncates instead of failing
  let mut answer = Message::new();
  answer.answers_mut().extend(oversized_records("big.local"));
  svc.send_answer(answer).await.unwrap();

  svc.stop().await;
}

async fn stop_clears_subscriptions<N: Net>() {
  let svc = MulticastService::<N>::new(ServiceOptions::default());
  svc.start().await.unwrap();

  let count = Arc::new(AtomicUsize::new(0));
  let c = count.clone();
  svc
    .on_query(move |_| {
      c.fetch_add(1, Ordering::SeqCst);
    })
    .forget();

  svc.stop().await;

  let packet = query_message("x.local").encode().unwrap();
  svc.inject_datagram("192.0.2.1:53000".parse().unwrap(), &packet);
  assert_eq!(count.load(Ordering::SeqCst), 0);
}

async fn legacy_query_gets_a_reply<N: Net>() {
  let svc = MulticastService::<N>::new(ServiceOptions::default());

  let (tx, rx) = async_channel::bounded(1);
  let _sub = svc.on_query(move |event| {
    let _ = tx.try_send(event.clone());
  });

  svc.start().await.unwrap();

  let packet = query_message("host.local").encode().unwrap();
  svc.inject_datagram("192.0.2.99:53000".parse().unwrap(), &packet);

  let event = rx.recv().await.unwrap();
  assert!(event.is_legacy_unicast());

  let mut answer = Message::new();
  answer.answers_mut().push(ResourceRecord::new(
    Name::from("host.local"),
    120,
    RecordData::A("192.0.2.10".parse().unwrap()),
  ));
  svc.respond(answer, &event, true).await.unwrap();

  svc.stop().await;
}

test_suites!(tokio {
  start_stop,
  restart,
  not_started,
  requires_at_least_one_family,
  resolve_cancelled,
  resolve_completes_on_matching_answer,
  oversized_query_is_rejected,
  stop_clears_subscriptions,
  legacy_query_gets_a_reply,
});

test_suites!(smol {
  start_stop,
  restart,
  not_started,
  requires_at_least_one_family,
  resolve_cancelled,
  resolve_completes_on_matching_answer,
  oversized_query_is_rejected,
  stop_clears_subscriptions,
  legacy_query_gets_a_reply,
});

test_suites!(async_std {
  start_stop,
  restart,
  not_started,
  requires_at_least_one_family,
  resolve_cancelled,
  resolve_completes_on_matching_answer,
  oversized_query_is_rejected,
  stop_clears_subscriptions,
  legacy_query_gets_a_reply,
});
