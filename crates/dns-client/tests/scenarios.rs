//! End-to-end resolution scenarios, driven without sockets: the client
//! is fed fabricated packets and explicit clock readings.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{mpsc, Arc};
use std::time::{Duration, Instant};

use dns_client::types::{Answer, ResolveError};
use dns_client::{Client, DNS_PORT};
use dns_wire::types::test_util::*;
use dns_wire::types::*;

fn ns_addr() -> SocketAddr {
    SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::new(192, 0, 2, 53), DNS_PORT))
}

/// A client whose cache knows the nameserver for example.com and its
/// address.
fn seeded_client(now: Instant) -> Client {
    let mut client = Client::new();
    client
        .cache_mut()
        .insert(&ns_record("example.com.", "ns.example.com."), false, now);
    client.cache_mut().insert(
        &a_record("ns.example.com.", Ipv4Addr::new(192, 0, 2, 53)),
        false,
        now,
    );
    client
}

type ResultReceiver = mpsc::Receiver<Result<Answer, ResolveError>>;

fn submit(
    client: &mut Client,
    now: Instant,
    questions: Vec<Question>,
) -> (dns_client::TaskHandle, ResultReceiver) {
    let (tx, rx) = mpsc::channel();
    let failure_tx = tx.clone();
    let handle = client.resolve(
        now,
        true,
        questions,
        Box::new(move |answer| {
            tx.send(Ok(answer)).unwrap();
        }),
        Box::new(move |error| {
            failure_tx.send(Err(error)).unwrap();
        }),
    );
    (handle, rx)
}

fn sent_query(client: &mut Client) -> (Message, SocketAddr) {
    let (octets, server) = client.next_outbound().expect("expected an outbound query");
    (Message::from_octets(&octets).unwrap(), server)
}

fn deliver(client: &mut Client, response: &Message, peer: SocketAddr, now: Instant) {
    client.handle_packet(&response.to_octets().unwrap(), peer, now);
}

#[test]
fn cold_lookup_with_cached_nameserver() {
    let now = Instant::now();
    let mut client = seeded_client(now);

    let (_, results) = submit(&mut client, now, vec![a_question("www.example.com.")]);

    let (query, server) = sent_query(&mut client);
    assert_eq!(ns_addr(), server);
    assert!(query.header.is_query);
    assert!(!query.header.recursion_desired);
    assert_eq!(vec![a_question("www.example.com.")], query.questions);
    assert!(!client.has_outbound());

    let expected = a_record("www.example.com.", Ipv4Addr::new(203, 0, 113, 9));
    let mut response = query.response();
    response.answers = vec![expected.clone()];
    deliver(&mut client, &response, server, now + Duration::from_millis(10));

    let answer = results.try_recv().unwrap().unwrap();
    assert_eq!(vec![expected], answer.answers);
    assert!(answer.negatives.is_empty());
    assert_eq!(0, client.outstanding());
}

#[test]
fn cname_is_followed_to_a_second_query() {
    let now = Instant::now();
    let mut client = seeded_client(now);

    let (_, results) = submit(&mut client, now, vec![a_question("alias.example.com.")]);

    let (first_query, server) = sent_query(&mut client);
    assert_eq!(vec![a_question("alias.example.com.")], first_query.questions);

    let alias = cname_record("alias.example.com.", "real.example.com.");
    let mut response = first_query.response();
    response.answers = vec![alias.clone()];
    deliver(&mut client, &response, server, now + Duration::from_millis(10));

    // the engine picked up the alias and went back out for the target
    let (second_query, second_server) = sent_query(&mut client);
    assert_eq!(ns_addr(), second_server);
    assert_eq!(vec![a_question("real.example.com.")], second_query.questions);

    let target = a_record("real.example.com.", Ipv4Addr::new(203, 0, 113, 10));
    let mut response = second_query.response();
    response.answers = vec![target.clone()];
    deliver(
        &mut client,
        &response,
        second_server,
        now + Duration::from_millis(20),
    );

    let answer = results.try_recv().unwrap().unwrap();
    let mut all = answer.answers.clone();
    all.extend(answer.additional.clone());
    assert!(all.contains(&alias));
    assert!(all.contains(&target));
    assert_eq!(0, client.outstanding());
}

#[test]
fn nxdomain_fails_the_task_and_caches_the_negative() {
    let now = Instant::now();
    let mut client = seeded_client(now);

    let (_, results) = submit(&mut client, now, vec![a_question("bogus.example.com.")]);

    let (query, server) = sent_query(&mut client);
    let mut response = query.response();
    response.header.rcode = Rcode::NameError;
    deliver(&mut client, &response, server, now + Duration::from_millis(10));

    match results.try_recv().unwrap() {
        Err(ResolveError::NotFound { question }) => {
            assert_eq!(domain("bogus.example.com."), question.name);
        }
        other => panic!("expected NotFound, got {other:?}"),
    }

    assert!(client.cache().is_negative(
        &domain("bogus.example.com."),
        RecordType::A,
        RecordClass::IN,
        now + Duration::from_secs(30),
    ));
}

#[test]
fn negative_cache_answers_the_next_ask() {
    let now = Instant::now();
    let mut client = seeded_client(now);

    let (_, first) = submit(&mut client, now, vec![a_question("bogus.example.com.")]);
    let (query, server) = sent_query(&mut client);
    let mut response = query.response();
    response.header.rcode = Rcode::NameError;
    deliver(&mut client, &response, server, now + Duration::from_millis(10));
    assert!(first.try_recv().unwrap().is_err());

    // the second ask never touches the network
    let (_, second) = submit(
        &mut client,
        now + Duration::from_secs(1),
        vec![a_question("bogus.example.com.")],
    );
    assert!(!client.has_outbound());

    let answer = second.try_recv().unwrap().unwrap();
    assert!(answer.answers.is_empty());
    assert_eq!(vec![a_question("bogus.example.com.")], answer.negatives);
}

#[test]
fn unanswered_queries_retry_then_give_up() {
    let now = Instant::now();
    let mut client = Client::new();
    client.add_nameserver(ns_addr());

    let (_, results) = submit(&mut client, now, vec![a_question("host.test.")]);

    let mut queries = Vec::new();
    let mut clock = now;
    loop {
        while let Some((octets, server)) = client.next_outbound() {
            assert_eq!(ns_addr(), server);
            queries.push(Message::from_octets(&octets).unwrap());
        }
        match client.next_deadline() {
            Some(deadline) => {
                assert!(deadline > clock);
                clock = deadline;
                client.handle_timeouts(clock);
            }
            None => break,
        }
    }

    // one round per allowed iteration, all identical
    assert_eq!(5, queries.len());
    for query in &queries {
        assert_eq!(queries[0], *query);
    }

    match results.try_recv().unwrap() {
        Err(ResolveError::TooManyRetries { iterations }) => assert_eq!(5, iterations),
        other => panic!("expected TooManyRetries, got {other:?}"),
    }
    assert_eq!(0, client.outstanding());
}

#[test]
fn retry_backoff_grows() {
    let now = Instant::now();
    let mut client = Client::new();
    client.add_nameserver(ns_addr());

    submit(&mut client, now, vec![a_question("host.test.")]);

    let first = client.next_deadline().unwrap();
    assert_eq!(now + Duration::from_secs(4), first);

    client.handle_timeouts(first);
    let second = client.next_deadline().unwrap();
    assert_eq!(first + Duration::from_secs(5), second);

    client.handle_timeouts(second);
    let third = client.next_deadline().unwrap();
    assert_eq!(second + Duration::from_secs(7), third);
}

#[test]
fn untrusted_record_is_dropped_and_ignored() {
    let now = Instant::now();
    let mut client = Client::new();
    client.add_nameserver(ns_addr());

    let (_, results) = submit(&mut client, now, vec![a_question("x.com.")]);
    let (query, _) = sent_query(&mut client);

    // right id, wrong peer: not configured, never granted anything
    let forger = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::new(198, 51, 100, 7), DNS_PORT));
    let mut forged = query.response();
    forged.answers = vec![a_record("x.com.", Ipv4Addr::new(10, 0, 0, 1))];
    deliver(&mut client, &forged, forger, now + Duration::from_millis(10));

    assert!(client
        .cache()
        .lookup_one(&domain("x.com."), RecordType::A, RecordClass::IN, now)
        .is_none());
    assert_eq!(1, client.outstanding());
    assert!(results.try_recv().is_err());
    assert_eq!(1, client.metrics().untrusted_drops);
    assert_eq!(1, client.metrics().useless_responses);
}

#[test]
fn circular_cname_fails_immediately() {
    let now = Instant::now();
    let mut client = Client::new();
    client
        .cache_mut()
        .insert(&cname_record("a.test.", "b.test."), false, now);
    client
        .cache_mut()
        .insert(&cname_record("b.test.", "a.test."), false, now);

    let (_, results) = submit(&mut client, now, vec![a_question("a.test.")]);

    match results.try_recv().unwrap() {
        Err(ResolveError::CircularCname { .. }) => (),
        other => panic!("expected CircularCname, got {other:?}"),
    }
    assert!(!client.has_outbound());
    assert_eq!(0, client.outstanding());
}

#[test]
fn referral_moves_to_the_learned_nameserver() {
    let now = Instant::now();
    let mut client = Client::new();
    client.add_nameserver(ns_addr());

    let (_, results) = submit(&mut client, now, vec![a_question("www.example.com.")]);
    let (query, server) = sent_query(&mut client);
    assert_eq!(ns_addr(), server);

    // the configured server refers us down the tree with glue
    let mut referral = query.response();
    referral.authority = vec![ns_record("example.com.", "ns2.example.com.")];
    referral.additional = vec![a_record("ns2.example.com.", Ipv4Addr::new(192, 0, 2, 99))];
    deliver(&mut client, &referral, server, now + Duration::from_millis(10));

    let (second_query, second_server) = sent_query(&mut client);
    assert_eq!(
        SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::new(192, 0, 2, 99), DNS_PORT)),
        second_server
    );
    assert_eq!(vec![a_question("www.example.com.")], second_query.questions);

    let expected = a_record("www.example.com.", Ipv4Addr::new(203, 0, 113, 9));
    let mut response = second_query.response();
    response.answers = vec![expected.clone()];
    deliver(
        &mut client,
        &response,
        second_server,
        now + Duration::from_millis(20),
    );

    let answer = results.try_recv().unwrap().unwrap();
    assert!(answer.answers.contains(&expected));
}

#[test]
fn stub_mode_asks_for_recursion() {
    let now = Instant::now();
    let mut client = Client::new();
    client.add_nameserver(ns_addr());
    client.set_stub_resolver(true);

    submit(&mut client, now, vec![a_question("www.example.com.")]);

    let (query, server) = sent_query(&mut client);
    assert_eq!(ns_addr(), server);
    assert!(query.header.recursion_desired);
}

#[test]
fn questions_for_one_server_share_a_message() {
    let now = Instant::now();
    let mut client = Client::new();
    client.add_nameserver(ns_addr());
    client.set_stub_resolver(true);

    submit(
        &mut client,
        now,
        vec![a_question("a.example.com."), a_question("b.example.com.")],
    );

    let (query, _) = sent_query(&mut client);
    assert_eq!(2, query.questions.len());
    assert!(!client.has_outbound());
}

#[test]
fn cache_only_task_returns_partial_data() {
    let now = Instant::now();
    let mut client = Client::new();
    let cached = a_record("known.example.com.", Ipv4Addr::new(203, 0, 113, 1));
    client.cache_mut().insert(&cached, false, now);

    let (tx, rx) = mpsc::channel();
    let failure_tx = tx.clone();
    client.resolve(
        now,
        false,
        vec![
            a_question("known.example.com."),
            a_question("unknown.example.com."),
        ],
        Box::new(move |answer| {
            tx.send(Ok(answer)).unwrap();
        }),
        Box::new(move |error| {
            failure_tx.send(Err(error)).unwrap();
        }),
    );

    // no network traffic, immediate success with what the cache had
    assert!(!client.has_outbound());
    let answer = rx.try_recv().unwrap().unwrap();
    assert_eq!(vec![cached], answer.answers);
}

#[test]
fn cancel_suppresses_callbacks_but_runs_drop_hook() {
    let now = Instant::now();
    let mut client = Client::new();
    client.add_nameserver(ns_addr());

    let drops = Arc::new(AtomicU32::new(0));
    let hook_drops = drops.clone();
    let handle = client.resolve_with_drop_hook(
        now,
        true,
        vec![a_question("host.test.")],
        Box::new(|_| panic!("success after cancel")),
        Box::new(|_| panic!("failure after cancel")),
        Some(Box::new(move || {
            hook_drops.fetch_add(1, Ordering::SeqCst);
        })),
    );

    client.cancel(handle);
    assert_eq!(1, drops.load(Ordering::SeqCst));
    assert_eq!(0, client.outstanding());

    // a late timer or packet finds nothing to poke
    client.handle_timeouts(now + Duration::from_secs(60));
    client.cancel(handle);
    assert_eq!(1, drops.load(Ordering::SeqCst));
}

#[test]
fn transport_shutdown_fails_every_task() {
    let now = Instant::now();
    let mut client = Client::new();
    client.add_nameserver(ns_addr());

    let (_, first) = submit(&mut client, now, vec![a_question("one.test.")]);
    let (_, second) = submit(&mut client, now, vec![a_question("two.test.")]);

    client.fail_all();

    assert!(matches!(
        first.try_recv().unwrap(),
        Err(ResolveError::TransportClosed)
    ));
    assert!(matches!(
        second.try_recv().unwrap(),
        Err(ResolveError::TransportClosed)
    ));
    assert_eq!(0, client.outstanding());
}

#[test]
fn responses_only_reach_their_own_task() {
    let now = Instant::now();
    let mut client = seeded_client(now);

    let (_, first) = submit(&mut client, now, vec![a_question("one.example.com.")]);
    let (first_query, server) = sent_query(&mut client);

    let (_, second) = submit(&mut client, now, vec![a_question("two.example.com.")]);
    let (second_query, _) = sent_query(&mut client);
    assert_ne!(first_query.header.id, second_query.header.id);

    let mut response = first_query.response();
    response.answers = vec![a_record("one.example.com.", Ipv4Addr::new(203, 0, 113, 1))];
    deliver(&mut client, &response, server, now + Duration::from_millis(10));

    assert!(first.try_recv().unwrap().is_ok());
    assert!(second.try_recv().is_err());
    assert_eq!(1, client.outstanding());
}

#[test]
fn no_nameservers_fails_cleanly() {
    let now = Instant::now();
    let mut client = Client::new();

    let (_, results) = submit(&mut client, now, vec![a_question("host.test.")]);

    assert!(matches!(
        results.try_recv().unwrap(),
        Err(ResolveError::NoNameServers)
    ));
}

#[test]
fn server_failure_rcode_fails_the_task() {
    let now = Instant::now();
    let mut client = seeded_client(now);

    let (_, results) = submit(&mut client, now, vec![a_question("www.example.com.")]);
    let (query, server) = sent_query(&mut client);

    let mut response = query.response();
    response.header.rcode = Rcode::ServerFailure;
    deliver(&mut client, &response, server, now + Duration::from_millis(10));

    assert!(matches!(
        results.try_recv().unwrap(),
        Err(ResolveError::ServerProblem { .. })
    ));
}

#[test]
fn soa_minimum_bounds_the_negative_ttl() {
    let now = Instant::now();
    let mut client = seeded_client(now);

    let (_, results) = submit(&mut client, now, vec![a_question("gone.example.com.")]);
    let (query, server) = sent_query(&mut client);

    let mut response = query.response();
    response.header.rcode = Rcode::NameError;
    response.authority = vec![soa_record("example.com.", 10)];
    deliver(&mut client, &response, server, now + Duration::from_millis(10));

    assert!(results.try_recv().unwrap().is_err());

    let name = domain("gone.example.com.");
    assert!(client
        .cache()
        .is_negative(&name, RecordType::A, RecordClass::IN, now + Duration::from_secs(5)));
    assert!(!client.cache().is_negative(
        &name,
        RecordType::A,
        RecordClass::IN,
        now + Duration::from_secs(30)
    ));
}
