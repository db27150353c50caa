use clap::Parser;
use std::net::{Ipv4Addr, SocketAddr};
use std::process;
use std::sync::mpsc;
use std::time::Instant;
use tokio::net::UdpSocket;
use tracing_subscriber::EnvFilter;

use dns_client::net::drive_udp;
use dns_client::system;
use dns_client::types::Answer;
use dns_client::{Client, DNS_PORT};
use dns_wire::types::{
    DomainName, QueryClass, QueryType, Question, Rdata, RecordClass, RecordType, ResourceRecord,
};

fn display_rdata(rdata: &Rdata) -> String {
    match rdata {
        Rdata::A { address } => address.to_string(),
        Rdata::AAAA { address } => address.to_string(),
        Rdata::NS { nsdname } => nsdname.to_string(),
        Rdata::CNAME { canonical } => canonical.to_string(),
        Rdata::SOA {
            mname,
            rname,
            serial,
            refresh,
            retry,
            expire,
            minimum,
        } => format!("{mname} {rname} {serial} {refresh} {retry} {expire} {minimum}"),
        Rdata::PTR { ptrdname } => ptrdname.to_string(),
        Rdata::MX {
            preference,
            exchange,
        } => format!("{preference} {exchange}"),
        Rdata::TXT { octets } => format!("\"{}\"", String::from_utf8_lossy(octets)),
        Rdata::Unknown { octets, .. } => format!("\\# {} {octets:?}", octets.len()),
    }
}

fn print_section(heading: &str, rrs: &[ResourceRecord]) {
    if rrs.is_empty() {
        return;
    }

    println!("\n;; {heading}");
    for rr in rrs {
        println!(
            "{}\t{}\t{}\t{}\t{}",
            rr.name,
            rr.ttl,
            rr.rclass,
            rr.rtype(),
            display_rdata(&rr.rdata)
        );
    }
}

fn print_answer(answer: &Answer) {
    if !answer.negatives.is_empty() {
        println!("\n;; NEGATIVE");
        for question in &answer.negatives {
            println!("; {question} does not exist");
        }
    }
    print_section("ANSWER", &answer.answers);
    print_section("AUTHORITY", &answer.authority);
    print_section("ADDITIONAL", &answer.additional);
}

fn begin_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();
}

// the doc comments for this struct turn into the CLI help text
#[derive(Parser)]
/// DNS lookup utility
///
/// Resolves a name by walking the zone hierarchy from whatever the
/// cache and the system configuration provide, or by handing the
/// query to the configured nameservers in stub mode.
struct Args {
    /// Domain name to resolve
    #[clap(value_parser)]
    domain: DomainName,

    /// Query type to resolve
    #[clap(default_value_t = QueryType::Record(RecordType::A), value_parser)]
    qtype: QueryType,

    /// Nameserver to use, can be specified more than once; defaults to
    /// the ones in /etc/resolv.conf
    #[clap(short, long, value_parser)]
    nameserver: Vec<Ipv4Addr>,

    /// Send the whole query to the configured nameservers with
    /// recursion desired, instead of iterating from the zone hierarchy
    #[clap(long, action(clap::ArgAction::SetTrue))]
    stub: bool,

    /// Do not read /etc/resolv.conf or /etc/hosts
    #[clap(long, action(clap::ArgAction::SetTrue))]
    no_system: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    begin_logging();
    let args = Args::parse();

    let question = Question {
        name: args.domain,
        qtype: args.qtype,
        qclass: QueryClass::Record(RecordClass::IN),
    };

    let mut client = Client::new();
    if !args.no_system {
        system::apply_system_files(&mut client, Instant::now());
    }
    for address in args.nameserver {
        client.add_nameserver(SocketAddr::from((address, DNS_PORT)));
    }
    client.set_stub_resolver(args.stub);

    if client.nameservers().is_empty() {
        eprintln!("no nameservers configured; pass --nameserver");
        process::exit(1);
    }

    let socket = match UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await {
        Ok(socket) => socket,
        Err(error) => {
            eprintln!("could not bind UDP socket: {error}");
            process::exit(1);
        }
    };

    println!(";; QUESTION");
    println!("{}\t{}\t{}", question.name, question.qclass, question.qtype);

    let (result_tx, result_rx) = mpsc::channel();
    let failure_tx = result_tx.clone();
    client.resolve(
        Instant::now(),
        true,
        vec![question],
        Box::new(move |answer| {
            let _ = result_tx.send(Ok(answer));
        }),
        Box::new(move |error| {
            let _ = failure_tx.send(Err(error));
        }),
    );

    if let Err(error) = drive_udp(&mut client, &socket).await {
        eprintln!("transport error: {error}");
    }

    match result_rx.try_recv() {
        Ok(Ok(answer)) => print_answer(&answer),
        Ok(Err(error)) => {
            println!("\n;; ANSWER");
            println!("; {error}");
            process::exit(1);
        }
        Err(_) => {
            eprintln!("resolution did not complete");
            process::exit(1);
        }
    }
}
