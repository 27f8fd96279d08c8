//! Passive monitor of broker traffic: subscribes to the signal, slot and
//! global-slot exchanges and prints per-sender and per-receiver message
//! rates on a fixed interval, until interrupted.

use std::time::{Duration, Instant};

use anyhow::Context;
use clap::Parser;
use futures::StreamExt;

use fabric::{Broker, BrokerConfig, Exchange, Topology};
use observe::RateAccounting;

#[derive(Debug, Parser)]
#[command(
    name = "broker-rates",
    about = "Measure message rates on the control-plane broker",
    after_help = "The broker is taken from KARABO_BROKER and the domain from \
KARABO_BROKER_TOPIC. Server filters need running heartbeats; give the \
topology time to settle with --discoveryWait."
)]
struct Args {
    /// Only count traffic addressed to these instance ids.
    #[arg(long = "receivers", value_delimiter = ',')]
    receivers: Vec<String>,

    /// Only count traffic emitted by these instance ids.
    #[arg(long = "senders", value_delimiter = ',')]
    senders: Vec<String>,

    /// Add every instance hosted by this server to the receiver filter.
    #[arg(long = "receiversServer")]
    receivers_server: Option<String>,

    /// Add every instance hosted by this server to the sender filter.
    #[arg(long = "sendersServer")]
    senders_server: Option<String>,

    /// Extra seconds to wait for topology discovery before measuring.
    #[arg(long = "discoveryWait", default_value_t = 0)]
    discovery_wait: u64,

    /// Verbose logging (y|n).
    #[arg(long = "debug", default_value = "n", value_parser = parse_yes_no)]
    debug: bool,

    /// Seconds between reports.
    #[arg(default_value_t = 5)]
    interval_seconds: u64,
}

fn parse_yes_no(raw: &str) -> Result<bool, String> {
    match raw {
        "y" => Ok(true),
        "n" => Ok(false),
        other => Err(format!("expected 'y' or 'n', got '{other}'")),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(if args.debug { "debug" } else { "warn" })
        .init();

    let config = BrokerConfig::from_env().context("resolving the broker location")?;
    let broker = fabric::connect(&config).await.context("connecting to the broker")?;
    tracing::debug!(domain = %config.domain, "connected");

    // Server filters are resolved from heartbeat info, which takes a
    // discovery round to arrive.
    let mut senders = args.senders.clone();
    let mut receivers = args.receivers.clone();
    if args.senders_server.is_some() || args.receivers_server.is_some() || args.discovery_wait > 0 {
        let topology = Topology::track(broker.clone())
            .await
            .context("tracking the topology")?;
        tokio::time::sleep(Duration::from_secs(args.discovery_wait.max(1))).await;
        for id in topology.alive() {
            let hosted_by = topology
                .info(&id)
                .and_then(|info| info.get::<String>("serverId").ok().cloned());
            if hosted_by.as_deref() == args.senders_server.as_deref() && hosted_by.is_some() {
                senders.push(id.clone());
            }
            if hosted_by.as_deref() == args.receivers_server.as_deref() && hosted_by.is_some() {
                receivers.push(id.clone());
            }
        }
        topology.stop();
    }

    // Wildcards where no filter is given, per-instance bindings otherwise.
    let mut streams = Vec::new();
    if senders.is_empty() {
        streams.push(broker.subscribe(Exchange::Signals, "#").await?);
    } else {
        for sender in &senders {
            streams.push(
                broker
                    .subscribe(Exchange::Signals, &format!("{sender}.#"))
                    .await?,
            );
        }
    }
    if receivers.is_empty() {
        streams.push(broker.subscribe(Exchange::Slots, "#").await?);
    } else {
        for receiver in &receivers {
            streams.push(
                broker
                    .subscribe(Exchange::Slots, &format!("{receiver}.#"))
                    .await?,
            );
        }
    }
    streams.push(broker.subscribe(Exchange::GlobalSlots, "#").await?);

    let mut deliveries = futures::stream::select_all(streams);
    let mut accounting = RateAccounting::new();
    let mut ticker = tokio::time::interval(Duration::from_secs(args.interval_seconds.max(1)));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticker.tick().await;
    let mut window_started = Instant::now();

    println!(
        "measuring on domain '{}' every {} s, ctrl-c to stop",
        config.domain, args.interval_seconds
    );
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            delivery = deliveries.next() => {
                match delivery {
                    Some(delivery) => accounting.record(&delivery.message),
                    None => anyhow::bail!("broker connection closed"),
                }
            }
            _ = ticker.tick() => {
                let elapsed = window_started.elapsed().as_secs_f64();
                window_started = Instant::now();
                if accounting.is_empty() {
                    println!("-- no traffic in the last {elapsed:.1} s");
                } else {
                    print!("{}", accounting.report(elapsed));
                }
            }
        }
    }

    broker.disconnect().await.ok();
    Ok(())
}
