//! # `topic-watch`: Live Topic Table in the Terminal
//!
//! Connects to a topic bridge over WebSocket, subscribes to one filter and
//! reprints a page of the topic table whenever data changes. Redraws are
//! coalesced: a burst of updates yields one redraw, and a long burst is still
//! redrawn at least every `--max-delay-ms`.
//!
//! ## Usage
//!
//! ```text
//! topic-watch [OPTIONS]
//!
//! # Watch everything below sw/plant, second page
//! topic-watch --filter 'sw/plant/#' --page 1
//!
//! # Subscribe broadly but only print temperatures
//! topic-watch --filter '#' --show '+/+/temp'
//! ```
//!
//! Logging goes through `env_logger`; set `RUST_LOG=debug` for details.
//! After a reconnect every subscription is re-issued.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

use anyhow::{Context, Result};
use clap::Parser;
use lib_topicstream::client::{
    ConnectionEvent, Multiplexer, MultiplexerConfig, RequestTransport, SchedulerConfig,
    SubscriptionRegistry, UpdateScheduler,
};
use lib_topicstream::matcher::DEFAULT_DELIMITER;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;

/// Longest payload printed per row.
const MAX_PAYLOAD_CHARS: usize = 60;

/// Command-line arguments for `topic-watch`.
#[derive(Parser, Debug)]
#[command(author, version, about = "Watches live topics through a topic bridge", long_about = None)]
struct Args {
    /// WebSocket URL of the bridge.
    #[arg(short, long, env = "TOPIC_WATCH_URL", default_value = "ws://127.0.0.1:9010/ws")]
    url: String,

    /// Subscription filter sent to the bridge.
    #[arg(short, long, default_value = "#")]
    filter: String,

    /// Subscription config as a JSON object.
    #[arg(long, default_value = "{}")]
    subsconfig: String,

    /// Page of the topic table to print.
    #[arg(short, long, default_value_t = 0)]
    page: usize,

    /// Local filter: print matching topics instead of a page.
    #[arg(short, long)]
    show: Option<String>,

    /// Topic level delimiter used by `--show`.
    #[arg(short, long, default_value = DEFAULT_DELIMITER)]
    delimiter: String,

    /// Updates closer than this belong to one burst.
    #[arg(long, default_value_t = 10)]
    burst_ms: u64,

    /// Upper bound on redraw latency during a burst.
    #[arg(long, default_value_t = 100)]
    max_delay_ms: u64,

    /// Redraw immediately on the first update after a quiet period.
    #[arg(long)]
    flush_first_call: bool,
}

/// What a redraw prints.
#[derive(Debug, Clone)]
enum View {
    Page(usize),
    Matching { filter: String, delimiter: String },
}

fn truncate(payload: &str) -> String {
    if payload.chars().count() <= MAX_PAYLOAD_CHARS {
        payload.to_string()
    } else {
        let head: String = payload.chars().take(MAX_PAYLOAD_CHARS - 3).collect();
        format!("{}...", head)
    }
}

fn render(registry: &SubscriptionRegistry, view: &View) -> String {
    let (header, topics) = match view {
        View::Page(page) => (
            format!(
                "--- page {}/{} ({} topics) ---",
                page + 1,
                registry.page_count().max(1),
                registry.topic_count()
            ),
            registry.get_topic_paged(*page),
        ),
        View::Matching { filter, delimiter } => {
            let topics = registry.topics_matching(filter, delimiter);
            (format!("--- {} ({} topics) ---", filter, topics.len()), topics)
        }
    };

    let mut out = header;
    for topic in topics {
        let data = registry.get_topic_data(&topic).unwrap_or_default();
        out.push_str(&format!("\n{:<40} {}", topic, truncate(&data)));
    }
    out
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let subsconfig: Value =
        serde_json::from_str(&args.subsconfig).context("--subsconfig must be valid JSON")?;
    let view = match args.show.clone() {
        Some(filter) => View::Matching {
            filter,
            delimiter: args.delimiter.clone(),
        },
        None => View::Page(args.page),
    };

    let mux = Multiplexer::new(MultiplexerConfig {
        url: args.url.clone(),
        ..Default::default()
    });
    let transport: Arc<dyn RequestTransport> = Arc::new(mux.clone());
    let registry = SubscriptionRegistry::new(transport);

    let table = registry.clone();
    let scheduler = UpdateScheduler::new(
        SchedulerConfig {
            burst_window: Duration::from_millis(args.burst_ms),
            max_delay: Duration::from_millis(args.max_delay_ms),
            flush_first_call: args.flush_first_call,
        },
        move || println!("{}\n", render(&table, &view)),
    );
    let on_change = scheduler.clone();
    registry.set_on_any_data(move || on_change.update());

    let mut events = mux.subscribe_events();
    log::info!("Connecting to {}", args.url);
    mux.connect().await?;
    registry
        .add_subscription(&args.filter, subsconfig, None)
        .context("subscribe failed")?;
    log::info!("Subscribed to {}", args.filter);

    let mut connected_once = false;
    let mut ticker = tokio::time::interval(Duration::from_secs(1));

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                log::info!("Ctrl-C received, unsubscribing.");
                break;
            }
            event = events.recv() => match event {
                Ok(ConnectionEvent::Connected) if connected_once => {
                    match registry.resubscribe_all() {
                        Ok(remapped) => log::info!("Reconnected, {} subscription(s) re-issued", remapped.len()),
                        Err(e) => log::warn!("Re-subscribe after reconnect failed: {}", e),
                    }
                }
                Ok(ConnectionEvent::Connected) => connected_once = true,
                Ok(ConnectionEvent::Disconnected) => log::warn!("Connection lost, retrying"),
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            },
            _ = ticker.tick() => {
                if let Some(stale) = registry.tick() {
                    log::debug!("Freshest topic unchanged for {} tick(s)", stale);
                }
            }
        }
    }

    scheduler.pseudo_update();
    registry.remove_all_subscriptions();
    mux.shutdown();
    Ok(())
}
