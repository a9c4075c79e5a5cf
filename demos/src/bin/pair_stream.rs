//! Demo: Pair Stream
//!
//! Showcases: authentication, pair subscriptions, automatic reconnection
//!
//! Run: CW_API_KEY=... CW_SECRET_KEY=... cargo run --bin pair_stream -- XBT/USD ETH/USD
//!
//! Set RUST_LOG=cw_stream=debug to follow every state transition.

use colored::*;
use cw_stream::{ClientOptions, ConnectionState, StreamClient, StreamEvent};
use serde_json::{json, Map};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut pairs: Vec<String> = std::env::args().skip(1).collect();
    if pairs.is_empty() {
        pairs = vec!["XBT/USD".to_string(), "ETH/USD".to_string()];
    }

    println!("{}", "═".repeat(65).cyan());
    println!("{}", "  PAIR STREAM DEMO".cyan().bold());
    println!("{}", "═".repeat(65).cyan());
    println!("  Pairs: {}", pairs.join(", ").yellow());
    println!();

    let options = ClientOptions::new()
        .with_subscriptions(["markets:*:trades"])
        .with_max_reconnect_timeout(60)
        .with_verbose(true);

    let client = match StreamClient::new(options) {
        Ok(client) => client,
        Err(e) => {
            error!(error = %e, "Invalid configuration");
            return Err(e.into());
        }
    };

    let mut book_options = Map::new();
    book_options.insert("depth".to_string(), json!(10));
    client.register_channel("book", book_options);

    client.subscribe_pairs("book", pairs.clone(), |update| {
        let timestamp = chrono::Local::now().format("%H:%M:%S%.3f");
        println!(
            "  {} {} {} {}",
            format!("[{}]", timestamp).dimmed(),
            update.channel_name.blue(),
            update.pair.cyan(),
            serde_json::Value::Array(update.data.clone())
        );
    });
    client.subscribe_pairs("trade", pairs, |update| {
        println!("  {} {} {} trades", "●".green(), update.pair.cyan(), update.data.len());
    });

    client.on_state_change(|state| {
        let label = match state {
            ConnectionState::Connected => state.as_str().green(),
            ConnectionState::Disconnected | ConnectionState::WaitingToReconnect => {
                state.as_str().yellow()
            }
            _ => state.as_str().normal(),
        };
        println!("  {} {}", "state".dimmed(), label);
    });
    client.on_market_update(|update| {
        info!(market = %update.market_id, bytes = update.payload.len(), "Market update");
    });

    let mut events = client
        .take_event_receiver()
        .ok_or("event receiver already taken")?;
    client.connect()?;

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(StreamEvent::Error(err)) => {
                    println!("  {} {}: {}", "✗".red(), err.name().red(), err);
                }
                Some(StreamEvent::ReconnectScheduled { delay }) => {
                    println!("  {} reconnecting in {:?}", "↻".yellow(), delay);
                }
                Some(_) => {}
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                println!();
                println!("  {}", "Shutting down".dimmed());
                client.disconnect();
                break;
            }
        }
    }

    Ok(())
}
