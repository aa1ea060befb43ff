pub mod call;
pub mod commands;
pub mod config;
pub mod error;
pub mod logger;
pub mod peer;
pub mod relay;
pub mod session;
pub mod signaling;
pub mod utils;

pub use call::{CallController, CallDeps, CallHandle, CallOptions, CallSnapshot, CallState, CallStateMachine};
pub use config::PhoneConfig;
pub use error::{CallError, ConfigError, RelayError};

use anyhow::Context;
use commands::call_api::{self, Outcome};
use commands::UserCommand;
use log::{error, info, warn};
use peer::{OpusMicrophone, WebRtcTransportFactory};
use relay::WebSocketRelay;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

/// Консольный клиент: конфигурация из окружения, команды со stdin
pub async fn run() -> anyhow::Result<()> {
    let config = PhoneConfig::from_env().context("loading configuration")?;
    info!("Starting as {} via {}", config.identity, config.relay_url);

    let (relay, relay_events) = WebSocketRelay::connect(config.relay_url.clone(), config.reconnect_delay());
    let transports = WebRtcTransportFactory::new().context("initialising WebRTC")?;

    let handle = CallController::spawn(
        CallDeps {
            identity: config.identity.clone(),
            relay: Arc::new(relay),
            media: Arc::new(OpusMicrophone),
            transports: Arc::new(transports),
            options: config.call_options(),
        },
        relay_events,
    );

    tokio::spawn(report_changes(handle.clone()));

    println!("{}", commands::HELP);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("reading stdin")? {
        if line.trim().is_empty() {
            continue;
        }
        let command = match line.parse::<UserCommand>() {
            Ok(command) => command,
            Err(e) => {
                println!("{e}");
                continue;
            }
        };
        match call_api::execute(&handle, command).await {
            Ok(Outcome::Continue(Some(text))) => println!("{text}"),
            Ok(Outcome::Continue(None)) => {}
            Ok(Outcome::Quit) => return Ok(()),
            Err(e) if e.is_terminal() => error!("{e}"),
            Err(e) => warn!("{e}"),
        }
    }

    // stdin закрыт
    handle.shutdown().await;
    Ok(())
}

async fn report_changes(handle: CallHandle) {
    let mut changes = handle.subscribe();
    let mut last_state = changes.borrow().state;
    while changes.changed().await.is_ok() {
        let snapshot = changes.borrow_and_update().clone();
        if snapshot.state != last_state {
            println!("{}", call_api::describe(&snapshot));
            last_state = snapshot.state;
        } else if snapshot.state == CallState::Connected && snapshot.duration_secs % 60 == 0 {
            info!("In call for {}", utils::format_duration(snapshot.duration_secs));
        }
    }
}
