use std::sync::Arc;
use std::time::Duration;

use owo_colors::OwoColorize;
use tokio::sync::broadcast::error::RecvError;

use motionlink_config::TransportChoice;
use motionlink_core::{
    CatastrophicReason, ConnectionState, DeviceSession, RecoveryHandler, SessionEvent,
};
use motionlink_device::{SerialTransport, UsbIdFilter, discover_ports};

use crate::cli::{ConnectArgs, GlobalOpts};
use crate::error::CliError;

/// Exits so a supervisor can cold-start the process -- the platform
/// defect behind catastrophic failures only clears on restart. The
/// session has already persisted the resume marker by the time this
/// runs.
struct ExitRecovery;

impl RecoveryHandler for ExitRecovery {
    fn on_catastrophic(&self, reason: &CatastrophicReason) {
        tracing::error!(?reason, "catastrophic failure, exiting for cold restart");
        std::process::exit(75);
    }
}

pub async fn handle(args: ConnectArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let config = motionlink_config::load_config_or_default();
    let resolved = config.resolve(global.profile.as_deref())?;

    if resolved.transport == TransportChoice::Gatt {
        return Err(CliError::Unsupported(
            "wireless links require a host GATT transport; use a serial profile here".into(),
        ));
    }

    let port = match args.port.or_else(|| resolved.port.clone()) {
        Some(port) => port,
        None => discover_ports(&UsbIdFilter::default())?
            .into_iter()
            .next()
            .map(|p| p.path)
            .ok_or(CliError::NoDevice)?,
    };
    let baud = args.baud.unwrap_or(resolved.baud);

    println!("Connecting to {port} at {baud} baud ...");
    let transport = Arc::new(SerialTransport::new(port, baud));
    let session =
        DeviceSession::with_recovery(transport, resolved.session, Arc::new(ExitRecovery));
    session.connect().await?;
    println!("{}", "Connected. Streaming (Ctrl-C to stop).".green());

    stream(&session).await;

    session.disconnect().await;
    Ok(())
}

/// Print state changes, button edges, and a once-a-second sample rate
/// until Ctrl-C or a terminal failure.
async fn stream(session: &DeviceSession) {
    let mut states = session.state_updates();
    let mut events = session.events();
    let mut stats = tokio::time::interval(Duration::from_secs(1));
    let mut last_pushed = 0u64;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = states.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = states.borrow_and_update().clone();
                match state {
                    ConnectionState::Connected => println!("{}", "state: connected".green()),
                    ConnectionState::Failed => {
                        println!("{}", "state: failed".red());
                        break;
                    }
                    other => println!("state: {other:?}"),
                }
            }
            event = events.recv() => match event {
                Ok(SessionEvent::Button { button, pressed }) => {
                    let edge = if pressed { "pressed" } else { "released" };
                    println!("button {button:?}: {edge}");
                }
                Ok(SessionEvent::LinkLost) => {
                    println!("{}", "link lost, reconnecting".yellow());
                }
                Ok(SessionEvent::RecoveryTriggered(reason)) => {
                    println!("{}", format!("recovery triggered: {reason:?}").red());
                }
                Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            },
            _ = stats.tick() => {
                let pushed = session.ring().pushed();
                if pushed != last_pushed {
                    println!("samples: {pushed} ({}/s)", pushed - last_pushed);
                    last_pushed = pushed;
                }
            }
        }
    }
}
