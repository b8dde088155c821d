//! cardwall-sim: drive the authentication state machine from a terminal
//!
//! The card and the IDP are replaced by a scripted scenario; cards are
//! "tapped" by typing their id. Commands are read from stdin, one per line.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cardwall_auth::{
    AuthConfig, Authenticator, BroadcastDiscovery, Collaborators, PresentationHooks,
    ScriptedPipeline, SCENARIOS,
};
use cardwall_core::{AuthenticationState, Credentials, ProfileId, Tag};

#[derive(Parser, Debug)]
#[command(name = "cardwall-sim")]
#[command(about = "Health-card authentication simulator")]
#[command(version)]
struct Args {
    /// Configuration file (JSON); defaults to $CARDWALL_CONFIG
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Scripted pipeline behaviour
    #[arg(short, long, default_value = "success")]
    scenario: String,

    /// Profile the token is minted for
    #[arg(long, default_value = "default")]
    profile: String,

    /// Card access number
    #[arg(long, default_value = "123123")]
    can: String,

    /// Card PIN
    #[arg(long, default_value = "123456")]
    pin: String,

    /// Pair a secure-element key with the card instead of signing on
    #[arg(long)]
    pairing: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

struct ConsoleHooks;

impl PresentationHooks for ConsoleHooks {
    fn on_state_change(&self, state: &AuthenticationState) {
        println!("state: {}", state);
    }

    fn on_final(&self) {
        println!("signed on");
    }

    fn on_retry_can(&self) {
        println!("-> enter card access number again");
    }

    fn on_retry_pin(&self) {
        println!("-> enter PIN again");
    }

    fn on_unlock_card(&self) {
        println!("-> unlock the card with the PUK");
    }

    fn on_show_enable_radio_dialog(&self) {
        println!("-> please enable NFC (type `radio on`, then `dismiss`)");
    }
}

const HELP: &str = "\
commands:
  start | stop | cancel | retry
  tap <hex id>          present a card
  radio on|off          switch the contactless radio
  dismiss               close the enable-radio dialog
  troubleshoot on|off   re-arm the interruption counter
  status                print the current snapshot
  quit";

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let default_filter = if args.verbose {
        "cardwall_auth=debug"
    } else {
        "cardwall_auth=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    info!("Starting cardwall-sim v{}", env!("CARGO_PKG_VERSION"));

    let config_path = args
        .config
        .clone()
        .or_else(|| std::env::var("CARDWALL_CONFIG").ok().map(PathBuf::from));
    let config = match config_path {
        Some(path) => AuthConfig::load(&path)
            .with_context(|| format!("Failed to load config from {:?}", path))?,
        None => AuthConfig::default(),
    };

    let Some(pipeline) = ScriptedPipeline::scenario(&args.scenario) else {
        bail!(
            "Unknown scenario {:?}, expected one of: {}",
            args.scenario,
            SCENARIOS.join(", ")
        );
    };

    let profile_id = ProfileId::new(args.profile.as_str())?;
    let credentials = if args.pairing {
        Credentials::secure_element_pairing(&args.can, &args.pin)?
    } else {
        Credentials::health_card(&args.can, &args.pin)?
    };
    let discovery = Arc::new(BroadcastDiscovery::default());

    let authenticator = Authenticator::spawn(
        config,
        profile_id,
        credentials,
        Collaborators {
            pipeline: Arc::new(pipeline),
            discovery: discovery.clone(),
            radio: discovery.clone(),
        },
        Arc::new(ConsoleHooks),
    )?;

    println!("{}", HELP);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                None
            }
        };
        let Some(line) = line else { break };

        match execute(&authenticator, &discovery, line.trim()) {
            Ok(true) => {}
            Ok(false) => break,
            Err(e) => warn!("{:#}", e),
        }
    }

    authenticator.shutdown().await;
    info!("Simulator stopped");
    Ok(())
}

/// Run one command line; returns false on quit
fn execute(
    authenticator: &Authenticator,
    discovery: &BroadcastDiscovery,
    line: &str,
) -> Result<bool> {
    let mut words = line.split_whitespace();
    let Some(command) = words.next() else {
        return Ok(true);
    };

    match (command, words.next()) {
        ("start", None) => authenticator.start()?,
        ("stop", None) => authenticator.stop()?,
        ("cancel", None) => {
            if !authenticator.cancel()? {
                println!("cancel not available");
            }
        }
        ("retry", None) => authenticator.retry()?,
        ("tap", Some(id)) => {
            let tag = Tag::from_hex(id)?;
            if discovery.present(tag) == 0 {
                println!("no reader listening");
            }
        }
        ("radio", Some("on")) => discovery.set_radio_enabled(true),
        ("radio", Some("off")) => discovery.set_radio_enabled(false),
        ("dismiss", None) => authenticator.dismiss_radio_dialog()?,
        ("troubleshoot", Some("on")) => authenticator.arm_troubleshooting(true)?,
        ("troubleshoot", Some("off")) => authenticator.arm_troubleshooting(false)?,
        ("status", None) => {
            let snapshot = authenticator.snapshot();
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
            if let Some(dialog) = snapshot.error_dialog() {
                println!("error dialog: {:?}", dialog);
            }
            if authenticator.show_troubleshooting() {
                println!("troubleshooting offered");
            }
        }
        ("help", None) => println!("{}", HELP),
        ("quit", None) | ("exit", None) => return Ok(false),
        _ => bail!("Unknown command {:?}, type `help`", line),
    }
    Ok(true)
}
