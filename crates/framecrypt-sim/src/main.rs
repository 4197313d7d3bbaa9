//! Framecrypt simulator binary.
//!
//! # Usage
//!
//! ```bash
//! # Default scenario: rotation, ratchets and tampering
//! framecrypt-sim
//!
//! # Scenario file, with command line overrides
//! framecrypt-sim --scenario call.json --frames 2000 --tamper-every 0
//! ```

use clap::Parser;
use framecrypt_sim::{ScenarioConfig, run_scenario};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Framecrypt loopback simulator
#[derive(Parser, Debug)]
#[command(name = "framecrypt-sim")]
#[command(about = "Run a sender and receiver frame cryptor over a simulated wire")]
#[command(version)]
struct Args {
    /// Scenario file (JSON); built-in defaults otherwise
    #[arg(short, long)]
    scenario: Option<String>,

    /// Frames to send
    #[arg(short, long)]
    frames: Option<u64>,

    /// Rotate keys every N frames (0 disables)
    #[arg(long)]
    rotate_every: Option<u64>,

    /// Ratchet the sender key every N frames (0 disables)
    #[arg(long)]
    ratchet_every: Option<u64>,

    /// Corrupt every Nth frame on the wire (0 disables)
    #[arg(long)]
    tamper_every: Option<u64>,

    /// Use a single shared key ring
    #[arg(long)]
    shared_key: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    fn apply(&self, config: &mut ScenarioConfig) {
        if let Some(frames) = self.frames {
            config.frames = frames;
        }
        for (interval, field) in [
            (self.rotate_every, &mut config.rotate_every),
            (self.ratchet_every, &mut config.ratchet_every),
            (self.tamper_every, &mut config.tamper_every),
        ] {
            if let Some(every) = interval {
                *field = (every > 0).then_some(every);
            }
        }
        if self.shared_key {
            config.key_provider.shared_key = true;
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    let mut config = match &args.scenario {
        Some(path) => {
            tracing::info!("Loading scenario from {path}");
            ScenarioConfig::from_json(&tokio::fs::read_to_string(path).await?)?
        },
        None => ScenarioConfig::default(),
    };
    args.apply(&mut config);

    let report = run_scenario(config).await?;
    tracing::info!(report = %serde_json::to_string(&report)?, "Scenario report");

    if !report.is_clean() {
        tracing::error!("Receiver lost frames it should have decrypted");
        return Err("scenario finished with lost frames".into());
    }

    Ok(())
}
