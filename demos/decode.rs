//! Decode onboarding payloads (QR or manual pairing code) and print what they carry.

use anyhow::Result;
use clap::Parser;

use matc_hub::onboarding;

#[derive(Parser, Debug)]
struct Cli {
    #[clap(long)]
    #[arg(default_value_t = false)]
    verbose: bool,

    /// Print JSON instead of text
    #[clap(long)]
    #[arg(default_value_t = false)]
    json: bool,

    /// One or more `MT:...` QR strings or 11/21 digit manual codes
    #[arg(required = true)]
    payloads: Vec<String>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let log_level = if cli.verbose {
        log::LevelFilter::Trace
    } else {
        log::LevelFilter::Error
    };
    env_logger::Builder::new()
        .parse_default_env()
        .filter_level(log_level)
        .format_timestamp(Some(env_logger::TimestampPrecision::Millis))
        .init();

    for raw in &cli.payloads {
        let (payload, is_qr) = match onboarding::parse_onboarding_payload(raw) {
            Ok(p) => p,
            Err(e) => {
                eprintln!("{}: {}", raw, e);
                continue;
            }
        };
        let id = &payload.identity;
        if cli.json {
            let v = serde_json::json!({
                "payload": payload.raw,
                "kind": payload.kind.tag(),
                "vendor_id": id.vendor_id,
                "product_id": id.product_id,
                "discriminator": id.discriminator,
                "passcode": id.passcode,
                "flow": id.flow,
                "capabilities": payload.capabilities.map(|c| c.0),
            });
            println!("{}", v);
            continue;
        }
        println!("{}", payload.raw);
        println!("  kind:          {}", if is_qr { "qr" } else { "manual pairing code" });
        println!("  identity:      {}", id);
        println!("  passcode:      {}", id.passcode);
        if let Some(caps) = payload.capabilities {
            println!(
                "  capabilities:  soft_ap={} ble={} on_network={}",
                caps.soft_ap(),
                caps.ble(),
                caps.on_network()
            );
        }
    }
    Ok(())
}
