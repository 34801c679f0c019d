use std::path::PathBuf;

use anyhow::{Context, Error};
use clap::Parser;
use clap_stdin::MaybeStdin;
use mdoc_presentment::config::PresentmentConfig;
use mdoc_presentment::definitions::session;
use mdoc_presentment::presentation::engagement;
use serde_json::{json, Value};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    action: Action,
}

#[derive(Debug, clap::Subcommand)]
enum Action {
    /// Decode the `mdoc:` URI of a device engagement QR code.
    DecodeEngagement {
        /// The scanned URI, e.g. `mdoc:owBjMS4w...`.
        uri: MaybeStdin<String>,
    },
    /// List the trust points of a holder configuration.
    TrustPoints {
        /// Path to the JSON configuration.
        config: PathBuf,
    },
}

fn main() -> Result<(), Error> {
    let summary = match Args::parse().action {
        Action::DecodeEngagement { uri } => decode_engagement(uri.to_string().trim())?,
        Action::TrustPoints { config } => trust_points(&config)?,
    };
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn decode_engagement(uri: &str) -> Result<Value, Error> {
    let device_engagement =
        engagement::decode_qr_code_uri(uri).context("could not decode the engagement")?;
    let ble_ident = session::ble_ident(&device_engagement.as_ref().security.1)?;
    let device_engagement = device_engagement.into_inner();
    let connection_methods: Vec<String> = device_engagement
        .connection_methods
        .iter()
        .map(|method| format!("{method:?}"))
        .collect();
    Ok(json!({
        "version": device_engagement.version,
        "cipher_suite": device_engagement.security.0,
        "ble_ident": ble_ident.iter().map(|b| format!("{b:02x}")).collect::<String>(),
        "connection_methods": connection_methods,
    }))
}

fn trust_points(config: &PathBuf) -> Result<Value, Error> {
    let trust_manager = PresentmentConfig::from_path(config)
        .context("could not load the configuration")?
        .trust_manager()?;
    let trust_points: Vec<Value> = trust_manager
        .trust_points()
        .map(|trust_point| {
            json!({
                "display_name": trust_point.display_name,
                "subject": trust_point.certificate.common_name(),
                "privacy_policy_url": trust_point.privacy_policy_url,
            })
        })
        .collect();
    Ok(Value::Array(trust_points))
}
