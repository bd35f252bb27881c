//! Send one raw command to a matrix, or print its zone table.
//!
//! ```text
//! cargo run --example send_command -- 192.168.1.50 8x8
//! cargo run --example send_command -- 192.168.1.50 8x8 FF55040317F500
//! ```

use matrix_audio::{parse_hex, MatrixClient, MatrixConfig, MatrixModel, NoPlayers};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("matrix_audio=info")),
        )
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let (host, model) = match args.as_slice() {
        [host, model, ..] => (host.clone(), model.parse::<MatrixModel>()?),
        _ => {
            eprintln!("usage: send_command <host> <8x8|16x16|24x24> [hex]");
            std::process::exit(2);
        }
    };

    let config = MatrixConfig::new(host, model);
    let matrix = MatrixClient::connect(config, Arc::new(NoPlayers)).await?;

    if let Some(hex) = args.get(2) {
        let response = matrix.send_raw(parse_hex(hex)?).await?;
        println!("{}", response);
    } else {
        matrix.refresh().await?;
        println!("{:<6} {:<12} {:<10} {:>6} {:>5}", "zone", "name", "source", "volume", "mute");
        for zone in matrix.zones() {
            let Some(record) = zone.record() else { continue };
            println!(
                "{:<6} {:<12} {:<10} {:>6} {:>5}",
                record.id,
                record.name,
                zone.source().unwrap_or_else(|| "off".to_string()),
                record.volume.map_or("-".to_string(), |v| v.to_string()),
                record.muted
            );
        }
    }

    matrix.shutdown().await;
    Ok(())
}
