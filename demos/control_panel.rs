//! Headless control panel for a device.
//!
//! Demonstrates:
//! - Building a client from a page URL or the development endpoint
//! - Lifecycle and typed device message handlers
//! - RPC calls and fire-and-forget messages
//! - Uploading a file with progress reporting
//!
//! Usage:
//!   cargo run --example control_panel
//!   cargo run --example control_panel -- --page http://192.168.1.20/
//!   cargo run --example control_panel -- --upload firmware.bin
//!   cargo run --example control_panel -- --debug --no-wait

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use device_link::{
    Client, DeviceName, LedInfo, Nonce, ReconnectPolicy, Result, SetLed, Temperature,
};
use serde_json::json;
use tracing_subscriber::EnvFilter;

// ============================================================================
// Args
// ============================================================================

/// Command-line arguments.
struct Args {
    debug: bool,
    no_wait: bool,
    page: Option<String>,
    upload: Option<String>,
}

impl Args {
    fn parse() -> Self {
        let args: Vec<String> = std::env::args().collect();
        let value_of = |flag: &str| {
            args.iter()
                .position(|a| a == flag)
                .and_then(|i| args.get(i + 1).cloned())
        };

        Self {
            debug: args.iter().any(|a| a == "--debug"),
            no_wait: args.iter().any(|a| a == "--no-wait"),
            page: value_of("--page"),
            upload: value_of("--upload"),
        }
    }
}

fn init_logging(debug: bool) {
    let filter = if debug {
        "device_link=debug"
    } else {
        "device_link=info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_target(false)
        .init();
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logging(args.debug);

    if let Err(e) = run(args).await {
        eprintln!("\n[ERROR] {e}");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    println!("=== Device Control Panel ===\n");

    let mut builder = Client::builder().reconnect(ReconnectPolicy::default().with_max_attempts(20));
    if let Some(page) = &args.page {
        builder = builder.page_url(page.as_str());
    }
    let client = builder.build()?;

    client.on_open(|| println!("[open] connected"));
    client.on_close(|will_reconnect, reason| {
        println!("[close] {reason} (reconnecting: {will_reconnect})");
    });

    client.on_device_message::<Nonce, _>(|nonce| match nonce.decode() {
        Ok(bytes) => println!("[nonce] {} byte challenge", bytes.len()),
        Err(e) => println!("[nonce] undecodable: {e}"),
    })?;
    client.on_device_message::<DeviceName, _>(|name| println!("[devname] {}", name.name))?;
    client.on_device_message::<LedInfo, _>(|info| {
        for led in &info.leds {
            println!("[led] #{} {} ({}) on={}", led.id, led.name, led.color, led.on);
        }
    })?;
    client.on_device_message::<SetLed, _>(|led| println!("[setled] #{} on={}", led.id, led.on))?;
    client.on_device_message::<Temperature, _>(|t| println!("[temp] {:.1} C", t.celsius()))?;

    client.connect()?;

    // Give the link a moment to open.
    for _ in 0..50 {
        if client.status().is_open() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    if !client.status().is_open() {
        println!("Device not reachable (state: {})", client.status());
        return Ok(());
    }

    let sum = client
        .call_with_timeout("math/add", vec![json!(2), json!(3)], Duration::from_secs(5))
        .await?;
    println!("math/add(2, 3) = {sum}");

    client.send_message(&SetLed { id: 1, on: true })?;

    if let Some(path) = &args.upload {
        let data = std::fs::read(path)?;
        println!("Uploading {} ({} bytes)", path, data.len());

        let upload = tokio::spawn({
            let client = client.clone();
            async move { client.upload(data).await }
        });

        while !upload.is_finished() {
            if let Some(progress) = client.upload_progress() {
                println!("  {:>5.1}%", progress.fraction() * 100.0);
            }
            tokio::time::sleep(Duration::from_millis(250)).await;
        }

        match upload.await {
            Ok(outcome) => println!("Upload: {:?}", outcome?),
            Err(e) => println!("Upload task failed: {e}"),
        }
    }

    if args.no_wait {
        println!("[--no-wait] Skipping wait");
    } else {
        println!("Press Ctrl+C to exit...");
        let _ = tokio::signal::ctrl_c().await;
    }

    client.shutdown().await;
    println!("\n=== Done ===");
    Ok(())
}
