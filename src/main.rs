//! Thin demonstration binary: wires a `ServerConfig` together from the
//! command line, drives the facade through its happy path, and waits for
//! Ctrl+C before tearing the session down. Ambient plumbing, not core
//! behavior — the interesting code lives in the library.

use std::collections::HashMap;
use std::net::SocketAddrV4;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Context};
use clap::Parser;

use edss::config::ServerConfig;
use edss::facade::ServerFacade;

#[derive(Parser)]
#[command(name = "edssd", about = "Desktop vGPU streaming server")]
struct Cli {
    /// vGPU device identifier, passed to the CAL plugin as its "vgpuId" option
    vgpu_id: String,

    /// Destination the encoded SRTP stream is sent to, as "ip:port"
    endpoint: String,

    /// Base64-encoded 30-byte key+salt for AES_CM_128_HMAC_SHA1_80
    srtp_out_params: String,

    /// CAL plugin to load; "vgpu" on Linux, "test" for a hardware-free run
    #[arg(long, default_value = "vgpu")]
    plugin: String,

    #[arg(long, default_value_t = 10_000_000)]
    bitrate: u32,

    #[arg(long, default_value_t = 60)]
    framerate: u32,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let endpoint: SocketAddrV4 = cli
        .endpoint
        .parse()
        .with_context(|| format!("invalid endpoint {:?}, expected ip:port", cli.endpoint))?;

    let mut facade = ServerFacade::new();
    facade
        .open_cal(&cli.plugin)
        .map_err(|e| anyhow!("OpenCAL({}) failed: {e}", cli.plugin))?;

    let mut cal_options = HashMap::new();
    cal_options.insert("vgpuId".to_string(), cli.vgpu_id.clone());

    let config = ServerConfig::new(*endpoint.ip(), endpoint.port(), cli.bitrate, cli.framerate, cli.srtp_out_params.clone());
    let sdp = facade.init_server(&config, &cal_options).map_err(|e| anyhow!("InitServer failed: {e}"))?;
    println!("{sdp}");

    facade.init_streaming().map_err(|e| anyhow!("InitStreaming failed: {e}"))?;
    tracing::info!(endpoint = %cli.endpoint, plugin = %cli.plugin, "streaming; press Ctrl+C to stop");

    let stop_flag = Arc::new(AtomicBool::new(false));
    let stop_flag_for_handler = Arc::clone(&stop_flag);
    ctrlc::set_handler(move || stop_flag_for_handler.store(true, Ordering::SeqCst))
        .context("failed to install Ctrl+C handler")?;

    while !stop_flag.load(Ordering::SeqCst) {
        thread::sleep(Duration::from_millis(100));
    }

    tracing::info!("stopping");
    facade.close_streaming().map_err(|e| anyhow!("CloseStreaming failed: {e}"))?;
    Ok(())
}
