//! `nanorpc`: command-line client for NanoRPC devices.
//!
//! Usage:
//!   nanorpc --remote 10.0.0.7:7000 ping
//!   nanorpc request /sys/info --data 0a02
//!   NANORPC_REMOTE=unix:/run/device.sock nanorpc subscribe /sensors/temp
//!
//! Responses are printed as one JSON object per line on stdout.  Logs go
//! to stderr; `RUST_LOG` controls verbosity (default `info`).

mod cli;

use std::time::{Duration, Instant};

use anyhow::{bail, Context};
use clap::Parser;
use nanorpc_client::{callback, Client, NanoRpcRequest, NanoRpcResponse};
use tokio::sync::mpsc;
use cli::{log_filter, print_json, Cli, Command, HexData, PongLine, ResponseLine};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(log_filter(std::env::var("RUST_LOG").ok().as_deref()))
        .with_writer(std::io::stderr)
        .compact()
        .init();

    let timeout = cli.timeout();
    let client = Client::builder()
        .remote(cli.remote.as_str())
        .always_hash_paths(cli.hash)
        .dial_timeout(timeout)
        .span(tracing::info_span!("nanorpc", remote = %cli.remote))
        .build()
        .with_context(|| format!("invalid remote {:?}", cli.remote))?;

    client.connect()?;
    let result = match wait_connected(&client, timeout).await {
        Ok(()) => run(&client, cli.command, timeout).await,
        Err(e) => Err(e),
    };
    client.close().await;
    result
}

async fn wait_connected(client: &Client, timeout: Duration) -> anyhow::Result<()> {
    tokio::time::timeout(timeout, client.connected())
        .await
        .with_context(|| format!("no connection to {} within {timeout:?}", client.remote()))??;
    Ok(())
}

async fn run(client: &Client, command: Command, timeout: Duration) -> anyhow::Result<()> {
    match command {
        Command::Ping => ping(client, timeout).await,
        Command::Request { path, data } => request(client, &path, payload(data), timeout).await,
        Command::Subscribe { path, data } => {
            subscribe(client, &path, payload(data), timeout).await
        }
    }
}

fn payload(data: Option<HexData>) -> Vec<u8> {
    data.map(|d| d.0).unwrap_or_default()
}

/// Forward every callback invocation into a channel.
fn forward() -> (
    nanorpc_client::Callback,
    mpsc::UnboundedReceiver<Option<NanoRpcResponse>>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    let cb = callback(move |resp| {
        let _ = tx.send(resp);
        Ok(())
    });
    (cb, rx)
}

async fn ping(client: &Client, timeout: Duration) -> anyhow::Result<()> {
    let started = Instant::now();
    let pong = client.pong().await;
    let outcome = tokio::time::timeout(timeout, pong)
        .await
        .context("timed out waiting for pong")?
        .context("pong channel closed")?;
    outcome?;

    print_json(&PongLine {
        pong: true,
        rtt_ms: started.elapsed().as_millis() as u64,
    })
}

async fn request(
    client: &Client,
    path: &str,
    data: Vec<u8>,
    timeout: Duration,
) -> anyhow::Result<()> {
    let (cb, mut rx) = forward();
    let req = NanoRpcRequest::request(0, client.encode_path(path), data);
    let request_id = client.send(req, Some(cb)).await?;
    tracing::debug!(request_id, path, "request sent");

    let resp = tokio::time::timeout(timeout, rx.recv())
        .await
        .context("timed out waiting for response")?
        .flatten()
        .context("connection lost before the response arrived")?;

    print_json(&ResponseLine::from(&resp))?;
    resp.error()?;
    Ok(())
}

async fn subscribe(
    client: &Client,
    path: &str,
    data: Vec<u8>,
    timeout: Duration,
) -> anyhow::Result<()> {
    let (cb, mut updates) = forward();
    let req = NanoRpcRequest::subscribe(0, client.encode_path(path), data);
    let request_id = client.send(req, Some(cb)).await?;
    tracing::info!(request_id, path, "subscribed");

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        tokio::select! {
            _ = &mut ctrl_c => break,
            update = updates.recv() => match update.flatten() {
                Some(resp) => {
                    print_json(&ResponseLine::from(&resp))?;
                    if let Err(e) = resp.error() {
                        bail!("subscription rejected: {e}");
                    }
                }
                None => bail!("subscription ended: connection lost"),
            },
        }
    }

    let (ack, mut acked) = forward();
    client.unsubscribe(path, request_id, Some(ack)).await?;
    if tokio::time::timeout(timeout, acked.recv()).await.is_err() {
        tracing::warn!(request_id, "no acknowledgement for unsubscribe");
    }
    Ok(())
}
