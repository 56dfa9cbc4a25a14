//! raidclip-server/src/client.rs
//!
//! Client subcommands: send one command to a running engine and print the reply.

use std::time::Duration;

use anyhow::{bail, Context};
use tracing::debug;

use raidclip_core::commands::{CommandReply, CommandResponse, EngineCommand};

/// Longer than the link's connect timeout so `test-connection` can finish.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub async fn run_client(port: u16, command: EngineCommand) -> anyhow::Result<()> {
    let name = command.name();
    let url = format!("http://127.0.0.1:{}/api/command", port);
    debug!("Sending {} to {}", name, url);

    let http = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
    let resp = http
        .post(&url)
        .json(&command)
        .send()
        .await
        .with_context(|| format!("no engine answering on port {} (is `raidclip serve` running?)", port))?;

    let status = resp.status();
    let body: CommandResponse = resp
        .json()
        .await
        .with_context(|| format!("unexpected reply to {} (HTTP {})", name, status))?;

    match body {
        CommandResponse::Ok { reply } => print_reply(&reply),
        CommandResponse::Error { kind, message } => bail!("{} failed [{}]: {}", name, kind, message),
    }
}

fn print_reply(reply: &CommandReply) -> anyhow::Result<()> {
    match reply {
        CommandReply::Done => println!("ok"),
        CommandReply::Status(s) => println!("{}", s),
        CommandReply::Path(Some(p)) => println!("{}", p),
        CommandReply::Path(None) => println!("(cancelled)"),
        CommandReply::Config(cfg) => print!("{}", cfg.to_yaml()?),
        CommandReply::Engine(st) => println!("{}", serde_json::to_string_pretty(st)?),
    }
    Ok(())
}
