use std::{env, fs};

use anyhow::{Context, Result, bail};
use launcher::{LocalSpawner, configs::LaunchConfig, launch};
use log::warn;
use tokio::signal;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let Some(path) = env::args().nth(1) else {
        bail!("usage: launcher <config.json>");
    };
    let json = fs::read_to_string(&path)
        .with_context(|| format!("couldn't read {path}"))?;
    let config = LaunchConfig::from_json(&json)
        .with_context(|| format!("couldn't parse {path}"))?;

    let session = launch(&config, &LocalSpawner)
        .context("couldn't launch the cluster")?;

    tokio::select! {
        res = session.wait() => res.context("the cluster failed")?,
        _ = signal::ctrl_c() => warn!("interrupted, tearing the cluster down"),
    }

    Ok(())
}
