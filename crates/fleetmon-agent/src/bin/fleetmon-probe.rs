use anyhow::{bail, Context, Result};
use chrono::Utc;
use fleetmon_agent::{AgentConfig, HttpReporter, Reporter};
use fleetmon_collector::{CollectorRegistry, Platform};
use fleetmon_common::wire::MetricsReport;
use std::env;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Debug)]
struct Config {
    config_path: String,
    send: bool,
}

enum CliAction {
    Help,
    Run(Config),
}

fn usage() {
    println!(
        "\
Usage: fleetmon-probe <config.toml> [--send]

Runs one collection cycle with the collector the agent would use on this
platform and prints the report payload and per-source errors.

Options:
  --send       register and submit the snapshot to the configured server
  -h, --help   show this message"
    );
}

fn parse_cli() -> Result<CliAction> {
    let mut config_path = None;
    let mut send = false;

    for arg in env::args().skip(1) {
        match arg.as_str() {
            "-h" | "--help" => return Ok(CliAction::Help),
            "--send" => send = true,
            other if other.starts_with('-') => bail!("unknown argument: {other}"),
            path => {
                if config_path.replace(path.to_string()).is_some() {
                    bail!("only one config path may be given");
                }
            }
        }
    }

    let Some(config_path) = config_path else {
        bail!("missing config path (see --help)");
    };
    Ok(CliAction::Run(Config { config_path, send }))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("fleetmon=info".parse()?))
        .with_writer(std::io::stderr)
        .init();

    match parse_cli()? {
        CliAction::Help => {
            usage();
            Ok(())
        }
        CliAction::Run(config) => run(config).await,
    }
}

async fn run(cli: Config) -> Result<()> {
    let config = AgentConfig::load(&cli.config_path)
        .with_context(|| format!("failed to load configuration from {}", cli.config_path))?;
    let identity = config.identity();
    let platform = Platform::current();
    let mut collector = CollectorRegistry::with_defaults().build(
        identity.monitor_type(),
        platform,
        &config.collector_settings(),
    );

    println!(
        "[fleetmon-probe] agent={} type={} platform={} collector={}",
        identity.id(),
        identity.monitor_type(),
        platform,
        collector.name()
    );

    let cancel = CancellationToken::new();
    let outcome = collector.collect(&cancel).await;

    println!(
        "[fleetmon-probe] attempted={} failed={} keys={} fallback={}",
        outcome.attempted,
        outcome.errors.len(),
        outcome.metrics.len(),
        outcome.fallback
    );
    for error in &outcome.errors {
        println!("[fleetmon-probe][error] source={} {}", error.source, error.error);
    }
    if !outcome.backfilled.is_empty() {
        println!("[fleetmon-probe][backfilled] {}", outcome.backfilled.join(","));
    }

    let report = MetricsReport {
        agent_id: identity.id().to_string(),
        timestamp: Utc::now(),
        metrics: outcome.metrics,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);

    if !cli.send {
        return Ok(());
    }

    let mut reporter = HttpReporter::from_config(&config)?;
    reporter
        .register(&identity, &cancel)
        .await
        .context("registration failed")?;
    reporter
        .send(report.metrics, &cancel)
        .await
        .context("metrics submission failed")?;
    reporter.close().await;
    println!("[fleetmon-probe] submitted to {}", config.endpoint());
    Ok(())
}
