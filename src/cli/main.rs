use clap::{Parser, Subcommand};
use notification_relay::{
    config::Config,
    notifications::{DrainError, DrainReport},
    relay::Relay,
    telemetry::init_tracing,
};
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "relay-cli")]
#[command(about = "Enqueue and drain queued e-mail notifications", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file layered over the built-in defaults
    #[arg(short, long, env = "CONFIG_PATH", default_value = "config/default.toml")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Put one notification on the queue
    Enqueue {
        #[arg(short, long)]
        subject: String,

        /// Recipient address
        #[arg(short, long)]
        to: String,

        /// HTML body
        #[arg(short, long)]
        content: String,
    },

    /// Run a single drain pass and print its report
    ///
    /// The drain lease only excludes drains within one process, so a drain
    /// started here can overlap the service's scheduled drain. Messages stay
    /// at-least-once either way, but one may be sent twice; stop the service
    /// or disable its drain job first.
    Drain,

    /// Declare the queue (and dead-letter queue, if configured)
    Declare,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match Config::load_from(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };
    init_tracing(&config.observability);

    match run(cli.command, &config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Commands, config: &Config) -> anyhow::Result<()> {
    let relay = Relay::from_config(config)?;

    let result = match command {
        Commands::Enqueue {
            subject,
            to,
            content,
        } => relay
            .producer
            .enqueue(subject, to.clone(), content)
            .await
            .map(|()| println!("Queued notification for {} on '{}'", to, relay.producer.queue_name()))
            .map_err(anyhow::Error::from),
        Commands::Drain => match relay.drainer.drain().await {
            Ok(report) => print_report(&report),
            Err(DrainError::Interrupted { source, report }) => {
                print_report(&report)?;
                Err(anyhow::Error::from(source).context("drain interrupted"))
            }
            Err(e) => Err(e.into()),
        },
        Commands::Declare => declare(&relay, config).await,
    };

    relay.client.close().await?;
    result
}

fn print_report(report: &DrainReport) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(report)?);
    Ok(())
}

async fn declare(relay: &Relay, config: &Config) -> anyhow::Result<()> {
    let queue = relay.client.ensure_queue(&config.queue.queue_name).await?;
    println!("Declared '{}' on {}", queue.name(), relay.client.backend());

    if let Some(dead_letter) = &config.queue.dead_letter_queue {
        let queue = relay.client.ensure_queue(dead_letter).await?;
        println!("Declared '{}' on {}", queue.name(), relay.client.backend());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_drain_help_warns_about_lease_scope() {
        let mut cli = Cli::command();
        let drain = cli
            .find_subcommand_mut("drain")
            .expect("drain subcommand");
        let help = drain.render_long_help().to_string();
        assert!(help.contains("process"));
    }

    #[test]
    fn test_parse_drain() {
        let cli = Cli::try_parse_from(["relay-cli", "--config", "relay.toml", "drain"]).unwrap();
        assert_eq!(cli.config, "relay.toml");
        assert!(matches!(cli.command, Commands::Drain));
    }
}
