use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use windowgate::config::WindowgateConfig;
use windowgate::middleware::{Identity, RateLimit, RateLimitOptions, Verdict};
use windowgate::ratelimit::{build_store, RateLimiter};

/// Inspect and exercise Windowgate rate limits.
#[derive(Debug, Parser)]
#[command(name = "windowgate", version, about)]
struct Cli {
    /// YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Count hits for an identity against the configured store
    Hit {
        /// Identity to count against
        identity: String,

        /// Number of hits to send
        #[arg(short = 'n', long, default_value_t = 1)]
        times: u32,

        /// Override the configured window length in milliseconds
        #[arg(long)]
        duration: Option<u64>,

        /// Override the configured maximum
        #[arg(long)]
        max: Option<u64>,

        /// Print each verdict as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let config = WindowgateConfig::load(cli.config.as_deref())?;
    info!(
        backend = ?config.store.backend,
        duration = config.limits.duration,
        max = config.limits.max,
        "Configuration loaded"
    );

    match cli.command {
        Command::Config => {
            print!("{}", serde_yaml::to_string(&config)?);
        }
        Command::Hit {
            identity,
            times,
            duration,
            max,
            json,
        } => {
            let store = build_store(&config.store).await?;
            let limiter =
                RateLimiter::new(store).with_key_prefix(config.store.key_prefix.clone());

            let options = RateLimitOptions::new(|id: &String| Identity::from(id.as_str()))
                .with_duration(duration.unwrap_or(config.limits.duration))
                .with_max(max.unwrap_or(config.limits.max));
            let limit = RateLimit::new(Arc::new(limiter), options)?;

            for n in 1..=times {
                let verdict = limit.check(&identity).await?;
                if json {
                    println!("{}", verdict_json(n, &verdict));
                } else {
                    print_verdict(n, &verdict);
                }
            }
        }
    }

    Ok(())
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    }
}

fn verdict_json(n: u32, verdict: &Verdict) -> serde_json::Value {
    let headers: serde_json::Map<String, serde_json::Value> = verdict
        .headers()
        .into_iter()
        .map(|(name, value)| (name.to_string(), serde_json::Value::String(value)))
        .collect();

    let mut value = serde_json::json!({
        "hit": n,
        "allowed": verdict.is_allowed(),
        "headers": headers,
    });

    if let Verdict::Reject { status, body, .. } = verdict {
        value["status"] = serde_json::json!(status);
        value["body"] = serde_json::json!(body);
    }

    value
}

fn print_verdict(n: u32, verdict: &Verdict) {
    match verdict {
        Verdict::Bypass => println!("hit {}: not rate limited", n),
        Verdict::Admit { headers } => {
            println!(
                "hit {}: allowed, {}/{} remaining, resets at {}",
                n,
                headers.remaining,
                headers.limit,
                format_reset(headers.reset)
            );
        }
        Verdict::Reject { status, body, .. } => {
            println!("hit {}: rejected ({}) {}", n, status, body);
        }
    }
}

fn format_reset(reset: i64) -> String {
    chrono::DateTime::from_timestamp(reset, 0)
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| reset.to_string())
}
