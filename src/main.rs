use anyhow::{Context, Result};
use chrono::Local;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};
use vertretungsplan::{
    bot::{deliver_all, Bot, ConsoleDelivery, Sender},
    config::Config,
    daily,
    extract::TabulaExtractor,
    fetch::MoodleSource,
    plan::Subscription,
    publication::PlanService,
    registry::UserRegistry,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Vertretungsplan notifier")]
struct Args {
    /// YAML settings file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Fetch the current plan and print the report
    Get {
        /// Use this registered user's subscription
        #[arg(long, conflicts_with = "classes")]
        user: Option<String>,
        /// Class filter tokens, e.g. `6c 7a`
        classes: Vec<String>,
    },
    /// Run the daily notification job
    Daily {
        /// Run once now instead of waiting for the configured time
        #[arg(long)]
        once: bool,
    },
    /// Handle one chat message (or `--callback` data) as user `--user`
    Command {
        #[arg(long)]
        user: String,
        #[arg(long, default_value = "")]
        first: String,
        #[arg(long, default_value = "")]
        last: String,
        /// Treat the text as an inline-keyboard callback (`accept ID`)
        #[arg(long)]
        callback: bool,
        text: Vec<String>,
    },
    /// Grant admin rights to a registered user
    Admin { user: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    // ─── 1) init logging ─────────────────────────────────────────────
    let env = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt::Subscriber::builder()
        .with_env_filter(env)
        .with_writer(std::io::stderr)
        .init();

    std::panic::set_hook(Box::new(|info| {
        eprintln!("panic: {:?}", info);
    }));

    // ─── 2) settings & collaborators ────────────────────────────────
    let args = Args::parse();
    let cfg = Config::load(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    info!(config = %args.config.display(), "startup");

    let registry = UserRegistry::new(&cfg.paths.users_db);
    let source = MoodleSource::new(&cfg.moodle).context("building HTTP client")?;
    let extractor = TabulaExtractor {
        java: cfg.tabula.java.clone(),
        jar: cfg.tabula.jar.clone(),
        header_csv: cfg.paths.header_csv.clone(),
        body_csv: cfg.paths.body_csv.clone(),
    };
    let service = PlanService::new(
        source,
        extractor,
        &cfg.paths.pdf,
        cfg.cache_ttl,
        cfg.year_policy,
    );
    let delivery = ConsoleDelivery;
    let today = Local::now().date_naive();

    // ─── 3) dispatch ─────────────────────────────────────────────────
    match args.cmd {
        Cmd::Get { user, classes } => {
            let subscription = match user {
                Some(id) => {
                    registry
                        .get(&id)
                        .await?
                        .with_context(|| format!("user {} is not registered", id))?
                        .subscription
                }
                None => Subscription::from_tokens(&classes),
            };
            let publication = service.current(today).await?;
            for w in &publication.warnings {
                warn!(%w, "skipped row");
            }
            println!("{}", publication.report_for(&subscription));
            println!("({})", publication.document.display());
        }
        Cmd::Daily { once: true } => {
            let summary = daily::run_daily_job(&service, &registry, &delivery, today).await?;
            info!(?summary, "done");
        }
        Cmd::Daily { once: false } => {
            daily::run_forever(&service, &registry, &delivery, cfg.daily_at).await;
        }
        Cmd::Command {
            user,
            first,
            last,
            callback,
            text,
        } => {
            let bot = Bot::new(&registry, &service);
            let from = Sender {
                id: user,
                first_name: first,
                last_name: last,
            };
            let text = text.join(" ");
            let out = if callback {
                bot.handle_callback(&from, &text).await?
            } else {
                bot.handle_text(&from, &text, today).await?
            };
            let failed = deliver_all(&delivery, &out).await;
            if failed > 0 {
                warn!(failed, "some replies were not delivered");
            }
        }
        Cmd::Admin { user } => {
            registry.set_admin(&user, true).await?;
            info!(user = %user, "admin granted");
        }
    }

    Ok(())
}
