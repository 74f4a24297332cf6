use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use wa_ingest::api::{ApiServerBuilder, MEDIA_MOUNT};
use wa_ingest::db::{self, CompanyRepo, SqliteGateway};
use wa_ingest::{Config, FileMediaStore, Pipeline, PipelineSettings};

/// WA Ingest - WhatsApp webhook ingestion gateway
#[derive(Parser)]
#[command(name = "wa-ingest", version, about)]
struct Cli {
    /// Configuration file (defaults to the user config directory)
    #[arg(short, long, env = "WA_INGEST_CONFIG")]
    config: Option<PathBuf>,

    /// Port to listen on
    #[arg(long)]
    port: Option<u16>,

    /// Address to bind
    #[arg(long)]
    bind: Option<String>,

    /// `SQLite` database file
    #[arg(long)]
    database: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the webhook server (default)
    Serve,
    /// Manage companies
    Company {
        #[command(subcommand)]
        action: CompanyAction,
    },
    /// Manage connected WhatsApp instances
    Instance {
        #[command(subcommand)]
        action: InstanceAction,
    },
}

#[derive(Subcommand)]
enum CompanyAction {
    /// Create a company
    Add {
        /// Company name
        name: String,
    },
    /// List companies
    List,
}

#[derive(Subcommand)]
enum InstanceAction {
    /// Register an instance name for a company
    Add {
        /// Owning company ID
        #[arg(long)]
        company: String,
        /// Provider instance name, as sent in webhooks
        name: String,
    },
    /// List instances
    List {
        /// Only instances of this company
        #[arg(long)]
        company: Option<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // RUST_LOG wins over -v
    let filter = match cli.verbose {
        0 => "info,wa_ingest=info",
        1 => "info,wa_ingest=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = Config::load(cli.config.as_deref());
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(bind) = cli.bind {
        config.server.bind = bind;
    }
    if let Some(database) = cli.database {
        config.database_path = database;
    }

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::Company { action } => company(&config, action),
        Command::Instance { action } => instance(&config, action),
    }
}

async fn serve(config: Config) -> anyhow::Result<()> {
    let pool = db::init(&config.database_path)?;
    let gateway = Arc::new(SqliteGateway::new(pool.clone()));

    let settings = PipelineSettings {
        source_tag: config.ingest.source_tag.clone(),
        ignore_self_sent: config.ingest.ignore_self_sent,
        strict_media: config.media.strict,
    };
    let mut pipeline = Pipeline::new(gateway.clone(), gateway, settings);

    let media_dir = if config.media.enabled {
        std::fs::create_dir_all(&config.media.dir)?;
        pipeline = pipeline.with_media_store(Arc::new(FileMediaStore::new(&config.media)?));
        tracing::info!(
            dir = %config.media.dir.display(),
            public_base_url = %config.media.public_base_url,
            "media storage enabled"
        );
        if config.media.provider_token.is_some() && config.media.token_hosts.is_empty() {
            tracing::warn!("provider token set without token_hosts, media is fetched without it");
        }
        Some(config.media.dir.clone())
    } else {
        tracing::info!("media storage disabled, attachments keep their text only");
        None
    };

    // Serve the directory only when stored URLs point back at this server
    let serve_media = media_dir.filter(|_| config.media.public_base_url.starts_with(MEDIA_MOUNT));

    tracing::info!(
        database = %config.database_path.display(),
        source_tag = %config.ingest.source_tag,
        "starting ingestion gateway"
    );

    ApiServerBuilder::new(pool, Arc::new(pipeline))
        .bind(config.server.bind)
        .port(config.server.port)
        .webhook_path(config.server.webhook_path)
        .max_body_bytes(config.server.max_body_bytes)
        .media_dir(serve_media)
        .build()?
        .run()
        .await?;

    Ok(())
}

fn company(config: &Config, action: CompanyAction) -> anyhow::Result<()> {
    let repo = CompanyRepo::new(db::init(&config.database_path)?);

    match action {
        CompanyAction::Add { name } => {
            let company = repo.create_company(&name)?;
            println!("Created company {} ({})", company.name, company.id);
        }
        CompanyAction::List => {
            let companies = repo.list_companies()?;
            if companies.is_empty() {
                println!("No companies");
            }
            for company in companies {
                println!("{}  {}", company.id, company.name);
            }
        }
    }

    Ok(())
}

fn instance(config: &Config, action: InstanceAction) -> anyhow::Result<()> {
    let repo = CompanyRepo::new(db::init(&config.database_path)?);

    match action {
        InstanceAction::Add { company, name } => {
            let instance = repo.create_instance(&company, &name)?;
            println!("Registered instance {} for company {}", instance.name, instance.company_id);
        }
        InstanceAction::List { company } => {
            let instances = repo.list_instances(company.as_deref())?;
            if instances.is_empty() {
                println!("No instances");
            }
            for instance in instances {
                println!(
                    "{}  {}  {}  {}",
                    instance.id, instance.company_id, instance.name, instance.status
                );
            }
        }
    }

    Ok(())
}
