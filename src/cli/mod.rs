//! # Command Line Interface
//!
//! Standalone entry points for pieces of the harness that are useful outside
//! a test run: the mock mail server for manual sign-up checks, service
//! migrations, and waiting for a user to become able to log in.

use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;

use crate::api::{ApiClient, ClientOptions, Service, ServiceUrls};
use crate::config::HarnessConfig;
use crate::migrate::MigrationCli;
use crate::observability::init_logging;
use crate::smtp::SmtpServerMock;
use crate::users::{wait_for_login, Credentials};

/// How often the `smtp` command checks for newly received mail
const MAILBOX_REPORT_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Parser)]
#[command(name = "mender-e2e")]
#[command(about = "End-to-end harness tooling for the device management backend")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// API gateway override
    #[arg(long, global = true)]
    pub gateway: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the mock SMTP server and log every received message
    Smtp {
        /// Address to listen on (defaults to the configured mock address)
        #[arg(long)]
        bind: Option<String>,
    },

    /// Run a service's schema migrations
    Migrate {
        /// Service name (useradm, tenantadm, deviceauth, inventory, deployments)
        service: Service,

        /// Migrate one tenant's database
        #[arg(long)]
        tenant: Option<String>,
    },

    /// Wait until a user can log in and print the session token
    WaitLogin {
        #[arg(long)]
        email: String,

        #[arg(long)]
        password: String,

        /// Timeout in seconds
        #[arg(long, default_value_t = 180)]
        timeout: u64,
    },
}

/// Run CLI commands
pub async fn run_cli() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = HarnessConfig::from_env().context("invalid configuration")?;
    if cli.verbose {
        config.logging.level = "debug".to_string();
    }
    if let Some(gateway) = cli.gateway {
        config.backend.gateway_url = gateway;
    }
    init_logging(&config.logging);

    match cli.command {
        Commands::Smtp { bind } => {
            let bind = bind.unwrap_or_else(|| config.smtp.bind_address.clone());
            handle_smtp_command(&bind).await?
        }
        Commands::Migrate { service, tenant } => {
            MigrationCli::new(service, &config.migration)
                .migrate(tenant.as_deref())
                .await
                .with_context(|| format!("migrating {service}"))?;
        }
        Commands::WaitLogin { email, password, timeout } => {
            let urls = ServiceUrls::for_gateway(config.backend.gateway_url.clone());
            let client = ApiClient::with_options(
                urls.management(Service::Useradm),
                &ClientOptions::from(&config.backend),
            )?;
            let credentials = Credentials::new(email, password);
            let token =
                wait_for_login(&client, &credentials, Duration::from_secs(timeout)).await?;
            println!("{token}");
        }
    }

    Ok(())
}

async fn handle_smtp_command(bind: &str) -> anyhow::Result<()> {
    let server = SmtpServerMock::start(bind)
        .await
        .with_context(|| format!("binding SMTP mock to {bind}"))?;
    info!(addr = %server.local_addr(), "SMTP mock listening, Ctrl-C to stop");

    let mut reported = 0;
    let mut ticker = tokio::time::interval(MAILBOX_REPORT_INTERVAL);
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = ticker.tick() => {
                let messages = server.mailbox().snapshot();
                for message in &messages[reported..] {
                    info!(
                        from = %message.mail_from,
                        to = %message.rcpt_tos.join(", "),
                        size = message.data.len(),
                        "received message"
                    );
                }
                reported = messages.len();
            }
        }
    }

    info!(received = server.mailbox().len(), "stopping SMTP mock");
    server.stop().await;
    Ok(())
}
