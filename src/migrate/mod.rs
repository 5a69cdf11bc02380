//! Service schema migrations
//!
//! Each backend service ships a CLI with a `migrate` subcommand. The harness
//! reaches it through a configurable prefix (`docker exec <container>` by
//! default) so the same code works against compose or other runtimes.

use tracing::info;

use crate::api::Service;
use crate::config::MigrationConfig;
use crate::errors::Result;
use crate::process::{run_command, CommandOutput};

/// Migration runner for one service
#[derive(Debug, Clone)]
pub struct MigrationCli {
    service: Service,
    command_prefix: Vec<String>,
    container: String,
}

impl MigrationCli {
    pub fn new(service: Service, config: &MigrationConfig) -> Self {
        Self {
            service,
            command_prefix: config.command_prefix.clone(),
            container: config.container_for(service),
        }
    }

    pub fn service(&self) -> Service {
        self.service
    }

    /// Full command line for a service CLI subcommand; the first element is
    /// the program to spawn
    pub fn command_args(&self, subcommand: &[&str]) -> Vec<String> {
        let mut args = self.command_prefix.clone();
        args.push(self.container.clone());
        args.push(format!("/usr/bin/{}", self.service.as_str()));
        args.extend(subcommand.iter().map(|s| s.to_string()));
        args
    }

    pub fn migrate_args(&self, tenant: Option<&str>) -> Vec<String> {
        match tenant {
            Some(tenant) => self.command_args(&["migrate", "--tenant", tenant]),
            None => self.command_args(&["migrate"]),
        }
    }

    async fn run(&self, mut args: Vec<String>) -> Result<CommandOutput> {
        // Never empty: the container and binary are always present
        let program = args.remove(0);
        run_command(&program, args).await?.check()
    }

    /// Run the service's migrations, for one tenant's database when given
    pub async fn migrate(&self, tenant: Option<&str>) -> Result<CommandOutput> {
        let output = self.run(self.migrate_args(tenant)).await?;
        info!(service = %self.service, tenant = tenant.unwrap_or("-"), "migrations applied");
        Ok(output)
    }

    /// `useradm create-user`, for setups without organization sign-up
    pub async fn create_user(&self, email: &str, password: &str) -> Result<CommandOutput> {
        let args = self.command_args(&["create-user", "--username", email, "--password", password]);
        let output = self.run(args).await?;
        info!(service = %self.service, email, "user created");
        Ok(output)
    }
}
