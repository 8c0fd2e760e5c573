use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser, Debug)]
#[command(
    name = "stackfix",
    version,
    about = "Repair CloudFormation StackSet stack instances"
)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Convert a CloudFormation template into an import template covering
    /// the resources that already exist in the account.
    CreateImportTemplate {
        /// CloudFormation template file
        #[arg(long = "cf-template")]
        cf_template: PathBuf,
    },

    /// Repair the FAILED stack instances of a StackSet.
    FixStacksetStackInstances {
        /// StackSet name
        #[arg(long)]
        stack_set_name: String,

        /// Role name to assume into each account
        #[arg(long)]
        role_name: Option<String>,

        /// Bucket to stage templates in
        #[arg(long)]
        s3_bucket: Option<String>,
    },

    /// Reconcile the DRIFTED stack instances of a StackSet.
    FixStacksetDrift {
        /// StackSet name
        #[arg(long)]
        stack_set_name: String,

        /// Role name to assume into each account
        #[arg(long)]
        role_name: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.cmd {
        Command::CreateImportTemplate { cf_template } => {
            commands::create_import_template::run(&cf_template).await
        }
        Command::FixStacksetStackInstances {
            stack_set_name,
            role_name,
            s3_bucket,
        } => {
            let role_name = require_role_name(role_name)?;
            commands::fix_stackset::run(&stack_set_name, &role_name, s3_bucket.as_deref()).await
        }
        Command::FixStacksetDrift {
            stack_set_name,
            role_name,
        } => {
            let role_name = require_role_name(role_name)?;
            commands::fix_drift::run(&stack_set_name, &role_name).await
        }
    }
}

fn require_role_name(role_name: Option<String>) -> anyhow::Result<String> {
    role_name
        .filter(|name| !name.is_empty())
        .ok_or_else(|| anyhow::anyhow!("you must specify --role-name to assume into each account"))
}
