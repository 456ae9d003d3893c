use std::path::PathBuf;

use clap::{Parser, Subcommand};
use serde_json::{json, Value};

use rbac_cache::config::{load_config, ServiceConfig};
use rbac_cache::health;
use rbac_cache::lifecycle;

#[derive(Parser)]
#[command(name = "rbac-cache")]
#[command(about = "Inspect and invalidate the RBAC cache", long_about = None)]
struct Cli {
    /// TOML configuration file; built-in defaults when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Selected backend, availability and circuit states
    Status,
    /// Cached roles for a user
    GetRoles { user_id: String },
    /// Cached permissions for a user
    GetPermissions { user_id: String },
    /// Clear every user holding the given roles
    InvalidateRole {
        #[arg(required = true)]
        codes: Vec<String>,
    },
    /// Clear every user holding the given permissions
    InvalidatePermission {
        #[arg(required = true)]
        codes: Vec<String>,
    },
    /// Clear a single user's cached roles and permissions
    InvalidateUser { user_id: String },
    /// Delete every RBAC key
    Flush,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ServiceConfig::default(),
    };

    let services = lifecycle::start(&config).await;
    let rbac = &services.rbac;

    let output: Value = match cli.command {
        Commands::Status => {
            let report = health::report(rbac.backend().as_ref(), &services.breaker).await;
            serde_json::to_value(&report)?
        }
        Commands::GetRoles { user_id } => {
            let roles = rbac.get_user_roles(&user_id).await;
            json!({ "user_id": user_id, "roles": roles })
        }
        Commands::GetPermissions { user_id } => {
            let permissions = rbac.get_user_permissions(&user_id).await;
            json!({ "user_id": user_id, "permissions": permissions })
        }
        Commands::InvalidateRole { codes } => {
            let cleared = rbac.invalidate_multiple_roles(codes.as_slice()).await;
            json!({ "roles": codes, "cleared_users": cleared })
        }
        Commands::InvalidatePermission { codes } => {
            let cleared = rbac.invalidate_multiple_permissions(codes.as_slice()).await;
            json!({ "permissions": codes, "cleared_users": cleared })
        }
        Commands::InvalidateUser { user_id } => {
            let cleared = rbac.delete_user_cache(&user_id).await;
            json!({ "user_id": user_id, "cleared": cleared })
        }
        Commands::Flush => {
            let removed = rbac.flush_all_rbac_cache().await;
            json!({ "removed_keys": removed })
        }
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    services.stop().await;
    Ok(())
}
