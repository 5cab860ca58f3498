//! CLI entry point for harvest-db, the engagement database browser.
//!
//! Every command prints JSON to stdout; logs go to stderr.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::{fmt, EnvFilter};

use harvest_core::config::{HarvestConfig, LoggingConfig};
use harvest_core::{CredentialId, CredentialKind, HostId, SharePermission};
use harvest_store::{CredentialRef, EdgeFilter, Snapshot, StoreClient};

#[derive(Parser)]
#[command(name = "harvest-db")]
#[command(about = "Inspect and maintain a recon engagement database")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Config file prefix (default: harvest).
    #[arg(short, long, default_value = "harvest", global = true)]
    config: String,

    /// Override the engagement database path.
    #[arg(long, global = true)]
    db: Option<String>,
}

#[derive(Subcommand)]
enum Command {
    /// List hosts. FILTER is an id, `dc`, or an address/hostname substring.
    Hosts {
        filter: Option<String>,
        /// Restrict `dc` to one domain.
        #[arg(long)]
        domain: Option<String>,
    },
    /// List credentials. FILTER is an id or a username substring.
    Creds {
        filter: Option<String>,
        /// Only credentials of this kind (hash, plaintext, ...).
        #[arg(long)]
        kind: Option<String>,
    },
    /// List every user row, placeholders included.
    Users { filter: Option<String> },
    /// List groups. FILTER is an id or a name substring.
    Groups {
        filter: Option<String>,
        /// Exact group name (requires --domain).
        #[arg(long, requires = "domain")]
        name: Option<String>,
        #[arg(long)]
        domain: Option<String>,
    },
    /// List shares. FILTER is an id or a share name substring.
    Shares {
        filter: Option<String>,
        /// Only shares with this access: r, w or rw.
        #[arg(long)]
        access: Option<String>,
        /// Restrict --access to one host id.
        #[arg(long, requires = "access")]
        host: Option<i64>,
    },
    /// List admin edges.
    Admins {
        #[arg(long)]
        credential: Option<i64>,
        #[arg(long)]
        host: Option<i64>,
    },
    /// List logged-in edges.
    Sessions {
        #[arg(long)]
        credential: Option<i64>,
        #[arg(long)]
        host: Option<i64>,
    },
    /// Grant a credential admin on every host whose address contains PATTERN.
    GrantAdmin {
        #[arg(long)]
        credential: i64,
        pattern: String,
    },
    /// Row counts per table.
    Counts,
    /// Write every table as a JSON snapshot.
    Export {
        /// Output file (default: stdout).
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// Merge a JSON snapshot into this engagement.
    Import { path: PathBuf },
    /// Remove credentials together with their edges and shares.
    RemoveCreds {
        #[arg(required = true)]
        ids: Vec<i64>,
    },
    /// Delete every row from every table.
    Clear {
        /// Confirm the irreversible wipe.
        #[arg(long)]
        yes: bool,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = HarvestConfig::load(&cli.config)?;
    init_logging(&config.logging);
    if let Some(db) = &cli.db {
        config.database.path = db.clone();
    }

    let store = StoreClient::open(&config.database)?;

    match cli.command {
        Command::Hosts { filter, domain } => {
            emit(&store.list_hosts(filter.as_deref(), domain.as_deref())?)?;
        }
        Command::Creds { filter, kind } => {
            let kind = kind.map(|k| k.parse::<CredentialKind>()).transpose()?;
            emit(&store.list_credentials(filter.as_deref(), kind)?)?;
        }
        Command::Users { filter } => {
            emit(&store.list_users(filter.as_deref())?)?;
        }
        Command::Groups {
            filter,
            name,
            domain,
        } => {
            let exact = name.as_deref().zip(domain.as_deref());
            emit(&store.list_groups(filter.as_deref(), exact)?)?;
        }
        Command::Shares {
            filter,
            access,
            host,
        } => {
            let access = access
                .map(|a| a.parse::<SharePermission>())
                .transpose()?
                .map(|permission| (permission, host.map(HostId)));
            emit(&store.list_shares(filter.as_deref(), access)?)?;
        }
        Command::Admins { credential, host } => {
            emit(&store.get_admin_relations(edge_filter(credential, host))?)?;
        }
        Command::Sessions { credential, host } => {
            emit(&store.get_loggedin_relations(edge_filter(credential, host))?)?;
        }
        Command::GrantAdmin {
            credential,
            pattern,
        } => {
            let created =
                store.grant_admin(&CredentialRef::Id(CredentialId(credential)), &pattern)?;
            emit(&serde_json::json!({ "created": created }))?;
        }
        Command::Counts => emit(&store.counts()?)?,
        Command::Export { out } => {
            let json = store.export()?.to_json()?;
            match out {
                Some(path) => {
                    std::fs::write(&path, json)?;
                    tracing::info!(path = %path.display(), "Snapshot written");
                }
                None => println!("{json}"),
            }
        }
        Command::Import { path } => {
            let raw = std::fs::read_to_string(&path)?;
            let snapshot = Snapshot::from_json(&raw)?;
            emit(&store.merge(&snapshot)?)?;
        }
        Command::RemoveCreds { ids } => {
            let ids: Vec<CredentialId> = ids.into_iter().map(CredentialId).collect();
            let removed = store.remove_credentials(&ids)?;
            emit(&serde_json::json!({ "removed": removed }))?;
        }
        Command::Clear { yes } => {
            if !yes {
                anyhow::bail!("Refusing to clear {} without --yes", config.database.path);
            }
            store.clear()?;
        }
    }

    Ok(())
}

fn init_logging(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = fmt().with_env_filter(filter).with_writer(std::io::stderr);
    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn edge_filter(credential: Option<i64>, host: Option<i64>) -> EdgeFilter<HostId> {
    match (credential.map(CredentialId), host.map(HostId)) {
        (Some(c), Some(h)) => EdgeFilter::Pair(c, h),
        (Some(c), None) => EdgeFilter::ByCredential(c),
        (None, Some(h)) => EdgeFilter::ByTarget(h),
        (None, None) => EdgeFilter::All,
    }
}

fn emit<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
