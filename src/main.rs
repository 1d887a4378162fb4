//! smartos-manager - Main entry point.
//!
//! Usage: smartos-manager [OPTIONS] <QUERY>
//!
//! Queries:
//!   list           VMs of every host
//!   list_images    Installed images
//!   diag           Hardware identity and free memory slots
//!   sysinfo        Memory, disks, ZFS and build metrics
//!   overview       Capacity report per host
//!
//! Options:
//!   --config PATH    Host directory (default: ./smartos_hosts.toml)
//!   --cached         Replay the last captured results, no network access
//!   --version, -v    Show version
//!
//! The result is printed as JSON on stdout; hosts that failed are listed
//! on stderr.

use std::env;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use smartos_manager::config::{Config, Host};
use smartos_manager::fleet::{LiveExecutor, ReplayExecutor, ResultCache};
use smartos_manager::inventory::{HostMap, InventoryService};
use smartos_manager::ssh::{OpenSshTransport, Transport};
use smartos_manager::{Error, Result, VERSION, logging};

/// Query selected on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Query {
    List,
    ListImages,
    Diag,
    Sysinfo,
    Overview,
}

impl Query {
    fn parse(name: &str) -> Option<Self> {
        match name {
            "list" => Some(Self::List),
            "list_images" => Some(Self::ListImages),
            "diag" => Some(Self::Diag),
            "sysinfo" => Some(Self::Sysinfo),
            "overview" => Some(Self::Overview),
            _ => None,
        }
    }
}

#[derive(Debug)]
struct Options {
    config_path: PathBuf,
    cached: bool,
    query: Query,
}

/// One host and its query result, as printed.
#[derive(Serialize)]
struct HostEntry<'a, T> {
    host: &'a Host,
    result: &'a T,
}

#[tokio::main]
async fn main() {
    let args: Vec<String> = env::args().collect();

    if args.iter().any(|a| a == "--version" || a == "-v") {
        println!("smartos-manager v{}", VERSION);
        return;
    }

    if let Err(e) = run(&args).await {
        eprintln!("smartos-manager: {}", e);
        process::exit(e.exit_code());
    }
}

async fn run(args: &[String]) -> Result<()> {
    let options = parse_args(args)?;
    let config = Config::load(&options.config_path)?;

    if config.log_config.enabled {
        logging::init(&config.log_config).map_err(Error::Logging)?;
    }
    info!(
        "smartos-manager v{} starting: {:?} on {} hosts",
        VERSION,
        options.query,
        config.directory.len()
    );

    let cache = ResultCache::load(config.cache_path());
    let scope = config.scope();

    if options.cached {
        let executor = Arc::new(ReplayExecutor::new(cache, scope));
        let service = InventoryService::new(executor, config.directory.clone());
        print_query(&service, options.query).await?;
        report_failures(&service);
        return Ok(());
    }

    let transport: Arc<dyn Transport> = Arc::new(OpenSshTransport::new(
        config.settings.ssh_binary.clone(),
        config.connect_timeout(),
        config.command_timeout(),
    ));
    // tunnel (2x connect) then command (connect + command)
    let host_timeout = config.connect_timeout() * 3 + config.command_timeout();
    let executor = Arc::new(
        LiveExecutor::new(&config.directory, transport, cache, scope).with_host_timeout(host_timeout),
    );
    let service = InventoryService::new(executor.clone(), config.directory.clone());

    let outcome = print_query(&service, options.query).await;
    executor.shutdown().await;
    outcome?;

    report_failures(&service);
    Ok(())
}

fn parse_args(args: &[String]) -> Result<Options> {
    let mut config_path = Config::default_config_path();
    let mut cached = false;
    let mut query = None;

    let mut iter = args.iter().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config" | "-c" => {
                let path = iter
                    .next()
                    .ok_or_else(|| Error::Usage("--config requires a path".to_string()))?;
                config_path = PathBuf::from(path);
            }
            "--cached" => cached = true,
            other if other.starts_with('-') => {
                return Err(Error::Usage(format!("unknown option: {}", other)));
            }
            other => {
                if query.is_some() {
                    return Err(Error::Usage(format!("unexpected argument: {}", other)));
                }
                query = Some(
                    Query::parse(other)
                        .ok_or_else(|| Error::Usage(format!("unknown query: {}", other)))?,
                );
            }
        }
    }

    let query = query.ok_or_else(|| {
        Error::Usage("usage: smartos-manager [--config PATH] [--cached] <list|list_images|diag|sysinfo|overview>".to_string())
    })?;

    Ok(Options {
        config_path,
        cached,
        query,
    })
}

async fn print_query(service: &InventoryService, query: Query) -> Result<()> {
    let json = match query {
        Query::List => to_json(&service.list_vms().await)?,
        Query::ListImages => to_json(&service.list_images().await)?,
        Query::Diag => to_json(&service.diag().await)?,
        Query::Sysinfo => to_json(&service.sysinfo().await)?,
        Query::Overview => serde_json::to_string_pretty(&service.overview().await)?,
    };

    println!("{}", json);
    Ok(())
}

fn to_json<T: Serialize>(results: &HostMap<T>) -> Result<String> {
    let entries: Vec<_> = results
        .iter()
        .map(|(host, result)| HostEntry { host, result })
        .collect();
    Ok(serde_json::to_string_pretty(&entries)?)
}

fn report_failures(service: &InventoryService) {
    let failed = service.failed_hosts();
    if failed.is_empty() {
        return;
    }

    eprintln!("Failed hosts ({}):", failed.len());
    for host in failed {
        eprintln!("  {} ({})", host.name, host.connection_string());
    }
}
