//! sitecheck - command line client for excavation permit field inspections.
//!
//! Wraps the sitecheck-core API client: login/logout, permit list and
//! detail, and inspection / sample-testing form submission from JSON files.

use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use sitecheck_core::api::{ApiClient, ApiError};
use sitecheck_core::auth::{KeyringTokenStore, TokenManager};
use sitecheck_core::cache::CacheManager;
use sitecheck_core::config::Config;
use sitecheck_core::models::Permit;

const USAGE: &str = "\
sitecheck - field client for excavation permit inspections

USAGE:
    sitecheck login
    sitecheck logout
    sitecheck permits [SEARCH]
    sitecheck permit <PERMIT_REF>
    sitecheck inspection (save|submit) <PERMIT_REF> <FORM.json>
    sitecheck samples (save|submit) <PERMIT_REF> <FORM.json>

Set RUST_LOG to control log verbosity (e.g. RUST_LOG=debug).
Set SITECHECK_API_URL to point at a different backend.";

/// Initialize tracing: warnings to stderr, full log to a file in the cache
/// directory. Returns the appender guard, which must stay alive for the
/// file layer to flush.
fn init_tracing(config: &Config) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let file_layer = config.cache_dir().ok().map(|dir| {
        let appender = tracing_appender::rolling::never(dir, "sitecheck.log");
        tracing_appender::non_blocking(appender)
    });

    match file_layer {
        Some((writer, guard)) => {
            tracing_subscriber::registry()
                .with(fmt::layer().with_writer(io::stderr))
                .with(fmt::layer().with_writer(writer).with_ansi(false))
                .with(filter)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry()
                .with(fmt::layer().with_writer(io::stderr))
                .with(filter)
                .init();
            None
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let mut config = Config::load()?;
    let _log_guard = init_tracing(&config);
    info!("sitecheck starting");

    let base_url = config.resolve_base_url();
    let store = Arc::new(KeyringTokenStore::new());
    let tokens = Arc::new(TokenManager::new(store, &base_url).map_err(|e| anyhow!(e))?);
    let cache = Arc::new(CacheManager::new(config.cache_dir()?)?);
    let client = ApiClient::new(&base_url, tokens)
        .map_err(|e| anyhow!(e))?
        .with_cache(cache.clone());

    let args: Vec<String> = std::env::args().skip(1).collect();
    let result = match args.first().map(String::as_str) {
        Some("login") => cmd_login(&client, &mut config).await,
        Some("logout") => cmd_logout(&client).await,
        Some("permits") => cmd_permits(&client, &cache, args.get(1).map(String::as_str)).await,
        Some("permit") => match args.get(1) {
            Some(permit_ref) => cmd_permit(&client, permit_ref).await,
            None => usage(),
        },
        Some("inspection") => cmd_form(&client, &args, FormKind::Inspection).await,
        Some("samples") => cmd_form(&client, &args, FormKind::SampleTesting).await,
        _ => usage(),
    };

    if let Err(err) = &result {
        if let Some(api_err) = err.downcast_ref::<ApiError>() {
            if api_err.is_session_expired() {
                eprintln!("Session expired. Run `sitecheck login` to sign in again.");
                std::process::exit(1);
            }
        }
    }
    result
}

fn usage() -> Result<()> {
    eprintln!("{}", USAGE);
    std::process::exit(2);
}

async fn cmd_login(client: &ApiClient, config: &mut Config) -> Result<()> {
    let username = prompt_username(config.last_username.as_deref())?;
    let password = rpassword::prompt_password("Password: ")?;

    let profile = client.login(&username, &password).await?;

    config.last_username = Some(username.clone());
    config.save()?;

    println!(
        "Signed in as {} ({} license)",
        profile.username,
        profile.license_display()
    );
    Ok(())
}

async fn cmd_logout(client: &ApiClient) -> Result<()> {
    client.logout().await?;
    println!("Signed out.");
    Ok(())
}

async fn cmd_permits(client: &ApiClient, cache: &CacheManager, search: Option<&str>) -> Result<()> {
    let search = search.unwrap_or("");
    match client.list_permits(search).await {
        Ok(permits) => {
            print_permit_list(&permits);
            Ok(())
        }
        // Offline: fall back to the cached list rather than failing the
        // command outright.
        Err(ApiError::Network(err)) => {
            if let Some(cached) = cache.load_permits()? {
                eprintln!(
                    "Offline ({}). Showing cached permits from {}m ago.",
                    err,
                    cached.age_minutes().max(0)
                );
                print_permit_list(&cached.data);
                Ok(())
            } else {
                Err(anyhow!(ApiError::Network(err)))
            }
        }
        Err(err) => Err(err.into()),
    }
}

async fn cmd_permit(client: &ApiClient, permit_ref: &str) -> Result<()> {
    let permit = client.get_permit(permit_ref).await?;

    println!("{}  [{}]", permit.permit_number, permit.status);
    println!("  works type:       {}", permit.works_type);
    println!("  address:          {}", permit.address);
    println!("  authority:        {}", permit.highway_authority);
    println!("  proximity risk:   {}", permit.proximity_risk_assessment);
    println!("  inspection:       {}", permit.inspection_status);
    if let Some(results) = &permit.inspection_results {
        println!(
            "    bituminous: {}, sub-base: {}",
            results.bituminous, results.sub_base
        );
    }
    println!("  sample testing:   {}", permit.sample_status);
    Ok(())
}

enum FormKind {
    Inspection,
    SampleTesting,
}

async fn cmd_form(client: &ApiClient, args: &[String], kind: FormKind) -> Result<()> {
    let (Some(action), Some(permit_ref), Some(file)) = (args.get(1), args.get(2), args.get(3))
    else {
        return usage();
    };

    let form_data = read_form_file(Path::new(file))?;
    let receipt = match (kind, action.as_str()) {
        (FormKind::Inspection, "save") => client.save_inspection(permit_ref, form_data).await?,
        (FormKind::Inspection, "submit") => client.submit_inspection(permit_ref, form_data).await?,
        (FormKind::SampleTesting, "save") => {
            client.save_sample_testing(permit_ref, form_data).await?
        }
        (FormKind::SampleTesting, "submit") => {
            client.submit_sample_testing(permit_ref, form_data).await?
        }
        _ => return usage(),
    };

    println!("{} (status: {})", receipt.message, receipt.status);
    Ok(())
}

fn read_form_file(path: &Path) -> Result<serde_json::Value> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read form file: {}", path.display()))?;
    serde_json::from_str(&contents)
        .with_context(|| format!("Form file is not valid JSON: {}", path.display()))
}

fn prompt_username(last: Option<&str>) -> Result<String> {
    match last {
        Some(last) => print!("Username [{}]: ", last),
        None => print!("Username: "),
    }
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    let trimmed = input.trim();

    if trimmed.is_empty() {
        last.map(str::to_string)
            .ok_or_else(|| anyhow!("Username is required"))
    } else {
        Ok(trimmed.to_string())
    }
}

fn print_permit_list(permits: &[Permit]) {
    if permits.is_empty() {
        println!("No permits found.");
        return;
    }
    for permit in permits {
        let risk_marker = if permit.is_elevated_risk() { "!" } else { " " };
        println!(
            "{} {:<16} {:<10} inspection: {:<10} samples: {}",
            risk_marker,
            permit.permit_number,
            permit.status,
            permit.inspection_status,
            permit.sample_status
        );
    }
    println!("{} permit(s)", permits.len());
}
