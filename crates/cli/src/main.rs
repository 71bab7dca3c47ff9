//! Field and administration CLI for fishlore.

mod api_client;

use anyhow::{Context, Result};
use api_client::{
    ApiClient, ConfirmUploadRequest, CreateTokenRequest, FishSummary, PurgeJobResponse,
    PurgeStats, SearchQuery, SignUploadRequest, TriggerPurgeRequest,
};
use clap::{Args, Parser, Subcommand};
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use fishlore_core::MediaKind;
use fishlore_core::token::parse_scopes;
use std::collections::BTreeMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;
use time::OffsetDateTime;

/// How often `purge run --wait` polls the job.
const PURGE_POLL_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Parser)]
#[command(name = "fishctl")]
#[command(about = "Field and administration CLI for fishlore")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone)]
struct ClientConfigArgs {
    /// Client config file path
    #[arg(long, env = "FISHLORE_CLIENT_CONFIG")]
    client_config: Option<String>,
}

#[derive(Args, Clone)]
struct ApiArgs {
    /// Server API URL (overrides client config)
    #[arg(long)]
    server: Option<String>,

    /// API token (overrides client config)
    #[arg(long)]
    token: Option<String>,

    /// Server profile to use from client config (default: default_server)
    #[arg(long)]
    profile: Option<String>,

    #[command(flatten)]
    client: ClientConfigArgs,
}

#[derive(Subcommand)]
enum Commands {
    /// Log in to a server and save credentials locally
    Login {
        /// Local alias for the server
        alias: String,
        /// API base URL (e.g., https://fish.example.org)
        url: String,
        /// Token value (avoid if possible; prefer --token-stdin)
        #[arg(long)]
        token: Option<String>,
        /// Read token from stdin
        #[arg(long, default_value_t = false)]
        token_stdin: bool,
        /// Make this the default server
        #[arg(long, default_value_t = false)]
        set_default: bool,
        #[command(flatten)]
        client: ClientConfigArgs,
    },
    /// Select the default server profile
    Use {
        /// Server alias to select
        alias: String,
        #[command(flatten)]
        client: ClientConfigArgs,
    },
    /// Show current token identity
    Whoami {
        #[command(flatten)]
        api: ApiArgs,
    },
    /// Check server health and version
    Health {
        #[command(flatten)]
        api: ApiArgs,
    },
    /// Search the catalog
    Search {
        /// Free text matched against names
        query: Option<String>,
        #[arg(long)]
        tribe: Option<String>,
        #[arg(long)]
        location: Option<String>,
        /// Capture method
        #[arg(long)]
        method: Option<String>,
        /// Food or taboo category
        #[arg(long)]
        category: Option<String>,
        /// Resume after this fish id
        #[arg(long)]
        last_id: Option<i64>,
        #[arg(long)]
        per_page: Option<u32>,
        /// Follow cursors until the last page
        #[arg(long, default_value_t = false)]
        all: bool,
        #[command(flatten)]
        api: ApiArgs,
    },
    /// Show a fish with its captures, classifications and media
    Show {
        fish_id: i64,
        #[command(flatten)]
        api: ApiArgs,
    },
    /// List distinct filter values
    Facets {
        #[command(flatten)]
        api: ApiArgs,
    },
    /// Upload an audio or image file for a fish
    Upload {
        fish_id: i64,
        /// File to upload
        file: PathBuf,
        /// Media kind (audio or image)
        #[arg(long, default_value = "audio")]
        kind: String,
        /// Content type (default: guessed from the file extension)
        #[arg(long)]
        content_type: Option<String>,
        #[arg(long)]
        title: Option<String>,
        /// Playback length in milliseconds (audio only)
        #[arg(long)]
        duration_ms: Option<u64>,
        #[command(flatten)]
        api: ApiArgs,
    },
    /// Media management commands
    Media {
        #[command(subcommand)]
        command: MediaCommands,
        #[command(flatten)]
        api: ApiArgs,
    },
    /// Token management commands
    Token {
        #[command(subcommand)]
        command: TokenCommands,
        #[command(flatten)]
        api: ApiArgs,
    },
    /// Pending upload purge commands
    Purge {
        #[command(subcommand)]
        command: PurgeCommands,
        #[command(flatten)]
        api: ApiArgs,
    },
    /// Check that every media row has its stored object
    Audit {
        #[command(flatten)]
        api: ApiArgs,
    },
}

#[derive(Subcommand)]
enum MediaCommands {
    /// List a fish's media
    List { fish_id: i64 },
    /// Delete a media file
    Delete { media_id: i64 },
}

#[derive(Subcommand)]
enum TokenCommands {
    /// Generate a token offline (outputs secret + hash)
    Generate {
        /// Description for the token
        #[arg(short, long)]
        description: Option<String>,
    },
    /// Create a new token
    Create {
        /// Scopes to grant (comma-separated: catalog:read, catalog:write, catalog:admin)
        #[arg(short, long)]
        scopes: String,
        /// Expiration in seconds
        #[arg(short, long)]
        expires_in: Option<u64>,
        /// Description
        #[arg(short, long)]
        description: Option<String>,
    },
    /// List tokens
    List,
    /// Revoke a token
    Revoke {
        /// Token ID to revoke
        token_id: String,
    },
}

#[derive(Subcommand)]
enum PurgeCommands {
    /// Start a purge of stale pending uploads
    Run {
        /// Report what would be deleted without deleting
        #[arg(long, default_value_t = false)]
        dry_run: bool,
        /// Wait for job completion
        #[arg(long, default_value_t = false)]
        wait: bool,
    },
    /// Show purge status
    Status {
        /// Job ID (optional, shows recent jobs if not specified)
        job_id: Option<String>,
        /// Maximum number of jobs to return
        #[arg(long)]
        limit: Option<u32>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let Cli { command } = Cli::parse();

    match command {
        Commands::Login {
            alias,
            url,
            token,
            token_stdin,
            set_default,
            client,
        } => handle_login_command(&alias, &url, token, token_stdin, set_default, &client).await,
        Commands::Use { alias, client } => handle_use_command(&alias, &client).await,
        Commands::Whoami { api } => handle_whoami_command(&api).await,
        Commands::Health { api } => handle_health_command(&api).await,
        Commands::Search {
            query,
            tribe,
            location,
            method,
            category,
            last_id,
            per_page,
            all,
            api,
        } => {
            let query = SearchQuery {
                q: query,
                tribe,
                location,
                method,
                category,
                last_id,
                per_page,
            };
            handle_search_command(query, all, &api).await
        }
        Commands::Show { fish_id, api } => handle_show_command(fish_id, &api).await,
        Commands::Facets { api } => handle_facets_command(&api).await,
        Commands::Upload {
            fish_id,
            file,
            kind,
            content_type,
            title,
            duration_ms,
            api,
        } => {
            let upload = UploadArgs {
                fish_id,
                file,
                kind,
                content_type,
                title,
                duration_ms,
            };
            handle_upload_command(upload, &api).await
        }
        Commands::Media { command, api } => handle_media_command(command, &api).await,
        Commands::Token { command, api } => handle_token_command(command, &api).await,
        Commands::Purge { command, api } => handle_purge_command(command, &api).await,
        Commands::Audit { api } => handle_audit_command(&api).await,
    }
}

/// Resolve the server URL and token: flags, then env vars, then the client config.
async fn resolve_api_config(api: &ApiArgs) -> Result<(String, Option<String>)> {
    let server = api
        .server
        .clone()
        .or_else(|| std::env::var("FISHLORE_SERVER").ok());
    let token = api
        .token
        .clone()
        .or_else(|| std::env::var("FISHLORE_TOKEN").ok());

    if let Some(server) = server {
        return Ok((server, token));
    }

    let config_path = client_config_path(api.client.client_config.as_deref())?;
    let config = load_client_config(&config_path).await?;

    let profile_name = api
        .profile
        .as_ref()
        .or(config.default_server.as_ref())
        .ok_or_else(|| {
            anyhow::anyhow!("no server given: use --server, FISHLORE_SERVER or `fishctl login`")
        })?;

    let profile = config
        .servers
        .get(profile_name)
        .ok_or_else(|| anyhow::anyhow!("profile '{}' not found in client config", profile_name))?;

    Ok((profile.url.clone(), token.or_else(|| profile.token.clone())))
}

async fn get_api_client(api: &ApiArgs) -> Result<ApiClient> {
    let (server, token) = resolve_api_config(api).await?;
    let base_url = normalize_base_url(&server)?;
    ApiClient::new(&base_url, token.as_deref())
}

async fn handle_whoami_command(api: &ApiArgs) -> Result<()> {
    let client = get_api_client(api).await?;
    let whoami = client.whoami().await?;

    println!("Token ID: {}", whoami.token_id);
    println!("Scopes: {}", whoami.scopes.join(", "));
    if let Some(expires_at) = &whoami.expires_at {
        println!("Expires: {}", expires_at);
    } else {
        println!("Expires: never");
    }
    if let Some(description) = &whoami.description {
        println!("Description: {}", description);
    }
    Ok(())
}

async fn handle_health_command(api: &ApiArgs) -> Result<()> {
    let client = get_api_client(api).await?;
    let health = client.health().await.context("health check failed")?;

    println!("Status: {}", health.status);
    println!("Server version: {}", health.version);
    println!("Client version: {}", env!("CARGO_PKG_VERSION"));

    if health.version != env!("CARGO_PKG_VERSION") {
        eprintln!(
            "Warning: version mismatch (server: {}, client: {})",
            health.version,
            env!("CARGO_PKG_VERSION")
        );
    }
    Ok(())
}

async fn handle_search_command(mut query: SearchQuery, all: bool, api: &ApiArgs) -> Result<()> {
    let client = get_api_client(api).await?;
    let mut printed = 0usize;

    loop {
        let page = client.search_fish(&query).await?;
        if printed == 0 && page.items.is_empty() {
            println!("No fish found.");
            return Ok(());
        }
        if printed == 0 {
            println!("{:<8} {:<30} {:<30} Common name", "ID", "Name", "Scientific name");
            println!("{}", "-".repeat(90));
        }
        for fish in &page.items {
            print_fish_row(fish);
        }
        printed += page.items.len();

        match page.page_info.next_cursor {
            Some(cursor) if all => query.last_id = Some(cursor),
            Some(cursor) => {
                println!("\nMore results: --last-id {cursor}");
                break;
            }
            None => break,
        }
    }

    tracing::debug!(printed, "search finished");
    Ok(())
}

fn print_fish_row(fish: &FishSummary) {
    println!(
        "{:<8} {:<30} {:<30} {}",
        fish.id,
        fish.name,
        fish.scientific_name.as_deref().unwrap_or("-"),
        fish.common_name.as_deref().unwrap_or("-")
    );
}

async fn handle_show_command(fish_id: i64, api: &ApiArgs) -> Result<()> {
    let client = get_api_client(api).await?;
    let detail = client.get_fish(fish_id).await?;
    let fish = &detail.fish;

    println!("{} (#{})", fish.name, fish.id);
    if let Some(scientific) = &fish.scientific_name {
        println!("  Scientific name: {scientific}");
    }
    if let Some(common) = &fish.common_name {
        println!("  Common name: {common}");
    }
    if let Some(description) = &fish.description {
        println!("  Description: {description}");
    }
    println!("  Updated: {}", fish.updated_at);

    if !detail.captures.is_empty() {
        println!("\nCaptures:");
        for capture in &detail.captures {
            println!(
                "  #{:<6} {:<16} {:<20} {:<16} {}",
                capture.id,
                capture.tribe,
                capture.location,
                capture.method,
                capture.captured_on.as_deref().unwrap_or("-")
            );
        }
    }

    if !detail.classifications.is_empty() {
        println!("\nClassifications:");
        for classification in &detail.classifications {
            println!(
                "  #{:<6} {:<16} {:<12} local name: {}, processing: {}",
                classification.id,
                classification.tribe,
                classification.category,
                classification.local_name.as_deref().unwrap_or("-"),
                classification.processing_method.as_deref().unwrap_or("-")
            );
        }
    }

    if !detail.media.is_empty() {
        println!("\nMedia:");
        for media in &detail.media {
            println!(
                "  #{:<6} {:<6} {:>10} {}",
                media.id,
                media.kind,
                format_bytes(media.size_bytes.max(0) as u64),
                media.url
            );
        }
    }
    Ok(())
}

async fn handle_facets_command(api: &ApiArgs) -> Result<()> {
    let client = get_api_client(api).await?;
    let facets = client.get_facets().await?;

    for (label, values) in [
        ("Tribes", &facets.tribes),
        ("Locations", &facets.locations),
        ("Methods", &facets.methods),
        ("Categories", &facets.categories),
    ] {
        if values.is_empty() {
            println!("{label}: -");
        } else {
            println!("{label}: {}", values.join(", "));
        }
    }
    Ok(())
}

struct UploadArgs {
    fish_id: i64,
    file: PathBuf,
    kind: String,
    content_type: Option<String>,
    title: Option<String>,
    duration_ms: Option<u64>,
}

/// Content type for a file, from its extension.
fn guess_content_type(kind: MediaKind, path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    let ext = match ext.as_str() {
        "jpeg" => "jpg",
        other => other,
    };
    kind.content_type_for_extension(ext)
}

async fn handle_upload_command(upload: UploadArgs, api: &ApiArgs) -> Result<()> {
    let kind: MediaKind = upload
        .kind
        .parse()
        .map_err(|_| anyhow::anyhow!("unknown media kind: {} (audio or image)", upload.kind))?;
    if kind == MediaKind::Image && upload.duration_ms.is_some() {
        anyhow::bail!("--duration-ms only applies to audio");
    }

    let content_type = match upload.content_type {
        Some(content_type) => content_type,
        None => guess_content_type(kind, &upload.file)
            .map(str::to_string)
            .ok_or_else(|| {
                let allowed: Vec<_> = kind.allowed_content_types().collect();
                anyhow::anyhow!(
                    "cannot guess content type of {}; pass --content-type (one of {})",
                    upload.file.display(),
                    allowed.join(", ")
                )
            })?,
    };

    let file_name = upload
        .file
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| anyhow::anyhow!("invalid file name: {}", upload.file.display()))?
        .to_string();
    let data = tokio::fs::read(&upload.file)
        .await
        .with_context(|| format!("failed to read {}", upload.file.display()))?;
    if data.is_empty() {
        anyhow::bail!("{} is empty", upload.file.display());
    }
    let size_bytes = data.len() as u64;

    let client = get_api_client(api).await?;
    let signed = client
        .sign_upload(
            upload.fish_id,
            kind.as_str(),
            &SignUploadRequest {
                file_name,
                content_type,
                size_bytes,
            },
        )
        .await
        .context("failed to sign upload")?;
    tracing::debug!(object_key = %signed.object_key, expires_at = %signed.expires_at, "upload signed");

    if size_bytes > signed.max_bytes {
        anyhow::bail!(
            "{} is {}, the server accepts at most {}",
            upload.file.display(),
            format_bytes(size_bytes),
            format_bytes(signed.max_bytes)
        );
    }

    println!("Uploading {} ({})...", upload.file.display(), format_bytes(size_bytes));
    client.upload_to(&signed, data).await?;

    let confirmed = client
        .confirm_upload(
            upload.fish_id,
            kind.as_str(),
            &ConfirmUploadRequest {
                object_key: signed.object_key.clone(),
                title: upload.title,
                duration_ms: upload.duration_ms,
            },
        )
        .await
        .context("failed to confirm upload")?;

    if confirmed.already_confirmed {
        println!("Upload was already confirmed.");
    } else {
        println!("Upload confirmed.");
    }
    println!("  Media ID: {}", confirmed.media.id);
    println!("  Object: {}", confirmed.media.object_key);
    println!("  URL: {}", confirmed.media.url);
    Ok(())
}

async fn handle_media_command(command: MediaCommands, api: &ApiArgs) -> Result<()> {
    let client = get_api_client(api).await?;

    match command {
        MediaCommands::List { fish_id } => {
            let media = client.list_media(fish_id).await?;
            if media.is_empty() {
                println!("No media found.");
                return Ok(());
            }
            println!(
                "{:<8} {:<6} {:<12} {:>10} {:<24} URL",
                "ID", "Kind", "Type", "Size", "Title"
            );
            println!("{}", "-".repeat(100));
            for m in media {
                println!(
                    "{:<8} {:<6} {:<12} {:>10} {:<24} {}",
                    m.id,
                    m.kind,
                    m.content_type,
                    format_bytes(m.size_bytes.max(0) as u64),
                    m.title.as_deref().unwrap_or("-"),
                    m.url
                );
            }
        }
        MediaCommands::Delete { media_id } => {
            client.delete_media(media_id).await?;
            println!("Media deleted: {media_id}");
        }
    }
    Ok(())
}

async fn handle_token_command(command: TokenCommands, api: &ApiArgs) -> Result<()> {
    match command {
        TokenCommands::Generate { description } => {
            handle_token_generate(description);
            Ok(())
        }
        TokenCommands::Create {
            scopes,
            expires_in,
            description,
        } => {
            let scopes_vec: Vec<String> = scopes
                .split(',')
                .map(|s| s.trim())
                .filter(|s| !s.is_empty())
                .map(|s| s.to_string())
                .collect();
            parse_scopes(&scopes_vec).context("invalid --scopes")?;

            let client = get_api_client(api).await?;
            let response = client
                .create_token(CreateTokenRequest {
                    scopes: scopes_vec,
                    expires_in,
                    description,
                })
                .await?;

            println!("Token created successfully!");
            println!("\nToken ID: {}", response.token_id);
            println!("Token secret: {}", response.token_secret);
            println!("Scopes: {}", response.scopes.join(", "));
            println!("\nIMPORTANT: Save this token secret now. It cannot be recovered.");
            if let Some(expires) = response.expires_at {
                println!("Expires: {expires}");
            }
            Ok(())
        }
        TokenCommands::List => {
            let client = get_api_client(api).await?;
            let tokens = client.list_tokens().await?;

            if tokens.is_empty() {
                println!("No tokens found.");
                return Ok(());
            }

            println!(
                "{:<38} {:<28} {:<10} {:<22} {:<22} {:<22} Description",
                "ID", "Scopes", "Status", "Created", "Expires", "Last Used"
            );
            println!("{}", "-".repeat(160));

            let now = OffsetDateTime::now_utc();
            for token in tokens {
                let status = token_status(
                    token.revoked_at.as_deref(),
                    token.expires_at.as_deref(),
                    now,
                );
                println!(
                    "{:<38} {:<28} {:<10} {:<22} {:<22} {:<22} {}",
                    token.token_id,
                    token.scopes.join(","),
                    status,
                    token.created_at,
                    token.expires_at.as_deref().unwrap_or("-"),
                    token.last_used_at.as_deref().unwrap_or("-"),
                    token.description.as_deref().unwrap_or("-")
                );
            }
            Ok(())
        }
        TokenCommands::Revoke { token_id } => {
            let client = get_api_client(api).await?;
            client.revoke_token(&token_id).await?;
            println!("Token revoked: {token_id}");
            Ok(())
        }
    }
}

fn token_status(
    revoked_at: Option<&str>,
    expires_at: Option<&str>,
    now: OffsetDateTime,
) -> &'static str {
    if revoked_at.is_some() {
        return "revoked";
    }
    let expired = expires_at
        .and_then(|t| {
            OffsetDateTime::parse(t, &time::format_description::well_known::Rfc3339).ok()
        })
        .is_some_and(|t| t < now);
    if expired { "expired" } else { "active" }
}

fn handle_token_generate(description: Option<String>) {
    let token_secret = generate_token_secret();
    let token_hash = hash_token(&token_secret);

    println!("Token generated (save the secret - it cannot be recovered):\n");
    println!("  Secret: {token_secret}");
    println!("  Hash:   sha256:{token_hash}");
    if let Some(desc) = description {
        println!("  Description: {desc}");
    }
    println!("\nAdd to server.toml:");
    println!("  [admin]");
    println!("  token_hash = \"sha256:{token_hash}\"");
}

async fn handle_purge_command(command: PurgeCommands, api: &ApiArgs) -> Result<()> {
    let client = get_api_client(api).await?;

    match command {
        PurgeCommands::Run { dry_run, wait } => {
            let response = client
                .trigger_purge(TriggerPurgeRequest {
                    dry_run: dry_run.then_some(true),
                })
                .await?;
            let mode = if response.dry_run { " (dry run)" } else { "" };
            println!("Purge job queued: {}{mode}", response.job_id);

            if wait {
                loop {
                    let job = client.get_purge_job(&response.job_id).await?;
                    match job.state.as_str() {
                        "queued" | "running" => {
                            tokio::time::sleep(PURGE_POLL_INTERVAL).await;
                        }
                        "finished" => {
                            println!("Purge completed.");
                            if let Some(stats) = &job.stats {
                                print_purge_stats(stats);
                            }
                            break;
                        }
                        "failed" => {
                            if let Some(stats) = &job.stats {
                                print_purge_stats(stats);
                            }
                            anyhow::bail!(
                                "purge failed: {}",
                                job.error.as_deref().unwrap_or("unknown error")
                            );
                        }
                        other => {
                            anyhow::bail!("unknown purge state: {other}");
                        }
                    }
                }
            }
        }
        PurgeCommands::Status { job_id, limit } => {
            if let Some(job_id) = job_id {
                let job = client.get_purge_job(&job_id).await?;
                print_purge_job(&job);
            } else {
                let jobs = client.list_purge_jobs(limit).await?;
                if jobs.is_empty() {
                    println!("No purge jobs found.");
                } else {
                    println!(
                        "{:<38} {:<10} {:<8} {:>8} Started",
                        "ID", "State", "Dry run", "Deleted"
                    );
                    println!("{}", "-".repeat(90));
                    for job in jobs {
                        println!(
                            "{:<38} {:<10} {:<8} {:>8} {}",
                            job.job_id,
                            job.state,
                            job.dry_run,
                            job.stats.as_ref().map(|s| s.deleted).unwrap_or(0),
                            job.started_at.as_deref().unwrap_or("-")
                        );
                    }
                }
            }
        }
    }

    Ok(())
}

fn print_purge_job(job: &PurgeJobResponse) {
    println!("Purge Job Status");
    println!("  ID: {}", job.job_id);
    println!("  State: {}", job.state);
    println!("  Dry run: {}", job.dry_run);
    if let Some(started) = &job.started_at {
        println!("  Started: {started}");
    }
    if let Some(finished) = &job.finished_at {
        println!("  Finished: {finished}");
    }
    if let Some(error) = &job.error {
        println!("  Error: {error}");
    }
    if let Some(stats) = &job.stats {
        print_purge_stats(stats);
    }
}

fn print_purge_stats(stats: &PurgeStats) {
    println!("  Stats:");
    println!("    Scanned: {}", stats.scanned);
    println!("    Deleted: {}", stats.deleted);
    println!("    Bytes reclaimed: {}", format_bytes(stats.bytes_reclaimed));
    println!("    Skipped (fresh): {}", stats.skipped_fresh);
    println!("    Errors: {}", stats.errors);
}

async fn handle_audit_command(api: &ApiArgs) -> Result<()> {
    let client = get_api_client(api).await?;
    let report = client.audit_media().await?;

    println!("Checked: {}", report.checked);
    println!("Missing: {}", report.missing.len());
    println!("Errors: {}", report.errors);
    for missing in &report.missing {
        println!(
            "  media #{} (fish #{}): {}",
            missing.media_id, missing.fish_id, missing.object_key
        );
    }

    if !report.missing.is_empty() {
        anyhow::bail!("{} media objects are missing", report.missing.len());
    }
    Ok(())
}

fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

#[derive(Debug, serde::Serialize, serde::Deserialize, Default)]
#[serde(default)]
struct ClientConfig {
    default_server: Option<String>,
    servers: BTreeMap<String, ServerProfile>,
}

#[derive(Debug, serde::Serialize, serde::Deserialize, Clone)]
struct ServerProfile {
    url: String,
    token: Option<String>,
    token_id: Option<String>,
}

async fn handle_login_command(
    alias: &str,
    url: &str,
    token: Option<String>,
    token_stdin: bool,
    set_default: bool,
    client: &ClientConfigArgs,
) -> Result<()> {
    let token = read_token(token, token_stdin)?;
    let base_url = normalize_base_url(url)?;
    let config_path = client_config_path(client.client_config.as_deref())?;

    let api = ApiClient::new(&base_url, Some(&token))?;
    let whoami = api.whoami().await.context("whoami failed")?;

    let mut config = load_client_config(&config_path).await?;
    config.servers.insert(
        alias.to_string(),
        ServerProfile {
            url: base_url.clone(),
            token: Some(token),
            token_id: Some(whoami.token_id.clone()),
        },
    );

    if set_default || config.default_server.is_none() {
        config.default_server = Some(alias.to_string());
    }

    save_client_config(&config_path, &config).await?;

    println!("Logged in as '{alias}'");
    println!("  URL: {base_url}");
    println!("  Scopes: {}", whoami.scopes.join(", "));
    if !whoami
        .scopes
        .iter()
        .any(|s| s == "catalog:write" || s == "catalog:admin")
    {
        eprintln!("Warning: token lacks catalog:write; uploads will fail.");
    }
    println!("Client config: {}", config_path.display());

    Ok(())
}

async fn handle_use_command(alias: &str, client: &ClientConfigArgs) -> Result<()> {
    let config_path = client_config_path(client.client_config.as_deref())?;
    let mut config = load_client_config(&config_path).await?;

    if !config.servers.contains_key(alias) {
        anyhow::bail!("unknown server alias: {alias}");
    }
    config.default_server = Some(alias.to_string());
    save_client_config(&config_path, &config).await?;

    println!("Selected server: {alias}");
    Ok(())
}

fn client_config_path(explicit: Option<&str>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(PathBuf::from(path));
    }

    if let Some(path) = std::env::var_os("FISHLORE_CLIENT_CONFIG") {
        return Ok(PathBuf::from(path));
    }

    let base = match std::env::var_os("XDG_CONFIG_HOME") {
        Some(path) => PathBuf::from(path),
        None => {
            let home = std::env::var_os("HOME")
                .ok_or_else(|| anyhow::anyhow!("HOME not set; set FISHLORE_CLIENT_CONFIG"))?;
            PathBuf::from(home).join(".config")
        }
    };

    Ok(base.join("fishlore").join("client.toml"))
}

async fn load_client_config(path: &Path) -> Result<ClientConfig> {
    if !path.exists() {
        return Ok(ClientConfig::default());
    }

    Figment::new()
        .merge(Toml::file(path))
        .merge(Env::prefixed("FISHLORE_CLIENT__").split("__"))
        .extract()
        .map_err(|err| anyhow::anyhow!(err).context("failed to load client configuration"))
}

async fn save_client_config(path: &Path, config: &ClientConfig) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let contents = toml::to_string_pretty(config)?;

    tokio::fs::write(path, contents).await?;

    // The file holds tokens.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(path, perms).await?;
    }

    Ok(())
}

fn read_token(token: Option<String>, token_stdin: bool) -> Result<String> {
    if let Some(token) = token {
        return Ok(token);
    }
    if token_stdin {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        let token = buf.trim().to_string();
        if token.is_empty() {
            anyhow::bail!("token read from stdin is empty");
        }
        return Ok(token);
    }
    anyhow::bail!("token required: use --token or --token-stdin");
}

fn normalize_base_url(url: &str) -> Result<String> {
    if !url.starts_with("http://") && !url.starts_with("https://") {
        anyhow::bail!("server URL must start with http:// or https://");
    }
    Ok(url.trim_end_matches('/').to_string())
}

/// Generate a random token secret using cryptographically secure RNG.
fn generate_token_secret() -> String {
    use base64::Engine;
    use rand::RngCore;
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

/// SHA-256 of a token secret, hex encoded, as the server stores it.
fn hash_token(token: &str) -> String {
    use sha2::{Digest, Sha256};
    hex::encode(Sha256::digest(token.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn api_args(server: Option<&str>, token: Option<&str>, config: &Path) -> ApiArgs {
        ApiArgs {
            server: server.map(str::to_string),
            token: token.map(str::to_string),
            profile: None,
            client: ClientConfigArgs {
                client_config: Some(config.display().to_string()),
            },
        }
    }

    #[test]
    fn normalize_base_url_requires_scheme() {
        assert!(normalize_base_url("fish.example.org").is_err());
        assert_eq!(
            normalize_base_url("https://fish.example.org/").unwrap(),
            "https://fish.example.org"
        );
    }

    #[tokio::test]
    async fn client_config_roundtrip() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("client.toml");

        let mut config = ClientConfig {
            default_server: Some("field".to_string()),
            ..Default::default()
        };
        config.servers.insert(
            "field".to_string(),
            ServerProfile {
                url: "https://fish.example.org".to_string(),
                token: Some("token".to_string()),
                token_id: None,
            },
        );

        save_client_config(&path, &config).await.unwrap();
        let loaded = load_client_config(&path).await.unwrap();
        assert_eq!(loaded.default_server, config.default_server);
        assert_eq!(loaded.servers["field"].token.as_deref(), Some("token"));

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[tokio::test]
    async fn load_client_config_missing_returns_default() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("missing.toml");
        let config = load_client_config(&path).await.unwrap();
        assert!(config.servers.is_empty());
        assert!(config.default_server.is_none());
    }

    #[tokio::test]
    async fn resolve_prefers_flags_over_profile() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("client.toml");
        let mut config = ClientConfig {
            default_server: Some("field".to_string()),
            ..Default::default()
        };
        config.servers.insert(
            "field".to_string(),
            ServerProfile {
                url: "https://profile.example.org".to_string(),
                token: Some("profile-token".to_string()),
                token_id: None,
            },
        );
        save_client_config(&path, &config).await.unwrap();

        let (server, token) = resolve_api_config(&api_args(
            Some("https://flag.example.org"),
            Some("flag-token"),
            &path,
        ))
        .await
        .unwrap();
        assert_eq!(server, "https://flag.example.org");
        assert_eq!(token.as_deref(), Some("flag-token"));
    }

    #[tokio::test]
    async fn resolve_unknown_profile_fails() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("client.toml");
        save_client_config(
            &path,
            &ClientConfig {
                default_server: Some("gone".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let mut args = api_args(None, None, &path);
        args.profile = Some("missing".to_string());
        if std::env::var_os("FISHLORE_SERVER").is_none() {
            assert!(resolve_api_config(&args).await.is_err());
        }
    }

    #[test]
    fn read_token_prefers_flag() {
        assert_eq!(
            read_token(Some("flag".to_string()), true).unwrap(),
            "flag"
        );
        assert!(read_token(None, false).is_err());
    }

    #[test]
    fn guess_content_type_from_extension() {
        assert_eq!(
            guess_content_type(MediaKind::Audio, Path::new("elder.MP3")),
            Some("audio/mpeg")
        );
        assert_eq!(
            guess_content_type(MediaKind::Image, Path::new("catch.jpeg")),
            Some("image/jpeg")
        );
        assert_eq!(guess_content_type(MediaKind::Image, Path::new("song.mp3")), None);
        assert_eq!(guess_content_type(MediaKind::Audio, Path::new("README")), None);
    }

    #[test]
    fn token_status_labels() {
        let now = OffsetDateTime::now_utc();
        assert_eq!(token_status(Some("2024-01-01T00:00:00Z"), None, now), "revoked");
        assert_eq!(token_status(None, Some("2000-01-01T00:00:00Z"), now), "expired");
        assert_eq!(token_status(None, Some("2999-01-01T00:00:00Z"), now), "active");
        assert_eq!(token_status(None, None, now), "active");
    }

    #[test]
    fn format_bytes_units() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KiB");
        assert_eq!(format_bytes(20 * 1024 * 1024), "20.0 MiB");
    }

    #[test]
    fn generated_token_hash_matches_sha256() {
        let secret = generate_token_secret();
        assert_eq!(secret.len(), 43);
        assert_eq!(
            hash_token("test-admin-token"),
            "17d6bfe05d1b1fb7bc499f8e3f639c7b3eda4c40f321eef8887a0c04c89a99c5"
        );
    }
}
