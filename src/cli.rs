use std::error::Error;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use field_suggest::payload::{self, BuildOutcome, SuggestParams, SuggestionResult, SuggestionType};
use field_suggest::web::{self, WebConfig};
use field_suggest::{ProxyConfig, Settings, SuggestionProxy};
use serde_json::json;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "field-suggest",
    about = "Autocomplete proxy for an external suggestion service",
    version
)]
pub struct Cli {
    /// Emit JSON instead of human-readable tables.
    #[arg(long, global = true)]
    json: bool,

    /// Settings file with the API key, API URL and field mappings.
    #[arg(long, global = true, env = "FIELD_SUGGEST_CONFIG")]
    config: Option<PathBuf>,

    /// Overrides the API key from the settings file.
    #[arg(long, global = true, env = "FIELD_SUGGEST_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Overrides the upstream base URL from the settings file.
    #[arg(long, global = true, env = "FIELD_SUGGEST_API_URL")]
    api_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the suggestion proxy over HTTP.
    Serve {
        /// Address to listen on.
        #[arg(long, default_value = "127.0.0.1:8080")]
        addr: SocketAddr,
        /// Upstream request timeout in milliseconds.
        #[arg(long, default_value_t = 8000)]
        timeout_ms: u64,
    },
    /// Send one query upstream and print the suggestions.
    Suggest {
        #[command(flatten)]
        query: QueryArgs,
        /// Upstream request timeout in milliseconds.
        #[arg(long, default_value_t = 8000)]
        timeout_ms: u64,
    },
    /// Print the upstream request body for a query without sending it.
    Payload {
        #[command(flatten)]
        query: QueryArgs,
    },
    /// List the configured field mappings.
    Fields,
}

#[derive(Args, Debug)]
struct QueryArgs {
    /// Suggestion type: address, fio, email or party.
    kind: String,
    /// Text to complete.
    query: String,
    /// Granularity for address suggestions (city, street, house, ...).
    #[arg(long)]
    bound: Option<String>,
    /// Maximum number of suggestions (capped at 20).
    #[arg(long)]
    count: Option<String>,
    /// Response language.
    #[arg(long)]
    language: Option<String>,
    /// JSON array restricting results by location.
    #[arg(long)]
    locations: Option<String>,
    /// JSON array restricting results by radius around a point.
    #[arg(long)]
    locations_geo: Option<String>,
}

impl QueryArgs {
    fn params(&self) -> SuggestParams {
        SuggestParams {
            q: Some(self.query.clone()),
            count: self.count.clone(),
            language: self.language.clone(),
            bound: self.bound.clone(),
            locations: self.locations.clone(),
            locations_geo: self.locations_geo.clone(),
        }
    }
}

pub fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    init_tracing();
    let settings = load_settings(&cli)?;
    match cli.command {
        Command::Serve { addr, timeout_ms } => handle_serve(settings, addr, timeout_ms),
        Command::Suggest { query, timeout_ms } => {
            handle_suggest(settings, query, timeout_ms, cli.json)
        }
        Command::Payload { query } => handle_payload(query),
        Command::Fields => handle_fields(&settings, cli.json),
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn load_settings(cli: &Cli) -> Result<Settings, Box<dyn Error>> {
    let settings = match &cli.config {
        Some(path) => Settings::from_path(path)?,
        None => Settings::default(),
    };
    Ok(settings.with_overrides(cli.api_key.clone(), cli.api_url.clone()))
}

fn handle_serve(settings: Settings, addr: SocketAddr, timeout_ms: u64) -> Result<(), Box<dyn Error>> {
    let config = WebConfig {
        addr,
        timeout: Duration::from_millis(timeout_ms),
        settings,
    };
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(web::serve(config))?;
    Ok(())
}

fn handle_suggest(
    settings: Settings,
    query: QueryArgs,
    timeout_ms: u64,
    as_json: bool,
) -> Result<(), Box<dyn Error>> {
    let proxy = SuggestionProxy::new(
        ProxyConfig::new(settings.credential()?).with_timeout(Duration::from_millis(timeout_ms)),
    );
    let runtime = tokio::runtime::Runtime::new()?;
    let reply = runtime.block_on(proxy.handle(Some(&query.kind), &query.params()));

    if as_json {
        let payload = json!({ "status": reply.status.as_u16(), "body": reply.body });
        println!("{}", serde_json::to_string_pretty(&payload)?);
        return Ok(());
    }
    let result: SuggestionResult = serde_json::from_value(reply.body).unwrap_or_default();
    if let Some(marker) = &result.error {
        return Err(format!("upstream request failed ({marker}, HTTP {})", reply.status).into());
    }
    print_suggestions(&query.query, &result);
    Ok(())
}

fn handle_payload(query: QueryArgs) -> Result<(), Box<dyn Error>> {
    let kind = SuggestionType::resolve(Some(&query.kind));
    if kind.is_defaulted() {
        eprintln!("unknown suggestion type {:?}, using address", query.kind);
    }
    let kind = kind.into_inner();
    match payload::build(kind, &query.query, &query.params()) {
        BuildOutcome::Empty => println!("Empty query: no upstream request would be sent."),
        BuildOutcome::Payload(body) => {
            let document = json!({
                "endpoint": format!("/{kind}"),
                "body": body,
            });
            println!("{}", serde_json::to_string_pretty(&document)?);
        }
    }
    Ok(())
}

fn handle_fields(settings: &Settings, as_json: bool) -> Result<(), Box<dyn Error>> {
    if as_json {
        println!("{}", serde_json::to_string_pretty(&settings.fields)?);
        return Ok(());
    }
    if settings.fields.is_empty() {
        println!("No fields configured.");
        return Ok(());
    }
    let width = settings
        .fields
        .iter()
        .map(|field| field.field_id.len())
        .max()
        .unwrap_or(0)
        .max("FIELD_ID".len());
    println!("{:<width$}  {:<8}  {}", "FIELD_ID", "TYPE", "BOUND", width = width);
    println!("{:-<width$}  {:-<8}  {}", "", "", "-----", width = width);
    for field in &settings.fields {
        println!(
            "{:<width$}  {:<8}  {}",
            field.field_id,
            field.kind.as_str(),
            field.restricting_bound().unwrap_or("-"),
            width = width
        );
    }
    Ok(())
}

fn print_suggestions(query: &str, result: &SuggestionResult) {
    if result.is_empty() {
        println!("No suggestions for \"{query}\".");
        return;
    }
    println!("Suggestions for \"{query}\":");
    println!("{:>3}  {}", "#", "VALUE");
    println!("{:->3}  {}", "", "-----");
    for (index, suggestion) in result.suggestions.iter().enumerate() {
        println!("{:>3}  {}", index + 1, suggestion.value);
    }
}
