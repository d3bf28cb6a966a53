use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Args, CommandFactory, Parser, Subcommand};
use sunflower_core::config::{SunflowerConfig, load_config};
use sunflower_core::page::SaveOutcome;
use sunflower_core::session::WikiSession;
use sunflower_core::title::TitleOptions;
use sunflower_core::transport::ApiRequest;
use tracing::{Level, debug};

#[derive(Debug, Parser)]
#[command(
    name = "sunflower",
    version,
    about = "Command-line client for MediaWiki wikis"
)]
struct Cli {
    #[arg(
        long,
        global = true,
        value_name = "PATH",
        default_value = "sunflower.toml"
    )]
    config: PathBuf,
    #[arg(long, global = true, value_name = "URL", help = "Wiki URL or shorthand such as b:pl")]
    wiki: Option<String>,
    #[arg(short, long, global = true, help = "Log requests and continuation hops")]
    verbose: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// List the wiki's namespaces
    Namespaces,
    /// Print the canonical form of a title
    Canonicalize(CanonicalizeArgs),
    /// Print a page's current text
    Get(GetArgs),
    /// Print a page's metadata
    Info(TitleArgs),
    /// Run a raw API query, following continuations
    Query(QueryArgs),
    /// Replace a page's text with the contents of a file
    Save(SaveArgs),
    /// Show who the session is logged in as
    Whoami,
}

#[derive(Debug, Args)]
struct TitleArgs {
    title: String,
}

#[derive(Debug, Args)]
struct CanonicalizeArgs {
    title: String,
    #[arg(long, help = "Keep the first letter's case")]
    preserve_case: bool,
    #[arg(long, help = "Keep a leading colon")]
    preserve_colon: bool,
}

#[derive(Debug, Args)]
struct GetArgs {
    title: String,
    #[arg(long, value_name = "DIR", help = "Write the text to a file in DIR instead")]
    dump: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct QueryArgs {
    /// Parameters as key=value pairs
    #[arg(required = true)]
    params: Vec<String>,
    #[arg(long, help = "Result list carrying the continuation marker, e.g. backlinks")]
    field: Option<String>,
    #[arg(long, help = "Continuation parameter, e.g. blcontinue")]
    param: Option<String>,
    #[arg(long, value_name = "N", help = "Stop after N calls")]
    limit: Option<usize>,
}

#[derive(Debug, Args)]
struct SaveArgs {
    title: String,
    #[arg(long, value_name = "PATH")]
    file: PathBuf,
    #[arg(short, long)]
    summary: Option<String>,
    #[arg(long, value_name = "TITLE", help = "Save under another title")]
    to: Option<String>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let Some(command) = cli.command else {
        let mut command = Cli::command();
        command.print_help()?;
        println!();
        return Ok(());
    };

    let config = resolve_config(&cli.config, cli.wiki)?;
    let session = open_session(&config)?;

    match command {
        Commands::Namespaces => run_namespaces(&session),
        Commands::Canonicalize(args) => run_canonicalize(&session, args),
        Commands::Get(args) => run_get(&session, args),
        Commands::Info(TitleArgs { title }) => run_info(&session, &title),
        Commands::Query(args) => run_query(&session, args),
        Commands::Save(args) => run_save(&session, args),
        Commands::Whoami => {
            println!("{session}");
            Ok(())
        }
    }
}

fn init_tracing(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::WARN };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();
}

fn resolve_config(path: &Path, wiki: Option<String>) -> Result<SunflowerConfig> {
    dotenvy::dotenv().ok();

    let mut config = load_config(path)?;
    if wiki.is_some() {
        config.wiki.url = wiki;
    }
    Ok(config)
}

fn open_session(config: &SunflowerConfig) -> Result<WikiSession> {
    let mut session = WikiSession::connect(config)?;
    if config.credentials().is_some() {
        session.login("", "")?;
    }
    debug!(session = %session, endpoint = session.api_endpoint(), "session ready");
    Ok(session)
}

fn run_namespaces(session: &WikiSession) -> Result<()> {
    let registry = session.namespaces();
    println!("wiki: {}", session.wiki_url());
    for id in registry.ids() {
        println!(
            "{id}: {} ({})",
            registry.local_name(id).unwrap_or_default(),
            registry.canonical_name(id).unwrap_or_default()
        );
    }
    Ok(())
}

fn run_canonicalize(session: &WikiSession, args: CanonicalizeArgs) -> Result<()> {
    let title = session.canonicalize(
        &args.title,
        TitleOptions {
            preserve_case: args.preserve_case,
            preserve_colon: args.preserve_colon,
        },
    );
    println!("{title}");
    Ok(())
}

fn run_get(session: &WikiSession, args: GetArgs) -> Result<()> {
    let mut page = session.page(&args.title)?;
    match args.dump {
        Some(dir) => {
            let path = dir.join(page.dump_file_name());
            let file = fs::File::create(&path)
                .with_context(|| format!("failed to create {}", path.display()))?;
            page.dump_to(file)?;
            println!("dumped: {}", path.display());
        }
        None => println!("{}", page.text()?),
    }
    Ok(())
}

fn run_info(session: &WikiSession, title: &str) -> Result<()> {
    let mut page = session.page(title)?;
    let attrs = page.attributes()?.clone();
    println!("title: {}", page.title());
    println!("real_title: {}", attrs.real_title.as_deref().unwrap_or("<none>"));
    println!("exists: {}", format_flag(attrs.exists()));
    println!(
        "page_id: {}",
        attrs.page_id.map_or_else(|| "<none>".to_string(), |id| id.to_string())
    );
    println!(
        "namespace: {}",
        attrs.namespace.map_or_else(|| "<none>".to_string(), |ns| ns.to_string())
    );
    println!("touched: {}", attrs.touched.as_deref().unwrap_or("<none>"));
    println!(
        "last_rev_id: {}",
        attrs.last_rev_id.map_or_else(|| "<none>".to_string(), |id| id.to_string())
    );
    println!("protection: {}", serde_json::to_string(&attrs.protection)?);
    Ok(())
}

fn run_query(session: &WikiSession, args: QueryArgs) -> Result<()> {
    let mut pairs = Vec::with_capacity(args.params.len());
    for param in &args.params {
        let Some((key, value)) = param.split_once('=') else {
            bail!("expected key=value, got `{param}`");
        };
        pairs.push((key.to_string(), value.to_string()));
    }
    let request = ApiRequest::params(pairs);

    let response = match (args.field.as_deref(), args.param.as_deref()) {
        (Some(field), Some(param)) => {
            session.api_continued(request, field, param, args.limit)?
        }
        (None, None) => session.api(&request)?,
        _ => bail!("--field and --param must be given together"),
    };
    println!("{}", serde_json::to_string_pretty(&response)?);
    debug!(requests = session.request_count(), "query finished");
    Ok(())
}

fn run_save(session: &WikiSession, args: SaveArgs) -> Result<()> {
    session.require_user()?;
    let text = fs::read_to_string(&args.file)
        .with_context(|| format!("failed to read {}", args.file.display()))?;

    let mut page = session.page(&args.title)?;
    page.set_text(text)?;
    match page.save_with(args.to.as_deref(), args.summary.as_deref())? {
        SaveOutcome::Unchanged => println!("unchanged: {}", page.title()),
        SaveOutcome::Edited(response) => {
            println!("saved: {}", args.to.as_deref().unwrap_or(page.title()));
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
    }
    Ok(())
}

fn format_flag(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}
