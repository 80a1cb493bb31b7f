//! trackbridge - query Bugzilla and Jira trackers from the command line.

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::Parser;
use futures::StreamExt;
use tracing::{error, info};

use trackbridge::auth::{self, CredentialProvider, EnvCredentials, KeyringCredentials};
use trackbridge::{logging, Config, Issue, SearchCriteria, Session};

#[derive(Parser, Debug)]
#[command(name = "trackbridge")]
#[command(about = "Search Bugzilla and Jira issue trackers")]
#[command(version)]
struct Args {
    /// Path to config file (default: $XDG_CONFIG_HOME/trackbridge/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Fetch a single issue by id instead of searching
    #[arg(short, long, conflicts_with_all = ["query", "param"])]
    issue: Option<String>,

    /// Free-text query, replacing the configured search
    #[arg(short, long)]
    query: Option<String>,

    /// Extra search parameter as name=value; may be repeated
    #[arg(short, long, value_parser = parse_param)]
    param: Vec<(String, String)>,

    /// Stop after this many issues
    #[arg(short, long)]
    limit: Option<usize>,

    /// Download an attachment by id or URL and write it to stdout
    #[arg(long, conflicts_with_all = ["issue", "query", "param"])]
    attachment: Option<String>,

    /// Read a password from stdin and store it in the OS keyring
    #[arg(long)]
    save_password: bool,
}

fn parse_param(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((name, value)) if !name.trim().is_empty() => {
            Ok((name.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected name=value, got '{}'", raw)),
    }
}

fn criteria_from(args: &Args, config: &Config) -> SearchCriteria {
    let mut criteria = match &args.query {
        Some(query) => SearchCriteria::query(query.as_str()),
        None => config.search_criteria(),
    };
    for (name, value) in &args.param {
        criteria.add(name.as_str(), value.as_str());
    }
    criteria
}

fn credential_provider() -> Arc<dyn CredentialProvider> {
    let env = EnvCredentials::new();
    if env.is_available() {
        Arc::new(env)
    } else {
        Arc::new(KeyringCredentials)
    }
}

fn print_issue(out: &mut impl Write, issue: &Issue) -> io::Result<()> {
    let assignee = issue
        .assignee
        .as_ref()
        .map(|u| u.display_name())
        .unwrap_or("-");
    writeln!(
        out,
        "{}\t{}\t{}\t{}",
        issue.id, issue.status.name, assignee, issue.summary
    )?;
    for failure in issue.failures() {
        writeln!(out, "\t! {}", failure)?;
    }
    Ok(())
}

async fn run(args: Args) -> anyhow::Result<()> {
    let config = Config::load(args.config.as_deref()).context("Failed to load configuration")?;

    if args.save_password {
        let mut secret = String::new();
        io::stdin().lock().read_line(&mut secret)?;
        auth::store_secret(&config.backend, secret.trim_end())?;
        println!("Password stored for {}", config.backend.keyring_user());
        return Ok(());
    }

    let criteria = criteria_from(&args, &config);
    let mut session = Session::new(config, credential_provider());
    session.open().await?;

    let outcome = query(&session, &args, &criteria).await;
    session.close().await?;
    outcome
}

async fn query(session: &Session, args: &Args, criteria: &SearchCriteria) -> anyhow::Result<()> {
    let mut out = io::stdout().lock();

    if let Some(id) = &args.attachment {
        let content = session.get_attachment_content(id).await?;
        out.write_all(&content)?;
        return Ok(());
    }

    if let Some(id) = &args.issue {
        let issue = session.get_issue(id).await?;
        print_issue(&mut out, &issue)?;
        if !issue.description.is_empty() {
            writeln!(out, "\n{}", issue.description)?;
        }
        for comment in issue.comments() {
            writeln!(out, "\n[{}] {}:\n{}", comment.created, comment.author, comment.text)?;
        }
        return Ok(());
    }

    if criteria.is_empty() {
        bail!("No search parameters; pass --query or --param, or add a [search] section");
    }

    let mut issues = session.search_bugs(criteria);
    let mut printed = 0usize;
    let mut failed = 0usize;
    while let Some(result) = issues.next().await {
        match result {
            Ok(issue) => {
                print_issue(&mut out, &issue)?;
                printed += 1;
                if args.limit.is_some_and(|limit| printed >= limit) {
                    break;
                }
            }
            Err(e) => {
                error!(error = %e, "Issue could not be retrieved");
                failed += 1;
            }
        }
    }
    info!(printed, failed, "Search finished");
    if failed > 0 {
        eprintln!("{} issue(s) could not be retrieved", failed);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if let Err(e) = logging::init() {
        eprintln!("Warning: Failed to initialize logging: {}", e);
    }

    let result = run(args).await;
    logging::shutdown();
    result
}
