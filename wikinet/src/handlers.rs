use anyhow::{Context, Result, anyhow, bail};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use clap::ArgMatches;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use wikinet_core::cache::RevisionCache;
use wikinet_core::config::{CrawlConfig, StoreConfig};
use wikinet_core::crawl::{
    collect_page_edges, collect_user_edges, crawl_categories, crawl_page_history, monthly_dates,
};
use wikinet_core::data::Database;
use wikinet_core::report::{ReportFormat, generate_report, save_report};
use wikinet_core::select::{InterestGraph, SelectionLimits, build_interest_graph};
use wikinet_fetch::{PoolReport, ProgressCallback, WikiApiClient};

const REQUEST_TIMEOUT_SECS: u64 = 30;

// Helpers for loading crawl targets

/// Load names from a file, one per line. Blank lines and `#` comments are skipped.
pub fn load_lines_from_file(path: &Path) -> Result<Vec<String>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    let lines: Vec<String> = content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect();

    if lines.is_empty() {
        bail!("No entries found in {}", path.display());
    }

    Ok(lines)
}

/// Names given on the command line, or else the contents of `file`.
pub fn load_names_from_source(
    names: Option<Vec<String>>,
    file: Option<&PathBuf>,
    what: &str,
) -> Result<Vec<String>> {
    if let Some(path) = file {
        load_lines_from_file(path)
    } else if let Some(names) = names.filter(|n| !n.is_empty()) {
        Ok(names)
    } else {
        Err(anyhow!("At least one {} or a file of them must be provided", what))
    }
}

/// Accepts `YYYY-MM-DD` (midnight UTC) or `YYYY-MM-DD HH:MM:SS`.
pub fn parse_date(s: &str) -> Result<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Ok(dt.and_utc());
    }
    let date = NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .with_context(|| format!("Invalid date '{}', expected YYYY-MM-DD", s))?;
    Ok(date.and_time(NaiveTime::MIN).and_utc())
}

pub fn resolve_db_path(raw: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(raw).as_ref())
}

fn open_existing_database(args: &ArgMatches) -> Result<Arc<Database>> {
    let path = db_path(args);
    if !Database::exists(&path) {
        bail!(
            "No database at {}. Run `wikinet init` first.",
            path.display()
        );
    }
    let db = Database::open(&StoreConfig::new(&path))
        .with_context(|| format!("Failed to open database {}", path.display()))?;
    Ok(Arc::new(db))
}

fn db_path(args: &ArgMatches) -> PathBuf {
    let raw = args
        .get_one::<String>("db")
        .map(String::as_str)
        .unwrap_or("~/.config/wikinet/wikinet.db");
    resolve_db_path(raw)
}

pub fn crawl_config(args: &ArgMatches) -> CrawlConfig {
    let mut config = CrawlConfig::default();
    if let Ok(Some(lang)) = args.try_get_one::<String>("lang") {
        config = config.with_lang(lang.clone());
    }
    if let Ok(Some(threads)) = args.try_get_one::<usize>("threads") {
        config = config.with_workers(*threads);
    }
    if let Ok(Some(secs)) = args.try_get_one::<u64>("drain-timeout") {
        config = config.with_drain_timeout(Duration::from_secs(*secs));
    }
    config
}

fn selection_limits(args: &ArgMatches) -> SelectionLimits {
    SelectionLimits {
        use_shortest_paths: !args.get_flag("no-shortest-paths"),
        ..SelectionLimits::default()
    }
}

fn category_names(args: &ArgMatches) -> Result<Vec<String>> {
    let names = args
        .get_many::<String>("category")
        .map(|v| v.cloned().collect());
    load_names_from_source(names, args.get_one::<PathBuf>("categories-file"), "--category")
}

fn wiki_client(config: &CrawlConfig) -> Result<WikiApiClient> {
    WikiApiClient::with_timeout(&config.lang, REQUEST_TIMEOUT_SECS)
        .map(|c| c.with_page_size(config.page_size))
        .context("Failed to build HTTP client")
}

/// Progress bar over `total` pool tasks, driven by the pool's completion callback.
fn progress_bar(total: usize, quiet: bool) -> Result<(Option<ProgressBar>, Option<ProgressCallback>)> {
    if quiet {
        return Ok((None, None));
    }

    let pb = ProgressBar::new(total as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.cyan} [{bar:30.cyan/blue}] {pos}/{len} {msg}")?
            .progress_chars("=> "),
    );
    pb.enable_steady_tick(Duration::from_millis(100));

    let pb_clone = pb.clone();
    let callback: ProgressCallback = Arc::new(move |done: usize, label: String| {
        pb_clone.set_position(done as u64);
        pb_clone.set_message(label);
    });
    Ok((Some(pb), Some(callback)))
}

fn finish_progress(pb: Option<ProgressBar>) {
    if let Some(pb) = pb {
        pb.finish_and_clear();
    }
}

pub fn print_banner() {
    print_divider();
    println!("{}", "  WIKINET".bright_white().bold());
    println!("  {}", "interest graphs from wiki history".bright_black());
    print_divider();
    println!();
}

fn print_divider() {
    println!("{}", "═".repeat(60).bright_blue().bold());
}

fn print_prompt(msg: &str) -> Result<String> {
    print!("{} ", msg.bright_cyan().bold());
    io::stdout().flush()?;
    let mut response = String::new();
    io::stdin().read_line(&mut response)?;
    Ok(response.trim().to_lowercase())
}

fn print_pool_report(what: &str, report: &PoolReport) {
    println!(
        "{} {}: {} of {} succeeded",
        "✓".green().bold(),
        what,
        report.succeeded(),
        report.submitted
    );
    for failure in &report.failures {
        println!(
            "  {} {}: {}",
            "✗".red(),
            failure.label.bright_white(),
            failure.message
        );
    }
    if report.timed_out > 0 {
        println!(
            "  {} {} tasks still running at the deadline",
            "⚠".yellow().bold(),
            report.timed_out
        );
    }
}

fn emit_report(graph: &InterestGraph, args: &ArgMatches) -> Result<()> {
    let format = args
        .get_one::<String>("format")
        .and_then(|f| ReportFormat::from_str(f))
        .unwrap_or(ReportFormat::Text);
    let report = generate_report(graph, format)?;

    match args.get_one::<PathBuf>("output") {
        Some(path) => {
            save_report(&report, path)
                .with_context(|| format!("Failed to write report to {}", path.display()))?;
            println!(
                "{} Report saved to {}",
                "✓".green().bold(),
                path.display().to_string().bright_white()
            );
        }
        None => print!("{}", report),
    }
    Ok(())
}

// Command handlers

pub fn handle_init(args: &ArgMatches) -> Result<()> {
    let force = args.get_flag("force");
    let path = db_path(args);

    println!(
        "{} Target: {}",
        "→".blue(),
        path.display().to_string().bright_white()
    );

    if Database::exists(&path) {
        if !force {
            println!("{}", "⚠ WARNING".yellow().bold());
            println!("A database already exists at this location.");
            let response = print_prompt("Overwrite it? [y/N]:")?;
            if response != "y" && response != "yes" {
                println!("{} Initialization cancelled.", "✗".red().bold());
                return Ok(());
            }
        }
        Database::remove(&path)
            .with_context(|| format!("Failed to remove {}", path.display()))?;
        println!("{} Removed existing database", "✓".green().bold());
    }

    Database::open(&StoreConfig::new(&path))
        .with_context(|| format!("Failed to create database {}", path.display()))?;
    println!(
        "{} Database initialized: {}",
        "✓".green().bold(),
        path.display().to_string().bright_white()
    );
    Ok(())
}

pub async fn handle_categories(args: &ArgMatches, quiet: bool) -> Result<()> {
    let db = open_existing_database(args)?;
    let config = crawl_config(args);
    let categories = category_names(args)?;
    let cache = RevisionCache::new(db, Arc::new(wiki_client(&config)?));

    let (pb, progress) = progress_bar(categories.len(), quiet)?;
    let report = crawl_categories(&cache, &categories, &config, progress).await;
    finish_progress(pb);

    print_pool_report("Categories", &report);
    Ok(())
}

/// Members of every category, deduplicated by page id.
fn pages_in_categories(db: &Database, categories: &[String]) -> Result<Vec<(i64, String)>> {
    let mut pages = BTreeMap::new();
    for category in categories {
        for (id, title) in db.get_category_members(category)? {
            pages.insert(id, title);
        }
    }
    Ok(pages.into_iter().collect())
}

pub async fn handle_history(args: &ArgMatches, quiet: bool) -> Result<()> {
    let db = open_existing_database(args)?;
    let config = crawl_config(args);
    let categories = category_names(args)?;
    let months = args.get_one::<usize>("months").copied().unwrap_or(12);
    let until = match args.get_one::<String>("until") {
        Some(s) => parse_date(s)?,
        None => Utc::now().date_naive().and_time(NaiveTime::MIN).and_utc(),
    };
    let cache = RevisionCache::new(db.clone(), Arc::new(wiki_client(&config)?));

    // Membership is served from the store once a category is known
    let report = crawl_categories(&cache, &categories, &config, None).await;
    if report.failed() > 0 {
        print_pool_report("Categories", &report);
    }

    let pages = pages_in_categories(&db, &categories)?;
    let dates = monthly_dates(until, months);
    info!("{} pages, {} sample dates", pages.len(), dates.len());

    let (pb, progress) = progress_bar(pages.len(), quiet)?;
    let report = crawl_page_history(&cache, pages, &dates, &config, progress).await;
    finish_progress(pb);

    print_pool_report("Page histories", &report);
    Ok(())
}

pub async fn handle_authors(args: &ArgMatches, quiet: bool) -> Result<()> {
    let config = crawl_config(args);
    let focal = args
        .get_one::<String>("focal")
        .ok_or_else(|| anyhow!("--focal is required"))?;
    let names = args.get_many::<String>("user").map(|v| v.cloned().collect());
    let users = load_names_from_source(names, args.get_one::<PathBuf>("users-file"), "--user")?;

    let (pb, progress) = progress_bar(users.len(), quiet)?;
    let summary = collect_user_edges(Arc::new(wiki_client(&config)?), &users, &config, progress).await;
    finish_progress(pb);
    if !quiet {
        print_pool_report("Users", &summary.report);
    }

    let graph = build_interest_graph(summary.edges, focal, selection_limits(args));
    emit_report(&graph, args)
}

/// Page-centric interest graph over `titles` from snapshots stored at `as_of`.
pub fn link_graph_from_store(
    db: &Database,
    titles: &[String],
    as_of: &DateTime<Utc>,
    focal: &str,
    limits: SelectionLimits,
) -> Result<InterestGraph> {
    let edges = collect_page_edges(db, titles, as_of)?;
    Ok(build_interest_graph(edges, focal, limits))
}

pub fn handle_links(args: &ArgMatches) -> Result<()> {
    let db = open_existing_database(args)?;
    let categories = category_names(args)?;
    let focal = args
        .get_one::<String>("focal")
        .ok_or_else(|| anyhow!("--focal is required"))?;
    let as_of = parse_date(
        args.get_one::<String>("date")
            .ok_or_else(|| anyhow!("--date is required"))?,
    )?;

    let titles: Vec<String> = pages_in_categories(&db, &categories)?
        .into_iter()
        .map(|(_, title)| title)
        .collect();
    if titles.is_empty() {
        bail!("No stored pages for these categories. Run `wikinet categories` first.");
    }

    let graph = link_graph_from_store(&db, &titles, &as_of, focal, selection_limits(args))?;
    emit_report(&graph, args)
}

pub async fn handle_talk(args: &ArgMatches) -> Result<()> {
    let db = open_existing_database(args)?;
    let config = crawl_config(args);
    let from = args
        .get_one::<String>("from")
        .ok_or_else(|| anyhow!("--from is required"))?;
    let to = args
        .get_one::<String>("to")
        .ok_or_else(|| anyhow!("--to is required"))?;

    let cache = RevisionCache::new(db, Arc::new(wiki_client(&config)?));
    let count = cache.get_or_fetch_conversation_count(from, to).await?;
    println!(
        "{} revisions by {} on User talk:{}",
        count.to_string().bright_white().bold(),
        from,
        to
    );
    Ok(())
}
