use clap::ArgMatches;
use colored::Colorize;
use commands::command_argument_builder;
use tracing_subscriber::EnvFilter;
use wikinet::handlers::{
    handle_authors, handle_categories, handle_history, handle_init, handle_links, handle_talk,
    print_banner,
};

mod commands;

#[tokio::main]
async fn main() {
    let cmd = command_argument_builder();
    let chosen_command = cmd.get_matches();
    let quiet = chosen_command.get_flag("quiet");

    init_tracing(quiet);

    // Show banner unless --quiet flag is set
    if !quiet {
        print_banner();
    }

    if chosen_command.subcommand().is_none() {
        // No subcommand provided, just show the banner
        return;
    }

    if let Err(e) = dispatch(&chosen_command, quiet).await {
        eprintln!("{} {:#}", "✗".red().bold(), e);
        std::process::exit(1);
    }
}

async fn dispatch(matches: &ArgMatches, quiet: bool) -> anyhow::Result<()> {
    match matches.subcommand() {
        Some(("init", primary_command)) => handle_init(primary_command),
        Some(("categories", primary_command)) => handle_categories(primary_command, quiet).await,
        Some(("history", primary_command)) => handle_history(primary_command, quiet).await,
        Some(("authors", primary_command)) => handle_authors(primary_command, quiet).await,
        Some(("links", primary_command)) => handle_links(primary_command),
        Some(("talk", primary_command)) => handle_talk(primary_command).await,
        _ => unreachable!("clap should ensure we don't get here"),
    }
}

/// Logs go to stderr so reports on stdout stay clean. `RUST_LOG` overrides the level.
fn init_tracing(quiet: bool) {
    let default_level = if quiet { "warn" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

pub const CLAP_STYLING: clap::builder::styling::Styles = clap::builder::styling::Styles::styled()
    .header(clap_cargo::style::HEADER)
    .usage(clap_cargo::style::USAGE)
    .literal(clap_cargo::style::LITERAL)
    .placeholder(clap_cargo::style::PLACEHOLDER)
    .error(clap_cargo::style::ERROR)
    .valid(clap_cargo::style::VALID)
    .invalid(clap_cargo::style::INVALID);
