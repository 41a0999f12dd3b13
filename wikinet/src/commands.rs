use crate::CLAP_STYLING;
use clap::{arg, command};
use std::path::PathBuf;

fn lang_arg() -> clap::Arg {
    arg!(-l --"lang" <CODE>)
        .required(false)
        .help("Wiki language edition, e.g. en or de")
        .default_value("en")
}

fn threads_arg() -> clap::Arg {
    arg!(-t --"threads" <NUM_WORKERS>)
        .required(false)
        .help("The number of concurrent fetch workers. Keep this low to respect the wiki's limits.")
        .value_parser(clap::value_parser!(usize))
        .default_value("8")
}

fn drain_timeout_arg() -> clap::Arg {
    arg!(--"drain-timeout" <SECS>)
        .required(false)
        .help("Seconds to wait for running fetches before reporting them unfinished")
        .value_parser(clap::value_parser!(u64))
        .default_value("60")
}

fn category_args(cmd: clap::Command) -> clap::Command {
    cmd.arg(
        arg!(-c --"category" <NAME>)
            .required(false)
            .help("A category to crawl (repeatable)")
            .action(clap::ArgAction::Append)
            .conflicts_with("categories-file"),
    )
    .arg(
        arg!(-F --"categories-file" <PATH>)
            .required(false)
            .help("Path to a newline-delimited file of category names")
            .value_parser(clap::value_parser!(PathBuf))
            .conflicts_with("category"),
    )
}

fn report_args(cmd: clap::Command) -> clap::Command {
    cmd.arg(
        arg!(-o --"output" <PATH>)
            .required(false)
            .help("Save report to file (default: display to screen)")
            .value_parser(clap::value_parser!(PathBuf)),
    )
    .arg(
        arg!(-f --"format" <FORMAT>)
            .required(false)
            .help("Report format: text, json, csv")
            .value_parser(["text", "json", "csv"])
            .default_value("text"),
    )
    .arg(
        arg!(--"no-shortest-paths")
            .required(false)
            .help("Skip the shortest-path admission tier")
            .action(clap::ArgAction::SetTrue),
    )
}

pub(crate) fn command_argument_builder() -> clap::Command {
    clap::Command::new("wikinet")
        .version(env!("CARGO_PKG_VERSION"))
        .bin_name("wikinet")
        .styles(CLAP_STYLING)
        .arg(arg!(-q --"quiet" "Suppress banner and non-essential output").required(false))
        .arg(
            arg!(--"db" <PATH>)
                .required(false)
                .global(true)
                .help("Location of the wikinet database")
                .default_value("~/.config/wikinet/wikinet.db"),
        )
        .subcommand_required(false)
        .subcommand(
            command!("init")
                .about("Initializes the wikinet database on your filesystem")
                .arg(
                    arg!(-f - -"force")
                        .help("Overwrite any existing database without asking.")
                        .required(false),
                ),
        )
        .subcommand(
            category_args(
                command!("categories")
                    .about("Fetch the member pages of one or more categories into the database"),
            )
            .arg(lang_arg())
            .arg(threads_arg())
            .arg(drain_timeout_arg()),
        )
        .subcommand(
            category_args(
                command!("history").about(
                    "Capture monthly outgoing-link snapshots of every page in the given \
                categories",
                ),
            )
            .arg(lang_arg())
            .arg(threads_arg())
            .arg(drain_timeout_arg())
            .arg(
                arg!(-m --"months" <COUNT>)
                    .required(false)
                    .help("Number of monthly sample dates")
                    .value_parser(clap::value_parser!(usize))
                    .default_value("12"),
            )
            .arg(
                arg!(--"until" <DATE>)
                    .required(false)
                    .help("Most recent sample date, YYYY-MM-DD (default: today)"),
            ),
        )
        .subcommand(
            report_args(
                command!("authors")
                    .about("Build a page interest graph from the pages a set of users edit most")
                    .arg(
                        arg!(--"focal" <TITLE>)
                            .required(true)
                            .help("The page at the center of the graph"),
                    )
                    .arg(
                        arg!(-u --"user" <USER>)
                            .required(false)
                            .help("A user whose contributions to include (repeatable)")
                            .action(clap::ArgAction::Append)
                            .conflicts_with("users-file"),
                    )
                    .arg(
                        arg!(-U --"users-file" <PATH>)
                            .required(false)
                            .help("Path to a newline-delimited file of user names")
                            .value_parser(clap::value_parser!(PathBuf))
                            .conflicts_with("user"),
                    )
                    .arg(lang_arg())
                    .arg(threads_arg())
                    .arg(drain_timeout_arg()),
            ),
        )
        .subcommand(report_args(category_args(
            command!("links")
                .about("Build a page interest graph from stored link snapshots")
                .arg(
                    arg!(--"focal" <TITLE>)
                        .required(true)
                        .help("The page at the center of the graph"),
                )
                .arg(
                    arg!(-d --"date" <DATE>)
                        .required(true)
                        .help("Snapshot date, YYYY-MM-DD"),
                ),
        )))
        .subcommand(
            command!("talk")
                .about("Count the revisions one user made on another user's talk page")
                .arg(arg!(--"from" <USER>).required(true).help("The writing user"))
                .arg(arg!(--"to" <USER>).required(true).help("The owner of the talk page"))
                .arg(lang_arg()),
        )
}
