use std::{
    fs,
    path::PathBuf,
    time::Instant,
};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::{info, LevelFilter};
use simple_logger::SimpleLogger;
use time::macros::format_description;

use meta_br_id_distribution::{
    count_dump, load_distribution, nested, query, util::format_elapsed, Classifier, DumpConfig,
    FileDiagnostics, QueryResult, Scheme, SchemeMatching, Selection,
};

const LOG_FILE_STEM: &str = "count_brs_ids";

#[derive(Parser)]
#[command(name = "Meta BR ID Distribution")]
#[command(about = "Counts OpenCitations Meta bibliographic resources with multiple values for the same identifier scheme, and queries the resulting distribution.")]
#[command(version = "1.0.0")]
struct Cli {
    #[arg(
        short,
        long,
        global = true,
        default_value = "INFO",
        help = "Logging level (TRACE, DEBUG, INFO, WARN, ERROR)"
    )]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Scan a Meta CSV dump and write the distribution as JSON
    Count {
        #[arg(
            short,
            long,
            help = "Zip archive of Meta CSV files, or a directory of .csv / .csv.gz files",
            required = true
        )]
        input: PathBuf,

        #[arg(short, long, help = "Output JSON file", required = true)]
        output: PathBuf,

        #[arg(
            long,
            default_value = ".",
            help = "Directory for the dated run log (count_brs_ids_<date>.log)"
        )]
        log_dir: PathBuf,

        #[arg(
            long,
            default_value_t = meta_br_id_distribution::dump::DEFAULT_FIELD_SIZE_LIMIT,
            help = "Largest accepted CSV field in bytes"
        )]
        field_size_limit: usize,

        #[arg(
            long,
            help = "Attribute tokens to a scheme by bare name prefix instead of requiring '<scheme>:'"
        )]
        legacy_prefix_match: bool,

        #[arg(long, help = "Hide the progress bar")]
        no_progress: bool,
    },
    /// Query a distribution JSON written by `count`
    Query {
        #[arg(short, long, help = "Distribution JSON file", required = true)]
        input: PathBuf,

        #[arg(short = 't', long = "type", help = "Bibliographic resource type, e.g. 'journal article'")]
        record_type: Option<String>,

        #[arg(short, long, value_parser = clap::value_parser!(Scheme), help = "Identifier scheme (doi, pmid, pmcid, openalex, issn, isbn, omid)")]
        scheme: Option<Scheme>,

        #[arg(long, help = "Keep only identifier counts >= MIN")]
        min: Option<i64>,

        #[arg(long, help = "Keep only identifier counts <= MAX")]
        max: Option<i64>,

        #[arg(long, help = "Print the summed number instead of the distribution")]
        total: bool,
    },
}

fn main() -> Result<()> {
    let main_start_time = Instant::now();
    let cli = Cli::parse();

    let log_level = match cli.log_level.to_uppercase().as_str() {
        "TRACE" => LevelFilter::Trace,
        "DEBUG" => LevelFilter::Debug,
        "INFO" => LevelFilter::Info,
        "WARN" | "WARNING" => LevelFilter::Warn,
        "ERROR" => LevelFilter::Error,
        _ => {
            eprintln!("Invalid log level '{}', defaulting to INFO.", cli.log_level);
            LevelFilter::Info
        }
    };
    SimpleLogger::new()
        .with_level(log_level)
        .with_timestamp_format(format_description!(
            "[year]-[month]-[day] [hour]:[minute]:[second]"
        ))
        .init()?;

    match cli.command {
        Command::Count {
            input,
            output,
            log_dir,
            field_size_limit,
            legacy_prefix_match,
            no_progress,
        } => {
            info!("Starting Meta BR ID Distribution v1.0.0");
            fs::create_dir_all(&log_dir).with_context(|| {
                format!("Failed to create log directory: {}", log_dir.display())
            })?;
            let diagnostics = FileDiagnostics::open_dated(&log_dir, LOG_FILE_STEM)
                .with_context(|| format!("Failed to open run log in {}", log_dir.display()))?;
            info!("Run log: {}", diagnostics.path().display());

            let config = DumpConfig {
                field_size_limit,
                show_progress: !no_progress,
                ..DumpConfig::default()
            };
            let matching = if legacy_prefix_match {
                SchemeMatching::Prefix
            } else {
                SchemeMatching::Delimited
            };

            count_dump(&input, &output, &config, Classifier::new(matching), diagnostics)
                .with_context(|| format!("Counting failed for dump {}", input.display()))?;
            info!(
                "Total execution time: {}",
                format_elapsed(main_start_time.elapsed())
            );
        }
        Command::Query {
            input,
            record_type,
            scheme,
            min,
            max,
            total,
        } => {
            let table = load_distribution(&input)
                .with_context(|| format!("Failed to load distribution: {}", input.display()))?;
            let selection = Selection {
                record_type,
                scheme: scheme.map(|s| s.name().to_string()),
                min,
                max,
            };
            let outcome = query(&table, &selection, !total)?;
            match outcome.result {
                QueryResult::Distribution(map) => println!("{}", nested::to_json_string(&map)?),
                QueryResult::Total(n) => println!("{}", n),
            }
        }
    }

    Ok(())
}
