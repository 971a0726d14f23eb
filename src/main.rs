//! Purpose: `flatstore` CLI entry point.
//! Role: Binary crate root; parses args, runs commands, emits JSON on stdout.
//! Invariants: Success output is JSON on stdout (one value, or JSON lines for `cat`).
//! Invariants: Non-interactive errors are emitted as JSON on stderr.
//! Invariants: Process exit code is derived from `api::to_exit_code`.
//! Invariants: All store access goes through `api::Store` (locks + staging swap).
#![allow(clippy::result_large_err)]
use std::io::{self, IsTerminal, Read, Write};
use std::path::{Path, PathBuf};

use clap::{
    CommandFactory, Parser, Subcommand, ValueEnum, ValueHint, error::ErrorKind as ClapErrorKind,
};
use clap_complete::aot::Shell;
use flatstore::api::{
    ChangeSet, DEFAULT_SEPARATOR, Error, ErrorKind, Feature, FeatureType, Store, StoreOptions,
    parse_header_line, to_exit_code,
};
use serde_json::{Map, Value, json};
use std::error::Error as StdError;
use tracing_subscriber::EnvFilter;

mod command_dispatch;
mod feature_json;

#[derive(Copy, Clone, Debug)]
struct RunOutcome {
    exit_code: i32,
}

impl RunOutcome {
    fn ok() -> Self {
        Self { exit_code: 0 }
    }

    fn with_code(exit_code: i32) -> Self {
        Self { exit_code }
    }
}

fn main() {
    init_tracing();
    let exit_code = match run() {
        Ok(outcome) => outcome.exit_code,
        Err((err, color_mode)) => {
            emit_error(&err, color_mode);
            to_exit_code(err.kind())
        }
    };
    std::process::exit(exit_code);
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(io::stderr)
        .try_init();
}

fn run() -> Result<RunOutcome, (Error, ColorMode)> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => match err.kind() {
            ClapErrorKind::DisplayHelp
            | ClapErrorKind::DisplayVersion
            | ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand => {
                err.print().map_err(|io_err| {
                    (
                        Error::new(ErrorKind::Io)
                            .with_message("failed to write help")
                            .with_source(io_err),
                        ColorMode::Auto,
                    )
                })?;
                let exit_code = if matches!(
                    err.kind(),
                    ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand
                ) {
                    2
                } else {
                    0
                };
                return Ok(RunOutcome::with_code(exit_code));
            }
            _ => {
                let message = clap_error_summary(&err);
                let hint = clap_error_hint(&err);
                return Err((
                    Error::new(ErrorKind::Usage)
                        .with_message(message)
                        .with_hint(hint),
                    ColorMode::Auto,
                ));
            }
        },
    };

    let color_mode = cli.color;
    let options = StoreOptions::new().with_separator(cli.separator);

    command_dispatch::dispatch_command(cli.command, options)
        .map_err(add_corrupt_hint)
        .map_err(add_io_hint)
        .map_err(add_internal_hint)
        .map_err(|err| (err, color_mode))
}

#[derive(Parser)]
#[command(
    name = "flatstore",
    version,
    about = "Typed geospatial features in one delimited text file",
    help_template = r#"{about-with-newline}
{before-help}USAGE
  {usage}

COMMANDS
{subcommands}

OPTIONS
{options}

{after-help}
"#,
    long_about = None,
    before_help = r#"Many processes can read while one writes. Every write rewrites the file
to a staging copy and swaps it in atomically.

Mental model:
  - the first line is the schema: name(Type);geom(EPSG:4326)
  - every other line is one feature; ids are 0-based line positions
"#,
    after_help = r#"EXAMPLES
  $ flatstore init roads.csv 'name;lanes(Integer);geom(EPSG:4326)'
  $ flatstore append roads.csv --json '{"name":"A1","lanes":2,"geom":"LINESTRING (0 0, 1 1)"}'
  $ flatstore cat roads.csv
  $ flatstore delete roads.csv --id 0

LEARN MORE
  $ flatstore <command> --help"#,
    arg_required_else_help = true,
    disable_help_subcommand = false
)]
struct Cli {
    #[arg(
        long,
        global = true,
        default_value_t = DEFAULT_SEPARATOR,
        help = "Field separator used by the store file"
    )]
    separator: char,
    #[arg(
        long,
        global = true,
        default_value = "auto",
        value_enum,
        help = "Colorize stderr diagnostics: auto|always|never"
    )]
    color: ColorMode,

    #[command(subcommand)]
    command: Command,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum ColorMode {
    Auto,
    Always,
    Never,
}

impl ColorMode {
    fn use_color(self, is_tty: bool) -> bool {
        match self {
            ColorMode::Auto => is_tty,
            ColorMode::Always => true,
            ColorMode::Never => false,
        }
    }
}

#[derive(Subcommand)]
enum Command {
    #[command(
        about = "Create or replace a store's schema (deletes all features)",
        after_help = r#"EXAMPLES
  $ flatstore init roads.csv 'name;lanes(Integer);geom(EPSG:4326)'
  $ flatstore --separator ',' init cities.csv 'name,founded(Date),at(EPSG:3857)'"#
    )]
    Init {
        #[arg(help = "Store file", value_hint = ValueHint::FilePath)]
        file: PathBuf,
        #[arg(help = "Header line: name or name(Type) per column")]
        header: String,
    },
    #[command(about = "Print the store's schema as JSON")]
    Schema {
        #[arg(help = "Store file", value_hint = ValueHint::FilePath)]
        file: PathBuf,
    },
    #[command(about = "Count features without decoding them")]
    Count {
        #[arg(help = "Store file", value_hint = ValueHint::FilePath)]
        file: PathBuf,
    },
    #[command(about = "Print features as JSON lines")]
    Cat {
        #[arg(help = "Store file", value_hint = ValueHint::FilePath)]
        file: PathBuf,
        #[arg(long, help = "Stop after this many features")]
        limit: Option<u64>,
    },
    #[command(
        about = "Append features given as JSON objects",
        long_about = r#"Append features given as JSON objects keyed by attribute name.

Without --json, reads a stream of JSON objects from stdin."#,
        after_help = r#"EXAMPLES
  $ flatstore append roads.csv --json '{"name":"A1","lanes":2}'
  $ printf '{"name":"B2"}\n{"name":"C3"}\n' | flatstore append roads.csv"#
    )]
    Append {
        #[arg(help = "Store file", value_hint = ValueHint::FilePath)]
        file: PathBuf,
        #[arg(long = "json", value_name = "OBJECT", help = "Feature as a JSON object (repeatable)")]
        json: Vec<String>,
    },
    #[command(about = "Delete features by id")]
    Delete {
        #[arg(help = "Store file", value_hint = ValueHint::FilePath)]
        file: PathBuf,
        #[arg(long = "id", required = true, num_args = 1.., help = "Feature id to delete")]
        ids: Vec<u64>,
    },
    #[command(about = "Generate shell completion scripts")]
    Completion {
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn open_store(file: &Path, options: &StoreOptions) -> Result<Store, Error> {
    Store::open(file, options.clone())
}

fn require_schema(store: &Store) -> Result<std::sync::Arc<FeatureType>, Error> {
    store.schema()?.ok_or_else(|| {
        Error::new(ErrorKind::NotFound)
            .with_message("store has no schema")
            .with_path(store.path())
            .with_hint(format!(
                "Create one with `flatstore init {} '<header>'`.",
                store.path().display()
            ))
    })
}

fn init_schema(store: &Store, header: &str) -> Result<std::sync::Arc<FeatureType>, Error> {
    let feature_type = parse_header_line(store.name(), header, store.separator())?;
    store.update_schema(feature_type)
}

fn change_set_json(changes: &ChangeSet) -> Value {
    serde_json::to_value(changes).unwrap_or_else(|_| json!({}))
}

fn read_features_from_stdin(feature_type: &std::sync::Arc<FeatureType>) -> Result<Vec<Feature>, Error> {
    read_features(io::stdin().lock(), feature_type)
}

fn read_features<R: Read>(
    reader: R,
    feature_type: &std::sync::Arc<FeatureType>,
) -> Result<Vec<Feature>, Error> {
    let stream = serde_json::Deserializer::from_reader(reader).into_iter::<Value>();
    let mut features = Vec::new();
    for item in stream {
        let value = item.map_err(|err| {
            Error::new(ErrorKind::Usage)
                .with_message("invalid json stream")
                .with_hint("Provide JSON objects separated by whitespace or newlines.")
                .with_source(err)
        })?;
        features.push(feature_json::feature_from_json(feature_type, &value)?);
    }
    Ok(features)
}

fn parse_inline_json(data: &str) -> Result<Value, Error> {
    serde_json::from_str(data).map_err(|err| {
        Error::new(ErrorKind::Usage)
            .with_message("invalid json")
            .with_hint("Provide a single JSON object (e.g. '{\"name\":\"A1\"}').")
            .with_source(err)
    })
}

fn add_io_hint(err: Error) -> Error {
    if err.hint().is_some() {
        return err;
    }
    match err.kind() {
        ErrorKind::Permission => {
            err.with_hint("Permission denied. Check file and directory permissions.")
        }
        ErrorKind::Busy => {
            err.with_hint("Store is busy (another writer holds the lock). Retry with backoff.")
        }
        ErrorKind::Io => err.with_hint("I/O error. Check the path, filesystem, and disk space."),
        _ => err,
    }
}

fn add_corrupt_hint(err: Error) -> Error {
    if err.kind() != ErrorKind::Corrupt || err.hint().is_some() {
        return err;
    }
    err.with_hint("Store file has a malformed line. Fix it by hand or restore from a copy.")
}

fn add_internal_hint(err: Error) -> Error {
    if err.kind() != ErrorKind::Internal || err.hint().is_some() {
        return err;
    }
    err.with_hint(
        "Unexpected internal failure. Retry with RUST_LOG=debug and share command/context if it persists.",
    )
}

fn emit_json(value: Value) {
    let is_tty = io::stdout().is_terminal();
    let json = if is_tty {
        serde_json::to_string_pretty(&value)
    } else {
        serde_json::to_string(&value)
    }
    .unwrap_or_else(|_| "{\"error\":\"json encode failed\"}".to_string());
    println!("{json}");
}

fn emit_json_line<W: Write>(out: &mut W, value: &Value) -> Result<(), Error> {
    serde_json::to_writer(&mut *out, value)
        .map_err(io::Error::from)
        .and_then(|()| out.write_all(b"\n"))
        .map_err(|err| {
            Error::new(ErrorKind::Io)
                .with_message("failed to write output")
                .with_source(err)
        })
}

const RED: &str = "31";
const YELLOW: &str = "33";

fn paint(label: &str, enabled: bool, code: &str) -> String {
    if enabled {
        format!("\u{1b}[{code}m{label}\u{1b}[0m")
    } else {
        label.to_string()
    }
}

fn emit_error(err: &Error, color_mode: ColorMode) {
    let is_tty = io::stderr().is_terminal();
    if is_tty {
        eprintln!("{}", error_text(err, color_mode.use_color(is_tty)));
        return;
    }
    let json = serde_json::to_string(&error_json(err)).unwrap_or_else(|_| {
        "{\"error\":{\"kind\":\"Internal\",\"message\":\"json encode failed\"}}".to_string()
    });
    eprintln!("{json}");
}

fn error_message(err: &Error) -> &str {
    err.message().unwrap_or(match err.kind() {
        ErrorKind::Internal => "internal error",
        ErrorKind::Usage => "usage error",
        ErrorKind::NotFound => "not found",
        ErrorKind::AlreadyExists => "already exists",
        ErrorKind::Busy => "store is busy",
        ErrorKind::Permission => "permission denied",
        ErrorKind::Corrupt => "malformed store file",
        ErrorKind::Io => "i/o error",
    })
}

/// Optional context shared by the JSON and human renderings, in display order.
fn error_context(err: &Error) -> Vec<(&'static str, Value)> {
    let mut context = Vec::new();
    if let Some(hint) = err.hint() {
        context.push(("hint", json!(hint)));
    }
    if let Some(path) = err.path() {
        context.push(("path", json!(path.display().to_string())));
    }
    if let Some(line) = err.line() {
        context.push(("line", json!(line)));
    }
    if let Some(attribute) = err.attribute() {
        context.push(("attribute", json!(attribute)));
    }
    context
}

fn error_causes(err: &Error) -> Vec<String> {
    std::iter::successors(err.source(), |&source| source.source())
        .map(|source| source.to_string())
        .collect()
}

fn error_json(err: &Error) -> Value {
    let mut inner = Map::new();
    inner.insert("kind".to_string(), json!(format!("{:?}", err.kind())));
    inner.insert("message".to_string(), json!(error_message(err)));
    for (key, value) in error_context(err) {
        inner.insert(key.to_string(), value);
    }
    let causes = error_causes(err);
    if !causes.is_empty() {
        inner.insert("causes".to_string(), json!(causes));
    }
    json!({ "error": inner })
}

fn error_text(err: &Error, use_color: bool) -> String {
    let mut lines = vec![format!(
        "{} {}",
        paint("error:", use_color, RED),
        error_message(err)
    )];
    for (key, value) in error_context(err) {
        let text = match value {
            Value::String(text) => text,
            other => other.to_string(),
        };
        lines.push(format!("{} {text}", paint(&format!("{key}:"), use_color, YELLOW)));
    }
    if let Some(cause) = error_causes(err).first() {
        lines.push(format!("{} {cause}", paint("caused by:", use_color, YELLOW)));
    }
    lines.join("\n")
}

fn clap_error_summary(err: &clap::Error) -> String {
    for line in err.to_string().lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if let Some(rest) = trimmed.strip_prefix("error:") {
            return rest.trim().to_string();
        }
        return trimmed.to_string();
    }
    "invalid arguments".to_string()
}

fn clap_error_hint(err: &clap::Error) -> String {
    let rendered = err.to_string();
    let usage = rendered
        .lines()
        .find_map(|line| line.trim().strip_prefix("Usage: "))
        .map(str::trim);

    let Some(usage) = usage else {
        return "Try `flatstore --help`.".to_string();
    };

    let tokens: Vec<&str> = usage.split_whitespace().collect();
    let Some(pos) = tokens.iter().position(|t| *t == "flatstore") else {
        return "Try `flatstore --help`.".to_string();
    };

    let mut parts = Vec::new();
    for token in tokens.iter().skip(pos + 1) {
        if token.starts_with('-') || token.starts_with('<') || token.starts_with('[') {
            break;
        }
        parts.push(*token);
    }

    if parts.is_empty() {
        return "Try `flatstore --help`.".to_string();
    }
    format!("Try `flatstore {} --help`.", parts.join(" "))
}
