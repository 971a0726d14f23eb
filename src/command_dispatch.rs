//! Purpose: Hold top-level CLI command dispatch for `flatstore`.
//! Exports: `dispatch_command`.
//! Role: Keep `main.rs` focused on parse/bootstrap and delegate command execution.
//! Invariants: Each command opens the store once and runs at most one write session.

use super::*;

pub(super) fn dispatch_command(
    command: Command,
    options: StoreOptions,
) -> Result<RunOutcome, Error> {
    match command {
        Command::Completion { shell } => {
            let mut cmd = Cli::command();
            clap_complete::aot::generate(shell, &mut cmd, "flatstore", &mut io::stdout());
            Ok(RunOutcome::ok())
        }
        Command::Init { file, header } => {
            let store = open_store(&file, &options)?;
            let feature_type = init_schema(&store, &header)?;
            emit_json(feature_json::schema_json(&feature_type, store.separator()));
            Ok(RunOutcome::ok())
        }
        Command::Schema { file } => {
            let store = open_store(&file, &options)?;
            let feature_type = require_schema(&store)?;
            emit_json(feature_json::schema_json(&feature_type, store.separator()));
            Ok(RunOutcome::ok())
        }
        Command::Count { file } => {
            let store = open_store(&file, &options)?;
            let count = store.count()?;
            emit_json(json!({ "count": count }));
            Ok(RunOutcome::ok())
        }
        Command::Cat { file, limit } => {
            let store = open_store(&file, &options)?;
            require_schema(&store)?;
            let stdout = io::stdout();
            let mut out = io::BufWriter::new(stdout.lock());
            let mut emitted = 0u64;
            for feature in store.features()? {
                if limit.is_some_and(|limit| emitted >= limit) {
                    break;
                }
                let feature = feature?;
                emit_json_line(&mut out, &feature_json::feature_json(&feature))?;
                emitted += 1;
            }
            out.flush().map_err(|err| {
                Error::new(ErrorKind::Io)
                    .with_message("failed to write output")
                    .with_source(err)
            })?;
            Ok(RunOutcome::ok())
        }
        Command::Append { file, json } => {
            let store = open_store(&file, &options)?;
            let feature_type = require_schema(&store)?;
            let features = if json.is_empty() {
                if io::stdin().is_terminal() {
                    return Err(Error::new(ErrorKind::Usage)
                        .with_message("no features to append")
                        .with_hint("Pass --json '{...}' or pipe JSON objects on stdin."));
                }
                read_features_from_stdin(&feature_type)?
            } else {
                json.iter()
                    .map(|data| {
                        let value = parse_inline_json(data)?;
                        feature_json::feature_from_json(&feature_type, &value)
                    })
                    .collect::<Result<Vec<_>, Error>>()?
            };
            let changes = store.add(features)?;
            emit_json(change_set_json(&changes));
            Ok(RunOutcome::ok())
        }
        Command::Delete { file, ids } => {
            let store = open_store(&file, &options)?;
            require_schema(&store)?;
            let changes = store.remove_if(|feature| ids.contains(&feature.id()))?;
            emit_json(change_set_json(&changes));
            Ok(RunOutcome::ok())
        }
    }
}
