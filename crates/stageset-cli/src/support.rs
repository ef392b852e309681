use crate::cli::GlobalArgs;
use crate::config::{ConfigError, StagesetConfig};
use serde_json::{Value, json};
use stageset_kernel::{Actor, ChangeSetEngine, ChangeSetError, ObjectKey};
use stageset_store::{
    AtomicStoreMutationError, ChangeSetLedger, LedgerError, MemoryStore, MemoryStoreError,
    load_jsonl_stores, mutate_jsonl_stores,
};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Logs go to stderr so stdout stays parseable. `RUST_LOG` overrides the default.
pub fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();
}

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error(transparent)]
    ChangeSet(#[from] ChangeSetError),

    #[error(transparent)]
    Store(#[from] MemoryStoreError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("store lock busy: {0}")]
    LockBusy(String),

    #[error("{0}")]
    LockIo(String),

    #[error("permission denied: {actor} may not {action} {object}")]
    ObjectDenied {
        actor: String,
        action: &'static str,
        object: String,
    },

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl CommandError {
    /// Stable discriminator for `--json` error output.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ChangeSet(err) => err.kind(),
            Self::Store(MemoryStoreError::ObjectNotFound(_)) => "object_not_found",
            Self::Store(MemoryStoreError::MissingStage { .. }) => "invalid_input",
            Self::Store(_) => "storage_failure",
            Self::Ledger(LedgerError::NotFound(_)) => "changeset_not_found",
            Self::Ledger(LedgerError::Ambiguous { .. }) => "invalid_input",
            Self::Ledger(LedgerError::Jsonl(_)) => "storage_failure",
            Self::Config(ConfigError::Schema(err)) => err.kind(),
            Self::Config(_) => "configuration",
            Self::LockBusy(_) => "lock_busy",
            Self::LockIo(_) => "storage_failure",
            Self::ObjectDenied { .. } => "permission_denied",
            Self::InvalidInput(_) => "invalid_input",
        }
    }
}

impl From<AtomicStoreMutationError<CommandError>> for CommandError {
    fn from(err: AtomicStoreMutationError<CommandError>) -> Self {
        match err {
            AtomicStoreMutationError::Mutation(inner) => inner,
            AtomicStoreMutationError::LockBusy { lock_path } => Self::LockBusy(lock_path),
            AtomicStoreMutationError::LockIo { lock_path, message } => {
                Self::LockIo(format!("failed to acquire store lock {lock_path}: {message}"))
            }
            AtomicStoreMutationError::Store(source) => Self::Store(source),
        }
    }
}

/// Everything a command needs: the engine built from config, the acting
/// user, and where the two JSONL files live.
pub struct Context {
    pub engine: ChangeSetEngine,
    pub actor: Actor,
    pub objects: PathBuf,
    pub changesets: PathBuf,
    pub json: bool,
}

impl Context {
    pub fn from_args(global: &GlobalArgs) -> Result<Self, CommandError> {
        let engine = StagesetConfig::load(&global.config)?.into_engine()?;
        Ok(Self {
            engine,
            actor: Actor::new(global.actor.clone(), global.permission.iter().cloned()),
            objects: PathBuf::from(&global.objects),
            changesets: PathBuf::from(&global.changesets),
            json: global.json,
        })
    }

    pub fn load(&self) -> Result<(MemoryStore, ChangeSetLedger), CommandError> {
        Ok(load_jsonl_stores(&self.objects, &self.changesets)?)
    }

    /// One locked load-mutate-save cycle. The mutator reports whether to persist.
    pub fn mutate<T, F>(&self, mutator: F) -> Result<T, CommandError>
    where
        F: FnOnce(&mut MemoryStore, &mut ChangeSetLedger) -> Result<(T, bool), CommandError>,
    {
        Ok(mutate_jsonl_stores(
            &self.objects,
            &self.changesets,
            mutator,
        )?)
    }

    /// Normalize a user-supplied type name to its base-type key space.
    pub fn object_key(&self, object_type: &str, id: u64) -> Result<ObjectKey, CommandError> {
        let base = self.engine.schema().base_type(object_type)?;
        Ok(ObjectKey::new(base, id))
    }

    /// Print either the JSON payload or the text rendering.
    pub fn emit(&self, payload: Value, text: impl FnOnce() -> String) {
        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&payload).expect("json serialization")
            );
        } else {
            println!("{}", text());
        }
    }
}

pub fn emit_error(err: &CommandError, json_output: bool) -> ! {
    tracing::debug!(target: "stageset.cli", kind = err.kind(), error = %err, "command failed");
    if json_output {
        let payload = json!({
            "error": {
                "kind": err.kind(),
                "message": err.to_string()
            }
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&payload).expect("json serialization")
        );
    } else {
        eprintln!("error: {err}");
    }
    std::process::exit(1);
}

pub fn or_exit<T>(result: Result<T, CommandError>, json_output: bool) -> T {
    result.unwrap_or_else(|err| emit_error(&err, json_output))
}

/// Parse `key=value` pairs. Values that parse as JSON keep their type;
/// anything else is stored as a string.
pub fn parse_fields(pairs: &[String]) -> Result<BTreeMap<String, Value>, CommandError> {
    let mut fields = BTreeMap::new();
    for pair in pairs {
        let (key, raw) = pair
            .split_once('=')
            .ok_or_else(|| CommandError::InvalidInput(format!("expected key=value, got `{pair}`")))?;
        let key = key.trim();
        if key.is_empty() {
            return Err(CommandError::InvalidInput(format!(
                "empty field name in `{pair}`"
            )));
        }
        let value =
            serde_json::from_str::<Value>(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        fields.insert(key.to_string(), value);
    }
    Ok(fields)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fields_keep_json_types_and_fall_back_to_strings() {
        let fields = parse_fields(&[
            "base_id=3".to_string(),
            "title=Spring launch".to_string(),
            "live=true".to_string(),
            "tags=[\"a\"]".to_string(),
        ])
        .expect("fields should parse");
        assert_eq!(fields["base_id"], json!(3));
        assert_eq!(fields["title"], json!("Spring launch"));
        assert_eq!(fields["live"], json!(true));
        assert_eq!(fields["tags"], json!(["a"]));
    }

    #[test]
    fn malformed_fields_are_invalid_input() {
        let err = parse_fields(&["no_equals".to_string()]).expect_err("missing =");
        assert_eq!(err.kind(), "invalid_input");
        let err = parse_fields(&["=1".to_string()]).expect_err("empty key");
        assert_eq!(err.kind(), "invalid_input");
    }

    #[test]
    fn lock_errors_map_to_stable_kinds() {
        let busy: CommandError = AtomicStoreMutationError::<CommandError>::LockBusy {
            lock_path: "objects.jsonl.lock".to_string(),
        }
        .into();
        assert_eq!(busy.kind(), "lock_busy");

        let inner: CommandError =
            AtomicStoreMutationError::Mutation(CommandError::InvalidInput("x".to_string())).into();
        assert_eq!(inner.kind(), "invalid_input");
    }
}
