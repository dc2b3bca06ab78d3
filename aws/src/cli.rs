//! Command line front end
//!
//! Each invocation manages one object: the resource type comes from the
//! command line, the desired configuration from a JSON file, and state lives
//! in a local directory, one file per object.

use crate::AwsProvider;
use clap::{Parser, Subcommand};
use converge::state::StateStore;
use converge::{
    Context, ConvergeError, Dynamic, DynamicValue, Executor, LocalStateStore, ManagedResource,
    PlannedAction, Provider, ReadOutcome, ResourceState,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum CliError {
    #[error(transparent)]
    Engine(#[from] ConvergeError),

    #[error("reading {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("{path} is not valid JSON: {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("provider configuration failed:\n{0}")]
    Configure(String),

    #[error("{0}")]
    Usage(String),
}

pub type Result<T> = std::result::Result<T, CliError>;

/// Plan and apply declarative AWS resources
#[derive(Parser, Debug)]
#[command(name = "converge-aws")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Directory holding state files
    #[arg(long, global = true, env = "CONVERGE_STATE_DIR", default_value = ".converge")]
    pub state_dir: PathBuf,

    /// JSON file with the provider configuration block
    #[arg(long, global = true)]
    pub provider_config: Option<PathBuf>,

    /// Upper bound for each operation, in seconds
    #[arg(long, global = true)]
    pub timeout: Option<u64>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Show what apply would change
    Plan {
        /// Resource type, e.g. aws_s3_directory_bucket
        resource_type: String,

        /// Desired configuration (JSON)
        config: PathBuf,

        /// Identity of the managed object, when it cannot be read from the configuration
        #[arg(long)]
        identity: Option<String>,
    },

    /// Create, update or replace the object to match the configuration
    Apply {
        resource_type: String,
        config: PathBuf,
        #[arg(long)]
        identity: Option<String>,
    },

    /// Read the object back and record drift
    Refresh {
        resource_type: String,
        identity: String,
    },

    /// Delete the object
    Destroy {
        resource_type: String,
        identity: String,
    },

    /// Adopt an existing object into state
    Import {
        resource_type: String,
        identity: String,
    },
}

/// Reads a JSON document into a configuration value
pub fn load_json(path: &Path) -> Result<DynamicValue> {
    let data = std::fs::read(path).map_err(|source| CliError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let json: serde_json::Value = serde_json::from_slice(&data).map_err(|source| CliError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(DynamicValue::new(Dynamic::from_json(&json)))
}

struct Session {
    ctx: Context,
    store: LocalStateStore,
    resource: Arc<dyn ManagedResource>,
    provider: AwsProvider,
    timeout: Option<Duration>,
}

impl Session {
    async fn open(cli: &Cli, resource_type: &str) -> Result<Self> {
        let provider_config = match &cli.provider_config {
            Some(path) => load_json(path)?,
            None => DynamicValue::object(),
        };

        let ctx = Context::new();
        let mut provider = AwsProvider::new();
        let diags = provider.configure(&ctx, provider_config).await;
        if diags.has_errors() {
            return Err(CliError::Configure(diags.to_string()));
        }

        Ok(Self {
            resource: provider.resource(resource_type)?,
            store: LocalStateStore::new(cli.state_dir.clone()),
            ctx,
            provider,
            timeout: cli.timeout.map(Duration::from_secs),
        })
    }

    fn resource_type(&self) -> &str {
        self.resource.type_name()
    }

    async fn executor(&self, identity: Option<&str>) -> Result<Executor> {
        let prior = match identity {
            Some(identity) => self.store.load(self.resource_type(), identity).await?,
            None => None,
        };
        let executor = Executor::new(self.resource.clone(), self.provider.client()?)?
            .with_state(prior);
        Ok(match self.timeout {
            Some(timeout) => executor.with_operation_timeout(timeout),
            None => executor,
        })
    }

    async fn recorded(&self, identity: &str) -> Result<Executor> {
        let executor = self.executor(Some(identity)).await?;
        if executor.state().is_none() {
            return Err(CliError::Usage(format!(
                "no state recorded for {} {} in {}",
                self.resource_type(),
                identity,
                self.store.base_dir().display()
            )));
        }
        Ok(executor)
    }

    /// Writes whatever the executor holds, and drops the record of `before`
    /// when the object is gone or was replaced under a new identity
    async fn persist(&self, executor: &Executor, before: Option<&str>) -> Result<()> {
        let after = executor.state();
        if let Some(state) = after {
            self.store.save(state).await?;
        }
        if let Some(before) = before {
            if after.map(|s| s.identity.as_str()) != Some(before) {
                self.store.remove(self.resource_type(), before).await?;
            }
        }
        Ok(())
    }
}

fn identity_for(
    resource: &dyn ManagedResource,
    explicit: Option<String>,
    desired: &DynamicValue,
) -> Option<String> {
    explicit.or_else(|| resource.configured_identity(desired))
}

/// Cancels `ctx` on Ctrl-C so in-flight operations stop cleanly
fn cancel_on_interrupt(ctx: &Context) {
    let ctx = ctx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, cancelling");
            ctx.cancel();
        }
    });
}

fn describe(state: &ResourceState) -> String {
    match state.attributes.encode_json() {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(e) => format!("<unprintable state: {}>", e),
    }
}

pub async fn run(cli: Cli) -> Result<()> {
    match &cli.command {
        Command::Plan {
            resource_type,
            config,
            identity,
        } => {
            let session = Session::open(&cli, resource_type).await?;
            let desired = load_json(config)?;
            let identity = identity_for(session.resource.as_ref(), identity.clone(), &desired);
            let executor = session.executor(identity.as_deref()).await?;

            let change_set = executor.plan(&desired)?;
            println!("# {}", resource_type);
            print!("{}", change_set);
            Ok(())
        }
        Command::Apply {
            resource_type,
            config,
            identity,
        } => {
            let session = Session::open(&cli, resource_type).await?;
            let desired = load_json(config)?;
            let identity = identity_for(session.resource.as_ref(), identity.clone(), &desired);
            let mut executor = session.executor(identity.as_deref()).await?;
            let before = executor.state().map(|s| s.identity.clone());

            cancel_on_interrupt(&session.ctx);
            let outcome = executor.converge(&session.ctx, &desired).await;
            session.persist(&executor, before.as_deref()).await?;

            let action = outcome?;
            if action == PlannedAction::NoOp {
                println!("{} is up to date", resource_type);
            } else if let Some(state) = executor.state() {
                info!(resource_type = %resource_type, identity = %state.identity, %action, "applied");
                println!("{} {}: {}", resource_type, action, state.identity);
            }
            Ok(())
        }
        Command::Refresh {
            resource_type,
            identity,
        } => {
            let session = Session::open(&cli, resource_type).await?;
            let mut executor = session.recorded(identity).await?;

            cancel_on_interrupt(&session.ctx);
            let outcome = executor.read(&session.ctx).await;
            session.persist(&executor, Some(identity)).await?;

            match outcome? {
                ReadOutcome::Refreshed => {
                    if let Some(state) = executor.state() {
                        println!("{}", describe(state));
                    }
                }
                ReadOutcome::Removed => {
                    println!("{} {} no longer exists; state removed", resource_type, identity);
                }
            }
            Ok(())
        }
        Command::Destroy {
            resource_type,
            identity,
        } => {
            let session = Session::open(&cli, resource_type).await?;
            let mut executor = session.recorded(identity).await?;

            cancel_on_interrupt(&session.ctx);
            let outcome = executor.delete(&session.ctx).await;
            session.persist(&executor, Some(identity)).await?;

            outcome?;
            println!("{} {} destroyed", resource_type, identity);
            Ok(())
        }
        Command::Import {
            resource_type,
            identity,
        } => {
            let session = Session::open(&cli, resource_type).await?;
            let mut executor = session.executor(None).await?;
            if session
                .store
                .load(resource_type, identity)
                .await?
                .is_some()
            {
                return Err(CliError::Usage(format!(
                    "{} {} is already managed",
                    resource_type, identity
                )));
            }

            cancel_on_interrupt(&session.ctx);
            let state = executor.import(&session.ctx, identity).await?;
            session.store.save(state).await?;
            println!("{}", describe(state));
            Ok(())
        }
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn parses_apply_with_global_flags() {
        let cli = Cli::try_parse_from([
            "converge-aws",
            "apply",
            "aws_s3_directory_bucket",
            "bucket.json",
            "--state-dir",
            "/tmp/state",
            "--timeout",
            "30",
        ])
        .unwrap();

        assert_eq!(cli.state_dir, PathBuf::from("/tmp/state"));
        assert_eq!(cli.timeout, Some(30));
        match cli.command {
            Command::Apply {
                resource_type,
                config,
                identity,
            } => {
                assert_eq!(resource_type, "aws_s3_directory_bucket");
                assert_eq!(config, PathBuf::from("bucket.json"));
                assert!(identity.is_none());
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn refresh_requires_an_identity() {
        assert!(Cli::try_parse_from(["converge-aws", "refresh", "aws_s3_directory_bucket"]).is_err());
    }

    #[test]
    fn load_json_reads_configuration() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"bucket": "b--usw2-az2--x-s3", "location": [{{"name": "usw2-az2"}}]}}"#)
            .unwrap();

        let config = load_json(file.path()).unwrap();
        assert_eq!(
            config
                .get(&converge::AttributePath::new("bucket"))
                .and_then(Dynamic::as_string),
            Some("b--usw2-az2--x-s3")
        );
    }

    #[test]
    fn load_json_reports_bad_documents() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();

        let err = load_json(file.path()).unwrap_err();
        assert!(matches!(err, CliError::Json { .. }));
        assert!(load_json(Path::new("/nonexistent/config.json")).is_err());
    }
}
