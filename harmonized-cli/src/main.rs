//! CLI for driving a sync session against a schema file.

#![allow(clippy::print_stdout, reason = "CLI tool outputs to stdout")]

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use harmonized_client::{ClientConfig, ReqwestTransport};
use harmonized_core::remote::Transports;
use harmonized_core::storage::BackendSelector;
use harmonized_core::{init_logging, load_schema, validate_schema, CallEvent, Model, SCHEMA_FILE};
use harmonized_types::{ModelSchema, Protocol, Record};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Data directory holding the database and metadata (defaults to ~/.harmonized)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Schema file (defaults to <data-dir>/schema.json)
    #[arg(long, global = true)]
    schema: Option<PathBuf>,

    /// Talk to the server over HTTP even if the schema selects another protocol
    #[arg(long, global = true)]
    http: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Lists the models declared in the schema
    Schema,
    /// Fetches server changes for a model into local storage
    Fetch {
        model: String,
    },
    /// Prints every record of a model as JSON lines
    List {
        model: String,
    },
    /// Saves a record given as a JSON object
    Save {
        model: String,
        data: String,
    },
    /// Pushes locally created records the server has not seen yet
    Push {
        model: String,
    },
    /// Calls a server-side function and prints its result
    Call {
        model: String,
        name: String,
        /// JSON arguments
        #[arg(default_value = "{}")]
        args: String,
        /// Server id of the record to call the function on
        #[arg(long)]
        on: Option<String>,
    },
    /// Prints changes of a model until interrupted
    Watch {
        model: String,
    },
}

struct Session {
    schema: ModelSchema,
    selector: BackendSelector,
    transports: Transports,
    force_http: bool,
}

impl Session {
    fn open(cli: &Cli) -> Result<Self> {
        let data_dir = match &cli.data_dir {
            Some(dir) => {
                std::fs::create_dir_all(dir)
                    .with_context(|| format!("creating data directory {}", dir.display()))?;
                dir.clone()
            },
            None => harmonized_core::utils::paths::get_data_dir()?,
        };
        let schema_path = cli.schema.clone().unwrap_or_else(|| data_dir.join(SCHEMA_FILE));
        let schema = load_schema(&schema_path)
            .with_context(|| format!("loading schema {}", schema_path.display()))?;
        validate_schema(&schema)?;

        let transport = ReqwestTransport::new(ClientConfig::default())?;
        info!("Using data directory {}", data_dir.display());

        Ok(Self {
            schema,
            selector: BackendSelector::with_data_dir(&data_dir),
            transports: Transports::default().with_http(Arc::new(transport)),
            force_http: cli.http,
        })
    }

    async fn model(&self, name: &str) -> Result<Arc<Model>> {
        let mut builder = Model::builder(name, &self.schema)
            .selector(&self.selector)
            .transports(self.transports.clone());
        if self.force_http {
            builder = builder.overrides(serde_json::json!({"server_options": {"protocol": "http"}}));
        }
        let model = builder.build()?;
        if model.options().server_options.protocol != Protocol::Http && self.transports.socket.is_none() {
            anyhow::bail!(
                "model {name} uses {} but only HTTP is available (try --http)",
                model.options().server_options.protocol
            );
        }
        let loaded = model.start().await?;
        info!("Model {name} started with {loaded} local record(s)");
        Ok(Arc::new(model))
    }
}

fn print_record(record: &Record) -> Result<()> {
    println!("{}", serde_json::to_string(record)?);
    Ok(())
}

fn parse_json(text: &str) -> Result<Value> {
    serde_json::from_str(text).with_context(|| format!("invalid JSON: {text}"))
}

/// Call `name` and wait for its return value, reporting pending notifications.
async fn call_function(model: &Model, name: &str, args: Value, rt_id: Option<u64>) -> Result<Value> {
    let mut call = model.call_fn(name, args, rt_id)?;
    loop {
        match call.next_event().await {
            Some(CallEvent::Pending(e)) => println!("pending: {e}"),
            Some(CallEvent::Resolved(record)) => {
                return Ok(record.fn_return().cloned().unwrap_or(Value::Null));
            },
            Some(CallEvent::Rejected(e)) => anyhow::bail!("function {name} failed: {e}"),
            None => anyhow::bail!("function {name} ended without a result"),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging("info").map_err(anyhow::Error::msg)?;

    let cli = Cli::parse();
    let session = Session::open(&cli)?;

    match cli.command {
        Commands::Schema => {
            for name in session.schema.model_names() {
                let options = session.schema.resolve(name, None)?;
                println!("{name}\t{}\t{}", options.url(), options.server_options.protocol);
            }
        },
        Commands::Fetch { model } => {
            let model = session.model(&model).await?;
            let received = model.get_from_server().await?;
            model.upstream().settled().await;
            println!("{received} record(s) received, {} known", model.upstream().len());
        },
        Commands::List { model } => {
            let model = session.model(&model).await?;
            for record in model.items() {
                print_record(&record)?;
            }
        },
        Commands::Save { model, data } => {
            let model = session.model(&model).await?;
            let record = Record::from_value(parse_json(&data)?);
            let saved = model.save(record)?;
            model.upstream().settled().await;
            let current = saved.meta.rt_id.and_then(|rt_id| model.get_item(rt_id)).unwrap_or(saved);
            print_record(&current)?;
        },
        Commands::Push { model } => {
            let model = session.model(&model).await?;
            model.upstream().settled().await;
            let pushed = model.push_all().await;
            model.upstream().settled().await;
            println!("{pushed} queued change(s) pushed, {} still pending", model.unpushed_len());
        },
        Commands::Call { model, name, args, on } => {
            let model = session.model(&model).await?;
            let rt_id = match on {
                Some(server_id) => {
                    let key = serde_json::from_str::<Value>(&server_id)
                        .unwrap_or(Value::String(server_id.clone()));
                    let key = harmonized_types::RecordKey::from_value(&key)
                        .with_context(|| format!("invalid server id {server_id}"))?;
                    let record = model
                        .upstream()
                        .get_item_by_server_id(&key)
                        .with_context(|| format!("no record with server id {server_id}"))?;
                    record.meta.rt_id
                },
                None => None,
            };
            let result = call_function(&model, &name, parse_json(&args)?, rt_id).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        },
        Commands::Watch { model } => {
            let model = session.model(&model).await?;
            let mut changes = model.subscribe();
            let mut errors = model.subscribe_errors();
            info!("Watching {} (Ctrl-C to stop)", model.url());
            loop {
                tokio::select! {
                    change = changes.recv() => match change {
                        Ok(record) => print_record(&record)?,
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            tracing::warn!("Skipped {n} change(s)");
                        },
                        Err(_) => break,
                    },
                    Ok(event) = errors.recv() => tracing::warn!("Sync error: {}", event.error),
                    _ = tokio::signal::ctrl_c() => break,
                }
            }
        },
    }

    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn model(server: &MockServer) -> Model {
        let schema = ModelSchema::from_json_str(
            &serde_json::json!({"todos": {"base_url": format!("{}/api", server.uri()), "route": "todos"}})
                .to_string(),
        )
        .unwrap();
        let transport = ReqwestTransport::new(ClientConfig::without_retries()).unwrap();
        Model::builder("todos", &schema)
            .without_storage()
            .transports(Transports::default().with_http(Arc::new(transport)))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_call_function_returns_server_value() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/todos/add/"))
            .and(body_json(serde_json::json!({"a": 1, "b": 2})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"sum": 3})))
            .expect(1)
            .mount(&server)
            .await;

        let model = model(&server);
        model.start().await.unwrap();
        let result = call_function(&model, "add", serde_json::json!({"a": 1, "b": 2}), None).await.unwrap();
        assert_eq!(result, serde_json::json!({"sum": 3}));
    }

    #[tokio::test]
    async fn test_call_function_reports_rejection() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/todos/add/"))
            .respond_with(ResponseTemplate::new(422).set_body_string("bad args"))
            .mount(&server)
            .await;

        let model = model(&server);
        model.start().await.unwrap();
        let err = call_function(&model, "add", serde_json::json!({}), None).await.unwrap_err();
        assert!(err.to_string().contains("function add failed"), "unexpected error: {err}");
    }
}
