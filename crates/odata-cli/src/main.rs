//! OData model and request CLI
//!
//! Inspects a YAML model and exercises the protocol core without a server.
//!
//! # Usage
//!
//! ```bash
//! # Check that a model builds
//! odata --model models/demo.yaml check
//!
//! # Show the resolved AST of a request URI
//! odata --model models/demo.yaml parse "/odata.svc/Customers('A1')/Orders?\$top=2"
//!
//! # Print CSDL
//! odata --model models/demo.yaml metadata
//!
//! # Decompose a multipart batch body
//! odata batch --file body.txt --boundary batch_1
//!
//! # Run one request through the pipeline against an empty data source
//! odata --model models/demo.yaml request GET "/odata.svc/Customers/\$count"
//! ```

use std::io::{self, Read};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{debug, info};

use odata_core::batch::parse_batch;
use odata_core::processor::{
    ChangesetTransaction, DataSource, DataSourceError, ProcessorOutput, ReadRequest, WriteRequest,
};
use odata_core::render::csdl_xml;
use odata_core::uri::ast::TargetKind;
use odata_core::{
    ContentNegotiator, EdmRegistry, Method, ModelDefinition, ODataRequest, Pipeline, ServiceConfig,
    UriParser,
};

#[derive(Parser)]
#[command(name = "odata")]
#[command(version)]
#[command(about = "Inspect OData models, URIs and batch bodies")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// YAML model file
    #[arg(long, short, global = true, env = "ODATA_MODEL")]
    model: Option<PathBuf>,

    /// Output format
    #[arg(long, short = 'o', global = true, default_value = "text", value_enum)]
    format: OutputFormat,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Json,
    Text,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the model and report violations
    Check,

    /// Parse a request URI against the model
    Parse {
        /// Full request URI, including the service root
        uri: String,
    },

    /// Print the model as CSDL XML
    Metadata,

    /// Decompose a multipart/mixed batch body
    Batch {
        /// Body file (reads stdin if not provided)
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Multipart boundary of the outer batch
        #[arg(short, long)]
        boundary: String,
    },

    /// Run one request through the pipeline against an empty data source
    Request {
        /// GET, POST, PUT, PATCH or DELETE
        method: String,

        uri: String,

        /// Request header as `Name: value` (repeatable)
        #[arg(short = 'H', long = "header")]
        headers: Vec<String>,

        /// Request body file
        #[arg(short, long)]
        body: Option<PathBuf>,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,odata_core=debug".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = ServiceConfig::from_env();

    let result = match &cli.command {
        Commands::Check => cmd_check(&cli, &config),
        Commands::Parse { uri } => cmd_parse(&cli, &config, uri),
        Commands::Metadata => cmd_metadata(&cli, &config),
        Commands::Batch { file, boundary } => cmd_batch(&cli, &config, file.clone(), boundary),
        Commands::Request {
            method,
            uri,
            headers,
            body,
        } => cmd_request(&cli, config.clone(), method, uri, headers, body.clone()),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if cli.format == OutputFormat::Json {
                println!("{}", serde_json::json!({ "error": format!("{e:#}") }));
            } else {
                eprintln!("error: {e:#}");
            }
            ExitCode::FAILURE
        }
    }
}

// =============================================================================
// COMMAND IMPLEMENTATIONS
// =============================================================================

fn load_registry(cli: &Cli, config: &ServiceConfig) -> Result<Arc<EdmRegistry>> {
    let path = cli
        .model
        .as_ref()
        .ok_or_else(|| anyhow!("no model given; use --model or ODATA_MODEL"))?;
    let definition = ModelDefinition::load(path)?;
    info!(model = %path.display(), declarations = definition.declarations.len(), "model loaded");
    Ok(Arc::new(EdmRegistry::from_definition(
        definition,
        &config.container_name,
    )))
}

fn cmd_check(cli: &Cli, config: &ServiceConfig) -> Result<()> {
    let registry = load_registry(cli, config)?;
    let model = match registry.entity_data_model() {
        Ok(model) => model,
        Err(err) => {
            if cli.format == OutputFormat::Json {
                println!("{}", serde_json::to_string_pretty(err.violations())?);
            } else {
                for violation in err.violations() {
                    println!("{violation}");
                }
            }
            return Err(anyhow!("model is inconsistent"));
        }
    };

    let container = model.container();
    let summary = serde_json::json!({
        "container": container.name,
        "types": model.declared_types().count(),
        "entity_sets": container.entity_sets.iter().map(|s| &s.name).collect::<Vec<_>>(),
        "singletons": container.singletons.iter().map(|s| &s.name).collect::<Vec<_>>(),
        "function_imports": container.function_imports.iter().map(|f| &f.name).collect::<Vec<_>>(),
        "action_imports": container.action_imports.iter().map(|a| &a.name).collect::<Vec<_>>(),
    });
    match cli.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&summary)?),
        OutputFormat::Text => {
            println!("container {} is consistent", container.name);
            println!("  types:        {}", summary["types"]);
            println!("  entity sets:  {}", summary["entity_sets"]);
            println!("  singletons:   {}", summary["singletons"]);
            println!("  functions:    {}", summary["function_imports"]);
            println!("  actions:      {}", summary["action_imports"]);
        }
    }
    Ok(())
}

fn cmd_parse(cli: &Cli, config: &ServiceConfig, uri: &str) -> Result<()> {
    let registry = load_registry(cli, config)?;
    let model = registry.entity_data_model()?;
    let root = config.service_root()?;
    let parser = UriParser::new(&model, &root).with_max_expand_depth(config.max_expand_depth);
    let parsed = parser.parse(uri)?;

    match cli.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&parsed)?),
        OutputFormat::Text => {
            println!("canonical: {}", parsed.to_uri_string());
            println!("resource:  {}", parsed.relative.describe());
            if let Some(resource) = parsed.resource_path() {
                let target = &resource.target;
                println!(
                    "target:    {:?} {}{}",
                    target.kind,
                    target.type_name.as_deref().unwrap_or("-"),
                    if target.collection { " (collection)" } else { "" }
                );
                if let Some(set) = &target.entity_set {
                    println!("entity set: {set}");
                }
            }
            for option in parsed.query_options() {
                println!("  {} = {}", option.name(), option.value_string());
            }
        }
    }
    Ok(())
}

fn cmd_metadata(cli: &Cli, config: &ServiceConfig) -> Result<()> {
    let registry = load_registry(cli, config)?;
    let model = registry.entity_data_model()?;
    print!("{}", csdl_xml(&model)?);
    Ok(())
}

fn cmd_batch(cli: &Cli, config: &ServiceConfig, file: Option<PathBuf>, boundary: &str) -> Result<()> {
    let body = read_input(file)?;
    let content = parse_batch(&body, boundary, config.max_batch_parts)?;
    debug!(components = content.len(), requests = content.request_count(), "batch decomposed");

    match cli.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&content)?),
        OutputFormat::Text => {
            for (i, component) in content.components.iter().enumerate() {
                match component {
                    odata_core::batch::RequestComponent::Request(request) => {
                        println!("[{i}] {} {}", request.method, request.url);
                    }
                    odata_core::batch::RequestComponent::Changeset { boundary, requests } => {
                        println!("[{i}] changeset {boundary}");
                        for request in requests {
                            let id = request.content_id.as_deref().unwrap_or("-");
                            println!("      {} {} (Content-ID {id})", request.method, request.url);
                        }
                    }
                }
            }
        }
    }
    Ok(())
}

fn cmd_request(
    cli: &Cli,
    config: ServiceConfig,
    method: &str,
    uri: &str,
    headers: &[String],
    body: Option<PathBuf>,
) -> Result<()> {
    let registry = load_registry(cli, &config)?;
    let method: Method = method.parse().map_err(|e: String| anyhow!(e))?;
    let mut request = ODataRequest::new(method, uri);
    for header in headers {
        let (name, value) = header
            .split_once(':')
            .ok_or_else(|| anyhow!("header '{header}' is not 'Name: value'"))?;
        request.headers.insert(name.trim(), value.trim());
    }
    if let Some(path) = body {
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("reading body {}", path.display()))?;
        request = request.with_body(text);
    }

    let pipeline = Pipeline::new(
        registry,
        config,
        ContentNegotiator::with_defaults(),
        Arc::new(EmptySource),
    )?;
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let run = runtime.block_on(pipeline.run(request));

    match cli.format {
        OutputFormat::Json => {
            let out = serde_json::json!({
                "request_id": run.request_id.to_string(),
                "status": run.response.status,
                "states": run.states,
                "headers": run.response.headers,
                "body": run.response.text(),
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        OutputFormat::Text => {
            println!("{}", run.response.status);
            for (name, value) in run.response.headers.iter() {
                println!("{name}: {value}");
            }
            println!();
            println!("{}", run.response.text());
        }
    }
    Ok(())
}

fn read_input(file: Option<PathBuf>) -> Result<String> {
    match file {
        Some(path) => {
            std::fs::read_to_string(&path).with_context(|| format!("failed to read '{}'", path.display()))
        }
        None => {
            let mut buffer = String::new();
            io::stdin()
                .read_to_string(&mut buffer)
                .context("failed to read stdin")?;
            Ok(buffer)
        }
    }
}

// =============================================================================
// EMPTY DATA SOURCE
// =============================================================================

/// Answers every read with nothing and refuses writes.
struct EmptySource;

#[async_trait]
impl DataSource for EmptySource {
    async fn read(&self, request: &ReadRequest) -> Result<ProcessorOutput, DataSourceError> {
        let target = &request.resource.target;
        Ok(match target.kind {
            TargetKind::Count => ProcessorOutput::Count(0),
            TargetKind::EntityCollection => ProcessorOutput::Entities {
                items: Vec::new(),
                total: Some(0),
                next_link: None,
            },
            TargetKind::Reference if target.collection => ProcessorOutput::Entities {
                items: Vec::new(),
                total: Some(0),
                next_link: None,
            },
            _ => ProcessorOutput::Entity(None),
        })
    }

    async fn write(&self, request: &WriteRequest) -> Result<ProcessorOutput, DataSourceError> {
        Err(DataSourceError::Unsupported(format!(
            "{} on {}",
            request.kind.as_str(),
            request.resource.path_string()
        )))
    }

    async fn begin_changeset(&self) -> Result<Box<dyn ChangesetTransaction>, DataSourceError> {
        Err(DataSourceError::Unsupported("changesets".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEMO: &str = include_str!("../models/demo.yaml");

    #[test]
    fn demo_model_builds() {
        let definition = ModelDefinition::from_yaml_str(DEMO).unwrap();
        let registry = EdmRegistry::from_definition(definition, "Container");
        let model = registry.entity_data_model().unwrap();
        assert_eq!(model.container().name, "DemoService");
        assert!(model.entity_set("Customers").is_some());
        assert!(model.function_import("TopCustomers").is_some());
    }

    #[tokio::test]
    async fn empty_source_answers_counts_with_zero() {
        let definition = ModelDefinition::from_yaml_str(DEMO).unwrap();
        let registry = Arc::new(EdmRegistry::from_definition(definition, "Container"));
        let pipeline = Pipeline::new(
            registry,
            ServiceConfig::default(),
            ContentNegotiator::with_defaults(),
            Arc::new(EmptySource),
        )
        .unwrap();

        let run = pipeline.run(ODataRequest::get("/odata.svc/Orders/$count")).await;
        assert_eq!(run.response.status, 200);
        assert_eq!(run.response.text(), "0");

        let run = pipeline
            .run(ODataRequest::new(Method::Delete, "/odata.svc/Orders(1)"))
            .await;
        assert_eq!(run.response.status, 501);
    }

    #[test]
    fn cli_parses_global_options_after_subcommand() {
        let cli = Cli::try_parse_from(["odata", "parse", "/odata.svc/Customers", "-o", "json"]).unwrap();
        assert!(cli.format == OutputFormat::Json);
        assert!(matches!(cli.command, Commands::Parse { .. }));
    }
}
