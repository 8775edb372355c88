//! fieldforge CLI - create, validate and publish calculated fields
//!
//! Usage:
//!   fieldforge validate --scope <scope> --name <name> --expr <expression>
//!   fieldforge create --scope <scope> <request>...
//!   fieldforge submit --scope <scope> --name <name> --expr <expression>
//!   fieldforge list --scope <scope> [--rejections]
//!   fieldforge deprecate --scope <scope> --name <name> --version <n>
//!   fieldforge view --scope <scope> [--format yaml|json]
//!   fieldforge tools --scope <scope>
//!
//! Examples:
//!   fieldforge create --scope credit multiply LTM EBITDA by Total Leverage
//!   fieldforge submit --scope credit --name NET_DEBT --expr "LTM_EBITDA * TOTAL_LEVERAGE"

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use fieldforge::catalog::{CatalogProvider, SourceRelation, StaticCatalogProvider, WorkerCatalogProvider};
use fieldforge::config::Settings;
use fieldforge::generator::{GeneratorAdapter, WorkerCompletionClient};
use fieldforge::model::{DataType, FieldCandidate, ScopeId};
use fieldforge::pipeline::{DeprecationOutcome, FieldPipeline, FieldRequest, PipelineOutcome};
use fieldforge::probe::{ProbeEngine, WorkerProbeEngine};
use fieldforge::semantic::RegenerationEngine;
use fieldforge::store::{FieldStore, SqliteFieldStore};
use fieldforge::tools::ToolExporter;
use fieldforge::validation::{ValidationResult, Validator};
use fieldforge::worker::{EngineConnection, WorkerClient};

#[derive(Parser)]
#[command(name = "fieldforge")]
#[command(about = "fieldforge - safe calculated fields for semantic views")]
#[command(version)]
struct Cli {
    /// Path to the settings file (defaults to the standard locations)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate an expression without storing anything
    Validate {
        #[arg(short, long)]
        scope: String,
        #[arg(short, long)]
        name: String,
        #[arg(short, long)]
        expr: String,
        /// Declared result type
        #[arg(short = 't', long = "type")]
        result_type: Option<String>,
    },

    /// Generate a field from a natural-language request
    Create {
        #[arg(short, long)]
        scope: String,
        #[arg(long, default_value = "cli")]
        by: String,
        /// Replace the field at this version
        #[arg(long)]
        replace_version: Option<u64>,
        /// The request, e.g. "multiply LTM EBITDA by Total Leverage"
        #[arg(required = true)]
        request: Vec<String>,
    },

    /// Submit a hand-written field
    Submit {
        #[arg(short, long)]
        scope: String,
        #[arg(short, long)]
        name: String,
        #[arg(short, long)]
        expr: String,
        #[arg(long)]
        display_name: Option<String>,
        #[arg(short = 't', long = "type")]
        result_type: Option<String>,
        #[arg(long, default_value = "cli")]
        by: String,
        #[arg(long)]
        replace_version: Option<u64>,
    },

    /// List active fields of a scope
    List {
        #[arg(short, long)]
        scope: String,
        /// List rejected drafts instead
        #[arg(long)]
        rejections: bool,
    },

    /// Deprecate a field
    Deprecate {
        #[arg(short, long)]
        scope: String,
        #[arg(short, long)]
        name: String,
        /// Version last read
        #[arg(short, long)]
        version: u64,
    },

    /// Regenerate and print the semantic view of a scope
    View {
        #[arg(short, long)]
        scope: String,
        #[arg(short, long, default_value = "yaml")]
        format: ViewFormat,
    },

    /// Print the tool descriptors exported for a scope
    Tools {
        #[arg(short, long)]
        scope: String,
    },
}

#[derive(Clone, ValueEnum)]
enum ViewFormat {
    Yaml,
    Json,
}

/// Everything the commands need, wired from settings.
struct App {
    store: Arc<SqliteFieldStore>,
    pipeline: FieldPipeline,
    validator: Validator,
    catalog: Arc<dyn CatalogProvider>,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("FIELDFORGE_LOG").unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let settings = match &cli.config {
        Some(path) => Settings::from_file(path),
        None => Settings::load(),
    };
    let settings = match settings {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error loading settings: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let app = match App::build(settings).await {
        Ok(app) => app,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.cancel();
        }
    });

    match cli.command {
        Commands::Validate {
            scope,
            name,
            expr,
            result_type,
        } => app.cmd_validate(scope, name, expr, result_type).await,
        Commands::Create {
            scope,
            by,
            replace_version,
            request,
        } => app.cmd_create(scope, by, replace_version, request.join(" "), &cancel).await,
        Commands::Submit {
            scope,
            name,
            expr,
            display_name,
            result_type,
            by,
            replace_version,
        } => {
            let candidate = match candidate(name, expr, display_name, result_type) {
                Ok(c) => c,
                Err(e) => {
                    eprintln!("Error: {}", e);
                    return ExitCode::FAILURE;
                }
            };
            app.cmd_submit(scope, candidate, by, replace_version, &cancel).await
        }
        Commands::List { scope, rejections } => app.cmd_list(scope, rejections),
        Commands::Deprecate {
            scope,
            name,
            version,
        } => app.cmd_deprecate(scope, name, version, &cancel).await,
        Commands::View { scope, format } => app.cmd_view(scope, format).await,
        Commands::Tools { scope } => app.cmd_tools(scope).await,
    }
}

impl App {
    async fn build(settings: Settings) -> Result<Self, String> {
        let store_path = settings.store_path().map_err(|e| e.to_string())?;
        let store = Arc::new(SqliteFieldStore::open(&store_path).map_err(|e| e.to_string())?);

        let tools = Arc::new(
            ToolExporter::from_functions(settings.tools.functions.clone()).map_err(|e| e.to_string())?,
        );

        // The worker serves the probe, the completion call and live catalogs.
        let connection = settings.engine_connection().map_err(|e| e.to_string())?;
        let worker = match &connection {
            Some(_) => Some(Arc::new(
                WorkerClient::from_settings(&settings)
                    .await
                    .map_err(|e| e.to_string())?,
            )),
            None => None,
        };

        let catalog: Arc<dyn CatalogProvider> = match (&settings.catalog.path, &worker, &connection) {
            (Some(path), _, _) => Arc::new(
                StaticCatalogProvider::from_file(path).map_err(|e| format!("catalog '{}': {}", path, e))?,
            ),
            (None, Some(client), Some(conn)) if !settings.catalog.scopes.is_empty() => {
                Arc::new(live_catalog(&settings, client.clone(), conn.clone()))
            }
            _ => return Err("set catalog.path, or catalog.scopes with a connection".to_string()),
        };

        let store_dyn: Arc<dyn FieldStore> = store.clone();
        let mut regeneration = RegenerationEngine::new(catalog.clone(), store_dyn.clone(), tools);
        let mut validator = Validator::without_engine();

        if let (Some(client), Some(conn)) = (&worker, &connection) {
            if settings.probe.enabled {
                let engine: Arc<dyn ProbeEngine> = Arc::new(WorkerProbeEngine::new(client.clone(), conn.clone()));
                validator = Validator::with_probe(engine.clone(), settings.probe_retry());
                regeneration = regeneration.with_probe(engine, settings.probe_retry());
            }
        }

        let mut pipeline = FieldPipeline::new(
            catalog.clone(),
            store_dyn,
            validator.clone(),
            Arc::new(regeneration),
        );

        if let (Some(client), Some(conn)) = (&worker, &connection) {
            let completion = WorkerCompletionClient::new(
                client.clone(),
                conn.clone(),
                settings.generator.completion_function.clone(),
                settings.generator.model.clone(),
            );
            let generator = GeneratorAdapter::new(Arc::new(completion), settings.generator_retry())
                .with_max_request_chars(settings.generator.max_request_chars);
            pipeline = pipeline.with_generator(Arc::new(generator));
        }

        Ok(Self {
            store,
            pipeline,
            validator,
            catalog,
        })
    }

    async fn cmd_validate(
        &self,
        scope: String,
        name: String,
        expr: String,
        result_type: Option<String>,
    ) -> ExitCode {
        let scope = ScopeId::new(scope);
        let candidate = match candidate(name, expr, None, result_type) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("Error: {}", e);
                return ExitCode::FAILURE;
            }
        };
        let snapshot = match self.catalog.snapshot(&scope).await {
            Ok(s) => s,
            Err(e) => {
                eprintln!("Error: {}", e);
                return ExitCode::FAILURE;
            }
        };

        let draft = fieldforge::model::CalculatedFieldDefinition::draft(scope, candidate, "cli");
        let result = if self.validator.has_probe() {
            self.validator.validate(&draft, &snapshot).await
        } else {
            eprintln!("Note: no engine configured; only grammar, references and types were checked.");
            self.validator.check_static(&draft, &snapshot)
        };
        print_validation(&result);
        if result.ok {
            ExitCode::SUCCESS
        } else {
            ExitCode::FAILURE
        }
    }

    async fn cmd_create(
        &self,
        scope: String,
        by: String,
        replace_version: Option<u64>,
        request: String,
        cancel: &CancellationToken,
    ) -> ExitCode {
        if let Err(code) = self.require_engine() {
            return code;
        }
        let mut field_request = FieldRequest::new(ScopeId::new(scope), request, by);
        if let Some(version) = replace_version {
            field_request = field_request.replacing(version);
        }
        match self.pipeline.create_field(field_request, cancel).await {
            Ok(outcome) => report(outcome),
            Err(e) => {
                eprintln!("Error: {}", e);
                ExitCode::FAILURE
            }
        }
    }

    async fn cmd_submit(
        &self,
        scope: String,
        candidate: FieldCandidate,
        by: String,
        replace_version: Option<u64>,
        cancel: &CancellationToken,
    ) -> ExitCode {
        if let Err(code) = self.require_engine() {
            return code;
        }
        let scope = ScopeId::new(scope);
        match self
            .pipeline
            .submit_candidate(&scope, candidate, &by, replace_version, cancel)
            .await
        {
            Ok(outcome) => report(outcome),
            Err(e) => {
                eprintln!("Error: {}", e);
                ExitCode::FAILURE
            }
        }
    }

    /// Fields are only persisted after the zero-row check.
    fn require_engine(&self) -> Result<(), ExitCode> {
        if self.validator.has_probe() {
            return Ok(());
        }
        eprintln!("Error: no engine configured; configure a worker, a connection and probe.enabled to persist fields");
        Err(ExitCode::FAILURE)
    }

    fn cmd_list(&self, scope: String, rejections: bool) -> ExitCode {
        let scope = ScopeId::new(scope);
        if rejections {
            return match self.store.list_rejections(&scope) {
                Ok(records) => {
                    for r in &records {
                        let codes: Vec<_> = r.errors.iter().map(|e| e.code.as_str()).collect();
                        println!(
                            "{}  {}  {}  [{}]",
                            r.rejected_at.format("%Y-%m-%d %H:%M:%S"),
                            r.name,
                            r.expression_text,
                            codes.join(", ")
                        );
                    }
                    ExitCode::SUCCESS
                }
                Err(e) => {
                    eprintln!("Error: {}", e);
                    ExitCode::FAILURE
                }
            };
        }

        match self.store.list_active(&scope) {
            Ok(snapshot) => {
                if snapshot.fields.is_empty() {
                    println!("No active fields in scope '{}'.", scope);
                }
                for f in &snapshot.fields {
                    println!(
                        "{} v{} ({}) = {}",
                        f.name, f.version, f.result_type, f.expression_text
                    );
                }
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("Error: {}", e);
                ExitCode::FAILURE
            }
        }
    }

    async fn cmd_deprecate(
        &self,
        scope: String,
        name: String,
        version: u64,
        cancel: &CancellationToken,
    ) -> ExitCode {
        let scope = ScopeId::new(scope);
        match self.pipeline.deprecate(&scope, &name, version, cancel).await {
            Ok(DeprecationOutcome::Deprecated {
                definition,
                published,
                ..
            }) => {
                println!("Deprecated {} (now v{})", definition.name, definition.version);
                if !published {
                    eprintln!("Warning: the semantic view was not republished");
                }
                ExitCode::SUCCESS
            }
            Ok(DeprecationOutcome::NotFound) => {
                eprintln!("No field '{}' in scope '{}'", name, scope);
                ExitCode::FAILURE
            }
            Ok(DeprecationOutcome::Conflict { kind, current }) => {
                eprintln!("{}: current version is {} ({})", kind, current.version, current.status);
                ExitCode::FAILURE
            }
            Ok(DeprecationOutcome::Cancelled) => {
                eprintln!("Cancelled");
                ExitCode::FAILURE
            }
            Err(e) => {
                eprintln!("Error: {}", e);
                ExitCode::FAILURE
            }
        }
    }

    async fn cmd_view(&self, scope: String, format: ViewFormat) -> ExitCode {
        let scope = ScopeId::new(scope);
        let view = match self.pipeline.regeneration().regenerate(&scope).await {
            Ok(view) => view,
            Err(e) => {
                eprintln!("Regeneration failed: {}", e);
                return ExitCode::FAILURE;
            }
        };
        let rendered = match format {
            ViewFormat::Yaml => view.to_yaml().map_err(|e| e.to_string()),
            ViewFormat::Json => view.to_json().map_err(|e| e.to_string()),
        };
        match rendered {
            Ok(text) => {
                println!("{}", text);
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("Error: {}", e);
                ExitCode::FAILURE
            }
        }
    }

    async fn cmd_tools(&self, scope: String) -> ExitCode {
        let scope = ScopeId::new(scope);
        if let Err(e) = self.pipeline.regeneration().regenerate(&scope).await {
            eprintln!("Warning: regeneration failed, field list may be stale: {}", e);
        }
        let set = self.pipeline.reader().export_tools(&scope);
        match serde_json::to_string_pretty(&set) {
            Ok(json) => {
                println!("{}", json);
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("Error: {}", e);
                ExitCode::FAILURE
            }
        }
    }
}


fn live_catalog(settings: &Settings, client: Arc<WorkerClient>, conn: EngineConnection) -> WorkerCatalogProvider {
    let mut provider = WorkerCatalogProvider::new(client, conn);
    if let Some(schema) = settings.default_connection().and_then(|(_, c)| c.default_schema.clone()) {
        provider = provider.with_default_schema(schema);
    }
    // Relations were checked when the settings loaded.
    for (scope, relation) in &settings.catalog.scopes {
        if let Some(relation) = SourceRelation::parse(relation) {
            provider = provider.with_scope(ScopeId::new(scope.as_str()), relation);
        }
    }
    provider
}
fn candidate(
    name: String,
    expr: String,
    display_name: Option<String>,
    result_type: Option<String>,
) -> Result<FieldCandidate, String> {
    let mut candidate = FieldCandidate::new(name, expr);
    if let Some(display) = display_name {
        candidate = candidate.with_display_name(display);
    }
    if let Some(t) = result_type {
        let data_type = DataType::from_str(&t).ok_or_else(|| format!("unknown type '{}'", t))?;
        candidate = candidate.with_result_type(data_type);
    }
    Ok(candidate)
}

fn print_validation(result: &ValidationResult) {
    if result.ok {
        let inferred = result.inferred_type.map(|t| t.to_string()).unwrap_or_default();
        println!("OK: {} (probe: {:?})", inferred, result.probe);
        return;
    }
    eprintln!("Validation errors:");
    for issue in &result.errors {
        eprintln!("  {}", issue);
    }
}

fn report(outcome: PipelineOutcome) -> ExitCode {
    match outcome {
        PipelineOutcome::Created {
            definition,
            changed,
            published,
            ..
        } => {
            let verb = if changed { "Persisted" } else { "Unchanged" };
            println!(
                "{} {} v{} = {}",
                verb, definition.name, definition.version, definition.expression_text
            );
            if !published {
                eprintln!("Warning: the semantic view was not republished; see the logs");
            }
            ExitCode::SUCCESS
        }
        PipelineOutcome::Rejected { definition, result } => {
            eprintln!("Rejected {} = {}", definition.name, definition.expression_text);
            print_validation(&result);
            ExitCode::FAILURE
        }
        PipelineOutcome::GenerationFailed(e) => {
            eprintln!("Generation failed: {}", e);
            ExitCode::FAILURE
        }
        PipelineOutcome::Conflict { kind, current } => {
            match current {
                Some(current) => eprintln!(
                    "{}: '{}' is at version {} ({})",
                    kind, current.name, current.version, current.status
                ),
                None => eprintln!("{}", kind),
            }
            ExitCode::FAILURE
        }
        PipelineOutcome::Cancelled => {
            eprintln!("Cancelled");
            ExitCode::FAILURE
        }
    }
}
