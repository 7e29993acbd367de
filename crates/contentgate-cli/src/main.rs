//! contentgate - operator CLI for the compliance-gated content pipeline
//!
//! ## Commands
//!
//! - `evaluate`: run the rights evaluator on one reference
//! - `check`: run the quality gate on a generated package
//! - `run`: dry-run a brief through the whole pipeline with local stand-ins
//!   for the generation and publish collaborators
//! - `verify-audit`: verify the stored audit chain, optionally exporting it
//! - `verify-export`: re-verify an exported audit artifact offline

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use contentgate_core::audit::ChainReport;
use contentgate_core::fakes::{ScriptedPublisher, StaticGenerator};
use contentgate_core::quality::QualityContext;
use contentgate_core::{
    read_audit_export, write_audit_export, AuditExport, AuditTrail, ContentBrief, ContentGate,
    ContentPackage, Decision, DuplicateIndex, GateError, PipelineConfig, QualityGate, Reference,
    RightsEvaluator, RightsRegistry, SystemClock, UnitState, UsageContext,
};
use contentgate_state::{StoreConfig, SurrealStore};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, Level};

#[derive(Parser)]
#[command(name = "contentgate")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Compliance-gated content pipeline", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Pipeline configuration file (TOML)
    #[arg(short, long, global = true, env = "CONTENTGATE_CONFIG")]
    config: Option<PathBuf>,

    /// Rights registry file (JSON); built-in trademark list when omitted
    #[arg(long, global = true, env = "CONTENTGATE_REGISTRY")]
    registry: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate one reference in a usage context
    Evaluate {
        /// Reference file (JSON)
        #[arg(short, long)]
        reference: PathBuf,

        /// Usage context text (default: the reference's usage note)
        #[arg(long)]
        context: Option<String>,
    },

    /// Run the quality gate on a generated package
    Check {
        /// Content package file (JSON)
        #[arg(short, long)]
        package: PathBuf,

        /// Rights decisions for the package's references (JSON array)
        #[arg(long)]
        rights: PathBuf,

        /// Treat the unit as having been granted elevated review
        #[arg(long)]
        elevated: bool,
    },

    /// Drive a brief through the pipeline without external collaborators
    Run {
        /// Content brief file (JSON)
        #[arg(short, long)]
        brief: PathBuf,

        /// References file (JSON array)
        #[arg(short, long)]
        references: PathBuf,

        /// Persist to the configured database instead of memory
        #[arg(long)]
        persist: bool,

        /// Write the audit trail to this directory afterwards
        #[arg(long)]
        export: Option<PathBuf>,
    },

    /// Verify the stored audit chain from genesis to head
    VerifyAudit {
        /// Database URL (default: CONTENTGATE_DB_URL or local surrealkv)
        #[arg(long)]
        db_url: Option<String>,

        /// Write the audit trail to this directory
        #[arg(long)]
        export: Option<PathBuf>,
    },

    /// Re-verify an exported audit artifact
    VerifyExport {
        /// Directory holding audit.json and audit.digest
        dir: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    contentgate_core::telemetry::init_tracing(cli.json, level);

    let config = load_config(cli.config.as_deref())?;

    let result = match cli.command {
        Commands::Evaluate { reference, context } => {
            let registry = load_registry(cli.registry.as_deref())?;
            cmd_evaluate(&config, registry, &reference, context.as_deref())
        }
        Commands::Check {
            package,
            rights,
            elevated,
        } => cmd_check(&config, &package, &rights, elevated),
        Commands::Run {
            brief,
            references,
            persist,
            export,
        } => {
            let registry = load_registry(cli.registry.as_deref())?;
            cmd_run(
                config,
                registry,
                &brief,
                &references,
                persist,
                export.as_deref(),
            )
            .await
        }
        Commands::VerifyAudit { db_url, export } => {
            cmd_verify_audit(&config, db_url, export.as_deref()).await
        }
        Commands::VerifyExport { dir } => cmd_verify_export(&config, &dir),
    };

    contentgate_core::metrics::METRICS.flush();
    result
}

// ---------------------------------------------------------------------------
// Command implementations
// ---------------------------------------------------------------------------

fn cmd_evaluate(
    config: &PipelineConfig,
    registry: RightsRegistry,
    reference_path: &Path,
    context: Option<&str>,
) -> Result<()> {
    let reference: Reference = read_json_file(reference_path)?;
    let text = context
        .map(str::to_string)
        .unwrap_or_else(|| default_context(&reference));

    let evaluator = RightsEvaluator::new(registry, config);
    let decision = evaluator.evaluate(
        &reference,
        &UsageContext::new(&reference.id, text),
        chrono::Utc::now(),
    )?;

    println!("{}", serde_json::to_string_pretty(&decision)?);
    Ok(())
}

fn cmd_check(
    config: &PipelineConfig,
    package_path: &Path,
    rights_path: &Path,
    elevated: bool,
) -> Result<()> {
    let mut package: ContentPackage = read_json_file(package_path)?;
    let rights: Vec<Decision> = read_json_file(rights_path)?;

    let gate = QualityGate::new(config, Arc::new(DuplicateIndex::new()));
    let report = gate.check(
        &mut package,
        QualityContext {
            rights_decisions: &rights,
            elevated_review: elevated,
        },
        chrono::Utc::now(),
    )?;

    let out = serde_json::json!({
        "decision": report.decision,
        "repairs": report.repairs,
        "content_hash": report.content_hash,
        "score": report.score,
        "package": package,
    });
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}

async fn cmd_run(
    config: PipelineConfig,
    registry: RightsRegistry,
    brief_path: &Path,
    references_path: &Path,
    persist: bool,
    export: Option<&Path>,
) -> Result<()> {
    let brief: ContentBrief = read_json_file(brief_path)?;
    let references: Vec<Reference> = read_json_file(references_path)?;

    let mut builder = ContentGate::builder()
        .config(config)
        .registry(registry)
        .generator(Arc::new(StaticGenerator::new()))
        .publisher(Arc::new(ScriptedPublisher::new(brief.destination.clone())));
    if persist {
        let store = Arc::new(
            SurrealStore::from_env()
                .await
                .context("Failed to connect to contentgate database")?,
        );
        builder = builder
            .audit_store(store.clone())
            .unit_store(store.clone())
            .ledger(store);
    }
    let gate = builder.build().await?;

    let unit_id = gate.submit(brief, references).await?;
    println!("Submitted unit {unit_id}");

    loop {
        match gate.advance(&unit_id).await {
            Ok(t) if t.from == t.to => {
                println!("  {} (held, retry later)", t.to);
                break;
            }
            Ok(t) => {
                let verdict = t.verdict.map(|v| format!(" [{v}]")).unwrap_or_default();
                println!("  {} -> {}{}", t.from, t.to, verdict);
                if t.to.is_terminal() {
                    break;
                }
            }
            Err(GateError::PolicyRejection { reason, audit_event }) => {
                println!("  archived: {reason} (audit event {audit_event})");
                break;
            }
            Err(e) => {
                println!("  stopped: {e}");
                break;
            }
        }
    }

    let status = gate.get_status(&unit_id).await?;
    println!("{}", serde_json::to_string_pretty(&status)?);

    let report = gate.verify_audit().await?;
    print_report(&report);

    if let Some(dir) = export {
        let export = AuditExport::capture(gate.audit()).await?;
        let path = write_audit_export(&export, dir)?;
        println!("Audit exported to {}", path.display());
    }

    if status.state != UnitState::Published {
        info!(unit_id = %unit_id, state = %status.state, "unit not published");
    }
    Ok(())
}

async fn cmd_verify_audit(
    config: &PipelineConfig,
    db_url: Option<String>,
    export: Option<&Path>,
) -> Result<()> {
    let mut store_config = StoreConfig::from_env();
    if let Some(url) = db_url {
        store_config.url = url;
    }
    let store = SurrealStore::connect(&store_config)
        .await
        .context("Failed to connect to contentgate database")?;

    let trail = AuditTrail::new(
        Arc::new(store),
        Arc::new(SystemClock),
        config.clock_skew_tolerance(),
    );
    let report = trail.verify_all().await?;
    print_report(&report);

    if let Some(dir) = export {
        let export = AuditExport::capture(&trail).await?;
        let path = write_audit_export(&export, dir)?;
        println!("Audit exported to {}", path.display());
    }

    if !report.intact() {
        bail!("audit chain verification failed");
    }
    Ok(())
}

fn cmd_verify_export(config: &PipelineConfig, dir: &Path) -> Result<()> {
    let export = read_audit_export(dir)
        .with_context(|| format!("Failed to read audit export from {}", dir.display()))?;
    println!(
        "Export from {} with {} events",
        export.exported_at.format("%Y-%m-%d %H:%M:%S UTC"),
        export.events.len()
    );

    let report = export.reverify(config.clock_skew_tolerance())?;
    print_report(&report);
    if !report.intact() {
        bail!("exported audit chain does not verify");
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn load_config(path: Option<&Path>) -> Result<PipelineConfig> {
    match path {
        Some(p) => PipelineConfig::load(p)
            .with_context(|| format!("Failed to load config from {}", p.display())),
        None => Ok(PipelineConfig::default()),
    }
}

fn load_registry(path: Option<&Path>) -> Result<RightsRegistry> {
    match path {
        Some(p) => read_json_file(p),
        None => Ok(RightsRegistry::with_known_trademarks()),
    }
}

fn read_json_file<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
}

fn default_context(reference: &Reference) -> String {
    if reference.usage_note.trim().is_empty() {
        reference.title.clone()
    } else {
        reference.usage_note.clone()
    }
}

fn print_report(report: &ChainReport) {
    match &report.first_break {
        None => println!(
            "Audit chain intact: {} events verified ({}..={})",
            report.verified, report.from, report.to
        ),
        Some(b) => println!(
            "Audit chain BROKEN at seq {} ({:?}): {} [{} verified before the break]",
            b.seq, b.kind, b.detail, report.verified
        ),
    }
}
