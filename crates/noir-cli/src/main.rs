//! Noir CLI
//!
//! The `noir` command runs explainable risk investigations and inspects the
//! records they leave behind.
//!
//! ## Commands
//!
//! - `investigate`: Run one investigation against scripted primitives
//! - `plan`: Print the plan the static planner produces for a target
//! - `reassess`: Recompute the assessment of a stored investigation
//! - `show`: Print a stored investigation
//! - `dashboard`: Summarize every stored investigation

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{info, warn, Level};

use noir_core::{
    DashboardProjection, EngineConfig, FsInvestigationStore, Investigation, InvestigationPlan,
    InvestigationService, InvestigationStore, RiskAssessment, RiskEngine, RiskPolicy, Scenario,
    StaticPlanner, StatusReport, StepStatusView, Target, TargetKind, TraceItem,
    TraceSubscription,
};

const DEFAULT_PRIMITIVES: &str = "whois,web_search,reputation,page_content,news_search";

#[derive(Parser)]
#[command(name = "noir")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Explainable risk investigations for domains, companies and URLs", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON output and JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Engine configuration file (TOML)
    #[arg(short, long, global = true, env = "NOIR_CONFIG")]
    config: Option<PathBuf>,

    /// Directory holding stored investigations
    #[arg(
        long,
        global = true,
        env = "NOIR_STORE_DIR",
        default_value = ".noir/investigations"
    )]
    store_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an investigation and print its risk report
    Investigate {
        /// Domain, company name or URL to investigate
        target: String,

        /// Kind of target: domain, company or url
        #[arg(short, long, default_value = "domain")]
        kind: TargetKind,

        /// Scenario file scripting each primitive's responses (JSON)
        #[arg(short, long)]
        scenario: PathBuf,

        /// Run a follow-up round when high-severity evidence turns up
        #[arg(long)]
        adaptive: bool,

        /// Add a news search for domain and url targets
        #[arg(long)]
        include_news: bool,

        /// Print trace events as they happen
        #[arg(short, long)]
        follow: bool,

        /// Do not persist the finished investigation
        #[arg(long)]
        no_store: bool,
    },

    /// Print the static plan for a target
    Plan {
        /// Domain, company name or URL
        target: String,

        /// Kind of target: domain, company or url
        #[arg(short, long, default_value = "domain")]
        kind: TargetKind,

        /// Primitives assumed available
        #[arg(short, long, value_delimiter = ',', default_value = DEFAULT_PRIMITIVES)]
        primitives: Vec<String>,

        /// Add a news search for domain and url targets
        #[arg(long)]
        include_news: bool,
    },

    /// Recompute the assessment of a stored investigation
    Reassess {
        /// Investigation id
        id: String,
    },

    /// Print a stored investigation
    Show {
        /// Investigation id
        id: String,

        /// Include the full status trace
        #[arg(short, long)]
        trace: bool,
    },

    /// Summarize every stored investigation
    Dashboard,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    noir_core::telemetry::init_tracing(cli.json, level);

    let config =
        EngineConfig::load(cli.config.as_deref()).context("Failed to load engine configuration")?;
    let output = Output { json: cli.json };

    match cli.command {
        Commands::Investigate {
            target,
            kind,
            scenario,
            adaptive,
            include_news,
            follow,
            no_store,
        } => {
            let mut config = config;
            config.planner.adaptive |= adaptive;
            config.planner.include_news |= include_news;
            let store_dir = (!no_store).then_some(cli.store_dir.as_path());
            let target = Target::new(kind, target)?;
            let inv = cmd_investigate(config, &scenario, store_dir, target, follow, output).await?;
            output.report(&inv)
        }
        Commands::Plan {
            target,
            kind,
            primitives,
            include_news,
        } => {
            let mut planner_config = config.planner;
            planner_config.include_news |= include_news;
            let plan = cmd_plan(
                StaticPlanner::new(planner_config),
                &Target::new(kind, target)?,
                primitives,
            )?;
            output.plan(&plan)
        }
        Commands::Reassess { id } => {
            let store = open_store(&cli.store_dir)?;
            let (inv, fresh) = cmd_reassess(&store, &config, &id).await?;
            output.reassessment(&inv, &fresh)
        }
        Commands::Show { id, trace } => {
            let store = open_store(&cli.store_dir)?;
            let inv = load(&store, &id).await?;
            output.report(&inv)?;
            if trace {
                output.trace(&inv)?;
            }
            Ok(())
        }
        Commands::Dashboard => {
            let store = open_store(&cli.store_dir)?;
            let view = cmd_dashboard(&store).await?;
            output.dashboard(&view)
        }
    }
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

fn open_store(dir: &Path) -> Result<FsInvestigationStore> {
    FsInvestigationStore::new(dir)
        .with_context(|| format!("Failed to open investigation store at {}", dir.display()))
}

async fn load(store: &FsInvestigationStore, id: &str) -> Result<Investigation> {
    let record = store
        .get(id)
        .await
        .with_context(|| format!("Investigation {id} not found in store"))?;
    Ok(Investigation::from_stored(&record)?)
}

/// Run one investigation to completion. Ctrl-C cancels it; the partial
/// result is still assessed and returned.
async fn cmd_investigate(
    config: EngineConfig,
    scenario: &Path,
    store_dir: Option<&Path>,
    target: Target,
    follow: bool,
    output: Output,
) -> Result<Arc<Investigation>> {
    let registry = Scenario::from_file(scenario)
        .and_then(|s| s.registry())
        .with_context(|| format!("Failed to load scenario {}", scenario.display()))?;
    info!(
        primitives = registry.len(),
        scenario = %scenario.display(),
        "loaded scenario"
    );

    let mut builder = InvestigationService::builder(registry).with_config(config);
    if let Some(dir) = store_dir {
        builder = builder.with_store(Arc::new(open_store(dir)?));
    }
    let service = builder.build()?;

    let (id, subscription) = service.start_subscribed(target);
    let printer = follow.then(|| tokio::spawn(follow_trace(subscription, output)));

    let inv = tokio::select! {
        inv = service.wait(&id) => inv?,
        _ = tokio::signal::ctrl_c() => {
            warn!(investigation_id = %id, "interrupted, cancelling investigation");
            service.cancel(&id)?;
            service.wait(&id).await?
        }
    };
    if let Some(printer) = printer {
        printer.await.ok();
    }
    Ok(inv)
}

fn cmd_plan(
    planner: StaticPlanner,
    target: &Target,
    primitives: Vec<String>,
) -> Result<InvestigationPlan> {
    let available: BTreeSet<String> = primitives
        .into_iter()
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect();
    let plan = planner.plan_for(target, &available)?;
    plan.validate(&available)?;
    Ok(plan)
}

/// Recompute the assessment from the stored ledger, replaying any recorded
/// analysis exchange instead of calling the service again.
async fn cmd_reassess(
    store: &FsInvestigationStore,
    config: &EngineConfig,
    id: &str,
) -> Result<(Investigation, RiskAssessment)> {
    let inv = load(store, id).await?;
    let engine = RiskEngine::new(RiskPolicy::standard(), config.risk.clone());
    let recorded = inv.assessment.as_ref().and_then(|a| a.analysis.as_ref());
    let fresh = engine
        .reassess(&inv.ledger, &inv.coverage(), recorded)
        .with_context(|| format!("Failed to reassess investigation {id}"))?;
    Ok((inv, fresh))
}

async fn cmd_dashboard(store: &FsInvestigationStore) -> Result<DashboardProjection> {
    let records = store.list(None).await?;
    Ok(DashboardProjection::from_stored(&records)?)
}

async fn follow_trace(mut subscription: TraceSubscription, output: Output) {
    while let Some(item) = subscription.recv().await {
        if let Err(e) = output.trace_item(&item) {
            warn!(error = %e, "failed to print trace event");
        }
    }
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct ReportView<'a> {
    investigation_id: &'a str,
    target: String,
    status: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    failure_reason: Option<&'a str>,
    steps: Vec<StepStatusView>,
    evidence_count: usize,
    assessment: Option<&'a RiskAssessment>,
}

#[derive(Serialize)]
struct ReassessView<'a> {
    investigation_id: &'a str,
    stored_score: Option<f64>,
    matches_stored: bool,
    assessment: &'a RiskAssessment,
}

#[derive(Clone, Copy)]
struct Output {
    json: bool,
}

impl Output {
    fn print_json<T: Serialize>(&self, value: &T) -> Result<()> {
        println!("{}", serde_json::to_string_pretty(value)?);
        Ok(())
    }

    fn report(&self, inv: &Investigation) -> Result<()> {
        let status = inv.status_report();
        if self.json {
            return self.print_json(&ReportView {
                investigation_id: inv.id.as_str(),
                target: inv.target.to_string(),
                status: inv.status.as_str(),
                failure_reason: inv.failure_reason.as_deref(),
                steps: status.steps,
                evidence_count: inv.ledger.len(),
                assessment: inv.assessment.as_ref(),
            });
        }

        println!("Investigation {} ({})", inv.id, inv.target);
        println!("  status:   {}", inv.status);
        if let Some(reason) = &inv.failure_reason {
            println!("  reason:   {reason}");
        }
        if let Some(planning) = &inv.planning {
            let fallback = if planning.used_fallback {
                " (fallback)"
            } else {
                ""
            };
            println!("  plan:     {}{fallback}", planning.strategy);
        }
        print_steps(&status);
        println!("  evidence: {} record(s)", inv.ledger.len());
        if let Some(assessment) = &inv.assessment {
            print_assessment(assessment);
        }
        Ok(())
    }

    fn plan(&self, plan: &InvestigationPlan) -> Result<()> {
        if self.json {
            return self.print_json(plan);
        }
        println!("Plan ({}, {} steps)", plan.strategy, plan.len());
        for step in &plan.steps {
            let required = if step.required { "required" } else { "optional" };
            println!(
                "  {:<20} {:<14} {:<9} {}",
                step.step_id,
                step.primitive_name,
                required,
                step.label.as_deref().unwrap_or("-")
            );
            if !step.depends_on.is_empty() {
                println!("      after: {}", step.depends_on.join(", "));
            }
            println!("      params: {}", serde_json::Value::Object(step.parameters.clone()));
        }
        Ok(())
    }

    fn reassessment(&self, inv: &Investigation, fresh: &RiskAssessment) -> Result<()> {
        let stored_score = inv.assessment.as_ref().map(|a| a.score);
        let matches_stored = stored_score == Some(fresh.score);
        if self.json {
            return self.print_json(&ReassessView {
                investigation_id: inv.id.as_str(),
                stored_score,
                matches_stored,
                assessment: fresh,
            });
        }
        println!("Reassessed {} ({})", inv.id, inv.target);
        match stored_score {
            Some(score) => println!(
                "  stored score {score:.1}, recomputed {:.1}: {}",
                fresh.score,
                if matches_stored { "match" } else { "DIFFERENT" }
            ),
            None => println!("  no stored assessment"),
        }
        print_assessment(fresh);
        Ok(())
    }

    fn trace(&self, inv: &Investigation) -> Result<()> {
        if self.json {
            return self.print_json(&inv.trace);
        }
        println!("  trace:");
        for event in &inv.trace {
            println!(
                "    #{:<3} {} {:<12} {} -> {}{}",
                event.seq,
                event.timestamp.format("%H:%M:%S%.3f"),
                event.entity_id,
                event.old_status.as_deref().unwrap_or("-"),
                event.new_status,
                event
                    .detail
                    .as_deref()
                    .map(|d| format!(" ({d})"))
                    .unwrap_or_default()
            );
        }
        Ok(())
    }

    fn trace_item(&self, item: &TraceItem) -> Result<()> {
        if self.json {
            println!("{}", serde_json::to_string(item)?);
            return Ok(());
        }
        match item {
            TraceItem::Event(event) => println!(
                "[{}] {} {} -> {}{}",
                event.seq,
                event.entity_id,
                event.old_status.as_deref().unwrap_or("-"),
                event.new_status,
                event
                    .detail
                    .as_deref()
                    .map(|d| format!(" ({d})"))
                    .unwrap_or_default()
            ),
            TraceItem::Gap { missed } => println!("[..] {missed} event(s) missed"),
        }
        Ok(())
    }

    fn dashboard(&self, view: &DashboardProjection) -> Result<()> {
        if self.json {
            return self.print_json(view);
        }
        println!("Investigations: {}", view.investigations);
        for (status, count) in &view.by_status {
            println!("  {status:<10} {count}");
        }
        if !view.by_label.is_empty() {
            println!("Labels:");
            for (label, count) in &view.by_label {
                println!("  {label:<10} {count}");
            }
        }
        if let Some(mean) = view.mean_score {
            println!("Mean score: {mean:.2}");
        }
        println!("Degraded assessments: {}", view.degraded_assessments);
        if !view.failing_primitives.is_empty() {
            println!("Most failing primitives:");
            for entry in &view.failing_primitives {
                println!("  {:<14} {}", entry.primitive, entry.failures);
            }
        }
        Ok(())
    }
}

fn print_steps(status: &StatusReport) {
    if status.steps.is_empty() {
        return;
    }
    println!("  steps:");
    for step in &status.steps {
        println!(
            "    {:<22} {:<14} {:<10} {} attempt(s){}",
            step.step_id,
            step.primitive_name,
            step.status.as_str(),
            step.attempt_count,
            step.reason
                .as_deref()
                .map(|r| format!("  {r}"))
                .unwrap_or_default()
        );
    }
}

fn print_assessment(assessment: &RiskAssessment) {
    println!(
        "  score:    {:.1}/100 ({}), confidence {:.2}",
        assessment.score, assessment.label, assessment.confidence
    );
    if assessment.analysis.is_some() {
        println!("  heuristic score {:.1}", assessment.heuristic_score);
    }
    if !assessment.flags.is_empty() {
        let flags: Vec<&str> = assessment.flags.iter().map(|f| f.as_str()).collect();
        println!("  flags:    {}", flags.join(", "));
    }
    if !assessment.rationale.is_empty() {
        println!("  rationale:");
        for entry in &assessment.rationale {
            println!(
                "    {:+7.2}  {} [{}]",
                entry.weight, entry.explanation, entry.record_id
            );
        }
    }
    println!("  {}", assessment.explanation);
    if !assessment.recommended_actions.is_empty() {
        println!("  recommended actions:");
        for action in &assessment.recommended_actions {
            println!("    - {action}");
        }
    }
}
