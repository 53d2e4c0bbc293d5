//! Triage CLI - automated support ticket resolution
//!
//! Usage:
//!   triage init                 Write default configuration
//!   triage submit <subject>     Submit a ticket and run the pipeline
//!   triage status <ticket-id>   Show a ticket's current state
//!   triage trace <ticket-id>    Show the full stage-by-stage trace

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;
use triage_agent::HttpAgentClient;
use triage_core::{PipelineConfig, Priority, Ticket, TicketRequest};
use triage_pipeline::PipelineEngine;
use triage_store::MemoryStore;

#[derive(Parser)]
#[command(name = "triage")]
#[command(author, version, about = "Automated support ticket resolution")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Working root holding .triage/config.toml
    #[arg(long, default_value = ".")]
    root: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write the default configuration to .triage/config.toml
    Init,

    /// Submit a ticket and run it through the pipeline
    Submit {
        /// One-line subject
        subject: String,

        /// Full ticket description
        #[arg(short, long)]
        description: String,

        /// Customer identifier
        #[arg(short, long)]
        customer: String,

        /// Related order identifier
        #[arg(short, long)]
        order: Option<String>,

        /// Pre-assigned category (the classifier may override it)
        #[arg(long)]
        category: Option<String>,

        /// Ticket priority
        #[arg(short, long, default_value = "normal")]
        priority: CliPriority,

        /// Stream live pipeline events while the run progresses
        #[arg(short, long)]
        follow: bool,
    },

    /// Show a ticket's current state
    Status {
        /// Ticket id
        ticket_id: String,
    },

    /// Show the full stage-by-stage trace for a ticket
    Trace {
        /// Ticket id
        ticket_id: String,

        /// Emit the report as JSON
        #[arg(long)]
        json: bool,
    },
}

/// CLI-friendly priority enum
#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliPriority {
    Low,
    Normal,
    High,
    Urgent,
}

impl From<CliPriority> for Priority {
    fn from(p: CliPriority) -> Self {
        match p {
            CliPriority::Low => Priority::Low,
            CliPriority::Normal => Priority::Normal,
            CliPriority::High => Priority::High,
            CliPriority::Urgent => Priority::Urgent,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Init => cmd_init(&cli.root),
        Commands::Submit {
            subject,
            description,
            customer,
            order,
            category,
            priority,
            follow,
        } => {
            let request = TicketRequest {
                customer_id: customer,
                order_id: order,
                subject,
                description,
                category,
                priority: priority.into(),
            };
            cmd_submit(&cli.root, request, follow).await
        }
        Commands::Status { ticket_id } => cmd_status(&cli.root, &ticket_id).await,
        Commands::Trace { ticket_id, json } => cmd_trace(&cli.root, &ticket_id, json).await,
    }
}

fn build_engine(root: &PathBuf) -> Result<PipelineEngine> {
    let config = PipelineConfig::load_or_default(root).context("Failed to load configuration")?;
    let agent =
        Arc::new(HttpAgentClient::new(&config.agent).context("Failed to build agent client")?);
    let store = Arc::new(MemoryStore::new());
    Ok(PipelineEngine::new(agent, store, config))
}

fn cmd_init(root: &PathBuf) -> Result<()> {
    PipelineConfig::write_default(root).context("Failed to write configuration")?;
    println!("Initialized triage in {:?}", root);
    println!("Created:");
    println!("  .triage/config.toml");
    Ok(())
}

async fn cmd_submit(root: &PathBuf, request: TicketRequest, follow: bool) -> Result<()> {
    let engine = build_engine(root)?;

    if follow {
        // Subscribe before the run starts so no event is missed
        let ticket = Ticket::from_request(request);
        let id = ticket.id.clone();
        let mut events = engine.subscribe(&id);
        engine.start(ticket).await?;

        println!("Submitted ticket {}", id);
        while let Some(event) = events.recv().await {
            let stage = event.stage.as_deref().unwrap_or("-");
            println!(
                "{} [{:>14}] {:?}: {}",
                event.timestamp.format("%H:%M:%S%.3f"),
                stage,
                event.kind,
                event.message
            );

            let terminal = event.message.starts_with("pipeline finished")
                || event.message.starts_with("pipeline aborted")
                || event.message.starts_with("ticket escalated");
            if terminal {
                break;
            }
        }

        print_outcome(&engine, &id).await?;
    } else {
        let ticket = engine.process(request).await?;
        print_ticket(&ticket);
    }
    Ok(())
}

async fn print_outcome(engine: &PipelineEngine, ticket_id: &str) -> Result<()> {
    if let Some(ticket) = engine.status(ticket_id).await? {
        println!();
        print_ticket(&ticket);
    }
    Ok(())
}

async fn cmd_status(root: &PathBuf, ticket_id: &str) -> Result<()> {
    let engine = build_engine(root)?;
    match engine.status(ticket_id).await? {
        Some(ticket) => print_ticket(&ticket),
        None => println!("No ticket found with id {}", ticket_id),
    }
    Ok(())
}

async fn cmd_trace(root: &PathBuf, ticket_id: &str, json: bool) -> Result<()> {
    let engine = build_engine(root)?;
    let report = engine
        .trace(ticket_id)
        .await
        .context("Failed to load trace")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    print_ticket(&report.ticket);
    println!();
    println!("Stages:");
    for trace in &report.stages {
        let duration = trace
            .duration_ms
            .map(|ms| format!("{}ms", ms))
            .unwrap_or_else(|| "-".to_string());
        let confidence = trace
            .confidence
            .map(|c| format!("{:.2}", c))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "  {}. {:<14} {:?} ({}, confidence {}, {} calls)",
            trace.ordinal,
            trace.stage.name(),
            trace.status,
            duration,
            confidence,
            trace.calls
        );
        if let Some(note) = &trace.note {
            println!("     note: {}", note);
        }
    }
    println!();
    println!("Total: {}ms, {} tokens", report.total_duration_ms, report.total_tokens);
    Ok(())
}

fn print_ticket(ticket: &Ticket) {
    println!("Ticket {}", ticket.id);
    println!("  subject:    {}", ticket.subject);
    println!("  customer:   {}", ticket.customer_id);
    println!("  category:   {}", ticket.category);
    println!("  status:     {:?}", ticket.status);
    if let Some(resolution) = &ticket.resolution {
        println!("  resolution: {}", resolution);
    }
    if let Some(confidence) = ticket.confidence {
        println!("  confidence: {:.2}", confidence);
    }
}
