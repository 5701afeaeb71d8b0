use anyhow::{Context, Result};
use clap::Parser;
use dataflow_engine::ingest::RawUpload;
use dataflow_engine::llm::LlmClient;
use dataflow_engine::pipeline::ProcessingRequest;
use dataflow_engine::service::AnalyticsService;
use dataflow_engine::store::InMemoryFileStore;
use dataflow_engine::workbook::XlsxSynthesizer;
use dataflow_engine::PipelineConfig;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(name = "dataflow")]
#[command(about = "Process a tabular file into cleaned data, pivots, insights and charts")]
struct Args {
    /// CSV or xlsx file to process
    input: PathBuf,

    /// Columns to drop before analysis (comma separated)
    #[arg(long, value_delimiter = ',')]
    remove_fields: Vec<String>,

    /// Number of pivot relations to mine
    #[arg(short, long, default_value_t = 1)]
    relations: usize,

    /// Synthesize a dashboard workbook and write it next to the input
    #[arg(short, long)]
    dashboard: bool,

    /// Where to write the dashboard workbook (default: <input>.processed.xlsx)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// A question to ask about the processed file
    #[arg(short, long)]
    question: Option<String>,

    /// Path to a JSON config file with pipeline thresholds
    #[arg(long)]
    config: Option<PathBuf>,
}

fn media_type_for(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("xlsx") => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        Some("xls") => "application/vnd.ms-excel",
        _ => "text/csv",
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => PipelineConfig::load(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => PipelineConfig::default(),
    };

    let bytes = std::fs::read(&args.input)
        .with_context(|| format!("failed to read {}", args.input.display()))?;
    let file_name = args
        .input
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "upload".to_string());

    let upload = RawUpload {
        media_type: media_type_for(&args.input).to_string(),
        bytes,
        file_name,
        owner_id: "local".to_string(),
        uploaded_at: chrono::Utc::now(),
    };
    let request = ProcessingRequest {
        remove_fields: args.remove_fields.clone(),
        requested_relations: args.relations,
        description: String::new(),
        require_dashboard: args.dashboard,
    };

    let service = AnalyticsService::new(
        Arc::new(InMemoryFileStore::new()),
        Arc::new(LlmClient::from_env(&config)),
        Box::new(XlsxSynthesizer),
        config,
    );

    let file = service
        .process(upload, request)
        .await
        .map_err(|failure| anyhow::anyhow!(failure.to_string()))?;

    info!(file_id = %file.file_id, "processing complete");
    println!(
        "Processed '{}': {} rows x {} columns (sheets: {})",
        file.file_name,
        file.canonical_table.row_count(),
        file.canonical_table.column_count(),
        file.source_sheets.join(", ")
    );
    if let Some((requested, generated)) = file.insufficient_relations_notice() {
        println!("Note: {} relations requested, only {} found", requested, generated);
    }

    for pivot in &file.pivot_tables {
        println!("\nPivot: {} ({} groups)", pivot.title, pivot.rows.len());
    }

    if !file.insights.is_empty() {
        println!("\nInsights:");
        for insight in &file.insights {
            println!(
                "- [{:?}/{:?}] {}: {}",
                insight.category, insight.severity, insight.title, insight.message
            );
        }
    }

    if !file.chart_recommendations.is_empty() {
        println!("\nChart recommendations:");
        for rec in &file.chart_recommendations {
            println!(
                "- {:?} (score {:.2}, {:?}): {}",
                rec.chart_type, rec.score, rec.priority, rec.reasoning
            );
        }
    }

    if args.dashboard {
        let (_, workbook) = service.download_workbook(&file.file_id, "local").await?;
        let output = args
            .output
            .unwrap_or_else(|| args.input.with_extension("processed.xlsx"));
        std::fs::write(&output, workbook)
            .with_context(|| format!("failed to write {}", output.display()))?;
        println!("\nWorkbook written to {}", output.display());
    }

    if let Some(question) = &args.question {
        let exchange = service.ask(&file.file_id, "local", question).await?;
        println!("\nQ: {}\nA: {}", exchange.question, exchange.answer);
    }

    Ok(())
}
