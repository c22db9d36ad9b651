use anyhow::Context;
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use exam_context_core::{
    load_analysis_file, load_folder_best_effort, persist, CancelSignal, DocumentView, ExamPipeline,
    FigureSource, HttpFigureSource, InMemoryQuestionRepository, LocalBlobStore, LocalFigureDir,
    LocalPageDir, ParsedAnalysis, PipelineOptions, PipelineReport, StrategyKind,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

type Pipeline = ExamPipeline<Box<dyn FigureSource>, LocalPageDir, LocalBlobStore, InMemoryQuestionRepository>;

#[derive(Parser)]
#[command(name = "exam-context", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[command(flatten)]
    sources: SourceArgs,

    /// Maximum figures extracted concurrently per document.
    #[arg(long, env = "EXAM_WORKERS", default_value = "4")]
    workers: usize,

    /// Extraction strategies in the order they are tried.
    #[arg(
        long,
        env = "EXAM_STRATEGIES",
        value_delimiter = ',',
        default_value = "provider_figure,page_crop"
    )]
    strategies: Vec<StrategyKind>,

    /// Timeout for one extraction attempt or upload, in milliseconds.
    #[arg(long, env = "EXAM_ATTEMPT_TIMEOUT_MS", default_value = "20000")]
    attempt_timeout_ms: u64,
}

#[derive(Args)]
struct SourceArgs {
    /// Provider figure API base URL. Takes precedence over --figure-dir.
    #[arg(long, env = "EXAM_FIGURE_ENDPOINT")]
    figure_endpoint: Option<String>,

    /// Provider API key sent with figure requests.
    #[arg(long, env = "EXAM_FIGURE_API_KEY", hide_env_values = true)]
    figure_api_key: Option<String>,

    /// Folder of pre-exported figures: {dir}/{document}/{figure}.png
    #[arg(long, env = "EXAM_FIGURE_DIR", default_value = "figures")]
    figure_dir: PathBuf,

    /// Folder of rendered pages: {dir}/{document}/page-{n}.png
    #[arg(long, env = "EXAM_PAGE_DIR", default_value = "pages")]
    page_dir: PathBuf,

    /// Folder that receives extracted images.
    #[arg(long, env = "EXAM_BLOB_DIR", default_value = "blobs")]
    blob_dir: PathBuf,
}

#[derive(Subcommand)]
enum Command {
    /// Reconstruct one analysis file into context blocks and questions.
    Process {
        /// Analysis JSON produced by the document-analysis provider.
        #[arg(long)]
        input: PathBuf,
        /// Exam the questions belong to; duplicates are scoped to it.
        #[arg(long, env = "EXAM_ID")]
        exam_id: String,
        /// Save new questions once deduplication finished.
        #[arg(long, default_value_t = false)]
        persist: bool,
        /// Write the JSON result here instead of stdout.
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Reconstruct every analysis file found recursively in a folder.
    Batch {
        /// Folder that contains analysis JSON files.
        #[arg(long)]
        folder: PathBuf,
        #[arg(long, env = "EXAM_ID")]
        exam_id: String,
        #[arg(long, default_value_t = false)]
        persist: bool,
        /// Folder that receives one result file per document.
        #[arg(long)]
        output_dir: Option<PathBuf>,
        /// Documents processed at the same time.
        #[arg(long, default_value = "2")]
        documents: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        "exam-context boot"
    );

    let options = PipelineOptions {
        worker_limit: cli.workers,
        strategy_order: cli.strategies.clone(),
        attempt_timeout: Duration::from_millis(cli.attempt_timeout_ms),
        ..PipelineOptions::default()
    };
    let repo = Arc::new(InMemoryQuestionRepository::default());
    let pipeline = Arc::new(build_pipeline(&cli.sources, options, repo.clone())?);

    let cancel = CancelSignal::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; cancelling in-flight documents");
            on_interrupt.cancel();
        }
    });

    match cli.command {
        Command::Process {
            input,
            exam_id,
            persist: save,
            output,
        } => {
            let parsed = load_analysis_file(&input)
                .with_context(|| format!("reading analysis file {}", input.display()))?;
            let report = process_document(&pipeline, parsed, &exam_id, &cancel).await?;
            if save {
                save_report(&report, &repo).await?;
            }
            emit(&report, output.as_deref()).await?;
        }
        Command::Batch {
            folder,
            exam_id,
            persist: save,
            output_dir,
            documents,
        } => {
            let loaded = load_folder_best_effort(&folder)?;
            for skipped in &loaded.skipped_files {
                warn!(path = %skipped.path.display(), reason = %skipped.reason, "skipped analysis file");
            }
            if let Some(dir) = &output_dir {
                tokio::fs::create_dir_all(dir).await?;
            }

            let limit = Arc::new(Semaphore::new(documents.max(1)));
            let mut tasks = Vec::new();
            for parsed in loaded.documents {
                let pipeline = pipeline.clone();
                let cancel = cancel.clone();
                let exam_id = exam_id.clone();
                let limit = limit.clone();
                tasks.push(tokio::spawn(async move {
                    let _permit = limit.acquire_owned().await?;
                    process_document(&pipeline, parsed, &exam_id, &cancel).await
                }));
            }

            let mut completed = 0usize;
            let mut failed = 0usize;
            for task in tasks {
                match task.await? {
                    Ok(report) => {
                        if save {
                            save_report(&report, &repo).await?;
                        }
                        let target = output_dir
                            .as_ref()
                            .map(|dir| dir.join(format!("{}.json", report.document_id)));
                        emit(&report, target.as_deref()).await?;
                        completed += 1;
                    }
                    Err(error) => {
                        error!(%error, "document failed");
                        failed += 1;
                    }
                }
            }
            println!(
                "{completed} documents processed, {failed} failed, {} skipped at {}",
                loaded.skipped_files.len(),
                Utc::now().to_rfc3339()
            );
        }
    }

    Ok(())
}

fn build_pipeline(
    sources: &SourceArgs,
    options: PipelineOptions,
    repo: Arc<InMemoryQuestionRepository>,
) -> anyhow::Result<Pipeline> {
    let figures: Box<dyn FigureSource> = match &sources.figure_endpoint {
        Some(endpoint) => Box::new(
            HttpFigureSource::new(endpoint, sources.figure_api_key.clone())
                .with_context(|| format!("invalid figure endpoint {endpoint}"))?,
        ),
        None => Box::new(LocalFigureDir::new(&sources.figure_dir)),
    };

    let pipeline = ExamPipeline::new(
        Arc::new(figures),
        Arc::new(LocalPageDir::new(&sources.page_dir)),
        Arc::new(LocalBlobStore::new(&sources.blob_dir)),
        repo,
        options,
    )?;
    Ok(pipeline)
}

async fn process_document(
    pipeline: &Pipeline,
    parsed: ParsedAnalysis,
    exam_id: &str,
    cancel: &CancelSignal,
) -> anyhow::Result<PipelineReport> {
    for figure in &parsed.duplicate_figures {
        warn!(document = %parsed.document.document_id, %figure, "dropped repeated figure id");
    }

    let document_id = parsed.document.document_id.clone();
    let report = pipeline
        .run(parsed.document, exam_id, cancel)
        .await
        .with_context(|| format!("processing document {document_id}"))?;

    for warning in &report.warnings {
        warn!(document = %document_id, kind = ?warning.kind, "{warning}");
    }
    info!(
        document = %document_id,
        stage = ?report.stage,
        blocks = report.blocks.len(),
        questions = report.questions.len(),
        pending_images = report.pending_images(),
        "document processed"
    );
    Ok(report)
}

async fn save_report(report: &PipelineReport, repo: &InMemoryQuestionRepository) -> anyhow::Result<()> {
    match persist(report, repo).await {
        Ok(saved) => info!(document = %report.document_id, saved = saved.len(), "questions saved"),
        Err(error) => warn!(document = %report.document_id, %error, "questions not saved"),
    }
    Ok(())
}

async fn emit(report: &PipelineReport, target: Option<&Path>) -> anyhow::Result<()> {
    let rendered = serde_json::to_string_pretty(&DocumentView::from(report))?;
    match target {
        Some(path) => {
            tokio::fs::write(path, rendered)
                .await
                .with_context(|| format!("writing {}", path.display()))?;
        }
        None => println!("{rendered}"),
    }
    Ok(())
}
