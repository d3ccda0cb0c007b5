use clap::Parser;
use grounded_docgen::{
    agent::Orchestrator,
    config::AppConfig,
    finance::FinancialInputs,
    models::{AssistantType, ChunkMetadata, GenerationRequest, Scope},
    retrieval::InMemoryIndex,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(
    name = "docgen",
    about = "Generate a grounded business document from a prompt, local documents and optional financial inputs"
)]
struct Cli {
    /// Assistant type (general, pitch, financial_summary, ...); classified from the prompt when omitted
    #[arg(long = "type", value_parser = parse_assistant_type)]
    assistant_type: Option<AssistantType>,

    /// Text file to index for retrieval; repeatable
    #[arg(long = "doc")]
    docs: Vec<PathBuf>,

    /// JSON file with financial inputs
    #[arg(long)]
    finance: Option<PathBuf>,

    /// Force web search
    #[arg(long, default_value_t = false)]
    web: bool,

    /// Use the escalation model
    #[arg(long, default_value_t = false)]
    escalate: bool,

    /// The request itself
    #[arg(required = true, trailing_var_arg = true)]
    prompt: Vec<String>,
}

fn parse_assistant_type(raw: &str) -> Result<AssistantType, String> {
    AssistantType::parse(raw).ok_or_else(|| format!("unknown assistant type \"{}\"", raw))
}

/// One chunk per blank-line separated paragraph.
async fn load_document(index: &InMemoryIndex, tenant_id: Uuid, path: &Path) -> std::io::Result<usize> {
    let text = tokio::fs::read_to_string(path).await?;
    let document_id = path.display().to_string();
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| document_id.clone());

    let mut count = 0;
    for (i, paragraph) in text.split("\n\n").map(str::trim).filter(|p| !p.is_empty()).enumerate() {
        let metadata = ChunkMetadata {
            document_id: document_id.clone(),
            document_name: name.clone(),
            chunk_index: i as u32,
            page: None,
            section: None,
            url: None,
        };
        index.insert(tenant_id, &format!("{}#{}", document_id, i), paragraph, metadata).await;
        count += 1;
    }
    Ok(count)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config = AppConfig::from_env();
    let scope = Scope {
        tenant_id: Uuid::new_v4(),
        user_id: Uuid::new_v4(),
        document_ids: Vec::new(),
    };

    let index = Arc::new(InMemoryIndex::new());
    for path in &cli.docs {
        let chunks = load_document(&index, scope.tenant_id, path).await?;
        info!(path = %path.display(), chunks, "Loaded document");
    }

    let mut request = GenerationRequest::new(scope, cli.prompt.join(" "));
    request.assistant_type = cli.assistant_type;
    request.use_documents = !cli.docs.is_empty();
    request.force_web_search = cli.web;
    request.escalate = cli.escalate;
    if let Some(path) = &cli.finance {
        let raw = tokio::fs::read_to_string(path).await?;
        request.financial_inputs = Some(serde_json::from_str::<FinancialInputs>(&raw)?);
    }

    let orchestrator = Orchestrator::from_config(&config, index)?;

    match orchestrator.run(request).await {
        Ok(response) => {
            println!("{}", serde_json::to_string_pretty(&response)?);
            Ok(())
        }
        Err(e) => {
            eprintln!("Generation failed: {}", e);
            Err(Box::new(e) as Box<dyn std::error::Error>)
        }
    }
}
