use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use docchat_core::{
    load_config, templates, ArtifactKind, Assistant, AssistantConfig, FieldValues,
    GenerationRequest,
};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "docchat", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// TOML config file; built-in defaults are used when absent.
    #[arg(long, env = "DOCCHAT_CONFIG")]
    config: Option<PathBuf>,

    /// Overrides `storage.data_dir` from the config.
    #[arg(long, env = "DOCCHAT_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Acting user; every record is scoped to it.
    #[arg(long, env = "DOCCHAT_USER", default_value = "local")]
    user: String,
}

#[derive(Subcommand)]
enum Command {
    /// Upload a file, or every PDF/text file under a folder.
    Upload {
        #[arg(long)]
        path: PathBuf,
        /// Build the index right after a single-file upload.
        #[arg(long, default_value_t = false)]
        process: bool,
    },
    /// List uploaded documents, newest first.
    Documents,
    /// Extract, chunk and index an uploaded document.
    Process {
        #[arg(long)]
        document: Uuid,
    },
    /// Delete a document with its index and stored bytes.
    Delete {
        #[arg(long)]
        document: Uuid,
    },
    /// Ask a question about a document.
    Ask {
        #[arg(long)]
        document: Uuid,
        /// Continue an existing session; a new one is started when omitted.
        #[arg(long)]
        session: Option<Uuid>,
        #[arg(long)]
        question: String,
    },
    /// Print the messages of a session.
    History {
        #[arg(long)]
        document: Uuid,
        #[arg(long)]
        session: Uuid,
    },
    /// List chat sessions of a document.
    Sessions {
        #[arg(long)]
        document: Uuid,
    },
    DeleteSession {
        #[arg(long)]
        document: Uuid,
        #[arg(long)]
        session: Uuid,
    },
    /// Draft a contract, petition or statement.
    Generate {
        #[arg(long)]
        kind: ArtifactKind,
        /// Template key, e.g. `residential_lease`; see `docchat templates`.
        #[arg(long = "type")]
        type_key: String,
        #[arg(long)]
        title: Option<String>,
        /// Input field as `name=value`; repeatable.
        #[arg(long = "field", value_parser = parse_field)]
        fields: Vec<(String, String)>,
        /// Extra instructions for the model.
        #[arg(long)]
        prompt: Option<String>,
    },
    /// List the draftable templates of a kind with their fields.
    Templates {
        #[arg(long)]
        kind: ArtifactKind,
    },
    /// List generated artifacts, newest first.
    Artifacts {
        #[arg(long)]
        kind: Option<ArtifactKind>,
    },
    /// Print one artifact.
    ShowArtifact {
        #[arg(long)]
        id: Uuid,
        #[arg(long, default_value_t = false)]
        html: bool,
    },
    /// Replace an artifact's body with the HTML in a file.
    EditArtifact {
        #[arg(long)]
        id: Uuid,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        html_file: PathBuf,
    },
    DeleteArtifact {
        #[arg(long)]
        id: Uuid,
    },
}

fn parse_field(raw: &str) -> Result<(String, String), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected name=value, got `{raw}`"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("empty field name in `{raw}`"));
    }
    Ok((name.to_string(), value.trim().to_string()))
}

fn read_config(cli: &Cli) -> anyhow::Result<AssistantConfig> {
    let mut config = match &cli.config {
        Some(path) => load_config(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => AssistantConfig::default(),
    };
    if let Some(data_dir) = &cli.data_dir {
        config.storage.data_dir = data_dir.clone();
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = read_config(&cli)?;
    let assistant = Assistant::open(&config).await?;
    let user = cli.user.as_str();

    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        user,
        "docchat boot"
    );

    match cli.command {
        Command::Upload { path, process } => {
            if path.is_dir() {
                upload_folder(&assistant, user, &path).await?;
            } else {
                let document = assistant.documents.upload_file(user, &path).await?;
                println!("uploaded {} as {}", document.original_name, document.document_id);
                if process {
                    let document = assistant
                        .documents
                        .process_document(user, document.document_id)
                        .await?;
                    println!("processed {}", document.document_id);
                }
            }
        }
        Command::Documents => {
            let documents = assistant.documents.list_documents(user).await?;
            if documents.is_empty() {
                println!("no documents");
            }
            for document in documents {
                println!(
                    "{}  {}  {}  {}",
                    document.document_id,
                    document.uploaded_at.format("%Y-%m-%d %H:%M"),
                    if document.processed { "processed" } else { "pending" },
                    document.original_name
                );
            }
        }
        Command::Process { document } => {
            let document = assistant.documents.process_document(user, document).await?;
            println!(
                "processed {} (index {})",
                document.document_id,
                document
                    .index_handle
                    .map(|handle| handle.to_string())
                    .unwrap_or_default()
            );
        }
        Command::Delete { document } => {
            let report = assistant.documents.delete_document(user, document).await?;
            if let Some(error) = &report.index_error {
                warn!(document_id = %document, error = %error, "index was not removed");
            }
            println!(
                "deleted {} (index removed: {}, file removed: {})",
                report.document_id, report.index_removed, report.blob_removed
            );
        }
        Command::Ask {
            document,
            session,
            question,
        } => {
            let session_id = session.unwrap_or_else(|| assistant.conversations.new_session_id());
            let outcome = assistant
                .conversations
                .ask(user, document, session_id, &question)
                .await?;

            println!("session {} ({})", outcome.session.session_id, outcome.session.title);
            println!();
            println!("{}", outcome.answer.content);
            if outcome.upstream_failure {
                eprintln!("note: the model or embedding service was unreachable; ask again later");
            }
            if !outcome.passages.is_empty() {
                println!();
                for (position, hit) in outcome.passages.iter().enumerate() {
                    println!(
                        "[{}] pages {}-{} score={:.3}",
                        position + 1,
                        hit.passage.page_start,
                        hit.passage.page_end,
                        hit.score
                    );
                }
            }
        }
        Command::History { document, session } => {
            let messages = assistant
                .conversations
                .transcript(user, document, session)
                .await?;
            if messages.is_empty() {
                println!("no messages");
            }
            for message in messages {
                println!(
                    "[{}] {}: {}",
                    message.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    message.role.as_str(),
                    message.content
                );
            }
        }
        Command::Sessions { document } => {
            for session in assistant.conversations.sessions(user, document).await? {
                println!(
                    "{}  {}  {}",
                    session.session_id,
                    session.updated_at.format("%Y-%m-%d %H:%M"),
                    session.title
                );
            }
        }
        Command::DeleteSession { document, session } => {
            assistant
                .conversations
                .delete_session(user, document, session)
                .await?;
            println!("deleted session {session}");
        }
        Command::Generate {
            kind,
            type_key,
            title,
            fields,
            prompt,
        } => {
            let mut request =
                GenerationRequest::new(kind, type_key, fields.into_iter().collect::<FieldValues>());
            request.title = title;
            request.custom_prompt = prompt;

            let artifact = assistant.artifacts.generate(user, request).await?;
            println!("{} {} ({})", artifact.kind.as_str(), artifact.artifact_id, artifact.title);
            println!();
            println!("{}", artifact.text_body);
        }
        Command::Templates { kind } => {
            for template in templates(kind) {
                println!("{}  {}  [{}]", template.key, template.name, template.category);
                for field in template.fields {
                    println!(
                        "    {}{}  {} ({})",
                        field.name,
                        if field.required { "*" } else { "" },
                        field.label,
                        field.kind.as_str()
                    );
                }
            }
        }
        Command::Artifacts { kind } => {
            for artifact in assistant.artifacts.list_artifacts(user, kind).await? {
                println!(
                    "{}  {}  {:<9}  {}",
                    artifact.artifact_id,
                    artifact.created_at.format("%Y-%m-%d %H:%M"),
                    artifact.kind.as_str(),
                    artifact.title
                );
            }
        }
        Command::ShowArtifact { id, html } => {
            let artifact = assistant.artifacts.get_artifact(user, id).await?;
            println!("{}", if html { &artifact.html_body } else { &artifact.text_body });
        }
        Command::EditArtifact {
            id,
            title,
            html_file,
        } => {
            let html = tokio::fs::read_to_string(&html_file)
                .await
                .with_context(|| format!("failed to read {}", html_file.display()))?;
            let artifact = assistant
                .artifacts
                .edit_artifact(user, id, title.as_deref(), &html)
                .await?;
            println!("updated {} ({})", artifact.artifact_id, artifact.title);
        }
        Command::DeleteArtifact { id } => {
            assistant.artifacts.delete_artifact(user, id).await?;
            println!("deleted artifact {id}");
        }
    }

    Ok(())
}

async fn upload_folder(assistant: &Assistant, user: &str, folder: &Path) -> anyhow::Result<()> {
    let report = assistant.documents.upload_folder(user, folder).await?;

    if !report.skipped.is_empty() {
        warn!(
            "skipped_files={} for folder={}",
            report.skipped.len(),
            folder.display()
        );
        for skipped in &report.skipped {
            warn!(path = %skipped.path.display(), reason = %skipped.reason, "skipped file");
        }
    }

    for document in &report.uploaded {
        println!("uploaded and processed {} as {}", document.original_name, document.document_id);
    }
    info!(
        folder = %folder.display(),
        uploaded = report.uploaded.len(),
        skipped = report.skipped.len(),
        "folder upload finished"
    );
    Ok(())
}
