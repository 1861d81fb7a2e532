use anyhow::Result;
use civicsight::assistant::{Assistant, ResponseStatus};
use civicsight::config::Config;
use civicsight::llm::LlmClient;
use clap::Parser;
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "civicsight")]
#[command(about = "Natural-language analytics over municipal service requests")]
struct Args {
    /// The question to answer; omit for an interactive session
    question: Option<String>,

    /// Path to the SQLite database (overrides CIVICSIGHT_DATABASE_PATH)
    #[arg(short, long)]
    database: Option<PathBuf>,

    /// Session identifier for conversational context
    #[arg(short, long, default_value = "cli")]
    session: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let mut config = Config::from_env();
    if let Some(database) = args.database {
        config.database_path = database;
    }
    info!(database = %config.database_path.display(), "civicsight starting");

    let backend = Arc::new(LlmClient::new(
        config.api_key.clone(),
        config.base_url.clone(),
        config.model.clone(),
        config.backend_timeout,
    ));
    let assistant = Assistant::new(config, backend);

    match args.question {
        Some(question) => {
            let response = assistant.submit_question(&question, &args.session).await;
            print_response(&response.answer, response.status);
        }
        None => {
            let stdin = std::io::stdin();
            loop {
                print!("? ");
                std::io::stdout().flush()?;
                let mut line = String::new();
                if stdin.lock().read_line(&mut line)? == 0 {
                    break;
                }
                let question = line.trim();
                if question.is_empty() || question == "exit" || question == "quit" {
                    break;
                }
                let response = assistant.submit_question(question, &args.session).await;
                print_response(&response.answer, response.status);
            }
        }
    }

    Ok(())
}

fn print_response(answer: &str, status: ResponseStatus) {
    match status {
        ResponseStatus::Ok => println!("{}\n", answer),
        ResponseStatus::ClarificationNeeded => println!("[needs clarification] {}\n", answer),
        ResponseStatus::Error => println!("[error] {}\n", answer),
    }
}
