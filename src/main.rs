use metrics_assistant::logging::init_logging;
use metrics_assistant::{AssistantConfig, MetricsAssistant, SchemaStore};

use anyhow::{Context, Result};
use clap::Parser;
use std::io::Write;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

#[derive(Parser)]
#[command(name = "metrics-assistant")]
#[command(about = "Ask questions about system health in plain language")]
#[command(version)]
struct Args {}

#[derive(Debug, PartialEq, Eq)]
enum ReplCommand<'a> {
    Quit,
    Skip,
    ListMetrics,
    Ask(&'a str),
}

fn classify(line: &str) -> ReplCommand<'_> {
    let line = line.trim();
    if line.is_empty() {
        return ReplCommand::Skip;
    }
    match line.to_ascii_lowercase().as_str() {
        "quit" | "exit" | "q" => ReplCommand::Quit,
        "metrics" | "help" => ReplCommand::ListMetrics,
        _ => ReplCommand::Ask(line),
    }
}

fn prompt() -> Result<()> {
    print!("\nYour question: ");
    std::io::stdout().flush()?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_logging("warn");
    let _args = Args::parse();

    let config = AssistantConfig::from_env().context("Failed to load configuration")?;
    let schema = SchemaStore::load(&config.schema_path).context("Failed to load metric schema")?;
    let assistant =
        MetricsAssistant::from_config(&config, schema).context("Failed to initialize assistant")?;
    info!("Assistant ready");

    println!("{}", assistant.schema().describe());
    println!("\nAsk a question about system health. Type 'quit' to exit.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        prompt()?;
        let line = match lines.next_line().await? {
            Some(line) => line,
            None => {
                println!();
                break;
            }
        };

        match classify(&line) {
            ReplCommand::Quit => break,
            ReplCommand::Skip => continue,
            ReplCommand::ListMetrics => println!("{}", assistant.schema().describe()),
            ReplCommand::Ask(question) => {
                let answer = assistant.handle_turn(question).await;
                println!("{}", answer);
            }
        }
    }

    Ok(())
}
