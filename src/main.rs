use std::path::PathBuf;

use clap::{Parser, Subcommand};

use syllabus::config::Config;
use syllabus::course::{self, ChapterSummary, ImageTerm};
use syllabus::queue::RequestSerializer;

#[derive(Parser)]
#[command(name = "syllabus", about = "Generate course material through a rate-limited model queue")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Outline a course: one unit per --unit, plus a cover image search term.
    Outline {
        title: String,
        #[arg(long = "unit", required = true)]
        units: Vec<String>,
    },
    /// Summarize a video transcript read from a file.
    Summarize { transcript: PathBuf },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let config = Config::load()?;
    tracing::info!(provider = ?config.provider, "syllabus starting");

    let queue = RequestSerializer::from_config(&config)?;

    let output = match cli.command {
        Command::Outline { title, units } => {
            let outline = queue.submit(course::outline_request(&title, &units));
            let image = queue.submit(course::image_term_request(&title));
            let (outline, image) = tokio::join!(outline, image);

            let units = course::parse_outline(outline?)?;
            if units.is_empty() {
                anyhow::bail!("model never produced a valid outline for {title:?}");
            }
            let image: Option<ImageTerm> = image?.parse()?;

            serde_json::json!({
                "title": title,
                "image_search_term": image.map(|i| i.image_search_term),
                "units": units,
            })
        }
        Command::Summarize { transcript } => {
            let text = tokio::fs::read_to_string(&transcript).await?;
            let summary: Option<ChapterSummary> =
                queue.submit(course::summary_request(&text)).await?.parse()?;
            let Some(summary) = summary else {
                anyhow::bail!("model never produced a valid summary");
            };
            serde_json::to_value(summary)?
        }
    };

    println!("{}", serde_json::to_string_pretty(&output)?);

    queue.shutdown();
    tracing::info!(status = ?queue.status(), "syllabus shutting down");
    Ok(())
}
