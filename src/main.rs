use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod app;
mod catalog;
mod cli;
mod config;
mod indexer;
mod semantic;
mod storage;
#[cfg(test)]
mod tests;
mod web;

use app::{service::Ingested, AppFactory};
use catalog::{AssetCreate, FrameCreate};
use cli::{Command, RankArgs};
use semantic::preprocess::split_keyword_list;

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Wait for the keywords queued by an ingestion call and report them.
fn finish_ingest<T>(ingested: Ingested<T>) -> anyhow::Result<()> {
    let indexed = match ingested.ticket {
        Some(ticket) => ticket.wait().context("failed to index new keywords")?,
        None => 0,
    };
    print_json(&serde_json::json!({
        "added": ingested.added,
        "indexed": indexed,
    }))
}

fn main() -> anyhow::Result<()> {
    // logs go to stderr, command output to stdout
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = cli::Args::parse();

    let paths = AppFactory::get_paths()?;
    let app = AppFactory::create_app_service(&paths)?;

    let result = match args.command {
        Command::Daemon {} => return web::start_daemon(app),

        Command::Search {
            query,
            rank_args: RankArgs {
                top_k,
                min_similarity,
            },
            asset_type,
        } => app
            .search(&query, top_k, min_similarity, asset_type)
            .and_then(|results| print_json(&results)),

        Command::Similar {
            query,
            rank_args: RankArgs {
                top_k,
                min_similarity,
            },
        } => app
            .similar_keywords(&query, top_k, min_similarity)
            .and_then(|keywords| print_json(&keywords)),

        Command::Index { background } => app.submit_index_all().and_then(|ticket| {
            if background {
                // the queue drains on shutdown below
                println!("queued task {}", ticket.id);
                return Ok(());
            }
            let task_id = ticket.id.clone();
            let indexed = ticket.wait()?;
            println!("task {task_id}: {indexed} keywords indexed");
            Ok(())
        }),

        Command::Stats {} => app.stats().and_then(|stats| print_json(&stats)),

        Command::AddFile {
            name,
            path,
            asset_type,
            size,
            transcription,
            language,
            duration,
            summary,
            word_count,
            keywords,
        } => {
            let create = AssetCreate {
                name,
                path,
                asset_type,
                size_bytes: size,
                transcription,
                language,
                duration_secs: duration,
                summary,
                word_count,
            };
            app.add_file(create).and_then(|file| {
                print_json(&file)?;
                match keywords {
                    Some(keywords) => {
                        finish_ingest(app.tag_file(file.id, &split_keyword_list(&keywords))?)
                    }
                    None => Ok(()),
                }
            })
        }

        Command::Tag { file_id, keywords } => app
            .tag_file(file_id, &split_keyword_list(&keywords))
            .and_then(finish_ingest),

        Command::AddFrame {
            file_id,
            frame_index,
            keywords,
            timestamp,
            confidence,
        } => {
            let frame = FrameCreate {
                frame_index,
                timestamp,
                confidence,
                keywords: split_keyword_list(&keywords),
            };
            app.add_frame(file_id, frame).and_then(finish_ingest)
        }
    };

    app.shutdown();
    result
}
