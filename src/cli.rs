use clap::{Args as ClapArgs, Parser, Subcommand};

use crate::catalog::AssetType;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct RankArgs {
    /// Maximum number of results
    #[clap(short = 'k', long)]
    pub top_k: Option<usize>,

    /// Minimum cosine similarity for semantic matches (0.0 - 1.0)
    #[clap(short, long)]
    pub min_similarity: Option<f32>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start kwsearch as a service.
    Daemon {},

    /// Search files by keyword
    Search {
        /// Search query
        #[clap(allow_hyphen_values = true)]
        query: String,

        #[clap(flatten)]
        rank_args: RankArgs,

        /// Only return files of this type
        #[clap(short = 't', long = "type", value_enum)]
        asset_type: Option<AssetType>,
    },

    /// List indexed keywords similar to a query
    Similar {
        /// Search query
        #[clap(allow_hyphen_values = true)]
        query: String,

        #[clap(flatten)]
        rank_args: RankArgs,
    },

    /// Embed every catalog keyword that is not indexed yet
    Index {
        /// Queue the task and exit without waiting for it.
        #[clap(long, default_value = "false")]
        background: bool,
    },

    /// Print index statistics
    Stats {},

    /// Register a file in the catalog
    AddFile {
        /// File name
        name: String,

        /// File location
        path: String,

        #[clap(short = 't', long = "type", value_enum)]
        asset_type: Option<AssetType>,

        /// Size in bytes
        #[clap(long, default_value = "0")]
        size: u64,

        /// Audio transcription
        #[clap(long)]
        transcription: Option<String>,

        /// Audio language
        #[clap(long)]
        language: Option<String>,

        /// Audio duration in seconds
        #[clap(long)]
        duration: Option<f64>,

        /// Document summary
        #[clap(long)]
        summary: Option<String>,

        /// Document word count
        #[clap(long)]
        word_count: Option<u64>,

        /// Comma-separated keywords
        #[clap(short = 'g', long)]
        keywords: Option<String>,
    },

    /// Attach keywords to a file
    Tag {
        file_id: u64,

        /// Comma-separated keywords
        keywords: String,
    },

    /// Attach keywords detected on a video frame
    AddFrame {
        file_id: u64,

        frame_index: u32,

        /// Comma-separated keywords
        keywords: String,

        /// Frame timestamp in seconds
        #[clap(long)]
        timestamp: Option<f64>,

        /// Detector confidence
        #[clap(long)]
        confidence: Option<f32>,
    },
}
