use clap::Parser;

/// A restartable, persistent web crawler.
#[derive(Parser, Debug)]
#[command(name = "trawl")]
#[command(about = "Crawl a set of seed URLs into a durable state database")]
#[command(version)]
pub struct Cli {
    /// Seed URLs to start crawling from
    #[arg(required = true)]
    pub seeds: Vec<String>,

    /// Crawl state database path
    #[arg(long, default_value = "crawldb")]
    pub state: String,

    /// Concurrent workers
    #[arg(short = 'c', long, default_value = "10")]
    pub concurrency: usize,

    /// Maximum link depth
    #[arg(long, default_value = "10")]
    pub depth: u32,

    /// Comma-separated list of allowed URL schemes
    #[arg(long, default_value = "http,https")]
    pub schemes: String,

    /// Extra deny patterns (regex) for the ignore scope; repeatable
    #[arg(long = "ignore")]
    pub ignore_patterns: Vec<String>,

    /// Write crawl records to this JSONL file when done
    #[arg(short, long)]
    pub output: Option<String>,

    /// Keep the state database when the crawl completes
    #[arg(long)]
    pub keep_db: bool,

    /// User agent for requests
    #[arg(long, default_value = "trawl/0.4")]
    pub user_agent: String,

    /// Request timeout in seconds
    #[arg(long, default_value = "45")]
    pub timeout: u64,
}
