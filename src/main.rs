//! kgchat - terminal client for a knowledge-graph chat assistant
//!
//! Connects to the assistant backend over HTTP and provides:
//! - Streamed answers with graph-query and retrieval side channels
//! - Persistent, switchable chat sessions
//! - Best-effort supporting-evidence lookup per question
//! - Memory consolidation of selected turns into the knowledge base

use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use tracing_subscriber::{EnvFilter, fmt};

use kgchat::backend::HttpBackend;
use kgchat::config::Config;
use kgchat::controller::ChatController;
use kgchat::repl::{AnsiSurface, Repl, colors};
use kgchat::retrieval::DEFAULT_TOP_K;

#[derive(Parser)]
#[command(name = "kgchat")]
#[command(about = "Terminal client for a knowledge-graph chat assistant")]
struct Args {
    /// Backend base URL
    #[arg(long, env = "KGCHAT_BACKEND_URL")]
    backend_url: Option<String>,

    /// Retrieval hits to request per question
    #[arg(long, env = "KGCHAT_TOP_K")]
    top_k: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file (from ~/.kgchat/.env or current dir)
    let env_path = dirs::home_dir()
        .map(|h| h.join(".kgchat").join(".env"))
        .filter(|p| p.exists());
    if let Some(path) = env_path {
        let _ = dotenvy::from_path(&path);
    } else {
        let _ = dotenvy::dotenv(); // fallback to current dir
    }

    // Initialize logging
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let args = Args::parse();

    // Load config file (~/.kgchat/config.toml)
    let config = Config::load();

    // Resolve values: CLI args > env vars (handled by clap) > config file > defaults
    let backend_url = args
        .backend_url
        .or(config.backend_url)
        .unwrap_or_else(|| "http://localhost:5000".to_string());

    let top_k = args
        .top_k
        .or(config.retrieval_top_k)
        .unwrap_or(DEFAULT_TOP_K);

    use colors::ansi::*;

    // Pretty startup banner
    println!();
    println!(
        "{}{}  kgchat {}{}",
        BOLD,
        MAGENTA,
        env!("CARGO_PKG_VERSION"),
        RESET
    );
    println!("{}", colors::separator(50));
    println!("{}Backend{}     {}", DIM, RESET, backend_url);
    println!("{}Evidence{}    top {}", DIM, RESET, top_k);

    let backend = Arc::new(HttpBackend::new(backend_url));
    let surface = Arc::new(AnsiSurface);
    let mut controller = ChatController::new(backend, surface).with_top_k(top_k);

    // Bind a session: resume the most recent one, or start fresh
    match controller.ensure_active().await {
        Ok(()) => {
            if let Some(meta) = controller.registry().active_meta() {
                println!(
                    "{}Session{}     {}{}{} ({} msgs)",
                    DIM, RESET, CYAN, meta.title, RESET, meta.message_count
                );
            }
        }
        Err(e) => {
            println!(
                "{}Session{}     {}unavailable{} ({})",
                DIM, RESET, YELLOW, RESET, e
            );
        }
    }

    println!("{}", colors::separator(50));
    println!();

    let mut repl = Repl::new(controller)?;
    repl.run().await
}
