//! bgbatch command-line tool
//!
//! Batch background removal and frame animation for image folders.

#[cfg(feature = "cli")]
use bgbatch::cli;

#[cfg(feature = "cli")]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    cli::main().await
}

#[cfg(not(feature = "cli"))]
fn main() {
    panic!("CLI feature not enabled. Please rebuild with --features cli");
}
