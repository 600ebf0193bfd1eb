use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    sitescout_cli::cli::run().await
}
