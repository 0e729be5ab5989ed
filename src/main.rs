use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    fmtd::run_server().await
}
