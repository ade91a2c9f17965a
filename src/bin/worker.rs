#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = probook_rust::run_worker().await {
        eprintln!("probook-worker fatal: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}
