#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = probook_rust::run().await {
        eprintln!("probook-rust fatal: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}
