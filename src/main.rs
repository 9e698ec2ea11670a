use inventory_sync::app::SyncApp;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    SyncApp::from_env().execute().await
}
