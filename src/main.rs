#[tokio::main]
async fn main() -> anyhow::Result<()> {
    picam_server::run().await
}
