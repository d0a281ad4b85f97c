use tessera_core::Config;

// mimalloc keeps fragmentation low for the large chunk buffers handled here,
// especially on musl-based container images.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let config = Config::from_env()?;

    let app = tessera_api::setup::initialize_app(config.clone()).await?;

    tessera_api::setup::server::start_server(&config, app.router).await?;

    app.background.shutdown().await;
    Ok(())
}
