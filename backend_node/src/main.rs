use neuromesh_backend::api::start_server;
use neuromesh_backend::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let config = Config::from_env();
    log::info!(
        "starting NeuroMesh backend v{} on {}",
        env!("CARGO_PKG_VERSION"),
        config.bind_addr()
    );
    start_server(config).await
}
