use storefront_infra::ShopConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ShopConfig::load()?;
    storefront_observability::init(config.log_format);

    storefront_worker::run(config, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "cannot listen for ctrl-c");
        }
    })
    .await
}
