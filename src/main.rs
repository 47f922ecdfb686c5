use anyhow::Context;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{EnvFilter, fmt};

use fixline::transport::{Connector, TlsConnector};
use fixline::{Config, Credentials, FixSession, Side, Symbol};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Initialize logger
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,fixline=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_level(true)
        .init();

    tracing::info!("🦀 Fixline starting (FIX 4.4 session client)...");

    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("failed to install rustls crypto provider"))?;

    // 2. Load configuration and credentials
    dotenv::dotenv().ok();
    let config = Config::load_default()?;
    let credentials = Credentials::from_env()?;

    let connector: Arc<dyn Connector> = Arc::new(TlsConnector::new(
        config.connection.danger_accept_invalid_certs,
    ));

    // 3. Market data session
    let md_session = FixSession::new(
        config.market_data_session(credentials.clone()),
        connector.clone(),
    );
    md_session.start()?;
    md_session
        .wait_logged_on(config.logon_grace())
        .await
        .context("market data session logon failed")?;

    // 4. Subscribe and let the first snapshots arrive
    let symbols: Vec<Symbol> = config.demo.symbols.iter().map(Symbol::new).collect();
    md_session.send_market_data_request(&symbols).await?;
    tokio::time::sleep(Duration::from_secs(3)).await;

    let quantity = config.demo.order_quantity;
    for symbol in &symbols {
        match (
            md_session.bid_for_quantity(symbol, quantity),
            md_session.offer_for_quantity(symbol, quantity),
        ) {
            (Some(bid), Some(offer)) => {
                tracing::info!("{}: bid {} / offer {} for quantity {}", symbol, bid, offer, quantity);
            }
            _ => tracing::warn!("{}: no depth for quantity {}", symbol, quantity),
        }
    }

    // 5. Order entry session
    let order_session = FixSession::new(
        config.order_session(credentials.clone()),
        connector.clone(),
    );
    order_session.start()?;
    order_session
        .wait_logged_on(config.logon_grace())
        .await
        .context("order session logon failed")?;

    // 6. Place the demo orders on the first symbol
    let symbol = symbols.first().cloned().context("no symbols configured")?;
    let slippage = config.demo.limit_fok_slippage;
    let run_id = Utc::now().format("%Y%m%d%H%M%S").to_string();
    let pause = Duration::from_secs(1);

    order_session
        .place_market(format!("{run_id}-buy-market"), symbol.clone(), Side::Buy, quantity)
        .await?;
    tokio::time::sleep(pause).await;

    order_session
        .place_market(format!("{run_id}-sell-market"), symbol.clone(), Side::Sell, quantity)
        .await?;
    tokio::time::sleep(pause).await;

    match md_session.offer_for_quantity(&symbol, quantity) {
        Some(offer) => {
            order_session
                .place_limit_fok(
                    format!("{run_id}-buy-limit-fok"),
                    symbol.clone(),
                    Side::Buy,
                    quantity,
                    offer + slippage,
                )
                .await?;
            tokio::time::sleep(pause).await;
        }
        None => tracing::warn!("{}: no offer depth, skipping limit FOK buy", symbol),
    }

    match md_session.bid_for_quantity(&symbol, quantity) {
        Some(bid) => {
            order_session
                .place_limit_fok(
                    format!("{run_id}-sell-limit-fok"),
                    symbol.clone(),
                    Side::Sell,
                    quantity,
                    bid - slippage,
                )
                .await?;
            tokio::time::sleep(pause).await;
        }
        None => tracing::warn!("{}: no bid depth, skipping limit FOK sell", symbol),
    }

    // 7. Collect execution results and shut down
    tokio::time::sleep(Duration::from_secs(3)).await;
    tracing::info!("Final order states:");
    for (clordid, state) in order_session.orders().all() {
        tracing::info!("  {} => {:?}", clordid, state);
    }

    if let Err(e) = md_session.stop().await {
        tracing::warn!("Market data session closed with error: {}", e);
    }
    if let Err(e) = order_session.stop().await {
        tracing::warn!("Order session closed with error: {}", e);
    }

    Ok(())
}
