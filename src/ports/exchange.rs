// =============================================================================
// ExchangePort — per-venue order placement and market data
// =============================================================================
//
// Two implementations: `BinanceExchange` forwards to the signed REST client
// in `binance::client`, and `PaperExchange` fills every order at the last
// known ticker price (adapted from `execution.rs::ExecutionEngine::execute_demo`,
// generalised behind the same trait LIVE uses).

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use rust_decimal::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::binance::client::BinanceClient;
use crate::errors::{EngineError, EngineResult};
use crate::types::Side;

/// Best bid/ask/last snapshot for a symbol.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Ticker {
    pub last: Decimal,
    pub bid: Decimal,
    pub ask: Decimal,
}

/// Acknowledgement of an order placement, filled or accepted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderAck {
    pub order_id: String,
    pub filled_price: Decimal,
    pub filled_qty: Decimal,
}

#[async_trait]
pub trait ExchangePort: Send + Sync {
    fn venue(&self) -> &str;

    async fn ticker(&self, symbol: &str) -> EngineResult<Ticker>;

    async fn create_market_order(
        &self,
        symbol: &str,
        side: Side,
        amount_base: Decimal,
    ) -> EngineResult<OrderAck>;

    async fn create_limit_order(
        &self,
        symbol: &str,
        side: Side,
        amount_base: Decimal,
        price: Decimal,
    ) -> EngineResult<OrderAck>;

    async fn balance(&self, asset: &str) -> EngineResult<Decimal>;

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> EngineResult<()>;

    /// Feed a fresh reference price observed elsewhere (e.g. by the
    /// orchestrator's market-data fetch) into this port. A no-op for venues
    /// with their own live ticker; `PaperExchange` uses it to track real
    /// market data without a price feed of its own.
    fn sync_reference_price(&self, _symbol: &str, _price: Decimal) {}
}

// =============================================================================
// BinanceExchange
// =============================================================================

pub struct BinanceExchange {
    venue: String,
    client: BinanceClient,
}

impl BinanceExchange {
    pub fn new(venue: impl Into<String>, client: BinanceClient) -> Self {
        Self {
            venue: venue.into(),
            client,
        }
    }

    fn side_str(side: Side) -> &'static str {
        match side {
            Side::Long => "BUY",
            Side::Short => "SELL",
        }
    }
}

#[async_trait]
impl ExchangePort for BinanceExchange {
    fn venue(&self) -> &str {
        &self.venue
    }

    async fn ticker(&self, symbol: &str) -> EngineResult<Ticker> {
        let candles = self
            .client
            .get_klines(symbol, "1m", 1)
            .await
            .map_err(|e| EngineError::ExchangeTransport(e.to_string()))?;

        let last = candles
            .last()
            .map(|c| Decimal::from_f64(c.close).unwrap_or(Decimal::ZERO))
            .ok_or_else(|| EngineError::ExchangeTransport("empty klines response".to_string()))?;

        Ok(Ticker {
            last,
            bid: last,
            ask: last,
        })
    }

    async fn create_market_order(
        &self,
        symbol: &str,
        side: Side,
        amount_base: Decimal,
    ) -> EngineResult<OrderAck> {
        let qty = amount_base.to_f64().unwrap_or(0.0);
        let body = self
            .client
            .place_order(symbol, Self::side_str(side), "MARKET", qty, None, None, None)
            .await
            .map_err(|e| EngineError::OrderRejectedOnOpen {
                symbol: symbol.to_string(),
                reason: e.to_string(),
            })?;

        let order_id = body["orderId"].as_u64().unwrap_or(0).to_string();
        let filled_price = body["fills"]
            .as_array()
            .and_then(|fills| fills.first())
            .and_then(|f| f["price"].as_str())
            .and_then(|s| Decimal::from_str(s).ok())
            .unwrap_or(Decimal::ZERO);

        Ok(OrderAck {
            order_id,
            filled_price,
            filled_qty: amount_base,
        })
    }

    async fn create_limit_order(
        &self,
        symbol: &str,
        side: Side,
        amount_base: Decimal,
        price: Decimal,
    ) -> EngineResult<OrderAck> {
        let qty = amount_base.to_f64().unwrap_or(0.0);
        let px = price.to_f64().unwrap_or(0.0);
        let body = self
            .client
            .place_order(
                symbol,
                Self::side_str(side),
                "LIMIT",
                qty,
                Some(px),
                Some("GTC"),
                None,
            )
            .await
            .map_err(|e| EngineError::OrderRejectedOnOpen {
                symbol: symbol.to_string(),
                reason: e.to_string(),
            })?;

        let order_id = body["orderId"].as_u64().unwrap_or(0).to_string();
        Ok(OrderAck {
            order_id,
            filled_price: price,
            filled_qty: amount_base,
        })
    }

    async fn balance(&self, asset: &str) -> EngineResult<Decimal> {
        let free = self
            .client
            .get_balance(asset)
            .await
            .map_err(|e| EngineError::ExchangeTransport(e.to_string()))?;
        Ok(Decimal::from_f64(free).unwrap_or(Decimal::ZERO))
    }

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> EngineResult<()> {
        let id: u64 = order_id
            .parse()
            .map_err(|_| EngineError::ExchangeTransport(format!("bad order id '{order_id}'")))?;
        self.client
            .cancel_order(symbol, id)
            .await
            .map_err(|e| EngineError::ExchangeTransport(e.to_string()))?;
        Ok(())
    }
}

// =============================================================================
// PaperExchange — simulator, fills everything at the last known price
// =============================================================================

/// Fills every order at the last price `set_price` recorded for the symbol,
/// mirroring `execute_demo`'s synthetic-fill behavior.
pub struct PaperExchange {
    venue: String,
    last_prices: Arc<RwLock<HashMap<String, Decimal>>>,
}

impl PaperExchange {
    pub fn new(venue: impl Into<String>) -> Self {
        Self {
            venue: venue.into(),
            last_prices: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Called by the orchestrator after every MarketSnapshot fetch so the
    /// simulator's ticker tracks the real market.
    pub fn set_price(&self, symbol: &str, price: Decimal) {
        self.last_prices.write().insert(symbol.to_string(), price);
    }
}

#[async_trait]
impl ExchangePort for PaperExchange {
    fn venue(&self) -> &str {
        &self.venue
    }

    async fn ticker(&self, symbol: &str) -> EngineResult<Ticker> {
        let last = self
            .last_prices
            .read()
            .get(symbol)
            .copied()
            .ok_or_else(|| EngineError::ExchangeTransport(format!("no price known for {symbol}")))?;
        Ok(Ticker {
            last,
            bid: last,
            ask: last,
        })
    }

    async fn create_market_order(
        &self,
        symbol: &str,
        side: Side,
        amount_base: Decimal,
    ) -> EngineResult<OrderAck> {
        let ticker = self.ticker(symbol).await?;
        let order_id = Uuid::new_v4().to_string();
        debug!(symbol, side = %side, %amount_base, price = %ticker.last, "paper fill");
        Ok(OrderAck {
            order_id,
            filled_price: ticker.last,
            filled_qty: amount_base,
        })
    }

    async fn create_limit_order(
        &self,
        symbol: &str,
        _side: Side,
        amount_base: Decimal,
        price: Decimal,
    ) -> EngineResult<OrderAck> {
        let order_id = Uuid::new_v4().to_string();
        debug!(symbol, %amount_base, %price, "paper limit fill");
        Ok(OrderAck {
            order_id,
            filled_price: price,
            filled_qty: amount_base,
        })
    }

    async fn balance(&self, asset: &str) -> EngineResult<Decimal> {
        warn!(asset, "PaperExchange.balance called — simulator has no real account, returning 0");
        Ok(Decimal::ZERO)
    }

    async fn cancel_order(&self, _symbol: &str, _order_id: &str) -> EngineResult<()> {
        Ok(())
    }

    fn sync_reference_price(&self, symbol: &str, price: Decimal) {
        self.set_price(symbol, price);
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn paper_exchange_fills_at_last_set_price() {
        let exchange = PaperExchange::new("binance");
        exchange.set_price("BTCUSDT", Decimal::new(50000, 0));
        let ack = exchange
            .create_market_order("BTCUSDT", Side::Long, Decimal::new(1, 0))
            .await
            .unwrap();
        assert_eq!(ack.filled_price, Decimal::new(50000, 0));
    }

    #[tokio::test]
    async fn paper_exchange_ticker_without_price_is_error() {
        let exchange = PaperExchange::new("binance");
        let result = exchange.ticker("ETHUSDT").await;
        assert!(result.is_err());
    }
}
