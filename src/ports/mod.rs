// =============================================================================
// Ports — named seams to everything outside the core decision/settlement
// pipeline
// =============================================================================
//
// Exchange connectivity and notification delivery are external collaborators.
// Both ports are consumed as `Arc<dyn Port>` so PAPER and LIVE (or
// logging/webhook) implementations are interchangeable without touching
// PositionExecutor or TradingOrchestrator.

pub mod exchange;
pub mod notification;

pub use exchange::{BinanceExchange, ExchangePort, OrderAck, PaperExchange, Ticker};
pub use notification::{LoggingNotifier, NotificationPort, WebhookNotifier};
