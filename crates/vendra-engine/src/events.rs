//! # Presentation Events
//!
//! Outbound notifications for whatever UI sits on top of the engine. The
//! engine never blocks on them: emitters are synchronous and must return
//! quickly.

use serde::{Deserialize, Serialize};
use std::sync::{Mutex, PoisonError};
use ts_rs::TS;

use vendra_core::{CartTotals, Principal, Product};

use crate::finalizer::Receipt;

// =============================================================================
// Low Stock Alert
// =============================================================================

/// A product at or below its alert threshold after a reservation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct LowStockAlert {
    pub product_id: i64,
    pub code: String,
    pub name: String,
    pub quantity: i64,
    pub alert_threshold: i64,
}

impl LowStockAlert {
    pub fn for_product(product: &Product) -> Self {
        LowStockAlert {
            product_id: product.id,
            code: product.code.clone(),
            name: product.name.clone(),
            quantity: product.quantity,
            alert_threshold: product.alert_threshold,
        }
    }

    #[inline]
    pub fn is_out_of_stock(&self) -> bool {
        self.quantity <= 0
    }
}

// =============================================================================
// Emitter Trait
// =============================================================================

/// Receives engine notifications.
pub trait PosEventEmitter: Send + Sync {
    /// The cart's lines or totals changed.
    fn cart_changed(&self, totals: &CartTotals);

    /// The session expired from inactivity; the UI should return to login.
    fn session_expired(&self, principal: &Principal);

    fn sale_committed(&self, receipt: &Receipt);

    fn low_stock(&self, alert: &LowStockAlert);
}

/// Emitter that drops everything.
pub struct NoOpEmitter;

impl PosEventEmitter for NoOpEmitter {
    fn cart_changed(&self, _totals: &CartTotals) {}
    fn session_expired(&self, _principal: &Principal) {}
    fn sale_committed(&self, _receipt: &Receipt) {}
    fn low_stock(&self, _alert: &LowStockAlert) {}
}

// =============================================================================
// Recording Emitter
// =============================================================================

/// One recorded notification.
#[derive(Debug, Clone, PartialEq)]
pub enum PosEvent {
    CartChanged(CartTotals),
    SessionExpired(Principal),
    SaleCommitted(Receipt),
    LowStock(LowStockAlert),
}

/// Emitter that keeps every event in order, for tests and headless demos.
#[derive(Debug, Default)]
pub struct RecordingEmitter {
    events: Mutex<Vec<PosEvent>>,
}

impl RecordingEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything recorded so far.
    pub fn events(&self) -> Vec<PosEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn clear(&self) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn session_expired_count(&self) -> usize {
        self.count(|e| matches!(e, PosEvent::SessionExpired(_)))
    }

    pub fn low_stock_alerts(&self) -> Vec<LowStockAlert> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                PosEvent::LowStock(alert) => Some(alert),
                _ => None,
            })
            .collect()
    }

    pub fn receipts(&self) -> Vec<Receipt> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                PosEvent::SaleCommitted(receipt) => Some(receipt),
                _ => None,
            })
            .collect()
    }

    /// Most recent cart totals, if any were emitted.
    pub fn last_totals(&self) -> Option<CartTotals> {
        self.events().into_iter().rev().find_map(|e| match e {
            PosEvent::CartChanged(totals) => Some(totals),
            _ => None,
        })
    }

    fn count(&self, predicate: impl Fn(&PosEvent) -> bool) -> usize {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|e| predicate(e))
            .count()
    }

    fn push(&self, event: PosEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}

impl PosEventEmitter for RecordingEmitter {
    fn cart_changed(&self, totals: &CartTotals) {
        self.push(PosEvent::CartChanged(totals.clone()));
    }

    fn session_expired(&self, principal: &Principal) {
        self.push(PosEvent::SessionExpired(principal.clone()));
    }

    fn sale_committed(&self, receipt: &Receipt) {
        self.push(PosEvent::SaleCommitted(receipt.clone()));
    }

    fn low_stock(&self, alert: &LowStockAlert) {
        self.push(PosEvent::LowStock(alert.clone()));
    }
}
