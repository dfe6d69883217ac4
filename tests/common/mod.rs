#![allow(dead_code)]

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::Utc;
use reconcile_core::adapters::MemoryTransactionStore;
use reconcile_core::domain::{
    GatewayEvent, ImpactTotals, PaymentDetail, PaymentStatus, Product, ProductStatus,
    Transaction, UserProfile, PAYMENT_EVENT_TYPE,
};
use reconcile_core::ports::{GatewayError, NotificationDispatcher, NotifyError, PaymentGateway};
use reconcile_core::services::ReconciliationEngine;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

pub const PAYMENT_ID: &str = "1311772470";

/// Scripted gateway. Unknown payment ids answer NotFound.
#[derive(Default)]
pub struct FakeGateway {
    payments: Mutex<HashMap<String, PaymentDetail>>,
    unavailable: AtomicBool,
    delay: Mutex<Option<Duration>>,
    calls: AtomicUsize,
}

impl FakeGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_payment(&self, detail: PaymentDetail) {
        self.payments
            .lock()
            .unwrap()
            .insert(detail.payment_id.clone(), detail);
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Holds every fetch for `delay`, widening race windows.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn fetch_payment(&self, payment_id: &str) -> Result<PaymentDetail, GatewayError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(GatewayError::Unavailable("connection refused".to_string()));
        }
        self.payments
            .lock()
            .unwrap()
            .get(payment_id)
            .cloned()
            .ok_or_else(|| GatewayError::NotFound(payment_id.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Sent {
    InApp { user_id: Uuid, event_name: String },
    Push { user_id: Uuid, buyer_name: String, product_title: String, amount: i64 },
}

/// Records every notification; optionally fails all of them.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Sent>>,
    failing: AtomicBool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        let notifier = Self::default();
        notifier.failing.store(true, Ordering::SeqCst);
        notifier
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    fn record(&self, sent: Sent) -> Result<(), NotifyError> {
        self.sent.lock().unwrap().push(sent);
        if self.failing.load(Ordering::SeqCst) {
            return Err(NotifyError::Delivery("notification service down".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl NotificationDispatcher for RecordingNotifier {
    async fn notify_in_app(
        &self,
        user_id: Uuid,
        event_name: &str,
        _payload: serde_json::Value,
    ) -> Result<(), NotifyError> {
        self.record(Sent::InApp {
            user_id,
            event_name: event_name.to_string(),
        })
    }

    async fn notify_push(
        &self,
        user_id: Uuid,
        buyer_name: &str,
        product_title: &str,
        _transaction_id: Uuid,
        amount: i64,
    ) -> Result<(), NotifyError> {
        self.record(Sent::Push {
            user_id,
            buyer_name: buyer_name.to_string(),
            product_title: product_title.to_string(),
            amount,
        })
    }
}

/// One pending purchase: buyer, seller, a reserved product and the
/// transaction, seeded into a fresh in-memory store.
pub struct Fixture {
    pub store: MemoryTransactionStore,
    pub gateway: Arc<FakeGateway>,
    pub notifier: Arc<RecordingNotifier>,
    pub tx: Transaction,
    pub product: Product,
    pub buyer: UserProfile,
    pub seller: UserProfile,
}

impl Fixture {
    pub async fn new() -> Self {
        Self::with_notifier(RecordingNotifier::new()).await
    }

    pub async fn with_notifier(notifier: RecordingNotifier) -> Self {
        let store = MemoryTransactionStore::new();
        let buyer = user("Ana Buyer");
        let seller = user("Sam Seller");
        let product = Product {
            id: Uuid::new_v4(),
            seller_id: seller.id,
            title: "Vintage denim jacket".to_string(),
            status: ProductStatus::Reserved,
            co2_factor: BigDecimal::from_str("12.5").unwrap(),
            water_factor: BigDecimal::from_str("3000").unwrap(),
        };
        let tx = Transaction::new(product.id, buyer.id, seller.id, 10_000);

        store.insert_user(buyer.clone()).await;
        store.insert_user(seller.clone()).await;
        store.insert_product(product.clone()).await;
        store.insert_transaction(tx.clone()).await;

        Self {
            store,
            gateway: Arc::new(FakeGateway::new()),
            notifier: Arc::new(notifier),
            tx,
            product,
            buyer,
            seller,
        }
    }

    pub fn engine(&self) -> ReconciliationEngine {
        ReconciliationEngine::new(
            Arc::new(self.store.clone()),
            self.gateway.clone(),
            self.notifier.clone(),
        )
    }

    /// Scripts the gateway to report `status` for `PAYMENT_ID`, referencing
    /// this fixture's transaction.
    pub fn gateway_reports(&self, status: PaymentStatus, detail: Option<&str>) {
        self.gateway.set_payment(PaymentDetail {
            payment_id: PAYMENT_ID.to_string(),
            status,
            status_detail: detail.map(str::to_string),
            external_reference: Some(self.tx.id.to_string()),
            transaction_amount: Some(self.tx.amount),
        });
    }
}

pub fn user(name: &str) -> UserProfile {
    UserProfile {
        id: Uuid::new_v4(),
        display_name: name.to_string(),
        impact: ImpactTotals::default(),
    }
}

pub fn payment_event(data_id: &str) -> GatewayEvent {
    GatewayEvent {
        event_id: Uuid::new_v4().to_string(),
        event_type: PAYMENT_EVENT_TYPE.to_string(),
        data_id: data_id.to_string(),
        signature_header: None,
        request_id: None,
        received_at: Utc::now(),
    }
}
