mod common;

use bigdecimal::BigDecimal;
use common::{payment_event, Fixture, RecordingNotifier, Sent, PAYMENT_ID};
use reconcile_core::domain::{
    GatewayEvent, PaymentDetail, PaymentStatus, ProductStatus, Transaction, TransactionStatus,
};
use reconcile_core::ports::TransactionStore;
use reconcile_core::services::{ReconcileError, ReconcileOutcome, WebhookReply};
use std::str::FromStr;
use std::time::Duration;

#[tokio::test]
async fn test_approved_payment_applies_every_side_effect() {
    let fx = Fixture::new().await;
    fx.gateway_reports(PaymentStatus::Approved, Some("accredited"));

    let reply = fx.engine().handle_webhook(&payment_event(PAYMENT_ID)).await;
    assert_eq!(reply, WebhookReply::ok());

    let tx = fx.store.get(fx.tx.id).await.unwrap().unwrap();
    assert_eq!(tx.status, TransactionStatus::Paid);
    assert_eq!(tx.payment_id.as_deref(), Some(PAYMENT_ID));
    assert_eq!(tx.payment_status_detail.as_deref(), Some("accredited"));
    assert_eq!(tx.amount, 10_000);

    let product = fx.store.get_product(fx.product.id).await.unwrap().unwrap();
    assert_eq!(product.status, ProductStatus::Sold);

    for user_id in [fx.buyer.id, fx.seller.id] {
        let user = fx.store.get_user(user_id).await.unwrap().unwrap();
        assert_eq!(user.impact.co2_saved, BigDecimal::from_str("12.5").unwrap());
        assert_eq!(user.impact.water_saved, BigDecimal::from_str("3000").unwrap());
        assert_eq!(user.impact.items_count, 1);
    }

    assert_eq!(
        fx.notifier.sent(),
        vec![
            Sent::InApp {
                user_id: fx.seller.id,
                event_name: "payment_received".to_string(),
            },
            Sent::Push {
                user_id: fx.seller.id,
                buyer_name: "Ana Buyer".to_string(),
                product_title: "Vintage denim jacket".to_string(),
                amount: 10_000,
            },
        ]
    );
}

#[tokio::test]
async fn test_redelivered_approval_is_a_no_op() {
    let fx = Fixture::new().await;
    fx.gateway_reports(PaymentStatus::Approved, Some("accredited"));
    let engine = fx.engine();

    assert!(matches!(
        engine.reconcile(&payment_event(PAYMENT_ID)).await.unwrap(),
        ReconcileOutcome::Approved(_)
    ));
    let after_first = fx.store.get_user(fx.seller.id).await.unwrap().unwrap();

    let reply = engine.handle_webhook(&payment_event(PAYMENT_ID)).await;
    assert_eq!(reply, WebhookReply::ok());
    assert!(matches!(
        engine.reconcile(&payment_event(PAYMENT_ID)).await.unwrap(),
        ReconcileOutcome::AlreadyProcessed(_)
    ));

    let after_redelivery = fx.store.get_user(fx.seller.id).await.unwrap().unwrap();
    assert_eq!(after_first, after_redelivery);
    assert_eq!(fx.store.applied_approvals().await, 1);
    let pushes = fx
        .notifier
        .sent()
        .into_iter()
        .filter(|s| matches!(s, Sent::Push { .. }))
        .count();
    assert_eq!(pushes, 1);
}

#[tokio::test]
async fn test_many_deliveries_match_a_single_delivery() {
    let once = Fixture::new().await;
    once.gateway_reports(PaymentStatus::Approved, None);
    once.engine().handle_webhook(&payment_event(PAYMENT_ID)).await;

    let many = Fixture::new().await;
    many.gateway_reports(PaymentStatus::Approved, None);
    let engine = many.engine();
    for _ in 0..5 {
        assert!(engine.handle_webhook(&payment_event(PAYMENT_ID)).await.success);
    }

    let tx_once = once.store.get(once.tx.id).await.unwrap().unwrap();
    let tx_many = many.store.get(many.tx.id).await.unwrap().unwrap();
    assert_eq!(tx_once.status, tx_many.status);
    assert_eq!(tx_once.payment_id, tx_many.payment_id);

    let buyer_once = once.store.get_user(once.buyer.id).await.unwrap().unwrap();
    let buyer_many = many.store.get_user(many.buyer.id).await.unwrap().unwrap();
    assert_eq!(buyer_once.impact, buyer_many.impact);
    assert_eq!(many.store.applied_approvals().await, 1);
}

#[tokio::test]
async fn test_concurrent_deliveries_apply_once() {
    let fx = Fixture::new().await;
    fx.gateway_reports(PaymentStatus::Approved, None);
    fx.gateway.set_delay(Duration::from_millis(20));
    let engine = fx.engine();

    let first = payment_event(PAYMENT_ID);
    let second = payment_event(PAYMENT_ID);
    let (a, b) = tokio::join!(engine.reconcile(&first), engine.reconcile(&second));

    let outcomes = [a.unwrap(), b.unwrap()];
    let approved = outcomes
        .iter()
        .filter(|o| matches!(o, ReconcileOutcome::Approved(_)))
        .count();
    let no_ops = outcomes
        .iter()
        .filter(|o| matches!(o, ReconcileOutcome::AlreadyProcessed(_)))
        .count();
    assert_eq!((approved, no_ops), (1, 1));

    let seller = fx.store.get_user(fx.seller.id).await.unwrap().unwrap();
    assert_eq!(seller.impact.items_count, 1);
    assert_eq!(fx.store.applied_approvals().await, 1);
}

#[tokio::test]
async fn test_rejection_touches_only_the_transaction() {
    let fx = Fixture::new().await;
    fx.gateway_reports(PaymentStatus::Rejected, Some("cc_rejected_insufficient_amount"));

    let outcome = fx.engine().reconcile(&payment_event(PAYMENT_ID)).await.unwrap();
    assert!(matches!(outcome, ReconcileOutcome::Rejected(_)));

    let tx = fx.store.get(fx.tx.id).await.unwrap().unwrap();
    assert_eq!(tx.status, TransactionStatus::Rejected);
    assert_eq!(
        tx.payment_status_detail.as_deref(),
        Some("cc_rejected_insufficient_amount")
    );
    assert_eq!(tx.payment_id, None);

    let product = fx.store.get_product(fx.product.id).await.unwrap().unwrap();
    assert_eq!(product.status, ProductStatus::Reserved);
    assert_eq!(fx.store.get_user(fx.seller.id).await.unwrap().unwrap(), fx.seller);
    assert_eq!(fx.store.get_user(fx.buyer.id).await.unwrap().unwrap(), fx.buyer);
    assert!(fx.notifier.sent().is_empty());
}

#[tokio::test]
async fn test_cancelled_payment_is_handled_like_a_rejection() {
    let fx = Fixture::new().await;
    fx.gateway_reports(PaymentStatus::Cancelled, Some("expired"));

    let outcome = fx.engine().reconcile(&payment_event(PAYMENT_ID)).await.unwrap();
    assert!(matches!(outcome, ReconcileOutcome::Rejected(_)));
    assert!(fx.notifier.sent().is_empty());
}

#[tokio::test]
async fn test_late_rejection_leaves_paid_transaction_alone() {
    let fx = Fixture::new().await;
    fx.gateway_reports(PaymentStatus::Approved, Some("accredited"));
    let engine = fx.engine();
    engine.reconcile(&payment_event(PAYMENT_ID)).await.unwrap();

    fx.gateway_reports(PaymentStatus::Rejected, Some("by_admin"));
    let outcome = engine.reconcile(&payment_event(PAYMENT_ID)).await.unwrap();
    assert!(matches!(outcome, ReconcileOutcome::RejectionIgnored(_)));

    let tx = fx.store.get(fx.tx.id).await.unwrap().unwrap();
    assert_eq!(tx.status, TransactionStatus::Paid);
    assert_eq!(tx.payment_status_detail.as_deref(), Some("accredited"));
}

#[tokio::test]
async fn test_pending_payment_waits() {
    let fx = Fixture::new().await;
    fx.gateway_reports(PaymentStatus::InProcess, Some("pending_review_manual"));

    let outcome = fx.engine().reconcile(&payment_event(PAYMENT_ID)).await.unwrap();
    assert_eq!(
        outcome,
        ReconcileOutcome::Waiting {
            payment_id: PAYMENT_ID.to_string(),
            status: PaymentStatus::InProcess,
        }
    );
    assert_eq!(
        fx.store.get(fx.tx.id).await.unwrap().unwrap().status,
        TransactionStatus::Pending
    );
}

#[tokio::test]
async fn test_unknown_reference_reports_transaction_not_found() {
    let fx = Fixture::new().await;
    fx.gateway.set_payment(PaymentDetail {
        payment_id: "555".to_string(),
        status: PaymentStatus::Approved,
        status_detail: None,
        external_reference: Some(uuid::Uuid::new_v4().to_string()),
        transaction_amount: Some(10_000),
    });

    let reply = fx.engine().handle_webhook(&payment_event("555")).await;
    assert_eq!(reply, WebhookReply::failed("Transaction not found", false));

    let tx = fx.store.get(fx.tx.id).await.unwrap().unwrap();
    assert_eq!(tx, fx.tx);
    assert_eq!(fx.store.applied_approvals().await, 0);
    assert!(fx.notifier.sent().is_empty());
}

#[tokio::test]
async fn test_malformed_reference_reports_transaction_not_found() {
    let fx = Fixture::new().await;
    fx.gateway.set_payment(PaymentDetail {
        payment_id: "556".to_string(),
        status: PaymentStatus::Approved,
        status_detail: None,
        external_reference: Some("order-42".to_string()),
        transaction_amount: None,
    });

    let err = fx.engine().reconcile(&payment_event("556")).await.unwrap_err();
    assert!(matches!(err, ReconcileError::TransactionNotFound { .. }));
}

#[tokio::test]
async fn test_non_payment_event_never_queries_gateway() {
    let fx = Fixture::new().await;
    let event = GatewayEvent {
        event_type: "merchant_order".to_string(),
        ..payment_event("999")
    };

    let reply = fx.engine().handle_webhook(&event).await;
    assert_eq!(reply, WebhookReply::ok());
    assert_eq!(fx.gateway.calls(), 0);
}

#[tokio::test]
async fn test_unknown_payment_is_a_permanent_failure() {
    let fx = Fixture::new().await;

    let reply = fx.engine().handle_webhook(&payment_event("404404")).await;
    assert!(!reply.success);
    assert!(!reply.retryable);
}

#[tokio::test]
async fn test_gateway_outage_asks_for_redelivery() {
    let fx = Fixture::new().await;
    fx.gateway_reports(PaymentStatus::Approved, None);
    fx.gateway.set_unavailable(true);
    let engine = fx.engine();

    let reply = engine.handle_webhook(&payment_event(PAYMENT_ID)).await;
    assert!(!reply.success);
    assert!(reply.retryable);
    assert_eq!(fx.store.applied_approvals().await, 0);

    fx.gateway.set_unavailable(false);
    let reply = engine.handle_webhook(&payment_event(PAYMENT_ID)).await;
    assert_eq!(reply, WebhookReply::ok());
    assert_eq!(fx.store.applied_approvals().await, 1);
}

#[tokio::test]
async fn test_store_outage_asks_for_redelivery() {
    let fx = Fixture::new().await;
    fx.gateway_reports(PaymentStatus::Approved, None);
    fx.store.set_unavailable(true);

    let reply = fx.engine().handle_webhook(&payment_event(PAYMENT_ID)).await;
    assert!(!reply.success);
    assert!(reply.retryable);
}

#[tokio::test]
async fn test_notification_failure_keeps_the_payment() {
    let fx = Fixture::with_notifier(RecordingNotifier::failing()).await;
    fx.gateway_reports(PaymentStatus::Approved, None);

    let reply = fx.engine().handle_webhook(&payment_event(PAYMENT_ID)).await;
    assert_eq!(reply, WebhookReply::ok());
    assert_eq!(
        fx.store.get(fx.tx.id).await.unwrap().unwrap().status,
        TransactionStatus::Paid
    );
    // Both channels are still attempted.
    assert_eq!(fx.notifier.sent().len(), 2);
}

#[tokio::test]
async fn test_second_payment_for_paid_transaction_is_rejected() {
    let fx = Fixture::new().await;
    fx.gateway_reports(PaymentStatus::Approved, None);
    let engine = fx.engine();
    engine.reconcile(&payment_event(PAYMENT_ID)).await.unwrap();

    fx.gateway.set_payment(PaymentDetail {
        payment_id: "2222".to_string(),
        status: PaymentStatus::Approved,
        status_detail: None,
        external_reference: Some(fx.tx.id.to_string()),
        transaction_amount: Some(10_000),
    });
    let err = engine.reconcile(&payment_event("2222")).await.unwrap_err();
    assert!(matches!(err, ReconcileError::InvalidTransition { .. }));

    let tx = fx.store.get(fx.tx.id).await.unwrap().unwrap();
    assert_eq!(tx.payment_id.as_deref(), Some(PAYMENT_ID));
    assert_eq!(fx.store.applied_approvals().await, 1);
}

#[tokio::test]
async fn test_amount_mismatch_still_commits() {
    let fx = Fixture::new().await;
    fx.gateway.set_payment(PaymentDetail {
        payment_id: PAYMENT_ID.to_string(),
        status: PaymentStatus::Approved,
        status_detail: None,
        external_reference: Some(fx.tx.id.to_string()),
        transaction_amount: Some(9_999),
    });

    let outcome = fx.engine().reconcile(&payment_event(PAYMENT_ID)).await.unwrap();
    match outcome {
        ReconcileOutcome::Approved(tx) => assert_eq!(tx.amount, 10_000),
        other => panic!("expected approval, got {:?}", other),
    }
}

#[tokio::test]
async fn test_payment_reused_for_second_transaction_is_not_retried() {
    let fx = Fixture::new().await;
    fx.gateway_reports(PaymentStatus::Approved, Some("accredited"));
    fx.engine().reconcile(&payment_event(PAYMENT_ID)).await.unwrap();

    let second = Transaction::new(fx.product.id, fx.buyer.id, fx.seller.id, 4_000);
    fx.store.insert_transaction(second.clone()).await;
    fx.gateway.set_payment(PaymentDetail {
        payment_id: PAYMENT_ID.to_string(),
        status: PaymentStatus::Approved,
        status_detail: Some("accredited".to_string()),
        external_reference: Some(second.id.to_string()),
        transaction_amount: Some(4_000),
    });

    let reply = fx.engine().handle_webhook(&payment_event(PAYMENT_ID)).await;
    assert!(!reply.success);
    assert!(!reply.retryable);

    let stored = fx.store.get(second.id).await.unwrap().unwrap();
    assert_eq!(stored.status, TransactionStatus::Pending);
    assert_eq!(stored.payment_id, None);
    assert_eq!(fx.store.applied_approvals().await, 1);
    let seller = fx.store.get_user(fx.seller.id).await.unwrap().unwrap();
    assert_eq!(seller.impact.items_count, 1);
}
