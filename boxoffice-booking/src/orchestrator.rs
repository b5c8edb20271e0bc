use async_trait::async_trait;
use boxoffice_core::{BoxError, PaymentGateway, PaymentIntent, PaymentStatus};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

pub struct PaymentOrchestrator {
    gateway: Arc<dyn PaymentGateway>,
}

impl PaymentOrchestrator {
    pub fn new(gateway: Arc<dyn PaymentGateway>) -> Self {
        Self { gateway }
    }

    /// Create a payment intent for a reservation's fixed total.
    pub async fn initialize_payment(
        &self,
        reservation_id: Uuid,
        amount: i64,
        currency: &str,
        mut metadata: serde_json::Value,
    ) -> Result<PaymentIntent, BoxError> {
        if let Some(map) = metadata.as_object_mut() {
            map.insert("reservationId".to_string(), serde_json::json!(reservation_id));
        }
        self.gateway.create_intent(amount, currency, metadata).await
    }

    /// Ask the gateway where a payment stands. Completion may take several
    /// client round trips, so a non-final status is normal.
    pub async fn payment_status(&self, payment_intent_id: &str) -> Result<PaymentStatus, BoxError> {
        self.gateway.on_result(payment_intent_id).await
    }
}

/// In-process gateway for development and tests.
///
/// Every intent reports `default_status` unless a status was set for it.
pub struct MockPaymentGateway {
    default_status: Mutex<PaymentStatus>,
    intents: Mutex<HashMap<String, PaymentStatus>>,
    fail_next_create: AtomicBool,
    fail_results: AtomicBool,
}

impl MockPaymentGateway {
    pub fn new() -> Self {
        Self::with_default_status(PaymentStatus::Succeeded)
    }

    pub fn with_default_status(status: PaymentStatus) -> Self {
        Self {
            default_status: Mutex::new(status),
            intents: Mutex::new(HashMap::new()),
            fail_next_create: AtomicBool::new(false),
            fail_results: AtomicBool::new(false),
        }
    }

    pub fn set_default_status(&self, status: PaymentStatus) {
        *self.default_status.lock().unwrap_or_else(|p| p.into_inner()) = status;
    }

    /// Overrides the status of one known intent.
    pub fn set_status(&self, payment_intent_id: &str, status: PaymentStatus) {
        self.intents
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(payment_intent_id.to_string(), status);
    }

    pub fn fail_next_create(&self) {
        self.fail_next_create.store(true, Ordering::SeqCst);
    }

    pub fn fail_result_queries(&self, fail: bool) {
        self.fail_results.store(fail, Ordering::SeqCst);
    }

    pub fn intent_count(&self) -> usize {
        self.intents.lock().unwrap_or_else(|p| p.into_inner()).len()
    }
}

impl Default for MockPaymentGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PaymentGateway for MockPaymentGateway {
    async fn create_intent(
        &self,
        amount: i64,
        currency: &str,
        _metadata: serde_json::Value,
    ) -> Result<PaymentIntent, BoxError> {
        if self.fail_next_create.swap(false, Ordering::SeqCst) {
            return Err("Simulated payment gateway failure".into());
        }

        let id = Uuid::new_v4().simple().to_string();
        let intent = PaymentIntent {
            payment_intent_id: format!("mock_pi_{}", id),
            amount,
            currency: currency.to_string(),
            status: PaymentStatus::RequiresPaymentMethod,
            client_secret: Some(format!("mock_secret_{}", id)),
            created_at: Utc::now(),
        };

        let default_status = *self.default_status.lock().unwrap_or_else(|p| p.into_inner());
        self.intents
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(intent.payment_intent_id.clone(), default_status);
        Ok(intent)
    }

    async fn on_result(&self, payment_intent_id: &str) -> Result<PaymentStatus, BoxError> {
        if self.fail_results.load(Ordering::SeqCst) {
            return Err("Simulated payment gateway timeout".into());
        }

        self.intents
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(payment_intent_id)
            .copied()
            .ok_or_else(|| format!("Unknown payment intent: {}", payment_intent_id).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_gateway_tracks_intents() {
        let gateway = Arc::new(MockPaymentGateway::with_default_status(PaymentStatus::RequiresAction));
        let orchestrator = PaymentOrchestrator::new(gateway.clone());

        let intent = orchestrator
            .initialize_payment(Uuid::new_v4(), 1800, "EUR", serde_json::json!({ "showId": "SH1" }))
            .await
            .unwrap();
        assert_eq!(intent.amount, 1800);
        assert!(intent.client_secret.is_some());

        assert_eq!(
            orchestrator.payment_status(&intent.payment_intent_id).await.unwrap(),
            PaymentStatus::RequiresAction
        );

        gateway.set_status(&intent.payment_intent_id, PaymentStatus::Succeeded);
        assert_eq!(
            orchestrator.payment_status(&intent.payment_intent_id).await.unwrap(),
            PaymentStatus::Succeeded
        );

        assert!(orchestrator.payment_status("pi_unknown").await.is_err());
    }

    #[tokio::test]
    async fn test_mock_gateway_failure_switches() {
        let gateway = MockPaymentGateway::new();

        gateway.fail_next_create();
        assert!(gateway.create_intent(900, "EUR", serde_json::json!({})).await.is_err());
        let intent = gateway.create_intent(900, "EUR", serde_json::json!({})).await.unwrap();

        gateway.fail_result_queries(true);
        assert!(gateway.on_result(&intent.payment_intent_id).await.is_err());
        gateway.fail_result_queries(false);
        assert_eq!(gateway.on_result(&intent.payment_intent_id).await.unwrap(), PaymentStatus::Succeeded);
    }
}
