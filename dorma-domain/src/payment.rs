use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IntentStatus {
    Pending,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct PaymentIntent {
    /// Provider's reference (e.g., pi_123).
    pub reference: String,
    pub booking_id: Uuid,
    pub amount: i64,
    pub currency: String,
    pub status: IntentStatus,
}

/// Boundary to the external payment processor. The processor is opaque:
/// it takes (booking, amount) and eventually reports an outcome via
/// webhook or poll.
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    async fn create_intent(
        &self,
        booking_id: Uuid,
        amount: i64,
        currency: &str,
    ) -> Result<PaymentIntent, Box<dyn std::error::Error + Send + Sync>>;

    async fn get_intent(
        &self,
        reference: &str,
    ) -> Result<PaymentIntent, Box<dyn std::error::Error + Send + Sync>>;
}

/// In-memory provider for tests and local runs. Intents start `Pending`;
/// `complete` flips them so the poll path can be exercised.
#[derive(Default)]
pub struct MockPaymentProvider {
    intents: Mutex<HashMap<String, PaymentIntent>>,
}

impl MockPaymentProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn complete(&self, reference: &str, status: IntentStatus) {
        let mut intents = self.intents.lock().unwrap();
        if let Some(intent) = intents.get_mut(reference) {
            intent.status = status;
        }
    }

    /// Overwrite the amount the provider will report, to simulate a
    /// discrepancy against the booking total.
    pub fn report_amount(&self, reference: &str, amount: i64) {
        let mut intents = self.intents.lock().unwrap();
        if let Some(intent) = intents.get_mut(reference) {
            intent.amount = amount;
        }
    }
}

#[async_trait]
impl PaymentProvider for MockPaymentProvider {
    async fn create_intent(
        &self,
        booking_id: Uuid,
        amount: i64,
        currency: &str,
    ) -> Result<PaymentIntent, Box<dyn std::error::Error + Send + Sync>> {
        let intent = PaymentIntent {
            reference: format!("mock_pi_{}", booking_id.simple()),
            booking_id,
            amount,
            currency: currency.to_string(),
            status: IntentStatus::Pending,
        };
        self.intents
            .lock()
            .unwrap()
            .insert(intent.reference.clone(), intent.clone());
        Ok(intent)
    }

    async fn get_intent(
        &self,
        reference: &str,
    ) -> Result<PaymentIntent, Box<dyn std::error::Error + Send + Sync>> {
        self.intents
            .lock()
            .unwrap()
            .get(reference)
            .cloned()
            .ok_or_else(|| format!("unknown intent: {reference}").into())
    }
}
