//! The contract model: what a client request looks like on the wire, how it
//! is validated, and the payment arithmetic printed on the contract page.
//!
//! Every field carries `#[serde(default)]` so a missing field decodes to an
//! empty value and is reported by [`ContractRequest::validate`] with a
//! field-specific message instead of a generic decoding error. An explicit
//! JSON `null` is treated the same way.

use crate::error::ValidationError;
use serde::{Deserialize, Deserializer, Serialize};
use std::ops::Deref;

/// Decode `null` as the field's default, like a missing field.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ClientDetails {
    #[serde(rename = "clientName", deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(rename = "clientEmail", deserialize_with = "null_as_default")]
    pub email: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EventDetails {
    #[serde(rename = "eventName", deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(rename = "eventDate", deserialize_with = "null_as_default")]
    pub date: String,
    #[serde(rename = "eventCoverageTime", deserialize_with = "null_as_default")]
    pub coverage_window: String,
    #[serde(rename = "eventVenue", deserialize_with = "null_as_default")]
    pub venue: String,
}

/// Amounts are whole dollars.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PaymentDetails {
    #[serde(deserialize_with = "null_as_default")]
    pub total_amount: i64,
    #[serde(deserialize_with = "null_as_default")]
    pub advance_paid: i64,
    #[serde(rename = "advancePaymentMode", deserialize_with = "null_as_default")]
    pub advance_mode: String,
    #[serde(deserialize_with = "null_as_default")]
    pub per_hour_extra: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Deliverable {
    #[serde(deserialize_with = "null_as_default")]
    pub description: String,
    /// Free text, e.g. "250 edited photos".
    #[serde(deserialize_with = "null_as_default")]
    pub quantity: String,
    #[serde(deserialize_with = "null_as_default")]
    pub mode: String,
    #[serde(deserialize_with = "null_as_default")]
    pub delivery_date: String,
}

/// A service-contract request as received from the client.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContractRequest {
    #[serde(rename = "clientDetails", deserialize_with = "null_as_default")]
    pub client: ClientDetails,
    #[serde(rename = "eventDetails", deserialize_with = "null_as_default")]
    pub event: EventDetails,
    #[serde(rename = "paymentDetails", deserialize_with = "null_as_default")]
    pub payment: PaymentDetails,
    #[serde(rename = "deliverableDetails", deserialize_with = "null_as_default")]
    pub deliverables: Vec<Deliverable>,
}

fn blank(s: &str) -> bool {
    s.trim().is_empty()
}

impl ContractRequest {
    /// Check every rule in order and stop at the first violation.
    pub fn validate(self) -> Result<ValidContract, ValidationError> {
        use ValidationError::*;

        if blank(&self.client.name) {
            return Err(ClientNameRequired);
        }
        if blank(&self.client.email) {
            return Err(ClientEmailRequired);
        }
        if !self.client.email.contains('@') {
            return Err(ClientEmailInvalid);
        }

        let event = &self.event;
        if blank(&event.name) {
            return Err(EventNameRequired);
        }
        if blank(&event.date) {
            return Err(EventDateRequired);
        }
        if blank(&event.coverage_window) {
            return Err(EventCoverageRequired);
        }
        if blank(&event.venue) {
            return Err(EventVenueRequired);
        }

        let payment = &self.payment;
        if payment.total_amount <= 0 {
            return Err(TotalAmountNotPositive);
        }
        if payment.advance_paid < 0 {
            return Err(AdvancePaidNegative);
        }
        if payment.per_hour_extra < 0 {
            return Err(PerHourExtraNegative);
        }

        if self.deliverables.is_empty() {
            return Err(NoDeliverables);
        }
        for (index, d) in self.deliverables.iter().enumerate() {
            if blank(&d.description) {
                return Err(DeliverableDescriptionRequired { index });
            }
            if blank(&d.quantity) {
                return Err(DeliverableQuantityRequired { index });
            }
            if blank(&d.mode) {
                return Err(DeliverableModeRequired { index });
            }
            if blank(&d.delivery_date) {
                return Err(DeliverableDateRequired { index });
            }
        }

        Ok(ValidContract(self))
    }
}

/// A [`ContractRequest`] that passed [`ContractRequest::validate`].
///
/// The orchestrator only accepts this type, so unvalidated input cannot
/// reach the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidContract(ContractRequest);

impl ValidContract {
    /// `<event>-<client>` with spaces replaced, used in local file names.
    pub fn slug(&self) -> String {
        format!(
            "{}-{}",
            crate::pipeline::workspace::sanitize(&self.event.name),
            crate::pipeline::workspace::sanitize(&self.client.name)
        )
    }

    pub fn schedule(&self) -> PaymentSchedule {
        PaymentSchedule::for_payment(&self.payment)
    }
}

impl Deref for ValidContract {
    type Target = ContractRequest;

    fn deref(&self) -> &ContractRequest {
        &self.0
    }
}

/// Amounts still owed, as printed in the payment table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaymentSchedule {
    /// Already received; printed only when non-zero.
    pub advance_paid: i64,
    /// Non-refundable 25% booking fee, net of the advance.
    pub booking_fee: i64,
    /// Balance due on the event day.
    pub remaining: i64,
    pub total: i64,
}

impl PaymentSchedule {
    /// The booking fee is 25% of the total, rounded up to the next multiple
    /// of ten, minus whatever advance was already paid.
    pub fn for_payment(payment: &PaymentDetails) -> Self {
        let total = payment.total_amount;
        let advance = payment.advance_paid;

        let quarter = ((total as f64) * 0.25).round() as i64;
        let rounded = if quarter % 10 != 0 {
            (quarter / 10 + 1) * 10
        } else {
            quarter
        };
        let booking_fee = (rounded - advance).max(0);
        let remaining = (total - advance - booking_fee).max(0);

        Self {
            advance_paid: advance,
            booking_fee,
            remaining,
            total,
        }
    }
}
