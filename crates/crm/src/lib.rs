//! CRM adapter seam.
//!
//! Tool handlers talk to the customer system of record through the
//! [`CrmAdapter`] trait and nothing else. Business-level misses (no such
//! customer, wrong ZIP, no open invoices) come back as `None`, `false`, or an
//! empty list; [`CrmError`] is reserved for adapter faults where the backend
//! itself could not answer.

use async_trait::async_trait;
use thiserror::Error;

use frontdesk_core::domain::crm::{
    Appointment, AppointmentId, AppointmentSlot, Customer, CustomerId, EscalationOutcome, Invoice,
    ServicePolicy,
};

pub mod memory;

pub use memory::InMemoryCrm;

#[derive(Debug, Error)]
pub enum CrmError {
    #[error("crm backend unavailable: {0}")]
    Unavailable(String),
    #[error("unknown appointment `{0}`")]
    UnknownAppointment(String),
    #[error("unknown slot `{0}`")]
    UnknownSlot(String),
    #[error("unknown customer `{0}`")]
    UnknownCustomer(String),
}

#[async_trait]
pub trait CrmAdapter: Send + Sync {
    async fn lookup_customer_by_phone(&self, phone: &str) -> Result<Option<Customer>, CrmError>;

    async fn lookup_customer_by_name_and_zip(
        &self,
        name: &str,
        zip: &str,
    ) -> Result<Option<Customer>, CrmError>;

    async fn lookup_customer_by_email(&self, email: &str) -> Result<Option<Customer>, CrmError>;

    /// ZIP check against the customer on file. A mismatch is `Ok(false)`.
    async fn verify_account(&self, customer_id: &CustomerId, zip: &str)
        -> Result<bool, CrmError>;

    async fn get_next_appointment(
        &self,
        customer_id: &CustomerId,
    ) -> Result<Option<Appointment>, CrmError>;

    async fn list_upcoming_appointments(
        &self,
        customer_id: &CustomerId,
    ) -> Result<Vec<Appointment>, CrmError>;

    async fn get_appointment(
        &self,
        appointment_id: &AppointmentId,
    ) -> Result<Option<Appointment>, CrmError>;

    async fn get_open_invoices(
        &self,
        customer_id: &CustomerId,
    ) -> Result<Vec<Invoice>, CrmError>;

    async fn get_available_slots(
        &self,
        customer_id: &CustomerId,
    ) -> Result<Vec<AppointmentSlot>, CrmError>;

    async fn create_appointment(
        &self,
        customer_id: &CustomerId,
        slot_id: &str,
        service: &str,
    ) -> Result<Appointment, CrmError>;

    async fn reschedule_appointment(
        &self,
        appointment_id: &AppointmentId,
        slot_id: &str,
    ) -> Result<Appointment, CrmError>;

    async fn cancel_appointment(
        &self,
        appointment_id: &AppointmentId,
    ) -> Result<Appointment, CrmError>;

    async fn get_service_policy(&self, topic: &str) -> Result<Option<ServicePolicy>, CrmError>;

    /// File a ticket for a human teammate. `summary` carries the
    /// conversation context the teammate will read first.
    async fn escalate(
        &self,
        customer_id: Option<&CustomerId>,
        reason: &str,
        summary: &str,
    ) -> Result<EscalationOutcome, CrmError>;
}
