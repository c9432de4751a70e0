use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CustomerId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AppointmentId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    pub id: CustomerId,
    pub name: String,
    pub phone: String,
    pub email: Option<String>,
    pub zip: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Scheduled,
    Rescheduled,
    Cancelled,
    Completed,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: AppointmentId,
    pub customer_id: CustomerId,
    pub service: String,
    pub scheduled_at: DateTime<Utc>,
    pub status: AppointmentStatus,
}

impl Appointment {
    /// Short human-readable label used when presenting options to a caller.
    pub fn label(&self) -> String {
        format!("{} on {}", self.service, self.scheduled_at.format("%A %B %-d at %-I:%M %p"))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppointmentSlot {
    pub slot_id: String,
    pub starts_at: DateTime<Utc>,
    pub technician: Option<String>,
}

impl AppointmentSlot {
    pub fn label(&self) -> String {
        self.starts_at.format("%A %B %-d at %-I:%M %p").to_string()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Open,
    Overdue,
    Paid,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Invoice {
    pub invoice_id: String,
    pub customer_id: CustomerId,
    pub amount_due: Decimal,
    pub due_date: DateTime<Utc>,
    pub status: InvoiceStatus,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServicePolicy {
    pub topic: String,
    pub summary: String,
}

/// Result of an escalation request. Business-level refusal is expressed with
/// `ok: false`, never as an adapter error.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationOutcome {
    pub ok: bool,
    pub ticket_id: Option<String>,
}
