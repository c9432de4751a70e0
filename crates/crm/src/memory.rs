//! In-memory CRM backend with seeded fixtures. Default backend for local
//! development and the adapter double used throughout the test suites.

use std::collections::HashMap;

use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use tokio::sync::Mutex;

use frontdesk_core::domain::crm::{
    Appointment, AppointmentId, AppointmentSlot, AppointmentStatus, Customer, CustomerId,
    EscalationOutcome, Invoice, InvoiceStatus, ServicePolicy,
};

use crate::{CrmAdapter, CrmError};

struct CrmData {
    customers: Vec<Customer>,
    appointments: Vec<Appointment>,
    invoices: Vec<Invoice>,
    slots: Vec<AppointmentSlot>,
    policies: HashMap<String, ServicePolicy>,
    next_ticket: u32,
    next_appointment: u32,
}

pub struct InMemoryCrm {
    data: Mutex<CrmData>,
}

impl Default for InMemoryCrm {
    fn default() -> Self {
        Self::with_fixtures()
    }
}

impl InMemoryCrm {
    /// Seeded dataset: two customers, a handful of upcoming appointments,
    /// one overdue invoice, and a week of open slots.
    pub fn with_fixtures() -> Self {
        let now = Utc::now();
        let customers = vec![
            Customer {
                id: CustomerId("c1".to_owned()),
                name: "Avery Johnson".to_owned(),
                phone: "+15550001111".to_owned(),
                email: Some("avery@example.com".to_owned()),
                zip: "78704".to_owned(),
            },
            Customer {
                id: CustomerId("c2".to_owned()),
                name: "Riley Chen".to_owned(),
                phone: "+15550002222".to_owned(),
                email: Some("riley@example.com".to_owned()),
                zip: "30303".to_owned(),
            },
        ];

        let appointments = vec![
            Appointment {
                id: AppointmentId("apt-100".to_owned()),
                customer_id: CustomerId("c1".to_owned()),
                service: "HVAC tune-up".to_owned(),
                scheduled_at: now + Duration::days(2),
                status: AppointmentStatus::Scheduled,
            },
            Appointment {
                id: AppointmentId("apt-101".to_owned()),
                customer_id: CustomerId("c1".to_owned()),
                service: "Filter replacement".to_owned(),
                scheduled_at: now + Duration::days(9),
                status: AppointmentStatus::Scheduled,
            },
            Appointment {
                id: AppointmentId("apt-200".to_owned()),
                customer_id: CustomerId("c2".to_owned()),
                service: "Water heater inspection".to_owned(),
                scheduled_at: now + Duration::days(4),
                status: AppointmentStatus::Scheduled,
            },
        ];

        let invoices = vec![Invoice {
            invoice_id: "inv-500".to_owned(),
            customer_id: CustomerId("c1".to_owned()),
            amount_due: Decimal::new(18950, 2),
            due_date: now - Duration::days(3),
            status: InvoiceStatus::Overdue,
        }];

        let slots = (1..=5)
            .map(|day| AppointmentSlot {
                slot_id: format!("slot-{day}"),
                starts_at: now + Duration::days(day) + Duration::hours(9),
                technician: Some("Sam".to_owned()),
            })
            .collect();

        let mut policies = HashMap::new();
        policies.insert(
            "cancellation".to_owned(),
            ServicePolicy {
                topic: "cancellation".to_owned(),
                summary: "Appointments can be cancelled free of charge up to 24 hours in \
                          advance; later cancellations incur a $25 fee."
                    .to_owned(),
            },
        );
        policies.insert(
            "hours".to_owned(),
            ServicePolicy {
                topic: "hours".to_owned(),
                summary: "Technicians are available Monday through Saturday, 8 AM to 6 PM."
                    .to_owned(),
            },
        );

        Self {
            data: Mutex::new(CrmData {
                customers,
                appointments,
                invoices,
                slots,
                policies,
                next_ticket: 1,
                next_appointment: 300,
            }),
        }
    }
}

fn is_upcoming(appointment: &Appointment) -> bool {
    matches!(
        appointment.status,
        AppointmentStatus::Scheduled | AppointmentStatus::Rescheduled
    ) && appointment.scheduled_at > Utc::now()
}

#[async_trait::async_trait]
impl CrmAdapter for InMemoryCrm {
    async fn lookup_customer_by_phone(&self, phone: &str) -> Result<Option<Customer>, CrmError> {
        let data = self.data.lock().await;
        Ok(data.customers.iter().find(|customer| customer.phone == phone).cloned())
    }

    async fn lookup_customer_by_name_and_zip(
        &self,
        name: &str,
        zip: &str,
    ) -> Result<Option<Customer>, CrmError> {
        let data = self.data.lock().await;
        Ok(data
            .customers
            .iter()
            .find(|customer| customer.name.eq_ignore_ascii_case(name) && customer.zip == zip)
            .cloned())
    }

    async fn lookup_customer_by_email(&self, email: &str) -> Result<Option<Customer>, CrmError> {
        let data = self.data.lock().await;
        Ok(data
            .customers
            .iter()
            .find(|customer| {
                customer.email.as_deref().is_some_and(|on_file| on_file.eq_ignore_ascii_case(email))
            })
            .cloned())
    }

    async fn verify_account(
        &self,
        customer_id: &CustomerId,
        zip: &str,
    ) -> Result<bool, CrmError> {
        let data = self.data.lock().await;
        let customer = data
            .customers
            .iter()
            .find(|customer| customer.id == *customer_id)
            .ok_or_else(|| CrmError::UnknownCustomer(customer_id.0.clone()))?;
        Ok(customer.zip == zip.trim())
    }

    async fn get_next_appointment(
        &self,
        customer_id: &CustomerId,
    ) -> Result<Option<Appointment>, CrmError> {
        let data = self.data.lock().await;
        Ok(data
            .appointments
            .iter()
            .filter(|appointment| appointment.customer_id == *customer_id)
            .filter(|appointment| is_upcoming(appointment))
            .min_by_key(|appointment| appointment.scheduled_at)
            .cloned())
    }

    async fn list_upcoming_appointments(
        &self,
        customer_id: &CustomerId,
    ) -> Result<Vec<Appointment>, CrmError> {
        let data = self.data.lock().await;
        let mut upcoming: Vec<Appointment> = data
            .appointments
            .iter()
            .filter(|appointment| appointment.customer_id == *customer_id)
            .filter(|appointment| is_upcoming(appointment))
            .cloned()
            .collect();
        upcoming.sort_by_key(|appointment| appointment.scheduled_at);
        Ok(upcoming)
    }

    async fn get_appointment(
        &self,
        appointment_id: &AppointmentId,
    ) -> Result<Option<Appointment>, CrmError> {
        let data = self.data.lock().await;
        Ok(data.appointments.iter().find(|appointment| appointment.id == *appointment_id).cloned())
    }

    async fn get_open_invoices(
        &self,
        customer_id: &CustomerId,
    ) -> Result<Vec<Invoice>, CrmError> {
        let data = self.data.lock().await;
        Ok(data
            .invoices
            .iter()
            .filter(|invoice| invoice.customer_id == *customer_id)
            .filter(|invoice| {
                matches!(invoice.status, InvoiceStatus::Open | InvoiceStatus::Overdue)
            })
            .cloned()
            .collect())
    }

    async fn get_available_slots(
        &self,
        _customer_id: &CustomerId,
    ) -> Result<Vec<AppointmentSlot>, CrmError> {
        let data = self.data.lock().await;
        Ok(data.slots.clone())
    }

    async fn create_appointment(
        &self,
        customer_id: &CustomerId,
        slot_id: &str,
        service: &str,
    ) -> Result<Appointment, CrmError> {
        let mut data = self.data.lock().await;
        let slot_index = data
            .slots
            .iter()
            .position(|slot| slot.slot_id == slot_id)
            .ok_or_else(|| CrmError::UnknownSlot(slot_id.to_owned()))?;
        if !data.customers.iter().any(|customer| customer.id == *customer_id) {
            return Err(CrmError::UnknownCustomer(customer_id.0.clone()));
        }

        let slot = data.slots.remove(slot_index);
        let id = AppointmentId(format!("apt-{}", data.next_appointment));
        data.next_appointment += 1;
        let appointment = Appointment {
            id,
            customer_id: customer_id.clone(),
            service: service.to_owned(),
            scheduled_at: slot.starts_at,
            status: AppointmentStatus::Scheduled,
        };
        data.appointments.push(appointment.clone());
        Ok(appointment)
    }

    async fn reschedule_appointment(
        &self,
        appointment_id: &AppointmentId,
        slot_id: &str,
    ) -> Result<Appointment, CrmError> {
        let mut data = self.data.lock().await;
        let slot_index = data
            .slots
            .iter()
            .position(|slot| slot.slot_id == slot_id)
            .ok_or_else(|| CrmError::UnknownSlot(slot_id.to_owned()))?;
        let slot = data.slots.remove(slot_index);

        let appointment = data
            .appointments
            .iter_mut()
            .find(|appointment| appointment.id == *appointment_id)
            .ok_or_else(|| CrmError::UnknownAppointment(appointment_id.0.clone()))?;
        appointment.scheduled_at = slot.starts_at;
        appointment.status = AppointmentStatus::Rescheduled;
        Ok(appointment.clone())
    }

    async fn cancel_appointment(
        &self,
        appointment_id: &AppointmentId,
    ) -> Result<Appointment, CrmError> {
        let mut data = self.data.lock().await;
        let appointment = data
            .appointments
            .iter_mut()
            .find(|appointment| appointment.id == *appointment_id)
            .ok_or_else(|| CrmError::UnknownAppointment(appointment_id.0.clone()))?;
        appointment.status = AppointmentStatus::Cancelled;
        Ok(appointment.clone())
    }

    async fn get_service_policy(&self, topic: &str) -> Result<Option<ServicePolicy>, CrmError> {
        let data = self.data.lock().await;
        Ok(data.policies.get(&topic.trim().to_ascii_lowercase()).cloned())
    }

    async fn escalate(
        &self,
        customer_id: Option<&CustomerId>,
        reason: &str,
        summary: &str,
    ) -> Result<EscalationOutcome, CrmError> {
        let mut data = self.data.lock().await;
        let ticket_id = format!("tick-{}", data.next_ticket);
        data.next_ticket += 1;
        tracing::info!(
            event_name = "crm.escalation_filed",
            ticket_id = %ticket_id,
            customer_id = customer_id.map(|id| id.0.as_str()).unwrap_or("unknown"),
            reason,
            summary,
        );
        Ok(EscalationOutcome { ok: true, ticket_id: Some(ticket_id) })
    }
}
