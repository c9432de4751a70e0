//! CRM-backed handlers for the full tool catalog.
//!
//! Handlers never touch session state directly. Workflow-affecting results
//! go through the pure transition engine and come back as domain-state
//! patches in [`ToolRawResult::state_updates`].

use std::sync::Arc;

use serde_json::{json, Map, Value};
use uuid::Uuid;

use frontdesk_core::domain::crm::{AppointmentId, CustomerId};
use frontdesk_core::domain::session::{
    SelectionKind, SelectionOption, WorkflowSelection, WorkflowType,
};
use frontdesk_core::flows::{WorkflowEngine, WorkflowEvent, WorkflowPhase, WorkflowTransitionError};
use frontdesk_core::gating::ToolName;
use frontdesk_crm::CrmAdapter;

use crate::tools::{HandlerError, ToolContext, ToolHandler, ToolRawResult, ToolRegistry, ToolSpec};

impl ToolRegistry {
    /// The full production catalog, wired to one CRM adapter.
    pub fn standard(crm: Arc<dyn CrmAdapter>) -> Self {
        let mut registry = Self::default();

        registry.register(
            ToolSpec {
                name: ToolName::LookupCustomerByPhone,
                description: "Look up a customer record by phone number. Defaults to the \
                              caller's own number when none is given.",
                parameters: json!({
                    "type": "object",
                    "properties": {"phone": {"type": "string"}},
                    "required": [],
                }),
                fallback: "I couldn't check that phone number just now.",
            },
            LookupByPhone { crm: crm.clone() },
        );

        registry.register(
            ToolSpec {
                name: ToolName::LookupCustomerByNameAndZip,
                description: "Look up a customer record by full name and ZIP code.",
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "name": {"type": "string"},
                        "zip": {"type": "string"},
                    },
                    "required": ["name", "zip"],
                }),
                fallback: "I couldn't look up that name just now.",
            },
            LookupByNameAndZip { crm: crm.clone() },
        );

        registry.register(
            ToolSpec {
                name: ToolName::LookupCustomerByEmail,
                description: "Look up a customer record by email address.",
                parameters: json!({
                    "type": "object",
                    "properties": {"email": {"type": "string"}},
                    "required": ["email"],
                }),
                fallback: "I couldn't look up that email just now.",
            },
            LookupByEmail { crm: crm.clone() },
        );

        registry.register(
            ToolSpec {
                name: ToolName::VerifyAccount,
                description: "Verify the caller owns an account by checking the ZIP code on \
                              file. Must succeed before account details can be shared.",
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "customer_id": {"type": "string"},
                        "zip": {"type": "string"},
                    },
                    "required": ["customer_id", "zip"],
                }),
                fallback: "I couldn't run the verification check just now.",
            },
            VerifyAccount { crm: crm.clone() },
        );

        registry.register(
            ToolSpec {
                name: ToolName::GetNextAppointment,
                description: "Fetch the caller's next upcoming appointment.",
                parameters: json!({
                    "type": "object",
                    "properties": {"customer_id": {"type": "string"}},
                    "required": ["customer_id"],
                }),
                fallback: "I couldn't pull up your next appointment just now.",
            },
            GetNextAppointment { crm: crm.clone() },
        );

        registry.register(
            ToolSpec {
                name: ToolName::ListUpcomingAppointments,
                description: "List all upcoming appointments. Use when the caller wants to \
                              pick one to reschedule or cancel.",
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "customer_id": {"type": "string"},
                        "workflow_type": {"type": "string", "enum": ["reschedule", "cancel"]},
                    },
                    "required": ["customer_id"],
                }),
                fallback: "I couldn't pull up your appointments just now.",
            },
            ListUpcomingAppointments { crm: crm.clone() },
        );

        registry.register(
            ToolSpec {
                name: ToolName::GetAvailableSlots,
                description: "List open appointment slots the caller can choose from.",
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "customer_id": {"type": "string"},
                        "workflow_type": {"type": "string", "enum": ["reschedule", "cancel"]},
                    },
                    "required": ["customer_id"],
                }),
                fallback: "I couldn't pull up open slots just now.",
            },
            GetAvailableSlots { crm: crm.clone() },
        );

        registry.register(
            ToolSpec {
                name: ToolName::CreateAppointment,
                description: "Book a new appointment in a chosen open slot.",
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "customer_id": {"type": "string"},
                        "slot_id": {"type": "string"},
                        "service": {"type": "string"},
                    },
                    "required": ["customer_id", "slot_id", "service"],
                }),
                fallback: "I couldn't book that appointment just now.",
            },
            CreateAppointment { crm: crm.clone() },
        );

        registry.register(
            ToolSpec {
                name: ToolName::RescheduleAppointment,
                description: "Move an existing appointment to a new slot. Asks the caller to \
                              confirm before anything changes.",
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "appointment_id": {"type": "string"},
                        "slot_id": {"type": "string"},
                    },
                    "required": ["appointment_id", "slot_id"],
                }),
                fallback: "I couldn't reschedule that appointment just now.",
            },
            RescheduleAppointment { crm: crm.clone() },
        );

        registry.register(
            ToolSpec {
                name: ToolName::CancelAppointment,
                description: "Cancel an existing appointment. Asks the caller to confirm \
                              before anything changes.",
                parameters: json!({
                    "type": "object",
                    "properties": {"appointment_id": {"type": "string"}},
                    "required": ["appointment_id"],
                }),
                fallback: "I couldn't cancel that appointment just now.",
            },
            CancelAppointment { crm: crm.clone() },
        );

        registry.register(
            ToolSpec {
                name: ToolName::AbortWorkflow,
                description: "Wind down the current reschedule or cancel flow when the caller \
                              declines a confirmation or changes their mind.",
                parameters: json!({
                    "type": "object",
                    "properties": {},
                    "required": [],
                }),
                fallback: "I couldn't wind that down just now.",
            },
            AbortWorkflow,
        );

        registry.register(
            ToolSpec {
                name: ToolName::GetOpenInvoices,
                description: "Fetch the caller's open and overdue invoices.",
                parameters: json!({
                    "type": "object",
                    "properties": {"customer_id": {"type": "string"}},
                    "required": ["customer_id"],
                }),
                fallback: "I couldn't pull up your billing details just now.",
            },
            GetOpenInvoices { crm: crm.clone() },
        );

        registry.register(
            ToolSpec {
                name: ToolName::GetServicePolicy,
                description: "Fetch the company policy on a topic such as cancellation or \
                              business hours.",
                parameters: json!({
                    "type": "object",
                    "properties": {"topic": {"type": "string"}},
                    "required": ["topic"],
                }),
                fallback: "I couldn't pull up that policy just now.",
            },
            GetServicePolicy { crm: crm.clone() },
        );

        registry.register(
            ToolSpec {
                name: ToolName::Escalate,
                description: "File a ticket for a human teammate when the caller asks for a \
                              person or the agent cannot help. Include a short summary of the \
                              conversation so far.",
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "reason": {"type": "string"},
                        "summary": {"type": "string"},
                        "customer_id": {"type": "string"},
                    },
                    "required": ["reason", "summary"],
                }),
                fallback: "I couldn't reach our support team just now.",
            },
            Escalate { crm },
        );

        registry
    }
}

fn required_str<'a>(args: &'a Value, key: &str) -> Result<&'a str, HandlerError> {
    args.get(key)
        .and_then(Value::as_str)
        .filter(|value| !value.trim().is_empty())
        .ok_or_else(|| HandlerError::InvalidArguments(format!("`{key}` must be a string")))
}

fn optional_str<'a>(args: &'a Value, key: &str) -> Option<&'a str> {
    args.get(key).and_then(Value::as_str).filter(|value| !value.trim().is_empty())
}

fn workflow_type_arg(args: &Value, default: WorkflowType) -> WorkflowType {
    match optional_str(args, "workflow_type") {
        Some("cancel") => WorkflowType::Cancel,
        Some("reschedule") => WorkflowType::Reschedule,
        _ => default,
    }
}

fn customer_result(customer: Option<frontdesk_core::domain::crm::Customer>) -> ToolRawResult {
    match customer {
        Some(customer) => {
            let summary = format!(
                "I found an account for {}. I still need to verify the ZIP code on file \
                 before sharing details.",
                customer.name
            );
            ToolRawResult::new(json!({
                "found": true,
                "customer_id": customer.id.0,
                "name": customer.name,
            }))
            .with_summary(summary)
        }
        None => ToolRawResult::new(json!({"found": false}))
            .with_summary("I couldn't find a matching account."),
    }
}

/// Patch that presents a fresh selection, silently superseding any pending
/// one. Presenting never fails, so the transition error is unreachable.
fn present_options(
    ctx: &ToolContext,
    kind: SelectionKind,
    workflow_type: WorkflowType,
    options: Vec<SelectionOption>,
) -> Map<String, Value> {
    let selection = WorkflowSelection {
        kind,
        options,
        presented_at: chrono::Utc::now(),
        workflow_type,
    };
    WorkflowEngine
        .apply(
            &ctx.state,
            &WorkflowEvent::OptionsPresented {
                workflow_id: Uuid::new_v4().to_string(),
                selection,
            },
        )
        .map(|transition| transition.patch)
        .unwrap_or_default()
}

fn numbered(options: &[SelectionOption]) -> String {
    options
        .iter()
        .enumerate()
        .map(|(index, option)| format!("{}. {}", index + 1, option.label))
        .collect::<Vec<_>>()
        .join(" ")
}

struct LookupByPhone {
    crm: Arc<dyn CrmAdapter>,
}

#[async_trait::async_trait]
impl ToolHandler for LookupByPhone {
    async fn execute(&self, ctx: &ToolContext, args: Value) -> Result<ToolRawResult, HandlerError> {
        let phone = optional_str(&args, "phone")
            .map(str::to_owned)
            .or_else(|| ctx.state.phone_number.clone())
            .ok_or_else(|| {
                HandlerError::InvalidArguments("no phone number given or on the session".into())
            })?;
        Ok(customer_result(self.crm.lookup_customer_by_phone(&phone).await?))
    }
}

struct LookupByNameAndZip {
    crm: Arc<dyn CrmAdapter>,
}

#[async_trait::async_trait]
impl ToolHandler for LookupByNameAndZip {
    async fn execute(&self, _ctx: &ToolContext, args: Value) -> Result<ToolRawResult, HandlerError> {
        let name = required_str(&args, "name")?;
        let zip = required_str(&args, "zip")?;
        Ok(customer_result(self.crm.lookup_customer_by_name_and_zip(name, zip).await?))
    }
}

struct LookupByEmail {
    crm: Arc<dyn CrmAdapter>,
}

#[async_trait::async_trait]
impl ToolHandler for LookupByEmail {
    async fn execute(&self, _ctx: &ToolContext, args: Value) -> Result<ToolRawResult, HandlerError> {
        let email = required_str(&args, "email")?;
        Ok(customer_result(self.crm.lookup_customer_by_email(email).await?))
    }
}

struct VerifyAccount {
    crm: Arc<dyn CrmAdapter>,
}

#[async_trait::async_trait]
impl ToolHandler for VerifyAccount {
    async fn execute(&self, ctx: &ToolContext, args: Value) -> Result<ToolRawResult, HandlerError> {
        let customer_id = CustomerId(required_str(&args, "customer_id")?.to_owned());
        let zip = required_str(&args, "zip")?;

        if self.crm.verify_account(&customer_id, zip).await? {
            let transition = WorkflowEngine
                .apply(
                    &ctx.state,
                    &WorkflowEvent::VerificationSucceeded { customer_id: customer_id.0.clone() },
                )
                .map_err(|error| HandlerError::InvalidArguments(error.to_string()))?;
            return Ok(ToolRawResult::new(json!({"verified": true}))
                .with_summary("Thanks, you're verified.")
                .with_state_updates(transition.patch));
        }

        match WorkflowEngine.apply(&ctx.state, &WorkflowEvent::VerificationFailed) {
            Ok(transition) => {
                let attempts = ctx.state.verification().zip_attempts + 1;
                let remaining = ctx.max_zip_attempts.saturating_sub(attempts);
                let summary = if remaining == 0 {
                    "That ZIP code doesn't match what we have on file, and I'm out of \
                     attempts I can accept. I can connect you with a teammate instead."
                        .to_owned()
                } else {
                    "That ZIP code doesn't match what we have on file. Could you double-check \
                     it?"
                        .to_owned()
                };
                Ok(ToolRawResult::new(
                    json!({"verified": false, "remaining_attempts": remaining}),
                )
                .with_summary(summary)
                .with_state_updates(transition.patch))
            }
            // One-way flag: a failed re-check never un-verifies the caller.
            Err(WorkflowTransitionError::AlreadyVerified) => Ok(ToolRawResult::new(
                json!({"verified": true}),
            )
            .with_summary("You're already verified.")),
            Err(error) => Err(HandlerError::InvalidArguments(error.to_string())),
        }
    }
}

struct GetNextAppointment {
    crm: Arc<dyn CrmAdapter>,
}

#[async_trait::async_trait]
impl ToolHandler for GetNextAppointment {
    async fn execute(&self, _ctx: &ToolContext, args: Value) -> Result<ToolRawResult, HandlerError> {
        let customer_id = CustomerId(required_str(&args, "customer_id")?.to_owned());
        match self.crm.get_next_appointment(&customer_id).await? {
            Some(appointment) => {
                let label = appointment.label();
                Ok(ToolRawResult::new(json!({
                    "appointment_id": appointment.id.0,
                    "label": label,
                    "scheduled_at": appointment.scheduled_at,
                }))
                .with_summary(format!("Your next appointment is {label}.")))
            }
            None => Ok(ToolRawResult::new(json!({"appointment": null}))
                .with_summary("You don't have any upcoming appointments.")),
        }
    }
}

struct ListUpcomingAppointments {
    crm: Arc<dyn CrmAdapter>,
}

#[async_trait::async_trait]
impl ToolHandler for ListUpcomingAppointments {
    async fn execute(&self, ctx: &ToolContext, args: Value) -> Result<ToolRawResult, HandlerError> {
        let customer_id = CustomerId(required_str(&args, "customer_id")?.to_owned());
        let workflow_type = workflow_type_arg(&args, WorkflowType::Reschedule);

        let appointments = self.crm.list_upcoming_appointments(&customer_id).await?;
        if appointments.is_empty() {
            return Ok(ToolRawResult::new(json!({"appointments": []}))
                .with_summary("You don't have any upcoming appointments."));
        }

        let options: Vec<SelectionOption> = appointments
            .iter()
            .map(|appointment| SelectionOption {
                id: appointment.id.0.clone(),
                label: appointment.label(),
            })
            .collect();
        let summary = format!(
            "You have {} upcoming appointment(s): {} Which one did you mean?",
            options.len(),
            numbered(&options),
        );
        let patch = present_options(ctx, SelectionKind::Appointment, workflow_type, options);

        Ok(ToolRawResult::new(serde_json::to_value(&appointments).unwrap_or(Value::Null))
            .with_summary(summary)
            .with_state_updates(patch))
    }
}

struct GetAvailableSlots {
    crm: Arc<dyn CrmAdapter>,
}

#[async_trait::async_trait]
impl ToolHandler for GetAvailableSlots {
    async fn execute(&self, ctx: &ToolContext, args: Value) -> Result<ToolRawResult, HandlerError> {
        let customer_id = CustomerId(required_str(&args, "customer_id")?.to_owned());
        let inherited = ctx
            .state
            .active_selection()
            .map(|selection| selection.workflow_type)
            .unwrap_or(WorkflowType::Reschedule);
        let workflow_type = workflow_type_arg(&args, inherited);

        let slots = self.crm.get_available_slots(&customer_id).await?;
        if slots.is_empty() {
            return Ok(ToolRawResult::new(json!({"slots": []}))
                .with_summary("I don't see any open slots right now."));
        }

        let options: Vec<SelectionOption> = slots
            .iter()
            .map(|slot| SelectionOption { id: slot.slot_id.clone(), label: slot.label() })
            .collect();
        let summary =
            format!("Here are the open slots: {} Which works for you?", numbered(&options));
        let patch = present_options(ctx, SelectionKind::Slot, workflow_type, options);

        Ok(ToolRawResult::new(serde_json::to_value(&slots).unwrap_or(Value::Null))
            .with_summary(summary)
            .with_state_updates(patch))
    }
}

struct CreateAppointment {
    crm: Arc<dyn CrmAdapter>,
}

#[async_trait::async_trait]
impl ToolHandler for CreateAppointment {
    async fn execute(&self, ctx: &ToolContext, args: Value) -> Result<ToolRawResult, HandlerError> {
        let customer_id = CustomerId(required_str(&args, "customer_id")?.to_owned());
        let slot_id = required_str(&args, "slot_id")?;
        let service = required_str(&args, "service")?;

        let appointment = self.crm.create_appointment(&customer_id, slot_id, service).await?;
        let patch = WorkflowEngine
            .apply(&ctx.state, &WorkflowEvent::WorkflowCompleted)
            .map(|transition| transition.patch)
            .unwrap_or_default();
        let label = appointment.label();
        Ok(ToolRawResult::new(json!({
            "appointment_id": appointment.id.0,
            "label": label,
        }))
        .with_summary(format!("You're booked: {label}."))
        .with_state_updates(patch))
    }
}

/// Confirmation option ids encode the exact mutation they approve, so a
/// stale confirmation can never apply to different arguments.
fn reschedule_confirmation_id(appointment_id: &str, slot_id: &str) -> String {
    format!("{appointment_id}:{slot_id}")
}

fn has_pending_confirmation(ctx: &ToolContext, option_id: &str) -> bool {
    ctx.state
        .active_selection()
        .filter(|selection| selection.kind == SelectionKind::Confirmation)
        .is_some_and(|selection| selection.options.iter().any(|option| option.id == option_id))
}

/// When an appointment-kind selection is pending, the consumed id must
/// resolve against the presented options; the transition engine rejects
/// anything that was never offered.
fn check_presented_appointment(ctx: &ToolContext, appointment_id: &str) -> Result<(), HandlerError> {
    if let Some(selection) = ctx.state.active_selection() {
        if selection.kind == SelectionKind::Appointment {
            WorkflowEngine
                .apply(
                    &ctx.state,
                    &WorkflowEvent::SelectionResolved { option_id: appointment_id.to_owned() },
                )
                .map_err(|error| HandlerError::InvalidArguments(error.to_string()))?;
        }
    }
    Ok(())
}

/// Consume the pending confirmation; invalid when none is pending.
fn accept_confirmation(ctx: &ToolContext) -> Result<Map<String, Value>, HandlerError> {
    WorkflowEngine
        .apply(&ctx.state, &WorkflowEvent::ConfirmationAccepted)
        .map(|transition| transition.patch)
        .map_err(|error| HandlerError::InvalidArguments(error.to_string()))
}

struct RescheduleAppointment {
    crm: Arc<dyn CrmAdapter>,
}

#[async_trait::async_trait]
impl ToolHandler for RescheduleAppointment {
    async fn execute(&self, ctx: &ToolContext, args: Value) -> Result<ToolRawResult, HandlerError> {
        let appointment_id = required_str(&args, "appointment_id")?;
        let slot_id = required_str(&args, "slot_id")?;
        let confirmation_id = reschedule_confirmation_id(appointment_id, slot_id);

        if has_pending_confirmation(ctx, &confirmation_id) {
            let moved = self
                .crm
                .reschedule_appointment(&AppointmentId(appointment_id.to_owned()), slot_id)
                .await?;
            let mut patch = accept_confirmation(ctx)?;
            patch.extend(
                WorkflowEngine
                    .apply(&ctx.state, &WorkflowEvent::WorkflowCompleted)
                    .map(|transition| transition.patch)
                    .unwrap_or_default(),
            );
            let label = moved.label();
            return Ok(ToolRawResult::new(json!({
                "rescheduled": true,
                "appointment_id": moved.id.0,
                "label": label,
            }))
            .with_summary(format!("Done. Your appointment is now {label}."))
            .with_state_updates(patch));
        }

        check_presented_appointment(ctx, appointment_id)?;
        let appointment = self
            .crm
            .get_appointment(&AppointmentId(appointment_id.to_owned()))
            .await?
            .ok_or_else(|| {
                HandlerError::InvalidArguments(format!("unknown appointment `{appointment_id}`"))
            })?;
        let slot_label = self
            .crm
            .get_available_slots(&appointment.customer_id)
            .await?
            .into_iter()
            .find(|slot| slot.slot_id == slot_id)
            .map(|slot| slot.label())
            .ok_or_else(|| {
                HandlerError::InvalidArguments(format!("slot `{slot_id}` is no longer open"))
            })?;

        let summary = format!(
            "Just to confirm: move your {} from {} to {}?",
            appointment.service,
            appointment.label(),
            slot_label,
        );
        let patch = present_options(
            ctx,
            SelectionKind::Confirmation,
            WorkflowType::Reschedule,
            vec![SelectionOption {
                id: confirmation_id,
                label: format!("Move to {slot_label}"),
            }],
        );
        Ok(ToolRawResult::new(json!({"requires_confirmation": true}))
            .with_summary(summary)
            .with_state_updates(patch))
    }
}

struct CancelAppointment {
    crm: Arc<dyn CrmAdapter>,
}

#[async_trait::async_trait]
impl ToolHandler for CancelAppointment {
    async fn execute(&self, ctx: &ToolContext, args: Value) -> Result<ToolRawResult, HandlerError> {
        let appointment_id = required_str(&args, "appointment_id")?;

        if has_pending_confirmation(ctx, appointment_id) {
            let cancelled =
                self.crm.cancel_appointment(&AppointmentId(appointment_id.to_owned())).await?;
            let mut patch = accept_confirmation(ctx)?;
            patch.extend(
                WorkflowEngine
                    .apply(&ctx.state, &WorkflowEvent::WorkflowCompleted)
                    .map(|transition| transition.patch)
                    .unwrap_or_default(),
            );
            return Ok(ToolRawResult::new(json!({
                "cancelled": true,
                "appointment_id": cancelled.id.0,
            }))
            .with_summary(format!("Your {} is cancelled.", cancelled.label()))
            .with_state_updates(patch));
        }

        check_presented_appointment(ctx, appointment_id)?;
        let appointment = self
            .crm
            .get_appointment(&AppointmentId(appointment_id.to_owned()))
            .await?
            .ok_or_else(|| {
                HandlerError::InvalidArguments(format!("unknown appointment `{appointment_id}`"))
            })?;

        let label = appointment.label();
        let patch = present_options(
            ctx,
            SelectionKind::Confirmation,
            WorkflowType::Cancel,
            vec![SelectionOption {
                id: appointment_id.to_owned(),
                label: format!("Cancel {label}"),
            }],
        );
        Ok(ToolRawResult::new(json!({"requires_confirmation": true}))
            .with_summary(format!("Just to confirm: cancel your {label}?"))
            .with_state_updates(patch))
    }
}

struct AbortWorkflow;

#[async_trait::async_trait]
impl ToolHandler for AbortWorkflow {
    async fn execute(&self, ctx: &ToolContext, _args: Value) -> Result<ToolRawResult, HandlerError> {
        let event = match WorkflowEngine.phase(&ctx.state) {
            WorkflowPhase::AwaitingConfirmation => WorkflowEvent::ConfirmationDeclined,
            _ => WorkflowEvent::WorkflowAborted,
        };
        let patch = WorkflowEngine
            .apply(&ctx.state, &event)
            .map(|transition| transition.patch)
            .map_err(|error| HandlerError::InvalidArguments(error.to_string()))?;
        Ok(ToolRawResult::new(json!({"aborted": true}))
            .with_summary("No problem, I won't make any changes.")
            .with_state_updates(patch))
    }
}

struct GetOpenInvoices {
    crm: Arc<dyn CrmAdapter>,
}

#[async_trait::async_trait]
impl ToolHandler for GetOpenInvoices {
    async fn execute(&self, _ctx: &ToolContext, args: Value) -> Result<ToolRawResult, HandlerError> {
        let customer_id = CustomerId(required_str(&args, "customer_id")?.to_owned());
        let invoices = self.crm.get_open_invoices(&customer_id).await?;

        if invoices.is_empty() {
            return Ok(ToolRawResult::new(json!({"invoices": []}))
                .with_summary("Your balance is clear; no open invoices."));
        }

        let total = invoices
            .iter()
            .fold(rust_decimal::Decimal::ZERO, |sum, invoice| sum + invoice.amount_due);
        let summary =
            format!("You have {} open invoice(s) totaling ${total}.", invoices.len());
        Ok(ToolRawResult::new(serde_json::to_value(&invoices).unwrap_or(Value::Null))
            .with_summary(summary))
    }
}

struct GetServicePolicy {
    crm: Arc<dyn CrmAdapter>,
}

#[async_trait::async_trait]
impl ToolHandler for GetServicePolicy {
    async fn execute(&self, _ctx: &ToolContext, args: Value) -> Result<ToolRawResult, HandlerError> {
        let topic = required_str(&args, "topic")?;
        match self.crm.get_service_policy(topic).await? {
            Some(policy) => Ok(ToolRawResult::new(json!({
                "topic": policy.topic,
                "summary": policy.summary.clone(),
            }))
            .with_summary(policy.summary)),
            None => Ok(ToolRawResult::new(json!({"policy": null})).with_summary(format!(
                "I don't have a written policy on {topic}, but I can connect you with a \
                 teammate who would know."
            ))),
        }
    }
}

struct Escalate {
    crm: Arc<dyn CrmAdapter>,
}

#[async_trait::async_trait]
impl ToolHandler for Escalate {
    async fn execute(&self, ctx: &ToolContext, args: Value) -> Result<ToolRawResult, HandlerError> {
        let reason = required_str(&args, "reason")?;
        let summary = required_str(&args, "summary")?;
        let customer_id = optional_str(&args, "customer_id")
            .map(|id| CustomerId(id.to_owned()))
            .or_else(|| ctx.state.verification().customer_id.map(CustomerId));

        let outcome = self.crm.escalate(customer_id.as_ref(), reason, summary).await?;
        let summary = match (&outcome.ticket_id, outcome.ok) {
            (Some(ticket_id), true) => format!(
                "I've flagged this for our team (ticket {ticket_id}); someone will follow up \
                 shortly."
            ),
            _ => "I've asked our team to follow up with you.".to_owned(),
        };
        Ok(ToolRawResult::new(serde_json::to_value(&outcome).unwrap_or(Value::Null))
            .with_summary(summary))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use frontdesk_core::domain::session::{SelectionKind, SessionState};
    use frontdesk_core::gating::{available_tools, ToolName};
    use frontdesk_crm::{CrmAdapter, InMemoryCrm};

    use crate::tools::{ToolContext, ToolRegistry};

    fn ctx() -> ToolContext {
        ToolContext { state: SessionState::default(), max_zip_attempts: 3 }
    }

    fn verified_ctx() -> ToolContext {
        let mut ctx = ctx();
        ctx.state.apply_updates(
            [(
                "verification".to_owned(),
                json!({"verified": true, "customer_id": "c1", "zip_attempts": 0}),
            )]
            .into_iter()
            .collect(),
        );
        ctx
    }

    fn registry() -> ToolRegistry {
        ToolRegistry::standard(Arc::new(InMemoryCrm::with_fixtures()))
    }

    async fn run(
        registry: &ToolRegistry,
        ctx: &ToolContext,
        name: ToolName,
        args: serde_json::Value,
    ) -> crate::tools::ToolRawResult {
        registry
            .get(name)
            .expect("tool registered")
            .handler
            .execute(ctx, args)
            .await
            .expect("handler succeeds")
    }

    #[test]
    fn standard_registry_covers_the_whole_catalog() {
        registry().ensure_complete().expect("all tools registered");
    }

    #[tokio::test]
    async fn successful_verification_patches_session_state() {
        let registry = registry();
        let result = run(
            &registry,
            &ctx(),
            ToolName::VerifyAccount,
            json!({"customer_id": "c1", "zip": "78704"}),
        )
        .await;

        let mut state = SessionState::default();
        state.apply_updates(result.state_updates.expect("patch present"));
        assert!(state.is_verified());
        assert_eq!(state.verification().customer_id.as_deref(), Some("c1"));
    }

    #[tokio::test]
    async fn failed_verification_counts_an_attempt() {
        let registry = registry();
        let result = run(
            &registry,
            &ctx(),
            ToolName::VerifyAccount,
            json!({"customer_id": "c1", "zip": "00000"}),
        )
        .await;

        assert_eq!(result.result["verified"], json!(false));
        assert_eq!(result.result["remaining_attempts"], json!(2));
        let mut state = SessionState::default();
        state.apply_updates(result.state_updates.expect("patch present"));
        assert_eq!(state.verification().zip_attempts, 1);
        assert!(!state.is_verified());
    }

    #[tokio::test]
    async fn listing_appointments_presents_a_selection() {
        let registry = registry();
        let result = run(
            &registry,
            &verified_ctx(),
            ToolName::ListUpcomingAppointments,
            json!({"customer_id": "c1", "workflow_type": "cancel"}),
        )
        .await;

        let mut state = verified_ctx().state;
        state.apply_updates(result.state_updates.expect("selection patch"));
        let selection = state.active_selection().expect("selection pending");
        assert_eq!(selection.kind, SelectionKind::Appointment);
        assert_eq!(selection.options.len(), 2);
        assert!(state.has_active_workflow());
        assert!(result.summary.expect("summary").contains("Which one"));
    }

    #[tokio::test]
    async fn cancel_asks_for_confirmation_before_mutating() {
        let crm = Arc::new(InMemoryCrm::with_fixtures());
        let registry_with_crm = ToolRegistry::standard(crm.clone());

        // First call proposes, second call (after the confirmation patch is
        // applied) performs.
        let mut ctx = verified_ctx();
        let list = run(
            &registry_with_crm,
            &ctx,
            ToolName::ListUpcomingAppointments,
            json!({"customer_id": "c1", "workflow_type": "cancel"}),
        )
        .await;
        ctx.state.apply_updates(list.state_updates.expect("selection patch"));

        let proposal = run(
            &registry_with_crm,
            &ctx,
            ToolName::CancelAppointment,
            json!({"appointment_id": "apt-100"}),
        )
        .await;
        assert_eq!(proposal.result["requires_confirmation"], json!(true));
        ctx.state.apply_updates(proposal.state_updates.expect("confirmation patch"));
        assert_eq!(
            ctx.state.active_selection().expect("pending").kind,
            SelectionKind::Confirmation
        );

        let done = run(
            &registry_with_crm,
            &ctx,
            ToolName::CancelAppointment,
            json!({"appointment_id": "apt-100"}),
        )
        .await;
        assert_eq!(done.result["cancelled"], json!(true));
        ctx.state.apply_updates(done.state_updates.expect("clear patch"));
        assert!(!ctx.state.has_active_workflow());

        let remaining = crm
            .list_upcoming_appointments(&frontdesk_core::domain::crm::CustomerId("c1".to_owned()))
            .await
            .expect("list");
        assert!(remaining.iter().all(|appointment| appointment.id.0 != "apt-100"));
    }

    #[tokio::test]
    async fn cancelling_an_unlisted_appointment_is_rejected() {
        let registry = registry();
        let mut ctx = verified_ctx();
        let list = run(
            &registry,
            &ctx,
            ToolName::ListUpcomingAppointments,
            json!({"customer_id": "c1", "workflow_type": "cancel"}),
        )
        .await;
        ctx.state.apply_updates(list.state_updates.expect("selection patch"));

        let error = registry
            .get(ToolName::CancelAppointment)
            .expect("registered")
            .handler
            .execute(&ctx, json!({"appointment_id": "apt-200"}))
            .await
            .expect_err("apt-200 belongs to another customer's list");
        assert!(error.to_string().contains("not among the presented"));
    }

    #[tokio::test]
    async fn declined_confirmation_clears_the_workflow_and_its_authority() {
        let registry = registry();
        let mut ctx = verified_ctx();
        let list = run(
            &registry,
            &ctx,
            ToolName::ListUpcomingAppointments,
            json!({"customer_id": "c1", "workflow_type": "cancel"}),
        )
        .await;
        ctx.state.apply_updates(list.state_updates.expect("selection patch"));

        let proposal = run(
            &registry,
            &ctx,
            ToolName::CancelAppointment,
            json!({"appointment_id": "apt-100"}),
        )
        .await;
        assert_eq!(proposal.result["requires_confirmation"], json!(true));
        ctx.state.apply_updates(proposal.state_updates.expect("confirmation patch"));

        // The caller says "actually, never mind".
        let aborted = run(&registry, &ctx, ToolName::AbortWorkflow, json!({})).await;
        assert_eq!(aborted.result["aborted"], json!(true));
        ctx.state.apply_updates(aborted.state_updates.expect("clear patch"));

        assert!(!ctx.state.has_active_workflow());
        assert!(!available_tools(&ctx.state).contains(&ToolName::CancelAppointment));

        // Even if the model somehow re-issues the cancel, the stale
        // confirmation no longer authorizes it; the handler re-proposes.
        let again = run(
            &registry,
            &ctx,
            ToolName::CancelAppointment,
            json!({"appointment_id": "apt-100"}),
        )
        .await;
        assert_eq!(again.result["requires_confirmation"], json!(true));
    }

    #[tokio::test]
    async fn escalation_passes_reason_and_summary_through() {
        let registry = registry();
        let result = run(
            &registry,
            &ctx(),
            ToolName::Escalate,
            json!({
                "reason": "caller asked for a human",
                "summary": "wants to dispute the overdue balance on inv-500",
            }),
        )
        .await;
        assert_eq!(result.result["ok"], json!(true));
        assert!(result.summary.expect("summary").contains("ticket"));

        // A summary is not optional; the teammate reading the ticket needs it.
        let error = registry
            .get(ToolName::Escalate)
            .expect("registered")
            .handler
            .execute(&ctx(), json!({"reason": "caller asked for a human"}))
            .await
            .expect_err("summary is required");
        assert!(error.to_string().contains("summary"));
    }

    #[tokio::test]
    async fn open_invoices_are_summarized_with_a_total() {
        let registry = registry();
        let result =
            run(&registry, &verified_ctx(), ToolName::GetOpenInvoices, json!({"customer_id": "c1"}))
                .await;
        assert!(result.summary.expect("summary").contains("189.50"));
    }
}
