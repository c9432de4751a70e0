use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::domain::session::SessionState;

/// Closed catalog of tool names. The registry is validated against this enum
/// at startup, so an unregistered tool is a detectable configuration error
/// rather than a runtime surprise.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolName {
    LookupCustomerByPhone,
    LookupCustomerByNameAndZip,
    LookupCustomerByEmail,
    VerifyAccount,
    GetNextAppointment,
    ListUpcomingAppointments,
    GetAvailableSlots,
    CreateAppointment,
    RescheduleAppointment,
    CancelAppointment,
    AbortWorkflow,
    GetOpenInvoices,
    GetServicePolicy,
    Escalate,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ToolRequirements {
    pub requires_verification: bool,
    pub requires_active_workflow: bool,
}

impl ToolName {
    pub const ALL: [ToolName; 14] = [
        ToolName::LookupCustomerByPhone,
        ToolName::LookupCustomerByNameAndZip,
        ToolName::LookupCustomerByEmail,
        ToolName::VerifyAccount,
        ToolName::GetNextAppointment,
        ToolName::ListUpcomingAppointments,
        ToolName::GetAvailableSlots,
        ToolName::CreateAppointment,
        ToolName::RescheduleAppointment,
        ToolName::CancelAppointment,
        ToolName::AbortWorkflow,
        ToolName::GetOpenInvoices,
        ToolName::GetServicePolicy,
        ToolName::Escalate,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::LookupCustomerByPhone => "lookup_customer_by_phone",
            Self::LookupCustomerByNameAndZip => "lookup_customer_by_name_and_zip",
            Self::LookupCustomerByEmail => "lookup_customer_by_email",
            Self::VerifyAccount => "verify_account",
            Self::GetNextAppointment => "get_next_appointment",
            Self::ListUpcomingAppointments => "list_upcoming_appointments",
            Self::GetAvailableSlots => "get_available_slots",
            Self::CreateAppointment => "create_appointment",
            Self::RescheduleAppointment => "reschedule_appointment",
            Self::CancelAppointment => "cancel_appointment",
            Self::AbortWorkflow => "abort_workflow",
            Self::GetOpenInvoices => "get_open_invoices",
            Self::GetServicePolicy => "get_service_policy",
            Self::Escalate => "escalate",
        }
    }

    /// Declared gating requirements. Lookup/verify tools are always on so an
    /// unverified caller can become verified; anything touching account data
    /// needs verification; mutating scheduling tools additionally need an
    /// active reschedule/cancel workflow.
    pub fn requirements(self) -> ToolRequirements {
        match self {
            Self::LookupCustomerByPhone
            | Self::LookupCustomerByNameAndZip
            | Self::LookupCustomerByEmail
            | Self::VerifyAccount
            | Self::GetServicePolicy
            | Self::Escalate => ToolRequirements::default(),
            Self::GetNextAppointment
            | Self::ListUpcomingAppointments
            | Self::GetAvailableSlots
            | Self::CreateAppointment
            | Self::GetOpenInvoices => {
                ToolRequirements { requires_verification: true, requires_active_workflow: false }
            }
            Self::RescheduleAppointment | Self::CancelAppointment => {
                ToolRequirements { requires_verification: true, requires_active_workflow: true }
            }
            Self::AbortWorkflow => {
                ToolRequirements { requires_verification: false, requires_active_workflow: true }
            }
        }
    }
}

impl fmt::Display for ToolName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ToolName {
    type Err = UnknownToolName;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        ToolName::ALL
            .into_iter()
            .find(|name| name.as_str() == value)
            .ok_or_else(|| UnknownToolName(value.to_owned()))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("unknown tool name `{0}`")]
pub struct UnknownToolName(pub String);

/// The subset of the catalog callable in the current state. Pure and
/// deterministic; absent or malformed sub-state reads as "not verified, no
/// active workflow", so the policy fails closed.
pub fn available_tools(state: &SessionState) -> BTreeSet<ToolName> {
    let verified = state.is_verified();
    let workflow_active = state.has_active_workflow();

    ToolName::ALL
        .into_iter()
        .filter(|name| {
            let requirements = name.requirements();
            (!requirements.requires_verification || verified)
                && (!requirements.requires_active_workflow || workflow_active)
        })
        .collect()
}
