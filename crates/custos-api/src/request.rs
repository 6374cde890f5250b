//! The ingestion boundary.
//!
//! `SubmitRequest` is what arrives from outside: `event_type` is still a
//! string and nothing has been checked.  `into_candidate` turns it into a
//! typed `EventCandidate` or a `Validation` error.
//!
//! The constructors below cover the events collaborators record most often.
//! They put the patient in `subject_id` (so accounting reports find it) and
//! run their details through [`sanitize_details`].

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use custos_contracts::{
    error::{CustosError, CustosResult},
    event::{EventCandidate, EventType},
};

use crate::sanitize::sanitize_details;

/// A request to record one audit event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitRequest {
    pub event_type: String,
    pub component: String,
    pub operation: String,
    pub actor_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

/// Inputs of a model inference event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInference {
    pub model_id: String,
    pub model_version: String,
    /// Hash of the model input; the input itself is never logged.
    pub input_hash: String,
    pub output_summary: String,
    pub latency_ms: f64,
    pub cost_usd: f64,
}

/// Inputs of an LLM API call event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmCall {
    pub model: String,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub latency_ms: f64,
    pub cost_usd: f64,
    pub purpose: String,
}

impl SubmitRequest {
    pub fn new(
        event_type: impl Into<String>,
        component: impl Into<String>,
        operation: impl Into<String>,
        actor_id: impl Into<String>,
    ) -> Self {
        Self {
            event_type: event_type.into(),
            component: component.into(),
            operation: operation.into(),
            actor_id: actor_id.into(),
            subject_id: None,
            details: None,
        }
    }

    pub fn with_subject(mut self, subject_id: impl Into<String>) -> Self {
        self.subject_id = Some(subject_id.into());
        self
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Parse and check the request.
    ///
    /// Length and character limits on identifiers are enforced later by the
    /// chain engine against its configured limits.
    pub fn into_candidate(self) -> CustosResult<EventCandidate> {
        let event_type: EventType = self.event_type.parse()?;

        for (field, value) in [
            ("component", &self.component),
            ("operation", &self.operation),
            ("actor_id", &self.actor_id),
        ] {
            if value.trim().is_empty() {
                return Err(CustosError::Validation {
                    reason: format!("{field} is required"),
                });
            }
        }

        Ok(EventCandidate {
            event_type,
            component: self.component,
            operation: self.operation,
            actor_id: self.actor_id,
            subject_id: self.subject_id,
            details: self.details,
        })
    }

    // ── Typed builders ────────────────────────────────────────────────────────

    fn typed(
        event_type: EventType,
        component: &str,
        operation: &str,
        actor_id: &str,
        details: Value,
    ) -> Self {
        Self::new(event_type.as_str(), component, operation, actor_id)
            .with_details(sanitize_details(details))
    }

    /// A read of a patient's protected health information.
    pub fn phi_access(
        component: &str,
        actor_id: &str,
        patient_id: &str,
        data_type: &str,
        purpose: &str,
    ) -> Self {
        Self::typed(
            EventType::PhiAccess,
            component,
            "phi_access",
            actor_id,
            json!({
                "data_type": data_type,
                "purpose": purpose,
                "hipaa_category": "access_control",
            }),
        )
        .with_subject(patient_id)
    }

    /// Protected health information leaving the system for a recipient.
    pub fn phi_disclosure(
        component: &str,
        actor_id: &str,
        patient_id: &str,
        recipient: &str,
        data_types: &[&str],
        purpose: &str,
    ) -> Self {
        Self::typed(
            EventType::PhiAccess,
            component,
            "phi_disclosure",
            actor_id,
            json!({
                "recipient": recipient,
                "data_types": data_types,
                "purpose": purpose,
                "hipaa_category": "disclosure",
            }),
        )
        .with_subject(patient_id)
    }

    pub fn model_inference(component: &str, actor_id: &str, inference: &ModelInference) -> Self {
        Self::typed(
            EventType::ModelPrediction,
            component,
            "model_inference",
            actor_id,
            json!({
                "model_id": inference.model_id,
                "model_version": inference.model_version,
                "input_hash": inference.input_hash,
                "output_summary": inference.output_summary,
                "latency_ms": inference.latency_ms,
                "cost_usd": inference.cost_usd,
            }),
        )
    }

    pub fn llm_call(component: &str, actor_id: &str, call: &LlmCall) -> Self {
        Self::typed(
            EventType::ModelPrediction,
            component,
            "llm_call",
            actor_id,
            json!({
                "model": call.model,
                "prompt_tokens": call.prompt_tokens,
                "completion_tokens": call.completion_tokens,
                "total_tokens": call.prompt_tokens.saturating_add(call.completion_tokens),
                "latency_ms": call.latency_ms,
                "cost_usd": call.cost_usd,
                "purpose": call.purpose,
            }),
        )
    }

    pub fn authentication(component: &str, actor_id: &str, method: &str, success: bool) -> Self {
        Self::typed(
            EventType::Authentication,
            component,
            if success { "login" } else { "login_failed" },
            actor_id,
            json!({ "method": method, "success": success }),
        )
    }

    pub fn config_change(
        component: &str,
        actor_id: &str,
        setting: &str,
        old_value: Value,
        new_value: Value,
    ) -> Self {
        Self::typed(
            EventType::ConfigChange,
            component,
            "config_change",
            actor_id,
            json!({ "setting": setting, "old_value": old_value, "new_value": new_value }),
        )
    }

    /// Break-glass access that bypassed the normal authorization path.
    pub fn emergency_access(
        component: &str,
        actor_id: &str,
        patient_id: &str,
        justification: &str,
    ) -> Self {
        Self::typed(
            EventType::EmergencyAccess,
            component,
            "break_glass",
            actor_id,
            json!({ "justification": justification }),
        )
        .with_subject(patient_id)
    }

    pub fn governance_action(component: &str, actor_id: &str, action: &str, details: Value) -> Self {
        Self::typed(EventType::GovernanceAction, component, action, actor_id, details)
    }
}
