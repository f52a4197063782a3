//! Provider callback payloads.
//!
//! The envelope carries an `event` discriminator. Each known event has its
//! own body struct and decoder; all of them normalize to a CNJ plus an
//! optional completion outcome.

use serde::Deserialize;
use serde_json::Value;

use crate::cnj::Cnj;
use crate::error::WebhookError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookEvent {
    ProcessUpdateCompleted,
    NewMovement,
    ProcessFound,
    ProcessNotFound,
}

impl WebhookEvent {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "process_update_completed" | "atualizacao_processo_concluida" => {
                Some(Self::ProcessUpdateCompleted)
            }
            "new_movement" | "nova_movimentacao" => Some(Self::NewMovement),
            "process_found" | "processo_encontrado" => Some(Self::ProcessFound),
            "process_not_found" | "processo_nao_encontrado" => Some(Self::ProcessNotFound),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::ProcessUpdateCompleted => "process_update_completed",
            Self::NewMovement => "new_movement",
            Self::ProcessFound => "process_found",
            Self::ProcessNotFound => "process_not_found",
        }
    }
}

/// Terminal outcome announced by the provider.
#[derive(Debug, Clone, PartialEq)]
pub enum CompletionStatus {
    /// Data is ready; the process body is included when the provider sent it.
    Succeeded { process: Option<Value> },
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct DecodedWebhook {
    pub event: WebhookEvent,
    pub cnj: Cnj,
    /// `None` for notices that do not resolve onboarding (new movements).
    pub completion: Option<CompletionStatus>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    Known(DecodedWebhook),
    /// Well-formed envelope with an event this service does not handle.
    Unknown(String),
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(alias = "evento", alias = "type")]
    event: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UpdateCompletedBody {
    #[serde(alias = "numero_cnj", alias = "numero")]
    cnj: String,
    status: String,
    #[serde(default, alias = "erro", alias = "motivo", alias = "reason")]
    error: Option<String>,
    #[serde(default, alias = "processo", alias = "process")]
    resultado: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct NewMovementBody {
    #[serde(alias = "numero_cnj", alias = "numero")]
    cnj: String,
}

#[derive(Debug, Deserialize)]
struct ProcessFoundBody {
    #[serde(alias = "numero_cnj", alias = "numero")]
    cnj: String,
    #[serde(default, alias = "processo", alias = "process")]
    resultado: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct ProcessNotFoundBody {
    #[serde(alias = "numero_cnj", alias = "numero")]
    cnj: String,
    #[serde(default, alias = "motivo", alias = "reason")]
    message: Option<String>,
}

/// Decode a raw callback body.
pub fn decode(raw: &[u8]) -> Result<Decoded, WebhookError> {
    let value: Value = serde_json::from_slice(raw)
        .map_err(|e| WebhookError::MalformedPayload(format!("invalid JSON: {e}")))?;
    if !value.is_object() {
        return Err(WebhookError::MalformedPayload(
            "payload must be a JSON object".to_string(),
        ));
    }

    let envelope: Envelope = serde_json::from_value(value.clone())
        .map_err(|e| WebhookError::MalformedPayload(format!("invalid envelope: {e}")))?;
    let Some(name) = envelope.event.filter(|name| !name.trim().is_empty()) else {
        return Err(WebhookError::MalformedPayload(
            "missing event discriminator".to_string(),
        ));
    };
    let Some(event) = WebhookEvent::from_name(&name) else {
        return Ok(Decoded::Unknown(name));
    };

    let decoded = match event {
        WebhookEvent::ProcessUpdateCompleted => decode_update_completed(value)?,
        WebhookEvent::NewMovement => decode_new_movement(value)?,
        WebhookEvent::ProcessFound => decode_process_found(value)?,
        WebhookEvent::ProcessNotFound => decode_process_not_found(value)?,
    };
    Ok(Decoded::Known(decoded))
}

fn body<T: serde::de::DeserializeOwned>(
    event: WebhookEvent,
    value: Value,
) -> Result<T, WebhookError> {
    serde_json::from_value(value).map_err(|e| {
        WebhookError::MalformedPayload(format!("invalid {} body: {}", event.as_str(), e))
    })
}

fn parse_cnj(raw: &str) -> Result<Cnj, WebhookError> {
    Cnj::parse(raw).map_err(|reason| WebhookError::MalformedPayload(format!("invalid CNJ: {reason}")))
}

fn decode_update_completed(value: Value) -> Result<DecodedWebhook, WebhookError> {
    let event = WebhookEvent::ProcessUpdateCompleted;
    let body: UpdateCompletedBody = body(event, value)?;
    let cnj = parse_cnj(&body.cnj)?;

    let completion = match body.status.trim().to_ascii_lowercase().as_str() {
        "sucesso" | "success" | "concluido" | "completed" => CompletionStatus::Succeeded {
            process: body.resultado,
        },
        "nao_encontrado" | "not_found" => CompletionStatus::Failed {
            reason: body
                .error
                .unwrap_or_else(|| format!("process {cnj} not found at provider")),
        },
        "erro" | "error" | "failed" | "falha" => CompletionStatus::Failed {
            reason: body
                .error
                .unwrap_or_else(|| "provider reported an update failure".to_string()),
        },
        other => {
            return Err(WebhookError::MalformedPayload(format!(
                "unknown update status '{other}'"
            )));
        }
    };

    Ok(DecodedWebhook {
        event,
        cnj,
        completion: Some(completion),
    })
}

fn decode_new_movement(value: Value) -> Result<DecodedWebhook, WebhookError> {
    let event = WebhookEvent::NewMovement;
    let body: NewMovementBody = body(event, value)?;
    Ok(DecodedWebhook {
        event,
        cnj: parse_cnj(&body.cnj)?,
        completion: None,
    })
}

fn decode_process_found(value: Value) -> Result<DecodedWebhook, WebhookError> {
    let event = WebhookEvent::ProcessFound;
    let body: ProcessFoundBody = body(event, value)?;
    Ok(DecodedWebhook {
        event,
        cnj: parse_cnj(&body.cnj)?,
        completion: Some(CompletionStatus::Succeeded {
            process: body.resultado,
        }),
    })
}

fn decode_process_not_found(value: Value) -> Result<DecodedWebhook, WebhookError> {
    let event = WebhookEvent::ProcessNotFound;
    let body: ProcessNotFoundBody = body(event, value)?;
    let cnj = parse_cnj(&body.cnj)?;
    let reason = body
        .message
        .unwrap_or_else(|| format!("process {cnj} not found at provider"));
    Ok(DecodedWebhook {
        event,
        cnj,
        completion: Some(CompletionStatus::Failed { reason }),
    })
}
