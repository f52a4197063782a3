//! reqwest-backed provider gateway.
//!
//! Speaks the provider's v2 REST API: process lookups by CNJ, cursor-paginated
//! movements, public documents, AI summaries and monitoring subscriptions.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use reqwest::{Client, Method, StatusCode, Url};
use secrecy::ExposeSecret as _;
use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::cnj::Cnj;
use crate::config::ProviderConfig;
use crate::error::ProviderError;

use super::types::{
    Attachment, AttachmentOptions, FetchOptions, MonitoringFrequency, Movement, MovementPage,
    ProcessLookup, ProcessSnapshot, Summary, UpdateRequest,
};
use super::ProviderGateway;

const API_PREFIX: &str = "api/v2/";

#[derive(Debug, Clone)]
pub struct HttpGateway {
    base_url: Url,
    http: Client,
    token: Option<secrecy::SecretString>,
    name: String,
}

#[derive(Debug, Deserialize)]
struct WireMovement {
    id: serde_json::Value,
    data: String,
    #[serde(default)]
    conteudo: String,
    #[serde(default)]
    tipo: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireLinks {
    #[serde(default)]
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireMovementPage {
    #[serde(default)]
    items: Vec<WireMovement>,
    #[serde(default)]
    links: Option<WireLinks>,
}

#[derive(Debug, Deserialize)]
struct WireDocument {
    id: serde_json::Value,
    #[serde(default)]
    titulo: String,
    #[serde(default)]
    links: Option<WireDocumentLinks>,
    #[serde(default)]
    movimentacao_id: Option<serde_json::Value>,
    #[serde(default)]
    quantidade_paginas: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct WireDocumentLinks {
    #[serde(default)]
    api: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireItems<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct WireSummary {
    conteudo: String,
    #[serde(default)]
    data_criacao: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireId {
    id: serde_json::Value,
}

impl HttpGateway {
    pub fn new(config: &ProviderConfig) -> Result<Self, ProviderError> {
        let mut base = config.base_url.trim().to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url = Url::parse(&base)
            .map_err(|e| ProviderError::Rejected {
                reason: format!("invalid provider base url '{}': {}", config.base_url, e),
            })?;

        let http = Client::builder()
            .timeout(config.request_timeout)
            .user_agent(concat!("jurisync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ProviderError::transient(format!("failed to build http client: {e}")))?;

        Ok(Self {
            base_url,
            http,
            token: config.api_token.clone(),
            name: config.name.clone(),
        })
    }

    fn url(&self, path: &str) -> Result<Url, ProviderError> {
        self.base_url
            .join(API_PREFIX)
            .and_then(|api| api.join(path))
            .map_err(|e| ProviderError::Rejected {
                reason: format!("invalid provider path '{path}': {e}"),
            })
    }

    fn process_path(cnj: &Cnj, suffix: &str) -> String {
        if suffix.is_empty() {
            format!("processos/numero_cnj/{}", cnj.as_str())
        } else {
            format!("processos/numero_cnj/{}/{}", cnj.as_str(), suffix)
        }
    }

    async fn send(
        &self,
        method: Method,
        url: Url,
        body: Option<serde_json::Value>,
    ) -> Result<reqwest::Response, ProviderError> {
        let mut request = self
            .http
            .request(method, url)
            .header(reqwest::header::ACCEPT, "application/json");
        if let Some(token) = &self.token {
            request = request.bearer_auth(token.expose_secret());
        }
        if let Some(body) = body {
            request = request.json(&body);
        }
        request.send().await.map_err(map_transport_error)
    }

    async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ProviderError> {
        response
            .json::<T>()
            .await
            .map_err(|e| ProviderError::Decode(e.to_string()))
    }
}

fn map_transport_error(err: reqwest::Error) -> ProviderError {
    if err.is_decode() {
        ProviderError::Decode(err.to_string())
    } else {
        ProviderError::transient(err.to_string())
    }
}

/// Classify a non-success HTTP status.
fn status_error(status: StatusCode, cnj: Option<&Cnj>) -> ProviderError {
    if status == StatusCode::NOT_FOUND
        && let Some(cnj) = cnj
    {
        return ProviderError::NotFound {
            cnj: cnj.to_string(),
        };
    }
    if status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
    {
        return ProviderError::transient(format!("provider returned {status}"));
    }
    ProviderError::Rejected {
        reason: format!("provider returned {status}"),
    }
}

fn id_to_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn parse_provider_timestamp(raw: &str) -> Result<DateTime<Utc>, ProviderError> {
    let trimmed = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(dt.with_timezone(&Utc));
    }
    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        && let Some(dt) = date.and_hms_opt(0, 0, 0)
    {
        return Ok(dt.and_utc());
    }
    Err(ProviderError::Decode(format!(
        "invalid provider timestamp '{trimmed}'"
    )))
}

fn convert_movement(wire: WireMovement) -> Result<Movement, ProviderError> {
    Ok(Movement {
        id: id_to_string(&wire.id),
        occurred_at: parse_provider_timestamp(&wire.data)?,
        content: wire.conteudo.trim().to_string(),
        kind: wire.tipo,
    })
}

/// Extract the `cursor` query parameter from the provider's `links.next` URL.
fn cursor_from_next_link(next: Option<&str>) -> Option<String> {
    let next = next?.trim();
    if next.is_empty() {
        return None;
    }
    match Url::parse(next) {
        Ok(url) => url
            .query_pairs()
            .find(|(key, _)| key == "cursor")
            .map(|(_, value)| value.into_owned()),
        // Some deployments hand back the bare cursor instead of a URL.
        Err(_) => Some(next.to_string()),
    }
}

fn convert_movement_page(wire: WireMovementPage) -> Result<MovementPage, ProviderError> {
    let next_cursor = cursor_from_next_link(wire.links.as_ref().and_then(|l| l.next.as_deref()));
    let items = wire
        .items
        .into_iter()
        .map(convert_movement)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(MovementPage { items, next_cursor })
}

#[async_trait]
impl ProviderGateway for HttpGateway {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_process(
        &self,
        cnj: &Cnj,
        options: &FetchOptions,
    ) -> Result<ProcessLookup, ProviderError> {
        let mut url = self.url(&Self::process_path(cnj, ""))?;
        {
            let mut query = url.query_pairs_mut();
            if options.force_update {
                query.append_pair("atualizar", "1");
            }
            if options.use_certificate {
                query.append_pair("utilizar_certificado", "1");
            }
        }
        if url.query() == Some("") {
            url.set_query(None);
        }

        let response = self.send(Method::GET, url, None).await?;
        match response.status() {
            StatusCode::OK => {
                let payload: serde_json::Value = Self::decode(response).await?;
                Ok(ProcessLookup::Found(ProcessSnapshot {
                    cnj: cnj.clone(),
                    payload,
                }))
            }
            StatusCode::ACCEPTED => Ok(ProcessLookup::Pending),
            status => Err(status_error(status, Some(cnj))),
        }
    }

    async fn fetch_movements(
        &self,
        cnj: &Cnj,
        cursor: Option<&str>,
    ) -> Result<MovementPage, ProviderError> {
        let mut url = self.url(&Self::process_path(cnj, "movimentacoes"))?;
        if let Some(cursor) = cursor {
            url.query_pairs_mut().append_pair("cursor", cursor);
        }
        let response = self.send(Method::GET, url, None).await?;
        if !response.status().is_success() {
            return Err(status_error(response.status(), Some(cnj)));
        }
        let wire: WireMovementPage = Self::decode(response).await?;
        convert_movement_page(wire)
    }

    async fn fetch_attachments(
        &self,
        cnj: &Cnj,
        options: &AttachmentOptions,
    ) -> Result<Vec<Attachment>, ProviderError> {
        let mut url = self.url(&Self::process_path(cnj, "documentos-publicos"))?;
        if options.use_certificate {
            url.query_pairs_mut()
                .append_pair("utilizar_certificado", "1");
        }
        if let Some(limit) = options.limit {
            url.query_pairs_mut()
                .append_pair("limit", &limit.to_string());
        }
        let response = self.send(Method::GET, url, None).await?;
        if !response.status().is_success() {
            return Err(status_error(response.status(), Some(cnj)));
        }
        let wire: WireItems<WireDocument> = Self::decode(response).await?;
        Ok(wire
            .items
            .into_iter()
            .map(|doc| Attachment {
                id: id_to_string(&doc.id),
                name: doc.titulo,
                url: doc.links.and_then(|l| l.api),
                movement_id: doc.movimentacao_id.as_ref().map(id_to_string),
                pages: doc.quantidade_paginas,
            })
            .collect())
    }

    async fn request_update(
        &self,
        cnj: &Cnj,
        options: &FetchOptions,
    ) -> Result<UpdateRequest, ProviderError> {
        let url = self.url(&Self::process_path(cnj, "solicitar-atualizacao"))?;
        let body = serde_json::json!({
            "enviar_callback": 1,
            "utilizar_certificado": u8::from(options.use_certificate),
        });
        let response = self.send(Method::POST, url, Some(body)).await?;
        if !response.status().is_success() {
            return Err(status_error(response.status(), Some(cnj)));
        }
        let wire: WireId = Self::decode(response).await?;
        Ok(UpdateRequest {
            request_id: id_to_string(&wire.id),
        })
    }

    async fn request_summary(&self, cnj: &Cnj) -> Result<(), ProviderError> {
        let url = self.url(&Self::process_path(cnj, "resumo/solicitar-atualizacao"))?;
        let response = self.send(Method::POST, url, None).await?;
        if !response.status().is_success() {
            return Err(status_error(response.status(), Some(cnj)));
        }
        Ok(())
    }

    async fn fetch_summary(&self, cnj: &Cnj) -> Result<Option<Summary>, ProviderError> {
        let url = self.url(&Self::process_path(cnj, "resumo"))?;
        let response = self.send(Method::GET, url, None).await?;
        match response.status() {
            StatusCode::NOT_FOUND | StatusCode::ACCEPTED | StatusCode::NO_CONTENT => Ok(None),
            status if status.is_success() => {
                let wire: WireSummary = Self::decode(response).await?;
                let generated_at = match wire.data_criacao.as_deref() {
                    Some(raw) => parse_provider_timestamp(raw)?,
                    None => Utc::now(),
                };
                Ok(Some(Summary {
                    content: wire.conteudo,
                    generated_at,
                }))
            }
            status => Err(status_error(status, None)),
        }
    }

    async fn configure_monitoring(
        &self,
        cnj: &Cnj,
        frequency: MonitoringFrequency,
    ) -> Result<String, ProviderError> {
        let url = self.url("monitoramentos/processos")?;
        let frequencia = match frequency {
            MonitoringFrequency::Daily => "DIARIA",
            MonitoringFrequency::Weekly => "SEMANAL",
        };
        let body = serde_json::json!({ "numero": cnj.as_str(), "frequencia": frequencia });
        let response = self.send(Method::POST, url, Some(body)).await?;
        if !response.status().is_success() {
            return Err(status_error(response.status(), Some(cnj)));
        }
        let wire: WireId = Self::decode(response).await?;
        Ok(id_to_string(&wire.id))
    }

    async fn fetch_tracking_updates(
        &self,
        subscription_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<Movement>, ProviderError> {
        let mut url = self.url(&format!(
            "monitoramentos/processos/{subscription_id}/movimentacoes"
        ))?;
        url.query_pairs_mut()
            .append_pair("desde", &since.to_rfc3339());
        let response = self.send(Method::GET, url, None).await?;
        if !response.status().is_success() {
            return Err(status_error(response.status(), None));
        }
        let wire: WireItems<WireMovement> = Self::decode(response).await?;
        wire.items.into_iter().map(convert_movement).collect()
    }
}
