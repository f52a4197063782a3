//! External legal-records provider.
//!
//! `ProviderGateway` is the only way the rest of the crate talks to the
//! provider. Implementations are stateless request/response adapters;
//! retries, polling and persistence live with the callers.

pub mod http;
pub mod types;

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::cnj::Cnj;
use crate::error::ProviderError;

pub use http::HttpGateway;
pub use types::{
    Attachment, AttachmentOptions, FetchOptions, MonitoringFrequency, Movement, MovementPage,
    ProcessLookup, ProcessSnapshot, Summary, UpdateRequest,
};

#[async_trait]
pub trait ProviderGateway: Send + Sync {
    /// Provider name recorded in the Processo envelope.
    fn name(&self) -> &str;

    async fn fetch_process(
        &self,
        cnj: &Cnj,
        options: &FetchOptions,
    ) -> Result<ProcessLookup, ProviderError>;

    /// One page of movements. `cursor` is the value returned by the previous page.
    async fn fetch_movements(
        &self,
        cnj: &Cnj,
        cursor: Option<&str>,
    ) -> Result<MovementPage, ProviderError>;

    async fn fetch_attachments(
        &self,
        cnj: &Cnj,
        options: &AttachmentOptions,
    ) -> Result<Vec<Attachment>, ProviderError>;

    /// Register interest in a fresh collection; completion arrives by webhook.
    async fn request_update(
        &self,
        cnj: &Cnj,
        options: &FetchOptions,
    ) -> Result<UpdateRequest, ProviderError>;

    async fn request_summary(&self, cnj: &Cnj) -> Result<(), ProviderError>;

    /// `Ok(None)` when no summary has been generated yet.
    async fn fetch_summary(&self, cnj: &Cnj) -> Result<Option<Summary>, ProviderError>;

    /// Returns the provider's subscription id.
    async fn configure_monitoring(
        &self,
        cnj: &Cnj,
        frequency: MonitoringFrequency,
    ) -> Result<String, ProviderError>;

    async fn fetch_tracking_updates(
        &self,
        subscription_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<Movement>, ProviderError>;
}

/// Follow the movement cursor until the provider reports no next page.
///
/// Stops early (with a warning) after `max_pages` pages or when the provider
/// hands back a cursor it already returned.
pub async fn drain_movements(
    gateway: &dyn ProviderGateway,
    cnj: &Cnj,
    max_pages: usize,
) -> Result<Vec<Movement>, ProviderError> {
    let mut out = Vec::new();
    let mut seen_cursors = HashSet::new();
    let mut cursor: Option<String> = None;

    for page_number in 1..=max_pages.max(1) {
        let page = gateway.fetch_movements(cnj, cursor.as_deref()).await?;
        out.extend(page.items);

        match page.next_cursor {
            Some(next) if seen_cursors.insert(next.clone()) => cursor = Some(next),
            Some(next) => {
                tracing::warn!(cnj = %cnj, cursor = %next, "Provider repeated a movement cursor; stopping pagination");
                return Ok(out);
            }
            None => return Ok(out),
        }

        if page_number == max_pages {
            tracing::warn!(
                cnj = %cnj,
                max_pages,
                "Movement pagination hit the page limit; remaining pages skipped"
            );
        }
    }

    Ok(out)
}
