//! Court process onboarding, webhook reconciliation and daily monitoring
//! for cases identified by a CNJ number.

pub mod cnj;
pub mod config;
pub mod credits;
pub mod db;
pub mod error;
pub mod lifecycle;
pub mod monitor;
pub mod onboarding;
pub mod provider;
pub mod retry;
pub mod settings;
pub mod web;
pub mod webhook;
