//! The two phase hooks: resolve the correlation id, capture a snapshot, hand it
//! to the dispatcher.
//!
//! The hooks are synchronous and return as soon as the publish task is
//! spawned. They share nothing across phases: the response phase re-reads the
//! correlation header instead of reusing anything from the request phase.

use chrono::Utc;

use super::correlation::{self, Resolution};
use super::host::{observe, RequestPhase, ResponsePhase};
use super::publisher::{Dispatcher, MessageSink};
use super::settings::EffectiveSettings;
use super::snapshot::{Capture, Phase, RequestFields, ResponseFields, Snapshot};
use crate::config::LoggerConfig;

/// Capture-correlate-publish pipeline shared by all transactions.
pub struct Pipeline<S> {
    config: LoggerConfig,
    dispatcher: Dispatcher<S>,
}

impl<S> Clone for Pipeline<S> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            dispatcher: self.dispatcher.clone(),
        }
    }
}

impl<S: MessageSink> Pipeline<S> {
    pub fn new(config: LoggerConfig, dispatcher: Dispatcher<S>) -> Self {
        Self { config, dispatcher }
    }

    pub fn dispatcher(&self) -> &Dispatcher<S> {
        &self.dispatcher
    }

    /// Request hook: after the request is received, before it is forwarded.
    ///
    /// A minted correlation id is written onto the upstream-bound request so
    /// the response phase and the upstream service see it. Returns `None` when
    /// telemetry is disabled for this transaction.
    pub fn on_request<H: RequestPhase + ?Sized>(&self, host: &mut H) -> Option<Resolution> {
        let date = Utc::now();
        let span = logger_tracing::phase_span!(Phase::Request);
        let _guard = span.enter();

        let path = observe("path", host.path());
        let settings = self.effective_settings(Phase::Request, path.as_deref())?;
        span.record("topic", settings.topic.as_str());

        let inbound = match host.header(&settings.header_name) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(error = %e, header = %settings.header_name, "Failed to read correlation header");
                None
            }
        };
        let resolution = correlation::resolve(inbound.as_deref(), correlation::generate_id);
        span.record("correlation_id", resolution.id.as_str());
        span.record("minted", resolution.minted);

        if resolution.minted {
            tracing::debug!(header = %settings.header_name, "Correlation header missing, minted a new id");
            if let Err(e) = host.set_upstream_header(&settings.header_name, &resolution.id) {
                tracing::warn!(error = %e, header = %settings.header_name, "Failed to set correlation header upstream");
            }
        }

        let capture = Capture::Request(RequestFields::capture(&*host, path));
        self.dispatch(&resolution, capture, date, settings);

        Some(resolution)
    }

    /// Response hook: after the upstream response is received, before it is
    /// returned to the client.
    ///
    /// The correlation id is read again from the forwarded request header and
    /// echoed on the client response. If the header was lost in transit the id
    /// minted here will not match the request snapshot.
    pub fn on_response<H: ResponsePhase + ?Sized>(&self, host: &mut H) -> Option<Resolution> {
        let date = Utc::now();
        let span = logger_tracing::phase_span!(Phase::Response);
        let _guard = span.enter();

        let path = observe("path", host.path());
        let settings = self.effective_settings(Phase::Response, path.as_deref())?;
        span.record("topic", settings.topic.as_str());

        let inbound = match host.header(&settings.header_name) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(error = %e, header = %settings.header_name, "Failed to read correlation header");
                None
            }
        };
        let resolution = correlation::resolve(inbound.as_deref(), correlation::generate_id);
        span.record("correlation_id", resolution.id.as_str());
        span.record("minted", resolution.minted);

        if resolution.minted {
            tracing::warn!(
                header = %settings.header_name,
                "Correlation header missing at response phase, snapshot will not match its request"
            );
        }
        if let Err(e) = host.set_response_header(&settings.header_name, &resolution.id) {
            tracing::warn!(error = %e, header = %settings.header_name, "Failed to set correlation header on response");
        }

        let capture = Capture::Response(ResponseFields::capture(&*host, path));
        self.dispatch(&resolution, capture, date, settings);

        Some(resolution)
    }

    fn effective_settings(&self, phase: Phase, path: Option<&str>) -> Option<EffectiveSettings> {
        match EffectiveSettings::resolve(&self.config.for_path(path)) {
            Ok(settings) => {
                tracing::debug!(
                    topic = %settings.topic,
                    header_name = %settings.header_name,
                    brokers = ?settings.brokers,
                    "Effective logger settings"
                );
                Some(settings)
            }
            Err(e) => {
                tracing::error!(phase = %phase, error = %e, "Skipping telemetry for this transaction");
                self.dispatcher.stats().inc_skipped();
                None
            }
        }
    }

    fn dispatch(
        &self,
        resolution: &Resolution,
        capture: Capture,
        date: chrono::DateTime<Utc>,
        settings: EffectiveSettings,
    ) {
        let snapshot = Snapshot {
            correlation_id: resolution.id.clone(),
            capture,
            date,
        };
        self.dispatcher.dispatch(snapshot, settings.topic, settings.brokers);
    }
}
