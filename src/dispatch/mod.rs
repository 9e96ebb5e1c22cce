//! Protocol dispatcher
//!
//! Routes decoded frames for one charge point: inbound Calls through the
//! action table, inbound responses to their pending server-initiated calls.
//! Every decoded message, inbound or outbound, handled or rejected, is
//! appended to the message log exactly once.

pub mod actions;
pub mod pending;

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::domain::{ChargerEvent, ChargerStateStore};
use crate::protocol::OcppFrame;
use crate::session::SharedSessionRegistry;
use crate::telemetry::{Direction, LogEntry, TelemetrySink};

pub use actions::{Action, ActionError};
pub use pending::{CallOutcome, PendingCallTable, SendError};

/// Protocol constants the dispatcher answers with.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Heartbeat interval advertised in BootNotification responses, seconds.
    pub heartbeat_interval: u32,
    /// How long a server-initiated call waits for its response.
    pub call_timeout: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: 300,
            call_timeout: Duration::from_secs(30),
        }
    }
}

pub struct Dispatcher {
    registry: SharedSessionRegistry,
    chargers: Arc<ChargerStateStore>,
    sink: Arc<dyn TelemetrySink>,
    pending: PendingCallTable,
    config: DispatchConfig,
}

impl Dispatcher {
    pub fn new(
        registry: SharedSessionRegistry,
        chargers: Arc<ChargerStateStore>,
        sink: Arc<dyn TelemetrySink>,
        config: DispatchConfig,
    ) -> Self {
        Self {
            registry,
            chargers,
            sink,
            pending: PendingCallTable::new(),
            config,
        }
    }

    pub fn chargers(&self) -> &ChargerStateStore {
        &self.chargers
    }

    pub fn heartbeat_interval(&self) -> u32 {
        self.config.heartbeat_interval
    }

    // ── Connection lifecycle ───────────────────────────────

    /// Called by the transport once a connection is registered.
    pub async fn connection_opened(&self, identity: &str) {
        metrics::counter!("ocpp_connections_opened_total").increment(1);
        self.apply_charger_event(identity, ChargerEvent::ConnectionOpened)
            .await;
    }

    /// Called by the transport after the live connection is unregistered.
    /// Cancels the identity's pending calls, then downgrades the charger.
    pub async fn connection_closed(&self, identity: &str) {
        let cancelled = self.pending.cancel_connection(identity);
        if cancelled > 0 {
            warn!(identity, cancelled, "cancelled pending calls on disconnect");
        }
        metrics::counter!("ocpp_connections_closed_total").increment(1);
        self.apply_charger_event(identity, ChargerEvent::ConnectionClosed)
            .await;
    }

    // ── Inbound path ───────────────────────────────────────

    /// Process one raw text frame from `identity`, in arrival order.
    pub async fn handle_inbound(&self, identity: &str, text: &str) {
        let frame = match OcppFrame::decode(text) {
            Ok(frame) => frame,
            Err(e) => {
                // Connection-local: drop the frame, keep the connection.
                warn!(identity, error = %e, "malformed frame dropped");
                metrics::counter!("ocpp_frames_malformed_total").increment(1);
                return;
            }
        };

        // The log write precedes handling and survives any handling outcome.
        self.log_message(identity, Direction::Inbound, &frame, text)
            .await;

        match frame {
            OcppFrame::Call {
                message_id,
                action,
                payload,
            } => {
                let response = self.handle_call(identity, &message_id, &action, payload).await;
                self.send_frame(identity, &response).await;
            }
            OcppFrame::CallResult {
                message_id,
                payload,
            } => {
                if self
                    .pending
                    .resolve_result(identity, &message_id, payload)
                    .is_none()
                {
                    warn!(identity, message_id = message_id.as_str(), "CallResult without a pending call");
                    metrics::counter!("ocpp_uncorrelated_responses_total").increment(1);
                }
            }
            OcppFrame::CallError {
                message_id,
                error_code,
                error_description,
                error_details,
            } => {
                if self
                    .pending
                    .resolve_error(
                        identity,
                        &message_id,
                        error_code,
                        error_description,
                        error_details,
                    )
                    .is_none()
                {
                    warn!(identity, message_id = message_id.as_str(), "CallError without a pending call");
                    metrics::counter!("ocpp_uncorrelated_responses_total").increment(1);
                }
            }
        }
    }

    async fn handle_call(
        &self,
        identity: &str,
        message_id: &str,
        action_name: &str,
        payload: Value,
    ) -> OcppFrame {
        metrics::counter!("ocpp_calls_total", "action" => action_name.to_string()).increment(1);

        let Some(action) = Action::from_name(action_name) else {
            debug!(identity, action = action_name, "unknown action");
            return OcppFrame::error_response(
                message_id,
                "NotImplemented",
                format!("Action '{action_name}' is not implemented"),
            );
        };

        match actions::dispatch_action(self, identity, action, payload).await {
            Ok(result) => OcppFrame::CallResult {
                message_id: message_id.to_string(),
                payload: result,
            },
            Err(e) => {
                warn!(identity, action = action_name, error = %e, "action handler failed");
                OcppFrame::error_response(message_id, e.error_code(), e.to_string())
            }
        }
    }

    // ── Server-initiated calls ─────────────────────────────

    /// Send a Call to `identity` and await its correlated response.
    ///
    /// Resolves `Timeout` after the configured window (the pending entry is
    /// removed; a late response is treated as uncorrelated) and
    /// `ConnectionLost` if the connection closes first.
    pub async fn send_call(
        &self,
        identity: &str,
        action: &str,
        payload: Value,
    ) -> Result<CallOutcome, SendError> {
        let message_id = Uuid::new_v4().to_string();
        let frame = OcppFrame::Call {
            message_id: message_id.clone(),
            action: action.to_string(),
            payload,
        };

        let rx = self.pending.register(identity, &message_id, action);
        let raw = frame.encode();
        self.log_message(identity, Direction::Outbound, &frame, &raw)
            .await;

        if self.registry.send_to(identity, raw).is_err() {
            self.pending.discard(identity, &message_id);
            return Err(SendError::NotConnected(identity.to_string()));
        }

        debug!(identity, action, message_id = message_id.as_str(), "call sent");

        match tokio::time::timeout(self.config.call_timeout, rx).await {
            Ok(Ok(outcome)) => Ok(outcome),
            // The responder vanished without an outcome; only connection
            // teardown does that.
            Ok(Err(_)) => Ok(CallOutcome::ConnectionLost),
            Err(_) => {
                self.pending.discard(identity, &message_id);
                warn!(identity, action, message_id = message_id.as_str(), "call timed out");
                metrics::counter!("ocpp_call_timeouts_total").increment(1);
                Ok(CallOutcome::Timeout)
            }
        }
    }

    #[cfg(test)]
    fn pending_count(&self) -> usize {
        self.pending.pending_count()
    }

    // ── Shared plumbing ────────────────────────────────────

    /// Update charger state and persist the snapshot, in that order.
    pub(crate) async fn apply_charger_event(&self, identity: &str, event: ChargerEvent) {
        let snapshot = self.chargers.apply(identity, &event);
        if let Err(e) = self.sink.upsert_charger(snapshot).await {
            warn!(identity, error = %e, "charger state not persisted");
        }
    }

    /// Append one message to the durable log. Failure is operational, never
    /// protocol-visible.
    async fn log_message(
        &self,
        identity: &str,
        direction: Direction,
        frame: &OcppFrame,
        raw: &str,
    ) {
        let entry = LogEntry::new(identity, direction, frame.message_type(), raw);
        if let Err(e) = self.sink.append_log(entry).await {
            warn!(identity, error = %e, "message log append failed");
        }
    }

    async fn send_frame(&self, identity: &str, frame: &OcppFrame) {
        let raw = frame.encode();
        self.log_message(identity, Direction::Outbound, frame, &raw)
            .await;
        if let Err(e) = self.registry.send_to(identity, raw) {
            warn!(identity, error = %e, "response not delivered");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use serde_json::json;
    use tokio::sync::{mpsc, Notify};

    use crate::domain::ChargerStatus;
    use crate::session::{SessionPolicy, SessionRegistry};
    use crate::telemetry::MemorySink;

    struct Harness {
        dispatcher: Arc<Dispatcher>,
        sink: Arc<MemorySink>,
        registry: SharedSessionRegistry,
        outbound: mpsc::UnboundedReceiver<String>,
        epoch: u64,
    }

    /// Registry-attached harness for "CP-1" with captured outbound frames.
    async fn connect(config: DispatchConfig) -> Harness {
        let registry = SessionRegistry::shared(SessionPolicy::EvictOld);
        let sink = Arc::new(MemorySink::new());
        let dispatcher = Arc::new(Dispatcher::new(
            registry.clone(),
            Arc::new(ChargerStateStore::new()),
            sink.clone(),
            config,
        ));

        let (tx, outbound) = mpsc::unbounded_channel();
        let registration = registry
            .register("CP-1", tx, Arc::new(Notify::new()))
            .unwrap();
        dispatcher.connection_opened("CP-1").await;

        Harness {
            dispatcher,
            sink,
            registry,
            outbound,
            epoch: registration.epoch,
        }
    }

    fn decoded(harness: &mut Harness) -> OcppFrame {
        OcppFrame::decode(&harness.outbound.try_recv().expect("no outbound frame")).unwrap()
    }

    #[tokio::test]
    async fn boot_notification_always_accepted_with_time_and_interval() {
        let mut h = connect(DispatchConfig::default()).await;

        let call = r#"[2,"b1","BootNotification",{"chargePointVendor":"Acme","chargePointModel":"FastCharge 22","firmwareVersion":"1.4.2"}]"#;
        h.dispatcher.handle_inbound("CP-1", call).await;

        match decoded(&mut h) {
            OcppFrame::CallResult {
                message_id,
                payload,
            } => {
                assert_eq!(message_id, "b1");
                assert_eq!(payload["status"], "Accepted");
                assert_eq!(payload["interval"], 300);
                assert!(payload["currentTime"].is_string());
            }
            other => panic!("expected CallResult, got {other:?}"),
        }

        let record = h.dispatcher.chargers().get("CP-1").unwrap();
        assert_eq!(record.vendor.as_deref(), Some("Acme"));
        assert_eq!(record.firmware.as_deref(), Some("1.4.2"));
        assert!(record.last_heartbeat.is_some());
    }

    #[tokio::test]
    async fn heartbeat_returns_current_time_only() {
        let mut h = connect(DispatchConfig::default()).await;

        h.dispatcher
            .handle_inbound("CP-1", r#"[2,"h1","Heartbeat",{}]"#)
            .await;

        match decoded(&mut h) {
            OcppFrame::CallResult { payload, .. } => {
                let object = payload.as_object().unwrap();
                assert_eq!(object.len(), 1);
                assert!(object["currentTime"].is_string());
            }
            other => panic!("expected CallResult, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unknown_action_answers_not_implemented_and_connection_survives() {
        let mut h = connect(DispatchConfig::default()).await;

        h.dispatcher
            .handle_inbound("CP-1", r#"[2,"x1","Authorize",{"idTag":"ABC"}]"#)
            .await;

        match decoded(&mut h) {
            OcppFrame::CallError {
                message_id,
                error_code,
                ..
            } => {
                assert_eq!(message_id, "x1");
                assert_eq!(error_code, "NotImplemented");
            }
            other => panic!("expected CallError, got {other:?}"),
        }
        assert!(h.registry.is_connected("CP-1"));

        // Rejected or not, both directions hit the log exactly once.
        let logs = h.sink.logs();
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0].direction, Direction::Inbound);
        assert_eq!(logs[0].message_type, "Authorize");
        assert_eq!(logs[1].direction, Direction::Outbound);
        assert_eq!(logs[1].message_type, "CallError");
    }

    #[tokio::test]
    async fn malformed_payload_answers_formation_violation() {
        let mut h = connect(DispatchConfig::default()).await;

        // BootNotification without its required fields
        h.dispatcher
            .handle_inbound("CP-1", r#"[2,"b2","BootNotification",{"oops":true}]"#)
            .await;

        match decoded(&mut h) {
            OcppFrame::CallError { error_code, .. } => {
                assert_eq!(error_code, "FormationViolation");
            }
            other => panic!("expected CallError, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn malformed_frame_is_dropped_without_log_or_response() {
        let mut h = connect(DispatchConfig::default()).await;

        h.dispatcher.handle_inbound("CP-1", "not json").await;
        h.dispatcher.handle_inbound("CP-1", r#"[9,"id",{}]"#).await;

        assert!(h.outbound.try_recv().is_err());
        assert!(h.sink.logs().is_empty());
        assert!(h.registry.is_connected("CP-1"));
    }

    #[tokio::test]
    async fn uncorrelated_response_is_an_anomaly_not_a_failure() {
        let mut h = connect(DispatchConfig::default()).await;

        h.dispatcher
            .handle_inbound("CP-1", r#"[3,"ghost",{"status":"Accepted"}]"#)
            .await;

        // Logged once, answered never, connection intact.
        assert_eq!(h.sink.logs().len(), 1);
        assert!(h.outbound.try_recv().is_err());
        assert!(h.registry.is_connected("CP-1"));
    }

    #[tokio::test]
    async fn send_call_resolves_with_correlated_result() {
        let mut h = connect(DispatchConfig::default()).await;

        let dispatcher = h.dispatcher.clone();
        let call_task = tokio::spawn(async move {
            dispatcher
                .send_call("CP-1", "Reset", json!({"type": "Soft"}))
                .await
        });

        // Read the outbound Call off the wire and answer it.
        let sent = h.outbound.recv().await.unwrap();
        let message_id = match OcppFrame::decode(&sent).unwrap() {
            OcppFrame::Call {
                message_id, action, ..
            } => {
                assert_eq!(action, "Reset");
                message_id
            }
            other => panic!("expected Call, got {other:?}"),
        };

        h.dispatcher
            .handle_inbound("CP-1", &format!(r#"[3,"{message_id}",{{"status":"Accepted"}}]"#))
            .await;

        match call_task.await.unwrap().unwrap() {
            CallOutcome::Result(payload) => assert_eq!(payload["status"], "Accepted"),
            other => panic!("expected Result, got {other:?}"),
        }
        assert_eq!(h.dispatcher.pending_count(), 0);
    }

    #[tokio::test]
    async fn send_call_times_out_and_ignores_late_response() {
        let mut h = connect(DispatchConfig {
            call_timeout: Duration::from_millis(20),
            ..DispatchConfig::default()
        })
        .await;

        let outcome = h
            .dispatcher
            .send_call("CP-1", "Reset", json!({"type": "Soft"}))
            .await
            .unwrap();
        assert!(matches!(outcome, CallOutcome::Timeout));
        assert_eq!(h.dispatcher.pending_count(), 0);

        // The late response must not be misapplied to anything.
        let sent = h.outbound.try_recv().unwrap();
        let message_id = OcppFrame::decode(&sent).unwrap().message_id().to_string();
        h.dispatcher
            .handle_inbound("CP-1", &format!(r#"[3,"{message_id}",{{}}]"#))
            .await;
        assert_eq!(h.dispatcher.pending_count(), 0);
    }

    #[tokio::test]
    async fn send_call_to_disconnected_identity_fails_fast() {
        let h = connect(DispatchConfig::default()).await;
        let result = h.dispatcher.send_call("CP-9", "Reset", json!({})).await;
        assert!(matches!(result, Err(SendError::NotConnected(_))));
        assert_eq!(h.dispatcher.pending_count(), 0);
    }

    #[tokio::test]
    async fn connection_close_cancels_pending_calls() {
        let h = connect(DispatchConfig::default()).await;

        let dispatcher = h.dispatcher.clone();
        let call_task =
            tokio::spawn(async move { dispatcher.send_call("CP-1", "Reset", json!({})).await });

        // The Call hits the wire before the sender starts waiting; once we
        // see it, the pending entry exists.
        let mut outbound = h.outbound;
        outbound.recv().await.unwrap();
        assert_eq!(h.dispatcher.pending_count(), 1);

        h.registry.unregister("CP-1", h.epoch);
        h.dispatcher.connection_closed("CP-1").await;

        match call_task.await.unwrap().unwrap() {
            CallOutcome::ConnectionLost => {}
            other => panic!("expected ConnectionLost, got {other:?}"),
        }
        assert_eq!(h.dispatcher.pending_count(), 0);
    }

    /// The end-to-end flow: connect → boot → charging → transport drop.
    #[tokio::test]
    async fn charge_point_lifecycle_scenario() {
        let mut h = connect(DispatchConfig::default()).await;
        assert_eq!(
            h.dispatcher.chargers().status("CP-1"),
            ChargerStatus::Available
        );

        h.dispatcher
            .handle_inbound(
                "CP-1",
                r#"[2,"1","BootNotification",{"chargePointVendor":"Acme","chargePointModel":"FastCharge 22"}]"#,
            )
            .await;
        match decoded(&mut h) {
            OcppFrame::CallResult { payload, .. } => {
                assert_eq!(payload["status"], "Accepted");
                assert_eq!(payload["interval"], 300);
            }
            other => panic!("expected CallResult, got {other:?}"),
        }

        h.dispatcher
            .handle_inbound(
                "CP-1",
                r#"[2,"2","StatusNotification",{"connectorId":1,"errorCode":"NoError","status":"Charging"}]"#,
            )
            .await;
        assert!(matches!(decoded(&mut h), OcppFrame::CallResult { .. }));
        assert_eq!(
            h.dispatcher.chargers().status("CP-1"),
            ChargerStatus::Charging
        );

        // Transport drops.
        h.registry.unregister("CP-1", h.epoch);
        h.dispatcher.connection_closed("CP-1").await;
        assert_eq!(
            h.dispatcher.chargers().status("CP-1"),
            ChargerStatus::Unavailable
        );

        // Four log entries, in exchange order.
        let logs = h.sink.logs();
        let summary: Vec<(Direction, &str)> = logs
            .iter()
            .map(|l| (l.direction, l.message_type.as_str()))
            .collect();
        assert_eq!(
            summary,
            vec![
                (Direction::Inbound, "BootNotification"),
                (Direction::Outbound, "CallResult"),
                (Direction::Inbound, "StatusNotification"),
                (Direction::Outbound, "CallResult"),
            ]
        );

        // The persisted state trail ends Unavailable.
        let last = h.sink.last_charger_state("CP-1").unwrap();
        assert_eq!(last.status, ChargerStatus::Unavailable);
    }
}
