// src/events/normalize.rs — Upstream event shapes → NormEvent
//
// This is the only place that knows about upstream field names. Two source
// schemas are accepted: the Home-Assistant native envelope
// ({event_type, data, time_fired}) and the flat forwarder shape
// ({type, entity_id, old, new, ts}). Anything else is Unrecognized.

use chrono::{DateTime, Datelike, FixedOffset, Offset, Timelike, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// States that carry no behavioral signal.
const IGNORED_STATES: &[&str] = &["unavailable", "unknown"];

/// Transition label used for service-call events.
pub const SERVICE_TRANSITION: &str = "called";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    StateChange,
    ServiceCall,
}

/// Dimensions derived once at ingestion so graph and miner agree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventContext {
    pub hour: u8,
    /// 0 = Monday
    pub weekday: u8,
    pub is_weekend: bool,
    pub zone: Option<String>,
    pub user_id: Option<String>,
    pub friendly_name: Option<String>,
}

/// Canonical event consumed by the brain graph and the miner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormEvent {
    pub ts_ms: i64,
    /// `entity_id:transition`
    pub key: String,
    pub entity_id: String,
    pub domain: String,
    pub transition: String,
    pub kind: EventKind,
    pub from_state: Option<String>,
    /// Entities targeted by a service call.
    #[serde(default)]
    pub targets: Vec<String>,
    pub context: EventContext,
}

impl NormEvent {
    pub fn make_key(entity_id: &str, transition: &str) -> String {
        format!("{entity_id}:{transition}")
    }
}

/// Split an event key into (entity_id, transition).
pub fn split_key(key: &str) -> (&str, &str) {
    key.rsplit_once(':').unwrap_or((key, ""))
}

/// Domain of an entity id or event key (`light.kitchen:on` → `light`).
pub fn key_domain(key: &str) -> &str {
    let (entity, _) = split_key(key);
    entity.split_once('.').map(|(d, _)| d).unwrap_or(entity)
}

/// Why a raw event was dropped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RejectReason {
    #[error("event is not a JSON object")]
    NotAnObject,
    #[error("missing field '{0}'")]
    MissingField(&'static str),
    #[error("invalid entity id '{0}'")]
    InvalidEntityId(String),
    #[error("invalid timestamp '{0}'")]
    InvalidTimestamp(String),
    #[error("state did not change")]
    UnchangedState,
    #[error("ignored state '{0}'")]
    IgnoredState(String),
    #[error("unrecognized event shape: {0}")]
    Unrecognized(String),
}

impl RejectReason {
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotAnObject => "not_an_object",
            Self::MissingField(_) => "missing_field",
            Self::InvalidEntityId(_) => "invalid_entity_id",
            Self::InvalidTimestamp(_) => "invalid_timestamp",
            Self::UnchangedState => "unchanged_state",
            Self::IgnoredState(_) => "ignored_state",
            Self::Unrecognized(_) => "unrecognized",
        }
    }
}

/// Every upstream shape we understand, after field-name reconciliation.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceEvent {
    StateChanged {
        ts_ms: Option<i64>,
        entity_id: String,
        old_state: Option<String>,
        new_state: String,
        attributes: Map<String, Value>,
        zone: Option<String>,
        user_id: Option<String>,
    },
    CallService {
        ts_ms: Option<i64>,
        domain: String,
        service: String,
        entity_ids: Vec<String>,
        user_id: Option<String>,
    },
    Heartbeat {
        ts_ms: Option<i64>,
    },
    Unrecognized {
        reason: String,
    },
}

/// Result of normalizing one accepted event.
#[derive(Debug, Clone, PartialEq)]
pub enum Normalized {
    Event(NormEvent),
    Heartbeat { ts_ms: i64 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RejectedEvent {
    pub index: usize,
    pub code: &'static str,
    pub reason: String,
}

/// Outcome of a batch: nothing is hidden, nothing halts the batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub accepted: usize,
    pub rejected: usize,
    pub heartbeats: usize,
    pub reasons: Vec<RejectedEvent>,
}

impl BatchSummary {
    pub fn reject(&mut self, index: usize, reason: &RejectReason) {
        self.rejected += 1;
        self.reasons.push(RejectedEvent {
            index,
            code: reason.code(),
            reason: reason.to_string(),
        });
    }

    /// Rejections grouped by reason code.
    pub fn counts_by_code(&self) -> std::collections::BTreeMap<&'static str, usize> {
        let mut counts = std::collections::BTreeMap::new();
        for r in &self.reasons {
            *counts.entry(r.code).or_default() += 1;
        }
        counts
    }
}

/// Converts raw upstream payloads into [`NormEvent`]s.
#[derive(Debug, Clone)]
pub struct EventNormalizer {
    offset: FixedOffset,
}

impl Default for EventNormalizer {
    fn default() -> Self {
        Self::new(0)
    }
}

impl EventNormalizer {
    /// `utc_offset_minutes` sets the local clock used for hour/weekday.
    pub fn new(utc_offset_minutes: i32) -> Self {
        let offset = FixedOffset::east_opt(utc_offset_minutes * 60)
            .unwrap_or_else(|| Utc.fix());
        Self { offset }
    }

    /// Recognize the source schema and reconcile field names.
    pub fn classify(&self, raw: &Value) -> Result<SourceEvent, RejectReason> {
        let obj = raw.as_object().ok_or(RejectReason::NotAnObject)?;

        if let Some(event_type) = obj.get("event_type").and_then(Value::as_str) {
            return classify_native(event_type, obj);
        }
        if let Some(event_type) = obj.get("type").and_then(Value::as_str) {
            return classify_flat(event_type, obj);
        }
        Ok(SourceEvent::Unrecognized {
            reason: "no 'event_type' or 'type' field".into(),
        })
    }

    /// Normalize one raw event. `received_at_ms` stands in for a missing timestamp.
    pub fn normalize(&self, raw: &Value, received_at_ms: i64) -> Result<Normalized, RejectReason> {
        match self.classify(raw)? {
            SourceEvent::StateChanged {
                ts_ms,
                entity_id,
                old_state,
                new_state,
                attributes,
                zone,
                user_id,
            } => {
                let domain = entity_domain(&entity_id)?;
                if IGNORED_STATES.contains(&new_state.as_str()) {
                    return Err(RejectReason::IgnoredState(new_state));
                }
                if old_state.as_deref() == Some(new_state.as_str()) {
                    return Err(RejectReason::UnchangedState);
                }
                let ts_ms = ts_ms.unwrap_or(received_at_ms);
                let mut context = self.context_for(ts_ms);
                context.zone = zone;
                context.user_id = user_id;
                context.friendly_name = attributes
                    .get("friendly_name")
                    .and_then(Value::as_str)
                    .map(str::to_string);

                Ok(Normalized::Event(NormEvent {
                    ts_ms,
                    key: NormEvent::make_key(&entity_id, &new_state),
                    domain,
                    entity_id,
                    transition: new_state,
                    kind: EventKind::StateChange,
                    from_state: old_state,
                    targets: Vec::new(),
                    context,
                }))
            }
            SourceEvent::CallService {
                ts_ms,
                domain,
                service,
                entity_ids,
                user_id,
            } => {
                let ts_ms = ts_ms.unwrap_or(received_at_ms);
                let mut context = self.context_for(ts_ms);
                context.user_id = user_id;
                let entity_id = format!("{domain}.{service}");

                Ok(Normalized::Event(NormEvent {
                    ts_ms,
                    key: NormEvent::make_key(&entity_id, SERVICE_TRANSITION),
                    entity_id,
                    domain,
                    transition: SERVICE_TRANSITION.to_string(),
                    kind: EventKind::ServiceCall,
                    from_state: None,
                    targets: entity_ids,
                    context,
                }))
            }
            SourceEvent::Heartbeat { ts_ms } => Ok(Normalized::Heartbeat {
                ts_ms: ts_ms.unwrap_or(received_at_ms),
            }),
            SourceEvent::Unrecognized { reason } => Err(RejectReason::Unrecognized(reason)),
        }
    }

    /// Normalize a batch. One bad event never stops the rest.
    pub fn normalize_batch(&self, raws: &[Value], received_at_ms: i64) -> (Vec<NormEvent>, BatchSummary) {
        let mut events = Vec::with_capacity(raws.len());
        let mut summary = BatchSummary::default();

        for (index, raw) in raws.iter().enumerate() {
            match self.normalize(raw, received_at_ms) {
                Ok(Normalized::Event(event)) => {
                    summary.accepted += 1;
                    events.push(event);
                }
                Ok(Normalized::Heartbeat { .. }) => {
                    summary.accepted += 1;
                    summary.heartbeats += 1;
                }
                Err(reason) => {
                    tracing::debug!("Dropping event #{}: {}", index, reason);
                    summary.reject(index, &reason);
                }
            }
        }
        (events, summary)
    }

    /// Hour/weekday of `ts_ms` on the configured local clock.
    pub fn context_for(&self, ts_ms: i64) -> EventContext {
        let local = DateTime::from_timestamp_millis(ts_ms)
            .unwrap_or_default()
            .with_timezone(&self.offset);
        let weekday = local.weekday().num_days_from_monday() as u8;
        EventContext {
            hour: local.hour() as u8,
            weekday,
            is_weekend: weekday >= 5,
            zone: None,
            user_id: None,
            friendly_name: None,
        }
    }
}

// -- Schema-specific field reconciliation --

fn classify_native(event_type: &str, obj: &Map<String, Value>) -> Result<SourceEvent, RejectReason> {
    let data = || {
        obj.get("data")
            .and_then(Value::as_object)
            .ok_or(RejectReason::MissingField("data"))
    };

    match event_type {
        "state_changed" => {
            let data = data()?;
            let entity_id = str_field(data, "entity_id")?;
            let new_state = data
                .get("new_state")
                .and_then(Value::as_object)
                .ok_or(RejectReason::MissingField("new_state"))?;
            let state = new_state
                .get("state")
                .and_then(Value::as_str)
                .ok_or(RejectReason::MissingField("new_state.state"))?;
            let old_state = data
                .get("old_state")
                .and_then(|o| o.get("state"))
                .and_then(Value::as_str)
                .map(str::to_string);
            let attributes = new_state
                .get("attributes")
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default();

            let ts_ms = match obj.get("time_fired") {
                Some(v) => parse_ts(v)?,
                None => new_state.get("last_changed").map(parse_ts).transpose()?.flatten(),
            };
            let zone = opt_str(&attributes, "area_id").or_else(|| opt_str(data, "area_id"));

            Ok(SourceEvent::StateChanged {
                ts_ms,
                entity_id,
                old_state,
                new_state: state.to_string(),
                attributes,
                zone,
                user_id: context_user(obj),
            })
        }
        "call_service" => {
            let data = data()?;
            let targets = data
                .get("service_data")
                .and_then(|sd| sd.get("entity_id"))
                .or_else(|| data.get("target").and_then(|t| t.get("entity_id")));
            Ok(SourceEvent::CallService {
                ts_ms: obj.get("time_fired").map(parse_ts).transpose()?.flatten(),
                domain: str_field(data, "domain")?,
                service: str_field(data, "service")?,
                entity_ids: string_list(targets),
                user_id: context_user(obj),
            })
        }
        "heartbeat" => Ok(SourceEvent::Heartbeat {
            ts_ms: obj.get("time_fired").map(parse_ts).transpose()?.flatten(),
        }),
        other => Ok(SourceEvent::Unrecognized {
            reason: format!("event_type '{other}'"),
        }),
    }
}

fn classify_flat(event_type: &str, obj: &Map<String, Value>) -> Result<SourceEvent, RejectReason> {
    let ts_ms = match obj.get("ts_ms") {
        Some(v) => parse_epoch(v, EpochUnit::Millis)?,
        None => ["ts", "timestamp"]
            .iter()
            .find_map(|k| obj.get(*k))
            .map(parse_ts)
            .transpose()?
            .flatten(),
    };

    match event_type {
        "state_changed" | "state" => {
            let new_state = opt_str(obj, "new")
                .or_else(|| opt_str(obj, "new_state"))
                .ok_or(RejectReason::MissingField("new"))?;
            Ok(SourceEvent::StateChanged {
                ts_ms,
                entity_id: str_field(obj, "entity_id")?,
                old_state: opt_str(obj, "old").or_else(|| opt_str(obj, "old_state")),
                new_state,
                attributes: obj
                    .get("attributes")
                    .and_then(Value::as_object)
                    .cloned()
                    .unwrap_or_default(),
                zone: opt_str(obj, "zone").or_else(|| opt_str(obj, "area_id")),
                user_id: opt_str(obj, "user_id"),
            })
        }
        "call_service" | "service" => Ok(SourceEvent::CallService {
            ts_ms,
            domain: str_field(obj, "domain")?,
            service: str_field(obj, "service")?,
            entity_ids: string_list(obj.get("entity_ids").or_else(|| obj.get("entity_id"))),
            user_id: opt_str(obj, "user_id"),
        }),
        "heartbeat" => Ok(SourceEvent::Heartbeat { ts_ms }),
        other => Ok(SourceEvent::Unrecognized {
            reason: format!("type '{other}'"),
        }),
    }
}

fn str_field(obj: &Map<String, Value>, key: &'static str) -> Result<String, RejectReason> {
    obj.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .map(str::to_string)
        .ok_or(RejectReason::MissingField(key))
}

fn opt_str(obj: &Map<String, Value>, key: &str) -> Option<String> {
    obj.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn context_user(obj: &Map<String, Value>) -> Option<String> {
    obj.get("context")
        .and_then(|c| c.get("user_id"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// A single id or a list of ids.
fn string_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::String(s)) => vec![s.clone()],
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

fn entity_domain(entity_id: &str) -> Result<String, RejectReason> {
    match entity_id.split_once('.') {
        Some((domain, object)) if !domain.is_empty() && !object.is_empty() && !entity_id.contains(':') => {
            Ok(domain.to_string())
        }
        _ => Err(RejectReason::InvalidEntityId(entity_id.to_string())),
    }
}

#[derive(Clone, Copy)]
enum EpochUnit {
    /// Seconds below [`SECONDS_CUTOFF`], milliseconds above.
    Auto,
    Millis,
}

/// Below this, an untyped epoch number is read as seconds (1e11 ms is early 1973).
const SECONDS_CUTOFF: f64 = 1e11;

/// Epoch milliseconds from a number (ms, or seconds when small) or an RFC 3339 string.
fn parse_ts(value: &Value) -> Result<Option<i64>, RejectReason> {
    parse_epoch(value, EpochUnit::Auto)
}

fn parse_epoch(value: &Value, unit: EpochUnit) -> Result<Option<i64>, RejectReason> {
    match value {
        Value::Null => Ok(None),
        Value::Number(n) => {
            let raw = n
                .as_f64()
                .ok_or_else(|| RejectReason::InvalidTimestamp(n.to_string()))?;
            let ms = match unit {
                EpochUnit::Auto if raw.abs() < SECONDS_CUTOFF => raw * 1000.0,
                _ => raw,
            };
            Ok(Some(ms.round() as i64))
        }
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .map(|dt| Some(dt.timestamp_millis()))
            .map_err(|_| RejectReason::InvalidTimestamp(s.clone())),
        other => Err(RejectReason::InvalidTimestamp(other.to_string())),
    }
}
