//! Condition model and the Ready aggregator.
//!
//! A [`ConditionSet`] names the component conditions of a kind in declaration
//! order. Marking any component through a [`ConditionManager`] recomputes
//! `Ready`: the first Error-severity component that is False wins, otherwise
//! the first one that is Unknown, otherwise Ready is True.

use chrono::{SecondsFormat, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub const READY: &str = "Ready";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum ConditionStatus {
    True,
    False,
    #[default]
    Unknown,
}

impl ConditionStatus {
    /// Kubernetes condition status strings ("True", "False", anything else).
    pub fn from_k8s(s: &str) -> Self {
        match s {
            "True" => Self::True,
            "False" => Self::False,
            _ => Self::Unknown,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum ConditionSeverity {
    #[default]
    #[serde(rename = "")]
    Error,
    Warning,
    Info,
}

impl ConditionSeverity {
    pub fn is_error(&self) -> bool { matches!(self, Self::Error) }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: ConditionStatus,
    #[serde(default, skip_serializing_if = "ConditionSeverity::is_error")]
    pub severity: ConditionSeverity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
}

impl Condition {
    pub fn new(type_: impl Into<String>, status: ConditionStatus) -> Self {
        Self { type_: type_.into(), status, ..Default::default() }
    }

    pub fn with_reason(mut self, reason: impl Into<String>, message: impl Into<String>) -> Self {
        self.reason = reason.into();
        self.message = message.into();
        self
    }

    pub fn with_severity(mut self, severity: ConditionSeverity) -> Self {
        self.severity = severity;
        self
    }

    pub fn is_true(&self) -> bool { self.status == ConditionStatus::True }
    pub fn is_false(&self) -> bool { self.status == ConditionStatus::False }
    pub fn is_unknown(&self) -> bool { self.status == ConditionStatus::Unknown }

    /// Equal apart from the transition timestamp.
    pub fn same_state(&self, other: &Condition) -> bool {
        self.type_ == other.type_
            && self.status == other.status
            && self.severity == other.severity
            && self.reason == other.reason
            && self.message == other.message
    }
}

/// Find a condition by type in a list.
pub fn find<'a>(conditions: &'a [Condition], type_: &str) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.type_ == type_)
}

/// Ordered component conditions of one kind, rolled up into `Ready`.
#[derive(Debug, Clone, Copy)]
pub struct ConditionSet {
    happy: &'static str,
    dependents: &'static [&'static str],
}

impl ConditionSet {
    pub const fn living(dependents: &'static [&'static str]) -> Self {
        Self { happy: READY, dependents }
    }

    pub fn happy(&self) -> &'static str { self.happy }
    pub fn dependents(&self) -> &'static [&'static str] { self.dependents }

    pub fn manage<'a>(&self, conditions: &'a mut Vec<Condition>) -> ConditionManager<'a> {
        ConditionManager { set: *self, conditions }
    }
}

pub struct ConditionManager<'a> {
    set: ConditionSet,
    conditions: &'a mut Vec<Condition>,
}

fn now() -> String { Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true) }

impl<'a> ConditionManager<'a> {
    /// Add `Ready` and every component that is missing. New components start
    /// Unknown unless `Ready` is already True.
    pub fn initialize(&mut self) {
        let happy_true = self.get(self.set.happy).map(Condition::is_true).unwrap_or(false);
        if self.get(self.set.happy).is_none() {
            self.put(Condition::new(self.set.happy, ConditionStatus::Unknown));
        }
        let initial = if happy_true { ConditionStatus::True } else { ConditionStatus::Unknown };
        for dep in self.set.dependents {
            if self.get(dep).is_none() {
                self.put(Condition::new(*dep, initial));
            }
        }
    }

    pub fn get(&self, type_: &str) -> Option<&Condition> { find(self.conditions, type_) }

    pub fn is_happy(&self) -> bool { self.get(self.set.happy).map(Condition::is_true).unwrap_or(false) }

    pub fn mark_true(&mut self, type_: &str) {
        self.set_condition(Condition::new(type_, ConditionStatus::True));
    }

    pub fn mark_false(&mut self, type_: &str, reason: impl Into<String>, message: impl Into<String>) {
        self.set_condition(Condition::new(type_, ConditionStatus::False).with_reason(reason, message));
    }

    pub fn mark_unknown(&mut self, type_: &str, reason: impl Into<String>, message: impl Into<String>) {
        self.set_condition(Condition::new(type_, ConditionStatus::Unknown).with_reason(reason, message));
    }

    /// Record an informational component; it never affects `Ready`.
    pub fn mark_info(&mut self, type_: &str, status: ConditionStatus, reason: impl Into<String>, message: impl Into<String>) {
        let c = Condition::new(type_, status).with_reason(reason, message).with_severity(ConditionSeverity::Info);
        self.set_condition(c);
    }

    /// Mirror a child's readiness onto a component condition. A missing child
    /// condition reads as Unknown.
    pub fn propagate(&mut self, type_: &str, child: Option<&Condition>) {
        match child {
            Some(c) if c.is_true() => self.mark_true(type_),
            Some(c) if c.is_false() => self.mark_false(type_, c.reason.clone(), c.message.clone()),
            Some(c) => self.mark_unknown(type_, c.reason.clone(), c.message.clone()),
            None => self.mark_unknown(type_, "", ""),
        }
    }

    /// Set a condition, keeping its transition time when the status did not move.
    pub fn set_condition(&mut self, mut cond: Condition) {
        if cond.type_ != self.set.happy && !self.set.dependents.contains(&cond.type_.as_str()) {
            cond.severity = ConditionSeverity::Info;
        }
        let is_dependent = self.set.dependents.contains(&cond.type_.as_str());
        self.put(cond);
        if is_dependent {
            self.recompute_happy();
        }
    }

    fn put(&mut self, mut cond: Condition) {
        match self.conditions.iter_mut().find(|c| c.type_ == cond.type_) {
            Some(existing) => {
                if existing.same_state(&cond) {
                    return;
                }
                cond.last_transition_time = if existing.status == cond.status {
                    existing.last_transition_time.clone()
                } else {
                    Some(now())
                };
                *existing = cond;
            }
            None => {
                cond.last_transition_time = Some(now());
                self.conditions.push(cond);
            }
        }
        self.conditions.sort_by(|a, b| a.type_.cmp(&b.type_));
    }

    fn recompute_happy(&mut self) {
        let mut first_unknown: Option<Condition> = None;
        for dep in self.set.dependents {
            let c = match self.get(dep) {
                Some(c) if !c.severity.is_error() => continue,
                Some(c) => c.clone(),
                None => Condition::new(*dep, ConditionStatus::Unknown),
            };
            match c.status {
                ConditionStatus::False => {
                    self.put(Condition::new(self.set.happy, ConditionStatus::False).with_reason(c.reason, c.message));
                    return;
                }
                ConditionStatus::Unknown if first_unknown.is_none() => first_unknown = Some(c),
                _ => {}
            }
        }
        let happy = match first_unknown {
            Some(c) => Condition::new(self.set.happy, ConditionStatus::Unknown).with_reason(c.reason, c.message),
            None => Condition::new(self.set.happy, ConditionStatus::True),
        };
        self.put(happy);
    }
}
