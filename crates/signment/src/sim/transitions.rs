//! Shipment statuses and the randomized transition table driving the
//! simulator.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use strum::{Display, EnumIter, EnumString, IntoEnumIterator};

/// Shipment lifecycle states. String forms use underscores; that is the
/// wire format in API responses, the database and the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, EnumIter, Serialize, Deserialize)]
pub enum ShipmentStatus {
    #[strum(serialize = "Pending")]
    Pending,
    #[strum(serialize = "In_Transit")]
    #[serde(rename = "In_Transit")]
    InTransit,
    #[strum(serialize = "Out_for_Delivery")]
    #[serde(rename = "Out_for_Delivery")]
    OutForDelivery,
    #[strum(serialize = "Delivered")]
    Delivered,
    #[strum(serialize = "Returned")]
    Returned,
    #[strum(serialize = "Delayed")]
    Delayed,
}

impl ShipmentStatus {
    /// Terminal statuses end the simulation.
    pub fn is_terminal(self) -> bool {
        matches!(self, ShipmentStatus::Delivered | ShipmentStatus::Returned)
    }

    /// All valid status names in wire form.
    pub fn all_names() -> Vec<String> {
        Self::iter().map(|s| s.to_string()).collect()
    }
}

/// One row of the transition table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionRule {
    /// Candidate successor statuses
    pub next: Vec<ShipmentStatus>,
    /// Delay range before the next step, in seconds
    pub delay: (u64, u64),
    /// Selection weights, same length as `next`. Empty means uniform.
    #[serde(default)]
    pub probabilities: Vec<f64>,
    /// Event texts appended as checkpoints when this rule fires
    #[serde(default)]
    pub events: Vec<String>,
}

/// Status transition table, overridable through the STATUS_TRANSITIONS
/// environment variable (JSON object keyed by status name).
#[derive(Debug, Clone)]
pub struct TransitionTable {
    rules: HashMap<ShipmentStatus, TransitionRule>,
}

impl Default for TransitionTable {
    fn default() -> Self {
        use ShipmentStatus::*;

        let mut rules = HashMap::new();
        rules.insert(
            Pending,
            TransitionRule {
                next: vec![InTransit],
                delay: (60, 300),
                probabilities: vec![1.0],
                events: vec![],
            },
        );
        rules.insert(
            InTransit,
            TransitionRule {
                next: vec![OutForDelivery, Delayed],
                delay: (120, 600),
                probabilities: vec![0.9, 0.1],
                events: vec!["Delayed due to weather".to_string(), "Customs inspection".to_string()],
            },
        );
        rules.insert(
            OutForDelivery,
            TransitionRule {
                next: vec![Delivered],
                delay: (60, 300),
                probabilities: vec![1.0],
                events: vec![],
            },
        );
        rules.insert(
            Delayed,
            TransitionRule {
                next: vec![OutForDelivery],
                delay: (300, 1200),
                probabilities: vec![1.0],
                events: vec!["Resolved delay".to_string()],
            },
        );
        rules.insert(
            Delivered,
            TransitionRule {
                next: vec![],
                delay: (0, 0),
                probabilities: vec![],
                events: vec![],
            },
        );
        rules.insert(
            Returned,
            TransitionRule {
                next: vec![],
                delay: (0, 0),
                probabilities: vec![],
                events: vec![],
            },
        );

        Self { rules }
    }
}

impl TransitionTable {
    /// Builds the table from the STATUS_TRANSITIONS env var when set,
    /// otherwise the built-in defaults. A malformed override is logged
    /// and ignored rather than taking the simulator down.
    pub fn from_env_or_default() -> Self {
        match env::var("STATUS_TRANSITIONS") {
            Ok(raw) => match serde_json::from_str::<HashMap<ShipmentStatus, TransitionRule>>(&raw) {
                Ok(rules) => {
                    log::info!("Loaded status transitions from STATUS_TRANSITIONS ({} states)", rules.len());
                    Self { rules }
                }
                Err(e) => {
                    log::error!("Invalid STATUS_TRANSITIONS, using defaults: {}", e);
                    Self::default()
                }
            },
            Err(_) => Self::default(),
        }
    }

    /// Rule for a status. Unknown statuses fall back to a direct path
    /// to Delivered, matching the original behavior.
    pub fn rule(&self, status: ShipmentStatus) -> TransitionRule {
        self.rules.get(&status).cloned().unwrap_or(TransitionRule {
            next: vec![ShipmentStatus::Delivered],
            delay: (60, 300),
            probabilities: vec![1.0],
            events: vec![],
        })
    }

    /// Picks the next status by the rule's weights. Returns `None` for
    /// terminal statuses.
    pub fn choose_next(&self, status: ShipmentStatus) -> Option<ShipmentStatus> {
        let rule = self.rule(status);
        if rule.next.is_empty() {
            return None;
        }

        let weights: Vec<f64> = if rule.probabilities.len() == rule.next.len() {
            rule.probabilities.clone()
        } else {
            vec![1.0 / rule.next.len() as f64; rule.next.len()]
        };

        let total: f64 = weights.iter().sum();
        if total <= 0.0 {
            return rule.next.first().copied();
        }

        let mut pick = rand::rng().random_range(0.0..total);
        for (candidate, weight) in rule.next.iter().zip(weights.iter()) {
            if pick < *weight {
                return Some(*candidate);
            }
            pick -= weight;
        }
        rule.next.last().copied()
    }

    /// Random delay in seconds within the rule's range.
    pub fn random_delay_secs(&self, status: ShipmentStatus) -> f64 {
        let (min, max) = self.rule(status).delay;
        if max <= min {
            return min as f64;
        }
        rand::rng().random_range(min as f64..max as f64)
    }

    /// A random event text for the status, if the rule declares any.
    pub fn random_event(&self, status: ShipmentStatus) -> Option<String> {
        let events = self.rule(status).events;
        if events.is_empty() {
            return None;
        }
        let idx = rand::rng().random_range(0..events.len());
        Some(events[idx].clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::str::FromStr;

    #[test]
    fn test_status_wire_format() {
        assert_eq!(ShipmentStatus::InTransit.to_string(), "In_Transit");
        assert_eq!(ShipmentStatus::OutForDelivery.to_string(), "Out_for_Delivery");
        assert_eq!(ShipmentStatus::from_str("In_Transit").unwrap(), ShipmentStatus::InTransit);
        assert!(ShipmentStatus::from_str("Shipped").is_err());
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(ShipmentStatus::Delivered.is_terminal());
        assert!(ShipmentStatus::Returned.is_terminal());
        assert!(!ShipmentStatus::Pending.is_terminal());
        assert!(!ShipmentStatus::Delayed.is_terminal());
    }

    #[test]
    fn test_default_table_probabilities_sum_to_one() {
        let table = TransitionTable::default();
        for status in ShipmentStatus::iter() {
            let rule = table.rule(status);
            if !rule.next.is_empty() {
                let sum: f64 = rule.probabilities.iter().sum();
                assert!((sum - 1.0).abs() < 1e-9, "weights for {} sum to {}", status, sum);
                assert_eq!(rule.probabilities.len(), rule.next.len());
            }
        }
    }

    #[test]
    fn test_terminal_states_have_no_successors() {
        let table = TransitionTable::default();
        assert!(table.choose_next(ShipmentStatus::Delivered).is_none());
        assert!(table.choose_next(ShipmentStatus::Returned).is_none());
    }

    #[test]
    fn test_deterministic_single_successor() {
        let table = TransitionTable::default();
        for _ in 0..20 {
            assert_eq!(table.choose_next(ShipmentStatus::Pending), Some(ShipmentStatus::InTransit));
            assert_eq!(
                table.choose_next(ShipmentStatus::Delayed),
                Some(ShipmentStatus::OutForDelivery)
            );
        }
    }

    #[test]
    fn test_in_transit_only_yields_declared_successors() {
        let table = TransitionTable::default();
        for _ in 0..50 {
            let next = table.choose_next(ShipmentStatus::InTransit).unwrap();
            assert!(matches!(next, ShipmentStatus::OutForDelivery | ShipmentStatus::Delayed));
        }
    }

    #[test]
    fn test_delay_range() {
        let table = TransitionTable::default();
        for _ in 0..20 {
            let delay = table.random_delay_secs(ShipmentStatus::Pending);
            assert!((60.0..300.0).contains(&delay));
        }
        assert_eq!(table.random_delay_secs(ShipmentStatus::Delivered), 0.0);
    }

    #[test]
    fn test_rule_json_roundtrip() {
        let raw = r#"{
            "Pending": {"next": ["In_Transit"], "delay": [10, 20], "probabilities": [1.0]},
            "In_Transit": {"next": ["Delivered"], "delay": [5, 10], "events": ["Handed over"]}
        }"#;
        let rules: HashMap<ShipmentStatus, TransitionRule> = serde_json::from_str(raw).unwrap();
        assert_eq!(rules[&ShipmentStatus::Pending].next, vec![ShipmentStatus::InTransit]);
        assert_eq!(rules[&ShipmentStatus::InTransit].events, vec!["Handed over".to_string()]);
    }
}
