//! Route templates: the checkpoint sequence a shipment passes through
//! on the way to a delivery location.

use serde_json::Value;
use std::collections::HashMap;
use std::env;

use crate::storage::ShipmentCache;

/// Map from delivery location to its ordered checkpoint locations.
#[derive(Debug, Clone)]
pub struct RouteTable {
    templates: HashMap<String, Vec<String>>,
}

impl Default for RouteTable {
    fn default() -> Self {
        let mut templates = HashMap::new();
        templates.insert(
            "Lagos, NG".to_string(),
            vec!["Lagos, NG", "Abuja, NG", "Port Harcourt, NG", "Kano, NG"]
                .into_iter()
                .map(String::from)
                .collect(),
        );
        templates.insert(
            "New York, NY".to_string(),
            vec!["New York, NY", "Chicago, IL", "Los Angeles, CA", "Miami, FL"]
                .into_iter()
                .map(String::from)
                .collect(),
        );
        templates.insert(
            "London, UK".to_string(),
            vec!["London, UK", "Manchester, UK", "Birmingham, UK", "Edinburgh, UK"]
                .into_iter()
                .map(String::from)
                .collect(),
        );
        Self { templates }
    }
}

impl RouteTable {
    /// Builds the table from the ROUTE_TEMPLATES env var (JSON object of
    /// location -> [checkpoints]) or the built-in defaults.
    pub fn from_env_or_default() -> Self {
        match env::var("ROUTE_TEMPLATES") {
            Ok(raw) => match serde_json::from_str::<HashMap<String, Vec<String>>>(&raw) {
                Ok(templates) if !templates.is_empty() => {
                    log::info!("Loaded {} route template(s) from ROUTE_TEMPLATES", templates.len());
                    Self { templates }
                }
                Ok(_) => {
                    log::warn!("ROUTE_TEMPLATES is empty, using defaults");
                    Self::default()
                }
                Err(e) => {
                    log::error!("Invalid ROUTE_TEMPLATES, using defaults: {}", e);
                    Self::default()
                }
            },
            Err(_) => Self::default(),
        }
    }

    /// Known delivery locations, sorted for stable display.
    pub fn known_locations(&self) -> Vec<String> {
        let mut locations: Vec<String> = self.templates.keys().cloned().collect();
        locations.sort();
        locations
    }

    /// Template for a delivery location, falling back to the origin's
    /// template and finally a single-hop route, matching the original
    /// lookup chain.
    pub fn template_for(&self, delivery_location: &str, origin_location: &str) -> Vec<String> {
        self.templates
            .get(delivery_location)
            .or_else(|| self.templates.get(origin_location))
            .cloned()
            .unwrap_or_else(|| vec![delivery_location.to_string()])
    }

    /// Serializes the table for the Redis cache.
    pub fn to_json(&self) -> String {
        serde_json::to_value(&self.templates)
            .unwrap_or(Value::Null)
            .to_string()
    }

    /// Primes the shared cache so other processes see the same table.
    pub async fn prime_cache(&self, cache: &ShipmentCache) {
        if let Err(e) = cache.cache_route_templates(&self.to_json()).await {
            log::warn!("Failed to cache route templates: {}", e);
        } else {
            log::info!("Cached route templates");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_default_routes_present() {
        let table = RouteTable::default();
        let locations = table.known_locations();
        assert!(locations.contains(&"Lagos, NG".to_string()));
        assert!(locations.contains(&"New York, NY".to_string()));
        assert!(locations.contains(&"London, UK".to_string()));
    }

    #[test]
    fn test_template_lookup_chain() {
        let table = RouteTable::default();
        // Delivery location known
        assert_eq!(table.template_for("Lagos, NG", "London, UK").len(), 4);
        // Falls back to origin
        let via_origin = table.template_for("Atlantis", "London, UK");
        assert_eq!(via_origin.first().map(String::as_str), Some("London, UK"));
        // Falls back to a single-hop route
        assert_eq!(
            table.template_for("Atlantis", "Nowhere"),
            vec!["Atlantis".to_string()]
        );
    }

    #[test]
    fn test_to_json_parses_back() {
        let table = RouteTable::default();
        let parsed: std::collections::HashMap<String, Vec<String>> =
            serde_json::from_str(&table.to_json()).unwrap();
        assert_eq!(parsed.len(), 3);
    }
}
