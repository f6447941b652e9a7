//! Wire types for the `domain-policy` Kong plugin.

use serde::{Deserialize, Serialize};
use zonegate_core::ClusterKey;

/// Deterministic plugin id for a cluster's domain-policy table.
#[must_use]
pub fn domain_policy_plugin_id(cluster: &ClusterKey) -> String {
    format!("domain-policy-{cluster}")
}

/// Index-aligned configuration of the `domain-policy` plugin.
///
/// Every field is a parallel array: entry `i` of each array describes the
/// same routing rule. The arrays are ordered most-specific-first; the data
/// plane takes the first regex that matches the request host and path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainPolicyConfig {
    /// Host/path match patterns.
    pub regexs: Vec<String>,
    /// Zone ids, one per rule.
    pub ids: Vec<String>,
    /// Comma-joined enabled plugin ids per rule.
    pub enables: Vec<String>,
    /// Comma-joined disabled plugin ids per rule.
    pub disables: Vec<String>,
    /// Whether traffic matching the rule is admitted at all. Carried as
    /// "true"/"false" strings on the wire like the other parallel arrays.
    #[serde(with = "bool_strings")]
    pub allows: Vec<bool>,
    /// Owning package name per rule.
    pub packs: Vec<String>,
    /// Owning project id per rule.
    pub dpids: Vec<String>,
    /// Environment per rule.
    pub denvs: Vec<String>,
}

impl DomainPolicyConfig {
    /// Number of rules in the table.
    #[must_use]
    pub fn len(&self) -> usize {
        self.regexs.len()
    }

    /// True when the table carries no rules.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.regexs.is_empty()
    }

    /// Append one rule, keeping all parallel arrays aligned.
    #[allow(clippy::too_many_arguments)]
    pub fn push_rule(
        &mut self,
        regex: String,
        id: String,
        enables: String,
        disables: String,
        allow: bool,
        pack: String,
        project_id: String,
        env: String,
    ) {
        self.regexs.push(regex);
        self.ids.push(id);
        self.enables.push(enables);
        self.disables.push(disables);
        self.allows.push(allow);
        self.packs.push(pack);
        self.dpids.push(project_id);
        self.denvs.push(env);
    }
}

mod bool_strings {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(values: &[bool], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(values.iter().map(|v| if *v { "true" } else { "false" }))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<bool>, D::Error> {
        Vec::<String>::deserialize(deserializer)?
            .iter()
            .map(|s| {
                s.parse()
                    .map_err(|_| D::Error::custom(format!("invalid boolean string: {s}")))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plugin_id_is_cluster_scoped() {
        let cluster = ClusterKey::new("prod-eu-1").unwrap();
        assert_eq!(domain_policy_plugin_id(&cluster), "domain-policy-prod-eu-1");
    }

    #[test]
    fn push_rule_keeps_arrays_aligned() {
        let mut config = DomainPolicyConfig::default();
        config.push_rule(
            "shop.example.com/api".to_string(),
            "z1".to_string(),
            "request-id".to_string(),
            String::new(),
            true,
            "shop".to_string(),
            "p1".to_string(),
            "prod".to_string(),
        );

        assert_eq!(config.len(), 1);
        assert_eq!(config.ids.len(), config.regexs.len());
        assert_eq!(config.allows, vec![true]);
    }

    #[test]
    fn allows_cross_the_wire_as_strings() {
        let mut config = DomainPolicyConfig::default();
        config.push_rule(
            "shop.example.com/".to_string(),
            "z1".to_string(),
            String::new(),
            String::new(),
            true,
            "shop".to_string(),
            "p1".to_string(),
            "prod".to_string(),
        );

        let value = serde_json::to_value(&config).unwrap();
        assert_eq!(value["allows"], serde_json::json!(["true"]));

        let back: DomainPolicyConfig = serde_json::from_value(value).unwrap();
        assert_eq!(back.allows, vec![true]);
    }
}
