use std::collections::BTreeMap;
use std::str::FromStr;

use config_rs::{Config as ConfigRs, File};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::config::{ConfigurationError, RuleDefinition, ValidationConfig};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
    /// Assigned to rules whose execution failed; never configured
    Error,
}

/// A named query whose result rows are data-quality violations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    pub name: String,
    pub query: String,
    pub severity: Severity,
    pub enabled: bool,
    pub description: Option<String>,
}

impl Rule {
    fn from_definition(name: &str, definition: RuleDefinition) -> Result<Self, ConfigurationError> {
        let severity = Severity::from_str(&definition.severity).map_err(|_| {
            ConfigurationError::Invalid(format!(
                "rule '{name}' has unknown severity '{}'",
                definition.severity
            ))
        })?;
        if severity == Severity::Error {
            return Err(ConfigurationError::Invalid(format!(
                "rule '{name}' cannot be configured with severity ERROR"
            )));
        }
        if definition.query.trim().is_empty() {
            return Err(ConfigurationError::Invalid(format!(
                "rule '{name}' has an empty query"
            )));
        }

        Ok(Self {
            name: name.to_string(),
            query: definition.query,
            severity,
            enabled: definition.enabled,
            description: definition.description,
        })
    }

    /// Whether the rule's name or query mentions any of `keywords`.
    #[must_use]
    pub fn mentions_any(&self, keywords: &[String]) -> bool {
        let name = self.name.to_lowercase();
        let query = self.query.to_lowercase();
        keywords.iter().any(|keyword| {
            let keyword = keyword.to_lowercase();
            name.contains(&keyword) || query.contains(&keyword)
        })
    }
}

/// Read-only catalog of validation rules, ordered by name.
#[derive(Debug, Clone, Default)]
pub struct RuleCatalog {
    rules: BTreeMap<String, Rule>,
}

impl RuleCatalog {
    /// Build the catalog from inline rules, merged over the rules file when
    /// one is configured.
    pub fn load(config: &ValidationConfig) -> Result<Self, ConfigurationError> {
        let mut definitions: BTreeMap<String, RuleDefinition> = match &config.rules_file {
            Some(path) => ConfigRs::builder()
                .add_source(File::with_name(path))
                .build()?
                .get("rules")?,
            None => BTreeMap::new(),
        };
        definitions.extend(config.rules.clone());

        let rules = definitions
            .into_iter()
            .map(|(name, definition)| {
                Rule::from_definition(&name, definition).map(|rule| (name, rule))
            })
            .collect::<Result<_, _>>()?;
        Ok(Self { rules })
    }

    #[must_use]
    pub fn from_rules(rules: impl IntoIterator<Item = Rule>) -> Self {
        Self {
            rules: rules.into_iter().map(|r| (r.name.clone(), r)).collect(),
        }
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Rule> {
        self.rules.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.rules.keys().map(String::as_str)
    }

    pub fn enabled(&self) -> impl Iterator<Item = &Rule> {
        self.rules.values().filter(|r| r.enabled)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Enabled rules worth pre-executing: those mentioning a priority
    /// keyword, highest severity first.
    #[must_use]
    pub fn priority_rules(&self, keywords: &[String], limit: usize) -> Vec<&Rule> {
        let mut rules: Vec<&Rule> = self
            .enabled()
            .filter(|rule| rule.mentions_any(keywords))
            .collect();
        rules.sort_by(|a, b| b.severity.cmp(&a.severity).then_with(|| a.name.cmp(&b.name)));
        rules.truncate(limit);
        rules
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;

    use super::*;

    fn definition(query: &str, severity: &str) -> RuleDefinition {
        RuleDefinition {
            query: query.to_string(),
            severity: severity.to_string(),
            enabled: true,
            description: None,
        }
    }

    #[test]
    fn test_severity_parses_case_insensitively() {
        assert_eq!(Severity::from_str("high").unwrap(), Severity::High);
        assert_eq!(Severity::Critical.to_string(), "CRITICAL");
        assert!(Severity::Low < Severity::Critical);
    }

    #[test]
    fn test_error_severity_is_rejected() {
        let config = ValidationConfig {
            rules_file: None,
            rules: BTreeMap::from([("bad".to_string(), definition("SELECT 1", "ERROR"))]),
        };
        assert!(matches!(
            RuleCatalog::load(&config),
            Err(ConfigurationError::Invalid(_))
        ));
    }

    #[test]
    fn test_inline_rules_override_rules_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[rules.npi_validation]
query = "SELECT npi FROM providers WHERE length(npi) <> 10"
severity = "CRITICAL"

[rules.stale_license]
query = "SELECT * FROM licenses WHERE expires_at < CURRENT_DATE"
severity = "HIGH"
enabled = false
"#
        )
        .unwrap();

        let config = ValidationConfig {
            rules_file: Some(file.path().to_string_lossy().into_owned()),
            rules: BTreeMap::from([(
                "npi_validation".to_string(),
                definition("SELECT npi FROM providers WHERE npi IS NULL", "low"),
            )]),
        };
        let catalog = RuleCatalog::load(&config).unwrap();

        assert_eq!(catalog.len(), 2);
        let npi = catalog.get("npi_validation").unwrap();
        assert_eq!(npi.severity, Severity::Low);
        assert!(npi.query.contains("IS NULL"));
        assert!(!catalog.get("stale_license").unwrap().enabled);
    }

    #[test]
    fn test_priority_rules_match_keywords() {
        let rule = |name: &str, query: &str, severity| Rule {
            name: name.to_string(),
            query: query.to_string(),
            severity,
            enabled: true,
            description: None,
        };
        let catalog = RuleCatalog::from_rules([
            rule("address_format", "SELECT * FROM addresses", Severity::Low),
            rule("npi_validation", "SELECT * FROM providers", Severity::Medium),
            rule("dupes", "SELECT * FROM duplicate_providers", Severity::Critical),
        ]);

        let keywords = vec!["npi".to_string(), "DUPLICATE".to_string()];
        let names: Vec<&str> = catalog
            .priority_rules(&keywords, 5)
            .into_iter()
            .map(|r| r.name.as_str())
            .collect();
        assert_eq!(names, vec!["dupes", "npi_validation"]);
        assert_eq!(catalog.priority_rules(&keywords, 1).len(), 1);
    }
}
