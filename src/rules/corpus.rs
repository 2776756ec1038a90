use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Equals,
    NotEquals,
    Contains,
    Regex,
    In,
    Gt,
    Lt,
    Gte,
    Lte,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Condition {
    pub field: String,
    pub operator: Operator,
    pub value: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleDef {
    pub id: String,
    pub name: String,
    pub severity: Severity,
    #[serde(default)]
    pub tags: Vec<String>,
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub enrichment: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleCorpus {
    #[serde(default)]
    pub rules: Vec<RuleDef>,
}

impl RuleCorpus {
    /// Parses a corpus from either YAML or JSON text (JSON is a YAML
    /// subset, so one parser covers both per the wire contract in spec §6).
    pub fn parse(text: &str) -> anyhow::Result<Self> {
        let corpus: RuleCorpus = serde_yaml::from_str(text)?;
        Ok(corpus)
    }

    pub fn load_file(path: &str) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text)
    }
}
