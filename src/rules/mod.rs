pub mod corpus;
pub mod value;

use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::{Mutex, RwLock};
use regex::Regex;
use serde_json::Value;

/// Compiled `Operator::Regex` patterns are cached by source text so a hot
/// condition isn't recompiled on every event; corpus reloads just add to
/// this cache rather than needing to invalidate it, since the same pattern
/// text always compiles to the same automaton.
static REGEX_CACHE: Lazy<Mutex<HashMap<String, Regex>>> = Lazy::new(|| Mutex::new(HashMap::new()));

pub use corpus::{Condition, Operator, RuleCorpus, RuleDef, Severity};

use crate::evidence::{EnrichedEvent, EvidenceRecord, MatchedRule};

const PROTECTED_KEYS: &[&str] = &[
    "event_id",
    "ts",
    "source_kind",
    "host_identifier",
    "score_contribution",
];

/// A compiled, immutable snapshot of the rule corpus. Rules are evaluated in
/// declaration order; later rules win on enrichment-key collision.
pub struct RuleSet {
    rules: Vec<RuleDef>,
}

impl RuleSet {
    pub fn compile(corpus: RuleCorpus) -> Self {
        Self { rules: corpus.rules }
    }

    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    fn matches(rule: &RuleDef, tree: &Value) -> bool {
        rule.conditions.iter().all(|c| evaluate_condition(c, tree))
    }
}

fn evaluate_condition(condition: &Condition, tree: &Value) -> bool {
    let field_value = match value::get_path(tree, &condition.field) {
        Some(v) => v,
        None => return false,
    };

    match condition.operator {
        Operator::Equals => field_value == &condition.value,
        Operator::NotEquals => field_value != &condition.value,
        Operator::Contains => match field_value.as_str() {
            Some(s) => condition
                .value
                .as_str()
                .map(|needle| s.contains(needle))
                .unwrap_or(false),
            None => false,
        },
        Operator::Regex => {
            let pattern = match condition.value.as_str() {
                Some(p) => p,
                None => return false,
            };
            let haystack = stringify(field_value);
            match compiled_regex(pattern) {
                Some(re) => re.is_match(&haystack),
                None => false,
            }
        }
        Operator::In => match condition.value.as_array() {
            Some(arr) => arr.contains(field_value),
            None => false,
        },
        Operator::Gt => compare_numeric(field_value, &condition.value, |a, b| a > b),
        Operator::Lt => compare_numeric(field_value, &condition.value, |a, b| a < b),
        Operator::Gte => compare_numeric(field_value, &condition.value, |a, b| a >= b),
        Operator::Lte => compare_numeric(field_value, &condition.value, |a, b| a <= b),
    }
}

/// Returns a cloned, cached compile of `pattern`, compiling and inserting it
/// on first use. `None` if the pattern itself is invalid regex syntax.
fn compiled_regex(pattern: &str) -> Option<Regex> {
    let mut cache = REGEX_CACHE.lock();
    if let Some(re) = cache.get(pattern) {
        return Some(re.clone());
    }
    let re = Regex::new(pattern).ok()?;
    cache.insert(pattern.to_string(), re.clone());
    Some(re)
}

fn stringify(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn compare_numeric(a: &Value, b: &Value, cmp: impl Fn(f64, f64) -> bool) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(a), Some(b)) => cmp(a, b),
        _ => false, // type mismatch fails false, never raises
    }
}

/// The rule engine: holds a single-writer-locked immutable `RuleSet`
/// snapshot. Readers always see either the old or the new corpus in full,
/// never a torn mix, because `reload` builds the replacement off to the
/// side before swapping it in.
pub struct RuleEngine {
    snapshot: RwLock<Arc<RuleSet>>,
}

impl RuleEngine {
    pub fn new(initial: RuleSet) -> Self {
        Self {
            snapshot: RwLock::new(Arc::new(initial)),
        }
    }

    pub fn empty() -> Self {
        Self::new(RuleSet::empty())
    }

    /// Hot-reloads the corpus. Fully parses and compiles the new corpus
    /// before taking the write lock; a parse failure leaves the old corpus
    /// untouched and in effect.
    pub fn reload(&self, corpus: RuleCorpus) {
        let compiled = Arc::new(RuleSet::compile(corpus));
        *self.snapshot.write() = compiled;
    }

    pub fn apply(&self, record: EvidenceRecord) -> EnrichedEvent {
        let snapshot = self.snapshot.read().clone();
        let tree = serde_json::to_value(&record).unwrap_or(Value::Null);

        let mut matched_rules = Vec::new();
        let mut enrichment = std::collections::BTreeMap::new();

        for rule in &snapshot.rules {
            if RuleSet::matches(rule, &tree) {
                matched_rules.push(MatchedRule {
                    rule_id: rule.id.clone(),
                    name: rule.name.clone(),
                    severity: rule.severity,
                    tags: rule.tags.clone(),
                });

                for (key, value) in &rule.enrichment {
                    if PROTECTED_KEYS.contains(&key.as_str()) {
                        continue;
                    }
                    enrichment.insert(key.clone(), value.clone());
                }
            }
        }

        let enrichment_applied = !matched_rules.is_empty();

        EnrichedEvent {
            record,
            matched_rules,
            enrichment,
            enrichment_applied,
        }
    }
}
