//! Declarative invalidation rules
//!
//! A rule maps `(receiver, function)` to key templates. When a processed
//! transaction matches, each template is rendered against it and the result
//! becomes an invalidation target: an exact key, or a pattern when the
//! template's own text contains a wildcard. Placeholder values never make a
//! target a pattern; inside pattern templates their glob characters are
//! escaped.
//!
//! ## Template placeholders
//!
//! | Placeholder    | Value                                                  |
//! |----------------|--------------------------------------------------------|
//! | `{sender}`     | transaction sender address                             |
//! | `{receiver}`   | receiving contract address                             |
//! | `{argN}`       | argument N as UTF-8 text (raw hex when not text)       |
//! | `{argN:hex}`   | argument N as sent                                     |
//!
//! Rules load from JSON:
//!
//! ```json
//! [
//!   { "receiver": "*", "function": "issue", "targets": ["tokens:{sender}:*"] },
//!   { "receiver": "addr1registry", "function": "register", "targets": ["registry:{arg0}"] }
//! ]
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{info, warn};

use super::transaction::Transaction;
use crate::cache::{escape_glob, is_pattern};
use crate::types::{GatewayError, Result};

/// Which receiving addresses a rule applies to
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ReceiverMatcher {
    /// Any receiver (`"*"`)
    #[default]
    Any,
    Exact(String),
}

impl From<String> for ReceiverMatcher {
    fn from(value: String) -> Self {
        if value == "*" {
            Self::Any
        } else {
            Self::Exact(value)
        }
    }
}

impl From<ReceiverMatcher> for String {
    fn from(matcher: ReceiverMatcher) -> Self {
        match matcher {
            ReceiverMatcher::Any => "*".to_string(),
            ReceiverMatcher::Exact(address) => address,
        }
    }
}

impl ReceiverMatcher {
    pub fn matches(&self, receiver: &str) -> bool {
        match self {
            Self::Any => true,
            Self::Exact(address) => address == receiver,
        }
    }
}

/// A key or key pattern to remove
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum InvalidationTarget {
    Key(String),
    Pattern(String),
}

impl InvalidationTarget {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Key(key) | Self::Pattern(key) => key,
        }
    }
}

/// One invalidation rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidationRule {
    #[serde(default)]
    pub receiver: ReceiverMatcher,

    /// Function name the transaction must call
    pub function: String,

    /// Key templates rendered on match
    pub targets: Vec<String>,
}

impl InvalidationRule {
    pub fn new(function: &str, targets: &[&str]) -> Self {
        Self {
            receiver: ReceiverMatcher::Any,
            function: function.to_string(),
            targets: targets.iter().map(|t| t.to_string()).collect(),
        }
    }

    /// Restrict the rule to one receiving address
    pub fn for_receiver(mut self, receiver: &str) -> Self {
        self.receiver = ReceiverMatcher::Exact(receiver.to_string());
        self
    }

    pub fn matches(&self, tx: &Transaction) -> bool {
        self.receiver.matches(&tx.receiver) && tx.function_name() == Some(self.function.as_str())
    }

    /// Render every template against `tx`.
    ///
    /// A template whose placeholders cannot be filled (unknown name, missing
    /// argument) is skipped with a warning; the others still render.
    pub fn render(&self, tx: &Transaction) -> Vec<InvalidationTarget> {
        self.targets
            .iter()
            .filter_map(|template| match render_template(template, tx) {
                Some(target) => Some(target),
                None => {
                    warn!(
                        function = %self.function,
                        template = %template,
                        "Invalidation template could not be rendered"
                    );
                    None
                }
            })
            .collect()
    }
}

fn render_template(template: &str, tx: &Transaction) -> Option<InvalidationTarget> {
    let pattern = is_pattern(&literal_text(template)?);
    let mut out = String::with_capacity(template.len() + 32);
    let mut rest = template;

    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        let end = after.find('}')?;
        let value = placeholder_value(&after[..end], tx)?;
        if pattern {
            out.push_str(&escape_glob(&value));
        } else {
            out.push_str(&value);
        }
        rest = &after[end + 1..];
    }
    out.push_str(rest);

    Some(if pattern {
        InvalidationTarget::Pattern(out)
    } else {
        InvalidationTarget::Key(out)
    })
}

/// Template text with placeholders removed
fn literal_text(template: &str) -> Option<String> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let end = rest[start..].find('}')?;
        rest = &rest[start + end + 1..];
    }
    out.push_str(rest);
    Some(out)
}

fn placeholder_value(name: &str, tx: &Transaction) -> Option<String> {
    match name {
        "sender" => return Some(tx.sender.clone()),
        "receiver" => return Some(tx.receiver.clone()),
        _ => {}
    }

    let spec = name.strip_prefix("arg")?;
    let (index, raw) = match spec.strip_suffix(":hex") {
        Some(index) => (index, true),
        None => (spec, false),
    };
    let index: usize = index.parse().ok()?;
    let function = tx.function.as_ref()?;

    if raw {
        function.arg_hex(index).map(str::to_string)
    } else {
        function.arg_text(index)
    }
}

/// Ordered collection of invalidation rules
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuleSet {
    rules: Vec<InvalidationRule>,
}

impl RuleSet {
    pub fn new(rules: Vec<InvalidationRule>) -> Self {
        Self { rules }
    }

    /// Built-in rules for the token ledger's common calls
    pub fn defaults() -> Self {
        Self::new(vec![
            // Token issuance: the issuer's token listings and the new token
            InvalidationRule::new("issue", &["tokens:{sender}:*", "token:{arg0}"]),
            InvalidationRule::new("issueNonFungible", &["tokens:{sender}:*", "token:{arg0}"]),
            InvalidationRule::new("issueSemiFungible", &["tokens:{sender}:*", "token:{arg0}"]),
            // Supply changes
            InvalidationRule::new(
                "mint",
                &["token:{arg0}", "supply:{arg0}", "balance:{sender}:{arg0}"],
            ),
            InvalidationRule::new(
                "burn",
                &["token:{arg0}", "supply:{arg0}", "balance:{sender}:{arg0}"],
            ),
            // Token property changes
            InvalidationRule::new("setProperties", &["token:{arg0}", "properties:{arg0}"]),
            InvalidationRule::new("pause", &["token:{arg0}", "properties:{arg0}"]),
            InvalidationRule::new("unPause", &["token:{arg0}", "properties:{arg0}"]),
            InvalidationRule::new("freeze", &["token:{arg0}", "balance:{arg1}:{arg0}"]),
            InvalidationRule::new("unFreeze", &["token:{arg0}", "balance:{arg1}:{arg0}"]),
            // Role assignment
            InvalidationRule::new("setSpecialRole", &["roles:{arg0}:*", "account-roles:{arg1}:*"]),
            InvalidationRule::new(
                "unSetSpecialRole",
                &["roles:{arg0}:*", "account-roles:{arg1}:*"],
            ),
            InvalidationRule::new(
                "transferOwnership",
                &["token:{arg0}", "tokens:{sender}:*", "tokens:{arg1}:*"],
            ),
            // Transfers
            InvalidationRule::new(
                "transfer",
                &["balance:{sender}:{arg0}", "balance:{receiver}:{arg0}"],
            ),
            InvalidationRule::new("multiTransfer", &["balance:{sender}:*", "balance:{arg0}:*"]),
        ])
    }

    /// Parse a JSON array of rules
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(GatewayError::from)
    }

    /// Load rules from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .map_err(|e| {
                GatewayError::Config(format!("Failed to read {}: {}", path.display(), e))
            })?;
        let rules = Self::from_json(&json)?;
        info!(path = %path.display(), count = rules.len(), "Loaded invalidation rules");
        Ok(rules)
    }

    pub fn push(&mut self, rule: InvalidationRule) {
        self.rules.push(rule);
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn rules(&self) -> &[InvalidationRule] {
        &self.rules
    }

    /// Targets for `tx` across all matching rules, first occurrence order,
    /// duplicates removed. Unmatched transactions yield nothing.
    pub fn targets_for(&self, tx: &Transaction) -> Vec<InvalidationTarget> {
        let mut targets: Vec<InvalidationTarget> = Vec::new();
        for rule in self.rules.iter().filter(|rule| rule.matches(tx)) {
            for target in rule.render(tx) {
                if !targets.contains(&target) {
                    targets.push(target);
                }
            }
        }
        targets
    }
}
