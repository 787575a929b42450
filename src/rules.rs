//! Rule-based admission control.
//!
//! A [`RuleSet`] is an ordered, immutable list of `(compiled regex, action)`
//! pairs evaluated first-match-wins against `host + path`. The filter itself
//! lives in [`crate::filter`]; this module only owns the data.

use regex::Regex;
use serde::{Deserialize, Serialize};

/// The five admission decisions a rule can produce.
///
/// `ALLOW` sets neither `locked` nor `refresh` nor `no_store` when translated
/// into a [`crate::snapshotter::Mode`] — it is the "consult cache, else fetch
/// and store" default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
    /// Respond 403 immediately; never consult the snapshotter.
    Reject,
    /// Consult cache; 403 on miss instead of reaching origin.
    Locked,
    /// Consult cache; fetch and store on miss.
    Allow,
    /// Skip cache on read; always fetch from origin and store the result.
    Refresh,
    /// Skip cache on read; fetch from origin; never store the result.
    RefreshNoStore,
}

impl Action {
    /// Parses an action keyword, case-sensitively, the way the configuration
    /// format spells them. Anything unrecognized resolves to `Reject` —
    /// unknown or misspelled actions fail closed.
    pub fn parse(raw: &str) -> Action {
        match raw {
            "LOCKED" => Action::Locked,
            "ALLOW" => Action::Allow,
            "REFRESH" => Action::Refresh,
            "REFRESH_NO_STORE" => Action::RefreshNoStore,
            "REJECT" => Action::Reject,
            _ => Action::Reject,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Reject => "REJECT",
            Action::Locked => "LOCKED",
            Action::Allow => "ALLOW",
            Action::Refresh => "REFRESH",
            Action::RefreshNoStore => "REFRESH_NO_STORE",
        }
    }
}

/// One `pattern -> action` entry.
pub struct Rule {
    pattern: Regex,
    source: String,
    action: Action,
}

impl Rule {
    pub fn new(pattern: &str, action: Action) -> Result<Rule, regex::Error> {
        let compiled = Regex::new(pattern)?;
        Ok(Rule {
            pattern: compiled,
            source: pattern.to_string(),
            action,
        })
    }

    /// The pattern this rule was compiled from, for serialization round-trips.
    pub fn pattern(&self) -> &str {
        &self.source
    }

    pub fn action(&self) -> Action {
        self.action
    }

    fn matches(&self, url: &str) -> bool {
        self.pattern.is_match(url)
    }
}

/// An ordered, first-match-wins list of rules. Immutable once built — the
/// whole process shares one `RuleSet` without synchronization.
#[derive(Default)]
pub struct RuleSet {
    rules: Vec<Rule>,
}

impl RuleSet {
    pub fn new(rules: Vec<Rule>) -> RuleSet {
        RuleSet { rules }
    }

    /// The implicit hermetic profile: every request is `LOCKED`, so a build
    /// can never reach an origin it hasn't already recorded.
    pub fn hermetic() -> RuleSet {
        RuleSet::new(vec![Rule::new(".*", Action::Locked).expect("static pattern compiles")])
    }

    /// Evaluates `host + path` against the rules in order; `None` means no
    /// rule matched, which the filter treats identically to an explicit
    /// `REJECT`.
    pub fn evaluate(&self, url: &str) -> Option<Action> {
        self.rules.iter().find(|r| r.matches(url)).map(|r| r.action)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Rule> {
        self.rules.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_match_wins() {
        let rules = RuleSet::new(vec![
            Rule::new(".*/reject", Action::Reject).unwrap(),
            Rule::new(".*", Action::Allow).unwrap(),
        ]);
        assert_eq!(rules.evaluate("teapot/reject"), Some(Action::Reject));
        assert_eq!(rules.evaluate("teapot/allow"), Some(Action::Allow));
    }

    #[test]
    fn no_match_is_none() {
        let rules = RuleSet::new(vec![Rule::new(".*/allow", Action::Allow).unwrap()]);
        assert_eq!(rules.evaluate("teapot/other"), None);
    }

    #[test]
    fn unknown_action_fails_closed() {
        assert_eq!(Action::parse("ALLOWED"), Action::Reject);
        assert_eq!(Action::parse(""), Action::Reject);
    }

    #[test]
    fn hermetic_profile_locks_everything() {
        let rules = RuleSet::hermetic();
        assert_eq!(rules.evaluate("anything/at/all"), Some(Action::Locked));
    }
}
