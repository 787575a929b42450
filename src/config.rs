//! Rule configuration loading.
//!
//! The on-disk format is a single `rules:` list of `{pattern, action}` pairs,
//! matching `original_source/proxy/config.go`'s YAML shape. A missing file is
//! equivalent to the empty rule set, which rejects everything.

use std::{io::Read, path::Path};

use serde::{Deserialize, Serialize};

use crate::rules::{Action, Rule, RuleSet};

#[derive(Debug, Serialize, Deserialize)]
struct RawRule {
    pattern: String,
    action: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RawConfig {
    #[serde(default)]
    rules: Vec<RawRule>,
}

/// Loads a rule set from a file path. A non-existent file is treated as an
/// empty rule set rather than an error, matching `LoadConfigFile`'s
/// `os.ErrNotExist` handling in `original_source/proxy/config.go`.
pub fn load_config_file(path: &Path) -> anyhow::Result<RuleSet> {
    match std::fs::File::open(path) {
        Ok(f) => load_config(f),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(RuleSet::default()),
        Err(e) => Err(e.into()),
    }
}

/// Loads a rule set from any reader — used directly by tests that embed a
/// fixed rule document rather than writing a temp file.
pub fn load_config<R: Read>(reader: R) -> anyhow::Result<RuleSet> {
    let raw: RawConfig = serde_yaml::from_reader(reader)?;
    let mut rules = Vec::with_capacity(raw.rules.len());
    for entry in raw.rules {
        let action = Action::parse(&entry.action);
        tracing::debug!(pattern = %entry.pattern, action = action.as_str(), "loading rule");
        rules.push(Rule::new(&entry.pattern, action)?);
    }
    Ok(RuleSet::new(rules))
}

/// Serializes a rule set back to a YAML document, for normalizing a
/// hand-edited rule file (`original_source/proxy/config.go`'s `Config.Save`).
pub fn save_config(rules: &RuleSet, path: &Path) -> anyhow::Result<()> {
    let raw = RawConfig {
        rules: rules
            .iter()
            .map(|r| RawRule {
                pattern: r.pattern().to_string(),
                action: r.action().as_str().to_string(),
            })
            .collect(),
    };
    let f = std::fs::File::create(path)?;
    serde_yaml::to_writer(f, &raw)?;
    Ok(())
}
