//! The user configuration document (`.opencorps.yml`).
//!
//! Schema version 1:
//!
//! ```yaml
//! schema_version: [1]
//! simulation:
//!   fusesoc_vunit: [my_core]      # exactly one entry
//!   vunit: [run.py, more.py]      # one or more entries
//! synthesis:
//!   fusesoc: [my_core]            # exactly one entry
//!   targets: [altera, xilinx]     # subset of {altera, xilinx}
//! documentation: [docs/index.rst] # exactly one entry
//! ```
//!
//! Validation is a pure walk over the parsed `serde_yaml::Value` tree and
//! fails closed: unknown keys anywhere are schema errors.

use serde::Serialize;
use serde_yaml::Value;

use crate::error::CoreFileError;

// ---------------------------------------------------------------------------
// Schema
// ---------------------------------------------------------------------------

enum Rule {
    /// Leaf value checked by a predicate; the string describes the rule.
    Check(&'static str, fn(&Value) -> bool),
    /// Nested section. A mapping is checked key by key; a list must only
    /// name keys of the section.
    Section(&'static [(&'static str, Rule)]),
}

static SCHEMA_V1: &[(&str, Rule)] = &[
    ("schema_version", Rule::Check("must equal [1]", is_version_one)),
    (
        "simulation",
        Rule::Section(&[
            ("fusesoc_vunit", Rule::Check("needs exactly one entry", exactly_one)),
            ("vunit", Rule::Check("needs one or more entries", at_least_one)),
        ]),
    ),
    (
        "synthesis",
        Rule::Section(&[
            ("fusesoc", Rule::Check("needs exactly one entry", exactly_one)),
            (
                "targets",
                Rule::Section(&[("altera", Rule::Section(&[])), ("xilinx", Rule::Section(&[]))]),
            ),
        ]),
    ),
    ("documentation", Rule::Check("needs exactly one entry", exactly_one)),
];

fn is_version_one(v: &Value) -> bool {
    matches!(v.as_sequence().map(Vec::as_slice), Some([n]) if n.as_u64() == Some(1))
}

fn string_list(v: &Value) -> Option<Vec<&str>> {
    v.as_sequence()?.iter().map(Value::as_str).collect()
}

fn exactly_one(v: &Value) -> bool {
    string_list(v).is_some_and(|items| items.len() == 1)
}

fn at_least_one(v: &Value) -> bool {
    string_list(v).is_some_and(|items| !items.is_empty())
}

fn schema_err(msg: String) -> CoreFileError {
    CoreFileError::Schema(msg)
}

fn check_section(
    rules: &[(&'static str, Rule)],
    value: &Value,
    path: &str,
) -> Result<(), CoreFileError> {
    match value {
        Value::Mapping(map) => {
            for (key, item) in map {
                let name = key
                    .as_str()
                    .ok_or_else(|| schema_err(format!("non-string key {key:?} in {path}")))?;
                let full = if path.is_empty() {
                    name.to_owned()
                } else {
                    format!("{path}.{name}")
                };
                let rule = rules
                    .iter()
                    .find(|(n, _)| *n == name)
                    .map(|(_, r)| r)
                    .ok_or_else(|| schema_err(format!("unsupported section {full}")))?;
                match rule {
                    Rule::Check(desc, pred) => {
                        if !pred(item) {
                            return Err(schema_err(format!("{full} {desc}, got {item:?}")));
                        }
                    }
                    Rule::Section(children) => check_section(children, item, &full)?,
                }
            }
            Ok(())
        }
        Value::Sequence(items) if !path.is_empty() => {
            for item in items {
                let name = item.as_str().unwrap_or_default();
                if !rules.iter().any(|(n, _)| *n == name) {
                    return Err(schema_err(format!("unsupported value {item:?} for section {path}")));
                }
            }
            Ok(())
        }
        _ if path.is_empty() => Err(schema_err("document must be a mapping".to_owned())),
        _ => Err(schema_err(format!("{path} must be a mapping or a list"))),
    }
}

// ---------------------------------------------------------------------------
// CoreFile
// ---------------------------------------------------------------------------

/// A parsed and validated configuration document.
#[derive(Debug, Clone, PartialEq)]
pub struct CoreFile {
    document: Value,
}

impl CoreFile {
    /// Parse and validate `text`.
    ///
    /// Returns [`CoreFileError::Syntax`] for unparsable input and
    /// [`CoreFileError::Schema`] for anything outside schema version 1.
    pub fn parse(text: &str) -> Result<Self, CoreFileError> {
        let document: Value =
            serde_yaml::from_str(text).map_err(|e| CoreFileError::Syntax(e.to_string()))?;
        check_section(SCHEMA_V1, &document, "")?;
        Ok(Self { document })
    }

    /// Template variables derived from the document.
    pub fn template_vars(&self) -> TemplateVars {
        let mut vars = TemplateVars::default();

        if let Some(sim) = self.document.get("simulation") {
            if has(sim, "fusesoc_vunit") {
                vars.fusesoc = true;
                vars.vunit = true;
                if let Some(core) = sim.get("fusesoc_vunit").and_then(string_list) {
                    if let Some(first) = core.first() {
                        vars.environment_variables.push(format!("CORE={first}"));
                    }
                }
            }
            if has(sim, "vunit") {
                vars.vunit = true;
                if let Some(scripts) = sim.get("vunit").and_then(string_list) {
                    vars.environment_variables
                        .push(format!("VUNIT_SCRIPTFILES=\"{}\"", scripts.join(" ")));
                }
            }
        }

        if let Some(targets) = self.document.get("synthesis").and_then(|s| s.get("targets")) {
            vars.quartus = has(targets, "altera");
            vars.vivado = has(targets, "xilinx");
        }
        vars
    }
}

fn has(section: &Value, name: &str) -> bool {
    match section {
        Value::Mapping(map) => map.contains_key(name),
        Value::Sequence(items) => items.iter().any(|v| v.as_str() == Some(name)),
        _ => false,
    }
}

/// Named inputs for the CI template.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TemplateVars {
    pub fusesoc: bool,
    pub vunit: bool,
    pub quartus: bool,
    pub vivado: bool,
    /// `NAME=value` pairs exported to every CI job.
    pub environment_variables: Vec<String>,
}

impl TemplateVars {
    /// Project tags implied by the enabled tooling.
    pub fn tags(&self) -> Vec<&'static str> {
        [
            ("fusesoc", self.fusesoc),
            ("vunit", self.vunit),
            ("quartus", self.quartus),
            ("vivado", self.vivado),
        ]
        .into_iter()
        .filter_map(|(tag, on)| on.then_some(tag))
        .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn minimal_vunit_document_validates() {
        let core = CoreFile::parse("schema_version: [1]\nsimulation:\n  vunit: [a.py]\n")
            .expect("valid");
        let vars = core.template_vars();
        assert!(vars.vunit);
        assert!(!vars.fusesoc);
        assert_eq!(vars.environment_variables, vec!["VUNIT_SCRIPTFILES=\"a.py\""]);
    }

    #[test]
    fn unknown_top_level_section_is_schema_error() {
        let err = CoreFile::parse("schema_version: [1]\nbogus: {}\n").unwrap_err();
        assert_eq!(err, CoreFileError::Schema("unsupported section bogus".into()));
    }

    #[test]
    fn unparsable_input_is_syntax_error() {
        let err = CoreFile::parse("schema_version: [1\nsimulation: {").unwrap_err();
        assert!(matches!(err, CoreFileError::Syntax(_)), "got {err:?}");
    }

    #[rstest]
    #[case("schema_version: [2]\n")]
    #[case("schema_version: 1\n")]
    #[case("simulation:\n  fusesoc_vunit: [a, b]\n")]
    #[case("simulation:\n  vunit: []\n")]
    #[case("simulation:\n  verilator: [x]\n")]
    #[case("synthesis:\n  targets: [altera, lattice]\n")]
    #[case("synthesis:\n  targets: {altera: {speed: 1}}\n")]
    #[case("documentation: [a, b]\n")]
    #[case("documentation: index.rst\n")]
    #[case("- just\n- a list\n")]
    #[case("simulation: vunit\n")]
    fn schema_violations(#[case] text: &str) {
        let err = CoreFile::parse(text).unwrap_err();
        assert!(matches!(err, CoreFileError::Schema(_)), "{text:?} gave {err:?}");
    }

    #[test]
    fn full_document_derives_all_variables() {
        let text = "\
schema_version: [1]
simulation:
  fusesoc_vunit: [uart]
  vunit: [run.py, more.py]
synthesis:
  fusesoc: [uart]
  targets: [altera, xilinx]
documentation: [docs/index.rst]
";
        let vars = CoreFile::parse(text).expect("valid").template_vars();
        assert!(vars.fusesoc && vars.vunit && vars.quartus && vars.vivado);
        assert_eq!(
            vars.environment_variables,
            vec!["CORE=uart", "VUNIT_SCRIPTFILES=\"run.py more.py\""]
        );
        assert_eq!(vars.tags(), vec!["fusesoc", "vunit", "quartus", "vivado"]);
    }

    #[test]
    fn targets_may_be_a_mapping() {
        let vars = CoreFile::parse("synthesis:\n  targets: {xilinx: {}}\n")
            .expect("valid")
            .template_vars();
        assert!(vars.vivado);
        assert!(!vars.quartus);
    }
}
