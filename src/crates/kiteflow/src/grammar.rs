//! Task grammar: declarative task specs resolved into execution plans
//!
//! A task spec is a list of elements. Each element is one of:
//!
//! - a literal task name, appended as is
//! - `{ any_order: [a, b, c] }`, every name appended in a random permutation
//! - `{ one_of: [x, y] }`, exactly one name chosen at random
//!
//! Specs are grouped into named presets inside a YAML definitions file:
//!
//! ```yaml
//! presets:
//!   DAILY:
//!     - faucet
//!     - any_order: [complete_quiz, claim_badges]
//!     - one_of: [ozone_staking, ozone_ai_chat]
//! ```
//!
//! Resolution is a pure function of the task spec and the RNG handed in, so tests
//! pass a seeded `StdRng` and get reproducible plans.

use crate::error::{KiteflowError, Result};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tracing::debug;

/// One element of a task spec
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TaskElement {
    /// Single task name
    Literal(String),
    /// All names run, shuffled on every resolution
    AnyOrder { any_order: Vec<String> },
    /// Exactly one name runs, chosen on every resolution
    OneOf { one_of: Vec<String> },
}

impl TaskElement {
    /// Convenience constructor for a literal element
    pub fn literal(name: impl Into<String>) -> Self {
        Self::Literal(name.into())
    }

    /// Convenience constructor for an any-order group
    pub fn any_order<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::AnyOrder {
            any_order: names.into_iter().map(Into::into).collect(),
        }
    }

    /// Convenience constructor for an exclusive-choice group
    pub fn one_of<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::OneOf {
            one_of: names.into_iter().map(Into::into).collect(),
        }
    }

    /// Every task name this element can contribute
    pub fn names(&self) -> &[String] {
        match self {
            Self::Literal(name) => std::slice::from_ref(name),
            Self::AnyOrder { any_order } => any_order,
            Self::OneOf { one_of } => one_of,
        }
    }
}

/// Named, immutable list of task elements
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSpec {
    pub name: String,
    pub elements: Vec<TaskElement>,
}

impl TaskSpec {
    pub fn new(name: impl Into<String>, elements: Vec<TaskElement>) -> Self {
        Self {
            name: name.into(),
            elements,
        }
    }

    /// All task names referenced anywhere in the task spec, deduplicated
    pub fn referenced_names(&self) -> BTreeSet<&str> {
        self.elements
            .iter()
            .flat_map(|element| element.names())
            .map(String::as_str)
            .collect()
    }
}

/// Concrete ordered task sequence for one execution of one account
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionPlan {
    tasks: Vec<String>,
}

impl ExecutionPlan {
    pub fn new(tasks: Vec<String>) -> Self {
        Self { tasks }
    }

    pub fn tasks(&self) -> &[String] {
        &self.tasks
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn contains(&self, task_name: &str) -> bool {
        self.tasks.iter().any(|task| task == task_name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.tasks.iter().map(String::as_str)
    }
}

impl std::fmt::Display for ExecutionPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.tasks.join(" -> "))
    }
}

/// Task definitions file: named presets of task elements
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDefinitions {
    #[serde(default)]
    pub presets: BTreeMap<String, Vec<TaskElement>>,
}

impl TaskDefinitions {
    /// Parse definitions from YAML text
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Read and parse a definitions file
    pub async fn load(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            KiteflowError::Config(format!(
                "Failed to read task definitions {}: {}",
                path.display(),
                e
            ))
        })?;
        let definitions = Self::from_yaml_str(&content)?;
        debug!(path = %path.display(), presets = definitions.presets.len(), "Loaded task definitions");
        Ok(definitions)
    }

    /// Build the account task spec from the selected presets, concatenated in
    /// selection order
    pub fn spec_for(&self, selection: &[String]) -> Result<TaskSpec> {
        if selection.is_empty() {
            return Err(KiteflowError::InvalidTaskSpec("No task presets selected".to_string()));
        }

        let mut elements = Vec::new();
        for preset in selection {
            let preset_elements = self
                .presets
                .iter()
                .find(|(name, _)| name.eq_ignore_ascii_case(preset))
                .map(|(_, elements)| elements)
                .ok_or_else(|| {
                    KiteflowError::InvalidTaskSpec(format!(
                        "Unknown task preset '{}'; available: {}",
                        preset,
                        self.presets.keys().cloned().collect::<Vec<_>>().join(", ")
                    ))
                })?;
            elements.extend(preset_elements.iter().cloned());
        }

        Ok(TaskSpec::new(selection.join("+"), elements))
    }
}

/// Validates task specs against the known task names and resolves them into
/// execution plans
#[derive(Debug, Clone)]
pub struct TaskGrammar {
    known: BTreeSet<String>,
}

impl TaskGrammar {
    /// Create a grammar that accepts the given task names
    pub fn new<I, S>(known: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            known: known.into_iter().map(Into::into).collect(),
        }
    }

    /// Check group sizes and that every name is known
    pub fn validate(&self, spec: &TaskSpec) -> Result<()> {
        for (position, element) in spec.elements.iter().enumerate() {
            match element {
                TaskElement::AnyOrder { any_order } if any_order.is_empty() => {
                    return Err(KiteflowError::InvalidTaskSpec(format!(
                        "{}: any_order group at position {} is empty",
                        spec.name, position
                    )));
                }
                TaskElement::OneOf { one_of } if one_of.is_empty() => {
                    return Err(KiteflowError::InvalidTaskSpec(format!(
                        "{}: one_of group at position {} is empty",
                        spec.name, position
                    )));
                }
                _ => {}
            }

            if let Some(unknown) = element.names().iter().find(|name| !self.known.contains(*name)) {
                return Err(KiteflowError::InvalidTaskSpec(format!(
                    "{}: unknown task '{}' at position {}",
                    spec.name, unknown, position
                )));
            }
        }
        Ok(())
    }

    /// Resolve a spec into a concrete plan
    ///
    /// Fails with `InvalidTaskSpec` before drawing from the RNG if the task spec has
    /// an empty group or an unknown name.
    pub fn resolve<R: Rng + ?Sized>(&self, spec: &TaskSpec, rng: &mut R) -> Result<ExecutionPlan> {
        self.validate(spec)?;

        let mut tasks = Vec::new();
        for element in &spec.elements {
            match element {
                TaskElement::Literal(name) => tasks.push(name.clone()),
                TaskElement::AnyOrder { any_order } => {
                    let mut group = any_order.clone();
                    group.shuffle(rng);
                    tasks.extend(group);
                }
                TaskElement::OneOf { one_of } => {
                    if let Some(choice) = one_of.choose(rng) {
                        tasks.push(choice.clone());
                    }
                }
            }
        }

        Ok(ExecutionPlan::new(tasks))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn grammar() -> TaskGrammar {
        TaskGrammar::new(["faucet", "a", "b", "x", "y", "skip"])
    }

    #[test]
    fn test_parse_yaml_presets() {
        let yaml = r#"
presets:
  DAILY:
    - faucet
    - any_order: [a, b]
    - one_of: [x, y]
"#;
        let definitions = TaskDefinitions::from_yaml_str(yaml).unwrap();
        let daily = &definitions.presets["DAILY"];

        assert_eq!(daily[0], TaskElement::literal("faucet"));
        assert_eq!(daily[1], TaskElement::any_order(["a", "b"]));
        assert_eq!(daily[2], TaskElement::one_of(["x", "y"]));
    }

    #[test]
    fn test_spec_for_concatenates_presets() {
        let mut definitions = TaskDefinitions::default();
        definitions.presets.insert("FIRST".into(), vec![TaskElement::literal("faucet")]);
        definitions.presets.insert("SECOND".into(), vec![TaskElement::one_of(["x", "y"])]);

        let spec = definitions
            .spec_for(&["first".to_string(), "SECOND".to_string()])
            .unwrap();
        assert_eq!(spec.elements.len(), 2);
        assert_eq!(spec.elements[0], TaskElement::literal("faucet"));
    }

    #[test]
    fn test_spec_for_unknown_preset() {
        let definitions = TaskDefinitions::default();
        let err = definitions.spec_for(&["MISSING".to_string()]).unwrap_err();
        assert!(matches!(err, KiteflowError::InvalidTaskSpec(_)));
    }

    #[test]
    fn test_literal_first_and_single_choice() {
        let spec = TaskSpec::new(
            "mixed",
            vec![
                TaskElement::literal("faucet"),
                TaskElement::any_order(["a", "b"]),
                TaskElement::one_of(["x", "y"]),
            ],
        );

        for seed in 0..50 {
            let mut rng = StdRng::seed_from_u64(seed);
            let plan = grammar().resolve(&spec, &mut rng).unwrap();

            assert_eq!(plan.len(), 4);
            assert_eq!(plan.tasks()[0], "faucet");
            let mut middle = plan.tasks()[1..3].to_vec();
            middle.sort();
            assert_eq!(middle, vec!["a", "b"]);
            assert!(plan.tasks()[3] == "x" || plan.tasks()[3] == "y");
        }
    }

    #[test]
    fn test_same_seed_same_plan() {
        let spec = TaskSpec::new("groups", vec![TaskElement::any_order(["a", "b", "x", "y"])]);
        let first = grammar().resolve(&spec, &mut StdRng::seed_from_u64(7)).unwrap();
        let second = grammar().resolve(&spec, &mut StdRng::seed_from_u64(7)).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_empty_group_rejected() {
        let spec = TaskSpec::new("broken", vec![TaskElement::one_of(Vec::<String>::new())]);
        let err = grammar().resolve(&spec, &mut StdRng::seed_from_u64(1)).unwrap_err();
        assert!(matches!(err, KiteflowError::InvalidTaskSpec(_)));
    }

    #[test]
    fn test_unknown_name_rejected() {
        let spec = TaskSpec::new("typo", vec![TaskElement::literal("fauset")]);
        let err = grammar().resolve(&spec, &mut StdRng::seed_from_u64(1)).unwrap_err();
        assert!(err.to_string().contains("fauset"));
    }

    #[test]
    fn test_plan_display() {
        let plan = ExecutionPlan::new(vec!["faucet".into(), "skip".into()]);
        assert_eq!(plan.to_string(), "faucet -> skip");
    }
}
