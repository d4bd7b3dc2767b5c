//! Step nodes: a named step with its declared metadata.

use crate::core::{RuntimeParameter, StepKind};
use crate::steps::StepLogic;
use std::collections::BTreeSet;

/// A named step registered in a pipeline.
///
/// The declared metadata is captured once, when the node is created, and
/// never changes afterwards.
#[derive(Debug, Clone)]
pub struct StepNode {
    name: String,
    logic: StepLogic,
    input_fields: BTreeSet<String>,
    output_fields: Vec<String>,
    runtime_parameters: Vec<RuntimeParameter>,
}

impl StepNode {
    /// Creates a node, reading the metadata declared by `logic`.
    #[must_use]
    pub fn new(name: impl Into<String>, logic: StepLogic) -> Self {
        Self {
            name: name.into(),
            input_fields: logic.input_fields().into_iter().collect(),
            output_fields: logic.output_fields(),
            runtime_parameters: logic.runtime_parameters(),
            logic,
        }
    }

    /// Returns the step name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the processing logic.
    #[must_use]
    pub fn logic(&self) -> &StepLogic {
        &self.logic
    }

    /// Returns the capability variant.
    #[must_use]
    pub fn kind(&self) -> StepKind {
        self.logic.kind()
    }

    /// Returns true for generator steps.
    #[must_use]
    pub fn is_generator(&self) -> bool {
        self.kind() == StepKind::Generator
    }

    /// Returns the required input fields.
    #[must_use]
    pub fn input_fields(&self) -> &BTreeSet<String> {
        &self.input_fields
    }

    /// Returns the produced output fields.
    #[must_use]
    pub fn output_fields(&self) -> &[String] {
        &self.output_fields
    }

    /// Returns the declared runtime parameters, all unset.
    #[must_use]
    pub fn runtime_parameters(&self) -> &[RuntimeParameter] {
        &self.runtime_parameters
    }

    /// Returns true if the step declares a parameter with this name.
    #[must_use]
    pub fn has_parameter(&self, name: &str) -> bool {
        self.runtime_parameters.iter().any(|p| p.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::steps::{FnTransform, LoadRecords};

    #[test]
    fn test_node_captures_metadata() {
        let logic = StepLogic::transform(
            FnTransform::new(|batch, _ctx| Ok(vec![batch]))
                .with_inputs(["text", "id"])
                .with_outputs(["label"])
                .with_parameter(RuntimeParameter::new("threshold")),
        );
        let node = StepNode::new("classify", logic);

        assert_eq!(node.name(), "classify");
        assert_eq!(node.kind(), StepKind::Transform);
        assert!(!node.is_generator());
        assert_eq!(
            node.input_fields().iter().collect::<Vec<_>>(),
            vec!["id", "text"]
        );
        assert_eq!(node.output_fields(), ["label".to_string()]);
        assert!(node.has_parameter("threshold"));
        assert!(!node.has_parameter("other"));
    }

    #[test]
    fn test_generator_node() {
        let node = StepNode::new("load", StepLogic::generator(LoadRecords::new(Vec::new(), 1)));
        assert!(node.is_generator());
        assert!(node.input_fields().is_empty());
        assert!(node.has_parameter(LoadRecords::BATCH_SIZE_PARAM));
    }
}
