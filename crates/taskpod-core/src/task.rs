//! Task definitions and their parameter declarations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{CoreError, ParameterType, TaskId};

const DERIVED_FROM_PREFIX: &str = "inputs/";

/// Author listed in a task descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    pub first_name: String,
    pub last_name: String,
    pub organization: String,
    pub email: String,
    pub is_contact: bool,
}

/// An input or output declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    pub display_name: String,
    pub description: String,
    #[serde(default)]
    pub optional: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<serde_json::Value>,
    #[serde(rename = "type")]
    pub parameter_type: ParameterType,
    /// Name of the input this output reuses. Resolved when the task is built.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub derived_from: Option<String>,
}

impl Parameter {
    /// A required parameter whose display name is its name.
    pub fn new(name: impl Into<String>, parameter_type: ParameterType) -> Self {
        let name = name.into();
        Self {
            display_name: name.clone(),
            name,
            description: String::new(),
            optional: false,
            default_value: None,
            parameter_type,
            derived_from: None,
        }
    }

    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = display_name.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn with_default(mut self, value: serde_json::Value) -> Self {
        self.default_value = Some(value);
        self
    }

    /// Reuse an input's value; `inputs/<name>` or `<name>`.
    pub fn derived_from(mut self, input: impl Into<String>) -> Self {
        self.derived_from = Some(input.into());
        self
    }

    /// Case-insensitive name comparison.
    pub fn is_named(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }
}

/// An immutable task definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub name: String,
    pub name_short: String,
    pub namespace: String,
    pub version: String,
    pub description: String,
    pub authors: Vec<Author>,
    /// Storage holding the task bundle.
    pub storage_reference: String,
    pub image_name: String,
    /// Mount point of the inputs inside the task container.
    pub input_folder: String,
    /// Mount point of the outputs inside the task container.
    pub output_folder: String,
    pub created_at: DateTime<Utc>,
    pub inputs: Vec<Parameter>,
    pub outputs: Vec<Parameter>,
}

impl Task {
    pub fn builder(namespace: impl Into<String>, version: impl Into<String>) -> TaskBuilder {
        TaskBuilder::new(namespace, version)
    }

    pub fn find_input(&self, name: &str) -> Option<&Parameter> {
        self.inputs.iter().find(|p| p.is_named(name))
    }

    pub fn find_output(&self, name: &str) -> Option<&Parameter> {
        self.outputs.iter().find(|p| p.is_named(name))
    }

    /// Inputs that must be provisioned before the run can start.
    pub fn required_inputs(&self) -> impl Iterator<Item = &Parameter> {
        self.inputs.iter().filter(|p| !p.optional)
    }

    pub fn description(&self) -> TaskDescription {
        TaskDescription {
            id: self.id.clone(),
            name: self.name.clone(),
            namespace: self.namespace.clone(),
            version: self.version.clone(),
            description: self.description.clone(),
            authors: self.authors.clone(),
        }
    }
}

/// Summary of a task returned alongside its runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDescription {
    pub id: TaskId,
    pub name: String,
    pub namespace: String,
    pub version: String,
    pub description: String,
    pub authors: Vec<Author>,
}

/// Builder for [`Task`].
#[derive(Debug, Clone)]
pub struct TaskBuilder {
    id: Option<TaskId>,
    namespace: String,
    version: String,
    name: String,
    name_short: String,
    description: String,
    authors: Vec<Author>,
    image_name: Option<String>,
    input_folder: String,
    output_folder: String,
    inputs: Vec<Parameter>,
    outputs: Vec<Parameter>,
}

impl TaskBuilder {
    pub fn new(namespace: impl Into<String>, version: impl Into<String>) -> Self {
        let namespace = namespace.into();
        Self {
            id: None,
            name: namespace.clone(),
            name_short: namespace.clone(),
            namespace,
            version: version.into(),
            description: String::new(),
            authors: Vec::new(),
            image_name: None,
            input_folder: "/inputs".to_string(),
            output_folder: "/outputs".to_string(),
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }

    /// Builder method to set a specific ID (useful for testing).
    pub fn id(mut self, id: TaskId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn name_short(mut self, name_short: impl Into<String>) -> Self {
        self.name_short = name_short.into();
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn author(mut self, author: Author) -> Self {
        self.authors.push(author);
        self
    }

    pub fn image_name(mut self, image_name: impl Into<String>) -> Self {
        self.image_name = Some(image_name.into());
        self
    }

    pub fn input_folder(mut self, folder: impl Into<String>) -> Self {
        self.input_folder = folder.into();
        self
    }

    pub fn output_folder(mut self, folder: impl Into<String>) -> Self {
        self.output_folder = folder.into();
        self
    }

    pub fn input(mut self, parameter: Parameter) -> Self {
        self.inputs.push(parameter);
        self
    }

    pub fn output(mut self, parameter: Parameter) -> Self {
        self.outputs.push(parameter);
        self
    }

    /// Check names and resolve `derived_from` references.
    pub fn build(self) -> Result<Task, CoreError> {
        ensure_unique(&self.inputs)?;
        ensure_unique(&self.outputs)?;

        let mut outputs = self.outputs;
        for output in &mut outputs {
            let Some(reference) = output.derived_from.take() else {
                continue;
            };
            let wanted = reference
                .strip_prefix(DERIVED_FROM_PREFIX)
                .unwrap_or(&reference);
            let input = self.inputs.iter().find(|p| p.is_named(wanted)).ok_or_else(|| {
                CoreError::UnresolvedDerivedFrom {
                    output: output.name.clone(),
                    input: reference.clone(),
                }
            })?;
            output.derived_from = Some(input.name.clone());
        }

        let id = self.id.unwrap_or_else(TaskId::generate);
        let image_name = self
            .image_name
            .unwrap_or_else(|| format!("{}:{}", self.namespace, self.version));
        Ok(Task {
            storage_reference: format!("task-{id}-def"),
            id,
            name: self.name,
            name_short: self.name_short,
            namespace: self.namespace,
            version: self.version,
            description: self.description,
            authors: self.authors,
            image_name,
            input_folder: self.input_folder,
            output_folder: self.output_folder,
            created_at: Utc::now(),
            inputs: self.inputs,
            outputs,
        })
    }
}

fn ensure_unique(parameters: &[Parameter]) -> Result<(), CoreError> {
    for (index, parameter) in parameters.iter().enumerate() {
        if parameters[..index].iter().any(|p| p.is_named(&parameter.name)) {
            return Err(CoreError::DuplicateParameter(parameter.name.clone()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ImageType, IntegerType};

    fn image() -> ParameterType {
        ParameterType::Image(ImageType::default())
    }

    #[test]
    fn test_build_defaults() {
        let task = Task::builder("com.example.segment", "1.0.0")
            .id(TaskId::new("t1"))
            .input(Parameter::new("image", image()))
            .build()
            .unwrap();
        assert_eq!(task.storage_reference, "task-t1-def");
        assert_eq!(task.image_name, "com.example.segment:1.0.0");
        assert_eq!(task.input_folder, "/inputs");
        assert_eq!(task.description().namespace, "com.example.segment");
    }

    #[test]
    fn test_duplicate_names_are_case_insensitive() {
        let err = Task::builder("ns", "1")
            .input(Parameter::new("Image", image()))
            .input(Parameter::new("image", image()))
            .build()
            .unwrap_err();
        assert_eq!(err, CoreError::DuplicateParameter("image".to_string()));
    }

    #[test]
    fn test_derived_from_resolution() {
        let task = Task::builder("ns", "1")
            .input(Parameter::new("Image", image()))
            .output(Parameter::new("overlay", image()).derived_from("inputs/image"))
            .build()
            .unwrap();
        assert_eq!(
            task.find_output("OVERLAY").and_then(|p| p.derived_from.as_deref()),
            Some("Image")
        );

        let err = Task::builder("ns", "1")
            .input(Parameter::new("image", image()))
            .output(Parameter::new("overlay", image()).derived_from("mask"))
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            CoreError::UnresolvedDerivedFrom {
                output: "overlay".to_string(),
                input: "mask".to_string(),
            }
        );
    }

    #[test]
    fn test_required_inputs() {
        let integer = ParameterType::Integer(IntegerType::default());
        let task = Task::builder("ns", "1")
            .input(Parameter::new("a", integer.clone()))
            .input(Parameter::new("b", integer).optional())
            .build()
            .unwrap();
        let required: Vec<_> = task.required_inputs().map(|p| p.name.as_str()).collect();
        assert_eq!(required, vec!["a"]);
        assert!(task.find_input("B").is_some());
    }
}
