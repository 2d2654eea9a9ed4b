//! Persistence of typed parameter values.

use std::sync::Arc;

use taskpod_core::{
    Parameter, ParameterDirection, ParameterValue, RunId, Task, TypePersistence, TypedValue,
};

use crate::error::PersistenceError;
use crate::persistence::TypePersistenceRepository;

/// Gives the parameter types their persistence repository.
#[derive(Clone)]
pub struct TypeContext {
    parameters: Arc<dyn TypePersistenceRepository>,
}

impl TypeContext {
    pub fn new(parameters: Arc<dyn TypePersistenceRepository>) -> Self {
        Self { parameters }
    }

    /// Upsert the input row for `value` and render it.
    pub async fn persist_provision(
        &self,
        run_id: &RunId,
        input: &Parameter,
        value: &TypedValue,
    ) -> Result<ParameterValue, PersistenceError> {
        self.persist(run_id, input, ParameterDirection::Input, value)
            .await
    }

    /// Upsert the output row for `value` and render it.
    pub async fn persist_result(
        &self,
        run_id: &RunId,
        output: &Parameter,
        value: &TypedValue,
    ) -> Result<ParameterValue, PersistenceError> {
        self.persist(run_id, output, ParameterDirection::Output, value)
            .await
    }

    /// Upsert a row for an output that lives only in storage.
    pub async fn persist_stored_result(
        &self,
        run_id: &RunId,
        output: &Parameter,
    ) -> Result<ParameterValue, PersistenceError> {
        let record =
            output
                .parameter_type
                .storage_record(run_id, &output.name, ParameterDirection::Output);
        let response = output.parameter_type.build_response_from_record(&record);
        self.parameters.upsert_parameter(record).await?;
        Ok(response)
    }

    async fn persist(
        &self,
        run_id: &RunId,
        parameter: &Parameter,
        direction: ParameterDirection,
        value: &TypedValue,
    ) -> Result<ParameterValue, PersistenceError> {
        let record =
            parameter
                .parameter_type
                .persistence_record(run_id, &parameter.name, direction, value);
        self.parameters.upsert_parameter(record).await?;
        Ok(parameter
            .parameter_type
            .build_response_value(run_id, &parameter.name, value))
    }

    /// Persisted row of one parameter.
    pub async fn record(
        &self,
        run_id: &RunId,
        parameter_name: &str,
        direction: ParameterDirection,
    ) -> Result<Option<TypePersistence>, PersistenceError> {
        self.parameters
            .find_parameter(run_id, parameter_name, direction)
            .await
    }

    /// Persisted rows of one direction.
    pub async fn records(
        &self,
        run_id: &RunId,
        direction: ParameterDirection,
    ) -> Result<Vec<TypePersistence>, PersistenceError> {
        self.parameters.find_parameters(run_id, direction).await
    }

    /// Render every persisted row of `direction` that the task still declares.
    pub async fn values(
        &self,
        task: &Task,
        run_id: &RunId,
        direction: ParameterDirection,
    ) -> Result<Vec<ParameterValue>, PersistenceError> {
        let declared = match direction {
            ParameterDirection::Input => &task.inputs,
            ParameterDirection::Output => &task.outputs,
        };
        Ok(self
            .records(run_id, direction)
            .await?
            .iter()
            .filter_map(|record| {
                declared
                    .iter()
                    .find(|p| p.name == record.parameter_name)
                    .map(|p| p.parameter_type.build_response_from_record(record))
            })
            .collect())
    }

    /// Returns true once every required input of `task` has a row.
    pub async fn all_required_provisioned(
        &self,
        task: &Task,
        run_id: &RunId,
    ) -> Result<bool, PersistenceError> {
        let rows = self.records(run_id, ParameterDirection::Input).await?;
        Ok(task
            .required_inputs()
            .all(|input| rows.iter().any(|row| row.parameter_name == input.name)))
    }
}
