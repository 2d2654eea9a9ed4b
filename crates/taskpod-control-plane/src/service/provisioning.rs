//! Provisioning of run inputs and reconciliation of run results.
//!
//! Every call loads the run and its task and checks the run state. Inputs go
//! through validate → store → persist; outputs through validate → persist → store. Run state changes go through
//! guarded updates in the run repository, so a late pod event and an API call
//! can never both win.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use taskpod_core::{
    Charset, CoreError, DesiredState, EntryId, Parameter, ParameterDirection, ParameterValue,
    Provision, RawValue, Run, RunId, RunState, StateGuard, StorageData, StorageDataEntry, Task,
    TypeValidationError, TypedValue, ValidationCode,
};

use crate::archive::{self, ArchiveBuilder, ArchiveEntry, ArchiveError};
use crate::error::{AppError, ErrorCode, PersistenceError, ProvisioningError, StorageError};
use crate::persistence::{RunRepository, TaskRepository};
use crate::scheduler::{Schedule, Scheduler};
use crate::service::{StateAction, TaskRunResponse, TypeContext};
use crate::storage::FileStorageHandler;

/// States in which the orchestrator owns the run and results may arrive.
const SCHEDULER_MANAGED: &[RunState] = &[RunState::Queuing, RunState::Queued, RunState::Running];

/// Drives runs from provisioning to their results.
pub struct ProvisioningService {
    runs: Arc<dyn RunRepository>,
    tasks: Arc<dyn TaskRepository>,
    storage: Arc<dyn FileStorageHandler>,
    scheduler: Arc<dyn Scheduler>,
    types: TypeContext,
    charset: Charset,
}

impl ProvisioningService {
    pub fn new(
        runs: Arc<dyn RunRepository>,
        tasks: Arc<dyn TaskRepository>,
        storage: Arc<dyn FileStorageHandler>,
        scheduler: Arc<dyn Scheduler>,
        types: TypeContext,
        charset: Charset,
    ) -> Self {
        Self {
            runs,
            tasks,
            storage,
            scheduler,
            types,
            charset,
        }
    }

    async fn load(&self, run_id: &RunId) -> Result<(Run, Task), ProvisioningError> {
        let run = self
            .runs
            .find_run(run_id)
            .await?
            .ok_or(ErrorCode::RunNotFound)?;
        let task = self
            .tasks
            .find_task(&run.task_id)
            .await?
            .ok_or(ErrorCode::TaskNotFound)?;
        Ok((run, task))
    }

    async fn load_provisionable(&self, run_id: &RunId) -> Result<(Run, Task), ProvisioningError> {
        let (run, task) = self.load(run_id).await?;
        if !run.state.accepts_provisioning() {
            return Err(invalid_state(&run, "provision inputs"));
        }
        Ok((run, task))
    }

    pub async fn retrieve_run(&self, run_id: &RunId) -> Result<TaskRunResponse, ProvisioningError> {
        let (run, task) = self.load(run_id).await?;
        Ok(TaskRunResponse::new(&run, &task))
    }

    /// Provision one input.
    pub async fn provision_parameter(
        &self,
        run_id: &RunId,
        provision: Provision,
    ) -> Result<ParameterValue, ProvisioningError> {
        let (run, task) = self.load_provisionable(run_id).await?;
        let (input, value) = self.validate_provision(&task, &provision)?;
        let response = self.write_input(&run, input, &value).await?;
        self.refresh_provisioned(&run, &task).await?;
        Ok(response)
    }

    /// Provision one file-like input from uploaded bytes.
    pub async fn provision_binary(
        &self,
        run_id: &RunId,
        parameter_name: &str,
        bytes: Vec<u8>,
    ) -> Result<ParameterValue, ProvisioningError> {
        self.provision_parameter(run_id, Provision::new(parameter_name, bytes))
            .await
    }

    /// Provision several inputs at once.
    ///
    /// Every provision is validated before anything is written; on failure the
    /// error lists each rejected parameter. A storage failure while writing
    /// aborts the call and leaves earlier writes of the batch in place.
    pub async fn provision_parameters(
        &self,
        run_id: &RunId,
        provisions: Vec<Provision>,
    ) -> Result<Vec<ParameterValue>, ProvisioningError> {
        let (run, task) = self.load_provisionable(run_id).await?;

        let mut accepted = Vec::with_capacity(provisions.len());
        let mut errors = Vec::new();
        for provision in &provisions {
            match self.validate_provision(&task, provision) {
                Ok(item) => accepted.push(item),
                Err(e) => errors.push(e),
            }
        }
        if !errors.is_empty() {
            warn!(run_id = %run.id, failed = errors.len(), "Rejected provisions");
            return Err(ProvisioningError::Batch(errors));
        }

        let mut responses = Vec::with_capacity(accepted.len());
        for (input, value) in accepted {
            responses.push(self.write_input(&run, input, &value).await?);
        }
        self.refresh_provisioned(&run, &task).await?;
        Ok(responses)
    }

    fn validate_provision<'t>(
        &self,
        task: &'t Task,
        provision: &Provision,
    ) -> Result<(&'t Parameter, TypedValue), AppError> {
        let name = provision.parameter_name.as_str();
        let input = task
            .find_input(name)
            .ok_or_else(|| AppError::for_parameter(ErrorCode::ParameterDoesNotExist, name, None))?;
        match input
            .parameter_type
            .validate(Some(&provision.value), self.charset)
        {
            Ok(Some(value)) => Ok((input, value)),
            Ok(None) => Err(AppError::for_parameter(
                ErrorCode::JsonProcessing,
                &input.name,
                Some("no value provided".to_string()),
            )),
            Err(e) => Err(AppError::validation(&input.name, &e)),
        }
    }

    async fn write_input(
        &self,
        run: &Run,
        input: &Parameter,
        value: &TypedValue,
    ) -> Result<ParameterValue, ProvisioningError> {
        let data = input
            .parameter_type
            .map_to_storage_file_data(&input.name, value, self.charset);
        self.save(&run.id.inputs_storage_id(), &input.name, &data)
            .await?;
        let response = self.types.persist_provision(&run.id, input, value).await?;
        info!(run_id = %run.id, parameter = %input.name, "Input provisioned");
        Ok(response)
    }

    /// Move a CREATED run to PROVISIONED once every required input has a value.
    async fn refresh_provisioned(&self, run: &Run, task: &Task) -> Result<(), ProvisioningError> {
        if !self.types.all_required_provisioned(task, &run.id).await? {
            return Ok(());
        }
        match self
            .runs
            .update_state(
                &run.id,
                StateGuard::Exactly(RunState::Created),
                RunState::Provisioned,
            )
            .await
        {
            Ok(_) => info!(run_id = %run.id, "All required inputs provisioned"),
            Err(PersistenceError::StateConflict { current, .. }) => {
                debug!(run_id = %run.id, state = %current, "Run already past CREATED")
            }
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }

    async fn save(
        &self,
        storage_id: &str,
        parameter_name: &str,
        data: &StorageData,
    ) -> Result<(), AppError> {
        self.storage.save(storage_id, data).await.map_err(|e| {
            error!(
                storage_id = %storage_id,
                parameter = %parameter_name,
                error = %e,
                "Failed to store parameter"
            );
            storage_failed(ErrorCode::StorageStoringFailed, parameter_name, &e)
        })
    }

    async fn read(&self, storage_id: &str, parameter_name: &str) -> Result<StorageData, AppError> {
        self.storage
            .read(storage_id, parameter_name)
            .await
            .map_err(|e| {
                error!(
                    storage_id = %storage_id,
                    parameter = %parameter_name,
                    error = %e,
                    "Failed to read parameter"
                );
                storage_failed(ErrorCode::StorageReadingFailed, parameter_name, &e)
            })
    }

    /// Values of all provisioned inputs. The run must be past CREATED.
    pub async fn retrieve_inputs(
        &self,
        run_id: &RunId,
    ) -> Result<Vec<ParameterValue>, ProvisioningError> {
        let (run, task) = self.load(run_id).await?;
        if run.state == RunState::Created {
            return Err(invalid_state(&run, "retrieve inputs"));
        }
        Ok(self
            .types
            .values(&task, &run.id, ParameterDirection::Input)
            .await?)
    }

    /// Values of all outputs. The run must be FINISHED.
    pub async fn retrieve_outputs(
        &self,
        run_id: &RunId,
    ) -> Result<Vec<ParameterValue>, ProvisioningError> {
        let (run, task) = self.load(run_id).await?;
        if run.state != RunState::Finished {
            return Err(invalid_state(&run, "retrieve outputs"));
        }
        Ok(self
            .types
            .values(&task, &run.id, ParameterDirection::Output)
            .await?)
    }

    /// Zip of every provisioned input. The run must be past CREATED.
    pub async fn retrieve_inputs_archive(&self, run_id: &RunId) -> Result<Vec<u8>, ProvisioningError> {
        let (run, _) = self.load(run_id).await?;
        if run.state == RunState::Created {
            return Err(invalid_state(&run, "retrieve inputs"));
        }
        self.build_archive(&run, ParameterDirection::Input).await
    }

    /// Zip of every output. The run must be FINISHED.
    pub async fn retrieve_outputs_archive(&self, run_id: &RunId) -> Result<Vec<u8>, ProvisioningError> {
        let (run, _) = self.load(run_id).await?;
        if run.state != RunState::Finished {
            return Err(invalid_state(&run, "retrieve outputs"));
        }
        self.build_archive(&run, ParameterDirection::Output).await
    }

    async fn build_archive(
        &self,
        run: &Run,
        direction: ParameterDirection,
    ) -> Result<Vec<u8>, ProvisioningError> {
        let records = self.types.records(&run.id, direction).await?;
        if records.is_empty() && direction == ParameterDirection::Input {
            return Err(ErrorCode::ProvisionsNotFound.into());
        }

        let storage_id = direction.storage_id(&run.id);
        let mut builder = ArchiveBuilder::new();
        for record in &records {
            let data = self.read(&storage_id, &record.parameter_name).await?;
            builder.add_storage_data(&data).map_err(archive_failed)?;
        }
        let bytes = builder.finish().map_err(archive_failed)?;
        info!(
            run_id = %run.id,
            direction = ?direction,
            parameters = records.len(),
            "Archive built"
        );
        Ok(bytes)
    }

    /// Stored bytes of one parameter. A directory value comes back as a zip.
    pub async fn retrieve_single_io(
        &self,
        run_id: &RunId,
        parameter_name: &str,
        direction: ParameterDirection,
    ) -> Result<Vec<u8>, ProvisioningError> {
        let (run, task) = self.load(run_id).await?;
        let parameter = match direction {
            ParameterDirection::Input => task.find_input(parameter_name),
            ParameterDirection::Output => task.find_output(parameter_name),
        }
        .ok_or_else(|| {
            AppError::for_parameter(ErrorCode::ParameterDoesNotExist, parameter_name, None)
        })?;

        if self
            .types
            .record(&run.id, &parameter.name, direction)
            .await?
            .is_none()
        {
            return Err(
                AppError::for_parameter(ErrorCode::ProvisionsNotFound, &parameter.name, None).into(),
            );
        }
        let data = self
            .read(&direction.storage_id(&run.id), &parameter.name)
            .await?;
        let Some(root) = data.peek() else {
            return Err(AppError::for_parameter(
                ErrorCode::StorageReadingFailed,
                &parameter.name,
                None,
            )
            .into());
        };
        if let Some(bytes) = root.data() {
            return Ok(bytes.to_vec());
        }

        let mut builder = ArchiveBuilder::new();
        builder.add_storage_data(&data).map_err(archive_failed)?;
        Ok(builder.finish().map_err(archive_failed)?)
    }

    /// Request a state change. Only PROVISIONED and RUNNING may be requested.
    pub async fn update_run_state(
        &self,
        run_id: &RunId,
        desired: &str,
    ) -> Result<StateAction, ProvisioningError> {
        let (run, task) = self.load(run_id).await?;
        let desired: DesiredState = desired.parse().map_err(|e: CoreError| AppError {
            message: e.to_string(),
            ..AppError::new(ErrorCode::UnknownState)
        })?;

        let updated = match desired {
            DesiredState::Provisioned => {
                self.runs
                    .update_state(
                        &run.id,
                        StateGuard::Exactly(RunState::Created),
                        RunState::Provisioned,
                    )
                    .await?
            }
            DesiredState::Running => {
                if run.state != RunState::Provisioned {
                    return Err(AppError {
                        message: format!("run is {}, not PROVISIONED", run.state),
                        ..AppError::new(ErrorCode::NotProvisioned)
                    }
                    .into());
                }
                // Claim the run before dispatching so it is scheduled once.
                let queuing = self
                    .runs
                    .update_state(
                        &run.id,
                        StateGuard::Exactly(RunState::Provisioned),
                        RunState::Queuing,
                    )
                    .await?;
                if let Err(e) = self.scheduler.schedule(Schedule::new(&queuing, &task)).await {
                    return Err(self.fail_run(&run.id, e.into()).await);
                }
                queuing
            }
        };

        info!(run_id = %updated.id, state = %updated.state, "Run state updated");
        Ok(StateAction::success(TaskRunResponse::new(&updated, &task)))
    }

    /// Reconcile a results archive against the declared outputs.
    ///
    /// Any failure after the archive was accepted marks the run FAILED.
    pub async fn post_outputs_archive(
        &self,
        run_id: &RunId,
        bytes: &[u8],
    ) -> Result<Vec<ParameterValue>, ProvisioningError> {
        let (run, task) = self.load(run_id).await?;
        if !run.state.is_scheduler_managed() {
            return Err(invalid_state(&run, "post outputs"));
        }

        let values = match self.reconcile_outputs(&run, &task, bytes).await {
            Ok(values) => values,
            Err(e) => return Err(self.fail_run(&run.id, e).await),
        };

        let finished = self
            .runs
            .update_state(
                &run.id,
                StateGuard::OneOf(SCHEDULER_MANAGED),
                RunState::Finished,
            )
            .await?;
        info!(run_id = %finished.id, outputs = values.len(), "Run finished");
        Ok(values)
    }

    async fn reconcile_outputs(
        &self,
        run: &Run,
        task: &Task,
        bytes: &[u8],
    ) -> Result<Vec<ParameterValue>, ProvisioningError> {
        let entries = archive::read_entries(bytes).map_err(|e| AppError {
            message: e.to_string(),
            ..AppError::new(ErrorCode::InvalidArchive)
        })?;

        let mut unmatched: Vec<&Parameter> = task.outputs.iter().collect();
        let mut trees: Vec<OutputTree<'_>> = Vec::new();
        let mut values = Vec::with_capacity(unmatched.len());

        for entry in &entries {
            if let Some(tree) = trees
                .iter_mut()
                .find(|tree| belongs_to(&tree.output.name, &entry.name))
            {
                tree.fold(entry).map_err(invalid_archive)?;
                continue;
            }

            let Some(position) = unmatched
                .iter()
                .position(|output| belongs_to(&output.name, &entry.name))
            else {
                return Err(AppError::for_parameter(
                    ErrorCode::UnknownOutput,
                    entry.name.as_str(),
                    None,
                )
                .into());
            };
            let output = unmatched.remove(position);

            if !entry.is_dir && entry.name == output.name {
                values.push(self.store_output(run, output, entry).await?);
            } else {
                let mut tree = OutputTree::new(output)?;
                tree.fold(entry).map_err(invalid_archive)?;
                trees.push(tree);
            }
        }

        if !unmatched.is_empty() {
            let names: Vec<&str> = unmatched.iter().map(|o| o.name.as_str()).collect();
            return Err(AppError {
                message: format!("missing outputs: {}", names.join(", ")),
                ..AppError::new(ErrorCode::MissingOutputs)
            }
            .into());
        }

        let storage_id = run.id.outputs_storage_id();
        for tree in trees {
            values.push(self.types.persist_stored_result(&run.id, tree.output).await?);
            self.save(&storage_id, &tree.output.name, &tree.data)
                .await?;
            debug!(
                run_id = %run.id,
                parameter = %tree.output.name,
                nodes = tree.data.node_count(),
                "Directory output stored"
            );
        }
        Ok(values)
    }

    async fn store_output(
        &self,
        run: &Run,
        output: &Parameter,
        entry: &ArchiveEntry,
    ) -> Result<ParameterValue, ProvisioningError> {
        let raw = RawValue::Binary(entry.data.clone());
        let value = output
            .parameter_type
            .validate(Some(&raw), self.charset)
            .map_err(|e| AppError::validation(&output.name, &e))?
            .ok_or_else(|| AppError::for_parameter(ErrorCode::JsonProcessing, &output.name, None))?;

        let response = self.types.persist_result(&run.id, output, &value).await?;
        let data = StorageData::from_file(output.name.clone(), entry.data.clone());
        self.save(&run.id.outputs_storage_id(), &output.name, &data)
            .await?;
        debug!(run_id = %run.id, parameter = %output.name, "Output stored");
        Ok(response)
    }

    async fn fail_run(&self, run_id: &RunId, error: ProvisioningError) -> ProvisioningError {
        warn!(run_id = %run_id, code = %error.code(), error = %error, "Failing run");
        if let Err(e) = self
            .runs
            .update_state(run_id, StateGuard::NotTerminal, RunState::Failed)
            .await
        {
            error!(run_id = %run_id, error = %e, "Failed to mark run as failed");
        }
        error
    }
}

/// Returns true if the archive entry `entry_name` is the output `name` or lies below it.
fn belongs_to(name: &str, entry_name: &str) -> bool {
    let path = entry_name.trim_end_matches('/');
    path == name
        || path
            .strip_prefix(name)
            .is_some_and(|rest| rest.starts_with('/'))
}

/// A directory output assembled from archive entries.
struct OutputTree<'t> {
    output: &'t Parameter,
    data: StorageData,
    root: EntryId,
    /// Nodes below the root by their path relative to it.
    nodes: HashMap<String, EntryId>,
}

impl<'t> OutputTree<'t> {
    fn new(output: &'t Parameter) -> Result<Self, AppError> {
        if !output.parameter_type.is_binary() {
            let error = TypeValidationError::new(
                ValidationCode::TypeMismatch,
                format!(
                    "a directory is not a {} value",
                    output.parameter_type.value_type()
                ),
            );
            return Err(AppError::validation(&output.name, &error));
        }
        let mut data = StorageData::new();
        let root = data.push_root(StorageDataEntry::directory(output.name.clone()));
        Ok(Self {
            output,
            data,
            root,
            nodes: HashMap::new(),
        })
    }

    /// Attach `entry`, creating any parent directory the archive left out.
    fn fold(&mut self, entry: &ArchiveEntry) -> Result<(), CoreError> {
        let relative = entry
            .name
            .trim_end_matches('/')
            .strip_prefix(self.output.name.as_str())
            .unwrap_or_default();
        let segments: Vec<&str> = relative.split('/').filter(|s| !s.is_empty()).collect();

        let mut parent = self.root;
        let mut key = String::new();
        for (index, segment) in segments.iter().enumerate() {
            if !key.is_empty() {
                key.push('/');
            }
            key.push_str(segment);
            if let Some(id) = self.nodes.get(&key) {
                parent = *id;
                continue;
            }
            let node = if index + 1 == segments.len() && !entry.is_dir {
                StorageDataEntry::file(*segment, entry.data.clone())
            } else {
                StorageDataEntry::directory(*segment)
            };
            parent = self.data.add_child(parent, node)?;
            self.nodes.insert(key.clone(), parent);
        }
        Ok(())
    }
}

fn invalid_state(run: &Run, operation: &str) -> ProvisioningError {
    AppError {
        message: format!("cannot {operation} while the run is {}", run.state),
        ..AppError::new(ErrorCode::InvalidTaskRunState)
    }
    .into()
}

fn storage_failed(code: ErrorCode, parameter_name: &str, error: &StorageError) -> AppError {
    AppError::for_parameter(code, parameter_name, Some(error.to_string()))
}

fn archive_failed(error: ArchiveError) -> AppError {
    AppError {
        message: error.to_string(),
        ..AppError::new(ErrorCode::Internal)
    }
}

fn invalid_archive(error: CoreError) -> AppError {
    AppError {
        message: error.to_string(),
        ..AppError::new(ErrorCode::InvalidArchive)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::{read_entries, zip_of};
    use crate::error::SchedulingError;
    use crate::persistence::TypePersistenceRepository;
    use crate::state::AppState;
    use crate::storage::FileSystemStorage;
    use crate::watcher::{PodAction, PodEvent, PodWatcher};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;
    use taskpod_core::types::{FileType, IntegerType, StringType};
    use taskpod_core::{ParameterType, PersistedValue};
    use tempfile::TempDir;

    #[derive(Default)]
    struct RecordingScheduler {
        scheduled: Mutex<Vec<Schedule>>,
        closed: bool,
    }

    #[async_trait]
    impl Scheduler for RecordingScheduler {
        async fn schedule(&self, schedule: Schedule) -> Result<(), SchedulingError> {
            if self.closed {
                return Err(SchedulingError::QueueClosed);
            }
            self.scheduled.lock().unwrap().push(schedule);
            Ok(())
        }
    }

    struct Harness {
        dir: TempDir,
        state: Arc<AppState>,
        storage: Arc<FileSystemStorage>,
        scheduler: Arc<RecordingScheduler>,
        service: ProvisioningService,
        task: Task,
    }

    impl Harness {
        async fn new(task: Task) -> Self {
            Self::with_scheduler(task, RecordingScheduler::default()).await
        }

        async fn with_scheduler(task: Task, scheduler: RecordingScheduler) -> Self {
            let dir = TempDir::new().unwrap();
            let state = AppState::new();
            let storage = Arc::new(FileSystemStorage::new(dir.path()));
            let scheduler = Arc::new(scheduler);
            state.save_task(task.clone()).await.unwrap();
            let service = ProvisioningService::new(
                state.clone(),
                state.clone(),
                storage.clone(),
                scheduler.clone(),
                TypeContext::new(state.clone()),
                Charset::Utf8,
            );
            Self {
                dir,
                state,
                storage,
                scheduler,
                service,
                task,
            }
        }

        async fn run_in(&self, run_state: RunState) -> RunId {
            let mut run = Run::new(self.task.id.clone());
            run.transition(run_state);
            let id = run.id.clone();
            self.state.save_run(run).await.unwrap();
            self.storage
                .create_storage(&id.inputs_storage_id())
                .await
                .unwrap();
            self.storage
                .create_storage(&id.outputs_storage_id())
                .await
                .unwrap();
            id
        }

        async fn state_of(&self, id: &RunId) -> RunState {
            self.state.find_run(id).await.unwrap().unwrap().state
        }
    }

    fn segmentation_task() -> Task {
        Task::builder("segmentation", "1.0.0")
            .input(Parameter::new(
                "a",
                ParameterType::Integer(IntegerType {
                    geq: Some(0),
                    ..Default::default()
                }),
            ))
            .input(Parameter::new(
                "b",
                ParameterType::Integer(IntegerType {
                    gt: Some(10),
                    ..Default::default()
                }),
            ))
            .input(Parameter::new("note", ParameterType::String(StringType::default())).optional())
            .input(Parameter::new("scan", ParameterType::File(FileType::default())).optional())
            .output(Parameter::new("mask", ParameterType::File(FileType::default())))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_outputs_finish_run() {
        let h = Harness::new(segmentation_task()).await;
        let id = h.run_in(RunState::Running).await;

        let values = h
            .service
            .post_outputs_archive(&id, &zip_of(&[("mask", [1u8, 2, 3])]))
            .await
            .unwrap();
        assert_eq!(values.len(), 1);
        assert_eq!(values[0].parameter_name, "mask");
        assert_eq!(h.state_of(&id).await, RunState::Finished);

        let outputs = h.service.retrieve_outputs(&id).await.unwrap();
        assert_eq!(outputs.len(), 1);
        let bytes = h
            .service
            .retrieve_single_io(&id, "MASK", ParameterDirection::Output)
            .await
            .unwrap();
        assert_eq!(bytes, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_unknown_output_fails_run() {
        let h = Harness::new(segmentation_task()).await;
        let id = h.run_in(RunState::Queued).await;

        let archive = zip_of(&[("unexpected", b"x"), ("mask", b"y")]);
        let err = h.service.post_outputs_archive(&id, &archive).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::UnknownOutput);
        assert_eq!(err.errors()[0].parameter(), Some("unexpected"));
        assert_eq!(h.state_of(&id).await, RunState::Failed);

        // Processing stopped at the first entry.
        let mask = h
            .state
            .find_parameter(&id, "mask", ParameterDirection::Output)
            .await
            .unwrap();
        assert!(mask.is_none());
    }

    #[tokio::test]
    async fn test_missing_outputs_fail_run() {
        let h = Harness::new(segmentation_task()).await;
        let id = h.run_in(RunState::Running).await;

        let err = h
            .service
            .post_outputs_archive(&id, &zip_of::<&str>(&[]))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::MissingOutputs);
        assert_eq!(h.state_of(&id).await, RunState::Failed);
    }

    #[tokio::test]
    async fn test_outputs_rejected_outside_orchestrator_states() {
        let h = Harness::new(segmentation_task()).await;
        let id = h.run_in(RunState::Provisioned).await;

        let err = h
            .service
            .post_outputs_archive(&id, &zip_of(&[("mask", b"y")]))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidTaskRunState);
        assert_eq!(h.state_of(&id).await, RunState::Provisioned);
    }

    #[tokio::test]
    async fn test_unreadable_archive_fails_run() {
        let h = Harness::new(segmentation_task()).await;
        let id = h.run_in(RunState::Running).await;

        let err = h
            .service
            .post_outputs_archive(&id, b"definitely not a zip")
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidArchive);
        assert_eq!(h.state_of(&id).await, RunState::Failed);
    }

    #[tokio::test]
    async fn test_directory_output() {
        let task = Task::builder("tiling", "2.0.0")
            .input(Parameter::new("a", ParameterType::Integer(IntegerType::default())))
            .output(Parameter::new("masks", ParameterType::File(FileType::default())))
            .build()
            .unwrap();
        let h = Harness::new(task).await;
        let id = h.run_in(RunState::Running).await;

        let archive = zip_of(&[
            ("masks/", ""),
            ("masks/a.png", "1"),
            ("masks/sub/b.png", "2"),
        ]);
        let values = h.service.post_outputs_archive(&id, &archive).await.unwrap();
        assert_eq!(values.len(), 1);
        assert_eq!(values[0].value, PersistedValue::InStorage);
        assert_eq!(h.state_of(&id).await, RunState::Finished);

        let zipped = h.service.retrieve_outputs_archive(&id).await.unwrap();
        let mut names: Vec<String> = read_entries(&zipped)
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        names.sort();
        assert_eq!(
            names,
            vec!["masks/", "masks/a.png", "masks/sub/", "masks/sub/b.png"]
        );

        let single = h
            .service
            .retrieve_single_io(&id, "masks", ParameterDirection::Output)
            .await
            .unwrap();
        assert_eq!(read_entries(&single).unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_escaping_entry_fails_run() {
        let task = Task::builder("tiling", "2.0.0")
            .input(Parameter::new("a", ParameterType::Integer(IntegerType::default())))
            .output(Parameter::new("masks", ParameterType::File(FileType::default())))
            .build()
            .unwrap();
        let h = Harness::new(task).await;
        let id = h.run_in(RunState::Running).await;

        let archive = zip_of(&[("masks/../../../escaped.txt", "x")]);
        let err = h.service.post_outputs_archive(&id, &archive).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidArchive);
        assert_eq!(h.state_of(&id).await, RunState::Failed);

        let outputs = h.dir.path().join(id.outputs_storage_id());
        assert_eq!(std::fs::read_dir(&outputs).unwrap().count(), 0);
        let parent = h.dir.path().parent().unwrap();
        assert!(!parent.join("escaped.txt").exists());
    }

    #[tokio::test]
    async fn test_result_storage_failure_fails_run() {
        let h = Harness::new(segmentation_task()).await;
        let id = h.run_in(RunState::Running).await;
        let outputs = h.dir.path().join(id.outputs_storage_id());
        std::fs::remove_dir(&outputs).unwrap();
        std::fs::write(&outputs, b"").unwrap();

        let err = h
            .service
            .post_outputs_archive(&id, &zip_of(&[("mask", b"m")]))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::StorageStoringFailed);
        assert_eq!(err.errors()[0].parameter(), Some("mask"));
        assert_eq!(h.state_of(&id).await, RunState::Failed);

        // The row is written before the bytes.
        let mask = h
            .state
            .find_parameter(&id, "mask", ParameterDirection::Output)
            .await
            .unwrap();
        assert!(mask.is_some());
    }

    #[tokio::test]
    async fn test_batch_storage_failure_keeps_earlier_writes() {
        let h = Harness::new(segmentation_task()).await;
        let id = h.run_in(RunState::Created).await;
        // A directory where the value of "b" would be written.
        std::fs::create_dir(h.dir.path().join(id.inputs_storage_id()).join("b")).unwrap();

        let err = h
            .service
            .provision_parameters(
                &id,
                vec![Provision::new("a", json!(1)), Provision::new("b", json!(11))],
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::StorageStoringFailed);
        assert_eq!(err.errors()[0].parameter(), Some("b"));

        let rows = h
            .state
            .find_parameters(&id, ParameterDirection::Input)
            .await
            .unwrap();
        let names: Vec<&str> = rows.iter().map(|r| r.parameter_name.as_str()).collect();
        assert_eq!(names, vec!["a"]);
        let written = std::fs::read(h.dir.path().join(id.inputs_storage_id()).join("a")).unwrap();
        assert_eq!(written, b"1".to_vec());
        assert_eq!(h.state_of(&id).await, RunState::Created);
    }

    #[tokio::test]
    async fn test_single_io_requires_a_provision() {
        let h = Harness::new(segmentation_task()).await;
        let id = h.run_in(RunState::Created).await;
        h.service
            .provision_parameter(&id, Provision::new("a", json!(3)))
            .await
            .unwrap();

        let err = h
            .service
            .retrieve_single_io(&id, "note", ParameterDirection::Input)
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::ProvisionsNotFound);
        assert_eq!(err.errors()[0].parameter(), Some("note"));

        let bytes = h
            .service
            .retrieve_single_io(&id, "a", ParameterDirection::Input)
            .await
            .unwrap();
        assert_eq!(bytes, b"3".to_vec());
    }

    #[tokio::test]
    async fn test_batch_validation_writes_nothing() {
        let h = Harness::new(segmentation_task()).await;
        let id = h.run_in(RunState::Created).await;

        let err = h
            .service
            .provision_parameters(
                &id,
                vec![Provision::new("a", json!(5)), Provision::new("b", json!(3))],
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::Batch);
        assert_eq!(err.errors().len(), 1);
        assert_eq!(err.errors()[0].parameter(), Some("b"));
        assert_eq!(
            err.errors()[0].error_code,
            ErrorCode::ParameterValidation(ValidationCode::Gt)
        );

        let rows = h
            .state
            .find_parameters(&id, ParameterDirection::Input)
            .await
            .unwrap();
        assert!(rows.is_empty());
        assert!(h
            .storage
            .read(&id.inputs_storage_id(), "a")
            .await
            .is_err());
        assert_eq!(h.state_of(&id).await, RunState::Created);
    }

    #[tokio::test]
    async fn test_batch_reports_every_failure() {
        let h = Harness::new(segmentation_task()).await;
        let id = h.run_in(RunState::Created).await;

        let err = h
            .service
            .provision_parameters(
                &id,
                vec![
                    Provision::new("a", json!(-1)),
                    Provision::new("nope", json!(1)),
                    Provision::new("b", json!(11)),
                ],
            )
            .await
            .unwrap_err();
        let codes: Vec<ErrorCode> = err.errors().iter().map(|e| e.error_code).collect();
        assert_eq!(
            codes,
            vec![
                ErrorCode::ParameterValidation(ValidationCode::Geq),
                ErrorCode::ParameterDoesNotExist,
            ]
        );
    }

    #[tokio::test]
    async fn test_reprovision_keeps_latest_value() {
        let h = Harness::new(segmentation_task()).await;
        let id = h.run_in(RunState::Created).await;

        h.service
            .provision_parameter(&id, Provision::new("a", json!(1)))
            .await
            .unwrap();
        h.service
            .provision_parameter(&id, Provision::new("A", json!(2)))
            .await
            .unwrap();

        let rows = h
            .state
            .find_parameters(&id, ParameterDirection::Input)
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].parameter_name, "a");
        assert_eq!(rows[0].value, PersistedValue::Integer(2));
    }

    #[tokio::test]
    async fn test_required_inputs_provision_the_run() {
        let h = Harness::new(segmentation_task()).await;
        let id = h.run_in(RunState::Created).await;

        let values = h
            .service
            .provision_parameters(
                &id,
                vec![Provision::new("a", json!(0)), Provision::new("b", json!(11))],
            )
            .await
            .unwrap();
        assert_eq!(values.len(), 2);
        assert_eq!(h.state_of(&id).await, RunState::Provisioned);

        // Optional inputs may still be set.
        h.service
            .provision_parameter(&id, Provision::new("note", json!("second pass")))
            .await
            .unwrap();
        assert_eq!(h.state_of(&id).await, RunState::Provisioned);

        let inputs = h.service.retrieve_inputs(&id).await.unwrap();
        let names: Vec<&str> = inputs.iter().map(|v| v.parameter_name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "note"]);
    }

    #[tokio::test]
    async fn test_binary_provision_and_archive() {
        let h = Harness::new(segmentation_task()).await;
        let id = h.run_in(RunState::Created).await;

        let err = h.service.retrieve_inputs_archive(&id).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidTaskRunState);

        h.service
            .provision_binary(&id, "scan", vec![9, 8, 7])
            .await
            .unwrap();
        h.service
            .provision_parameter(&id, Provision::new("a", json!(4)))
            .await
            .unwrap();
        h.service
            .update_run_state(&id, "PROVISIONED")
            .await
            .unwrap();

        let bytes = h
            .service
            .retrieve_single_io(&id, "scan", ParameterDirection::Input)
            .await
            .unwrap();
        assert_eq!(bytes, vec![9, 8, 7]);

        let entries = read_entries(&h.service.retrieve_inputs_archive(&id).await.unwrap()).unwrap();
        let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["a", "scan"]);
        assert_eq!(entries[0].data, b"4".to_vec());
    }

    #[tokio::test]
    async fn test_provisioning_guards() {
        let h = Harness::new(segmentation_task()).await;

        let err = h
            .service
            .provision_parameter(&RunId::new("missing"), Provision::new("a", json!(1)))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::RunNotFound);

        let id = h.run_in(RunState::Created).await;
        let err = h
            .service
            .provision_parameter(&id, Provision::new("zzz", json!(1)))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::ParameterDoesNotExist);

        let err = h
            .service
            .provision_parameter(&id, Provision::new("a", json!(null)))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::JsonProcessing);

        let started = h.run_in(RunState::Queuing).await;
        let err = h
            .service
            .provision_parameter(&started, Provision::new("a", json!(1)))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidTaskRunState);
    }

    #[tokio::test]
    async fn test_state_change_requests() {
        let h = Harness::new(segmentation_task()).await;
        let id = h.run_in(RunState::Created).await;

        let err = h.service.update_run_state(&id, "RUNNING").await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotProvisioned);
        let err = h.service.update_run_state(&id, "FINISHED").await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::UnknownState);

        let action = h.service.update_run_state(&id, "PROVISIONED").await.unwrap();
        assert_eq!(action.status, "success");
        assert_eq!(action.resource.state, RunState::Provisioned);

        let err = h
            .service
            .update_run_state(&id, "PROVISIONED")
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidTaskRunState);

        let action = h.service.update_run_state(&id, "running").await.unwrap();
        assert_eq!(action.resource.state, RunState::Queuing);
        let scheduled = h.scheduler.scheduled.lock().unwrap();
        assert_eq!(scheduled.len(), 1);
        assert_eq!(scheduled[0].run_id, id);
    }

    #[tokio::test]
    async fn test_scheduling_failure_fails_run() {
        let scheduler = RecordingScheduler {
            closed: true,
            ..Default::default()
        };
        let h = Harness::with_scheduler(segmentation_task(), scheduler).await;
        let id = h.run_in(RunState::Provisioned).await;

        let err = h.service.update_run_state(&id, "RUNNING").await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::SchedulingFailed);
        assert_eq!(h.state_of(&id).await, RunState::Failed);
    }

    #[tokio::test]
    async fn test_pod_event_after_results_is_ignored() {
        let h = Harness::new(segmentation_task()).await;
        let id = h.run_in(RunState::Running).await;
        h.service
            .post_outputs_archive(&id, &zip_of(&[("mask", b"m")]))
            .await
            .unwrap();

        let watcher = PodWatcher::new(h.state.clone());
        let late = PodEvent {
            run_id: id.clone(),
            pod_name: "pod".to_string(),
            action: PodAction::Modified {
                phase: "Failed".to_string(),
            },
        };
        assert!(watcher.handle(late).await.is_none());
        assert_eq!(h.state_of(&id).await, RunState::Finished);

        let run = h.service.retrieve_run(&id).await.unwrap();
        assert_eq!(run.state, RunState::Finished);
        assert_eq!(run.task.namespace, "segmentation");
    }
}
