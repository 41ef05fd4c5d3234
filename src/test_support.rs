//! Test support utilities shared across unit and integration tests.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard as StdMutexGuard, PoisonError};

use thiserror::Error;

use crate::command::{CommandError, CommandFuture, CommandLine, CommandOutput, CommandRunner};
use crate::driver::{
    AvailabilityZone, CloudDriver, DriverErrorKind, DriverFactory, DriverFuture, Image,
    ImageRegistration, Snapshot, SnapshotAttribute, SnapshotState, Volume,
};
use crate::notify::{Notifier, UploadEvent};

fn lock<T>(mutex: &StdMutex<T>) -> StdMutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Records a single invocation made through [`ScriptedRunner`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandInvocation {
    /// Program name as passed to the runner.
    pub program: String,
    /// Arguments passed to the program.
    pub args: Vec<String>,
    /// Environment passed to the program.
    pub env: Vec<(String, String)>,
}

impl CommandInvocation {
    /// Returns the shell-escaped command line for assertions.
    #[must_use]
    pub fn command_string(&self) -> String {
        CommandLine::new(self.program.as_str())
            .args(self.args.iter().map(String::as_str))
            .render()
    }
}

#[derive(Debug)]
struct ScriptRule {
    prefix: String,
    queued: VecDeque<CommandOutput>,
    fallback: Option<CommandOutput>,
}

#[derive(Debug, Default)]
struct RunnerScript {
    rules: Vec<ScriptRule>,
    invocations: Vec<CommandInvocation>,
}

impl RunnerScript {
    fn with_rule(&mut self, prefix: &str, update: impl FnOnce(&mut ScriptRule)) {
        if let Some(rule) = self.rules.iter_mut().find(|rule| rule.prefix == prefix) {
            update(rule);
            return;
        }
        let mut rule = ScriptRule {
            prefix: prefix.to_owned(),
            queued: VecDeque::new(),
            fallback: None,
        };
        update(&mut rule);
        self.rules.push(rule);
    }

    fn next_response(&mut self, rendered: &str) -> Option<CommandOutput> {
        for rule in self
            .rules
            .iter_mut()
            .filter(|rule| rendered.starts_with(&rule.prefix))
        {
            if let Some(output) = rule.queued.pop_front() {
                return Some(output);
            }
            if let Some(output) = &rule.fallback {
                return Some(output.clone());
            }
        }
        None
    }
}

/// Scripted command runner keyed by command-line prefix.
///
/// Responses queued for a prefix are returned in FIFO order to commands whose
/// rendered form starts with that prefix; once the queue is empty a sticky
/// fallback (if any) answers every further call. Keying by prefix keeps
/// scripts deterministic when several jobs run concurrently.
#[derive(Clone, Debug, Default)]
pub struct ScriptedRunner {
    script: Arc<StdMutex<RunnerScript>>,
}

impl ScriptedRunner {
    /// Creates a new runner with no scripted responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of all invocations recorded so far.
    #[must_use]
    pub fn invocations(&self) -> Vec<CommandInvocation> {
        lock(&self.script).invocations.clone()
    }

    /// Returns the rendered invocations whose command line starts with `prefix`.
    #[must_use]
    pub fn commands_starting_with(&self, prefix: &str) -> Vec<String> {
        self.invocations()
            .iter()
            .map(CommandInvocation::command_string)
            .filter(|rendered| rendered.starts_with(prefix))
            .collect()
    }

    /// Queues an explicit output for commands starting with `prefix`.
    pub fn push_output(&self, prefix: &str, output: CommandOutput) {
        lock(&self.script).with_rule(prefix, |rule| rule.queued.push_back(output));
    }

    /// Queues a successful exit with the given stdout.
    pub fn push_success(&self, prefix: &str, stdout: impl Into<String>) {
        self.push_output(
            prefix,
            CommandOutput {
                code: Some(0),
                stdout: stdout.into(),
                stderr: String::new(),
            },
        );
    }

    /// Queues a failing exit with the given stderr.
    pub fn push_failure(&self, prefix: &str, code: i32, stderr: impl Into<String>) {
        self.push_output(
            prefix,
            CommandOutput {
                code: Some(code),
                stdout: String::new(),
                stderr: stderr.into(),
            },
        );
    }

    /// Answers every otherwise unscripted command starting with `prefix`.
    pub fn always_respond(&self, prefix: &str, output: CommandOutput) {
        lock(&self.script).with_rule(prefix, |rule| rule.fallback = Some(output));
    }

    /// Sticky successful exit with the given stdout.
    pub fn always_succeed(&self, prefix: &str, stdout: impl Into<String>) {
        self.always_respond(
            prefix,
            CommandOutput {
                code: Some(0),
                stdout: stdout.into(),
                stderr: String::new(),
            },
        );
    }
}

impl CommandRunner for ScriptedRunner {
    fn run<'a>(&'a self, command: &'a CommandLine) -> CommandFuture<'a> {
        let rendered = command.render();
        let response = {
            let mut script = lock(&self.script);
            script.invocations.push(CommandInvocation {
                program: command.program().to_owned(),
                args: command.arguments().to_vec(),
                env: command.environment().to_vec(),
            });
            script.next_response(&rendered)
        };
        Box::pin(async move {
            response.ok_or_else(|| CommandError::Spawn {
                program: command.program().to_owned(),
                message: format!("no scripted response available for `{rendered}`"),
            })
        })
    }
}

/// Driver operations that can be scripted to fail.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum DriverOperation {
    /// [`CloudDriver::list_volumes`].
    ListVolumes,
    /// [`CloudDriver::create_volume_snapshot`].
    CreateSnapshot,
    /// [`CloudDriver::list_snapshots`].
    ListSnapshots,
    /// [`CloudDriver::modify_snapshot_attribute`].
    ModifySnapshotAttribute,
    /// [`CloudDriver::destroy_volume`].
    DestroyVolume,
    /// [`CloudDriver::destroy_volume_snapshot`].
    DestroySnapshot,
    /// [`CloudDriver::delete_image`].
    DeleteImage,
    /// [`CloudDriver::list_availability_zones`].
    ListAvailabilityZones,
    /// [`CloudDriver::register_image`].
    RegisterImage,
}

/// Call recorded by [`ScriptedDriver`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum DriverCall {
    /// Volumes were listed.
    ListVolumes,
    /// A snapshot was requested.
    CreateSnapshot {
        /// Source volume.
        volume_id: String,
        /// Requested snapshot name.
        name: String,
    },
    /// Snapshots were listed.
    ListSnapshots,
    /// A snapshot attribute was changed.
    ModifySnapshotAttribute {
        /// Target snapshot.
        snapshot_id: String,
        /// Applied attribute.
        attribute: SnapshotAttribute,
    },
    /// A volume was destroyed.
    DestroyVolume {
        /// Destroyed volume.
        volume_id: String,
    },
    /// A snapshot was destroyed.
    DestroySnapshot {
        /// Destroyed snapshot.
        snapshot_id: String,
    },
    /// An image was deregistered.
    DeleteImage {
        /// Deregistered image.
        image_id: String,
    },
    /// Availability zones were listed.
    ListAvailabilityZones {
        /// Whether only available zones were requested.
        only_available: bool,
    },
    /// An image registration was attempted.
    RegisterImage {
        /// Full registration request.
        request: ImageRegistration,
    },
}

/// Error returned by [`ScriptedDriver`].
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ScriptedDriverError {
    /// Registration hit an existing image name.
    #[error("image name {name} is already in use (InvalidAMIName.Duplicate)")]
    DuplicateName {
        /// Conflicting name.
        name: String,
    },
    /// A scripted failure.
    #[error("scripted {operation:?} failure: {message}")]
    Failed {
        /// Operation that failed.
        operation: DriverOperation,
        /// Scripted message.
        message: String,
    },
}

impl DriverErrorKind for ScriptedDriverError {
    fn is_duplicate_name(&self) -> bool {
        matches!(self, Self::DuplicateName { .. })
    }
}

#[derive(Debug, Default)]
struct DriverScript {
    zones: Vec<AvailabilityZone>,
    volumes: Vec<Volume>,
    snapshots: Vec<Snapshot>,
    snapshot_states: VecDeque<SnapshotState>,
    taken_names: BTreeSet<String>,
    failures: HashMap<DriverOperation, String>,
    register_failures: Vec<String>,
    calls: Vec<DriverCall>,
    next_id: u32,
}

impl DriverScript {
    fn failure(&self, operation: DriverOperation) -> Result<(), ScriptedDriverError> {
        self.failures
            .get(&operation)
            .map_or(Ok(()), |message| {
                Err(ScriptedDriverError::Failed {
                    operation,
                    message: message.clone(),
                })
            })
    }

    fn allocate_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}-{:08}", self.next_id)
    }
}

/// In-memory [`CloudDriver`] with scripted behaviour and a call log.
///
/// Clones share state, so a test can keep one handle for assertions while the
/// pipeline owns another.
#[derive(Clone, Debug)]
pub struct ScriptedDriver {
    region: String,
    script: Arc<StdMutex<DriverScript>>,
}

impl ScriptedDriver {
    /// Creates a driver for `region` with one available zone (`{region}a`).
    #[must_use]
    pub fn new(region: &str) -> Self {
        let script = DriverScript {
            zones: vec![AvailabilityZone {
                name: format!("{region}a"),
                state: String::from("available"),
            }],
            ..DriverScript::default()
        };
        Self {
            region: region.to_owned(),
            script: Arc::new(StdMutex::new(script)),
        }
    }

    /// Makes a volume visible to [`CloudDriver::list_volumes`].
    pub fn add_volume(&self, id: &str) {
        let mut script = lock(&self.script);
        let availability_zone = script
            .zones
            .first()
            .map(|zone| zone.name.clone())
            .unwrap_or_default();
        script.volumes.push(Volume {
            id: id.to_owned(),
            state: String::from("available"),
            availability_zone,
        });
    }

    /// Replaces the availability zones reported by the driver.
    pub fn set_zones(&self, zones: Vec<AvailabilityZone>) {
        lock(&self.script).zones = zones;
    }

    /// Queues the states successive snapshot listings report. Once the queue
    /// is exhausted snapshots report `completed`.
    pub fn queue_snapshot_states(&self, states: impl IntoIterator<Item = SnapshotState>) {
        lock(&self.script).snapshot_states.extend(states);
    }

    /// Marks an image name as already taken in the region.
    pub fn take_name(&self, name: &str) {
        lock(&self.script).taken_names.insert(name.to_owned());
    }

    /// Makes every call to `operation` fail with `message`.
    pub fn fail_on(&self, operation: DriverOperation, message: &str) {
        lock(&self.script)
            .failures
            .insert(operation, message.to_owned());
    }

    /// Makes registration fail for names containing `fragment`.
    pub fn fail_register_containing(&self, fragment: &str) {
        lock(&self.script)
            .register_failures
            .push(fragment.to_owned());
    }

    /// Returns every call recorded so far.
    #[must_use]
    pub fn calls(&self) -> Vec<DriverCall> {
        lock(&self.script).calls.clone()
    }

    /// Returns the registration requests made so far.
    #[must_use]
    pub fn registrations(&self) -> Vec<ImageRegistration> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                DriverCall::RegisterImage { request } => Some(request),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: DriverCall, operation: DriverOperation) -> Result<(), ScriptedDriverError> {
        let mut script = lock(&self.script);
        script.calls.push(call);
        script.failure(operation)
    }
}

impl CloudDriver for ScriptedDriver {
    type Error = ScriptedDriverError;

    fn region(&self) -> &str {
        &self.region
    }

    fn list_volumes(&self) -> DriverFuture<'_, Vec<Volume>, Self::Error> {
        let result = self
            .record(DriverCall::ListVolumes, DriverOperation::ListVolumes)
            .map(|()| lock(&self.script).volumes.clone());
        Box::pin(async move { result })
    }

    fn create_volume_snapshot<'a>(
        &'a self,
        volume: &'a Volume,
        name: &'a str,
    ) -> DriverFuture<'a, Snapshot, Self::Error> {
        let call = DriverCall::CreateSnapshot {
            volume_id: volume.id.clone(),
            name: name.to_owned(),
        };
        let result = self.record(call, DriverOperation::CreateSnapshot).map(|()| {
            let mut script = lock(&self.script);
            let snapshot = Snapshot {
                id: script.allocate_id("snap"),
                state: SnapshotState::Pending,
            };
            script.snapshots.push(snapshot.clone());
            snapshot
        });
        Box::pin(async move { result })
    }

    fn list_snapshots(&self) -> DriverFuture<'_, Vec<Snapshot>, Self::Error> {
        let result = self
            .record(DriverCall::ListSnapshots, DriverOperation::ListSnapshots)
            .map(|()| {
                let mut script = lock(&self.script);
                let state = script
                    .snapshot_states
                    .pop_front()
                    .unwrap_or(SnapshotState::Completed);
                for snapshot in &mut script.snapshots {
                    snapshot.state = state.clone();
                }
                script.snapshots.clone()
            });
        Box::pin(async move { result })
    }

    fn modify_snapshot_attribute<'a>(
        &'a self,
        snapshot: &'a Snapshot,
        attribute: &'a SnapshotAttribute,
    ) -> DriverFuture<'a, (), Self::Error> {
        let call = DriverCall::ModifySnapshotAttribute {
            snapshot_id: snapshot.id.clone(),
            attribute: attribute.clone(),
        };
        let result = self.record(call, DriverOperation::ModifySnapshotAttribute);
        Box::pin(async move { result })
    }

    fn destroy_volume<'a>(&'a self, volume: &'a Volume) -> DriverFuture<'a, (), Self::Error> {
        let call = DriverCall::DestroyVolume {
            volume_id: volume.id.clone(),
        };
        let result = self.record(call, DriverOperation::DestroyVolume);
        Box::pin(async move { result })
    }

    fn destroy_volume_snapshot<'a>(
        &'a self,
        snapshot: &'a Snapshot,
    ) -> DriverFuture<'a, (), Self::Error> {
        let call = DriverCall::DestroySnapshot {
            snapshot_id: snapshot.id.clone(),
        };
        let result = self.record(call, DriverOperation::DestroySnapshot);
        Box::pin(async move { result })
    }

    fn delete_image<'a>(&'a self, image: &'a Image) -> DriverFuture<'a, (), Self::Error> {
        let call = DriverCall::DeleteImage {
            image_id: image.id.clone(),
        };
        let result = self.record(call, DriverOperation::DeleteImage);
        Box::pin(async move { result })
    }

    fn list_availability_zones(
        &self,
        only_available: bool,
    ) -> DriverFuture<'_, Vec<AvailabilityZone>, Self::Error> {
        let call = DriverCall::ListAvailabilityZones { only_available };
        let result = self
            .record(call, DriverOperation::ListAvailabilityZones)
            .map(|()| {
                lock(&self.script)
                    .zones
                    .iter()
                    .filter(|zone| !only_available || zone.state == "available")
                    .cloned()
                    .collect()
            });
        Box::pin(async move { result })
    }

    fn register_image<'a>(
        &'a self,
        request: &'a ImageRegistration,
    ) -> DriverFuture<'a, Image, Self::Error> {
        let call = DriverCall::RegisterImage {
            request: request.clone(),
        };
        let result = self
            .record(call, DriverOperation::RegisterImage)
            .and_then(|()| {
                let mut script = lock(&self.script);
                if script
                    .register_failures
                    .iter()
                    .any(|fragment| request.name.contains(fragment.as_str()))
                {
                    return Err(ScriptedDriverError::Failed {
                        operation: DriverOperation::RegisterImage,
                        message: format!("registration of {} rejected", request.name),
                    });
                }
                if !script.taken_names.insert(request.name.clone()) {
                    return Err(ScriptedDriverError::DuplicateName {
                        name: request.name.clone(),
                    });
                }
                Ok(Image {
                    id: script.allocate_id("ami"),
                    name: request.name.clone(),
                })
            });
        Box::pin(async move { result })
    }
}

/// [`DriverFactory`] handing out clones of one [`ScriptedDriver`].
#[derive(Clone, Debug)]
pub struct ScriptedDriverFactory {
    driver: ScriptedDriver,
    unavailable_regions: Arc<StdMutex<BTreeSet<String>>>,
}

impl ScriptedDriverFactory {
    /// Wraps a scripted driver.
    #[must_use]
    pub fn new(driver: ScriptedDriver) -> Self {
        Self {
            driver,
            unavailable_regions: Arc::default(),
        }
    }

    /// Makes driver resolution fail for `region`.
    pub fn reject_region(&self, region: &str) {
        lock(&self.unavailable_regions).insert(region.to_owned());
    }
}

impl DriverFactory for ScriptedDriverFactory {
    type Driver = ScriptedDriver;

    fn driver_for_region(&self, region: &str) -> Result<Self::Driver, ScriptedDriverError> {
        if lock(&self.unavailable_regions).contains(region) {
            return Err(ScriptedDriverError::Failed {
                operation: DriverOperation::ListAvailabilityZones,
                message: format!("no driver for region {region}"),
            });
        }
        Ok(self.driver.clone())
    }
}

/// [`Notifier`] that records every published event.
#[derive(Clone, Debug, Default)]
pub struct RecordingNotifier {
    events: Arc<StdMutex<Vec<UploadEvent>>>,
}

impl RecordingNotifier {
    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the events published so far.
    #[must_use]
    pub fn events(&self) -> Vec<UploadEvent> {
        lock(&self.events).clone()
    }
}

impl Notifier for RecordingNotifier {
    fn publish(&self, event: &UploadEvent) {
        lock(&self.events).push(event.clone());
    }
}

/// Produces `euca-import-volume` output announcing `task_id`.
#[must_use]
pub fn import_volume_output(task_id: &str) -> String {
    format!(
        "IMPORTVOLUME\t{task_id}\t7.0\t0\tGiB\tactive\tuploading\n\
         Uploading the image: 100% |==========| 1.2 GB\n"
    )
}

/// Produces `euca-describe-conversion-tasks` output for a finished task.
#[must_use]
pub fn conversion_completed_output(task_id: &str, volume_id: &str) -> String {
    format!(
        "TaskType\tIMPORTVOLUME\tTaskId\t{task_id}\tExpirationTime\t2017-11-30T00:00:00Z\tStatus\tcompleted\n\
         DISKIMAGE\tDiskImageFormat\tRAW\tDiskImageSize\t1234\tVolumeId\t{volume_id}\tVolumeSize\t7\n"
    )
}

/// Produces `euca-describe-conversion-tasks` output for a running task.
#[must_use]
pub fn conversion_active_output(task_id: &str) -> String {
    format!(
        "TaskType\tIMPORTVOLUME\tTaskId\t{task_id}\tExpirationTime\t2017-11-30T00:00:00Z\tStatus\tactive\tStatusMessage\tPending\n"
    )
}
