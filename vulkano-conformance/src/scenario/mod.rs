//! The scenarios of the suite, and the runner that executes them.
//!
//! A [`Scenario`] is a name and a [`ScenarioKind`], a plain description of what to do with
//! concrete sizes and seeds. [`run`] executes scenarios one after another against a device,
//! each with its own [`Resources`] arena, and collects the outcomes in a [`RunReport`].
//!
//! Failures of a scenario do not stop the run, with one exception: once the device is lost,
//! the remaining scenarios are not run.

use crate::{
    buffer::{Buffer, BufferCreateInfo, BufferUsage},
    device::{Device, DeviceError, Queue, QueueFlags},
    driver::{Driver, DriverError},
    image::{Image, ImageCreateInfo, ImageUsage},
    memory::MemoryRequirement,
    oracle::{CompletionToken, Failure, Oracle, Shape, Verdict},
    resource::{AllocationError, Resources},
    shader::{ComputeShader, ShaderModule},
    sync::{AccessFlags, BufferMemoryBarrier, DependencyInfo, ImageMemoryBarrier, PipelineStages},
    NonExhaustive, ValidationError,
};
use ash::vk;
use smallvec::smallvec;
use std::{
    borrow::Cow,
    error::Error,
    fmt, thread,
    time::{Duration, Instant},
};
use tracing::{error, info, warn};

pub use self::{
    compute::{ComputeKind, InvertKind},
    op::{OpKind, OperationPair, Primitive, ResourceKind, Topology},
    sync::SyncKind,
};

pub mod catalog;
mod compute;
mod op;
mod sync;

/// A named scenario.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Scenario {
    /// The `/`-separated path of the scenario in the catalog.
    pub name: String,

    /// What the scenario does.
    pub kind: ScenarioKind,
}

impl Scenario {
    #[inline]
    pub fn new(name: impl Into<String>, kind: ScenarioKind) -> Self {
        Scenario {
            name: name.into(),
            kind,
        }
    }
}

/// The kinds of scenario.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ScenarioKind {
    /// A compute shader scenario.
    Compute(ComputeKind),

    /// A scenario exercising one synchronization primitive on its own.
    Sync(SyncKind),

    /// A write operation followed by a read operation of the same resource, separated by a
    /// synchronization primitive.
    Operation(OperationPair),
}

impl ScenarioKind {
    /// Checks that the parameters are consistent, before anything is created.
    pub fn validate(&self) -> Result<(), Box<ValidationError>> {
        match self {
            ScenarioKind::Compute(kind) => kind.validate(),
            ScenarioKind::Sync(kind) => kind.validate(),
            ScenarioKind::Operation(pair) => pair.validate(),
        }
    }

    fn execute(&self, ctx: &mut Context<'_, '_>) -> Result<Verdict, ScenarioError> {
        match self {
            ScenarioKind::Compute(kind) => kind.execute(ctx),
            ScenarioKind::Sync(kind) => kind.execute(ctx),
            ScenarioKind::Operation(pair) => pair.execute(ctx),
        }
    }
}

/// Parameters of a run.
#[derive(Clone, Debug)]
pub struct ScenarioConfig {
    /// How long to wait for a submission to complete before giving up.
    ///
    /// The default value is 10 seconds.
    pub fence_timeout: Duration,

    /// The number of mismatching values reported for a failed verification. All mismatches are
    /// counted regardless.
    ///
    /// The default value is 16.
    pub max_reported_mismatches: usize,

    /// If set, only the scenarios whose name contains this string are run.
    ///
    /// The default value is `None`.
    pub filter: Option<String>,

    pub _ne: NonExhaustive,
}

impl Default for ScenarioConfig {
    #[inline]
    fn default() -> Self {
        Self {
            fence_timeout: Duration::from_secs(10),
            max_reported_mismatches: Oracle::DEFAULT_MAX_REPORTED_MISMATCHES,
            filter: None,
            _ne: NonExhaustive(()),
        }
    }
}

/// The outcome of one scenario.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// Every verification passed.
    Pass,

    /// A verification failed: the device did not honor a dependency, or computed the wrong
    /// result.
    Fail(Failure),

    /// The device does not support something the scenario needs.
    Skip(String),

    /// The scenario could not be carried out.
    Error(ScenarioError),

    /// The scenario was not run, because the device was lost earlier in the run.
    NotRun,
}

/// Error that can happen while executing a scenario.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ScenarioError {
    /// The device lacks a capability the scenario needs.
    NotSupported(Cow<'static, str>),

    /// A buffer or image could not be created.
    Allocation(AllocationError),

    /// The device was lost.
    DeviceLost,

    /// A submission did not complete in time.
    Timeout,

    /// The parameters of the scenario are not consistent.
    InvalidConfiguration(Box<ValidationError>),

    /// A descriptor set or another parameter built by the scenario was not valid.
    Validation(Box<ValidationError>),

    /// The driver was used incorrectly, or a recorded command was not valid.
    Driver(DriverError),

    /// The device returned an unexpected error.
    Device(DeviceError),
}

impl ScenarioError {
    /// Returns whether the error means that the scenario is skipped rather than failed.
    #[inline]
    pub fn is_skip(&self) -> bool {
        matches!(
            self,
            ScenarioError::NotSupported(_)
                | ScenarioError::Allocation(
                    AllocationError::Unsupported(_) | AllocationError::OutOfMemory
                )
        )
    }
}

impl Error for ScenarioError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Allocation(err) => Some(err),
            Self::InvalidConfiguration(err) | Self::Validation(err) => Some(err.as_ref()),
            Self::Driver(err) => Some(err),
            Self::Device(err) => Some(err),
            _ => None,
        }
    }
}

impl fmt::Display for ScenarioError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotSupported(what) => write!(f, "not supported: {}", what),
            Self::Allocation(err) => write!(f, "allocation failed: {}", err),
            Self::DeviceLost => write!(f, "the device was lost"),
            Self::Timeout => write!(f, "a submission did not complete before the timeout"),
            Self::InvalidConfiguration(err) => write!(f, "invalid configuration: {}", err),
            Self::Validation(err) => write!(f, "invalid parameter: {}", err),
            Self::Driver(err) => match err.source() {
                Some(source) => write!(f, "{}: {}", err, source),
                None => write!(f, "{}", err),
            },
            Self::Device(err) => write!(f, "{}", err),
        }
    }
}

impl From<DeviceError> for ScenarioError {
    fn from(err: DeviceError) -> Self {
        match err {
            DeviceError::DeviceLost => Self::DeviceLost,
            DeviceError::Timeout => Self::Timeout,
            DeviceError::OutOfDeviceMemory | DeviceError::MemoryTypeUnsupported => {
                Self::Allocation(err.into())
            }
            err => Self::Device(err),
        }
    }
}

impl From<AllocationError> for ScenarioError {
    fn from(err: AllocationError) -> Self {
        match err {
            AllocationError::Device(err) => err.into(),
            err => Self::Allocation(err),
        }
    }
}

impl From<Box<ValidationError>> for ScenarioError {
    fn from(err: Box<ValidationError>) -> Self {
        Self::Validation(err)
    }
}

impl From<DriverError> for ScenarioError {
    fn from(err: DriverError) -> Self {
        match err {
            DriverError::Device(err) => err.into(),
            err => Self::Driver(err),
        }
    }
}

/// The outcome of a scenario, with its name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScenarioResult {
    pub name: String,
    pub outcome: Outcome,
}

/// The outcomes of a run.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RunReport {
    /// The outcome of every scenario, in the order they were given.
    pub results: Vec<ScenarioResult>,
}

impl RunReport {
    fn count(&self, f: impl Fn(&Outcome) -> bool) -> usize {
        self.results.iter().filter(|result| f(&result.outcome)).count()
    }

    #[inline]
    pub fn passed(&self) -> usize {
        self.count(|outcome| matches!(outcome, Outcome::Pass))
    }

    #[inline]
    pub fn failed(&self) -> usize {
        self.count(|outcome| matches!(outcome, Outcome::Fail(_)))
    }

    #[inline]
    pub fn skipped(&self) -> usize {
        self.count(|outcome| matches!(outcome, Outcome::Skip(_)))
    }

    #[inline]
    pub fn errors(&self) -> usize {
        self.count(|outcome| matches!(outcome, Outcome::Error(_)))
    }

    #[inline]
    pub fn not_run(&self) -> usize {
        self.count(|outcome| matches!(outcome, Outcome::NotRun))
    }

    /// Returns whether no scenario failed or errored, and every scenario was run.
    #[inline]
    pub fn is_success(&self) -> bool {
        self.failed() == 0 && self.errors() == 0 && self.not_run() == 0
    }

    /// Returns the outcome of the scenario named `name`.
    pub fn outcome(&self, name: &str) -> Option<&Outcome> {
        self.results
            .iter()
            .find(|result| result.name == name)
            .map(|result| &result.outcome)
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for result in &self.results {
            match &result.outcome {
                Outcome::Pass => (),
                Outcome::Fail(failure) => writeln!(f, "FAIL  {}: {}", result.name, failure)?,
                Outcome::Skip(reason) => writeln!(f, "SKIP  {}: {}", result.name, reason)?,
                Outcome::Error(err) => writeln!(f, "ERROR {}: {}", result.name, err)?,
                Outcome::NotRun => writeln!(f, "----  {}: not run", result.name)?,
            }
        }

        write!(
            f,
            "{} scenarios: {} passed, {} failed, {} skipped, {} errors, {} not run",
            self.results.len(),
            self.passed(),
            self.failed(),
            self.skipped(),
            self.errors(),
            self.not_run(),
        )
    }
}

/// Runs `scenarios` against `device`, one after another.
pub fn run(device: &dyn Device, scenarios: &[Scenario], config: &ScenarioConfig) -> RunReport {
    let mut report = RunReport::default();
    let mut lost = false;

    let selected = scenarios.iter().filter(|scenario| match &config.filter {
        Some(filter) => scenario.name.contains(filter.as_str()),
        None => true,
    });

    for scenario in selected {
        let outcome = if lost {
            Outcome::NotRun
        } else {
            run_one(device, scenario, config)
        };

        if outcome == Outcome::Error(ScenarioError::DeviceLost) {
            lost = true;
        }

        report.results.push(ScenarioResult {
            name: scenario.name.clone(),
            outcome,
        });
    }

    info!(
        passed = report.passed(),
        failed = report.failed(),
        skipped = report.skipped(),
        errors = report.errors(),
        not_run = report.not_run(),
        "run finished",
    );

    report
}

fn run_one(device: &dyn Device, scenario: &Scenario, config: &ScenarioConfig) -> Outcome {
    info!(scenario = %scenario.name, "running scenario");

    if let Err(err) = scenario.kind.validate() {
        let err = ScenarioError::InvalidConfiguration(err);
        error!(scenario = %scenario.name, %err, "scenario is misconfigured");
        return Outcome::Error(err);
    }

    let result = {
        let mut ctx = Context::new(device, config);
        scenario.kind.execute(&mut ctx)
    };

    match result {
        Ok(Verdict::Pass) => {
            info!(scenario = %scenario.name, "passed");
            Outcome::Pass
        }
        Ok(Verdict::Fail(failure)) => {
            warn!(scenario = %scenario.name, %failure, "failed");
            Outcome::Fail(failure)
        }
        Err(err) if err.is_skip() => {
            info!(scenario = %scenario.name, %err, "skipped");
            Outcome::Skip(err.to_string())
        }
        Err(err) => {
            error!(scenario = %scenario.name, %err, "scenario could not be carried out");
            Outcome::Error(err)
        }
    }
}

/// The state of one scenario while it executes.
pub(crate) struct Context<'a, 'd> {
    pub(crate) device: &'d dyn Device,
    pub(crate) resources: Resources<'d>,
    pub(crate) config: &'a ScenarioConfig,
    oracle: Oracle,
}

impl<'a, 'd> Context<'a, 'd> {
    fn new(device: &'d dyn Device, config: &'a ScenarioConfig) -> Self {
        Context {
            device,
            resources: Resources::new(device),
            config,
            oracle: Oracle::new(config.max_reported_mismatches),
        }
    }

    /// Returns a queue supporting `flags`, other than the queues in `exclude`.
    pub(crate) fn queue(
        &self,
        flags: QueueFlags,
        exclude: &[Queue],
    ) -> Result<Queue, ScenarioError> {
        self.device.find_queue(flags, exclude).ok_or_else(|| {
            ScenarioError::NotSupported(format!("no queue with {:?} support is left", flags).into())
        })
    }

    pub(crate) fn driver(&mut self, queue: Queue) -> Result<Driver<'d>, ScenarioError> {
        Ok(Driver::new(&mut self.resources, queue)?)
    }

    pub(crate) fn buffer(
        &mut self,
        len: usize,
        usage: BufferUsage,
        memory_requirement: MemoryRequirement,
    ) -> Result<Buffer, ScenarioError> {
        Ok(self
            .resources
            .create_buffer(BufferCreateInfo::words(len, usage, memory_requirement))?)
    }

    /// Creates a host-visible buffer.
    pub(crate) fn host_buffer(
        &mut self,
        len: usize,
        usage: BufferUsage,
    ) -> Result<Buffer, ScenarioError> {
        self.buffer(len, usage, MemoryRequirement::HOST_VISIBLE)
    }

    pub(crate) fn image(
        &mut self,
        extent: [u32; 2],
        usage: ImageUsage,
    ) -> Result<Image, ScenarioError> {
        Ok(self.resources.create_image(ImageCreateInfo {
            extent,
            usage,
            ..Default::default()
        })?)
    }

    pub(crate) fn shader(&mut self, shader: ComputeShader) -> Result<ShaderModule, ScenarioError> {
        Ok(self.resources.create_shader_module(shader)?)
    }

    /// Writes `words` to the start of a host-visible buffer.
    pub(crate) fn write(&self, buffer: Buffer, words: &[u32]) -> Result<(), ScenarioError> {
        Ok(self
            .device
            .write_buffer(buffer.handle(), 0, bytemuck::cast_slice(words))?)
    }

    /// Compares the start of a host-visible buffer with `expected`.
    pub(crate) fn verify(
        &self,
        token: &CompletionToken,
        buffer: Buffer,
        shape: Shape,
        expected: &[u32],
    ) -> Result<Verdict, ScenarioError> {
        Ok(self
            .oracle
            .verify(self.device, token, buffer, shape, expected)?)
    }

    pub(crate) fn wait(&self, driver: &mut Driver<'_>) -> Result<CompletionToken, ScenarioError> {
        Ok(driver.wait(self.config.fence_timeout)?)
    }

    /// Polls `event` from the host until the device sets it.
    pub(crate) fn wait_event(&self, event: vk::Event) -> Result<CompletionToken, ScenarioError> {
        let deadline = Instant::now() + self.config.fence_timeout;

        while !self.device.event_status(event)? {
            if Instant::now() >= deadline {
                return Err(ScenarioError::Timeout);
            }

            thread::sleep(Duration::from_millis(1));
        }

        Ok(CompletionToken::new())
    }
}

/// A dependency from the host writes to `buffers` to the accesses `dst_access` of `dst_stages`.
pub(crate) fn host_write_dependency(
    buffers: &[Buffer],
    dst_stages: PipelineStages,
    dst_access: AccessFlags,
) -> DependencyInfo {
    DependencyInfo {
        buffer_memory_barriers: buffers
            .iter()
            .map(|&buffer| BufferMemoryBarrier {
                src_stages: PipelineStages::HOST,
                src_access: AccessFlags::HOST_WRITE,
                dst_stages,
                dst_access,
                ..BufferMemoryBarrier::buffer(buffer)
            })
            .collect(),
        ..Default::default()
    }
}

/// A dependency from the writes `src_access` of `src_stages` to `buffers` to host reads.
pub(crate) fn host_read_dependency(
    buffers: &[Buffer],
    src_stages: PipelineStages,
    src_access: AccessFlags,
) -> DependencyInfo {
    DependencyInfo {
        buffer_memory_barriers: buffers
            .iter()
            .map(|&buffer| BufferMemoryBarrier {
                src_stages,
                src_access,
                dst_stages: PipelineStages::HOST,
                dst_access: AccessFlags::HOST_READ,
                ..BufferMemoryBarrier::buffer(buffer)
            })
            .collect(),
        ..Default::default()
    }
}

pub(crate) fn buffer_dependency(barrier: BufferMemoryBarrier) -> DependencyInfo {
    DependencyInfo {
        buffer_memory_barriers: smallvec![barrier],
        ..Default::default()
    }
}

pub(crate) fn image_dependency(barrier: ImageMemoryBarrier) -> DependencyInfo {
    DependencyInfo {
        image_memory_barriers: smallvec![barrier],
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::soft::{SoftDevice, SoftDeviceCreateInfo};

    fn scenarios(names: &[&str]) -> Vec<Scenario> {
        let names: Vec<_> = names.iter().map(|name| name.to_string()).collect();

        catalog::catalog()
            .into_iter()
            .filter(|scenario| names.contains(&scenario.name))
            .collect()
    }

    #[test]
    fn errors_map_to_outcomes() {
        assert!(ScenarioError::from(AllocationError::OutOfMemory).is_skip());
        assert!(ScenarioError::from(DeviceError::MemoryTypeUnsupported).is_skip());
        assert!(ScenarioError::NotSupported("queue".into()).is_skip());
        assert_eq!(
            ScenarioError::from(DriverError::Device(DeviceError::Timeout)),
            ScenarioError::Timeout,
        );
        assert_eq!(
            ScenarioError::from(AllocationError::Device(DeviceError::DeviceLost)),
            ScenarioError::DeviceLost,
        );
        assert!(!ScenarioError::Timeout.is_skip());
    }

    #[test]
    fn invalid_configurations_are_errors() {
        let device = soft_device!();
        let scenario = Scenario::new(
            "invert/uneven",
            ScenarioKind::Compute(ComputeKind::BufferInvert {
                kind: InvertKind::Uniform,
                num_values: 1000,
                local_size: [3, 1, 1],
                work_size: [1, 1, 1],
            }),
        );

        let report = run(&device, &[scenario], &ScenarioConfig::default());
        assert!(matches!(
            report.results[0].outcome,
            Outcome::Error(ScenarioError::InvalidConfiguration(_)),
        ));
    }

    #[test]
    fn device_loss_aborts_the_run() {
        let device = faulty_device!(lose_device_after_submissions: Some(1));
        let scenarios = scenarios(&[
            "compute/basic/empty_shader",
            "compute/basic/shared_var_single_group",
            "compute/basic/shared_atomic_op_single_group",
        ]);

        let report = run(&device, &scenarios, &ScenarioConfig::default());
        assert_eq!(report.passed(), 1);
        assert_eq!(
            report.results[1].outcome,
            Outcome::Error(ScenarioError::DeviceLost),
        );
        assert_eq!(report.results[2].outcome, Outcome::NotRun);
        assert!(!report.is_success());
    }

    #[test]
    fn unsupported_memory_skips() {
        crate::tests::init_tracing();
        let device = SoftDevice::new(SoftDeviceCreateInfo {
            memory_types: vec![crate::memory::MemoryPropertyFlags::DEVICE_LOCAL],
            ..Default::default()
        })
        .unwrap();

        let report = run(
            &device,
            &scenarios(&["compute/basic/shared_var_single_group"]),
            &ScenarioConfig::default(),
        );
        assert_eq!(report.skipped(), 1);
        assert!(report.is_success());
    }

    #[test]
    fn filter_selects_by_name() {
        let device = soft_device!();
        let config = ScenarioConfig {
            filter: Some("smoke/events".into()),
            ..Default::default()
        };

        let report = run(&device, &catalog::catalog(), &config);
        assert_eq!(report.results.len(), 1);
        assert_eq!(report.outcome("synchronization/smoke/events"), Some(&Outcome::Pass));
        assert!(report
            .to_string()
            .ends_with("1 scenarios: 1 passed, 0 failed, 0 skipped, 0 errors, 0 not run"));
    }
}
