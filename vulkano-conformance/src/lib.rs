//! Conformance scenarios for compute dispatch and explicit synchronization.
//!
//! The crate drives a device through a catalog of scenarios, each of which records compute
//! dispatches and copies, separates them with the dependencies that the synchronization model
//! requires (pipeline barriers, events, fences and semaphores, with queue family ownership
//! transfers and image layout transitions where needed), and then reads the results back on the
//! host. The results are compared against closed-form reference models by the [`oracle`]. A
//! driver that does not honor a dependency produces stale or undefined data, which the oracle
//! reports as a mismatch.
//!
//! # Structure
//!
//! - [`device`] defines the [`Device`] trait, the seam between the scenarios and the
//!   implementation under test, and the [`SoftDevice`], a strict software implementation that
//!   models memory availability and visibility.
//! - [`resource`] owns the buffers, images and synchronization objects of one scenario and
//!   releases them in reverse order.
//! - [`sync`] describes dependencies between operations.
//! - [`driver`] sequences the recording, submission and completion of one command buffer.
//! - [`oracle`] and [`reference`] compare the read-back results with their expected values.
//! - [`scenario`] holds the scenarios, the catalog and the runner.
//!
//! # Example
//!
//! ```
//! use vulkano_conformance::{
//!     device::soft::{SoftDevice, SoftDeviceCreateInfo},
//!     scenario::{self, catalog, ScenarioConfig},
//! };
//!
//! let device = SoftDevice::new(SoftDeviceCreateInfo::default()).unwrap();
//! let scenarios = catalog::filter(catalog::catalog(), "compute/basic/shared_var");
//! let report = scenario::run(&device, &scenarios, &ScenarioConfig::default());
//!
//! assert_eq!(report.failed(), 0);
//! ```
//!
//! [`Device`]: device::Device
//! [`SoftDevice`]: device::soft::SoftDevice

use std::{borrow::Cow, error::Error, fmt};

#[macro_use]
mod tests;
pub mod buffer;
pub mod command_buffer;
pub mod device;
pub mod driver;
pub mod image;
mod macros;
pub mod memory;
pub mod oracle;
pub mod random;
pub mod reference;
pub mod resource;
pub mod scenario;
pub mod shader;
pub mod sync;

/// Represents memory size and offset values on a device.
pub type DeviceSize = u64;

/// The value that fresh or undefined memory holds, and that reads of undefined contents return.
pub const UNDEFINED_PATTERN: u32 = 0xDEAD_BEEF;

/// A helper type for non-exhaustive structs.
///
/// This type cannot be constructed outside this crate, so structs containing it cannot be
/// constructed with struct literal syntax either. Use `..Default::default()` or the provided
/// constructor instead.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NonExhaustive(pub(crate) ());

/// The arguments or parameters of an operation were not valid.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ValidationError {
    /// The context in which the problem exists (e.g. a specific parameter).
    pub context: Cow<'static, str>,

    /// A description of the problem.
    pub problem: Cow<'static, str>,
}

impl ValidationError {
    pub(crate) fn new(
        context: impl Into<Cow<'static, str>>,
        problem: impl Into<Cow<'static, str>>,
    ) -> Box<Self> {
        Box::new(ValidationError {
            context: context.into(),
            problem: problem.into(),
        })
    }

    pub(crate) fn add_context(
        mut self: Box<Self>,
        context: impl Into<Cow<'static, str>>,
    ) -> Box<Self> {
        if self.context.is_empty() {
            self.context = context.into();
        } else {
            self.context = format!("{}.{}", context.into(), self.context).into();
        }

        self
    }
}

impl Error for ValidationError {}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.context.is_empty() {
            write!(f, "{}", self.problem)
        } else {
            write!(f, "{}: {}", self.context, self.problem)
        }
    }
}
