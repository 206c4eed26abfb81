//! Verification of read-back results against their reference models.
//!
//! The oracle reads results through the host read path of the device, and only once the work
//! that produced them has completed, which the caller proves by presenting a
//! [`CompletionToken`]. Every element is compared, in order, with bitwise equality. A scenario
//! that forgot a dependency observes stale or undefined values here.

use crate::{
    buffer::Buffer,
    device::{Device, DeviceError},
};
use std::{borrow::Cow, fmt};

/// Proof that the host has waited for device work to complete.
///
/// Tokens are created by [`Driver::wait`], and by the scenarios that wait for the device to set
/// an event from the host.
///
/// [`Driver::wait`]: crate::driver::Driver::wait
#[derive(Debug)]
#[must_use]
pub struct CompletionToken {
    _private: (),
}

impl CompletionToken {
    pub(crate) fn new() -> Self {
        CompletionToken { _private: () }
    }
}

/// How the words of a read-back buffer map to positions in the resource they came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Shape {
    /// The words are the resource itself.
    Words,

    /// The words are the texels of an image of the given width, in row-major order.
    Texels { width: u32 },
}

impl Shape {
    fn location(self, index: usize) -> Location {
        match self {
            Shape::Words => Location::Word(index),
            Shape::Texels { width } => Location::Texel {
                x: index as u32 % width,
                y: index as u32 / width,
            },
        }
    }
}

/// The position of a mismatching value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Location {
    /// The index of a word in a buffer.
    Word(usize),

    /// The coordinates of a texel in an image.
    Texel { x: u32, y: u32 },
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::Word(index) => write!(f, "[{}]", index),
            Location::Texel { x, y } => write!(f, "({}, {})", x, y),
        }
    }
}

/// A value that differs from its reference.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Mismatch {
    pub location: Location,
    pub observed: u32,
    pub expected: u32,
}

impl fmt::Display for Mismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: observed {:#010x}, expected {:#010x}",
            self.location, self.observed, self.expected,
        )
    }
}

/// Why a scenario failed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Failure {
    /// A summary of the failure.
    pub description: Cow<'static, str>,

    /// The first mismatching values, up to the configured cap.
    pub mismatches: Vec<Mismatch>,

    /// The total number of mismatching values.
    pub mismatch_count: usize,
}

impl Failure {
    /// A failure of a condition other than a comparison of values.
    pub fn condition(description: impl Into<Cow<'static, str>>) -> Self {
        Failure {
            description: description.into(),
            mismatches: Vec::new(),
            mismatch_count: 0,
        }
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description)?;

        for mismatch in &self.mismatches {
            write!(f, "\n    {}", mismatch)?;
        }

        if self.mismatch_count > self.mismatches.len() {
            write!(
                f,
                "\n    ... and {} more",
                self.mismatch_count - self.mismatches.len(),
            )?;
        }

        Ok(())
    }
}

/// The result of a verification.
#[derive(Clone, Debug, PartialEq, Eq)]
#[must_use]
pub enum Verdict {
    Pass,
    Fail(Failure),
}

impl Verdict {
    /// Passes if `condition` holds, and fails with `description` otherwise.
    pub fn check(condition: bool, description: impl Into<Cow<'static, str>>) -> Self {
        if condition {
            Verdict::Pass
        } else {
            Verdict::Fail(Failure::condition(description))
        }
    }

    /// Returns whether the verdict is a pass.
    #[inline]
    pub fn is_pass(&self) -> bool {
        matches!(self, Verdict::Pass)
    }

    /// Combines two verdicts; the first failure wins.
    pub fn and(self, other: Verdict) -> Verdict {
        match self {
            Verdict::Pass => other,
            fail => fail,
        }
    }
}

/// Compares results with their references.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Oracle {
    max_reported_mismatches: usize,
}

impl Oracle {
    /// The default number of mismatches reported per verification.
    pub const DEFAULT_MAX_REPORTED_MISMATCHES: usize = 16;

    /// Creates an oracle that reports up to `max_reported_mismatches` mismatching values.
    #[inline]
    pub const fn new(max_reported_mismatches: usize) -> Self {
        Oracle {
            max_reported_mismatches,
        }
    }

    /// Reads the first `expected.len()` words of `buffer` and compares them with `expected`.
    ///
    /// The buffer must be host-visible, and the work that wrote it must have recorded a
    /// dependency with the host read in its destination scope.
    pub fn verify(
        &self,
        device: &dyn Device,
        _token: &CompletionToken,
        buffer: Buffer,
        shape: Shape,
        expected: &[u32],
    ) -> Result<Verdict, DeviceError> {
        let mut observed = vec![0u32; expected.len()];
        device.read_buffer(
            buffer.handle(),
            0,
            bytemuck::cast_slice_mut(&mut observed),
        )?;

        Ok(self.compare(&observed, expected, shape))
    }

    /// Compares `observed` with `expected`, element by element.
    pub fn compare(&self, observed: &[u32], expected: &[u32], shape: Shape) -> Verdict {
        let mut mismatches = Vec::new();
        let mut mismatch_count = 0;

        for (index, (&observed, &expected)) in observed.iter().zip(expected).enumerate() {
            if observed == expected {
                continue;
            }

            mismatch_count += 1;

            if mismatches.len() < self.max_reported_mismatches {
                mismatches.push(Mismatch {
                    location: shape.location(index),
                    observed,
                    expected,
                });
            }
        }

        let missing = expected.len().saturating_sub(observed.len());

        if mismatch_count == 0 && missing == 0 {
            return Verdict::Pass;
        }

        let description = if missing != 0 {
            format!(
                "{} values were read back, {} were expected",
                observed.len(),
                expected.len(),
            )
        } else {
            format!("{} of {} values differ", mismatch_count, expected.len())
        };

        Verdict::Fail(Failure {
            description: description.into(),
            mismatches,
            mismatch_count: mismatch_count + missing,
        })
    }
}

impl Default for Oracle {
    #[inline]
    fn default() -> Self {
        Self::new(Self::DEFAULT_MAX_REPORTED_MISMATCHES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::UNDEFINED_PATTERN;

    #[test]
    fn every_mismatch_is_counted() {
        let oracle = Oracle::new(2);
        let expected: Vec<u32> = (0..8).collect();
        let mut observed = expected.clone();
        observed[1] = UNDEFINED_PATTERN;
        observed[4] = 0;
        observed[7] = 1;

        let Verdict::Fail(failure) = oracle.compare(&observed, &expected, Shape::Words) else {
            panic!("mismatches were not detected");
        };
        assert_eq!(failure.mismatch_count, 3);
        assert_eq!(
            failure.mismatches,
            [
                Mismatch {
                    location: Location::Word(1),
                    observed: UNDEFINED_PATTERN,
                    expected: 1,
                },
                Mismatch {
                    location: Location::Word(4),
                    observed: 0,
                    expected: 4,
                },
            ],
        );
        assert_eq!(
            failure.to_string(),
            "3 of 8 values differ\n    [1]: observed 0xdeadbeef, expected 0x00000001\n    \
            [4]: observed 0x00000000, expected 0x00000004\n    ... and 1 more",
        );
    }

    #[test]
    fn texel_coordinates() {
        let oracle = Oracle::default();
        let verdict = oracle.compare(&[0, 0, 0, 9], &[0, 0, 0, 0], Shape::Texels { width: 2 });

        let Verdict::Fail(failure) = verdict else {
            panic!("mismatch was not detected");
        };
        assert_eq!(failure.mismatches[0].location, Location::Texel { x: 1, y: 1 });
    }

    #[test]
    fn short_reads_fail() {
        let oracle = Oracle::default();

        assert!(oracle.compare(&[1, 2], &[1, 2], Shape::Words).is_pass());
        assert!(!oracle.compare(&[1], &[1, 2], Shape::Words).is_pass());
    }

    #[test]
    fn verdict_combination() {
        let fail = Verdict::check(false, "first");

        assert!(Verdict::Pass.and(Verdict::Pass).is_pass());
        assert_eq!(Verdict::Pass.and(fail.clone()), fail);
        assert_eq!(fail.clone().and(Verdict::check(false, "second")), fail);
    }
}
