//! Test report generation.

pub mod junit;
pub mod xml;

pub use junit::{ReportError, ReportGenerator, Tally};
