//! Methods for consuming the data stream produced during operation.

use std::time::SystemTime;

use chrono::{DateTime, Utc};

use crate::controller::ControllerCtx;

mod csv;
mod line;

pub use csv::CsvDispatcher;
pub use line::{LineDispatcher, ModeHandle};

/// A consumer of the per-cycle dispatch rows: the rig's channels plus
/// every calc output marked for saving.
#[typetag::serde(tag = "type")]
pub trait Dispatcher: Send {
    /// Prepare to consume rows with the given column names
    fn init(&mut self, ctx: &ControllerCtx, names: &[String]) -> Result<(), String>;

    /// Ingest one row of values, in the order the names were given at init
    fn consume(
        &mut self,
        time: SystemTime,
        timestamp_ns: i64,
        values: &[f64],
    ) -> Result<(), String>;

    /// Flush and release resources
    fn terminate(&mut self);
}

/// Format a wall-clock time the same way in every dispatcher output
pub(crate) fn fmt_time(time: SystemTime) -> String {
    let t: DateTime<Utc> = time.into();
    t.to_rfc3339()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_formats_as_rfc3339_utc() {
        let formatted = fmt_time(SystemTime::UNIX_EPOCH);
        assert!(formatted.starts_with("1970-01-01T00:00:00"));
    }
}
