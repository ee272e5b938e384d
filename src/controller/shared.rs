//! Lock-light value cells shared between the control and comms threads.

use std::sync::{Arc, RwLock};
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

/// A single-slot cell holding the latest value of something.
/// Writes replace the whole value, so a reader always sees a
/// complete snapshot and never a torn one.
#[derive(Clone, Debug, Default)]
pub struct LatestCell<T> {
    inner: Arc<RwLock<Arc<T>>>,
}

impl<T> LatestCell<T> {
    pub fn new(initial: T) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(initial))),
        }
    }

    /// Replace the stored value
    pub fn store(&self, value: T) {
        match self.inner.write() {
            Ok(mut guard) => *guard = Arc::new(value),
            Err(poisoned) => *poisoned.into_inner() = Arc::new(value),
        }
    }

    /// Get the latest stored value
    pub fn load(&self) -> Arc<T> {
        match self.inner.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

/// Minimal per-cycle state published by the control thread.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq)]
pub struct ControlSnapshot {
    /// Normalized lateral position
    pub x: f64,
    /// Normalized longitudinal position
    pub y: f64,
    /// Commanded x-axis force including host bias
    pub fx: f64,
    /// Commanded y-axis force including host bias
    pub fy: f64,
    /// Cycle counter since start
    pub cycle: u64,
}

/// One full row of dispatch values with its timestamps.
#[derive(Clone, Debug, PartialEq)]
pub struct Row {
    pub time: SystemTime,
    pub timestamp_ns: i64,
    pub values: Vec<f64>,
}

impl Default for Row {
    fn default() -> Self {
        Self {
            time: SystemTime::UNIX_EPOCH,
            timestamp_ns: 0,
            values: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn store_then_load() {
        let cell = LatestCell::new(ControlSnapshot::default());
        cell.store(ControlSnapshot {
            x: 1.0,
            y: -2.0,
            fx: 3.0,
            fy: -4.0,
            cycle: 7,
        });

        let snap = cell.load();
        assert_eq!(snap.cycle, 7);
        assert_eq!(snap.x, 1.0);
    }

    #[test]
    fn readers_see_complete_rows() {
        let cell = LatestCell::new(Row::default());
        let writer_cell = cell.clone();

        let writer = thread::spawn(move || {
            for i in 1..=1000_i64 {
                writer_cell.store(Row {
                    time: SystemTime::UNIX_EPOCH,
                    timestamp_ns: i,
                    values: vec![i as f64; 4],
                });
            }
        });

        for _ in 0..1000 {
            let row = cell.load();
            // Every field of a row comes from the same write
            for v in &row.values {
                assert_eq!(*v, row.timestamp_ns as f64);
            }
        }

        writer.join().unwrap();
    }
}
