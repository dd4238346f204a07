//! Wall-clock timings of one query execution, step by step.

use std::fmt;
use std::time::{Duration, Instant};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ComputeProfile {
    /// Kernel source generation plus shader compilation.
    pub compile: Duration,
    /// Buffer allocation, pipeline creation and command recording.
    pub setup: Duration,
    pub transfer_write: Duration,
    /// Submission and fence wait.
    pub execution: Duration,
    pub transfer_read: Duration,
}

impl ComputeProfile {
    pub fn transfer(&self) -> Duration {
        self.transfer_write + self.transfer_read
    }

    pub fn total(&self) -> Duration {
        self.compile + self.setup + self.transfer() + self.execution
    }
}

/// Run `step`, adding its elapsed time to `slot`.
pub(crate) fn timed<T>(slot: &mut Duration, step: impl FnOnce() -> T) -> T {
    let start = Instant::now();
    let out = step();
    *slot += start.elapsed();
    out
}

impl fmt::Display for ComputeProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ms = |d: Duration| d.as_secs_f64() * 1e3;
        writeln!(f, "compile        {:>10.3} ms", ms(self.compile))?;
        writeln!(f, "setup          {:>10.3} ms", ms(self.setup))?;
        writeln!(f, "transfer write {:>10.3} ms", ms(self.transfer_write))?;
        writeln!(f, "execute        {:>10.3} ms", ms(self.execution))?;
        writeln!(f, "transfer read  {:>10.3} ms", ms(self.transfer_read))?;
        write!(f, "total          {:>10.3} ms", ms(self.total()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_totals() {
        let p = ComputeProfile {
            compile: Duration::from_millis(1),
            setup: Duration::from_millis(2),
            transfer_write: Duration::from_millis(3),
            execution: Duration::from_millis(4),
            transfer_read: Duration::from_millis(5),
        };
        assert_eq!(p.transfer(), Duration::from_millis(8));
        assert_eq!(p.total(), Duration::from_millis(15));
        assert!(p.to_string().contains("total"));
    }

    #[test]
    fn test_timed_accumulates() {
        let mut slot = Duration::from_secs(1);
        let v = timed(&mut slot, || 42);
        assert_eq!(v, 42);
        assert!(slot >= Duration::from_secs(1));
    }
}
