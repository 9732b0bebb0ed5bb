use std::{
    fmt,
    time::{Duration, Instant},
};

/// Wall clock timer for a training run.
#[derive(Debug, Clone, Copy)]
pub struct ElapsedTimer {
    start: Instant,
}

impl ElapsedTimer {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Seconds below a minute, minutes below an hour, hours otherwise.
    pub fn format_seconds(sec: f64) -> String {
        if sec < 60. {
            format!("{} sec", sec)
        } else if sec < 60. * 60. {
            format!("{} min", sec / 60.)
        } else {
            format!("{} hr", sec / (60. * 60.))
        }
    }
}

impl Default for ElapsedTimer {
    fn default() -> Self {
        Self::start()
    }
}

impl fmt::Display for ElapsedTimer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Elapsed: {}",
            Self::format_seconds(self.elapsed().as_secs_f64())
        )
    }
}
