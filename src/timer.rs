//! Software one-shot timers
//!
//! # Copyright
//! Copyright (C) 2020 QUARTIQ GmbH - All Rights Reserved
//! Unauthorized usage, editing, or copying is strictly prohibited.
//! Proprietary and confidential.
use crate::Error;

/// A millisecond timestamp from the system monotonic clock.
pub type Instant = fugit::TimerInstantU64<1000>;

/// A millisecond duration.
pub type Duration = fugit::MillisDurationU64;

/// A source of monotonic time.
pub trait Clock {
    fn now(&mut self) -> Instant;
}

/// The state of an [AsyncTimer] when queried.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TimerState {
    NotRunning,
    Running,
    Expired,
}

/// A non-blocking one-shot timer polled against a [Clock].
#[derive(Debug, Default, Copy, Clone)]
pub struct AsyncTimer {
    deadline: Option<Instant>,
}

impl AsyncTimer {
    pub const fn new() -> Self {
        Self { deadline: None }
    }

    /// Arm the timer.
    ///
    /// # Args
    /// * `clock` - The time source.
    /// * `timeout` - The time after which the timer expires.
    ///
    /// # Returns
    /// An error if the timer is already running.
    pub fn start(&mut self, clock: &mut dyn Clock, timeout: Duration) -> Result<(), Error> {
        if self.deadline.is_some() {
            return Err(Error::Timer);
        }

        self.deadline = Some(clock.now() + timeout);
        Ok(())
    }

    /// Check the timer. An expired timer is disarmed by the query.
    pub fn query(&mut self, clock: &mut dyn Clock) -> TimerState {
        match self.deadline {
            None => TimerState::NotRunning,
            Some(deadline) if clock.now() >= deadline => {
                self.deadline = None;
                TimerState::Expired
            }
            Some(_) => TimerState::Running,
        }
    }

    /// Disarm the timer.
    pub fn stop(&mut self) {
        self.deadline = None;
    }

    pub fn is_running(&self) -> bool {
        self.deadline.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockClock;

    #[test]
    fn timer_expires_once() {
        let mut clock = MockClock::new(15);
        let mut timer = AsyncTimer::new();

        timer.start(&mut clock, Duration::millis(25)).unwrap();
        assert_eq!(timer.query(&mut clock), TimerState::Running);
        assert_eq!(timer.query(&mut clock), TimerState::Expired);
        assert_eq!(timer.query(&mut clock), TimerState::NotRunning);
    }

    #[test]
    fn restart_while_running_fails() {
        let mut clock = MockClock::new(1);
        let mut timer = AsyncTimer::new();

        timer.start(&mut clock, Duration::millis(100)).unwrap();
        assert_eq!(timer.start(&mut clock, Duration::millis(100)), Err(Error::Timer));

        timer.stop();
        assert!(timer.start(&mut clock, Duration::millis(100)).is_ok());
    }
}
