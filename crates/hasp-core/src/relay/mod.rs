//! Timed relay pulse with its own cooldown.
//!
//! Both authorization paths feed this one controller. The cooldown window is
//! counted from the *start* of the previous pulse, independent of when that
//! pulse ended, so back-to-back authorizations cannot hold the strike open.

use crate::clock::{MonotonicClock, millis_before};

/// Physical relay drive.
pub trait RelaySwitch {
    /// Energizes or de-energizes the output.
    fn set_energized(&mut self, on: bool);
}

/// Schedules timed pulses on a [`RelaySwitch`].
pub struct RelayController {
    switch: Box<dyn RelaySwitch>,
    clock: Box<dyn MonotonicClock>,
    relay_on: bool,
    pulse_end_ms: Option<u32>,
    cooldown_until_ms: Option<u32>,
}

impl RelayController {
    /// Creates a controller with the output de-energized.
    #[must_use]
    pub fn new(mut switch: Box<dyn RelaySwitch>, clock: Box<dyn MonotonicClock>) -> Self {
        switch.set_energized(false);
        tracing::debug!("relay initialized");
        Self {
            switch,
            clock,
            relay_on: false,
            pulse_end_ms: None,
            cooldown_until_ms: None,
        }
    }

    /// Performs any scheduled deactivation; call from the main loop.
    pub fn tick(&mut self) {
        let now_ms = self.clock.now_ms();
        if self.relay_on
            && self
                .pulse_end_ms
                .is_some_and(|end_ms| !millis_before(now_ms, end_ms))
        {
            self.write(false);
            self.pulse_end_ms = None;
            tracing::debug!("pulse ended");
        }
    }

    /// Starts a pulse unless the previous pulse's cooldown is still open.
    ///
    /// Returns whether the pulse was accepted. On acceptance the output is
    /// energized for `duration_ms` and a new cooldown of `cooldown_ms` opens
    /// from now.
    pub fn trigger_pulse(&mut self, duration_ms: u32, cooldown_ms: u32) -> bool {
        let now_ms = self.clock.now_ms();
        if let Some(until_ms) = self.cooldown_until_ms {
            if millis_before(now_ms, until_ms) {
                tracing::warn!(
                    remaining_ms = until_ms.wrapping_sub(now_ms),
                    "pulse denied: cooldown"
                );
                return false;
            }
        }

        self.write(true);
        self.pulse_end_ms = Some(now_ms.wrapping_add(duration_ms));
        self.cooldown_until_ms = Some(now_ms.wrapping_add(cooldown_ms));
        tracing::info!(duration_ms, cooldown_ms, "pulse started");
        true
    }

    /// Whether the output is currently energized.
    #[must_use]
    pub fn is_on(&self) -> bool {
        self.relay_on
    }

    /// Whether the cooldown from the previous pulse is still open.
    #[must_use]
    pub fn is_cooling_down(&self) -> bool {
        self.cooldown_until_ms
            .is_some_and(|until_ms| millis_before(self.clock.now_ms(), until_ms))
    }

    fn write(&mut self, on: bool) {
        self.relay_on = on;
        self.switch.set_energized(on);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;
    use crate::testing::FakeMonotonicClock;

    #[derive(Default)]
    struct RecordingSwitch {
        energized: Arc<AtomicBool>,
    }

    impl RelaySwitch for RecordingSwitch {
        fn set_energized(&mut self, on: bool) {
            self.energized.store(on, Ordering::SeqCst);
        }
    }

    fn controller() -> (RelayController, Arc<AtomicBool>, FakeMonotonicClock) {
        let energized = Arc::new(AtomicBool::new(true));
        let switch = RecordingSwitch {
            energized: Arc::clone(&energized),
        };
        let clock = FakeMonotonicClock::new(10_000);
        let controller = RelayController::new(Box::new(switch), Box::new(clock.clone()));
        (controller, energized, clock)
    }

    #[test]
    fn construction_deenergizes_output() {
        let (_, energized, _) = controller();
        assert!(!energized.load(Ordering::SeqCst));
    }

    #[test]
    fn pulse_energizes_and_tick_ends_it() {
        let (mut relay, energized, clock) = controller();

        assert!(relay.trigger_pulse(5_000, 5_000));
        assert!(relay.is_on());
        assert!(energized.load(Ordering::SeqCst));

        clock.advance(4_999);
        relay.tick();
        assert!(relay.is_on());

        clock.advance(1);
        relay.tick();
        assert!(!relay.is_on());
        assert!(!energized.load(Ordering::SeqCst));
    }

    #[test]
    fn cooldown_counts_from_pulse_start() {
        let (mut relay, _, clock) = controller();

        assert!(relay.trigger_pulse(1_000, 5_000));
        clock.advance(1_000);
        relay.tick();
        assert!(!relay.is_on());

        // Pulse ended, but the cooldown from pulse start is still open.
        clock.advance(3_999);
        assert!(relay.is_cooling_down());
        assert!(!relay.trigger_pulse(1_000, 5_000));

        clock.advance(1);
        assert!(!relay.is_cooling_down());
        assert!(relay.trigger_pulse(1_000, 5_000));
    }

    #[test]
    fn cooldown_survives_uptime_wrap() {
        let energized = Arc::new(AtomicBool::new(false));
        let switch = RecordingSwitch {
            energized: Arc::clone(&energized),
        };
        let clock = FakeMonotonicClock::new(u32::MAX - 2_000);
        let mut relay = RelayController::new(Box::new(switch), Box::new(clock.clone()));

        assert!(relay.trigger_pulse(1_000, 5_000));
        clock.advance(3_000); // wraps past zero
        assert!(relay.is_cooling_down());
        assert!(!relay.trigger_pulse(1_000, 5_000));

        clock.advance(2_000);
        assert!(relay.trigger_pulse(1_000, 5_000));
    }
}
