//! Trip-point hysteresis controller
//!
//! # How It Works
//!
//! 1. **Trip points**: each sensor has a set of `temperature:speed` pairs. A
//!    reading at or above a trigger temperature demands that speed.
//!
//! 2. **Hysteresis**: once a trigger fires, the sensor keeps demanding its
//!    speed until the reading drops below `trigger - hysteresis`.
//!
//! 3. **Aggregation**: the fan runs at the highest speed any sensor demands.
//!
//! 4. **Dwell interval**: a lower speed is only adopted after
//!    `min_interval_duration` seconds have passed since the last change or
//!    confirmation of the current hardware level.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, warn};

use crate::constants::timing;
use crate::data::{SensorId, SensorReading, Settings, SpeedCode, TripState};
use crate::error::Result;
use crate::hw::{Actuator, SensorReader};

/// Why a poll ended at the speed it did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PollDecision {
    /// Fan control is switched off, firmware controls the fan
    Disabled,
    /// Current fan level could not be read
    FanStateUnavailable,
    /// Sensors could not be read
    SensorFailure,
    /// Speed derived from trip points
    Computed {
        new_speed: SpeedCode,
        /// A decrease was held back by the dwell interval
        suppressed: bool,
    },
}

/// Outcome of one poll
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PollReport {
    /// Speed handed to the actuator
    pub speed: SpeedCode,
    pub decision: PollDecision,
    /// Delay until the next poll
    #[serde(skip)]
    pub next_poll: Duration,
}

/// Clamp a poll delay so the watchdog is always rearmed in time
pub fn clamp_poll_interval(interval_ms: u64) -> Duration {
    Duration::from_millis(interval_ms.clamp(
        timing::MIN_POLL_INTERVAL_MS,
        timing::WATCHDOG_SECS * 1000,
    ))
}

#[derive(Debug, Clone)]
pub struct HysteresisController {
    trips: BTreeMap<SensorId, TripState>,
    interval_end: Instant,
    poll_interval: Duration,
}

impl HysteresisController {
    /// Create a controller whose first dwell window ends
    /// `min_interval_duration` seconds after `now`
    pub fn new(min_interval_duration: u32, now: Instant) -> Self {
        Self {
            trips: BTreeMap::new(),
            interval_end: now + Duration::from_secs(u64::from(min_interval_duration)),
            poll_interval: clamp_poll_interval(timing::POLL_INTERVAL_MS),
        }
    }

    /// Use a different poll period (still clamped to the watchdog window)
    pub fn with_poll_interval(mut self, interval_ms: u64) -> Self {
        self.poll_interval = clamp_poll_interval(interval_ms);
        self
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Forget all trips, e.g. after a configuration change
    pub fn reset_trips(&mut self) {
        self.trips.clear();
    }

    /// Release threshold per tripped sensor
    pub fn trip_temperatures(&self) -> BTreeMap<SensorId, i32> {
        self.trips
            .iter()
            .map(|(id, trip)| (*id, trip.armed_threshold))
            .collect()
    }

    /// Locked speed per tripped sensor
    pub fn trip_speeds(&self) -> BTreeMap<SensorId, SpeedCode> {
        self.trips
            .iter()
            .map(|(id, trip)| (*id, trip.locked_speed))
            .collect()
    }

    /// Run one control cycle against the hardware
    pub fn poll(
        &mut self,
        settings: &Settings,
        reader: &SensorReader,
        actuator: &mut Actuator,
        now: Instant,
    ) -> PollReport {
        let level = match actuator.fan_state() {
            Ok(state) => {
                debug!(level = %state.level, rpm = state.rpm, "Polling sensors");
                state.level
            }
            Err(e) => {
                warn!("Unable to read fan state: {}", e);
                return self.failsafe(actuator, None, PollDecision::FanStateUnavailable);
            }
        };

        if !settings.enabled {
            return self.failsafe(actuator, Some(level), PollDecision::Disabled);
        }

        let report = self.evaluate(settings, reader.read(settings), level, now);
        actuator.set_speed(report.speed, Some(level));
        report
    }

    fn failsafe(
        &self,
        actuator: &mut Actuator,
        level: Option<SpeedCode>,
        decision: PollDecision,
    ) -> PollReport {
        actuator.set_speed(SpeedCode::AUTO, level);
        PollReport {
            speed: SpeedCode::AUTO,
            decision,
            next_poll: self.poll_interval,
        }
    }

    /// Decide the speed for one set of readings given the current hardware level
    ///
    /// A failed sensor read yields hardware auto mode for this cycle only.
    pub fn evaluate(
        &mut self,
        settings: &Settings,
        readings: Result<Vec<SensorReading>>,
        level: SpeedCode,
        now: Instant,
    ) -> PollReport {
        let readings = match readings {
            Ok(readings) => readings,
            Err(e) => {
                debug!("Reading temperature values failed: {}", e);
                return PollReport {
                    speed: SpeedCode::AUTO,
                    decision: PollDecision::SensorFailure,
                    next_poll: self.poll_interval,
                };
            }
        };

        let new_speed = self.compute_speed(settings, &readings);
        let dwell = Duration::from_secs(u64::from(settings.min_interval_duration));

        let (speed, suppressed) = if new_speed < level && now < self.interval_end {
            debug!(
                %new_speed,
                %level,
                "Interval not over yet, keeping the current level"
            );
            (level, true)
        } else {
            self.interval_end = now + dwell;
            (new_speed, false)
        };

        PollReport {
            speed,
            decision: PollDecision::Computed {
                new_speed,
                suppressed,
            },
            next_poll: self.poll_interval,
        }
    }

    /// Highest speed demanded by any sensor, updating trip state
    pub fn compute_speed(&mut self, settings: &Settings, readings: &[SensorReading]) -> SpeedCode {
        let hysteresis = settings.hysteresis as i32;
        let mut new_speed = SpeedCode::OFF;

        for reading in readings {
            let Some(temp) = reading.active_value() else {
                continue;
            };
            let id = reading.sensor_id;
            let mut floor = SpeedCode::OFF;

            if let Some(trip) = self.trips.get(&id) {
                if temp >= trip.armed_threshold {
                    floor = trip.locked_speed;
                } else {
                    self.trips.remove(&id);
                }
            }

            if let Some(points) = settings.trigger_points.get(&id) {
                for (&trigger_temp, &speed) in points {
                    if temp >= trigger_temp && speed > floor {
                        self.trips.insert(
                            id,
                            TripState {
                                armed_threshold: trigger_temp - hysteresis,
                                locked_speed: speed,
                            },
                        );
                        floor = speed;
                    }
                }
            }

            debug!(sensor = id, reading = temp, speed = %floor, "Sensor evaluated");
            new_speed = new_speed.max(floor);
        }
        new_speed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::TriggerSet;
    use crate::error::TpfanError;

    fn speed(v: u16) -> SpeedCode {
        SpeedCode::new(v).unwrap()
    }

    fn settings(points: &[(SensorId, &[(i32, u16)])]) -> Settings {
        let mut settings = Settings {
            enabled: true,
            hysteresis: 3,
            min_interval_duration: 10,
            ..Default::default()
        };
        for (id, set) in points {
            let set: TriggerSet = set.iter().map(|(t, s)| (*t, speed(*s))).collect();
            settings.trigger_points.insert(*id, set);
        }
        settings
    }

    fn reading(sensor_id: SensorId, value: i32) -> SensorReading {
        SensorReading {
            sensor_id,
            value: Some(value),
        }
    }

    #[test]
    fn test_hysteresis_sequence() {
        let settings = settings(&[(0, &[(55, 2), (60, 8)])]);
        let mut controller = HysteresisController::new(10, Instant::now());

        let contributions: Vec<u16> = [50, 58, 62, 57, 40]
            .iter()
            .map(|t| controller.compute_speed(&settings, &[reading(0, *t)]).value())
            .collect();
        assert_eq!(contributions, vec![0, 2, 8, 8, 0]);
        assert!(controller.trip_speeds().is_empty());
    }

    #[test]
    fn test_trip_introspection() {
        let settings = settings(&[(0, &[(55, 2), (60, 8)])]);
        let mut controller = HysteresisController::new(10, Instant::now());
        controller.compute_speed(&settings, &[reading(0, 62)]);

        assert_eq!(controller.trip_temperatures(), BTreeMap::from([(0, 57)]));
        assert_eq!(controller.trip_speeds(), BTreeMap::from([(0, speed(8))]));

        controller.reset_trips();
        assert!(controller.trip_temperatures().is_empty());
    }

    #[test]
    fn test_max_across_sensors() {
        let settings = settings(&[(0, &[(50, 3)]), (1, &[(40, 5), (70, 256)])]);
        let mut controller = HysteresisController::new(0, Instant::now());
        let readings = [reading(0, 60), reading(1, 45), reading(2, 90)];
        assert_eq!(controller.compute_speed(&settings, &readings), speed(5));
    }

    #[test]
    fn test_disabled_and_absent_sensors_are_silent() {
        let settings = settings(&[(0, &[(0, 255)]), (1, &[(0, 255)])]);
        let mut controller = HysteresisController::new(0, Instant::now());
        let readings = [
            reading(0, 0),
            SensorReading {
                sensor_id: 1,
                value: None,
            },
        ];
        assert_eq!(controller.compute_speed(&settings, &readings), SpeedCode::OFF);
    }

    #[test]
    fn test_equal_speed_keeps_existing_arm() {
        let settings = settings(&[(0, &[(50, 4), (60, 4)])]);
        let mut controller = HysteresisController::new(0, Instant::now());
        controller.compute_speed(&settings, &[reading(0, 65)]);
        // First matching trigger armed, the tie at 60 did not replace it
        assert_eq!(controller.trip_temperatures()[&0], 47);

        assert_eq!(controller.compute_speed(&settings, &[reading(0, 48)]), speed(4));
    }

    #[test]
    fn test_dwell_suppresses_decrease() {
        let settings = settings(&[(0, &[(50, 6)])]);
        let start = Instant::now();
        let mut controller = HysteresisController::new(10, start);

        let report = controller.evaluate(&settings, Ok(vec![reading(0, 40)]), speed(6), start);
        assert_eq!(report.speed, speed(6));
        assert_eq!(
            report.decision,
            PollDecision::Computed {
                new_speed: SpeedCode::OFF,
                suppressed: true
            }
        );

        let later = start + Duration::from_secs(11);
        let report = controller.evaluate(&settings, Ok(vec![reading(0, 40)]), speed(6), later);
        assert_eq!(report.speed, SpeedCode::OFF);

        // Fresh window after the adopted change
        let report = controller.evaluate(
            &settings,
            Ok(vec![reading(0, 40)]),
            speed(3),
            later + Duration::from_secs(1),
        );
        assert_eq!(report.speed, speed(3));
    }

    #[test]
    fn test_equal_speed_refreshes_window() {
        let settings = settings(&[(0, &[(50, 6)])]);
        let start = Instant::now();
        let mut controller = HysteresisController::new(10, start);

        let steady = start + Duration::from_secs(20);
        let report = controller.evaluate(&settings, Ok(vec![reading(0, 55)]), speed(6), steady);
        assert_eq!(report.speed, speed(6));

        // Drop below the release threshold 5 s later: still inside the refreshed window
        let report = controller.evaluate(
            &settings,
            Ok(vec![reading(0, 30)]),
            speed(6),
            steady + Duration::from_secs(5),
        );
        assert_eq!(report.speed, speed(6));
    }

    #[test]
    fn test_increase_is_immediate_and_restarts_window() {
        let settings = settings(&[(0, &[(50, 7)])]);
        let start = Instant::now();
        let mut controller = HysteresisController::new(0, start);

        let raised = start + Duration::from_secs(20);
        let report = controller.evaluate(&settings, Ok(vec![reading(0, 52)]), speed(2), raised);
        assert_eq!(report.speed, speed(7));

        // Trip released, but the 10 s window opened by the increase still holds
        let report = controller.evaluate(
            &settings,
            Ok(vec![reading(0, 30)]),
            speed(7),
            raised + Duration::from_secs(5),
        );
        assert_eq!(report.speed, speed(7));
        assert_eq!(
            report.decision,
            PollDecision::Computed {
                new_speed: SpeedCode::OFF,
                suppressed: true
            }
        );

        let report = controller.evaluate(
            &settings,
            Ok(vec![reading(0, 30)]),
            speed(7),
            raised + Duration::from_secs(11),
        );
        assert_eq!(report.speed, SpeedCode::OFF);
    }

    #[test]
    fn test_sensor_failure_is_auto() {
        let settings = settings(&[(0, &[(50, 7)])]);
        let mut controller = HysteresisController::new(0, Instant::now());
        let report = controller.evaluate(
            &settings,
            Err(TpfanError::sensor_unavailable("/proc/acpi/ibm/thermal", "EIO")),
            speed(4),
            Instant::now(),
        );
        assert_eq!(report.speed, SpeedCode::AUTO);
        assert_eq!(report.decision, PollDecision::SensorFailure);
    }

    #[test]
    fn test_poll_interval_clamped_to_watchdog() {
        assert_eq!(clamp_poll_interval(3500), Duration::from_millis(3500));
        assert_eq!(clamp_poll_interval(60_000), Duration::from_millis(5000));
        assert_eq!(clamp_poll_interval(0), Duration::from_millis(1));
        let controller = HysteresisController::new(0, Instant::now()).with_poll_interval(9000);
        assert_eq!(controller.poll_interval(), Duration::from_secs(5));
    }
}
