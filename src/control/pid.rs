//! PID controller for heart-rate based power targeting.
//!
//! The controller maps a heart-rate error (setpoint minus measurement, in
//! bpm) to a power target in watts. Evaluation is driven by the natural
//! cadence of heart-rate notifications; there is no internal throttling.

use std::time::{Duration, Instant};

/// Tunable PID parameters and output range.
#[derive(Debug, Clone)]
pub struct PidConfig {
    /// Proportional gain.
    pub kp: f64,
    /// Integral gain.
    pub ki: f64,
    /// Derivative gain.
    pub kd: f64,
    /// Target heart rate in bpm.
    pub setpoint_bpm: u16,
    /// Lower output clamp in watts.
    pub min_power_w: u16,
    /// Upper output clamp in watts.
    pub max_power_w: u16,
    /// Assumed spacing between evaluations; used as the elapsed-time
    /// baseline for the first evaluation after a reset.
    pub sample_interval: Duration,
}

impl Default for PidConfig {
    fn default() -> Self {
        Self {
            kp: 1.0,
            ki: 0.1,
            kd: 0.05,
            setpoint_bpm: 135,
            min_power_w: 50,
            max_power_w: 600,
            sample_interval: Duration::from_secs(5),
        }
    }
}

/// A PID controller with output clamping and integral anti-windup.
///
/// While disabled the integral term does not accumulate and `evaluate`
/// keeps returning the last output (`None` if there has never been one).
/// Enabling performs a bumpless transfer: the integral is seeded from the
/// last output so control resumes from the adapted operating point.
#[derive(Debug)]
pub struct PidController {
    kp: f64,
    ki: f64,
    kd: f64,
    setpoint: f64,
    out_min: f64,
    out_max: f64,
    sample_interval: Duration,
    enabled: bool,
    integral: f64,
    last_input: Option<f64>,
    last_output: Option<f64>,
    last_update: Option<Instant>,
}

impl PidController {
    /// Create a disabled controller from the given configuration.
    pub fn new(config: &PidConfig) -> Self {
        Self {
            kp: config.kp,
            ki: config.ki,
            kd: config.kd,
            setpoint: f64::from(config.setpoint_bpm),
            out_min: f64::from(config.min_power_w),
            out_max: f64::from(config.max_power_w),
            sample_interval: config.sample_interval,
            enabled: false,
            integral: 0.0,
            last_input: None,
            last_output: None,
            last_update: None,
        }
    }

    /// Update the proportional gain; takes effect on the next evaluation.
    pub fn set_kp(&mut self, value: f64) {
        self.kp = value;
    }

    /// Update the integral gain; takes effect on the next evaluation.
    pub fn set_ki(&mut self, value: f64) {
        self.ki = value;
    }

    /// Update the derivative gain; takes effect on the next evaluation.
    pub fn set_kd(&mut self, value: f64) {
        self.kd = value;
    }

    /// Update the target heart rate. Does not reset the integral term.
    pub fn set_setpoint(&mut self, bpm: u16) {
        self.setpoint = f64::from(bpm);
    }

    /// Update both output clamp bounds for all future evaluations.
    ///
    /// Accumulated state is re-clamped into the new range so a tightened
    /// bound takes effect immediately rather than after windup decays.
    /// `min <= max` is the caller's responsibility.
    pub fn set_output_bounds(&mut self, min: u16, max: u16) {
        self.out_min = f64::from(min);
        self.out_max = f64::from(max);
        self.integral = self.clamp(self.integral);
        self.last_output = self.last_output.map(|out| self.clamp(out));
    }

    /// Turn integral accumulation on, seeding it from the last output.
    pub fn enable(&mut self) {
        if self.enabled {
            return;
        }
        self.enabled = true;
        self.integral = self.clamp(self.last_output.unwrap_or(0.0));
        self.last_input = None;
        self.last_update = None;
    }

    /// Turn integral accumulation off. Evaluations keep returning the last
    /// output without advancing any internal state.
    pub fn disable(&mut self) {
        self.enabled = false;
    }

    /// Whether the controller is currently accumulating.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Clear integral and derivative memory without touching gains,
    /// setpoint, or bounds.
    pub fn reset(&mut self) {
        self.integral = self.clamp(0.0);
        self.last_input = None;
        self.last_output = None;
        self.last_update = None;
    }

    /// Run one control step against a heart-rate measurement.
    ///
    /// Returns the clamped control output, or `None` if the controller has
    /// never produced one (disabled since construction or just reset).
    pub fn evaluate(&mut self, measured_bpm: u16) -> Option<f64> {
        if !self.enabled {
            return self.last_output;
        }

        let now = Instant::now();
        let dt = match self.last_update {
            Some(prev) => {
                let elapsed = now.duration_since(prev).as_secs_f64();
                // Guard the derivative against a zero-length interval when
                // two notifications land back to back.
                if elapsed > 0.0 {
                    elapsed
                } else {
                    self.sample_interval.as_secs_f64()
                }
            }
            None => self.sample_interval.as_secs_f64(),
        };

        let input = f64::from(measured_bpm);
        let error = self.setpoint - input;

        let proportional = self.kp * error;

        self.integral += self.ki * error * dt;
        self.integral = self.clamp(self.integral);

        // Derivative on measurement avoids output kicks on setpoint changes.
        let derivative = match self.last_input {
            Some(last) => -self.kd * (input - last) / dt,
            None => 0.0,
        };

        let output = self.clamp(proportional + self.integral + derivative);

        self.last_input = Some(input);
        self.last_output = Some(output);
        self.last_update = Some(now);

        Some(output)
    }

    fn clamp(&self, value: f64) -> f64 {
        value.max(self.out_min).min(self.out_max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> PidConfig {
        PidConfig {
            kp: 1.0,
            ki: 0.1,
            kd: 0.05,
            setpoint_bpm: 135,
            min_power_w: 50,
            max_power_w: 600,
            sample_interval: Duration::from_secs(5),
        }
    }

    #[test]
    fn disabled_controller_emits_nothing() {
        let mut pid = PidController::new(&test_config());
        assert_eq!(pid.evaluate(120), None);
        assert_eq!(pid.evaluate(90), None);
    }

    #[test]
    fn reset_clears_output_baseline() {
        let mut pid = PidController::new(&test_config());
        pid.enable();
        assert!(pid.evaluate(120).is_some());
        pid.reset();
        // Still enabled, so the next evaluation produces fresh output.
        assert!(pid.evaluate(120).is_some());
        pid.disable();
        pid.reset();
        assert_eq!(pid.evaluate(120), None);
    }

    #[test]
    fn output_stays_within_bounds_under_large_error() {
        let mut pid = PidController::new(&test_config());
        pid.set_output_bounds(100, 300);
        pid.enable();
        // Measurement far below setpoint: drives output to the ceiling.
        for _ in 0..10 {
            let out = pid.evaluate(40).unwrap();
            assert!((100.0..=300.0).contains(&out), "output {out} out of range");
        }
        // Measurement far above setpoint: drives output to the floor.
        for _ in 0..10 {
            let out = pid.evaluate(220).unwrap();
            assert!((100.0..=300.0).contains(&out), "output {out} out of range");
        }
    }

    #[test]
    fn setpoint_change_keeps_integral() {
        let mut pid = PidController::new(&test_config());
        pid.enable();
        pid.evaluate(120);
        pid.evaluate(125);
        let accumulated = pid.integral;
        assert!(accumulated != 0.0);
        pid.set_setpoint(150);
        assert_eq!(pid.integral, accumulated);
    }

    #[test]
    fn tightened_bounds_reclamp_state() {
        let mut pid = PidController::new(&test_config());
        pid.enable();
        // Wind the integral up toward the default ceiling.
        for _ in 0..50 {
            pid.evaluate(60);
        }
        pid.set_output_bounds(100, 150);
        assert!(pid.integral <= 150.0);
        let out = pid.evaluate(60).unwrap();
        assert!((100.0..=150.0).contains(&out));
    }

    #[test]
    fn enable_is_bumpless() {
        let mut pid = PidController::new(&test_config());
        pid.enable();
        let before = pid.evaluate(134).unwrap();
        pid.disable();
        // Gated evaluations keep reporting the last output.
        assert_eq!(pid.evaluate(134), Some(before));
        pid.enable();
        assert_eq!(pid.integral, before);
    }

    #[test]
    fn gain_change_applies_on_next_evaluation() {
        let mut pid = PidController::new(&test_config());
        pid.set_output_bounds(0, 600);
        pid.enable();
        pid.set_ki(0.0);
        pid.set_kd(0.0);
        pid.set_kp(2.0);
        // Pure proportional: error of 10 bpm.
        let out = pid.evaluate(125).unwrap();
        assert_eq!(out, 20.0);
    }
}
