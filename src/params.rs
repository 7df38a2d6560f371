//! Parameter block: user-visible knobs (speed, gap, weighting, tolerance,
//! frequency, volume) and the derived send/receive timing windows computed
//! from them.
//!
//! Formulas are grounded directly on `cw_sync_parameters_internal` of the C
//! original: dot length from calibration/speed, weighting adjustment,
//! PARIS-calibrated end-of-element correction (the 28/22 factor), and the
//! fixed-vs-adaptive receive range split.

use crate::error::{CwError, CwResult};

/// Base dot length, in microseconds, at 1 WPM. Standard PARIS calibration:
/// at N WPM a dot is `DOT_CALIBRATION / N` microseconds.
pub const DOT_CALIBRATION: i64 = 1_200_000;

pub const MIN_SPEED: u32 = 4;
pub const MAX_SPEED: u32 = 60;
pub const MIN_FREQUENCY: u32 = 0;
pub const MAX_FREQUENCY: u32 = 4_000;
pub const MIN_VOLUME: u32 = 0;
pub const MAX_VOLUME: u32 = 100;
pub const MIN_GAP: u32 = 0;
pub const MAX_GAP: u32 = 60;
pub const MIN_TOLERANCE: u32 = 0;
pub const MAX_TOLERANCE: u32 = 90;
pub const MIN_WEIGHTING: u32 = 20;
pub const MAX_WEIGHTING: u32 = 80;

pub const INITIAL_SEND_SPEED: u32 = 12;
pub const INITIAL_RECEIVE_SPEED: u32 = 12;
pub const INITIAL_FREQUENCY: u32 = 800;
pub const INITIAL_VOLUME: u32 = 70;
pub const INITIAL_GAP: u32 = 0;
pub const INITIAL_TOLERANCE: u32 = 50;
pub const INITIAL_WEIGHTING: u32 = 50;
pub const INITIAL_ADAPTIVE: bool = false;

/// `(DOT_CALIBRATION / INITIAL_RECEIVE_SPEED) * 2` — effectively two dot
/// lengths at the initial receive speed.
pub const INITIAL_THRESHOLD: i64 = (DOT_CALIBRATION / INITIAL_RECEIVE_SPEED as i64) * 2;

/// `(DOT_CALIBRATION / MAX_SPEED) / 2` — half a dot length at the fastest
/// permitted speed; any tone shorter than this is treated as electrical
/// noise rather than a real mark.
pub const INITIAL_NOISE_THRESHOLD: i64 = (DOT_CALIBRATION / MAX_SPEED as i64) / 2;

/// Derived send timing, all in microseconds.
#[derive(Debug, Clone, Copy, Default)]
pub struct SendTiming {
    pub dot_length: i64,
    pub dash_length: i64,
    pub end_of_ele_delay: i64,
    pub end_of_char_delay: i64,
    pub end_of_word_delay: i64,
    pub additional_delay: i64,
    pub adjustment_delay: i64,
}

/// Derived receive timing, all in microseconds.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReceiveTiming {
    pub dot_length: i64,
    pub dash_length: i64,
    pub dot_range_minimum: i64,
    pub dot_range_maximum: i64,
    pub dash_range_minimum: i64,
    pub dash_range_maximum: i64,
    pub eoe_range_minimum: i64,
    pub eoe_range_maximum: i64,
    pub eoe_range_ideal: i64,
    pub eoc_range_minimum: i64,
    pub eoc_range_maximum: i64,
    pub eoc_range_ideal: i64,
}

/// The full set of user-visible parameters plus their derived timings. All
/// setters validate against the permitted range and mark the derived
/// timings dirty; [`Parameters::sync`] recomputes them lazily, matching the
/// original's `cw_is_in_sync` dirty-flag discipline instead of recomputing
/// on every get.
#[derive(Debug, Clone)]
pub struct Parameters {
    send_speed: u32,
    receive_speed: u32,
    frequency: u32,
    volume: u32,
    gap: u32,
    tolerance: u32,
    weighting: u32,
    adaptive_receive: bool,
    noise_spike_threshold: i64,
    adaptive_receive_threshold: i64,

    in_sync: bool,
    send: SendTiming,
    receive: ReceiveTiming,
}

impl Default for Parameters {
    fn default() -> Self {
        Self::new()
    }
}

impl Parameters {
    pub fn new() -> Self {
        let mut p = Self {
            send_speed: INITIAL_SEND_SPEED,
            receive_speed: INITIAL_RECEIVE_SPEED,
            frequency: INITIAL_FREQUENCY,
            volume: INITIAL_VOLUME,
            gap: INITIAL_GAP,
            tolerance: INITIAL_TOLERANCE,
            weighting: INITIAL_WEIGHTING,
            adaptive_receive: INITIAL_ADAPTIVE,
            noise_spike_threshold: INITIAL_NOISE_THRESHOLD,
            adaptive_receive_threshold: INITIAL_THRESHOLD,
            in_sync: false,
            send: SendTiming::default(),
            receive: ReceiveTiming::default(),
        };
        p.sync();
        p
    }

    /// Reset every parameter (and adaptive/noise threshold state) to its
    /// initial default value.
    pub fn reset_all(&mut self) {
        *self = Self::new();
    }

    pub fn send_speed(&self) -> u32 {
        self.send_speed
    }

    pub fn set_send_speed(&mut self, wpm: u32) -> CwResult<()> {
        if !(MIN_SPEED..=MAX_SPEED).contains(&wpm) {
            return Err(CwError::InvalidArgument { field: "send_speed", value: wpm as i64 });
        }
        self.send_speed = wpm;
        self.in_sync = false;
        Ok(())
    }

    pub fn receive_speed(&self) -> u32 {
        self.receive_speed
    }

    /// Set the fixed receive speed. Fails with `NotPermitted` if adaptive
    /// receive speed tracking is currently enabled — adaptive mode derives
    /// the speed itself.
    pub fn set_receive_speed(&mut self, wpm: u32) -> CwResult<()> {
        if self.adaptive_receive {
            return Err(CwError::NotPermitted("receive speed is adaptive"));
        }
        if !(MIN_SPEED..=MAX_SPEED).contains(&wpm) {
            return Err(CwError::InvalidArgument { field: "receive_speed", value: wpm as i64 });
        }
        self.receive_speed = wpm;
        self.in_sync = false;
        Ok(())
    }

    pub fn frequency(&self) -> u32 {
        self.frequency
    }

    pub fn set_frequency(&mut self, hz: u32) -> CwResult<()> {
        if !(MIN_FREQUENCY..=MAX_FREQUENCY).contains(&hz) {
            return Err(CwError::InvalidArgument { field: "frequency", value: hz as i64 });
        }
        self.frequency = hz;
        Ok(())
    }

    pub fn volume(&self) -> u32 {
        self.volume
    }

    pub fn set_volume(&mut self, percent: u32) -> CwResult<()> {
        if !(MIN_VOLUME..=MAX_VOLUME).contains(&percent) {
            return Err(CwError::InvalidArgument { field: "volume", value: percent as i64 });
        }
        self.volume = percent;
        Ok(())
    }

    pub fn gap(&self) -> u32 {
        self.gap
    }

    pub fn set_gap(&mut self, dots: u32) -> CwResult<()> {
        if !(MIN_GAP..=MAX_GAP).contains(&dots) {
            return Err(CwError::InvalidArgument { field: "gap", value: dots as i64 });
        }
        self.gap = dots;
        self.in_sync = false;
        Ok(())
    }

    pub fn tolerance(&self) -> u32 {
        self.tolerance
    }

    pub fn set_tolerance(&mut self, percent: u32) -> CwResult<()> {
        if !(MIN_TOLERANCE..=MAX_TOLERANCE).contains(&percent) {
            return Err(CwError::InvalidArgument { field: "tolerance", value: percent as i64 });
        }
        self.tolerance = percent;
        self.in_sync = false;
        Ok(())
    }

    pub fn weighting(&self) -> u32 {
        self.weighting
    }

    pub fn set_weighting(&mut self, percent: u32) -> CwResult<()> {
        if !(MIN_WEIGHTING..=MAX_WEIGHTING).contains(&percent) {
            return Err(CwError::InvalidArgument { field: "weighting", value: percent as i64 });
        }
        self.weighting = percent;
        self.in_sync = false;
        Ok(())
    }

    pub fn is_adaptive_receive_enabled(&self) -> bool {
        self.adaptive_receive
    }

    pub fn enable_adaptive_receive(&mut self) {
        self.adaptive_receive = true;
        self.in_sync = false;
    }

    pub fn disable_adaptive_receive(&mut self) {
        self.adaptive_receive = false;
        self.in_sync = false;
    }

    pub fn noise_spike_threshold(&self) -> i64 {
        self.noise_spike_threshold
    }

    pub fn set_noise_spike_threshold(&mut self, usecs: i64) -> CwResult<()> {
        if usecs < 0 {
            return Err(CwError::InvalidArgument { field: "noise_spike_threshold", value: usecs });
        }
        self.noise_spike_threshold = usecs;
        Ok(())
    }

    /// Directly feed back a recalculated adaptive threshold (used by the
    /// receiver's adaptive tracking loop). Marks the block dirty so ranges
    /// resync on next access.
    pub(crate) fn set_adaptive_threshold(&mut self, threshold: i64) {
        self.adaptive_receive_threshold = threshold;
        self.in_sync = false;
    }

    pub fn adaptive_receive_threshold(&self) -> i64 {
        self.adaptive_receive_threshold
    }

    /// Recompute derived send/receive timings if dirty. Idempotent and
    /// cheap to call defensively before reading any derived value.
    pub fn sync(&mut self) {
        if self.in_sync {
            return;
        }

        let unit_length = DOT_CALIBRATION / self.send_speed as i64;
        let weighting_length = (2 * (self.weighting as i64 - 50) * unit_length) / 100;
        let dot_length = unit_length + weighting_length;
        let dash_length = 3 * dot_length;

        let end_of_ele_delay = unit_length - (28 * weighting_length) / 22;
        let end_of_char_delay = 3 * unit_length - end_of_ele_delay;
        let end_of_word_delay = 7 * unit_length - end_of_char_delay;
        let additional_delay = self.gap as i64 * unit_length;
        let adjustment_delay = (7 * additional_delay) / 3;

        self.send = SendTiming {
            dot_length,
            dash_length,
            end_of_ele_delay,
            end_of_char_delay,
            end_of_word_delay,
            additional_delay,
            adjustment_delay,
        };

        let unit_length = DOT_CALIBRATION / self.receive_speed as i64;
        if self.adaptive_receive {
            let derived = (DOT_CALIBRATION / (self.adaptive_receive_threshold / 2).max(1)) as u32;
            self.receive_speed = derived.clamp(MIN_SPEED, MAX_SPEED);
        } else {
            self.adaptive_receive_threshold = 2 * unit_length;
        }

        let receive_dot_length = unit_length;
        let receive_dash_length = 3 * unit_length;

        let (dot_range_minimum, dot_range_maximum, dash_range_minimum, dash_range_maximum,
             eoe_range_minimum, eoe_range_maximum, eoc_range_minimum, eoc_range_maximum);

        if self.adaptive_receive {
            dot_range_minimum = 0;
            dot_range_maximum = 2 * receive_dot_length;
            dash_range_minimum = dot_range_maximum;
            dash_range_maximum = i64::MAX;
            eoe_range_minimum = dot_range_minimum;
            eoe_range_maximum = dot_range_maximum;
            eoc_range_minimum = eoe_range_maximum;
            eoc_range_maximum = 5 * receive_dot_length;
        } else {
            let tolerance = (receive_dot_length * self.tolerance as i64) / 100;
            dot_range_minimum = receive_dot_length - tolerance;
            dot_range_maximum = receive_dot_length + tolerance;
            dash_range_minimum = receive_dash_length - tolerance;
            dash_range_maximum = receive_dash_length + tolerance;
            eoe_range_minimum = dot_range_minimum;
            eoe_range_maximum = dot_range_maximum;
            eoc_range_minimum = dash_range_minimum;
            eoc_range_maximum = dash_range_maximum + self.send.additional_delay + self.send.adjustment_delay;
        }

        self.receive = ReceiveTiming {
            dot_length: receive_dot_length,
            dash_length: receive_dash_length,
            dot_range_minimum,
            dot_range_maximum,
            dash_range_minimum,
            dash_range_maximum,
            eoe_range_minimum,
            eoe_range_maximum,
            eoe_range_ideal: unit_length,
            eoc_range_minimum,
            eoc_range_maximum,
            eoc_range_ideal: 3 * unit_length,
        };

        self.in_sync = true;
    }

    /// Derived send timings, recomputing first if dirty.
    pub fn send_timing(&mut self) -> SendTiming {
        self.sync();
        self.send
    }

    /// Derived receive timings, recomputing first if dirty.
    pub fn receive_timing(&mut self) -> ReceiveTiming {
        self.sync();
        self.receive
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paris_at_20_wpm_is_60_seconds_per_minute() {
        // PARIS has 50 units per word at standard timing; at W WPM, one word
        // takes 60/W seconds, i.e. one unit is 1200000/W/50 == dot/unit... we
        // check the simpler invariant: dot length matches DOT_CALIBRATION/wpm
        // before weighting adjustment (weighting=50 is neutral).
        let mut p = Parameters::new();
        p.set_send_speed(20).unwrap();
        let t = p.send_timing();
        assert_eq!(t.dot_length, DOT_CALIBRATION / 20);
        assert_eq!(t.dash_length, 3 * t.dot_length);
    }

    #[test]
    fn neutral_weighting_has_no_adjustment() {
        let mut p = Parameters::new();
        p.set_weighting(50).unwrap();
        let t = p.send_timing();
        let unit = DOT_CALIBRATION / p.send_speed() as i64;
        assert_eq!(t.dot_length, unit);
        assert_eq!(t.end_of_ele_delay, unit);
    }

    #[test]
    fn heavy_weighting_lengthens_dots_and_shortens_element_gap() {
        let mut p = Parameters::new();
        p.set_weighting(80).unwrap();
        let t = p.send_timing();
        let unit = DOT_CALIBRATION / p.send_speed() as i64;
        assert!(t.dot_length > unit);
        assert!(t.end_of_ele_delay < unit);
    }

    #[test]
    fn rejects_out_of_range_speed() {
        let mut p = Parameters::new();
        assert!(p.set_send_speed(3).is_err());
        assert!(p.set_send_speed(61).is_err());
        assert!(p.set_send_speed(MIN_SPEED).is_ok());
        assert!(p.set_send_speed(MAX_SPEED).is_ok());
    }

    #[test]
    fn adaptive_mode_rejects_manual_receive_speed() {
        let mut p = Parameters::new();
        p.enable_adaptive_receive();
        assert!(matches!(p.set_receive_speed(20), Err(CwError::NotPermitted(_))));
    }

    #[test]
    fn adaptive_ranges_cover_everything_above_two_dots() {
        let mut p = Parameters::new();
        p.enable_adaptive_receive();
        let t = p.receive_timing();
        assert_eq!(t.dot_range_minimum, 0);
        assert_eq!(t.dash_range_maximum, i64::MAX);
        assert_eq!(t.dash_range_minimum, t.dot_range_maximum);
    }

    #[test]
    fn fixed_mode_widens_ranges_with_tolerance() {
        let mut p = Parameters::new();
        p.set_tolerance(10).unwrap();
        let tight = p.receive_timing();
        p.set_tolerance(80).unwrap();
        let wide = p.receive_timing();
        assert!(wide.dot_range_maximum - wide.dot_range_minimum
            > tight.dot_range_maximum - tight.dot_range_minimum);
    }
}
