//! Mapping from the 0-100 UI ranges to signal parameters.

use std::f32::consts::FRAC_PI_4;

/// Upper bound of every 0-100 mixer control.
pub const MAX_LEVEL: u8 = 100;

/// Attenuation per UI volume unit below 100.
const DB_PER_STEP: f32 = 0.6;

pub(crate) fn check_level(value: u8) -> Result<u8, u8> {
    if value <= MAX_LEVEL { Ok(value) } else { Err(value) }
}

/// UI volume to decibels: 100 is unity, 1 is -59.4 dB and 0 is hard silence.
///
/// ```
/// use beatgrid_transport::volume_to_db;
///
/// assert_eq!(volume_to_db(100), 0.0);
/// assert_eq!(volume_to_db(0), f32::NEG_INFINITY);
/// ```
pub fn volume_to_db(volume: u8) -> f32 {
    if volume == 0 {
        return f32::NEG_INFINITY;
    }
    (volume.min(MAX_LEVEL) as f32 - MAX_LEVEL as f32) * DB_PER_STEP
}

/// Decibels to a linear amplitude factor. `-inf` maps to exactly 0.
pub fn db_to_gain(db: f32) -> f32 {
    if db == f32::NEG_INFINITY {
        return 0.0;
    }
    10f32.powf(db / 20.0)
}

/// UI pan to stereo position in -1.0 (left) ..= 1.0 (right).
pub fn pan_to_position(pan: u8) -> f32 {
    (pan.min(MAX_LEVEL) as f32 - 50.0) / 50.0
}

/// Equal-power left/right gains for a stereo position.
pub fn pan_gains(position: f32) -> (f32, f32) {
    let angle = (position.clamp(-1.0, 1.0) + 1.0) * FRAC_PI_4;
    (angle.cos(), angle.sin())
}

/// Output audibility under the solo rule: while anything is soloed only soloed
/// channels sound, and an explicit mute always silences.
pub fn is_audible(muted: bool, soloed: bool, any_soloed: bool) -> bool {
    if muted {
        return false;
    }
    !any_soloed || soloed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_volume_endpoints() {
        assert_eq!(volume_to_db(0), f32::NEG_INFINITY);
        assert_eq!(volume_to_db(100), 0.0);
        assert!((volume_to_db(1) - -59.4).abs() < 1e-4);
        assert!((volume_to_db(75) - -15.0).abs() < 1e-4);
    }

    #[test]
    fn test_volume_is_monotonic() {
        for v in 0..MAX_LEVEL {
            assert!(volume_to_db(v) <= volume_to_db(v + 1), "not monotonic at {v}");
        }
    }

    #[test]
    fn test_db_to_gain() {
        assert_eq!(db_to_gain(f32::NEG_INFINITY), 0.0);
        assert_eq!(db_to_gain(0.0), 1.0);
        assert!((db_to_gain(-6.0) - 0.501).abs() < 1e-3);
    }

    #[test]
    fn test_pan_mapping() {
        assert_eq!(pan_to_position(0), -1.0);
        assert_eq!(pan_to_position(50), 0.0);
        assert_eq!(pan_to_position(100), 1.0);
    }

    #[test]
    fn test_pan_gains_are_equal_power() {
        let (left, right) = pan_gains(-1.0);
        assert!((left - 1.0).abs() < 1e-6 && right.abs() < 1e-6);

        let (left, right) = pan_gains(0.0);
        assert!((left - right).abs() < 1e-6);
        assert!((left * left + right * right - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_solo_rule() {
        // nothing soloed: own mute flag decides
        assert!(is_audible(false, false, false));
        assert!(!is_audible(true, false, false));

        // something soloed: only soloed channels sound
        assert!(is_audible(false, true, true));
        assert!(!is_audible(false, false, true));
        assert!(!is_audible(true, true, true));
    }
}
