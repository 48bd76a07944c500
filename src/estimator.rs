//! Heart-rate based energy expenditure (Keytel et al. 2005).
//!
//! The regression yields kJ/min; dividing by 4.184 converts to kcal/min.

use std::time::Duration;

use crate::profile::{BiologicalSex, PhysiologicalProfile};

/// Readings at or below this many bpm are treated as non-exercise and burn nothing.
pub const NOISE_FLOOR_BPM: u8 = 40;

const KJ_PER_KCAL: f64 = 4.184;

struct KeytelCoefficients {
    intercept: f64,
    heart_rate: f64,
    weight: f64,
    age: f64,
}

const MALE: KeytelCoefficients = KeytelCoefficients {
    intercept: -55.0969,
    heart_rate: 0.6309,
    weight: 0.1988,
    age: 0.2017,
};

const FEMALE: KeytelCoefficients = KeytelCoefficients {
    intercept: -20.4022,
    heart_rate: 0.4472,
    weight: -0.1263,
    age: 0.074,
};

/// Raw burn rate in kcal/min. Zero at or below the noise floor; may be negative
/// above it for light bodies at low heart rates.
pub fn burn_rate_per_minute(heart_rate: u8, profile: &PhysiologicalProfile) -> f64 {
    if heart_rate <= NOISE_FLOOR_BPM {
        return 0.0;
    }

    let c = match profile.sex {
        BiologicalSex::Male => &MALE,
        BiologicalSex::Female => &FEMALE,
    };

    (c.intercept
        + c.heart_rate * f64::from(heart_rate)
        + c.weight * profile.weight_kg
        + c.age * profile.age_years)
        / KJ_PER_KCAL
}

/// Calories burned over `elapsed` at `heart_rate`. Never negative.
pub fn calories_delta(heart_rate: u8, profile: &PhysiologicalProfile, elapsed: Duration) -> f64 {
    let minutes = elapsed.as_secs_f64() / 60.0;
    (burn_rate_per_minute(heart_rate, profile) * minutes).max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn male(weight_kg: f64, age_years: f64) -> PhysiologicalProfile {
        PhysiologicalProfile { weight_kg, age_years, sex: BiologicalSex::Male }
    }

    fn female(weight_kg: f64, age_years: f64) -> PhysiologicalProfile {
        PhysiologicalProfile { weight_kg, age_years, sex: BiologicalSex::Female }
    }

    #[test]
    fn test_male_rate() {
        // (-55.0969 + 75.708 + 15.904 + 5.0425) / 4.184
        let rate = burn_rate_per_minute(120, &male(80.0, 25.0));
        assert!((rate - 9.9325).abs() < 0.005, "rate was {rate}");

        let delta = calories_delta(120, &male(80.0, 25.0), Duration::from_secs(60));
        assert!((delta - rate).abs() < 1e-9);
    }

    #[test]
    fn test_female_rate_over_two_minutes() {
        // (-20.4022 + 58.136 - 7.578 + 2.22) / 4.184
        let rate = burn_rate_per_minute(130, &female(60.0, 30.0));
        assert!((rate - 7.7380).abs() < 0.005, "rate was {rate}");

        let delta = calories_delta(130, &female(60.0, 30.0), Duration::from_secs(120));
        assert!((delta - 15.476).abs() < 0.01, "delta was {delta}");
    }

    #[test]
    fn test_noise_floor() {
        let elapsed = Duration::from_secs(600);
        for bpm in [0, 35, 40] {
            assert_eq!(burn_rate_per_minute(bpm, &male(120.0, 60.0)), 0.0);
            assert_eq!(calories_delta(bpm, &male(120.0, 60.0), elapsed), 0.0);
            assert_eq!(calories_delta(bpm, &female(120.0, 60.0), elapsed), 0.0);
        }
    }

    #[test]
    fn test_negative_rate_is_clamped() {
        let profile = male(40.0, 18.0);
        assert!(burn_rate_per_minute(41, &profile) < 0.0);
        assert_eq!(calories_delta(41, &profile, Duration::from_secs(300)), 0.0);
    }

    #[test]
    fn test_zero_elapsed_burns_nothing() {
        assert_eq!(calories_delta(150, &male(80.0, 25.0), Duration::ZERO), 0.0);
    }
}
