use serde::{Deserialize, Serialize};
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BiologicalSex {
    Male,
    Female,
}

impl std::str::FromStr for BiologicalSex {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "male" | "m" => Ok(BiologicalSex::Male),
            "female" | "f" => Ok(BiologicalSex::Female),
            other => Err(format!("unknown biological sex: {other}")),
        }
    }
}

/// Body parameters the calorie estimate depends on. Owned by the caller; the
/// estimator only ever reads a copy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PhysiologicalProfile {
    pub weight_kg: f64,
    pub age_years: f64,
    pub sex: BiologicalSex,
}

impl Default for PhysiologicalProfile {
    fn default() -> Self {
        Self {
            weight_kg: 80.0,
            age_years: 25.0,
            sex: BiologicalSex::Male,
        }
    }
}

/// Supplies the profile snapshot used for each sample.
pub trait ProfileSource: Send + Sync {
    fn profile(&self) -> PhysiologicalProfile;
}

impl ProfileSource for PhysiologicalProfile {
    fn profile(&self) -> PhysiologicalProfile {
        *self
    }
}

// Edits sent on the channel are picked up by the next sample only.
impl ProfileSource for watch::Receiver<PhysiologicalProfile> {
    fn profile(&self) -> PhysiologicalProfile {
        *self.borrow()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sex_parsing() {
        assert_eq!("male".parse::<BiologicalSex>(), Ok(BiologicalSex::Male));
        assert_eq!("F".parse::<BiologicalSex>(), Ok(BiologicalSex::Female));
        assert!("other".parse::<BiologicalSex>().is_err());
    }

    #[test]
    fn test_profile_serializes_lowercase_sex() {
        let profile = PhysiologicalProfile {
            weight_kg: 60.0,
            age_years: 30.0,
            sex: BiologicalSex::Female,
        };
        let json = serde_json::to_string(&profile).unwrap();
        assert!(json.contains("\"sex\":\"female\""));

        let back: PhysiologicalProfile = serde_json::from_str(&json).unwrap();
        assert_eq!(back, profile);
    }

    #[test]
    fn test_watch_source_sees_latest_value() {
        let (tx, rx) = watch::channel(PhysiologicalProfile::default());
        assert_eq!(rx.profile().weight_kg, 80.0);

        tx.send_modify(|p| p.weight_kg = 72.5);
        assert_eq!(rx.profile().weight_kg, 72.5);
    }
}
