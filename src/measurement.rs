use crate::error::MeasurementError;

const FLAG_HEART_RATE_16BIT: u8 = 0b0000_0001;
const FLAG_SENSOR_CONTACT_DETECTED: u8 = 0b0000_0010;
const FLAG_SENSOR_CONTACT_SUPPORTED: u8 = 0b0000_0100;
const FLAG_ENERGY_EXPENDED_PRESENT: u8 = 0b0000_1000;
const FLAG_RR_INTERVAL_PRESENT: u8 = 0b0001_0000;

/// Decoded Heart Rate Measurement characteristic (0x2A37) notification.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct HeartRateMeasurement {
    /// The byte at offset 1. This is the value fed to the calorie estimate.
    pub heart_rate: u8,
    /// Full 16-bit value when the device reports in that format.
    pub heart_rate_u16: Option<u16>,
    pub sensor_contact_detected: bool,
    pub sensor_contact_supported: bool,
    pub energy_expended: Option<u16>,
    pub rr_intervals: Vec<u16>,
}

impl HeartRateMeasurement {
    pub fn parse(value: &[u8]) -> Result<Self, MeasurementError> {
        if value.len() < 2 {
            return Err(MeasurementError::TooShort { len: value.len(), needed: 2 });
        }

        let flags = value[0];
        let heart_rate = value[1];
        let mut offset = 2;

        // Everything past offset 1 is diagnostics only; a truncated tail is tolerated.
        let heart_rate_u16 = if flags & FLAG_HEART_RATE_16BIT != 0 {
            offset += 1;
            value.get(2).map(|high| u16::from_le_bytes([heart_rate, *high]))
        } else {
            None
        };

        let energy_expended = if flags & FLAG_ENERGY_EXPENDED_PRESENT != 0 {
            let energy = read_u16(value, offset);
            offset += 2;
            energy
        } else {
            None
        };

        let mut rr_intervals = Vec::new();
        if flags & FLAG_RR_INTERVAL_PRESENT != 0 {
            while let Some(rr) = read_u16(value, offset) {
                rr_intervals.push(rr);
                offset += 2;
            }
        }

        Ok(HeartRateMeasurement {
            heart_rate,
            heart_rate_u16,
            sensor_contact_detected: flags & FLAG_SENSOR_CONTACT_DETECTED != 0,
            sensor_contact_supported: flags & FLAG_SENSOR_CONTACT_SUPPORTED != 0,
            energy_expended,
            rr_intervals,
        })
    }
}

fn read_u16(value: &[u8], offset: usize) -> Option<u16> {
    Some(u16::from_le_bytes([*value.get(offset)?, *value.get(offset + 1)?]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_8bit() {
        let m = HeartRateMeasurement::parse(&[0x00, 72]).unwrap();
        assert_eq!(m.heart_rate, 72);
        assert_eq!(m.heart_rate_u16, None);
        assert!(!m.sensor_contact_supported);
        assert!(m.rr_intervals.is_empty());
    }

    #[test]
    fn test_contact_energy_and_rr() {
        // contact supported + detected, energy present, rr present
        let data = [0b0001_1110, 150, 0x10, 0x00, 0x90, 0x01, 0x80, 0x01];
        let m = HeartRateMeasurement::parse(&data).unwrap();
        assert_eq!(m.heart_rate, 150);
        assert!(m.sensor_contact_detected);
        assert!(m.sensor_contact_supported);
        assert_eq!(m.energy_expended, Some(16));
        assert_eq!(m.rr_intervals, vec![400, 384]);
    }

    #[test]
    fn test_16bit_format_still_samples_offset_one() {
        let m = HeartRateMeasurement::parse(&[0x01, 0x2C, 0x01]).unwrap();
        assert_eq!(m.heart_rate, 0x2C);
        assert_eq!(m.heart_rate_u16, Some(300));
    }

    #[test]
    fn test_too_short() {
        assert_eq!(
            HeartRateMeasurement::parse(&[0x00]),
            Err(MeasurementError::TooShort { len: 1, needed: 2 })
        );
    }

    #[test]
    fn test_16bit_flag_without_high_byte_keeps_sample() {
        let m = HeartRateMeasurement::parse(&[0x01, 0x2C]).unwrap();
        assert_eq!(m.heart_rate, 0x2C);
        assert_eq!(m.heart_rate_u16, None);
    }

    #[test]
    fn test_truncated_rr_tail_is_dropped() {
        let m = HeartRateMeasurement::parse(&[0b0001_0000, 80, 0x90, 0x01, 0x80]).unwrap();
        assert_eq!(m.rr_intervals, vec![400]);
    }
}
