use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Seconds between the NTP epoch (1900) and the UNIX epoch (1970).
const NTP_UNIX_OFFSET: u64 = 2_208_988_800;

/// 64-bit NTP timestamp (RFC 3550 §4): seconds since 1900 and a 32-bit fraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NtpTimestamp {
    pub seconds: u32,
    pub fraction: u32,
}

impl NtpTimestamp {
    pub fn now() -> Self {
        Self::from_system_time(SystemTime::now())
    }

    pub fn from_system_time(time: SystemTime) -> Self {
        let since_unix = time.duration_since(UNIX_EPOCH).unwrap_or(Duration::ZERO);
        Self::from_duration_since_unix_epoch(since_unix)
    }

    pub fn from_duration_since_unix_epoch(duration: Duration) -> Self {
        let seconds = duration.as_secs() + NTP_UNIX_OFFSET;
        let fraction = ((duration.subsec_nanos() as u64) << 32) / 1_000_000_000;
        Self {
            seconds: seconds as u32,
            fraction: fraction as u32,
        }
    }

    pub fn to_be_bytes(&self) -> [u8; 8] {
        let mut out = [0u8; 8];
        out[..4].copy_from_slice(&self.seconds.to_be_bytes());
        out[4..].copy_from_slice(&self.fraction.to_be_bytes());
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unix_epoch_maps_to_offset() {
        let ts = NtpTimestamp::from_duration_since_unix_epoch(Duration::ZERO);
        assert_eq!(ts.seconds as u64, NTP_UNIX_OFFSET);
        assert_eq!(ts.fraction, 0);
    }

    #[test]
    fn half_second_fraction() {
        let ts = NtpTimestamp::from_duration_since_unix_epoch(Duration::from_millis(1500));
        assert_eq!(ts.seconds as u64, NTP_UNIX_OFFSET + 1);
        assert_eq!(ts.fraction, 0x8000_0000);
        assert_eq!(&ts.to_be_bytes()[4..], &[0x80, 0, 0, 0]);
    }

    #[test]
    fn now_is_after_2020() {
        // Jan 1 2020 in NTP seconds.
        assert!(NtpTimestamp::now().seconds > 3_786_825_600);
    }
}
