use crate::Message;
use std::fmt;
use std::str::FromStr;

/// Well-known broadcast message identifiers.
///
/// GSM/UMTS identifiers are from 3GPP TS 23.041 section 9.4.1.2.2, CDMA service categories are
/// from 3GPP2 C.R1001-G section 9.3.
pub mod ids {
    use std::ops::RangeInclusive;

    pub const ETWS_EARTHQUAKE_WARNING: i32 = 0x1100;
    pub const ETWS_TSUNAMI_WARNING: i32 = 0x1101;
    pub const ETWS_EARTHQUAKE_AND_TSUNAMI_WARNING: i32 = 0x1102;
    pub const ETWS_TEST_MESSAGE: i32 = 0x1103;
    pub const ETWS_OTHER_EMERGENCY_TYPE: i32 = 0x1104;

    pub const CMAS_ALERT_PRESIDENTIAL_LEVEL: i32 = 0x1112;
    pub const CMAS_ALERT_EXTREME_IMMEDIATE_OBSERVED: i32 = 0x1113;
    pub const CMAS_ALERT_EXTREME_EXPECTED_LIKELY: i32 = 0x1116;
    pub const CMAS_ALERT_SEVERE_IMMEDIATE_OBSERVED: i32 = 0x1117;
    pub const CMAS_ALERT_SEVERE_EXPECTED_LIKELY: i32 = 0x111A;
    pub const CMAS_ALERT_CHILD_ABDUCTION_EMERGENCY: i32 = 0x111B;
    pub const CMAS_ALERT_REQUIRED_MONTHLY_TEST: i32 = 0x111C;
    pub const CMAS_ALERT_OPERATOR_DEFINED_USE: i32 = 0x111E;

    pub const CDMA_CMAS_PRESIDENTIAL_LEVEL_ALERT: i32 = 0x1000;
    pub const CDMA_CMAS_EXTREME_THREAT: i32 = 0x1001;
    pub const CDMA_CMAS_SEVERE_THREAT: i32 = 0x1002;
    pub const CDMA_CMAS_CHILD_ABDUCTION_EMERGENCY: i32 = 0x1003;
    pub const CDMA_CMAS_TEST_MESSAGE: i32 = 0x1004;

    /// Brazilian area info channel
    pub const CHANNEL_50: i32 = 50;

    pub const ETWS_RANGE: RangeInclusive<i32> = 0x1100..=0x1107;
    pub const CMAS_RANGE: RangeInclusive<i32> = 0x1112..=0x112F;
    pub const CDMA_CMAS_RANGE: RangeInclusive<i32> = 0x1000..=0x10FF;
}

/// An inclusive range of broadcast message identifiers.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ChannelRange {
    pub start: i32,
    pub end: i32,
}

impl ChannelRange {
    pub fn new(start: i32, end: i32) -> Self {
        Self { start, end }
    }

    pub fn single(id: i32) -> Self {
        Self { start: id, end: id }
    }

    pub fn contains(&self, id: i32) -> bool {
        self.start <= id && id <= self.end
    }
}

impl fmt::Display for ChannelRange {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.start == self.end {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}-{}", self.start, self.end)
        }
    }
}

/// A list of channel ranges, as configured by an operator.
///
/// The textual form is a comma-separated list of single identifiers and `start-end` ranges.
/// Identifiers may be decimal, hexadecimal (`0x`, `0X` or `#` prefix) or octal (leading `0`).
///
/// # Example
///
/// ```
/// let ranges: cellbroadcast_receiver::ChannelRanges = "0x1100-0x1104, 4370".parse().unwrap();
///
/// assert!(ranges.contains(0x1102));
/// assert!(ranges.contains(4370));
/// assert!(!ranges.contains(4371));
/// ```
#[derive(Debug, Default, Clone, Eq, PartialEq)]
pub struct ChannelRanges(Vec<ChannelRange>);

impl ChannelRanges {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, id: i32) -> bool {
        self.0.iter().any(|r| r.contains(id))
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ChannelRange> {
        self.0.iter()
    }
}

impl FromIterator<ChannelRange> for ChannelRanges {
    fn from_iter<I: IntoIterator<Item = ChannelRange>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a ChannelRanges {
    type Item = &'a ChannelRange;
    type IntoIter = std::slice::Iter<'a, ChannelRange>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl FromStr for ChannelRanges {
    type Err = ParseRangesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().is_empty() {
            return Ok(Self::new());
        }

        s.split(',')
            .map(|part| match part.find('-') {
                // a leading '-' is a sign, not a range separator
                Some(dash) if dash > 0 && !part[..dash].trim().is_empty() => {
                    let start = decode(&part[..dash])?;
                    let end = decode(&part[dash + 1..])?;
                    if start > end {
                        return Err(ParseRangesError::Inverted(ChannelRange { start, end }));
                    }
                    Ok(ChannelRange::new(start, end))
                }
                _ => decode(part).map(ChannelRange::single),
            })
            .collect()
    }
}

impl fmt::Display for ChannelRanges {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for (i, range) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}", range)?;
        }
        Ok(())
    }
}

fn decode(s: &str) -> Result<i32, ParseRangesError> {
    let trimmed = s.trim();
    let invalid = || ParseRangesError::InvalidNumber(trimmed.to_string());

    let (negative, digits) = match trimmed.as_bytes().first() {
        Some(b'-') => (true, &trimmed[1..]),
        Some(b'+') => (false, &trimmed[1..]),
        _ => (false, trimmed),
    };

    let (radix, digits) = if let Some(hex) = digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"))
        .or_else(|| digits.strip_prefix('#'))
    {
        (16, hex)
    } else if digits.len() > 1 && digits.starts_with('0') {
        (8, &digits[1..])
    } else {
        (10, digits)
    };

    if digits.is_empty() || digits.starts_with(['-', '+']) {
        return Err(invalid());
    }

    let magnitude = i64::from_str_radix(digits, radix).map_err(|_| invalid())?;
    let value = if negative { -magnitude } else { magnitude };
    i32::try_from(value).map_err(|_| invalid())
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum ParseRangesError {
    InvalidNumber(String),
    Inverted(ChannelRange),
}

impl fmt::Display for ParseRangesError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ParseRangesError::InvalidNumber(s) => write!(f, "invalid channel number {:?}", s),
            ParseRangesError::Inverted(r) => {
                write!(f, "channel range {}-{} ends before it starts", r.start, r.end)
            }
        }
    }
}

impl std::error::Error for ParseRangesError {}

/// Is this message an emergency alert, either by standard or by operator configuration?
///
/// `operator_ranges` holds the emergency identifiers the operator configured for the current
/// network type, which count in addition to the standard ETWS and CMAS identifiers.
pub fn is_emergency_alert(message: &Message, operator_ranges: &ChannelRanges) -> bool {
    message.is_emergency_alert() || operator_ranges.contains(message.service_category)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_like_java() {
        assert_eq!(decode("4370"), Ok(4370));
        assert_eq!(decode(" 0x1112 "), Ok(0x1112));
        assert_eq!(decode("0X1112"), Ok(0x1112));
        assert_eq!(decode("#1112"), Ok(0x1112));
        assert_eq!(decode("010"), Ok(8));
        assert_eq!(decode("0"), Ok(0));
        assert_eq!(decode("-12"), Ok(-12));
        assert_eq!(decode("+12"), Ok(12));
        assert!(decode("").is_err());
        assert!(decode("0x").is_err());
        assert!(decode("--1").is_err());
        assert!(decode("09").is_err());
        assert!(decode("abc").is_err());
        assert!(decode("0x80000000").is_err());
    }

    #[test]
    fn parses_ranges() {
        let ranges: ChannelRanges = "0x1100-0x1104,4370 , 50".parse().unwrap();
        assert_eq!(
            ranges.iter().copied().collect::<Vec<_>>(),
            vec![
                ChannelRange::new(0x1100, 0x1104),
                ChannelRange::single(4370),
                ChannelRange::single(50),
            ]
        );
        assert_eq!(ranges.to_string(), "4352-4356,4370,50");
    }

    #[test]
    fn empty_string_is_no_ranges() {
        assert!("".parse::<ChannelRanges>().unwrap().is_empty());
        assert!("  ".parse::<ChannelRanges>().unwrap().is_empty());
    }

    #[test]
    fn rejects_malformed_ranges() {
        assert_eq!(
            "4370,foo".parse::<ChannelRanges>(),
            Err(ParseRangesError::InvalidNumber("foo".into()))
        );
        assert_eq!(
            "10-5".parse::<ChannelRanges>(),
            Err(ParseRangesError::Inverted(ChannelRange::new(10, 5)))
        );
        assert!("4370,".parse::<ChannelRanges>().is_err());
    }

    #[test]
    fn operator_ranges_extend_emergency_alerts() {
        let message = Message {
            service_category: 919,
            serial_number: 1,
            location: Default::default(),
            message_body: None,
            delivery_time: 0,
            subscription: 0,
            network: crate::Network::Gsm,
        };
        assert!(!is_emergency_alert(&message, &ChannelRanges::new()));
        assert!(is_emergency_alert(&message, &"900-999".parse().unwrap()));
    }
}
