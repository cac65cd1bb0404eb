use crate::channel_config::Network;
use crate::channels::ids;
use serde::{Deserialize, Serialize};

/// The geographic scope a cell broadcast was received in.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    /// The PLMN (MCC + MNC) of the serving network, if known
    #[serde(default)]
    pub plmn: Option<String>,

    /// Location area code, or -1 if unknown
    #[serde(default = "unknown")]
    pub lac: i32,

    /// Cell ID, or -1 if unknown
    #[serde(default = "unknown")]
    pub cid: i32,
}

impl Location {
    pub fn new<S: Into<String>>(plmn: Option<S>, lac: i32, cid: i32) -> Self {
        Self {
            plmn: plmn.map(Into::into),
            lac,
            cid,
        }
    }
}

impl Default for Location {
    fn default() -> Self {
        Self {
            plmn: None,
            lac: unknown(),
            cid: unknown(),
        }
    }
}

fn unknown() -> i32 {
    -1
}

/// A decoded cell broadcast message, as handed over by the SMS-CB decoding layer.
///
/// See 3GPP TS 23.041 for the meaning of the message identifier (here called service category)
/// and the serial number.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// The message identifier (GSM/UMTS) or service category (CDMA)
    pub service_category: i32,

    /// The serial number assigned by the broadcasting network
    pub serial_number: i32,

    /// Where the broadcast was received
    #[serde(default)]
    pub location: Location,

    /// The decoded text of the broadcast
    #[serde(default)]
    pub message_body: Option<String>,

    /// When this device received the broadcast, in milliseconds since the UNIX epoch
    ///
    /// Decoders which don't stamp messages get the time at which the message was parsed.
    #[serde(default = "now_millis")]
    pub delivery_time: i64,

    /// The SIM subscription the broadcast arrived on
    #[serde(default)]
    pub subscription: u32,

    /// The radio technology the broadcast arrived over
    #[serde(default)]
    pub network: Network,
}

impl Message {
    /// Is this an ETWS or CMAS alert?
    ///
    /// CMAS child abduction (AMBER) alerts are deliberately excluded; they are delivered like
    /// ordinary broadcasts.
    ///
    /// # Example
    ///
    /// ```
    /// use cellbroadcast_receiver::{Location, Message, Network};
    ///
    /// let mut message = Message {
    ///     service_category: 4370,
    ///     serial_number: 0x3000,
    ///     location: Location::default(),
    ///     message_body: Some("Presidential alert".into()),
    ///     delivery_time: 0,
    ///     subscription: 0,
    ///     network: Network::Gsm,
    /// };
    /// assert!(message.is_emergency_alert());
    ///
    /// message.service_category = 50;
    /// assert!(!message.is_emergency_alert());
    /// ```
    pub fn is_emergency_alert(&self) -> bool {
        let id = self.service_category;
        if id == ids::CMAS_ALERT_CHILD_ABDUCTION_EMERGENCY
            || id == ids::CDMA_CMAS_CHILD_ABDUCTION_EMERGENCY
        {
            return false;
        }
        ids::ETWS_RANGE.contains(&id)
            || ids::CMAS_RANGE.contains(&id)
            || ids::CDMA_CMAS_RANGE.contains(&id)
    }

    pub(crate) fn delivered_at(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        use chrono::TimeZone;
        chrono::Utc.timestamp_millis_opt(self.delivery_time).single()
    }
}

/// The current time in milliseconds since the UNIX epoch.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_use_sentinels() {
        let m: Message =
            serde_json::from_str(r#"{"serviceCategory":4352,"serialNumber":17}"#).unwrap();
        assert_eq!(m.location.lac, -1);
        assert_eq!(m.location.cid, -1);
        assert_eq!(m.location.plmn, None);
        assert_eq!(m.message_body, None);
        assert_eq!(m.subscription, 0);
        assert_eq!(m.network, Network::Gsm);
        assert!(m.delivery_time > 0);
    }

    #[test]
    fn amber_alerts_are_not_emergency_alerts() {
        let m = Message {
            service_category: ids::CMAS_ALERT_CHILD_ABDUCTION_EMERGENCY,
            serial_number: 1,
            location: Location::default(),
            message_body: None,
            delivery_time: 0,
            subscription: 0,
            network: Network::Gsm,
        };
        assert!(!m.is_emergency_alert());

        let m = Message {
            service_category: ids::ETWS_EARTHQUAKE_WARNING,
            ..m
        };
        assert!(m.is_emergency_alert());
    }

    #[test]
    fn delivered_at() {
        let m = Message {
            service_category: 4370,
            serial_number: 1,
            location: Location::new(Some("310260"), 1, 2),
            message_body: None,
            delivery_time: 1_600_000_000_000,
            subscription: 0,
            network: Network::Gsm,
        };
        assert_eq!(
            m.delivered_at().unwrap().to_rfc3339(),
            "2020-09-13T12:26:40+00:00"
        );
    }
}
