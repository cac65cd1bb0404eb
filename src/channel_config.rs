//! Which broadcast channels the radio should listen to.
//!
//! The user's alert preferences, plus any emergency ranges configured by the operator, decide
//! which message identifiers are enabled on each subscription. CMAS presidential alerts can never
//! be turned off (3GPP TS 22.268 section 6.2).

use crate::channels::{ids, ChannelRange, ChannelRanges};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The radio technology a set of channels applies to.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Gsm,
    Cdma,
}

impl Default for Network {
    fn default() -> Self {
        Network::Gsm
    }
}

/// Alert categories a user can opt in or out of.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AlertPreferences {
    pub emergency_alerts: bool,
    pub etws_test_alerts: bool,
    pub cmas_extreme_alerts: bool,
    pub cmas_severe_alerts: bool,
    pub cmas_amber_alerts: bool,
    pub cmas_test_alerts: bool,
    pub channel_50_alerts: bool,
}

impl Default for AlertPreferences {
    fn default() -> Self {
        Self {
            emergency_alerts: true,
            etws_test_alerts: false,
            cmas_extreme_alerts: true,
            cmas_severe_alerts: true,
            cmas_amber_alerts: true,
            cmas_test_alerts: false,
            channel_50_alerts: true,
        }
    }
}

/// Alert preferences for every subscription on the device.
///
/// # Example
///
/// ```
/// use cellbroadcast_receiver::PreferenceBook;
///
/// let book: PreferenceBook = serde_json::from_str(
///     r#"{"subscriptions": 2, "preferences": {"1": {"cmasAmberAlerts": false}}}"#,
/// ).unwrap();
///
/// assert!(book.get(0).cmas_amber_alerts);
/// assert!(!book.get(1).cmas_amber_alerts);
/// assert_eq!(book.subscriptions().collect::<Vec<_>>(), vec![0, 1]);
/// ```
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PreferenceBook {
    subscriptions: u32,
    preferences: BTreeMap<u32, AlertPreferences>,
}

impl Default for PreferenceBook {
    fn default() -> Self {
        Self::new(1)
    }
}

impl PreferenceBook {
    pub fn new(subscriptions: u32) -> Self {
        Self {
            subscriptions: subscriptions.max(1),
            preferences: BTreeMap::new(),
        }
    }

    pub fn with_subscriptions(self, subscriptions: u32) -> Self {
        Self {
            subscriptions: subscriptions.max(1),
            preferences: self.preferences,
        }
    }

    pub fn with_preferences(mut self, subscription: u32, preferences: AlertPreferences) -> Self {
        self.preferences.insert(subscription, preferences);
        self
    }

    /// The subscription slots on this device.
    pub fn subscriptions(&self) -> std::ops::Range<u32> {
        0..self.subscriptions.max(1)
    }

    pub fn is_multi_sim(&self) -> bool {
        self.subscriptions > 1
    }

    /// The preferences for one subscription, or the defaults if none were saved.
    pub fn get(&self, subscription: u32) -> AlertPreferences {
        self.preferences
            .get(&subscription)
            .copied()
            .unwrap_or_default()
    }
}

/// Device-wide channel settings which aren't up to the user.
#[derive(Debug, Default, Clone, Eq, PartialEq)]
pub struct ChannelConfig {
    /// Operator-defined GSM emergency identifiers, replacing the standard ETWS/CMAS list
    pub gsm_emergency_ids: ChannelRanges,
    /// Operator-defined CDMA emergency service categories, replacing the standard CMAS list
    pub cdma_emergency_ids: ChannelRanges,
    /// Whether channel 50 (Brazilian area info) may be offered at all
    pub channel_50_supported: bool,
}

impl ChannelConfig {
    pub fn emergency_ids(&self, network: Network) -> &ChannelRanges {
        match network {
            Network::Gsm => &self.gsm_emergency_ids,
            Network::Cdma => &self.cdma_emergency_ids,
        }
    }
}

/// The radio's cell broadcast configuration interface.
pub trait CellBroadcastRadio {
    fn enable_range(&mut self, network: Network, subscription: u32, range: ChannelRange) -> bool;
    fn disable_range(&mut self, network: Network, subscription: u32, range: ChannelRange)
        -> bool;
}

/// One change to apply to the radio.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Action {
    Enable(ChannelRange),
    Disable(ChannelRange),
}

#[derive(Debug, Default)]
struct Plan(Vec<Action>);

impl Plan {
    fn enable(&mut self, start: i32, end: i32) {
        self.0.push(Action::Enable(ChannelRange::new(start, end)));
    }

    fn disable(&mut self, start: i32, end: i32) {
        self.0.push(Action::Disable(ChannelRange::new(start, end)));
    }

    fn set(&mut self, enable: bool, start: i32, end: i32) {
        if enable {
            self.enable(start, end)
        } else {
            self.disable(start, end)
        }
    }

    fn operator_ranges(&mut self, ranges: &ChannelRanges, enable: bool, presidential: i32) {
        for range in ranges {
            self.set(enable, range.start, range.end);
        }
        self.enable(presidential, presidential);
    }
}

/// The radio changes needed to apply `preferences` to a GSM/UMTS subscription.
pub fn gsm_actions(config: &ChannelConfig, preferences: &AlertPreferences) -> Vec<Action> {
    use crate::channels::ids::*;

    let p = preferences;
    let mut plan = Plan::default();

    if !config.gsm_emergency_ids.is_empty() {
        plan.operator_ranges(
            &config.gsm_emergency_ids,
            p.emergency_alerts,
            CMAS_ALERT_PRESIDENTIAL_LEVEL,
        );
    } else if p.emergency_alerts {
        plan.enable(ETWS_EARTHQUAKE_WARNING, ETWS_EARTHQUAKE_AND_TSUNAMI_WARNING);
        if p.etws_test_alerts {
            plan.enable(ETWS_TEST_MESSAGE, ETWS_TEST_MESSAGE);
        }
        plan.enable(ETWS_OTHER_EMERGENCY_TYPE, ETWS_OTHER_EMERGENCY_TYPE);
        if p.cmas_extreme_alerts {
            plan.enable(
                CMAS_ALERT_EXTREME_IMMEDIATE_OBSERVED,
                CMAS_ALERT_EXTREME_EXPECTED_LIKELY,
            );
        }
        if p.cmas_severe_alerts {
            plan.enable(
                CMAS_ALERT_SEVERE_IMMEDIATE_OBSERVED,
                CMAS_ALERT_SEVERE_EXPECTED_LIKELY,
            );
        }
        if p.cmas_amber_alerts {
            plan.enable(
                CMAS_ALERT_CHILD_ABDUCTION_EMERGENCY,
                CMAS_ALERT_CHILD_ABDUCTION_EMERGENCY,
            );
        }
        if p.cmas_test_alerts {
            plan.enable(
                CMAS_ALERT_REQUIRED_MONTHLY_TEST,
                CMAS_ALERT_OPERATOR_DEFINED_USE,
            );
        }
        plan.enable(CMAS_ALERT_PRESIDENTIAL_LEVEL, CMAS_ALERT_PRESIDENTIAL_LEVEL);
    } else {
        plan.disable(ETWS_EARTHQUAKE_WARNING, ETWS_EARTHQUAKE_AND_TSUNAMI_WARNING);
        plan.disable(ETWS_TEST_MESSAGE, ETWS_TEST_MESSAGE);
        plan.disable(ETWS_OTHER_EMERGENCY_TYPE, ETWS_OTHER_EMERGENCY_TYPE);
        plan.disable(
            CMAS_ALERT_EXTREME_IMMEDIATE_OBSERVED,
            CMAS_ALERT_EXTREME_EXPECTED_LIKELY,
        );
        plan.disable(
            CMAS_ALERT_SEVERE_IMMEDIATE_OBSERVED,
            CMAS_ALERT_SEVERE_EXPECTED_LIKELY,
        );
        plan.disable(
            CMAS_ALERT_CHILD_ABDUCTION_EMERGENCY,
            CMAS_ALERT_CHILD_ABDUCTION_EMERGENCY,
        );
        plan.disable(
            CMAS_ALERT_REQUIRED_MONTHLY_TEST,
            CMAS_ALERT_OPERATOR_DEFINED_USE,
        );
        plan.enable(CMAS_ALERT_PRESIDENTIAL_LEVEL, CMAS_ALERT_PRESIDENTIAL_LEVEL);
    }

    plan.set(
        config.channel_50_supported && p.channel_50_alerts,
        CHANNEL_50,
        CHANNEL_50,
    );

    // individual opt-outs win over whatever was enabled above
    if !p.etws_test_alerts {
        plan.disable(ETWS_TEST_MESSAGE, ETWS_TEST_MESSAGE);
    }
    if !p.cmas_extreme_alerts {
        plan.disable(
            CMAS_ALERT_EXTREME_IMMEDIATE_OBSERVED,
            CMAS_ALERT_EXTREME_EXPECTED_LIKELY,
        );
    }
    if !p.cmas_severe_alerts {
        plan.disable(
            CMAS_ALERT_SEVERE_IMMEDIATE_OBSERVED,
            CMAS_ALERT_SEVERE_EXPECTED_LIKELY,
        );
    }
    if !p.cmas_amber_alerts {
        plan.disable(
            CMAS_ALERT_CHILD_ABDUCTION_EMERGENCY,
            CMAS_ALERT_CHILD_ABDUCTION_EMERGENCY,
        );
    }
    if !p.cmas_test_alerts {
        plan.disable(
            CMAS_ALERT_REQUIRED_MONTHLY_TEST,
            CMAS_ALERT_OPERATOR_DEFINED_USE,
        );
    }

    plan.0
}

/// The radio changes needed to apply `preferences` to a CDMA subscription.
pub fn cdma_actions(config: &ChannelConfig, preferences: &AlertPreferences) -> Vec<Action> {
    use crate::channels::ids::*;

    let p = preferences;
    let mut plan = Plan::default();

    if !config.cdma_emergency_ids.is_empty() {
        plan.operator_ranges(
            &config.cdma_emergency_ids,
            p.emergency_alerts,
            CDMA_CMAS_PRESIDENTIAL_LEVEL_ALERT,
        );
    } else {
        let categories = [
            (p.cmas_extreme_alerts, CDMA_CMAS_EXTREME_THREAT),
            (p.cmas_severe_alerts, CDMA_CMAS_SEVERE_THREAT),
            (p.cmas_amber_alerts, CDMA_CMAS_CHILD_ABDUCTION_EMERGENCY),
            (p.cmas_test_alerts, CDMA_CMAS_TEST_MESSAGE),
        ];
        for (wanted, category) in categories {
            if !p.emergency_alerts {
                plan.disable(category, category);
            } else if wanted {
                plan.enable(category, category);
            }
        }
        plan.enable(
            CDMA_CMAS_PRESIDENTIAL_LEVEL_ALERT,
            CDMA_CMAS_PRESIDENTIAL_LEVEL_ALERT,
        );
    }

    for (wanted, category) in [
        (p.cmas_extreme_alerts, CDMA_CMAS_EXTREME_THREAT),
        (p.cmas_severe_alerts, CDMA_CMAS_SEVERE_THREAT),
        (p.cmas_amber_alerts, CDMA_CMAS_CHILD_ABDUCTION_EMERGENCY),
        (p.cmas_test_alerts, CDMA_CMAS_TEST_MESSAGE),
    ] {
        if !wanted {
            plan.disable(category, category);
        }
    }

    plan.0
}

/// Apply a subscription's preferences to the radio.
///
/// Returns `false` if the radio rejected any change; the remaining changes are still attempted.
pub fn configure<R: CellBroadcastRadio + ?Sized>(
    radio: &mut R,
    network: Network,
    subscription: u32,
    config: &ChannelConfig,
    preferences: &AlertPreferences,
) -> bool {
    let actions = match network {
        Network::Gsm => gsm_actions(config, preferences),
        Network::Cdma => cdma_actions(config, preferences),
    };

    let mut ok = true;
    for action in actions {
        let (accepted, verb, range) = match action {
            Action::Enable(range) => (
                radio.enable_range(network, subscription, range),
                "enable",
                range,
            ),
            Action::Disable(range) => (
                radio.disable_range(network, subscription, range),
                "disable",
                range,
            ),
        };
        if accepted {
            log::debug!(
                "{} {:?} channels {} on subscription {}",
                verb,
                network,
                range,
                subscription
            );
        } else {
            log::error!(
                "radio refused to {} {:?} channels {} on subscription {}",
                verb,
                network,
                range,
                subscription
            );
            ok = false;
        }
    }
    ok
}

/// Apply every subscription's preferences for both radio technologies.
pub fn configure_all<R: CellBroadcastRadio + ?Sized>(
    radio: &mut R,
    config: &ChannelConfig,
    book: &PreferenceBook,
) -> bool {
    let mut ok = true;
    for subscription in book.subscriptions() {
        let preferences = book.get(subscription);
        for network in [Network::Gsm, Network::Cdma] {
            ok &= configure(radio, network, subscription, config, &preferences);
        }
    }
    ok
}

/// Keeps track of which channels are enabled, per radio technology and subscription.
///
/// This stands in for a radio that can't be queried, and backs the `/channels` report.
/// Channels are kept as sorted ranges which neither overlap nor touch.
#[derive(Debug, Default, Clone)]
pub struct RadioChannels {
    enabled: BTreeMap<(Network, u32), Vec<ChannelRange>>,
}

impl RadioChannels {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_enabled(&self, network: Network, subscription: u32, id: i32) -> bool {
        self.enabled
            .get(&(network, subscription))
            .map(|ranges| ranges.iter().any(|r| r.contains(id)))
            .unwrap_or(false)
    }

    /// The enabled channels, merged into the fewest ranges.
    pub fn enabled(&self, network: Network, subscription: u32) -> ChannelRanges {
        self.enabled
            .get(&(network, subscription))
            .into_iter()
            .flatten()
            .copied()
            .collect()
    }

    /// Every (network, subscription) with at least one channel enabled.
    pub fn report(&self) -> Vec<ChannelReport> {
        self.enabled
            .iter()
            .filter(|(_, ids)| !ids.is_empty())
            .map(|(&(network, subscription), _)| ChannelReport {
                network,
                subscription,
                channels: self.enabled(network, subscription).to_string(),
            })
            .collect()
    }
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelReport {
    pub network: Network,
    pub subscription: u32,
    pub channels: String,
}

impl CellBroadcastRadio for RadioChannels {
    fn enable_range(&mut self, network: Network, subscription: u32, range: ChannelRange) -> bool {
        let ranges = self.enabled.entry((network, subscription)).or_default();
        let mut merged = range;
        ranges.retain(|r| {
            let touches = i64::from(r.start) <= i64::from(merged.end) + 1
                && i64::from(merged.start) <= i64::from(r.end) + 1;
            if touches {
                merged = ChannelRange::new(r.start.min(merged.start), r.end.max(merged.end));
            }
            !touches
        });
        let at = ranges.partition_point(|r| r.start < merged.start);
        ranges.insert(at, merged);
        true
    }

    fn disable_range(
        &mut self,
        network: Network,
        subscription: u32,
        range: ChannelRange,
    ) -> bool {
        if let Some(ranges) = self.enabled.get_mut(&(network, subscription)) {
            let mut remaining = Vec::with_capacity(ranges.len() + 1);
            for r in ranges.drain(..) {
                if r.end < range.start || range.end < r.start {
                    remaining.push(r);
                    continue;
                }
                if r.start < range.start {
                    remaining.push(ChannelRange::new(r.start, range.start - 1));
                }
                if range.end < r.end {
                    remaining.push(ChannelRange::new(range.end + 1, r.end));
                }
            }
            *ranges = remaining;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::ids::*;

    fn gsm(config: &ChannelConfig, preferences: AlertPreferences) -> RadioChannels {
        let mut radio = RadioChannels::new();
        assert!(configure(&mut radio, Network::Gsm, 0, config, &preferences));
        radio
    }

    #[test]
    fn gsm_defaults() {
        let radio = gsm(&ChannelConfig::default(), AlertPreferences::default());
        assert_eq!(
            radio.enabled(Network::Gsm, 0).to_string(),
            "4352-4354,4356,4370-4379"
        );
        assert!(!radio.is_enabled(Network::Gsm, 0, ETWS_TEST_MESSAGE));
        assert!(!radio.is_enabled(Network::Gsm, 0, CHANNEL_50));
        assert!(radio.enabled(Network::Cdma, 0).is_empty());
    }

    #[test]
    fn gsm_opt_ins_and_outs() {
        let config = ChannelConfig {
            channel_50_supported: true,
            ..Default::default()
        };
        let radio = gsm(
            &config,
            AlertPreferences {
                etws_test_alerts: true,
                cmas_test_alerts: true,
                cmas_severe_alerts: false,
                cmas_amber_alerts: false,
                ..Default::default()
            },
        );
        assert!(radio.is_enabled(Network::Gsm, 0, CHANNEL_50));
        assert!(radio.is_enabled(Network::Gsm, 0, ETWS_TEST_MESSAGE));
        assert!(radio.is_enabled(Network::Gsm, 0, CMAS_ALERT_REQUIRED_MONTHLY_TEST));
        assert!(!radio.is_enabled(Network::Gsm, 0, CMAS_ALERT_SEVERE_IMMEDIATE_OBSERVED));
        assert!(!radio.is_enabled(Network::Gsm, 0, CMAS_ALERT_CHILD_ABDUCTION_EMERGENCY));
        assert!(radio.is_enabled(Network::Gsm, 0, CMAS_ALERT_EXTREME_EXPECTED_LIKELY));
    }

    #[test]
    fn presidential_survives_disabling_everything() {
        let config = ChannelConfig {
            channel_50_supported: true,
            ..Default::default()
        };
        let mut radio = gsm(&config, AlertPreferences::default());
        assert!(configure(
            &mut radio,
            Network::Gsm,
            0,
            &config,
            &AlertPreferences {
                emergency_alerts: false,
                channel_50_alerts: false,
                ..Default::default()
            },
        ));
        assert_eq!(radio.enabled(Network::Gsm, 0).to_string(), "4370");
    }

    #[test]
    fn operator_ranges_replace_standard_list() {
        let config = ChannelConfig {
            gsm_emergency_ids: "919-921,0x1100".parse().unwrap(),
            ..Default::default()
        };
        let radio = gsm(&config, AlertPreferences::default());
        assert_eq!(
            radio.enabled(Network::Gsm, 0).to_string(),
            "919-921,4352,4370"
        );

        let mut radio = radio;
        configure(
            &mut radio,
            Network::Gsm,
            0,
            &config,
            &AlertPreferences {
                emergency_alerts: false,
                ..Default::default()
            },
        );
        assert_eq!(radio.enabled(Network::Gsm, 0).to_string(), "4370");
    }

    #[test]
    fn cdma_categories() {
        let mut radio = RadioChannels::new();
        configure(
            &mut radio,
            Network::Cdma,
            0,
            &ChannelConfig::default(),
            &AlertPreferences {
                cmas_severe_alerts: false,
                ..Default::default()
            },
        );
        assert_eq!(radio.enabled(Network::Cdma, 0).to_string(), "4096-4097,4099");

        configure(
            &mut radio,
            Network::Cdma,
            0,
            &ChannelConfig::default(),
            &AlertPreferences {
                emergency_alerts: false,
                ..Default::default()
            },
        );
        assert_eq!(radio.enabled(Network::Cdma, 0).to_string(), "4096");
    }

    #[test]
    fn subscriptions_are_independent() {
        let book = PreferenceBook::new(2).with_preferences(
            1,
            AlertPreferences {
                emergency_alerts: false,
                ..Default::default()
            },
        );
        assert!(book.is_multi_sim());

        let mut radio = RadioChannels::new();
        assert!(configure_all(&mut radio, &ChannelConfig::default(), &book));
        assert!(radio.is_enabled(Network::Gsm, 0, ETWS_EARTHQUAKE_WARNING));
        assert!(!radio.is_enabled(Network::Gsm, 1, ETWS_EARTHQUAKE_WARNING));
        assert!(radio.is_enabled(Network::Gsm, 1, CMAS_ALERT_PRESIDENTIAL_LEVEL));
        assert!(radio.is_enabled(Network::Cdma, 1, CDMA_CMAS_PRESIDENTIAL_LEVEL_ALERT));
        assert_eq!(radio.report().len(), 4);
    }

    #[test]
    fn wide_ranges_stay_ranges() {
        let mut radio = RadioChannels::new();
        radio.enable_range(Network::Gsm, 0, ChannelRange::new(0, i32::MAX));
        radio.enable_range(Network::Gsm, 0, ChannelRange::new(i32::MIN, -1));
        assert_eq!(
            radio.enabled(Network::Gsm, 0).to_string(),
            format!("{}-{}", i32::MIN, i32::MAX)
        );

        radio.disable_range(Network::Gsm, 0, ChannelRange::new(50, 0x10ff));
        radio.disable_range(Network::Gsm, 0, ChannelRange::single(i32::MAX));
        assert_eq!(
            radio.enabled(Network::Gsm, 0).to_string(),
            format!("{}-49,4352-{}", i32::MIN, i32::MAX - 1)
        );
        assert!(radio.is_enabled(Network::Gsm, 0, 49));
        assert!(!radio.is_enabled(Network::Gsm, 0, 50));

        radio.enable_range(Network::Gsm, 0, ChannelRange::new(40, 4352));
        assert_eq!(
            radio.enabled(Network::Gsm, 0).to_string(),
            format!("{}-{}", i32::MIN, i32::MAX - 1)
        );
    }

    struct Refusing;

    impl CellBroadcastRadio for Refusing {
        fn enable_range(&mut self, _: Network, _: u32, range: ChannelRange) -> bool {
            range.start != CMAS_ALERT_PRESIDENTIAL_LEVEL
        }
        fn disable_range(&mut self, _: Network, _: u32, _: ChannelRange) -> bool {
            true
        }
    }

    #[test]
    fn refusals_are_reported() {
        let config = ChannelConfig::default();
        let preferences = AlertPreferences::default();
        assert!(!configure(&mut Refusing, Network::Gsm, 0, &config, &preferences));
        assert!(configure(&mut Refusing, Network::Cdma, 0, &config, &preferences));
    }
}
