use crate::Message;
use std::collections::BTreeSet;

/// Which alerts a subscriber wants to hear about.
#[derive(Debug, Default, Clone, Eq, PartialEq)]
pub struct Filter {
    pub service_category: BTreeSet<i32>,
    pub subscription: BTreeSet<u32>,
    pub emergency_only: bool,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_service_category<I: IntoIterator<Item = i32>>(self, categories: I) -> Self {
        Self {
            service_category: categories.into_iter().collect(),
            ..self
        }
    }

    pub fn with_subscription<I: IntoIterator<Item = u32>>(self, subscriptions: I) -> Self {
        Self {
            subscription: subscriptions.into_iter().collect(),
            ..self
        }
    }

    pub fn with_emergency_only(self, emergency_only: bool) -> Self {
        Self {
            emergency_only,
            ..self
        }
    }

    /// Does this filter match an item?
    ///
    /// # Example
    ///
    /// ```
    /// let filter = cellbroadcast_receiver::Filter::new().with_subscription(Some(1));
    ///
    /// assert_eq!(true, filter.matches(cellbroadcast_receiver::FilterItem {
    ///     service_category: 4370,
    ///     subscription: 1,
    ///     emergency: true,
    /// }));
    ///
    /// assert_eq!(false, filter.matches(cellbroadcast_receiver::FilterItem {
    ///     service_category: 4370,
    ///     subscription: 0,
    ///     emergency: true,
    /// }));
    /// ```
    pub fn matches<I: Into<FilterItem>>(&self, item: I) -> bool {
        let query = item.into();

        (self.service_category.is_empty()
            || self.service_category.contains(&query.service_category))
            && (self.subscription.is_empty() || self.subscription.contains(&query.subscription))
            && (!self.emergency_only || query.emergency)
    }
}

impl From<&hyper::Uri> for Filter {
    /// Parse `?category=4370,4371&subscription=0&emergency=true`.
    ///
    /// Values which aren't numbers are skipped.
    fn from(uri: &hyper::Uri) -> Self {
        let mut filter = Filter::new();
        if let Some(q) = uri.query() {
            let params = url::form_urlencoded::parse(q.as_bytes());
            for (key, value) in params {
                filter = match key.as_ref() {
                    "category" => filter.with_service_category(
                        value.split(',').filter_map(|v| v.trim().parse().ok()),
                    ),
                    "subscription" => filter.with_subscription(
                        value.split(',').filter_map(|v| v.trim().parse().ok()),
                    ),
                    "emergency" => filter.with_emergency_only(value == "true" || value == "1"),
                    _ => filter,
                }
            }
        }
        filter
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct FilterItem {
    pub service_category: i32,
    pub subscription: u32,
    pub emergency: bool,
}

impl From<&Message> for FilterItem {
    fn from(m: &Message) -> Self {
        Self {
            service_category: m.service_category,
            subscription: m.subscription,
            emergency: m.is_emergency_alert(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_query() {
        let uri: hyper::Uri = "/stream?category=4370,%204371,x&subscription=1&emergency=true"
            .parse()
            .unwrap();
        assert_eq!(
            Filter::from(&uri),
            Filter::new()
                .with_service_category([4370, 4371])
                .with_subscription([1])
                .with_emergency_only(true)
        );

        let uri: hyper::Uri = "/stream".parse().unwrap();
        assert_eq!(Filter::from(&uri), Filter::new());
    }
}
