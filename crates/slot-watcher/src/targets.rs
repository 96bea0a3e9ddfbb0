//! Typed registry of watched facilities.

use chrono::NaiveDate;
use shared_types::TargetId;
use std::collections::BTreeMap;

use crate::error::{WatchError, WatchResult};

const PLACEHOLDERS: [&str; 4] = ["base_url", "location", "date", "duration"];

/// Everything the watcher knows about one facility
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetDescriptor {
    pub id: TargetId,
    /// Display name used in notifications and logs
    pub name: String,
    /// Scraper family that knows how to read this facility's pages
    pub family: String,
    pub location: String,
    pub base_url: String,
    pub url_template: String,
    pub court_type: Option<String>,
    pub age_confirmation: bool,
}

impl TargetDescriptor {
    /// Direct booking link for a date and playing duration
    pub fn booking_url(&self, date: NaiveDate, duration_minutes: u32) -> String {
        self.url_template
            .replace("{base_url}", &self.base_url)
            .replace("{location}", &self.location)
            .replace("{date}", &date.format("%Y-%m-%d").to_string())
            .replace("{duration}", &duration_minutes.to_string())
    }

    fn validate(&self) -> WatchResult<()> {
        if self.id.as_str().is_empty() || self.id.as_str().contains('|') {
            return Err(WatchError::config(format!(
                "target id '{}' must be non-empty and must not contain '|'",
                self.id
            )));
        }
        if self.name.trim().is_empty() {
            return Err(WatchError::config(format!("targets.{}.name is empty", self.id)));
        }
        for placeholder in template_placeholders(&self.url_template) {
            if !PLACEHOLDERS.contains(&placeholder) {
                return Err(WatchError::config(format!(
                    "targets.{}.url_template uses unknown placeholder '{{{}}}'. Available: {}",
                    self.id,
                    placeholder,
                    PLACEHOLDERS.join(", ")
                )));
            }
        }
        Ok(())
    }
}

/// Names between `{` and `}` in a URL template
fn template_placeholders(template: &str) -> Vec<&str> {
    let mut found = Vec::new();
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        let after = &rest[start + 1..];
        match after.find('}') {
            Some(end) => {
                found.push(&after[..end]);
                rest = &after[end + 1..];
            }
            None => break,
        }
    }
    found
}

/// Validated table of targets keyed by id
#[derive(Debug, Clone, Default)]
pub struct TargetRegistry {
    targets: BTreeMap<TargetId, TargetDescriptor>,
}

impl TargetRegistry {
    pub fn new(descriptors: impl IntoIterator<Item = TargetDescriptor>) -> WatchResult<Self> {
        let mut targets = BTreeMap::new();
        for descriptor in descriptors {
            descriptor.validate()?;
            if targets.contains_key(&descriptor.id) {
                return Err(WatchError::config(format!(
                    "target '{}' is defined twice",
                    descriptor.id
                )));
            }
            targets.insert(descriptor.id.clone(), descriptor);
        }
        Ok(Self { targets })
    }

    pub fn get(&self, id: &TargetId) -> Option<&TargetDescriptor> {
        self.targets.get(id)
    }

    pub fn contains(&self, id: &TargetId) -> bool {
        self.targets.contains_key(id)
    }

    /// Display name, falling back to the raw id for unknown targets
    pub fn name_of<'a>(&'a self, id: &'a TargetId) -> &'a str {
        self.get(id).map(|t| t.name.as_str()).unwrap_or(id.as_str())
    }

    pub fn ids(&self) -> impl Iterator<Item = &TargetId> {
        self.targets.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TargetDescriptor> {
        self.targets.values()
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

#[cfg(test)]
pub(crate) fn test_descriptor(id: &str) -> TargetDescriptor {
    TargetDescriptor {
        id: TargetId::new(id),
        name: format!("Club {}", id),
        family: "test".to_string(),
        location: "Utrecht".to_string(),
        base_url: format!("https://example.com/{}", id),
        url_template: "{base_url}#/reservation?location={location}&date={date}&playingTimes={duration}"
            .to_string(),
        court_type: None,
        age_confirmation: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_booking_url_renders_all_placeholders() {
        let target = test_descriptor("x");
        let date = NaiveDate::from_ymd_opt(2026, 10, 20).unwrap();
        assert_eq!(
            target.booking_url(date, 90),
            "https://example.com/x#/reservation?location=Utrecht&date=2026-10-20&playingTimes=90"
        );
    }

    #[test]
    fn test_unknown_placeholder_rejected() {
        let mut target = test_descriptor("x");
        target.url_template = "{base_url}?day={weekday}".to_string();
        let err = TargetRegistry::new([target]).unwrap_err();
        assert!(err.to_string().contains("{weekday}"), "{}", err);
    }

    #[test]
    fn test_duplicate_and_malformed_ids_rejected() {
        assert!(TargetRegistry::new([test_descriptor("a"), test_descriptor("a")]).is_err());
        assert!(TargetRegistry::new([test_descriptor("a|b")]).is_err());
    }

    #[test]
    fn test_name_lookup_falls_back_to_id() {
        let registry = TargetRegistry::new([test_descriptor("a")]).unwrap();
        assert_eq!(registry.name_of(&TargetId::new("a")), "Club a");
        let unknown = TargetId::new("zzz");
        assert_eq!(registry.name_of(&unknown), "zzz");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_template_placeholders() {
        assert_eq!(template_placeholders("{a}/x/{b}?{c"), vec!["a", "b"]);
        assert!(template_placeholders("plain").is_empty());
    }
}
