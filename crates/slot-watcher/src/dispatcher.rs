//! Turns notification events into push messages, one delivery per event.

use shared_types::{NotificationEvent, Weekday};
use std::sync::Arc;

use crate::error::WatchResult;
use crate::notifier::Notifier;
use crate::targets::TargetRegistry;

/// Rendered push message for one opening
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub title: String,
    pub body: String,
    pub link: String,
}

pub struct NotificationDispatcher {
    notifier: Arc<dyn Notifier>,
    topic: String,
    registry: TargetRegistry,
    duration_minutes: u32,
}

impl NotificationDispatcher {
    pub fn new(
        notifier: Arc<dyn Notifier>,
        topic: impl Into<String>,
        registry: TargetRegistry,
        duration_minutes: u32,
    ) -> Self {
        Self {
            notifier,
            topic: topic.into(),
            registry,
            duration_minutes,
        }
    }

    pub fn format(&self, event: &NotificationEvent) -> Message {
        let name = self.registry.name_of(&event.target);
        let weekday = Weekday::from(chrono::Datelike::weekday(&event.date));

        let title = format!("Padel slot opened - {}", name);
        let body = format!(
            "{}\n{} {}\nSlot: {} ({} min)\nWindow: {}\n\nBook now!",
            name,
            weekday.display_name(),
            event.date.format("%b %d"),
            event.time,
            self.duration_minutes,
            event.detail.window,
        );
        let link = self
            .registry
            .get(&event.target)
            .map(|t| t.booking_url(event.date, self.duration_minutes))
            .unwrap_or_default();

        Message { title, body, link }
    }

    /// Attempt every delivery independently; one failure never stops the rest
    pub async fn dispatch(&self, events: &[NotificationEvent]) -> Vec<WatchResult<()>> {
        let mut results = Vec::with_capacity(events.len());

        for event in events {
            let message = self.format(event);
            tracing::info!(
                "NEW SLOT: {} on {} at {}",
                self.registry.name_of(&event.target),
                event.date,
                event.time
            );

            let result = self
                .notifier
                .send(&self.topic, &message.title, &message.body, &message.link)
                .await;
            if let Err(e) = &result {
                tracing::error!("Failed to send notification for {}: {}", event.key(), e);
            }
            results.push(result);
        }

        results
    }
}
