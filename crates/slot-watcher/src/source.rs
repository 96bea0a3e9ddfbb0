//! Slot sources: where availability comes from.
//!
//! Scraping booking pages happens outside this process. A scraper family is
//! an external command that prints the classified slots of one target and
//! date as JSON; [`RoutedSlotSource`] sends every target to its family.

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Deserialize;
use shared_types::{Slot, TimeOfDay};
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;

use crate::config::ScraperConfig;
use crate::error::{WatchError, WatchResult};
use crate::targets::TargetDescriptor;

const STDERR_LIMIT: usize = 400;

#[async_trait]
pub trait SlotSource: Send + Sync {
    async fn scrape(
        &self,
        target: &TargetDescriptor,
        date: NaiveDate,
        duration_minutes: u32,
    ) -> WatchResult<Vec<Slot>>;
}

/// JSON printed by an external scraper
#[derive(Debug, Deserialize)]
struct ScraperOutput {
    #[serde(default)]
    available_slots: Vec<String>,
    #[serde(default)]
    booked_slots: Vec<String>,
}

/// Runs an external scraper command once per query point
#[derive(Debug, Clone)]
pub struct CommandSlotSource {
    program: String,
    args: Vec<String>,
}

impl CommandSlotSource {
    pub fn new(config: &ScraperConfig) -> WatchResult<Self> {
        let (program, args) = config
            .command
            .split_first()
            .ok_or_else(|| WatchError::config("scraper command is empty"))?;
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
        })
    }

    fn arguments(target: &TargetDescriptor, date: NaiveDate, duration_minutes: u32) -> Vec<String> {
        let mut args = vec![
            "--target".to_string(),
            target.id.to_string(),
            "--location".to_string(),
            target.location.clone(),
            "--date".to_string(),
            date.format("%Y-%m-%d").to_string(),
            "--duration".to_string(),
            duration_minutes.to_string(),
        ];
        if target.age_confirmation {
            args.push("--age-confirmation".to_string());
        }
        if let Some(court_type) = &target.court_type {
            args.push("--court-type".to_string());
            args.push(court_type.clone());
        }
        args
    }
}

/// Convert scraper output into slots, rejecting unparsable times
fn parse_output(target: &TargetDescriptor, stdout: &[u8]) -> WatchResult<Vec<Slot>> {
    let output: ScraperOutput = serde_json::from_slice(stdout)
        .map_err(|e| WatchError::target(&target.id, format!("unreadable scraper output: {}", e)))?;

    let parse = |raw: &String| {
        raw.parse::<TimeOfDay>()
            .map_err(|e| WatchError::target(&target.id, e.to_string()))
    };

    let mut slots = Vec::with_capacity(output.available_slots.len() + output.booked_slots.len());
    for raw in &output.available_slots {
        slots.push(Slot::available(parse(raw)?));
    }
    for raw in &output.booked_slots {
        slots.push(Slot::booked(parse(raw)?));
    }
    slots.sort_by_key(|s| s.time);
    Ok(slots)
}

fn truncate(text: &str) -> String {
    let trimmed = text.trim();
    match trimmed.char_indices().nth(STDERR_LIMIT) {
        Some((cut, _)) => format!("{}...", &trimmed[..cut]),
        None => trimmed.to_string(),
    }
}

#[async_trait]
impl SlotSource for CommandSlotSource {
    async fn scrape(
        &self,
        target: &TargetDescriptor,
        date: NaiveDate,
        duration_minutes: u32,
    ) -> WatchResult<Vec<Slot>> {
        tracing::debug!("Scraping {} for {} via {}", target.id, date, self.program);

        let output = Command::new(&self.program)
            .args(&self.args)
            .args(Self::arguments(target, date, duration_minutes))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                WatchError::target(&target.id, format!("failed to run {}: {}", self.program, e))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(WatchError::target(
                &target.id,
                format!("scraper exited with {}: {}", output.status, truncate(&stderr)),
            ));
        }

        parse_output(target, &output.stdout)
    }
}

/// Dispatches each target to the source of its scraper family
#[derive(Default, Clone)]
pub struct RoutedSlotSource {
    families: HashMap<String, Arc<dyn SlotSource>>,
}

impl RoutedSlotSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_family(mut self, family: impl Into<String>, source: Arc<dyn SlotSource>) -> Self {
        self.families.insert(family.into(), source);
        self
    }

    /// One command source per configured scraper family
    pub fn from_scrapers<'a>(
        scrapers: impl IntoIterator<Item = (&'a String, &'a ScraperConfig)>,
    ) -> WatchResult<Self> {
        let mut routed = Self::new();
        for (family, config) in scrapers {
            let source = CommandSlotSource::new(config)?;
            routed = routed.with_family(family.clone(), Arc::new(source));
        }
        Ok(routed)
    }
}

#[async_trait]
impl SlotSource for RoutedSlotSource {
    async fn scrape(
        &self,
        target: &TargetDescriptor,
        date: NaiveDate,
        duration_minutes: u32,
    ) -> WatchResult<Vec<Slot>> {
        let source = self.families.get(&target.family).ok_or_else(|| {
            WatchError::target(&target.id, format!("no scraper for family '{}'", target.family))
        })?;
        source.scrape(target, date, duration_minutes).await
    }
}
