//! Readers for the files the CLI consumes: funnel definitions (JSON array),
//! events (JSON lines), and segment filters (JSON object of filter lists).

use anyhow::Context;
use growth_core::UserEvent;
use growth_reporting::{FunnelDefinition, PropertyFilter, Segment};
use std::collections::BTreeMap;
use std::io::BufRead;
use std::path::Path;

pub fn read_funnels(path: &Path) -> anyhow::Result<Vec<FunnelDefinition>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading funnels from {}", path.display()))?;
    parse_funnels(&raw).with_context(|| format!("parsing funnels in {}", path.display()))
}

pub fn read_events(path: &Path) -> anyhow::Result<Vec<UserEvent>> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("reading events from {}", path.display()))?;
    parse_events(std::io::BufReader::new(file))
        .with_context(|| format!("parsing events in {}", path.display()))
}

pub fn read_segments(path: &Path) -> anyhow::Result<BTreeMap<String, Segment>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading segments from {}", path.display()))?;
    parse_segments(&raw).with_context(|| format!("parsing segments in {}", path.display()))
}

fn parse_funnels(raw: &str) -> anyhow::Result<Vec<FunnelDefinition>> {
    Ok(serde_json::from_str(raw)?)
}

fn parse_events(reader: impl BufRead) -> anyhow::Result<Vec<UserEvent>> {
    let mut events = Vec::new();
    for (n, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let event: UserEvent =
            serde_json::from_str(&line).with_context(|| format!("line {}", n + 1))?;
        events.push(event);
    }
    Ok(events)
}

fn parse_segments(raw: &str) -> anyhow::Result<BTreeMap<String, Segment>> {
    let filters: BTreeMap<String, Vec<PropertyFilter>> = serde_json::from_str(raw)?;
    Ok(filters
        .into_iter()
        .map(|(name, filters)| (name, Segment::filters(filters)))
        .collect())
}
