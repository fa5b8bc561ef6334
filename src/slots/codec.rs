//! The compact slot notation nodes use in `CLUSTER NODES`.
//!
//! Tokens are whitespace separated and are one of:
//! - `N`: a single slot
//! - `A-B`: an inclusive range
//! - `[S-<-id]`: slot `S` importing from node `id`
//! - `[S->-id]`: slot `S` migrating to node `id`
//!
//! Owned slots are returned flattened and in report order. A node that reports
//! a slot twice produces it twice; callers that need a set deduplicate.

use std::collections::BTreeMap;

use crate::client::types::{NodeId, ParseError};

use super::distribution::TOTAL_SLOTS;

/// Result of parsing one slot string.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedSlots {
    /// Owned slots, duplicates included.
    pub slots: Vec<u16>,
    /// Slot to destination id.
    pub migrating: BTreeMap<u16, NodeId>,
    /// Slot to source id.
    pub importing: BTreeMap<u16, NodeId>,
}

fn parse_slot(token: &str, context: &str) -> Result<u16, ParseError> {
    let slot: u16 = token
        .trim()
        .parse()
        .map_err(|_| ParseError::InvalidSlotRange(context.to_string()))?;
    if slot >= TOTAL_SLOTS {
        return Err(ParseError::InvalidSlotRange(format!(
            "{} (slot {} out of range)",
            context, slot
        )));
    }
    Ok(slot)
}

/// Parse a slot string such as `0-218 964 [219-<-abc] [4470->-def]`.
pub fn parse_slots(input: &str) -> Result<ParsedSlots, ParseError> {
    let mut parsed = ParsedSlots::default();

    for token in input.split_whitespace() {
        if let Some(marker) = token.strip_prefix('[') {
            let marker = marker.trim_end_matches(']');
            if let Some((slot, source)) = marker.split_once("-<-") {
                parsed
                    .importing
                    .insert(parse_slot(slot, token)?, source.to_string());
            } else if let Some((slot, destination)) = marker.split_once("->-") {
                parsed
                    .migrating
                    .insert(parse_slot(slot, token)?, destination.to_string());
            } else {
                return Err(ParseError::InvalidSlotRange(token.to_string()));
            }
        } else if let Some((start, end)) = token.split_once('-') {
            let start = parse_slot(start, token)?;
            let end = parse_slot(end, token)?;
            if start > end {
                return Err(ParseError::InvalidSlotRange(token.to_string()));
            }
            parsed.slots.extend(start..=end);
        } else {
            parsed.slots.push(parse_slot(token, token)?);
        }
    }

    Ok(parsed)
}

/// Remove open-slot markers, keeping only ownership tokens.
pub fn strip_open_slot_markers(input: &str) -> String {
    input
        .split_whitespace()
        .filter(|token| !token.starts_with('['))
        .collect::<Vec<_>>()
        .join(" ")
}
