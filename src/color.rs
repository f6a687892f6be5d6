//! stable color assignment for label values and receivers
//!
//! The dashboard tints its label pills. The same value must keep the same
//! tint across render cycles and process-internal reorderings, so colors
//! are derived from a stable hash of the (label name, label value) pair
//! into a fixed hue wheel, and every assignment is cached for the life of
//! the process. Receivers are colored unconditionally under the reserved
//! pseudo label name [RECEIVER_LABEL].

use std::collections::BTreeMap;

use serde::Serialize;

use crate::{alert::CanonicalAlert, pairmap::PairMap};

/// pseudo label name under which receivers are colored
pub const RECEIVER_LABEL: &str = "@receiver";

/// hue wheel size, one slot per 5 degrees
const PALETTE_SIZE: usize = 72;

const SATURATION: f64 = 0.65;
const VALUE: f64 = 0.85;

/// color of one label pill
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LabelColor {
    /// css hex background, `#rrggbb`
    pub background: String,
    /// perceived luminance 0..=255, lets the UI pick readable text
    pub brightness: i32,
}

/// the only cross-cycle mutable state of the engine
///
/// Once a key is assigned a color it keeps it: entries are never dropped
/// because a key is absent from the current cycle, only when the
/// unique-color label list itself stops naming their label.
#[derive(Debug)]
pub struct ColorCache {
    /// every assignment handed out so far
    assigned: PairMap<String, String, LabelColor>,
    /// palette slot to owning key, backs the collision probe
    slot_owners: Vec<Option<(String, String)>>,
}

impl ColorCache {
    pub fn new() -> Self {
        Self::with_slots(PALETTE_SIZE)
    }

    fn with_slots(palette_size: usize) -> Self {
        Self { assigned: PairMap::new(), slot_owners: vec![None; palette_size] }
    }

    /// ensure colors for everything in view, return the whole cache
    ///
    /// Covers every value of every configured unique-color label plus every
    /// receiver. The returned nesting (label name, then value) is ordered,
    /// so serializing it is deterministic.
    pub fn colorize(
        &mut self,
        alerts: &[CanonicalAlert],
        unique_labels: &[String],
    ) -> BTreeMap<String, BTreeMap<String, LabelColor>> {
        for alert in alerts {
            for name in unique_labels {
                if let Some(value) = alert.labels.get(name) {
                    self.assign(name, value);
                }
            }
            self.assign(RECEIVER_LABEL, &alert.receiver);
        }

        let mut colors: BTreeMap<String, BTreeMap<String, LabelColor>> = BTreeMap::new();
        for (name, value, color) in self.assigned.iter() {
            colors.entry(name.clone()).or_default().insert(value.clone(), color.clone());
        }

        colors
    }

    /// apply a changed unique-color label list
    ///
    /// Entries of label names no longer on the list are dropped and their
    /// palette slots freed. Receiver entries always stay. Newly listed
    /// names simply start assigning on the next [ColorCache::colorize].
    pub fn set_unique_labels(&mut self, unique_labels: &[String]) {
        self.assigned
            .retain(|name, _, _| name == RECEIVER_LABEL || unique_labels.contains(name));

        for owner in &mut self.slot_owners {
            let freed = owner
                .as_ref()
                .map_or(false, |(name, _)| name != RECEIVER_LABEL && !unique_labels.contains(name));
            if freed {
                *owner = None;
            }
        }
    }

    fn assign(&mut self, name: &str, value: &str) {
        if self.assigned.contains(name, value) {
            return;
        }

        // linear probe upward from the home slot; a fully claimed palette
        // degrades to sharing the home slot instead of failing the cycle
        let home = home_slot(name, value, self.slot_owners.len());
        let mut slot = home;
        for step in 0..self.slot_owners.len() {
            let candidate = (home + step) % self.slot_owners.len();
            if self.slot_owners[candidate].is_none() {
                self.slot_owners[candidate] = Some((name.to_string(), value.to_string()));
                slot = candidate;
                break;
            }
        }

        self.assigned.insert(
            name.to_string(),
            value.to_string(),
            palette_color(slot, self.slot_owners.len()),
        );
    }
}

/// stable hash of a coloring key, reduced to a palette slot
///
/// crc32 rather than the std hasher: std hashing is randomly seeded per
/// process and the slot must not change between runs
fn home_slot(name: &str, value: &str, palette_size: usize) -> usize {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(name.as_bytes());
    hasher.update(&[0x1f]);
    hasher.update(value.as_bytes());

    hasher.finalize() as usize % palette_size
}

fn palette_color(slot: usize, palette_size: usize) -> LabelColor {
    let hue = slot as f64 * (360.0 / palette_size as f64);
    let (red, green, blue) = hsv_to_rgb(hue, SATURATION, VALUE);

    LabelColor {
        background: format!("#{red:02x}{green:02x}{blue:02x}"),
        brightness: brightness(red, green, blue),
    }
}

fn hsv_to_rgb(hue: f64, saturation: f64, value: f64) -> (u8, u8, u8) {
    let chroma = value * saturation;
    let h = hue / 60.0;
    let x = chroma * (1.0 - (h % 2.0 - 1.0).abs());

    let (r, g, b) = match h as u32 {
        0 => (chroma, x, 0.0),
        1 => (x, chroma, 0.0),
        2 => (0.0, chroma, x),
        3 => (0.0, x, chroma),
        4 => (x, 0.0, chroma),
        _ => (chroma, 0.0, x),
    };

    let m = value - chroma;
    (to_byte(r + m), to_byte(g + m), to_byte(b + m))
}

fn to_byte(channel: f64) -> u8 {
    (channel * 255.0).round() as u8
}

/// perceived luminance of an rgb color, weighted for human sensitivity and
/// truncated to a whole step on the 0..=255 scale
fn brightness(red: u8, green: u8, blue: u8) -> i32 {
    let (r, g, b) = (red as f64, green as f64, blue as f64);

    (0.241 * r * r + 0.691 * g * g + 0.068 * b * b).sqrt() as i32
}
