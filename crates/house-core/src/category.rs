//! Device categories and their handshake bitmask encoding.
//!
//! Bit `i % 8` of byte `i / 8` marks support for the i-th category in
//! [`Category::ALL`] order. The order is part of the wire format.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// A capability an extension can declare during the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u16)]
pub enum Category {
    LightController = 0,
    LightBrightnessController = 1,
    LightTemperatureController = 2,
    AmbientLightSensor = 3,
    MotionSensor = 4,
    SwitchController = 5,
    HubInterface = 6,
}

impl Category {
    pub const ALL: [Category; 7] = [
        Category::LightController,
        Category::LightBrightnessController,
        Category::LightTemperatureController,
        Category::AmbientLightSensor,
        Category::MotionSensor,
        Category::SwitchController,
        Category::HubInterface,
    ];

    /// Number of bitmask bytes exchanged in the handshake.
    pub const fn mask_len() -> usize {
        Self::ALL.len().div_ceil(8)
    }
}

/// Encode a set of categories as handshake bitmask bytes.
pub fn bitmasks(supported: &BTreeSet<Category>) -> Vec<u8> {
    let mut masks = vec![0u8; Category::mask_len()];
    for (index, category) in Category::ALL.iter().enumerate() {
        if supported.contains(category) {
            masks[index / 8] |= 1 << (index % 8);
        }
    }
    masks
}

/// Decode handshake bitmask bytes. Bits past the known categories are ignored.
pub fn categories_from(masks: &[u8]) -> BTreeSet<Category> {
    let mut supported = BTreeSet::new();
    for (byte_index, mask) in masks.iter().enumerate() {
        for bit in 0..8 {
            if (mask >> bit) & 1 == 1 {
                if let Some(category) = Category::ALL.get(byte_index * 8 + bit) {
                    supported.insert(*category);
                }
            }
        }
    }
    supported
}
