use std::collections::BTreeMap;

use serde::Serialize;
use tracing::debug;

use crate::overpass::{ElementKind, RawElement};

/// Used when an element has neither a name, a brand nor an operator.
pub const FALLBACK_NAME: &str = "Kebab";

const NAME_TAGS: [&str; 3] = ["name", "brand", "operator"];
const ADDRESS_TAGS: [&str; 4] = [
    "addr:housenumber",
    "addr:street",
    "addr:postcode",
    "addr:city",
];

/// A row of the `shops` table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ShopRow {
    pub id: String,
    pub name: String,
    pub address: Option<String>,
    pub lat: f64,
    pub lng: f64,
}

pub fn normalize_all(elements: &[RawElement]) -> Vec<ShopRow> {
    elements.iter().filter_map(element_to_row).collect()
}

/// Converts an element into a row, or `None` if it has no usable coordinates.
pub fn element_to_row(el: &RawElement) -> Option<ShopRow> {
    let Some(id) = canonical_id(el.kind, el.id) else {
        debug!(id = el.id, "skipping element of unknown type");
        return None;
    };

    let Some((lat, lng)) = coordinates(el) else {
        debug!(%id, "skipping element without coordinates");
        return None;
    };

    Some(ShopRow {
        id,
        name: display_name(&el.tags),
        address: join_address(&el.tags),
        lat,
        lng,
    })
}

/// `osm-<n|w|r>_<id>`, the upsert key.
pub fn canonical_id(kind: ElementKind, id: u64) -> Option<String> {
    let prefix = match kind {
        ElementKind::Node => 'n',
        ElementKind::Way => 'w',
        ElementKind::Relation => 'r',
        ElementKind::Unknown => return None,
    };
    Some(format!("osm-{prefix}_{id}"))
}

pub fn display_name(tags: &BTreeMap<String, String>) -> String {
    NAME_TAGS
        .iter()
        .find_map(|key| tag(tags, key))
        .unwrap_or(FALLBACK_NAME)
        .to_string()
}

/// Joins housenumber, street, postcode and city with `, `.
pub fn join_address(tags: &BTreeMap<String, String>) -> Option<String> {
    let parts: Vec<&str> = ADDRESS_TAGS.iter().filter_map(|key| tag(tags, key)).collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join(", "))
    }
}

fn coordinates(el: &RawElement) -> Option<(f64, f64)> {
    match (el.lat, el.lon) {
        (Some(lat), Some(lon)) => Some((lat, lon)),
        _ => el.center.map(|c| (c.lat, c.lon)),
    }
}

// empty values count as missing
fn tag<'a>(tags: &'a BTreeMap<String, String>, key: &str) -> Option<&'a str> {
    tags.get(key).map(String::as_str).filter(|v| !v.is_empty())
}
