pub mod markup;
pub mod strip;
pub mod timestamp;

pub use markup::clean_markup;
pub use strip::strip_empty;
pub use timestamp::format_relative_time;

use serde_json::{Map, Value};

/// Compacts `[{name, count, users}]` reactions into `{name: count}`, dropping
/// entries with an empty name. Returns `None` when the resulting map is empty.
pub fn compact_reactions(reactions: &[crate::client::RawReaction]) -> Option<Map<String, Value>> {
    let mut out = Map::new();
    for reaction in reactions {
        if reaction.name.trim().is_empty() {
            continue;
        }
        out.insert(reaction.name.clone(), Value::from(reaction.count));
    }
    if out.is_empty() {
        None
    } else {
        Some(out)
    }
}
