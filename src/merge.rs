//! Merging of the entries returned by one dereference search

use log::trace;

use crate::model::SearchEntry;

/// Merge entries into one logical entry.
///
/// The first entry is the base and keeps its DN. Attributes of the following entries are
/// added when new, otherwise their values are appended to the existing attribute, converted
/// to its value kind. Values are not deduplicated. Empty input gives an empty entry.
pub fn merge_entries<I>(entries: I) -> SearchEntry
where
    I: IntoIterator<Item = SearchEntry>,
{
    let mut entries = entries.into_iter();
    let mut merged = match entries.next() {
        Some(entry) => entry,
        None => return SearchEntry::default(),
    };

    for entry in entries {
        trace!("Merging {} into {}", entry.dn, merged.dn);
        for attr in entry.attributes {
            match merged.attribute_mut(&attr.name) {
                Some(existing) => existing.values.append(attr.values),
                None => merged.attributes.push(attr),
            }
        }
    }
    merged
}
