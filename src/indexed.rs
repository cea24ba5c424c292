//! Flattening of tabular rows into indexed field keys.
//!
//! A table column `NAME` is kept as `NAME_0`, `NAME_1`, … with row 0 mirrored under the
//! bare `NAME` as the "current" row. A key is indexed when its last `_` is followed by
//! digits only; anything else is a plain key.

use serde_json::{Map, Value};

use crate::error::Result;
use crate::store::KeyValueStore;

/// Length of `name` without its `_<digits>` suffix.
pub fn name_without_index_len(name: &str) -> usize {
    match name.rfind('_') {
        Some(pos) => {
            let suffix = &name[pos + 1..];
            if !suffix.is_empty() && suffix.bytes().all(|b| b.is_ascii_digit()) {
                pos
            } else {
                name.len()
            }
        }
        None => name.len(),
    }
}

/// The column part of a field key: `"S_ID_3"` → `"S_ID"`, `"S_ID"` → `"S_ID"`.
pub fn base_name(name: &str) -> &str {
    &name[..name_without_index_len(name)]
}

/// The row index of an indexed key, `None` for plain keys.
pub fn row_index(name: &str) -> Option<usize> {
    let len = name_without_index_len(name);
    if len == name.len() {
        return None;
    }
    name[len + 1..].parse().ok()
}

pub fn indexed_key(name: &str, index: usize) -> String {
    format!("{}_{}", base_name(name), index)
}

/// Deletes the columns of `rows[0]`: the bare key plus `base_0`, `base_1`, … up to the
/// first missing index. Indices beyond a gap are left in place.
pub fn clear_array_keys<S>(store: &mut S, rows: &[Value]) -> Result<()>
where
    S: KeyValueStore + ?Sized,
{
    let Some(Value::Object(first)) = rows.first() else {
        return Ok(());
    };

    for key in first.keys() {
        store.remove_item(key)?;

        let mut index = 0;
        let mut current = indexed_key(key, index);
        while index == 0 || store.contains_key(&current)? {
            store.remove_item(&current)?;
            index += 1;
            current = indexed_key(key, index);
        }
    }
    Ok(())
}

/// Replaces the stored table with `rows`. Returns how many rows were written.
///
/// Only the first `min(rows.len(), max_rows)` rows are written. Rows that are not
/// objects are skipped but keep their index.
pub fn store_array<S>(store: &mut S, rows: &[Value], max_rows: Option<usize>) -> Result<usize>
where
    S: KeyValueStore + ?Sized,
{
    clear_array_keys(store, rows)?;

    let limit = max_rows.map_or(rows.len(), |max| max.min(rows.len()));
    let mut written = 0;

    for (index, row) in rows.iter().take(limit).enumerate() {
        let Value::Object(columns) = row else {
            continue;
        };

        for (key, value) in columns {
            store.set_item(&indexed_key(key, index), value.clone())?;

            if index == 0 && !key.ends_with("_0") {
                store.set_item(key, value.clone())?;
            }
        }
        written += 1;
    }
    Ok(written)
}

/// Highest row index stored for the column of `field_name`, ignoring the probe's own
/// suffix. `None` when the column has no indexed keys.
pub fn highest_index<S>(store: &S, field_name: &str) -> Result<Option<usize>>
where
    S: KeyValueStore + ?Sized,
{
    let wanted = base_name(field_name);
    Ok(store
        .keys()?
        .iter()
        .filter(|key| base_name(key) == wanted)
        .filter_map(|key| row_index(key))
        .max())
}

/// Rebuilds rows `0..=highest` for the given columns. Missing cells are left out of
/// their row object.
pub fn load_rows<S>(store: &S, columns: &[&str]) -> Result<Vec<Map<String, Value>>>
where
    S: KeyValueStore + ?Sized,
{
    let mut last: Option<usize> = None;
    for column in columns {
        last = last.max(highest_index(store, column)?);
    }
    let Some(last) = last else {
        return Ok(Vec::new());
    };

    let mut rows = Vec::with_capacity(last + 1);
    for index in 0..=last {
        let mut row = Map::new();
        for column in columns {
            if let Some(value) = store.get_item(&indexed_key(column, index))? {
                row.insert(base_name(column).to_string(), value);
            }
        }
        rows.push(row);
    }
    Ok(rows)
}
