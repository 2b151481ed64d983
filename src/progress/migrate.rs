//! Upgrades stored progress records to the current compact schema.
//!
//! Works on raw JSON so that a record written by any earlier version (long
//! key names, stringly numbers, the old `_ct` test blob) can be brought
//! forward before it is decoded. Running it on an already current record
//! changes nothing.

use std::collections::{BTreeMap, BTreeSet};

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use super::{Attempt, Stage, TestSession};
use crate::content::Block;

/// Long key names of the first schema and their compact replacements.
const RENAMED_KEYS: [(&str, &str); 7] = [
    ("current_block", "b"),
    ("current_step", "s"),
    ("text_index", "i"),
    ("test_scores", "ts"),
    ("passed_blocks", "p"),
    ("blocks_locked", "l"),
    ("test_history", "h"),
];

const LEGACY_TEST_KEY: &str = "_ct";

/// Brings `record` to the current schema in place. Returns whether it changed.
///
/// Known fields whose stored value cannot be decoded are dropped so that
/// defaults take over; everything unknown is left alone.
pub fn upgrade(record: &mut Map<String, Value>) -> bool {
    let mut changed = false;

    for (old, new) in RENAMED_KEYS {
        if let Some(value) = record.remove(old) {
            changed = true;
            if !record.contains_key(new) {
                record.insert(new.to_string(), value);
            }
        }
    }

    if let Some(legacy) = record.remove(LEGACY_TEST_KEY) {
        changed = true;
        if !record.contains_key("ct") {
            if let Some(test) = legacy_test(legacy) {
                record.insert("ct".to_string(), test);
            }
        }
    }

    changed |= rename_stage(record);
    changed |= coerce_integer(record, "b");
    changed |= coerce_integer(record, "i");

    changed |= drop_if_invalid::<Block>(record, "b");
    changed |= drop_if_invalid::<Stage>(record, "s");
    changed |= drop_if_invalid::<usize>(record, "i");
    changed |= drop_if_invalid::<BTreeMap<String, usize>>(record, "ts");
    changed |= drop_if_invalid::<BTreeSet<String>>(record, "p");
    changed |= drop_if_invalid::<BTreeMap<String, i64>>(record, "l");
    changed |= drop_if_invalid::<BTreeMap<String, Vec<Attempt>>>(record, "h");
    changed |= drop_if_invalid::<Option<TestSession>>(record, "ct");

    changed
}

fn rename_stage(record: &mut Map<String, Value>) -> bool {
    let Some(Value::String(stage)) = record.get_mut("s") else {
        return false;
    };
    let compact = match stage.as_str() {
        "text" => "t",
        "test" => "x",
        _ => return false,
    };
    *stage = compact.to_string();
    true
}

/// `"2"` and `2.0` both mean 2.
fn coerce_integer(record: &mut Map<String, Value>, key: &str) -> bool {
    let parsed = match record.get(key) {
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        Some(Value::Number(n)) if n.as_u64().is_none() => n.as_f64(),
        _ => return false,
    };
    match parsed {
        Some(n) if n.is_finite() && n >= 0.0 => {
            record.insert(key.to_string(), Value::from(n.trunc() as u64));
        }
        _ => {
            log::warn!("Dropping non-numeric progress field {:?}", key);
            record.remove(key);
        }
    }
    true
}

fn drop_if_invalid<T: DeserializeOwned>(record: &mut Map<String, Value>, key: &str) -> bool {
    let Some(value) = record.get(key) else {
        return false;
    };
    match T::deserialize(value) {
        Ok(_) => false,
        Err(e) => {
            log::warn!("Dropping undecodable progress field {:?}: {}", key, e);
            record.remove(key);
            true
        }
    }
}

/// The old test blob was `{}` when idle, and kept the rendered message as
/// two loose `chat_id`/`message_id` fields.
fn legacy_test(legacy: Value) -> Option<Value> {
    let Value::Object(mut test) = legacy else {
        return None;
    };
    test.get("block")?;

    let chat_id = test.remove("chat_id").filter(Value::is_i64);
    let message_id = test.remove("message_id").filter(Value::is_i64);
    if let (Some(chat_id), Some(message_id)) = (chat_id, message_id) {
        let mut msg = Map::new();
        msg.insert("chat_id".to_string(), chat_id);
        msg.insert("message_id".to_string(), message_id);
        test.insert("msg".to_string(), Value::Object(msg));
    }
    Some(Value::Object(test))
}
