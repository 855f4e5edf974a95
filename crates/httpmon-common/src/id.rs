use snowflake::SnowflakeIdBucket;
use std::sync::Mutex;

static ID_GENERATOR: Mutex<Option<SnowflakeIdBucket>> = Mutex::new(None);

/// Initializes the process-wide Snowflake id generator.
///
/// `machine_id` and `node_id` identify this instance (each 0-31). Call once
/// at startup, before the first record is created; without it the generator
/// falls back to (1, 1).
pub fn init(machine_id: i32, node_id: i32) {
    let mut gen = ID_GENERATOR.lock().unwrap();
    *gen = Some(SnowflakeIdBucket::new(machine_id, node_id));
}

/// Returns the next Snowflake id as a string. Ids are unique per process
/// and roughly time-ordered, which keeps newest-created-last tiebreaks
/// stable in the store.
pub fn next_id() -> String {
    let mut gen = ID_GENERATOR.lock().unwrap();
    let bucket = gen.get_or_insert_with(|| SnowflakeIdBucket::new(1, 1));
    bucket.get_id().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn ids_are_unique() {
        init(1, 1);
        let mut ids = HashSet::new();
        for _ in 0..1000 {
            let id = next_id();
            assert!(!id.is_empty());
            assert!(ids.insert(id), "duplicate id generated");
        }
    }

    #[test]
    fn ids_parse_as_i64() {
        init(1, 1);
        let id = next_id();
        assert!(id.parse::<i64>().is_ok(), "id should be a valid i64: {id}");
    }
}
