//! Key-naming for the Redis-backed state store (SPEC_FULL.md §4.5, §6).

pub const GENERATION_IDS_SET: &str = "generationIDs";
pub const TASK_IDS_SET: &str = "task_ids";
pub const GENERATION_UPDATED_CHANNEL: &str = "generation.updated";

pub fn generation_hash_key(id: &str) -> String {
    format!("generation:{id}")
}

pub fn generation_canceled_channel(id: &str) -> String {
    format!("{id}.canceled")
}

pub fn task_hash_key(task_id: &str) -> String {
    format!("task:{task_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_expected_keys() {
        assert_eq!(generation_hash_key("abc"), "generation:abc");
        assert_eq!(generation_canceled_channel("abc"), "abc.canceled");
        assert_eq!(task_hash_key("orders"), "task:orders");
    }
}
