//! ID generation for nodes and edges
//!
//! IDs combine a per-engine monotonic counter with a random suffix, so two
//! engines (or an engine and a loaded document) never hand out the same id.

use uuid::Uuid;

/// Generates `"{prefix}_{counter}_{random}"` identifiers
#[derive(Debug, Default)]
pub struct IdGenerator {
    counter: u64,
}

impl IdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Produce the next id with the given prefix
    pub fn next(&mut self, prefix: &str) -> String {
        self.counter += 1;
        let random = Uuid::new_v4().simple().to_string();
        format!("{}_{:x}_{}", prefix, self.counter, &random[..8])
    }

    /// Produce the next id that `taken` reports as unused
    pub fn next_unused(&mut self, prefix: &str, taken: impl Fn(&str) -> bool) -> String {
        loop {
            let id = self.next(prefix);
            if !taken(&id) {
                return id;
            }
            log::debug!("Generated id '{}' already in use; retrying", id);
        }
    }
}
