use std::collections::HashMap;

/// In-memory staging area holding records between flushes, bucketed by
/// section hash. Size accounting includes the implicit trailing newline
/// each record costs on disk.
#[derive(Debug, Default)]
pub struct Accumulator {
    buckets: HashMap<u16, Vec<String>>,
    size: usize,
    count: usize,
}

impl Accumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stages a record under its section.
    pub fn push(&mut self, section: u16, record: String) {
        self.size += record.len() + 1;
        self.count += 1;
        self.buckets.entry(section).or_default().push(record);
    }

    /// Total staged bytes, newlines included.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of staged records.
    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Takes the staged buckets, leaving the accumulator empty.
    pub fn take(&mut self) -> HashMap<u16, Vec<String>> {
        self.size = 0;
        self.count = 0;
        std::mem::take(&mut self.buckets)
    }
}
