/// Append-only log for one destination plus the committed read cursor of
/// its (single) consumer group.
#[derive(Debug, Default)]
pub struct Topic {
    pub name: String,
    pub log: Vec<Vec<u8>>,
    /// Offset of the first record not yet acknowledged.
    pub committed: usize,
}

impl Topic {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            log: Vec::new(),
            committed: 0,
        }
    }

    /// Append a record and return its offset.
    pub fn append(&mut self, payload: Vec<u8>) -> usize {
        self.log.push(payload);
        self.log.len() - 1
    }

    pub fn get(&self, offset: usize) -> Option<&[u8]> {
        self.log.get(offset).map(Vec::as_slice)
    }

    /// Move the cursor past `offset`. Never moves it backwards.
    pub fn commit(&mut self, offset: usize) {
        self.committed = self.committed.max(offset + 1);
    }
}
