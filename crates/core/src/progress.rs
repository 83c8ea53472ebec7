use serde::Serialize;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ResolveProgress {
    pub documents: u64,
    pub directories: u64,
    pub bytes: u128,
}

impl ResolveProgress {
    pub(crate) fn record(&mut self, is_directory: bool, size: u64) {
        self.documents += 1;
        if is_directory {
            self.directories += 1;
        } else {
            self.bytes = self.bytes.saturating_add(size as u128);
        }
    }
}
