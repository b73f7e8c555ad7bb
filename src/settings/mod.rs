mod store;

pub use store::{JsonFileStore, MemoryStore, SettingsStore};
