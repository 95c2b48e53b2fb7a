mod document;
mod store;

pub use document::{deep_merge, default_document, OTA_SECTION};
pub use store::DeviceConfigStore;
