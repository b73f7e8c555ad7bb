use uuid::Uuid;

use crate::settings::SettingsStore;

const KEY_DEVICE_ID: &str = "deviceId";

/// Returns the install's stable device identifier, generating and
/// persisting one on first use.
pub fn stable_device_id(store: &dyn SettingsStore) -> String {
    if let Some(id) = store.get(KEY_DEVICE_ID) {
        if !id.is_empty() {
            return id;
        }
    }
    let id = Uuid::new_v4().to_string();
    store.set(KEY_DEVICE_ID, &id);
    id
}
