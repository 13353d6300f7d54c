//! Tuya Zigbee datapoint bridge
//!
//! This library decodes the Tuya vendor sub-protocol tunneled through the
//! manuSpecificTuya cluster and publishes the resulting readings via MQTT.

pub mod models;
pub mod mqtt;
pub mod config;
pub mod tuya;

// Re-export common types for easier access
pub use models::{DeviceProtocol, DeviceStatus};
pub use mqtt::{CALLBACKS, MeteringData};
pub use tuya::TuyaManager;
pub use config::CONFIG;

use uuid::Uuid;

pub fn get_unix_ts() -> u64 {
    return std::time::SystemTime::now().duration_since(std::time::SystemTime::UNIX_EPOCH).unwrap().as_secs();
}

pub fn get_id(protocol: String, device_name: &String) -> String {
    return format!("{}-{}-{}", protocol, device_name, Uuid::new_v4());
}
