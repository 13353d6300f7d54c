use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use serde_yml;
use std::collections::HashMap;
use std::error::Error;
use std::fs::File;
use std::io::prelude::*;
use std::sync::RwLock;

fn general_log_level_default() -> String { return "info".to_string() }
fn general_tenant_default() -> String { return "default".to_string() }

#[derive(Deserialize, Serialize, Clone)]
pub struct GeneralConfig {
    #[serde(default="general_log_level_default")]
    pub log_level: String,
    #[serde(default="general_tenant_default")]
    pub tenant: String,
}

fn mqtt_client_name_default() -> String { return "tuya2mqtt".to_string() }

#[derive(Deserialize, Serialize, Clone)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub pass: String,
    #[serde(default="mqtt_client_name_default")]
    pub client_name: String,
}

fn tuya_device_options_default() -> HashMap<String, bool> { return HashMap::new() }

#[derive(Deserialize, Serialize, Clone)]
pub struct TuyaDeviceConfig {
    pub friendly_name: String,
    pub ieee_address: String,
    /// Model name or the Zigbee manufacturer name found during pairing
    pub model: String,
    /// Burst counter step of this device, the model default when omitted
    pub seq_increment: Option<u16>,
    /// Per device overrides of binding flags, e.g. signed_power_a
    #[serde(default="tuya_device_options_default")]
    pub options: HashMap<String, bool>,
}

fn tuya_devices_default() -> Vec<TuyaDeviceConfig> { return Vec::new() }

#[derive(Deserialize, Serialize, Clone)]
pub struct TuyaConfig {
    #[serde(default="tuya_devices_default")]
    pub devices: Vec<TuyaDeviceConfig>,
}

fn general_default() -> GeneralConfig {
    return GeneralConfig { log_level: general_log_level_default(), tenant: general_tenant_default() }
}
fn tuya_default() -> TuyaConfig { return TuyaConfig { devices: Vec::new() }}

#[derive(Deserialize, Serialize, Clone)]
pub struct Config {
    #[serde(default="general_default")]
    pub general: GeneralConfig,
    pub mqtt: MqttConfig,
    #[serde(default="tuya_default")]
    pub tuya: TuyaConfig,
}

pub struct ConfigHolder {
    pub config: Config,
    pub lock: RwLock<bool>,
}

pub enum ConfigBases {
    General(GeneralConfig),
    Mqtt(MqttConfig),
    Tuya(TuyaConfig),
}

impl ConfigHolder {
    pub fn load() -> Self {

        /* Check for the two paths of the config file */
        let mut file = File::open("config/t2m.yaml");
        if file.is_err() {
            file = Ok(File::open("t2m.yaml").expect("Unable to read the config on config/t2m.yaml or t2m.yaml"));
        }

        let mut file = file.unwrap();

        let mut contents = String::new();
        file.read_to_string(&mut contents).expect("Unable to read config file");
        let c: Config = serde_yml::from_str(&contents).expect("Unable to parse config file");
        return ConfigHolder {
            config: c,
            lock: RwLock::new(true),
        }
    }

    pub fn get_copy(&self, base: &str) -> Result<ConfigBases, Box<dyn Error>> {
        /* Lock against modifications during copy */
        let _lock = self.lock.read().unwrap();

        match base {
            "general" => { return Ok(ConfigBases::General(self.config.general.clone())) },
            "mqtt" => { return Ok(ConfigBases::Mqtt(self.config.mqtt.clone())) },
            "tuya" => { return Ok(ConfigBases::Tuya(self.config.tuya.clone())) },
            _ => { Err("Type not known")? }
        }
    }
}

lazy_static! {
    pub static ref CONFIG: RwLock<ConfigHolder> = RwLock::new(ConfigHolder::load());
}

#[macro_export]
macro_rules! get_config_or_panic {
    ($base: expr, $pat: path) => {
        {
            let c = CONFIG.read().unwrap().get_copy($base).unwrap();
            if let $pat(a) = c { // #1
                a
            } else {
                panic!(
                    "mismatch variant when cast to {}",
                    stringify!($pat)); // #2
            }
        }
    };
}

#[cfg(test)]
mod config_tests {
    use super::*;
    use std::fs;

    const SAMPLE: &str = r#"
mqtt:
  host: broker.local
  port: 1883
  user: t2m
  pass: secret
tuya:
  devices:
    - friendly_name: garage_meter
      ieee_address: "0xa4c138d34707b332"
      model: PJ-1203A
      options:
        signed_power_a: true
    - friendly_name: heater_valve
      ieee_address: "0x847127fffe5a3bc0"
      model: BRT-100-TRV
"#;

    #[test]
    fn sample_parses_with_defaults() {
        let config: Config = serde_yml::from_str(SAMPLE).unwrap();

        assert_eq!(config.general.log_level, "info");
        assert_eq!(config.mqtt.client_name, "tuya2mqtt");
        assert_eq!(config.tuya.devices.len(), 2);

        let meter = &config.tuya.devices[0];
        assert_eq!(meter.model, "PJ-1203A");
        assert_eq!(meter.seq_increment, None);
        assert_eq!(meter.options.get("signed_power_a"), Some(&true));

        let valve = &config.tuya.devices[1];
        assert!(valve.options.is_empty());
    }

    #[test]
    fn config_round_trips_through_a_file() {
        let config: Config = serde_yml::from_str(SAMPLE).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t2m.yaml");
        fs::write(&path, serde_yml::to_string(&config).unwrap()).unwrap();

        let reread: Config = serde_yml::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(reread.mqtt.host, "broker.local");
        assert_eq!(reread.tuya.devices[0].friendly_name, "garage_meter");
        assert_eq!(reread.tuya.devices[0].options.get("signed_power_a"), Some(&true));
    }
}
