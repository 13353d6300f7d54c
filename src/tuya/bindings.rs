use std::collections::HashMap;

use crate::tuya::converters::ValueConverter;
use crate::tuya::structs::DataType;

/// Measurement channel of a multi-input device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    A,
    B,
}

impl Channel {
    pub fn index(&self) -> usize {
        match self {
            Channel::A => 0,
            Channel::B => 1,
        }
    }

    pub fn suffix(&self) -> &'static str {
        match self {
            Channel::A => "a",
            Channel::B => "b",
        }
    }
}

/// Sub-reading slot a meter datapoint feeds into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeterField {
    Power,
    Current,
    PowerFactor,
    FlowDirection,
}

/// Where a decoded datapoint value goes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingTarget {
    /// Straight into the published attribute map
    Attribute,
    /// Into the multi frame reconstructor of one channel
    Meter { channel: Channel, field: MeterField },
}

/// Per binding flags from the model table, overridable per device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BindingOptions {
    pub settable: bool,
    pub signed_power: bool,
    pub late_energy_flow: bool,
}

impl Default for BindingOptions {
    fn default() -> Self {
        return BindingOptions {
            settable: false,
            signed_power: false,
            late_energy_flow: false,
        };
    }
}

/// Flush behavior of one reconstructor channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MeterOptions {
    pub signed_power: bool,
    pub late_energy_flow: bool,
}

/// One row of a model's datapoint table.
///
/// `attribute = None` with the `Raw` converter ignores the datapoint without
/// logging. `attribute = None` with a converter producing an object merges
/// all object members into the result map.
#[derive(Clone)]
pub struct Binding {
    pub dp: u8,
    pub data_type: DataType,
    pub attribute: Option<&'static str>,
    pub converter: ValueConverter,
    pub target: BindingTarget,
    pub options: BindingOptions,
}

/// Datapoint table of one device model
#[derive(Clone)]
pub struct ModelDefinition {
    pub model: &'static str,
    pub description: &'static str,
    /// Zigbee manufacturer names this table applies to
    pub manufacturer_names: &'static [&'static str],
    pub seq_increment: u16,
    pub bindings: Vec<Binding>,
}

impl ModelDefinition {
    /// First binding for a datapoint id wins, tables are ordered
    pub fn binding_for_dp(&self, dp: u8) -> Option<&Binding> {
        return self.bindings.iter().find(|binding| binding.dp == dp);
    }

    pub fn binding_for_attribute(&self, attribute: &str) -> Option<&Binding> {
        return self.bindings.iter().find(|binding| binding.attribute == Some(attribute));
    }

    /// Channel flush flags, taken from the channel's power binding
    pub fn meter_options(&self, channel: Channel) -> MeterOptions {
        for binding in self.bindings.iter() {
            if let BindingTarget::Meter { channel: bound, field: MeterField::Power } = binding.target {
                if bound == channel {
                    return MeterOptions {
                        signed_power: binding.options.signed_power,
                        late_energy_flow: binding.options.late_energy_flow,
                    };
                }
            }
        }
        return MeterOptions::default();
    }

    /// Sequence tracking only makes sense for models with reconstructed channels
    pub fn has_meter_bindings(&self) -> bool {
        return self.bindings.iter().any(|binding| matches!(binding.target, BindingTarget::Meter { .. }));
    }

    /// Applies per-device flag overrides from the configuration. The table
    /// carries the model defaults, users tune individual devices with keys
    /// like "signed_power_a" or "late_energy_flow_b".
    pub fn apply_overrides(&mut self, options: &HashMap<String, bool>) {
        for binding in self.bindings.iter_mut() {
            if let BindingTarget::Meter { channel, .. } = binding.target {
                if let Some(enabled) = options.get(&format!("signed_power_{}", channel.suffix())) {
                    binding.options.signed_power = *enabled;
                }
                if let Some(enabled) = options.get(&format!("late_energy_flow_{}", channel.suffix())) {
                    binding.options.late_energy_flow = *enabled;
                }
            }
        }
    }
}

#[cfg(test)]
mod binding_tests {
    use super::*;

    fn meter_table() -> ModelDefinition {
        return ModelDefinition {
            model: "test-meter",
            description: "table fixture",
            manufacturer_names: &["_TZE204_test"],
            seq_increment: 256,
            bindings: vec![
                Binding {
                    dp: 101,
                    data_type: DataType::Value,
                    attribute: Some("power_a"),
                    converter: ValueConverter::Scale { divisor: 10.0 },
                    target: BindingTarget::Meter { channel: Channel::A, field: MeterField::Power },
                    options: BindingOptions { signed_power: true, ..Default::default() },
                },
                Binding {
                    dp: 112,
                    data_type: DataType::Value,
                    attribute: Some("voltage"),
                    converter: ValueConverter::Scale { divisor: 10.0 },
                    target: BindingTarget::Attribute,
                    options: BindingOptions::default(),
                },
            ],
        };
    }

    #[test]
    fn lookups_resolve() {
        let definition = meter_table();
        assert_eq!(definition.binding_for_dp(112).unwrap().attribute, Some("voltage"));
        assert!(definition.binding_for_dp(99).is_none());
        assert_eq!(definition.binding_for_attribute("power_a").unwrap().dp, 101);
        assert!(definition.binding_for_attribute("power_x").is_none());
    }

    #[test]
    fn meter_options_come_from_the_power_binding() {
        let definition = meter_table();
        assert!(definition.meter_options(Channel::A).signed_power);
        assert!(!definition.meter_options(Channel::B).signed_power);
        assert!(definition.has_meter_bindings());
    }

    #[test]
    fn device_options_override_the_table_defaults() {
        let mut definition = meter_table();
        let options = HashMap::from([
            ("signed_power_a".to_string(), false),
            ("late_energy_flow_a".to_string(), true),
            ("late_energy_flow_b".to_string(), true),
        ]);
        definition.apply_overrides(&options);

        assert!(!definition.meter_options(Channel::A).signed_power);
        assert!(definition.meter_options(Channel::A).late_energy_flow);
        /* Channel B has no power binding in the fixture, nothing to flip */
        assert!(!definition.meter_options(Channel::B).late_energy_flow);

        /* Non-meter rows are untouched */
        assert!(!definition.binding_for_dp(112).unwrap().options.late_energy_flow);
    }
}
