use crate::tuya::bindings::{Binding, BindingOptions, BindingTarget, Channel, MeterField, ModelDefinition};
use crate::tuya::converters::{self, Subfield, SubfieldKind, ValueConverter};
use crate::tuya::structs::DataType;

/* Shared lookup tables */

const ENERGY_FLOW: &[(&str, u32)] = &[
    ("consuming", 0),
    ("producing", 1),
];

const THRESHOLD_ACTION: &[(&str, u32)] = &[
    ("closed", 0),
    ("alarm", 1),
    ("trip", 2),
];

const BREAKER_EVENT: &[(&str, u32)] = &[
    ("normal", 0),
    ("trip_over_current", 1),
    ("trip_over_power", 2),
    ("trip_over_temperature", 3),
    ("trip_voltage_1", 4),
    ("trip_voltage_2", 5),
    ("alarm_over_current", 6),
    ("alarm_over_power", 7),
    ("alarm_over_temperature", 8),
    ("alarm_voltage_1", 9),
    ("alarm_voltage_2", 10),
    ("remote_on", 11),
    ("remote_off", 12),
    ("manual_on", 13),
    ("manual_off", 14),
    ("value_15", 15),
    ("value_16", 16),
    ("factory_reset", 17),
];

const THERMOSTAT_PRESET: &[(&str, u32)] = &[
    ("programming", 0),
    ("manual", 1),
    ("temporary_manual", 2),
    ("holiday", 3),
];

/* The DIN rail meter reports voltage, current and power packed into one raw
   datapoint. Bytes 2 and 5 are the unused high bytes of wider fields. */
const PHASE_FIELDS: &[Subfield] = &[
    Subfield { name: "voltage", offset: 0, width: 2, divisor: 10.0, kind: SubfieldKind::Unsigned },
    Subfield { name: "current", offset: 3, width: 2, divisor: 1000.0, kind: SubfieldKind::Unsigned },
    Subfield { name: "power", offset: 6, width: 2, divisor: 1.0, kind: SubfieldKind::Unsigned },
];

/* Row constructors, they keep the tables below readable */

fn attribute(dp: u8, data_type: DataType, name: &'static str, converter: ValueConverter) -> Binding {
    return Binding {
        dp: dp,
        data_type: data_type,
        attribute: Some(name),
        converter: converter,
        target: BindingTarget::Attribute,
        options: BindingOptions::default(),
    };
}

fn settable(dp: u8, data_type: DataType, name: &'static str, converter: ValueConverter) -> Binding {
    return Binding {
        dp: dp,
        data_type: data_type,
        attribute: Some(name),
        converter: converter,
        target: BindingTarget::Attribute,
        options: BindingOptions { settable: true, ..Default::default() },
    };
}

fn meter(dp: u8, data_type: DataType, name: &'static str, channel: Channel, field: MeterField, converter: ValueConverter) -> Binding {
    return Binding {
        dp: dp,
        data_type: data_type,
        attribute: Some(name),
        converter: converter,
        target: BindingTarget::Meter { channel: channel, field: field },
        options: BindingOptions::default(),
    };
}

/// Merge binding: all members of the converted object land in the result map
fn merge(dp: u8, converter: ValueConverter) -> Binding {
    return Binding {
        dp: dp,
        data_type: DataType::Raw,
        attribute: None,
        converter: converter,
        target: BindingTarget::Attribute,
        options: BindingOptions::default(),
    };
}

/// Ignore binding: the datapoint is known but deliberately not exposed
fn ignore(dp: u8, data_type: DataType) -> Binding {
    return Binding {
        dp: dp,
        data_type: data_type,
        attribute: None,
        converter: ValueConverter::Raw,
        target: BindingTarget::Attribute,
        options: BindingOptions::default(),
    };
}

/// Two channel bidirectional energy meter with 80 A current clamps.
///
/// Each channel reports power, current, power factor and flow direction as
/// separate datapoints of one burst, merged by the reconstructor. Whether a
/// channel uses signed power or the categorical flow direction, and whether
/// its flow direction arrives one burst late, is device configuration.
fn pj1203a() -> ModelDefinition {
    return ModelDefinition {
        model: "PJ-1203A",
        description: "Two channel bidirectional energy meter",
        manufacturer_names: &["_TZE204_81yrt3lo", "_TZE284_81yrt3lo"],
        seq_increment: 256,
        bindings: vec![
            meter(101, DataType::Value, "power_a", Channel::A, MeterField::Power, ValueConverter::Scale { divisor: 10.0 }),
            meter(102, DataType::Enum, "energy_flow_a", Channel::A, MeterField::FlowDirection, ValueConverter::Lookup { table: ENERGY_FLOW }),
            meter(104, DataType::Value, "power_b", Channel::B, MeterField::Power, ValueConverter::Scale { divisor: 10.0 }),
            meter(105, DataType::Enum, "energy_flow_b", Channel::B, MeterField::FlowDirection, ValueConverter::Lookup { table: ENERGY_FLOW }),
            attribute(106, DataType::Value, "energy_a", ValueConverter::Scale { divisor: 100.0 }),
            attribute(107, DataType::Value, "energy_b", ValueConverter::Scale { divisor: 100.0 }),
            attribute(108, DataType::Value, "energy_produced_a", ValueConverter::Scale { divisor: 100.0 }),
            attribute(109, DataType::Value, "energy_produced_b", ValueConverter::Scale { divisor: 100.0 }),
            meter(110, DataType::Value, "power_factor_a", Channel::A, MeterField::PowerFactor, ValueConverter::Raw),
            meter(111, DataType::Value, "power_factor_b", Channel::B, MeterField::PowerFactor, ValueConverter::Raw),
            attribute(112, DataType::Value, "voltage", ValueConverter::Scale { divisor: 10.0 }),
            meter(113, DataType::Value, "current_a", Channel::A, MeterField::Current, ValueConverter::Scale { divisor: 1000.0 }),
            meter(114, DataType::Value, "current_b", Channel::B, MeterField::Current, ValueConverter::Scale { divisor: 1000.0 }),
            attribute(115, DataType::Value, "ac_frequency", ValueConverter::Scale { divisor: 100.0 }),
            /* Undocumented calibration registers, reported but not exposed */
            ignore(116, DataType::Value),
            ignore(117, DataType::Value),
            settable(129, DataType::Value, "update_frequency", ValueConverter::Raw),
        ],
    };
}

/// Single phase DIN rail breaker with energy metering and leakage protection
fn towsmr1() -> ModelDefinition {
    return ModelDefinition {
        model: "TOWSMR1",
        description: "Single phase DIN rail energy meter and breaker",
        manufacturer_names: &["_TZE204_kobbcyum"],
        seq_increment: 256,
        bindings: vec![
            attribute(1, DataType::Value, "energy", ValueConverter::Scale { divisor: 100.0 }),
            merge(6, ValueConverter::Composite { fields: PHASE_FIELDS }),
            attribute(15, DataType::Value, "leakage_current", ValueConverter::Raw),
            settable(16, DataType::Bool, "state", ValueConverter::Raw),
            settable(102, DataType::Enum, "over_voltage_setting", ValueConverter::Lookup { table: THRESHOLD_ACTION }),
            settable(103, DataType::Enum, "under_voltage_setting", ValueConverter::Lookup { table: THRESHOLD_ACTION }),
            settable(104, DataType::Enum, "over_current_setting", ValueConverter::Lookup { table: THRESHOLD_ACTION }),
            settable(105, DataType::Enum, "over_power_setting", ValueConverter::Lookup { table: THRESHOLD_ACTION }),
            settable(107, DataType::Enum, "temperature_setting", ValueConverter::Lookup { table: THRESHOLD_ACTION }),
            settable(108, DataType::Enum, "leakage_setting", ValueConverter::Lookup { table: THRESHOLD_ACTION }),
            attribute(110, DataType::Enum, "last_event", ValueConverter::Lookup { table: BREAKER_EVENT }),
            settable(112, DataType::Bool, "clear_fault", ValueConverter::Raw),
            settable(113, DataType::Bool, "factory_reset", ValueConverter::Raw),
            settable(114, DataType::Value, "current_threshold", ValueConverter::Raw),
            settable(115, DataType::Value, "over_voltage_threshold", ValueConverter::Raw),
            settable(116, DataType::Value, "under_voltage_threshold", ValueConverter::Raw),
            settable(117, DataType::Value, "leakage_threshold", ValueConverter::Raw),
            settable(118, DataType::Value, "temperature_threshold", ValueConverter::Scale { divisor: 10.0 }),
            settable(119, DataType::Value, "over_power_threshold", ValueConverter::Raw),
            attribute(131, DataType::Value, "temperature", ValueConverter::Scale { divisor: 10.0 }),
        ],
    };
}

/// Thermostatic radiator valve with a weekly schedule
fn brt100() -> ModelDefinition {
    return ModelDefinition {
        model: "BRT-100-TRV",
        description: "Thermostatic radiator valve",
        manufacturer_names: &["_TZE200_b6wax7g0"],
        seq_increment: 256,
        bindings: vec![
            settable(2, DataType::Enum, "preset", ValueConverter::Lookup { table: THERMOSTAT_PRESET }),
            settable(16, DataType::Value, "current_heating_setpoint", ValueConverter::Scale { divisor: 10.0 }),
            attribute(24, DataType::Value, "local_temperature", ValueConverter::Scale { divisor: 10.0 }),
            settable(27, DataType::Value, "local_temperature_calibration", ValueConverter::Scale { divisor: 10.0 }),
            settable(36, DataType::Bool, "frost_protection", ValueConverter::Raw),
            attribute(45, DataType::Bitmap, "error_status", ValueConverter::Raw),
            Binding {
                dp: 109,
                data_type: DataType::Raw,
                attribute: Some("schedule_workdays"),
                converter: ValueConverter::Custom {
                    decode: converters::schedule_from_wire,
                    encode: Some(converters::schedule_to_wire),
                },
                target: BindingTarget::Attribute,
                options: BindingOptions { settable: true, ..Default::default() },
            },
            attribute(110, DataType::Value, "battery", ValueConverter::Raw),
        ],
    };
}

/// Resolves a configured model string, either the model name or the Zigbee
/// manufacturer name found during pairing
pub fn get_model_definition(model: &str) -> Option<ModelDefinition> {
    match model {
        "PJ-1203A" => Some(pj1203a()),
        "TOWSMR1" => Some(towsmr1()),
        "BRT-100-TRV" => Some(brt100()),
        _ => {
            for definition in [pj1203a(), towsmr1(), brt100()] {
                if definition.manufacturer_names.contains(&model) {
                    return Some(definition);
                }
            }
            return None;
        }
    }
}
