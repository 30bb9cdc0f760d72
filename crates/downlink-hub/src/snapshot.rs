//! The live aggregate published to dashboards.
//!
//! Field names on the wire follow the dashboard's contract, which mixes
//! firmware signal names (`Pack_Voltage`) with derived ones
//! (`power_consumption`), hence the explicit renames.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::reading::Reading;

/// Solar charge controller channels, in wire order.
pub const MPPT_CHANNELS: [char; 4] = ['A', 'B', 'C', 'D'];
/// Battery cell monitoring units on the pack.
pub const CMU_COUNT: usize = 5;
/// Cells measured by each CMU.
pub const CELLS_PER_CMU: usize = 8;

/// Named boolean status bits, keyed by flag name.
pub type FlagGroup = BTreeMap<String, bool>;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Snapshot {
    // Overview
    #[serde(rename = "Pack_Voltage")]
    pub pack_voltage: Reading,
    #[serde(rename = "SOC_Ah")]
    pub soc_ah: Reading,
    pub power_consumption: Reading,
    pub solar_input: Reading,
    pub distance_travelled: Reading,
    #[serde(rename = "Motor_Temp")]
    pub motor_temp: Reading,
    #[serde(rename = "Speed")]
    pub speed: Reading,

    // Battery
    #[serde(rename = "Pack_Current")]
    pub pack_current: Reading,
    pub cmus: Vec<CmuReading>,
    pub battery_ranges: BatteryRanges,
    pub precharge_state: Reading,
    pub contactor_flags: FlagGroup,
    #[serde(rename = "bmsFlags")]
    pub bms_flags: FlagGroup,

    // Motor
    #[serde(rename = "Motor_Velocity")]
    pub motor_velocity: Reading,
    #[serde(rename = "HeatSink_Temp")]
    pub heatsink_temp: Reading,
    #[serde(rename = "PhaseA_Current")]
    pub phase_a_current: Reading,
    #[serde(rename = "PhaseB_Current")]
    pub phase_b_current: Reading,
    #[serde(rename = "PhaseC_Current")]
    pub phase_c_current: Reading,
    #[serde(rename = "Bus_Voltage")]
    pub bus_voltage: Reading,
    #[serde(rename = "Bus_Current")]
    pub bus_current: Reading,
    #[serde(rename = "Bus_Power")]
    pub bus_power: Reading,
    #[serde(rename = "DSP_Board_Temp")]
    pub dsp_board_temp: Reading,
    #[serde(rename = "Throttle_Perc")]
    pub throttle_perc: Reading,
    #[serde(rename = "MotorLimits")]
    pub motor_limits: FlagGroup,
    #[serde(rename = "MotorErrors")]
    pub motor_errors: FlagGroup,

    // Solar
    pub mppts: Vec<MpptReading>,

    #[serde(rename = "CabinSensors")]
    pub cabin_sensors: CabinSensors,

    // Strategy
    #[serde(rename = "Latitude")]
    pub latitude: Reading,
    #[serde(rename = "Longitude")]
    pub longitude: Reading,
    #[serde(rename = "Altitude")]
    pub altitude: Reading,
    #[serde(rename = "Acceleration")]
    pub acceleration: Reading,
}

impl Snapshot {
    /// An all-zero snapshot with every channel and unit present.
    pub fn new() -> Self {
        Self {
            cmus: vec![CmuReading::default(); CMU_COUNT],
            mppts: vec![MpptReading::default(); MPPT_CHANNELS.len()],
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CmuReading {
    pub temperature: Reading,
    pub cell_temperature: Reading,
    pub cell_voltages: Vec<Reading>,
}

impl Default for CmuReading {
    fn default() -> Self {
        Self {
            temperature: Reading::ZERO,
            cell_temperature: Reading::ZERO,
            cell_voltages: vec![Reading::ZERO; CELLS_PER_CMU],
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct BatteryRanges {
    pub min_temp: Reading,
    pub max_temp: Reading,
    pub min_volt: Reading,
    pub max_volt: Reading,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MpptReading {
    #[serde(rename = "Input_Voltage")]
    pub input_voltage: Reading,
    #[serde(rename = "Input_Current")]
    pub input_current: Reading,
    #[serde(rename = "Output_Voltage")]
    pub output_voltage: Reading,
    #[serde(rename = "Output_Current")]
    pub output_current: Reading,
    #[serde(rename = "Output_Power")]
    pub output_power: Reading,
    pub efficiency: Reading,
    #[serde(rename = "Mosfet_Temperature")]
    pub mosfet_temperature: Reading,
    #[serde(rename = "MPPT_Temperature")]
    pub mppt_temperature: Reading,
    pub flags: FlagGroup,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CabinSensors {
    #[serde(rename = "Cabin_CO_Content")]
    pub co: Reading,
    #[serde(rename = "Cabin_CH4_Content")]
    pub ch4: Reading,
    #[serde(rename = "Cabin_NH3_Content")]
    pub nh3: Reading,
    #[serde(rename = "Cabin_NO2_Content")]
    pub no2: Reading,
    #[serde(rename = "Cabin_O2_Content")]
    pub o2: Reading,
    #[serde(rename = "Cabin_Temperature")]
    pub temperature: Reading,
    #[serde(rename = "Cabin_Pressure")]
    pub pressure: Reading,
    #[serde(rename = "Cabin_CO2_Content")]
    pub co2: Reading,
}
