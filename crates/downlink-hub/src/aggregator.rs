use downlink_schema::{DecodedPacket, FieldValue, Fields};
use time::macros::format_description;
use time::OffsetDateTime;

use crate::error::AggregateError;
use crate::history::{History, HistoryPoint};
use crate::reading::Reading;
use crate::snapshot::{
    BatteryRanges, FlagGroup, Snapshot, CELLS_PER_CMU, CMU_COUNT, MPPT_CHANNELS,
};

/// Floor for the MPPT input power when computing efficiency.
pub const EFFICIENCY_EPSILON: f64 = 1e-6;

/// Mean Earth radius used for GPS distance, in kilometres.
pub const EARTH_RADIUS_KM: f64 = 6371.0088;

/// Motor controller, solar and GPS frame.
pub const VARIANT_MOTOR: u8 = b'A';
/// Battery management and cabin frame.
pub const VARIANT_BATTERY: u8 = b'B';

/// Series appended for every motor frame.
pub const MOTOR_SERIES: [&str; 13] = [
    "Timestamps",
    "Speed",
    "Power",
    "Solar",
    "Bus_Power",
    "Motor_Velocity",
    "PhaseA_Current",
    "solar_input_voltage",
    "solar_output_power",
    "Acceleration",
    "Altitude",
    "Latitudes",
    "Longitudes",
];

/// Series appended for every battery frame.
pub const BATTERY_SERIES: [&str; 4] = ["Battery_Timestamps", "Battery", "Pack_Voltage", "Pack_Current"];

const BMS_FLAGS: [&str; 13] = [
    "cell_over_voltage",
    "cell_under_voltage",
    "cell_over_temp",
    "measurement_untrusted",
    "cmu_comm_timeout",
    "vehicle_comm_timeout",
    "bms_setup_mode",
    "cmu_can_status",
    "isolation_test_fail",
    "soc_invalid",
    "can_supply_low",
    "contactor_not_engaged",
    "extra_cell_detected",
];

const CONTACTOR_FLAGS: [&str; 5] = [
    "contactor1_error",
    "contactor2_error",
    "contactor1_output",
    "contactor2_output",
    "contactor_supply",
];

const MOTOR_LIMIT_FLAGS: [&str; 7] = [
    "ipm_temp_limit",
    "bus_voltage_lower_limit",
    "bus_voltage_upper_limit",
    "bus_current_limit",
    "velocity_limit",
    "motor_current_limit",
    "output_voltage_pwm_limit",
];

const MOTOR_ERROR_FLAGS: [&str; 9] = [
    "motor_over_speed",
    "desaturation_fault",
    "rail_15v_uvlo",
    "config_read_error",
    "watchdog_reset",
    "bad_motor_position",
    "dc_bus_over_voltage",
    "software_over_current",
    "hardware_over_current",
];

/// Per-channel MPPT flags; on the wire each is prefixed `mppt_<channel>_`.
const MPPT_FLAGS: [&str; 7] = [
    "hw_overvolt",
    "hw_overcurrent",
    "under12v",
    "low_array_power",
    "battery_full",
    "battery_low",
    "mosfet_overheat",
];

/// What one successful merge produced.
#[derive(Debug, Clone, PartialEq)]
pub struct Update {
    pub variant: u8,
    pub timestamp: OffsetDateTime,
    /// Values appended to history this cycle.
    pub historic: HistoryPoint,
    /// Decoded fields plus derived values, flattened for persistence.
    pub row: Fields,
}

/// Owns the snapshot and history and applies decoded packets to them.
#[derive(Debug, Clone)]
pub struct Aggregator {
    snapshot: Snapshot,
    history: History,
    last_fix: Option<(f64, f64)>,
}

/// Everything a packet changes, computed before any of it is committed.
struct Staged {
    snapshot: Snapshot,
    historic: HistoryPoint,
    row: Fields,
    fix: Option<(f64, f64)>,
}

impl Aggregator {
    pub fn new(history_capacity: usize) -> Self {
        let mut history = History::new(history_capacity);
        for name in MOTOR_SERIES.into_iter().chain(BATTERY_SERIES) {
            history.register(name);
        }
        Self {
            snapshot: Snapshot::new(),
            history,
            last_fix: None,
        }
    }

    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    /// Merge a packet stamped with the current local time.
    pub fn apply(&mut self, packet: &DecodedPacket) -> Result<Update, AggregateError> {
        let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
        self.apply_at(packet, now)
    }

    /// Merge a packet as one atomic transition.
    ///
    /// On error nothing changes: the snapshot, history and GPS track keep
    /// their previous state.
    pub fn apply_at(
        &mut self,
        packet: &DecodedPacket,
        now: OffsetDateTime,
    ) -> Result<Update, AggregateError> {
        let src = Source {
            variant: packet.variant_char(),
            fields: &packet.fields,
        };
        let label = now
            .format(format_description!("[hour]:[minute]:[second]"))
            .unwrap_or_default();

        let staged = match packet.variant {
            VARIANT_MOTOR => self.stage_motor(&src, label)?,
            VARIANT_BATTERY => self.stage_battery(&src, label)?,
            other => return Err(AggregateError::UnsupportedVariant(char::from(other))),
        };

        self.snapshot = staged.snapshot;
        self.history.extend(&staged.historic);
        if staged.fix.is_some() {
            self.last_fix = staged.fix;
        }

        Ok(Update {
            variant: packet.variant,
            timestamp: now,
            historic: staged.historic,
            row: staged.row,
        })
    }

    fn stage_motor(&self, src: &Source<'_>, label: String) -> Result<Staged, AggregateError> {
        let mut next = self.snapshot.clone();
        let mut row = src.fields.clone();

        next.motor_velocity = src.reading("Motor_Velocity")?;
        next.speed = src.reading("Speed")?;
        next.heatsink_temp = src.reading("HeatSink_Temp")?;
        next.motor_temp = src.reading("Motor_Temp")?;
        next.phase_a_current = src.reading("PhaseA_Current")?;
        next.phase_b_current = src.reading("PhaseB_Current")?;
        next.phase_c_current = src.reading("PhaseC_Current")?;
        next.bus_voltage = src.reading("Bus_Voltage")?;
        next.bus_current = src.reading("Bus_Current")?;
        next.dsp_board_temp = src.reading("DSP_Board_Temp")?;
        next.throttle_perc = src.reading("Throttle_Perc")?;
        next.latitude = src.reading("Latitude")?;
        next.longitude = src.reading("Longitude")?;
        next.altitude = src.reading("Altitude")?;
        next.acceleration = src.reading("Acceleration")?;

        let mut solar_output = 0.0;
        let mut array_power = 0.0;
        let mut input_voltage_sum = 0.0;
        for (mppt, channel) in next.mppts.iter_mut().zip(MPPT_CHANNELS) {
            let vin = src.number(&format!("Input_Voltage_{channel}"))?;
            let iin = src.number(&format!("Input_Current_{channel}"))?;
            let vout = src.number(&format!("Output_Voltage_{channel}"))?;
            let iout = src.number(&format!("Output_Current_{channel}"))?;

            let input_power = vin * iin;
            let output_power = vout * iout;
            let efficiency = (output_power / input_power.max(EFFICIENCY_EPSILON)).max(0.0);

            mppt.input_voltage = Reading(vin);
            mppt.input_current = Reading(iin);
            mppt.output_voltage = Reading(vout);
            mppt.output_current = Reading(iout);
            mppt.output_power = Reading(output_power);
            mppt.efficiency = Reading(efficiency);
            mppt.mosfet_temperature = src.reading(&format!("Mosfet_Temperature_{channel}"))?;
            mppt.mppt_temperature = src.reading(&format!("MPPT_Temperature_{channel}"))?;

            row.insert(format!("Power_{channel}"), output_power);
            solar_output += output_power;
            array_power += input_power;
            input_voltage_sum += vin;
        }

        let bus_power = next.bus_voltage.get() * next.bus_current.get();
        next.bus_power = Reading(bus_power);
        next.power_consumption = Reading(bus_power);
        next.solar_input = Reading(solar_output);
        row.insert("Solar_Power", solar_output);
        row.insert("Bus_Power", bus_power);

        let fix = (next.latitude.get(), next.longitude.get());
        let fix = (fix.0.is_finite() && fix.1.is_finite()).then_some(fix);
        if let (Some(previous), Some(current)) = (self.last_fix, fix) {
            next.distance_travelled = Reading(next.distance_travelled.get() + haversine_km(previous, current));
        }

        let mut historic = HistoryPoint::default();
        historic.insert("Timestamps", label);
        historic.insert("Speed", next.speed);
        historic.insert("Power", next.power_consumption);
        historic.insert("Solar", array_power);
        historic.insert("Bus_Power", next.bus_power);
        historic.insert("Motor_Velocity", next.motor_velocity);
        historic.insert("PhaseA_Current", next.phase_a_current);
        historic.insert(
            "solar_input_voltage",
            input_voltage_sum / MPPT_CHANNELS.len() as f64,
        );
        historic.insert("solar_output_power", solar_output);
        historic.insert("Acceleration", next.acceleration);
        historic.insert("Altitude", next.altitude);
        historic.insert("Latitudes", next.latitude);
        historic.insert("Longitudes", next.longitude);

        Ok(Staged {
            snapshot: next,
            historic,
            row,
            fix,
        })
    }

    fn stage_battery(&self, src: &Source<'_>, label: String) -> Result<Staged, AggregateError> {
        let mut next = self.snapshot.clone();

        next.pack_voltage = src.reading("Pack_Voltage")?;
        next.pack_current = src.reading("Pack_Current")?;
        next.soc_ah = src.reading("SOC_Ah")?;
        next.precharge_state = src.reading("precharge_state")?;

        for (index, cmu) in next.cmus.iter_mut().enumerate().take(CMU_COUNT) {
            let unit = index + 1;
            cmu.temperature = src.reading(&format!("CMU{unit}_Temperature"))?;
            cmu.cell_temperature = src.reading(&format!("CMU{unit}_Cell_Temperature"))?;
            for (cell, voltage) in cmu.cell_voltages.iter_mut().enumerate().take(CELLS_PER_CMU) {
                *voltage = src.reading(&format!("CMU{unit}_Cell{}_Voltage", cell + 1))?;
            }
        }
        next.battery_ranges = battery_ranges(&next);

        let cabin = &mut next.cabin_sensors;
        cabin.co = src.reading("Cabin_CO_Content")?;
        cabin.ch4 = src.reading("Cabin_CH4_Content")?;
        cabin.nh3 = src.reading("Cabin_NH3_Content")?;
        cabin.no2 = src.reading("Cabin_NO2_Content")?;
        cabin.o2 = src.reading("Cabin_O2_Content")?;
        cabin.temperature = src.reading("Cabin_Temperature")?;
        cabin.pressure = src.reading("Cabin_Pressure")?;
        cabin.co2 = src.reading("Cabin_CO2_Content")?;

        next.bms_flags = src.flag_group(&BMS_FLAGS, "")?;
        next.contactor_flags = src.flag_group(&CONTACTOR_FLAGS, "")?;
        next.motor_limits = src.flag_group(&MOTOR_LIMIT_FLAGS, "")?;
        next.motor_errors = src.flag_group(&MOTOR_ERROR_FLAGS, "")?;
        for (mppt, channel) in next.mppts.iter_mut().zip(MPPT_CHANNELS) {
            mppt.flags = src.flag_group(&MPPT_FLAGS, &format!("mppt_{channel}_"))?;
        }

        let mut historic = HistoryPoint::default();
        historic.insert("Battery_Timestamps", label);
        historic.insert("Battery", next.soc_ah);
        historic.insert("Pack_Voltage", next.pack_voltage);
        historic.insert("Pack_Current", next.pack_current);

        Ok(Staged {
            snapshot: next,
            historic,
            row: src.fields.clone(),
            fix: None,
        })
    }
}

/// Borrowed view of a packet's fields that reports missing ones.
struct Source<'a> {
    variant: char,
    fields: &'a Fields,
}

impl Source<'_> {
    fn value(&self, name: &str) -> Result<FieldValue, AggregateError> {
        self.fields
            .get(name)
            .ok_or_else(|| AggregateError::MissingField {
                variant: self.variant,
                field: name.to_string(),
            })
    }

    fn number(&self, name: &str) -> Result<f64, AggregateError> {
        self.value(name).map(FieldValue::as_f64)
    }

    fn reading(&self, name: &str) -> Result<Reading, AggregateError> {
        self.number(name).map(Reading)
    }

    /// Collect `prefix + name` flags into a group keyed by the bare name.
    fn flag_group(&self, names: &[&str], prefix: &str) -> Result<FlagGroup, AggregateError> {
        names
            .iter()
            .map(|name| {
                let value = self.value(&format!("{prefix}{name}"))?;
                Ok((name.to_string(), value.as_bool()))
            })
            .collect()
    }
}

fn battery_ranges(snapshot: &Snapshot) -> BatteryRanges {
    let temps = snapshot.cmus.iter().map(|cmu| cmu.temperature.get());
    let volts = snapshot
        .cmus
        .iter()
        .flat_map(|cmu| cmu.cell_voltages.iter().map(|v| v.get()));

    let (min_temp, max_temp) = min_max(temps);
    let (min_volt, max_volt) = min_max(volts);
    BatteryRanges {
        min_temp: Reading(min_temp),
        max_temp: Reading(max_temp),
        min_volt: Reading(min_volt),
        max_volt: Reading(max_volt),
    }
}

fn min_max(values: impl Iterator<Item = f64>) -> (f64, f64) {
    let (min, max) = values.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
        (lo.min(v), hi.max(v))
    });
    if min > max {
        (0.0, 0.0)
    } else {
        (min, max)
    }
}

/// Great-circle distance between two `(latitude, longitude)` fixes in
/// degrees.
pub fn haversine_km(from: (f64, f64), to: (f64, f64)) -> f64 {
    let (lat1, lon1) = (from.0.to_radians(), from.1.to_radians());
    let (lat2, lon2) = (to.0.to_radians(), to.1.to_radians());
    let dlat = lat2 - lat1;
    let dlon = lon2 - lon1;

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * h.clamp(0.0, 1.0).sqrt().asin()
}
