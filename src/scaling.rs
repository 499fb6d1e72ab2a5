//! Conversions between raw converter codes and physical units
//!
//! # Copyright
//! Copyright (C) 2020 QUARTIQ GmbH - All Rights Reserved
//! Unauthorized usage, editing, or copying is strictly prohibited.
//! Proprietary and confidential.
use num_traits::Float;

use crate::{linear_transformation::LinearTransformation, Error};

/// The number of codes of the 16-bit monitor ADCs.
pub const ADC_RANGE: f32 = 65536.0;

/// The lowest voltage covered by the cartridge temperature calibration curve.
pub const CALIBRATION_MIN_VOLTAGE: f32 = 0.090681;

/// Standard cartridge temperature sensor curve as `(kelvin, volts)` pairs.
///
/// # Note
/// Voltages above the first row are rejected by the search.
static CALIBRATION_CURVE: [(f32, f32); 186] = [
    (1.200, 1.64654), (1.400, 1.64429), (1.500, 1.64299), (1.600, 1.64157),
    (1.700, 1.64003), (1.800, 1.63837), (1.900, 1.63660), (2.000, 1.63472),
    (2.100, 1.63274), (2.200, 1.63067), (2.300, 1.62852), (2.400, 1.62629),
    (2.500, 1.62400), (2.600, 1.62166), (2.700, 1.61928), (2.800, 1.61687),
    (2.900, 1.61445), (3.000, 1.61200), (3.100, 1.60951), (3.200, 1.60697),
    (3.300, 1.60438), (3.400, 1.60173), (3.500, 1.59902), (3.600, 1.59626),
    (3.700, 1.59344), (3.800, 1.59057), (3.900, 1.58764), (4.000, 1.58465),
    (4.200, 1.57848), (4.400, 1.57202), (4.600, 1.56533), (4.800, 1.55845),
    (5.000, 1.55145), (5.200, 1.54436), (5.400, 1.53721), (5.600, 1.53000),
    (5.800, 1.52273), (6.000, 1.51541), (6.500, 1.49698), (7.000, 1.47868),
    (7.500, 1.46086), (8.000, 1.44374), (8.500, 1.42747), (9.000, 1.41207),
    (9.500, 1.39751), (10.000, 1.3837), (10.500, 1.37065),
    (11.000, 1.35820), (11.500, 1.34632), (12.000, 1.33499), (12.500, 1.32416),
    (13.000, 1.31381), (13.500, 1.30390), (14.000, 1.29439), (14.500, 1.28526),
    (15.000, 1.27645), (15.500, 1.26794), (16.000, 1.25967), (16.500, 1.25161),
    (17.000, 1.24372), (17.500, 1.23596), (18.000, 1.22830), (18.500, 1.22070),
    (19.000, 1.21311), (19.500, 1.20548), (20.000, 1.197748), (21.000, 1.181548),
    (22.000, 1.162797), (23.000, 1.140817), (24.000, 1.125923), (25.000, 1.119448),
    (26.000, 1.115658), (27.000, 1.112810), (28.000, 1.110421), (29.000, 1.108261),
    (30.000, 1.106244), (31.000, 1.104324), (32.000, 1.102476), (33.000, 1.100681),
    (34.000, 1.098930), (35.000, 1.097216), (36.000, 1.095534), (37.000, 1.093878),
    (38.000, 1.092244), (39.000, 1.090627), (40.000, 1.089024), (42.000, 1.085842),
    (44.000, 1.082669), (46.000, 1.079492), (48.000, 1.076303), (50.000, 1.073099),
    (52.000, 1.069881), (54.000, 1.066650), (56.000, 1.063403), (58.000, 1.060141),
    (60.000, 1.056862), (65.000, 1.048584), (70.000, 1.040183), (75.000, 1.031651),
    (77.350, 1.027594), (80.000, 1.022984), (85.000, 1.014181), (90.000, 1.005244),
    (95.000, 0.996174), (100.000, 0.986974), (105.000, 0.977650), (110.000, 0.968209),
    (115.000, 0.958657), (120.000, 0.949000), (125.000, 0.939242), (130.000, 0.929390),
    (135.000, 0.919446), (140.000, 0.909416), (145.000, 0.899304), (150.000, 0.889114),
    (155.000, 0.878851), (160.000, 0.868518), (165.000, 0.858120), (170.000, 0.847659),
    (175.000, 0.837138), (180.000, 0.826560), (185.000, 0.815928), (190.000, 0.805242),
    (195.000, 0.794505), (200.000, 0.783720), (205.000, 0.772886), (210.000, 0.762007),
    (215.000, 0.751082), (220.000, 0.740115), (225.000, 0.729105), (230.000, 0.718054),
    (235.000, 0.706964), (240.000, 0.695834), (245.000, 0.684667), (250.000, 0.673462),
    (255.000, 0.662223), (260.000, 0.650949), (265.000, 0.639641), (270.000, 0.628302),
    (273.150, 0.621141), (275.000, 0.616930), (280.000, 0.605528), (285.000, 0.594097),
    (290.000, 0.582637), (295.000, 0.571151), (300.000, 0.559639), (305.000, 0.548102),
    (310.000, 0.536542), (315.000, 0.524961), (320.000, 0.513361), (325.000, 0.501744),
    (330.000, 0.490106), (335.000, 0.478442), (340.000, 0.466760), (345.000, 0.455067),
    (350.000, 0.443371), (355.000, 0.431670), (360.000, 0.419960), (365.000, 0.408237),
    (370.000, 0.396503), (375.000, 0.384757), (380.000, 0.373002), (385.000, 0.361235),
    (390.000, 0.349453), (395.000, 0.337654), (400.000, 0.325839), (405.000, 0.314008),
    (410.000, 0.302161), (415.000, 0.290298), (420.000, 0.278416), (425.000, 0.266514),
    (430.000, 0.254592), (435.000, 0.242653), (440.000, 0.230697), (445.000, 0.218730),
    (450.000, 0.206758), (455.000, 0.194789), (460.000, 0.182832), (465.000, 0.170901),
    (470.000, 0.159010), (475.000, 0.147191), (480.000, 0.135480), (485.000, 0.123915),
    (490.000, 0.112553), (495.000, 0.101454), (500.000, 0.090681),
];

/// Laser pump temperature polynomial coefficients, lowest order first.
const PUMP_TEMPERATURE_COEFFICIENTS: [f32; 7] =
    [366.86, -175.09, 216.53, -175.61, 85.865, -22.96, 2.5741];

/// Thermistor B parameter of the IF switch temperature sensors.
const THERMISTOR_BETA: f32 = 3380.0;
/// Thermistor reference temperature in kelvin.
const THERMISTOR_T0: f32 = 298.15;
/// Thermistor resistance at the reference temperature.
const THERMISTOR_R0: f32 = 10000.0;
const KELVIN_OFFSET: f32 = 273.15;

/// Full-scale input voltage of the cryostat ADC.
const CRYO_ADC_VOLTAGE_SCALE: f32 = 10.0;
/// Sensor resistance per volt of the TVO readout.
const TVO_GAIN: f32 = 454.545454;
const TVO_RESISTOR_SCALE: f32 = 1000.0;
/// Sensor resistance per volt of the PRT readout.
const PRT_GAIN: f32 = 125.0;
/// Resistance splitting the two PRT fits.
const PRT_SPLIT: f32 = 124.0;
const PRT_LOW_COEFFICIENTS: [f32; 7] = [
    0.513971, 276.222931, -1038.573479, 2460.959311, -3243.304766, 2211.327698, -607.247388,
];
const PRT_HIGH_SCALE: f32 = 1000.0;
const PRT_HIGH_COEFFICIENTS: [f32; 7] = [
    28.486734, 278.396620, -260.205006, 687.754698, -891.652830, 583.158140, -152.808821,
];
const SUPPLY_CURRENT_SCALE: f32 = 1.488645855;
const CRYOSTAT_PRESSURE_OFFSET: f32 = -7.75;
const CRYOSTAT_PRESSURE_SCALE: f32 = 0.75;
const VACUUM_PORT_PRESSURE_OFFSET: f32 = -6.143;
const VACUUM_PORT_PRESSURE_SCALE: f32 = 1.286;

/// Scale a raw 16-bit ADC code.
///
/// # Args
/// * `raw` - The ADC code.
/// * `scale` - The physical value corresponding to the full ADC range.
pub fn adc(raw: u16, scale: f32) -> f32 {
    LinearTransformation::full_scale(scale, ADC_RANGE, 0.0).physical(raw as f32)
}

/// Scale a two's complement 16-bit ADC code of a bipolar converter.
pub fn bipolar_adc(raw: u16, scale: f32) -> f32 {
    LinearTransformation::full_scale(scale, ADC_RANGE, 0.0).physical(raw as i16 as f32)
}

/// Convert a cartridge temperature sensor voltage into kelvin.
///
/// # Note
/// The curve is searched for the last row whose voltage is not below the measured one and
/// the temperature is linearly interpolated towards the following row.
///
/// # Args
/// * `voltage` - The measured sensor voltage.
///
/// # Returns
/// The temperature, or [Error::Conversion] if the voltage is outside the curve.
pub fn cartridge_temperature(voltage: f32) -> Result<f32, Error> {
    if voltage.is_nan() || voltage < CALIBRATION_MIN_VOLTAGE {
        return Err(Error::Conversion);
    }

    // The curve is monotonically decreasing in voltage.
    let count = CALIBRATION_CURVE.partition_point(|&(_, volt)| volt >= voltage);
    if count == 0 {
        return Err(Error::Conversion);
    }

    let (temp, volt) = CALIBRATION_CURVE[count - 1];
    if volt == voltage {
        return Ok(temp);
    }

    let (next_temp, next_volt) = CALIBRATION_CURVE
        .get(count)
        .copied()
        .ok_or(Error::Conversion)?;
    let slope = (next_temp - temp) / (next_volt - volt);

    Ok(temp + slope * (voltage - volt))
}

/// Convert an LPR laser pump temperature ADC code into degrees.
pub fn pump_temperature(raw: u16) -> Result<f32, Error> {
    let voltage = adc(raw, 5.0);
    let temperature = PUMP_TEMPERATURE_COEFFICIENTS
        .iter()
        .enumerate()
        .map(|(order, coefficient)| coefficient * Float::powi(voltage, order as i32))
        .sum::<f32>();

    finite(temperature)
}

/// Convert a thermistor resistance to degrees Celsius with the B-parameter equation.
pub fn thermistor_temperature(resistance: f32) -> Result<f32, Error> {
    let kelvin = THERMISTOR_BETA * THERMISTOR_T0
        / (THERMISTOR_T0 * Float::ln(resistance / THERMISTOR_R0) + THERMISTOR_BETA);

    finite(kelvin - KELVIN_OFFSET)
}

/// The input voltage of a cryostat ADC code.
pub fn cryo_voltage(raw: u16) -> f32 {
    adc(raw, CRYO_ADC_VOLTAGE_SCALE)
}

/// Evaluate a polynomial, lowest order first.
fn polynomial(coefficients: &[f32], x: f32) -> f32 {
    coefficients
        .iter()
        .enumerate()
        .map(|(order, coefficient)| coefficient * Float::powi(x, order as i32))
        .sum()
}

/// Convert a TVO sensor voltage into kelvin with the sensor's calibration polynomial.
///
/// # Args
/// * `voltage` - The readout voltage.
/// * `coefficients` - The polynomial in the inverse resistance, lowest order first.
pub fn tvo_temperature(voltage: f32, coefficients: &[f32]) -> Result<f32, Error> {
    let resistance = TVO_GAIN * voltage;
    finite(polynomial(coefficients, TVO_RESISTOR_SCALE / resistance))
}

/// Convert a PRT sensor voltage into kelvin.
pub fn prt_temperature(voltage: f32) -> Result<f32, Error> {
    let resistance = PRT_GAIN * voltage;
    let temperature = if resistance >= PRT_SPLIT {
        polynomial(&PRT_HIGH_COEFFICIENTS, resistance / PRT_HIGH_SCALE)
    } else {
        polynomial(&PRT_LOW_COEFFICIENTS, resistance / PRT_SPLIT)
    };

    finite(temperature)
}

/// Convert the cryostat vacuum gauge voltage into mbar.
pub fn cryostat_pressure(voltage: f32) -> Result<f32, Error> {
    finite(Float::powf(
        10.0,
        (voltage + CRYOSTAT_PRESSURE_OFFSET) / CRYOSTAT_PRESSURE_SCALE,
    ))
}

/// Convert the vacuum port gauge voltage into mbar.
pub fn vacuum_port_pressure(voltage: f32) -> Result<f32, Error> {
    finite(Float::powf(
        10.0,
        (voltage + VACUUM_PORT_PRESSURE_OFFSET) / VACUUM_PORT_PRESSURE_SCALE,
    ))
}

/// Convert the 230 V supply current monitor voltage into amperes.
pub fn supply_current(voltage: f32) -> f32 {
    SUPPLY_CURRENT_SCALE * voltage
}

/// Potentiometer setting of a gate voltage for the LO PA and AMC gate bias networks.
pub fn gate_pot(voltage: f32) -> u8 {
    let setting = if voltage == 0.15 {
        0.0
    } else {
        127.5 * (20.0 * voltage + 17.0 - 5.0 * Float::sqrt(80.0 * voltage * voltage + 8.0 * voltage + 13.0))
            / (20.0 * voltage - 3.0)
    };

    (0.5 + setting) as u8
}

/// Potentiometer setting of a drain voltage.
///
/// # Args
/// * `voltage` - The commanded voltage.
/// * `scale` - The pot counts per volt.
pub fn drain_pot(voltage: f32, scale: f32) -> u8 {
    (scale * voltage) as u8
}

fn finite(value: f32) -> Result<f32, Error> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(Error::Conversion)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn temperature_below_curve_is_rejected() {
        assert_eq!(cartridge_temperature(0.09), Err(Error::Conversion));
        assert_eq!(cartridge_temperature(0.0), Err(Error::Conversion));
    }

    #[test]
    fn temperature_above_curve_is_rejected() {
        assert_eq!(cartridge_temperature(1.7), Err(Error::Conversion));
    }

    #[test]
    fn tabulated_voltage_is_exact() {
        assert_eq!(cartridge_temperature(1.119448), Ok(25.0));
        assert_eq!(cartridge_temperature(0.559639), Ok(300.0));
        assert_eq!(cartridge_temperature(0.090681), Ok(500.0));
        assert_eq!(cartridge_temperature(1.64654), Ok(1.2));
    }

    #[test]
    fn curve_starts_at_lowest_calibration() {
        assert_eq!(CALIBRATION_CURVE[0], (1.2, 1.64654));
        assert_eq!(cartridge_temperature(1.6466), Err(Error::Conversion));

        // Just below the first row interpolates towards the 1.4K row.
        let temperature = cartridge_temperature(1.6454).unwrap();
        assert!(temperature > 1.2 && temperature < 1.4);
    }

    #[test]
    fn temperature_is_interpolated() {
        let temperature = cartridge_temperature(0.56).unwrap();
        assert!(temperature > 295.0 && temperature < 300.0);

        // Midway between the 4.0K and 4.2K rows.
        let midpoint = (1.58465 + 1.57848) / 2.0;
        assert_abs_diff_eq!(cartridge_temperature(midpoint).unwrap(), 4.1, epsilon = 1e-3);
    }

    #[test]
    fn curve_is_monotonic() {
        assert!(CALIBRATION_CURVE
            .windows(2)
            .all(|pair| pair[0].1 >= pair[1].1 && pair[0].0 < pair[1].0));
    }

    #[test]
    fn pump_temperature_at_zero() {
        assert_abs_diff_eq!(pump_temperature(0).unwrap(), 366.86, epsilon = 1e-3);
    }

    #[test]
    fn thermistor_reference_point() {
        assert_abs_diff_eq!(thermistor_temperature(10000.0).unwrap(), 25.0, epsilon = 1e-3);
        assert_eq!(thermistor_temperature(-1.0), Err(Error::Conversion));
    }

    #[test]
    fn bipolar_codes_are_signed() {
        assert_abs_diff_eq!(bipolar_adc(0x8000, 50.0), -25.0);
        assert_abs_diff_eq!(bipolar_adc(0x4000, 50.0), 12.5);
        assert_abs_diff_eq!(adc(0x8000, 50.0), 25.0);
    }

    #[test]
    fn pot_settings() {
        assert_eq!(gate_pot(0.15), 0);
        assert_eq!(drain_pot(2.5, 102.0), 255);
        assert_eq!(drain_pot(0.0, 102.0), 0);
        assert_eq!(drain_pot(-1.0, 102.0), 0);
    }

    #[test]
    fn cryostat_sensors() {
        assert_abs_diff_eq!(cryo_voltage(32768), 5.0);

        // A flat calibration reads its constant term, the first order term scales with 1/R.
        assert_abs_diff_eq!(tvo_temperature(1.0, &[4.2, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]).unwrap(), 4.2);
        assert_abs_diff_eq!(
            tvo_temperature(2.2, &[0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 0.0]).unwrap(),
            1.0,
            epsilon = 1e-5
        );
        assert_eq!(tvo_temperature(0.0, &[0.0, 1.0]), Err(Error::Conversion));

        // 100 ohm and 1000 ohm on the two PRT fits.
        assert_abs_diff_eq!(
            prt_temperature(0.8).unwrap(),
            polynomial(&PRT_LOW_COEFFICIENTS, 100.0 / 124.0),
            epsilon = 1e-3
        );
        assert_abs_diff_eq!(prt_temperature(8.0).unwrap(), 273.1295, epsilon = 1e-2);

        assert_abs_diff_eq!(cryostat_pressure(7.75).unwrap(), 1.0, epsilon = 1e-5);
        assert_abs_diff_eq!(cryostat_pressure(6.25).unwrap(), 0.01, epsilon = 1e-6);
        assert_abs_diff_eq!(vacuum_port_pressure(6.143).unwrap(), 1.0, epsilon = 1e-5);
        assert_abs_diff_eq!(supply_current(2.0), 2.97729171, epsilon = 1e-5);
    }
}
