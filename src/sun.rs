//! Solar-position daylight oracle.

use std::f64::consts::PI;

use chrono::{DateTime, Datelike, Timelike, Utc};

use crate::plan::Location;
use crate::traits::DaylightOracle;

/// Decides daylight from the sun's elevation at a fixed location.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolarDaylight {
    location: Location,
}

impl SolarDaylight {
    /// Create an oracle for `location`.
    pub const fn new(location: Location) -> Self {
        Self { location }
    }

    /// Solar elevation above the horizon at `at`, in degrees.
    ///
    /// Uses the NOAA general solar position approximation, which is good to
    /// well under a degree; plenty for gating on twilight.
    pub fn elevation(&self, at: DateTime<Utc>) -> f64 {
        let day_of_year = f64::from(at.ordinal());
        let hour = f64::from(at.hour());
        let minutes = hour.mul_add(60.0, f64::from(at.minute())) + f64::from(at.second()) / 60.0;
        let year = at.year();
        let leap = (year % 4 == 0 && year % 100 != 0) || year % 400 == 0;
        let days_in_year = if leap { 366.0 } else { 365.0 };

        // fractional year, radians
        let gamma = 2.0 * PI / days_in_year * (day_of_year - 1.0 + (hour - 12.0) / 24.0);

        let eq_time = 229.18
            * (0.000_075 + 0.001_868 * gamma.cos()
                - 0.032_077 * gamma.sin()
                - 0.014_615 * (2.0 * gamma).cos()
                - 0.040_849 * (2.0 * gamma).sin());

        let declination = 0.006_918 - 0.399_912 * gamma.cos() + 0.070_257 * gamma.sin()
            - 0.006_758 * (2.0 * gamma).cos()
            + 0.000_907 * (2.0 * gamma).sin()
            - 0.002_697 * (3.0 * gamma).cos()
            + 0.001_48 * (3.0 * gamma).sin();

        let true_solar_minutes = minutes + eq_time + 4.0 * self.location.longitude;
        let hour_angle = (true_solar_minutes / 4.0 - 180.0).to_radians();

        let latitude = self.location.latitude.to_radians();
        let cos_zenith = (latitude.sin() * declination.sin()
            + latitude.cos() * declination.cos() * hour_angle.cos())
        .clamp(-1.0, 1.0);

        90.0 - cos_zenith.acos().to_degrees()
    }
}

impl DaylightOracle for SolarDaylight {
    fn is_light(&self, at: DateTime<Utc>) -> bool {
        self.elevation(at) > self.location.twilight_degrees
    }
}
