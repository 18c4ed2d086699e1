use std::f64::consts::FRAC_PI_2;

/// Symmetric daytime curve fitted to the producing hours of a baseline.
///
/// Solar noon sits at the midpoint between the first and the last producing
/// hour; the curve is zero outside that span.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BellCurve {
    sunrise: f64,
    sunset: f64,
    peak_kwh: f64,
}

impl BellCurve {
    /// Fit to a 24-entry hourly baseline. `None` when nothing is produced.
    pub fn fit(baseline: &[f64; 24], peak_kwh: f64) -> Option<Self> {
        let first = baseline.iter().position(|v| *v > 0.0)?;
        let last = baseline.iter().rposition(|v| *v > 0.0)?;
        Some(Self {
            sunrise: first as f64,
            sunset: (last + 1) as f64,
            peak_kwh,
        })
    }

    fn solar_noon(&self) -> f64 {
        (self.sunrise + self.sunset) / 2.0
    }

    /// Curve value for the hour starting at `hour`, sampled at mid-hour.
    pub fn at(&self, hour: u32) -> f64 {
        let half_day = ((self.sunset - self.sunrise) / 2.0).max(0.005);
        let offset = (hour as f64 + 0.5 - self.solar_noon()).abs();
        if offset >= half_day {
            return 0.0;
        }
        (FRAC_PI_2 * offset / half_day).cos() * self.peak_kwh
    }
}
