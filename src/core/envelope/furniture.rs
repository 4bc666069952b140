/// Furniture and contents of a room as a single first-order thermal lump, optionally holding
/// phase-change material.
use crate::core::envelope::pcm::{PcmMaterial, PCM_RETRIGGER_TEMPERATURE_DELTA};
use std::sync::Arc;
use tracing::{trace, warn};

/// PCM mixed into the furniture lump.
#[derive(Clone, Debug)]
pub struct FurniturePcm {
    pub material: Arc<PcmMaterial>,
    /// in m3
    pub volume: f64,
}

#[derive(Clone, Debug)]
pub struct Furniture {
    /// sensible heat capacity excluding any PCM, in J / K
    capacity: f64,
    /// conductance between the lump and room air, in W / K
    conductance: f64,
    /// share of the room's transmitted solar absorbed by the furniture
    solar_fraction: f64,
    /// moisture capacity, in kg (air-equivalent mass for the humidity balance)
    moisture_capacity: f64,
    pcm: Option<FurniturePcm>,
    temp_prev: f64,
    temp_trial: f64,
    /// temperature at which the PCM capacity is evaluated
    temp_anchor: f64,
    converged: bool,
}

impl Furniture {
    pub fn new(
        capacity: f64,
        conductance: f64,
        solar_fraction: f64,
        moisture_capacity: f64,
        pcm: Option<FurniturePcm>,
        temp_initial: f64,
    ) -> Self {
        Self {
            capacity,
            conductance,
            solar_fraction,
            moisture_capacity,
            pcm,
            temp_prev: temp_initial,
            temp_trial: temp_initial,
            temp_anchor: temp_initial,
            converged: true,
        }
    }

    pub fn solar_fraction(&self) -> f64 {
        self.solar_fraction
    }

    pub fn moisture_capacity(&self) -> f64 {
        self.moisture_capacity
    }

    pub fn temperature(&self) -> f64 {
        self.temp_prev
    }

    pub fn trial_temperature(&self) -> f64 {
        self.temp_trial
    }

    pub fn anchor_temperature(&self) -> f64 {
        self.temp_anchor
    }

    pub fn is_converged(&self) -> bool {
        self.converged
    }

    fn pcm_capacity_at(&self, temp: f64) -> f64 {
        self.pcm
            .as_ref()
            .map_or(0., |pcm| pcm.volume * pcm.material.apparent_capacity(temp))
    }

    /// Total heat capacity with the PCM evaluated at the anchor temperature, in J / K
    pub fn effective_capacity(&self) -> f64 {
        self.capacity + self.pcm_capacity_at(self.temp_anchor)
    }

    /// Contribution of the lump to the room sensible balance, as the coefficient on the air
    /// temperature and the constant term.
    ///
    /// * `solar` - solar absorbed by the furniture this step, in W
    /// * `delta_t` - timestep, in seconds
    pub(crate) fn air_coefficients(&self, solar: f64, delta_t: f64) -> (f64, f64) {
        let storage = self.effective_capacity() / delta_t;
        let denominator = storage + self.conductance;
        if denominator <= 0. {
            return (0., 0.);
        }
        (
            self.conductance * storage / denominator,
            self.conductance * (storage * self.temp_prev + solar) / denominator,
        )
    }

    /// Trial lump temperature for a given air temperature, in deg C
    pub(crate) fn solve_provisional(&mut self, temp_air: f64, solar: f64, delta_t: f64) -> f64 {
        let storage = self.effective_capacity() / delta_t;
        let denominator = storage + self.conductance;
        self.temp_trial = if denominator > 0. {
            (storage * self.temp_prev + self.conductance * temp_air + solar) / denominator
        } else {
            temp_air
        };
        self.temp_trial
    }

    /// Compare the PCM capacity at the trial temperature with the one in use. On a reset the
    /// anchor is relaxed towards the trial temperature. Returns true if a reset is needed.
    pub(crate) fn check_pcm(&mut self) -> bool {
        let Some(pcm) = &self.pcm else {
            return false;
        };
        let material = &pcm.material;
        if !material.iterate {
            self.converged = true;
            return false;
        }

        let capacity_used = material.apparent_capacity(self.temp_anchor);
        let capacity_trial = material.apparent_capacity(self.temp_trial);
        let capacity_moved = (capacity_trial - capacity_used).abs()
            > material.convergence_tolerance * capacity_used.abs();
        let temperature_moved = material.retriggers(self.temp_prev)
            && (self.temp_trial - self.temp_anchor).abs() > PCM_RETRIGGER_TEMPERATURE_DELTA;

        self.converged = !(capacity_moved || temperature_moved);
        if self.converged {
            return false;
        }

        let weight = material.effective_relaxation_weight();
        self.temp_anchor += weight * (self.temp_trial - self.temp_anchor);
        trace!(
            "Furniture PCM reset; anchor relaxed to {:.4} deg C",
            self.temp_anchor
        );
        true
    }

    pub(crate) fn commit(&mut self) {
        if let Some(pcm) = &self.pcm {
            if !pcm.material.iterate
                && pcm.material.crosses_phase_span(self.temp_prev, self.temp_trial)
            {
                warn!(
                    "PCM '{}' in furniture crossed its whole phase span in one step without iteration",
                    pcm.material.name
                );
            }
        }
        self.temp_prev = self.temp_trial;
        self.temp_anchor = self.temp_trial;
        self.converged = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rstest::*;

    const DELTA_T: f64 = 3600.;

    #[fixture]
    fn plain() -> Furniture {
        Furniture::new(3.6e5, 50., 0.1, 0., None, 20.)
    }

    #[rstest]
    fn test_air_coefficients_match_lump_balance(mut plain: Furniture) {
        let solar = 30.;
        let (coefficient, constant) = plain.air_coefficients(solar, DELTA_T);

        // storage 100 W/K, conductance 50 W/K
        assert_relative_eq!(coefficient, 50. * 100. / 150.);
        assert_relative_eq!(constant, 50. * (100. * 20. + 30.) / 150.);

        let temp_air = 26.;
        let temp_lump = plain.solve_provisional(temp_air, solar, DELTA_T);
        assert_relative_eq!(
            50. * (temp_air - temp_lump),
            coefficient * temp_air - constant,
            max_relative = 1e-12
        );
    }

    #[rstest]
    fn test_massless_furniture_passes_solar_to_air() {
        let furniture = Furniture::new(0., 20., 0.2, 0., None, 20.);
        let (coefficient, constant) = furniture.air_coefficients(100., DELTA_T);
        assert_relative_eq!(coefficient, 0.);
        assert_relative_eq!(constant, 100.);
    }

    #[rstest]
    fn test_pcm_reset_inside_phase_window() {
        let mut material = PcmMaterial::paraffin_wax_28();
        // only the phase-window condition can trigger the temperature check
        material.temperature_retrigger = false;
        material.relaxation_weight = Some(0.4);
        material.convergence_tolerance = 10.;
        let mut furniture = Furniture::new(
            2e5,
            40.,
            0.,
            0.,
            Some(FurniturePcm {
                material: Arc::new(material),
                volume: 0.01,
            }),
            27.,
        );

        let trial = furniture.solve_provisional(28., 0., DELTA_T);
        assert!((trial - 27.).abs() > PCM_RETRIGGER_TEMPERATURE_DELTA);

        let mut resets = 0;
        if furniture.check_pcm() {
            resets += 1;
        }

        assert_eq!(resets, 1);
        assert!(!furniture.is_converged());
        assert_relative_eq!(furniture.anchor_temperature(), 27. + 0.4 * (trial - 27.));
        assert_relative_eq!(furniture.temperature(), 27.);
    }

    #[rstest]
    fn test_pcm_outside_window_without_retrigger_does_not_reset() {
        let mut material = PcmMaterial::paraffin_wax_28();
        material.temperature_retrigger = false;
        let mut furniture = Furniture::new(
            2e5,
            40.,
            0.,
            0.,
            Some(FurniturePcm {
                material: Arc::new(material),
                volume: 0.01,
            }),
            15.,
        );

        furniture.solve_provisional(16., 0., DELTA_T);
        assert!(!furniture.check_pcm());
        furniture.commit();
        assert_relative_eq!(furniture.temperature(), furniture.trial_temperature());
    }
}
