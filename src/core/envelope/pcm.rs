/// Phase-change material properties and the per-sublayer state that tracks the apparent
/// properties used by the wall and furniture models.
use crate::statistics::np_interp;
use serde::Deserialize;
use smartstring::alias::String;
use std::sync::Arc;

/// Temperature movement (K) beyond which a PCM node with temperature retriggering enabled is
/// re-evaluated.
pub(crate) const PCM_RETRIGGER_TEMPERATURE_DELTA: f64 = 0.01;

fn default_convergence_tolerance() -> f64 {
    0.05
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct PcmTableRow {
    /// in deg C
    pub temperature: f64,
    /// apparent volumetric heat capacity, in J / (m3.K)
    pub capacity: f64,
    /// in W / (m.K)
    pub conductivity: f64,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(tag = "type", deny_unknown_fields)]
pub enum PcmPropertyModel {
    /// Linear solid/liquid blend plus a triangular latent peak
    #[default]
    ClosedForm,
    /// Temperature-indexed table, interpolated linearly and clamped at its ends
    Table { rows: Vec<PcmTableRow> },
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct PcmMaterial {
    pub name: String,
    /// in deg C
    pub temp_solidus: f64,
    /// in deg C
    pub temp_liquidus: f64,
    /// temperature of peak apparent heat capacity, in deg C
    pub temp_peak: f64,
    /// in J / m3
    pub latent_heat: f64,
    /// in J / (m3.K)
    pub capacity_solid: f64,
    /// in J / (m3.K)
    pub capacity_liquid: f64,
    /// in W / (m.K)
    pub conductivity_solid: f64,
    /// in W / (m.K)
    pub conductivity_liquid: f64,
    #[serde(default)]
    pub model: PcmPropertyModel,
    /// evaluate node capacities at the node-pair average temperature rather than at each node
    #[serde(default)]
    pub average_temperature: bool,
    /// take part in the convergence loop
    #[serde(default)]
    pub iterate: bool,
    /// also reset when a node moved by more than 0.01 K between trials
    #[serde(default)]
    pub temperature_retrigger: bool,
    /// relative change in apparent capacity that triggers a reset
    #[serde(default = "default_convergence_tolerance")]
    pub convergence_tolerance: f64,
    /// weight of the trial value when relaxing the history anchor; a plain average when absent
    #[serde(default)]
    pub relaxation_weight: Option<f64>,
}

impl PcmMaterial {
    pub(crate) fn validate(&self) -> Result<(), String> {
        if !(self.temp_solidus < self.temp_peak && self.temp_peak < self.temp_liquidus) {
            return Err("PCM temperatures must satisfy solidus < peak < liquidus".into());
        }
        if self.latent_heat < 0. {
            return Err("PCM latent heat must not be negative".into());
        }
        if self.capacity_solid <= 0. || self.capacity_liquid <= 0. {
            return Err("PCM solid and liquid heat capacities must be positive".into());
        }
        if self.conductivity_solid <= 0. || self.conductivity_liquid <= 0. {
            return Err("PCM solid and liquid conductivities must be positive".into());
        }
        if let Some(weight) = self.relaxation_weight {
            if !(weight > 0. && weight <= 1.) {
                return Err("PCM relaxation weight must be in (0, 1]".into());
            }
        }
        if let PcmPropertyModel::Table { rows } = &self.model {
            if rows.len() < 2 {
                return Err("PCM property table needs at least two rows".into());
            }
            if rows
                .windows(2)
                .any(|pair| pair[1].temperature <= pair[0].temperature)
            {
                return Err("PCM property table temperatures must be strictly increasing".into());
            }
        }

        Ok(())
    }

    pub fn is_within_phase_window(&self, temp: f64) -> bool {
        temp >= self.temp_solidus && temp <= self.temp_liquidus
    }

    /// Whether a trial temperature moving more than `PCM_RETRIGGER_TEMPERATURE_DELTA` from the
    /// anchor forces a reset: always with `temperature_retrigger`, otherwise only while the
    /// committed temperature lies in the phase window.
    pub(crate) fn retriggers(&self, temp_committed: f64) -> bool {
        self.temperature_retrigger || self.is_within_phase_window(temp_committed)
    }

    fn phase_span(&self) -> f64 {
        self.temp_liquidus - self.temp_solidus
    }

    /// Sensible heat capacity without the latent contribution, in J / (m3.K)
    pub fn baseline_capacity(&self, temp: f64) -> f64 {
        if temp <= self.temp_solidus {
            self.capacity_solid
        } else if temp >= self.temp_liquidus {
            self.capacity_liquid
        } else {
            let liquid_fraction = (temp - self.temp_solidus) / self.phase_span();
            self.capacity_solid + (self.capacity_liquid - self.capacity_solid) * liquid_fraction
        }
    }

    /// Apparent volumetric heat capacity including latent heat, in J / (m3.K)
    pub fn apparent_capacity(&self, temp: f64) -> f64 {
        match &self.model {
            PcmPropertyModel::ClosedForm => {
                if !self.is_within_phase_window(temp) {
                    return self.baseline_capacity(temp);
                }
                let peak_height = 2. * self.latent_heat / self.phase_span();
                let latent = if temp <= self.temp_peak {
                    peak_height * (temp - self.temp_solidus) / (self.temp_peak - self.temp_solidus)
                } else {
                    peak_height * (self.temp_liquidus - temp)
                        / (self.temp_liquidus - self.temp_peak)
                };
                self.baseline_capacity(temp) + latent
            }
            PcmPropertyModel::Table { rows } => {
                let (temps, capacities): (Vec<f64>, Vec<f64>) =
                    rows.iter().map(|row| (row.temperature, row.capacity)).unzip();
                np_interp(temp, &temps, &capacities)
            }
        }
    }

    /// in W / (m.K)
    pub fn conductivity(&self, temp: f64) -> f64 {
        match &self.model {
            PcmPropertyModel::ClosedForm => {
                if temp <= self.temp_solidus {
                    self.conductivity_solid
                } else if temp >= self.temp_liquidus {
                    self.conductivity_liquid
                } else {
                    let liquid_fraction = (temp - self.temp_solidus) / self.phase_span();
                    self.conductivity_solid
                        + (self.conductivity_liquid - self.conductivity_solid) * liquid_fraction
                }
            }
            PcmPropertyModel::Table { rows } => {
                let (temps, conductivities): (Vec<f64>, Vec<f64>) = rows
                    .iter()
                    .map(|row| (row.temperature, row.conductivity))
                    .unzip();
                np_interp(temp, &temps, &conductivities)
            }
        }
    }

    /// Whether moving from `temp_from` to `temp_to` passes straight through the whole
    /// solidus-liquidus window
    pub(crate) fn crosses_phase_span(&self, temp_from: f64, temp_to: f64) -> bool {
        (temp_from < self.temp_solidus && temp_to > self.temp_liquidus)
            || (temp_from > self.temp_liquidus && temp_to < self.temp_solidus)
    }

    /// Weight applied to the trial value when a reset relaxes the history anchor.
    pub(crate) fn effective_relaxation_weight(&self) -> f64 {
        self.relaxation_weight.unwrap_or(0.5)
    }

    pub(crate) fn paraffin_wax_28() -> Self {
        Self {
            name: "ParaffinWax28".into(),
            temp_solidus: 26.,
            temp_liquidus: 30.,
            temp_peak: 28.,
            latent_heat: 1.4e8,
            capacity_solid: 1.6e6,
            capacity_liquid: 1.76e6,
            conductivity_solid: 0.24,
            conductivity_liquid: 0.18,
            model: PcmPropertyModel::ClosedForm,
            average_temperature: false,
            iterate: true,
            temperature_retrigger: true,
            convergence_tolerance: default_convergence_tolerance(),
            relaxation_weight: None,
        }
    }

    pub(crate) fn salt_hydrate_24() -> Self {
        let capacity_solid = 2.4e6;
        let capacity_liquid = 3.0e6;
        let latent_heat = 2.7e8;
        let peak = (capacity_solid + capacity_liquid) / 2. + 2. * latent_heat / 4.;
        Self {
            name: "SaltHydrate24".into(),
            temp_solidus: 22.,
            temp_liquidus: 26.,
            temp_peak: 24.,
            latent_heat,
            capacity_solid,
            capacity_liquid,
            conductivity_solid: 1.0,
            conductivity_liquid: 0.6,
            model: PcmPropertyModel::Table {
                rows: vec![
                    PcmTableRow {
                        temperature: 22.,
                        capacity: capacity_solid,
                        conductivity: 1.0,
                    },
                    PcmTableRow {
                        temperature: 24.,
                        capacity: peak,
                        conductivity: 0.8,
                    },
                    PcmTableRow {
                        temperature: 26.,
                        capacity: capacity_liquid,
                        conductivity: 0.6,
                    },
                ],
            },
            average_temperature: true,
            iterate: true,
            temperature_retrigger: false,
            convergence_tolerance: default_convergence_tolerance(),
            relaxation_weight: Some(0.3),
        }
    }
}

/// Apparent properties of one PCM-bearing sublayer, shared between the two nodes that bound it.
#[derive(Clone, Debug)]
pub struct PcmState {
    material: Arc<PcmMaterial>,
    volume_fraction: f64,
    /// apparent capacity used for the inner and outer node halves, in J / (m3.K)
    capacity: [f64; 2],
    /// in W / (m.K)
    conductivity: f64,
    converged: bool,
}

impl PcmState {
    pub(crate) fn new(material: Arc<PcmMaterial>, volume_fraction: f64, temp_initial: f64) -> Self {
        let capacity = material.apparent_capacity(temp_initial);
        let conductivity = material.conductivity(temp_initial);
        Self {
            material,
            volume_fraction,
            capacity: [capacity; 2],
            conductivity,
            converged: true,
        }
    }

    pub fn material(&self) -> &PcmMaterial {
        &self.material
    }

    pub fn volume_fraction(&self) -> f64 {
        self.volume_fraction
    }

    pub fn capacity(&self) -> [f64; 2] {
        self.capacity
    }

    pub fn conductivity(&self) -> f64 {
        self.conductivity
    }

    pub fn is_converged(&self) -> bool {
        self.converged
    }

    fn evaluate(&self, temp_inner: f64, temp_outer: f64) -> ([f64; 2], f64) {
        let temp_mean = (temp_inner + temp_outer) / 2.;
        let capacity = if self.material.average_temperature {
            [self.material.apparent_capacity(temp_mean); 2]
        } else {
            [
                self.material.apparent_capacity(temp_inner),
                self.material.apparent_capacity(temp_outer),
            ]
        };
        (capacity, self.material.conductivity(temp_mean))
    }

    /// Re-evaluate the apparent properties at the given node temperatures.
    pub(crate) fn update(&mut self, temp_inner: f64, temp_outer: f64) {
        let (capacity, conductivity) = self.evaluate(temp_inner, temp_outer);
        self.capacity = capacity;
        self.conductivity = conductivity;
    }

    /// Compare the properties implied by trial node temperatures with those used to build the
    /// current coefficients. Returns true (and clears the converged flag) if a reset is needed.
    ///
    /// * `committed` - node temperatures at the end of the previous step, in deg C
    pub(crate) fn check(&mut self, trial: [f64; 2], anchor: [f64; 2], committed: [f64; 2]) -> bool {
        if !self.material.iterate {
            self.converged = true;
            return false;
        }

        let (capacity_trial, _) = self.evaluate(trial[0], trial[1]);
        let capacity_moved = capacity_trial
            .iter()
            .zip(self.capacity.iter())
            .any(|(new, used)| (new - used).abs() > self.material.convergence_tolerance * used.abs());
        let temperature_moved = (0..2).any(|node| {
            self.material.retriggers(committed[node])
                && (trial[node] - anchor[node]).abs() > PCM_RETRIGGER_TEMPERATURE_DELTA
        });

        self.converged = !(capacity_moved || temperature_moved);
        !self.converged
    }
}
