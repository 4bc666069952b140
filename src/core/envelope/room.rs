/// A room air volume and the assembly of its linear air-balance coefficients from the surface
/// temperature responses of its surface system.
use crate::core::envelope::film_coefficients::{
    check_film_envelope, convective_coefficient, update_convective, update_radiative,
};
use crate::core::envelope::furniture::Furniture;
use crate::core::envelope::radiative_exchange::RadiativeExchange;
use crate::core::envelope::surface::{Surface, SurfaceReadback};
use crate::core::envelope::surface_system::SurfaceSystem;
use crate::core::material_properties::AIR;
use crate::core::solvers::SingularMatrixError;
use crate::core::units::BelowAbsoluteZeroError;
use indexmap::IndexMap;
use serde::Deserialize;
use smartstring::alias::String;
use std::ops::Range;
use tracing::warn;

const SOLAR_FRACTION_TOLERANCE: f64 = 1e-3;

/// Heat and moisture loads on a room for one step.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct RoomLoads {
    /// solar transmitted into the room, in W
    #[serde(default)]
    pub solar_transmitted: f64,
    /// internal gains released directly to the air, in W
    #[serde(default)]
    pub convective_gains: f64,
    /// internal gains released as long-wave radiation, in W
    #[serde(default)]
    pub radiative_gains: f64,
    /// outdoor air supplied to the room, in m3/s
    #[serde(default)]
    pub ventilation_flow: f64,
    /// moisture released into the room, in kg/s
    #[serde(default)]
    pub moisture_gain: f64,
}

/// Coefficients of the room balances handed to the air solver.
///
/// Sensible heat to be supplied to the air, in W:
/// `RMt * Tr - sum(ARN[c] * Tr[c]) - sum(RMP[p] * Qp[p]) - RMC`.
/// Moisture to be supplied, in kg/s: `RMx * xr - RMXC`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AirBalanceCoefficients {
    pub rmt: f64,
    pub rmc: f64,
    pub rmx: f64,
    pub rmxc: f64,
    /// keyed by coupled room index
    pub arn: IndexMap<usize, f64>,
    /// keyed by panel index
    pub rmp: IndexMap<usize, f64>,
}

impl AirBalanceCoefficients {
    /// Sensible heat to be supplied to the air, in W
    ///
    /// * `temp_air` - air temperature of this room, in deg C
    /// * `air_temperatures` - air temperatures of all rooms, in deg C
    /// * `panel_heat` - heat injected by every panel, in W
    pub fn sensible_load(&self, temp_air: f64, air_temperatures: &[f64], panel_heat: &[f64]) -> f64 {
        self.rmt * temp_air
            - self
                .arn
                .iter()
                .map(|(room, coefficient)| coefficient * air_temperatures[*room])
                .sum::<f64>()
            - self
                .rmp
                .iter()
                .map(|(panel, coefficient)| coefficient * panel_heat[*panel])
                .sum::<f64>()
            - self.rmc
    }

    /// Moisture to be supplied to the air, in kg/s
    pub fn latent_load(&self, humidity: f64) -> f64 {
        self.rmx * humidity - self.rmxc
    }
}

#[derive(Clone, Debug)]
pub struct Room {
    name: String,
    index: usize,
    /// in m3
    volume: f64,
    /// extra air-equivalent capacity as a multiple of the air capacity
    air_capacity_factor: f64,
    surfaces: Range<usize>,
    furniture: Option<Furniture>,
    exchange: RadiativeExchange,
    h_black: f64,
    temp_mean_used: Option<f64>,
    needs_rebuild: bool,
    balance: AirBalanceCoefficients,
    loads: RoomLoads,
    temp_air_prev: f64,
    humidity_prev: f64,
    temp_air_trial: f64,
    humidity_trial: f64,
}

impl Room {
    /// * `surfaces` - the range of this room's surfaces in `all_surfaces`
    pub(crate) fn new(
        name: &str,
        index: usize,
        volume: f64,
        air_capacity_factor: f64,
        surfaces: Range<usize>,
        furniture: Option<Furniture>,
        all_surfaces: &[Surface],
        temp_initial: f64,
        humidity_initial: f64,
    ) -> Result<Self, SingularMatrixError> {
        let own = &all_surfaces[surfaces.clone()];
        let areas: Vec<f64> = own.iter().map(|s| s.area).collect();
        let emissivities: Vec<f64> = own.iter().map(|s| s.emissivity).collect();
        let exchange = RadiativeExchange::new(&areas, &emissivities)?;

        let solar_fraction_total = own.iter().map(|s| s.solar_fraction).sum::<f64>()
            + furniture.as_ref().map_or(0., Furniture::solar_fraction);
        if (solar_fraction_total - 1.).abs() > SOLAR_FRACTION_TOLERANCE {
            warn!(
                "Short-wave absorption fractions of room '{name}' sum to {solar_fraction_total:.4} rather than 1"
            );
        }

        Ok(Self {
            name: name.into(),
            index,
            volume,
            air_capacity_factor,
            surfaces,
            furniture,
            exchange,
            h_black: 0.,
            temp_mean_used: None,
            needs_rebuild: true,
            balance: Default::default(),
            loads: Default::default(),
            temp_air_prev: temp_initial,
            humidity_prev: humidity_initial,
            temp_air_trial: temp_initial,
            humidity_trial: humidity_initial,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn surface_range(&self) -> Range<usize> {
        self.surfaces.clone()
    }

    pub fn volume(&self) -> f64 {
        self.volume
    }

    pub fn furniture(&self) -> Option<&Furniture> {
        self.furniture.as_ref()
    }

    pub(crate) fn furniture_mut(&mut self) -> Option<&mut Furniture> {
        self.furniture.as_mut()
    }

    pub fn exchange(&self) -> &RadiativeExchange {
        &self.exchange
    }

    pub fn air_temperature(&self) -> f64 {
        self.temp_air_prev
    }

    pub fn humidity(&self) -> f64 {
        self.humidity_prev
    }

    pub fn balance(&self) -> &AirBalanceCoefficients {
        &self.balance
    }

    pub(crate) fn loads(&self) -> &RoomLoads {
        &self.loads
    }

    pub(crate) fn needs_rebuild(&self) -> bool {
        self.needs_rebuild
    }

    pub(crate) fn mark_dirty(&mut self) {
        self.needs_rebuild = true;
    }

    pub(crate) fn mark_rebuilt(&mut self) {
        self.needs_rebuild = false;
    }

    /// Linearised exchange coefficient between two surfaces of this room (local indices),
    /// in W / (m2.K)
    pub fn radiative_coefficient(&self, i: usize, j: usize) -> f64 {
        self.h_black * self.exchange.coefficient(i, j)
    }

    /// Refresh convective and radiative film coefficients of this room's surfaces.
    ///
    /// * `surfaces` - this room's surfaces
    /// * `scheduled` - per-step convective coefficients, keyed by global surface index
    pub(crate) fn update_films(
        &mut self,
        surfaces: &mut [Surface],
        scheduled: &IndexMap<usize, f64>,
    ) -> Result<(), BelowAbsoluteZeroError> {
        for (offset, surface) in surfaces.iter_mut().enumerate() {
            let global = self.surfaces.start + offset;
            let h_convective =
                convective_coefficient(surface, scheduled.get(&global).copied(), self.temp_air_prev);
            update_convective(surface, h_convective);
        }

        let force = surfaces.iter().any(Surface::is_dirty) || self.temp_mean_used.is_none();
        if let Some((temp_mean, h_black)) =
            update_radiative(surfaces, &self.exchange, self.temp_mean_used, force)?
        {
            self.temp_mean_used = Some(temp_mean);
            self.h_black = h_black;
        }
        Ok(())
    }

    /// Spread transmitted solar and radiative internal gains over the surfaces, in W / m2.
    pub(crate) fn distribute_absorbed(&mut self, surfaces: &mut [Surface], loads: &RoomLoads) {
        self.loads = *loads;
        let area_total: f64 = surfaces.iter().map(|s| s.area).sum();
        for surface in surfaces.iter_mut() {
            let solar = surface.solar_fraction * loads.solar_transmitted;
            let radiative = surface.area / area_total * loads.radiative_gains;
            surface.absorbed = (solar + radiative) / surface.area;
        }
    }

    pub(crate) fn warn_on_films(&self, surfaces: &[Surface]) {
        for surface in surfaces.iter().filter(|s| s.is_dirty()) {
            check_film_envelope(surface);
        }
    }

    /// Assemble the air balances of the step from the surface system of the room's group.
    ///
    /// * `system` - surface system of the group this room belongs to, with the step's constant
    ///   terms folded in
    /// * `temp_outdoor` - outdoor air temperature, in deg C
    /// * `humidity_outdoor` - outdoor humidity ratio, in kg/kg
    /// * `delta_t` - timestep, in seconds
    pub(crate) fn assemble(
        &mut self,
        system: &SurfaceSystem,
        surfaces: &[Surface],
        temp_outdoor: f64,
        humidity_outdoor: f64,
        delta_t: f64,
    ) {
        let capacity_air = AIR.volumetric_heat_capacity() * self.volume;
        let storage = capacity_air * (1. + self.air_capacity_factor) / delta_t;
        let ventilation = AIR.volumetric_heat_capacity() * self.loads.ventilation_flow;

        let mut rmt = storage + ventilation;
        let mut rmc =
            storage * self.temp_air_prev + ventilation * temp_outdoor + self.loads.convective_gains;
        let mut arn: IndexMap<usize, f64> = IndexMap::new();
        let mut rmp: IndexMap<usize, f64> = IndexMap::new();

        for global in self.surfaces.clone() {
            let conductance = surfaces[global].area * surfaces[global].film.convective;
            let row = system.row(global);
            rmt += conductance;
            rmc += conductance * system.constant()[row];
            for (room, column) in system.air_columns() {
                if *room == self.index {
                    rmt -= conductance * column[row];
                } else {
                    *arn.entry(*room).or_default() += conductance * column[row];
                }
            }
            for (panel, column) in system.panel_columns() {
                *rmp.entry(*panel).or_default() += conductance * column[row];
            }
        }

        if let Some(furniture) = &self.furniture {
            let solar = furniture.solar_fraction() * self.loads.solar_transmitted;
            let (coefficient, furniture_constant) = furniture.air_coefficients(solar, delta_t);
            rmt += coefficient;
            rmc += furniture_constant;
        }

        let moisture_storage = (AIR.density() * self.volume
            + self.furniture.as_ref().map_or(0., Furniture::moisture_capacity))
            / delta_t;
        let moisture_ventilation = AIR.density() * self.loads.ventilation_flow;

        self.balance = AirBalanceCoefficients {
            rmt,
            rmc,
            rmx: moisture_storage + moisture_ventilation,
            rmxc: moisture_storage * self.humidity_prev
                + moisture_ventilation * humidity_outdoor
                + self.loads.moisture_gain,
            arn,
            rmp,
        };
    }

    /// Store trial read-back values on this room's surfaces.
    pub(crate) fn record_trial(
        &mut self,
        surfaces: &mut [Surface],
        temp_air: f64,
        humidity: f64,
        temps: &[f64],
    ) {
        self.temp_air_trial = temp_air;
        self.humidity_trial = humidity;
        for (i, surface) in surfaces.iter_mut().enumerate() {
            let temperature = temps[i];
            let mean_radiant_temperature = self.exchange.mean_radiant_temperature(i, temps);
            let convective_heat = surface.area * surface.film.convective * (temperature - temp_air);
            let radiative_heat =
                surface.area * surface.film.radiative * (temperature - mean_radiant_temperature);
            surface.trial = SurfaceReadback {
                temperature,
                mean_radiant_temperature,
                convective_heat,
                radiative_heat,
                conducted_heat: convective_heat + radiative_heat - surface.absorbed * surface.area,
            };
        }
    }

    pub(crate) fn trial_air_temperature(&self) -> f64 {
        self.temp_air_trial
    }

    pub(crate) fn commit(&mut self) {
        self.temp_air_prev = self.temp_air_trial;
        self.humidity_prev = self.humidity_trial;
        if let Some(furniture) = self.furniture.as_mut() {
            furniture.commit();
        }
    }
}
