use serde::Deserialize;
use smartstring::alias::String;

/// Orientation class used to select the natural-convection correlation for a surface.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq, strum::Display)]
pub enum SurfaceClass {
    Floor,
    Ceiling,
    Wall,
    Window,
    /// Sloped surfaces; treated as vertical for convection
    Other,
}

/// How the outdoor film coefficient of an exterior surface is obtained.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq)]
#[serde(tag = "type", deny_unknown_fields)]
pub enum OutdoorFilm {
    Fixed { coefficient: f64 },
    /// Value supplied per step; falls back to the wind model when absent
    Scheduled,
    Wind,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum OutsideBoundary {
    Exterior {
        /// index into the exterior irradiance list supplied each step
        exterior_idx: usize,
        solar_absorptance: f64,
        emissivity: f64,
        film: OutdoorFilm,
    },
    /// Shared partition; the paired surface faces the other side of the same wall
    Partition { paired: usize },
    Ground { temperature: f64, conductance: f64 },
    Adiabatic,
}

/// Which face of a multilayer wall a surface is: node 0 (inside) or node M-1 (outside, only
/// used by the second surface of a shared partition).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WallFace {
    Inside,
    Outside,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SurfaceConstruction {
    Multilayer { wall: usize, face: WallFace },
    /// Single-resistance glazing, resistance excluding both films in m2.K/W
    Window { resistance: f64 },
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub(crate) struct FilmState {
    /// inside convective coefficient, in W / (m2.K)
    pub convective: f64,
    /// inside radiative coefficient (sum of exchange coefficients with other surfaces)
    pub radiative: f64,
    /// coefficients last used to build downstream coefficients
    pub convective_used: f64,
    pub radiative_used: f64,
    /// outdoor combined coefficient for exterior surfaces
    pub outdoor: f64,
    pub outdoor_used: f64,
}

impl FilmState {
    pub fn inside(&self) -> f64 {
        self.convective + self.radiative
    }
}

/// Per-surface values reported once a step has been settled.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct SurfaceReadback {
    /// inside surface temperature, in deg C
    pub temperature: f64,
    /// mean radiant temperature seen by the surface, in deg C
    pub mean_radiant_temperature: f64,
    /// convective heat from surface to room air, in W
    pub convective_heat: f64,
    /// net long-wave radiation leaving the surface, in W
    pub radiative_heat: f64,
    /// heat conducted from the construction into the inside face, in W
    pub conducted_heat: f64,
}

#[derive(Clone, Debug)]
pub struct Surface {
    pub(crate) name: String,
    pub(crate) room: usize,
    pub(crate) class: SurfaceClass,
    pub(crate) area: f64,
    pub(crate) emissivity: f64,
    /// share of the room's transmitted solar absorbed on this surface
    pub(crate) solar_fraction: f64,
    pub(crate) construction: SurfaceConstruction,
    pub(crate) boundary: OutsideBoundary,
    pub(crate) convective_override: Option<f64>,
    /// global panel index when the surface's wall carries a radiant panel
    pub(crate) panel: Option<usize>,
    pub(crate) film: FilmState,
    pub(crate) temp_prev: f64,
    /// absorbed short-wave plus radiative internal gains for the current step, in W / m2
    pub(crate) absorbed: f64,
    pub(crate) dirty: bool,
    /// trial values of the current step, promoted to `readback` on commit
    pub(crate) trial: SurfaceReadback,
    pub(crate) readback: SurfaceReadback,
}

impl Surface {
    pub(crate) fn new(
        name: &str,
        room: usize,
        class: SurfaceClass,
        area: f64,
        emissivity: f64,
        solar_fraction: f64,
        construction: SurfaceConstruction,
        boundary: OutsideBoundary,
        convective_override: Option<f64>,
        temp_initial: f64,
    ) -> Self {
        let readback = SurfaceReadback {
            temperature: temp_initial,
            mean_radiant_temperature: temp_initial,
            ..Default::default()
        };
        Self {
            name: name.into(),
            room,
            class,
            area,
            emissivity,
            solar_fraction,
            construction,
            boundary,
            convective_override,
            panel: None,
            film: Default::default(),
            temp_prev: temp_initial,
            absorbed: 0.,
            // first pass always builds everything
            dirty: true,
            trial: readback,
            readback,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn room(&self) -> usize {
        self.room
    }

    pub fn class(&self) -> SurfaceClass {
        self.class
    }

    pub fn area(&self) -> f64 {
        self.area
    }

    pub fn emissivity(&self) -> f64 {
        self.emissivity
    }

    pub fn construction(&self) -> SurfaceConstruction {
        self.construction
    }

    pub fn boundary(&self) -> OutsideBoundary {
        self.boundary
    }

    pub fn convective_coefficient(&self) -> f64 {
        self.film.convective
    }

    pub fn radiative_coefficient(&self) -> f64 {
        self.film.radiative
    }

    pub fn inside_film_coefficient(&self) -> f64 {
        self.film.inside()
    }

    pub fn outdoor_film_coefficient(&self) -> f64 {
        self.film.outdoor
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Flag this surface's cached coefficients as stale so that the next coefficient update
    /// rebuilds everything downstream of it.
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn readback(&self) -> &SurfaceReadback {
        &self.readback
    }

    /// Inside equivalent temperature: the temperature that drives the inside face through the
    /// combined film, in deg C
    pub(crate) fn inside_equivalent_temperature(&self, temp_air: f64, temp_mrt: f64) -> f64 {
        let film = self.film.inside();
        (self.film.convective * temp_air + self.film.radiative * temp_mrt + self.absorbed) / film
    }
}
