/// The envelope network: surfaces, walls, rooms and panels held in index-addressed arenas, and
/// the orchestration of one step through coefficient refresh, external solve and settling.
use crate::core::envelope::convergence::{PcmConvergenceController, PcmLoopState, StepOutcome};
use crate::core::envelope::film_coefficients::{
    outdoor_film_coefficient, sol_air_temperature, update_outdoor,
};
use crate::core::envelope::multilayer_wall::{EmbeddedKind, FaceResponse, MultilayerWall, WallDrive};
use crate::core::envelope::room::{AirBalanceCoefficients, Room, RoomLoads};
use crate::core::envelope::surface::{
    OutsideBoundary, Surface, SurfaceConstruction, SurfaceReadback, WallFace,
};
use crate::core::envelope::surface_system::{link_rooms, OppositeDrive, SurfaceSystem};
use anyhow::{anyhow, bail, Context};
use indexmap::IndexMap;
use rayon::prelude::*;
use serde::Deserialize;
use smartstring::alias::String;
use tracing::{debug, trace, warn};

/// Irradiance on the outside face of one exterior surface.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ExteriorIrradiance {
    /// in W / m2
    #[serde(default)]
    pub incident_solar: f64,
    /// net long-wave loss to the sky, in W / m2
    #[serde(default)]
    pub night_radiation: f64,
    #[serde(default)]
    pub windward: bool,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ExteriorConditions {
    /// in deg C
    pub air_temperature: f64,
    /// humidity ratio, in kg/kg
    #[serde(default)]
    pub humidity: f64,
    /// in m/s
    #[serde(default)]
    pub wind_speed: f64,
    /// indexed by the `exterior_idx` of exterior surfaces
    #[serde(default)]
    pub surfaces: Vec<ExteriorIrradiance>,
}

/// Boundary data for one step.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct StepConditions {
    pub exterior: ExteriorConditions,
    /// loads per room; rooms beyond the end of the list have no loads
    #[serde(default)]
    pub rooms: Vec<RoomLoads>,
    /// scheduled inside convective coefficients, keyed by surface index
    #[serde(default)]
    pub convective_overrides: IndexMap<usize, f64>,
    /// scheduled outdoor film coefficients, keyed by surface index
    #[serde(default)]
    pub outdoor_film_schedule: IndexMap<usize, f64>,
    /// fluid temperature of each solar collector, in deg C
    #[serde(default)]
    pub collector_temperatures: Vec<f64>,
}

/// Air state solved externally from the air-balance coefficients.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct SettledState {
    /// in deg C, one per room
    pub air_temperatures: Vec<f64>,
    /// in kg/kg, one per room; previous values are kept when empty
    #[serde(default)]
    pub humidities: Vec<f64>,
    /// in W, one per panel; panels are off when empty
    #[serde(default)]
    pub panel_heat: Vec<f64>,
}

#[derive(Clone, Debug)]
pub struct Panel {
    pub name: String,
    pub wall: usize,
    /// wall area the panel heat is spread over, in m2
    pub area: f64,
}

#[derive(Clone, Debug)]
pub struct Collector {
    pub name: String,
    pub wall: usize,
}

#[derive(Debug)]
pub struct Envelope {
    delta_t: f64,
    surfaces: Vec<Surface>,
    walls: Vec<MultilayerWall>,
    rooms: Vec<Room>,
    panels: Vec<Panel>,
    collectors: Vec<Collector>,
    /// one per group of rooms linked by partitions
    systems: Vec<SurfaceSystem>,
    /// index into `systems` of each room
    room_system: Vec<usize>,
    /// surface whose inside face is node 0 of each wall
    wall_owner: Vec<usize>,
    wall_panel: Vec<Option<usize>>,
    wall_collector: Vec<Option<usize>>,
    controller: PcmConvergenceController,
    responses: Vec<FaceResponse>,
    sol_air: Vec<f64>,
    collector_temperatures: Vec<f64>,
    coefficients_current: bool,
}

impl Envelope {
    /// Link and validate the arenas of a model.
    ///
    /// * `delta_t` - timestep, in seconds
    pub fn new(
        delta_t: f64,
        mut surfaces: Vec<Surface>,
        walls: Vec<MultilayerWall>,
        rooms: Vec<Room>,
        panels: Vec<Panel>,
        collectors: Vec<Collector>,
    ) -> anyhow::Result<Self> {
        let mut wall_owner = vec![None; walls.len()];
        for (idx, surface) in surfaces.iter().enumerate() {
            if surface.room >= rooms.len() {
                bail!("Surface '{}' belongs to unknown room {}", surface.name, surface.room);
            }
            if let SurfaceConstruction::Multilayer { wall, face } = surface.construction {
                if wall >= walls.len() {
                    bail!("Surface '{}' refers to unknown wall {wall}", surface.name);
                }
                if face == WallFace::Inside {
                    if wall_owner[wall].is_some() {
                        bail!("Wall '{}' has more than one inside face", walls[wall].name());
                    }
                    wall_owner[wall] = Some(idx);
                }
            }
            if let OutsideBoundary::Partition { paired } = surface.boundary {
                Self::validate_pairing(&surfaces, idx, paired)?;
            }
        }
        let wall_owner = wall_owner
            .into_iter()
            .enumerate()
            .map(|(wall, owner)| {
                owner.ok_or_else(|| anyhow!("Wall '{}' has no inside face", walls[wall].name()))
            })
            .collect::<anyhow::Result<Vec<usize>>>()?;

        let mut wall_panel = vec![None; walls.len()];
        for (idx, panel) in panels.iter().enumerate() {
            let wall = walls
                .get(panel.wall)
                .ok_or_else(|| anyhow!("Panel '{}' refers to unknown wall", panel.name))?;
            if wall.embedded_kind() != Some(EmbeddedKind::RadiantPanel) {
                bail!(
                    "Panel '{}' refers to wall '{}' which has no radiant panel layer",
                    panel.name,
                    wall.name()
                );
            }
            if panel.area <= 0. {
                bail!("Panel '{}' must have a positive area", panel.name);
            }
            wall_panel[panel.wall] = Some(idx);
        }
        let mut wall_collector = vec![None; walls.len()];
        for (idx, collector) in collectors.iter().enumerate() {
            let wall = walls
                .get(collector.wall)
                .ok_or_else(|| anyhow!("Collector '{}' refers to unknown wall", collector.name))?;
            if !matches!(wall.embedded_kind(), Some(EmbeddedKind::SolarCollector { .. })) {
                bail!(
                    "Collector '{}' refers to wall '{}' which has no collector layer",
                    collector.name,
                    wall.name()
                );
            }
            wall_collector[collector.wall] = Some(idx);
        }

        for surface in surfaces.iter_mut() {
            if let SurfaceConstruction::Multilayer { wall, .. } = surface.construction {
                surface.panel = wall_panel[wall];
            }
        }

        let links = surfaces.iter().filter_map(|surface| match surface.boundary {
            OutsideBoundary::Partition { paired } => Some((surface.room, surfaces[paired].room)),
            _ => None,
        });
        let mut room_system = vec![0; rooms.len()];
        let systems: Vec<SurfaceSystem> = link_rooms(rooms.len(), links)
            .into_iter()
            .enumerate()
            .map(|(idx, group)| {
                for &room in &group {
                    room_system[room] = idx;
                }
                SurfaceSystem::new(group, &rooms)
            })
            .collect();

        let surface_count = surfaces.len();
        Ok(Self {
            delta_t,
            surfaces,
            walls,
            rooms,
            panels,
            collectors,
            systems,
            room_system,
            wall_owner,
            wall_panel,
            wall_collector,
            controller: PcmConvergenceController::new(),
            responses: vec![Default::default(); surface_count],
            sol_air: vec![0.; surface_count],
            collector_temperatures: vec![],
            coefficients_current: false,
        })
    }

    fn validate_pairing(surfaces: &[Surface], idx: usize, paired: usize) -> anyhow::Result<()> {
        let surface = &surfaces[idx];
        let other = surfaces
            .get(paired)
            .ok_or_else(|| anyhow!("Surface '{}' is paired with an unknown surface", surface.name))?;
        if other.boundary != (OutsideBoundary::Partition { paired: idx }) {
            bail!(
                "Surfaces '{}' and '{}' are not paired with each other",
                surface.name,
                other.name
            );
        }
        match (surface.construction, other.construction) {
            (
                SurfaceConstruction::Multilayer { wall, face },
                SurfaceConstruction::Multilayer {
                    wall: other_wall,
                    face: other_face,
                },
            ) if wall == other_wall && face != other_face => Ok(()),
            (SurfaceConstruction::Window { .. }, SurfaceConstruction::Window { .. }) => Ok(()),
            _ => bail!(
                "Paired surfaces '{}' and '{}' must share one construction from opposite faces",
                surface.name,
                other.name
            ),
        }
    }

    pub fn delta_t(&self) -> f64 {
        self.delta_t
    }

    pub fn surfaces(&self) -> &[Surface] {
        &self.surfaces
    }

    pub fn walls(&self) -> &[MultilayerWall] {
        &self.walls
    }

    pub fn rooms(&self) -> &[Room] {
        &self.rooms
    }

    pub fn panels(&self) -> &[Panel] {
        &self.panels
    }

    pub fn collectors(&self) -> &[Collector] {
        &self.collectors
    }

    pub fn loop_state(&self) -> PcmLoopState {
        self.controller.state()
    }

    pub fn find_room(&self, name: &str) -> Option<usize> {
        self.rooms.iter().position(|room| room.name() == name)
    }

    pub fn find_surface(&self, room: usize, name: &str) -> Option<usize> {
        self.rooms
            .get(room)?
            .surface_range()
            .find(|&idx| self.surfaces[idx].name() == name)
    }

    /// Air-balance coefficients of a room for the current step.
    pub fn air_balance(&self, room: usize) -> &AirBalanceCoefficients {
        self.rooms[room].balance()
    }

    /// Face responses used for the current step's coefficients
    pub fn face_responses(&self) -> &[FaceResponse] {
        &self.responses
    }

    pub fn surface_readback(&self, surface: usize) -> &SurfaceReadback {
        self.surfaces[surface].readback()
    }

    /// Flag a surface whose boundary conditions changed outside the envelope so that the next
    /// coefficient update rebuilds everything that depends on it.
    pub fn mark_dirty(&mut self, surface: usize) {
        self.surfaces[surface].mark_dirty();
        if let SurfaceConstruction::Multilayer { wall, .. } = self.surfaces[surface].construction {
            self.walls[wall].mark_dirty();
        }
        let room = self.surfaces[surface].room;
        self.rooms[room].mark_dirty();
    }

    /// Coupling from the far face of a surface's construction to its drive temperature,
    /// in W / (m2.K)
    fn outside_film(&self, surface: usize) -> f64 {
        match self.surfaces[surface].boundary {
            OutsideBoundary::Exterior { .. } => self.surfaces[surface].film.outdoor,
            OutsideBoundary::Ground { conductance, .. } => conductance,
            OutsideBoundary::Adiabatic => 0.,
            OutsideBoundary::Partition { paired } => self.surfaces[paired].film.inside(),
        }
    }

    fn fluid_temperature(&self, wall: usize) -> anyhow::Result<f64> {
        match self.wall_collector[wall] {
            None => Ok(0.),
            Some(collector) => self
                .collector_temperatures
                .get(collector)
                .copied()
                .ok_or_else(|| {
                    anyhow!(
                        "No fluid temperature supplied for collector '{}'",
                        self.collectors[collector].name
                    )
                }),
        }
    }

    fn face_response(&self, surface: usize) -> anyhow::Result<FaceResponse> {
        match self.surfaces[surface].construction {
            SurfaceConstruction::Multilayer { wall, face } => Ok(self.walls[wall]
                .face_response(face, self.fluid_temperature(wall)?)),
            SurfaceConstruction::Window { resistance } => {
                let film_outside = self.outside_film(surface);
                let conductance = if film_outside > 0. {
                    1. / (resistance + 1. / film_outside)
                } else {
                    0.
                };
                let h_inside = self.surfaces[surface].film.inside();
                let total = h_inside + conductance;
                if total <= 0. {
                    return Ok(Default::default());
                }
                Ok(FaceResponse {
                    own: h_inside / total,
                    opposite: conductance / total,
                    panel: 0.,
                    history: 0.,
                })
            }
        }
    }

    fn opposite_drive(&self, surface: usize) -> OppositeDrive {
        match self.surfaces[surface].boundary {
            OutsideBoundary::Exterior { .. } => OppositeDrive {
                constant: self.sol_air[surface],
                ..Default::default()
            },
            OutsideBoundary::Ground { temperature, .. } => OppositeDrive {
                constant: temperature,
                ..Default::default()
            },
            OutsideBoundary::Adiabatic => Default::default(),
            // the paired surface's inside equivalent temperature, its mean radiant part left to
            // the surface system
            OutsideBoundary::Partition { paired } => {
                let other = &self.surfaces[paired];
                let h_inside = other.film.inside();
                if h_inside <= 0. {
                    return OppositeDrive {
                        constant: other.temp_prev,
                        ..Default::default()
                    };
                }
                OppositeDrive {
                    constant: other.absorbed / h_inside,
                    air: Some((other.room, other.film.convective / h_inside)),
                    exchange: Some((paired, 1. / h_inside)),
                }
            }
        }
    }

    fn validate_conditions(&self, conditions: &StepConditions) -> anyhow::Result<()> {
        for idx in conditions
            .convective_overrides
            .keys()
            .chain(conditions.outdoor_film_schedule.keys())
        {
            if *idx >= self.surfaces.len() {
                bail!("Scheduled film coefficient given for unknown surface {idx}");
            }
        }
        if conditions.rooms.len() > self.rooms.len() {
            bail!(
                "Loads given for {} rooms but the model has {}",
                conditions.rooms.len(),
                self.rooms.len()
            );
        }
        Ok(())
    }

    /// Refresh film coefficients, rebuild whatever they made stale, and assemble the
    /// air-balance coefficients for the step. Called at the start of a step and again after
    /// every reset.
    pub fn update_coefficients(&mut self, conditions: &StepConditions) -> anyhow::Result<()> {
        if !self.controller.can_update_coefficients() {
            bail!(
                "Coefficients cannot be updated while the PCM loop is in state {}",
                self.controller.state()
            );
        }
        self.validate_conditions(conditions)?;
        let exterior = &conditions.exterior;
        self.collector_temperatures
            .clone_from(&conditions.collector_temperatures);

        for (idx, room) in self.rooms.iter_mut().enumerate() {
            let range = room.surface_range();
            room.update_films(
                &mut self.surfaces[range.clone()],
                &conditions.convective_overrides,
            )
            .with_context(|| format!("Radiative coefficients of room '{}'", room.name()))?;
            let loads = conditions.rooms.get(idx).copied().unwrap_or_default();
            room.distribute_absorbed(&mut self.surfaces[range], &loads);
        }

        for (idx, surface) in self.surfaces.iter_mut().enumerate() {
            let OutsideBoundary::Exterior {
                exterior_idx,
                solar_absorptance,
                emissivity,
                film,
            } = surface.boundary
            else {
                continue;
            };
            let irradiance = match exterior.surfaces.get(exterior_idx) {
                Some(irradiance) => *irradiance,
                None if exterior.surfaces.is_empty() => {
                    debug!("No exterior irradiance given; surface '{}' sees none", surface.name);
                    ExteriorIrradiance::default()
                }
                None => {
                    warn!(
                        "No exterior irradiance entry {exterior_idx} for surface '{}'; assuming no sun or sky radiation",
                        surface.name
                    );
                    ExteriorIrradiance::default()
                }
            };
            let h_outdoor = outdoor_film_coefficient(
                film,
                conditions.outdoor_film_schedule.get(&idx).copied(),
                exterior.wind_speed,
                irradiance.windward,
                emissivity,
                exterior.air_temperature,
            )
            .with_context(|| format!("Outdoor film coefficient of surface '{}'", surface.name))?;
            update_outdoor(surface, h_outdoor);
            self.sol_air[idx] = sol_air_temperature(
                exterior.air_temperature,
                solar_absorptance,
                irradiance.incident_solar,
                emissivity,
                irradiance.night_radiation,
                h_outdoor,
            );
        }

        for room in &self.rooms {
            room.warn_on_films(&self.surfaces[room.surface_range()]);
        }

        let films: Vec<(f64, f64)> = self
            .wall_owner
            .iter()
            .map(|&owner| (self.surfaces[owner].film.inside(), self.outside_film(owner)))
            .collect();
        let rebuilt = self
            .walls
            .par_iter_mut()
            .zip(films.par_iter())
            .map(|(wall, &(film_inside, film_outside))| -> anyhow::Result<bool> {
                if !wall.needs_rebuild(film_inside, film_outside) {
                    return Ok(false);
                }
                wall.build_coefficients(film_inside, film_outside)
                    .with_context(|| format!("Conduction coefficients of wall '{}'", wall.name()))?;
                Ok(true)
            })
            .collect::<anyhow::Result<Vec<bool>>>()?;

        let responses = (0..self.surfaces.len())
            .map(|idx| self.face_response(idx))
            .collect::<anyhow::Result<Vec<_>>>()?;
        let opposite: Vec<OppositeDrive> = (0..self.surfaces.len())
            .map(|idx| self.opposite_drive(idx))
            .collect();

        let stale_rooms: Vec<bool> = self
            .rooms
            .iter()
            .map(|room| {
                room.needs_rebuild()
                    || room.surface_range().any(|idx| {
                        let surface = &self.surfaces[idx];
                        let wall_rebuilt = match surface.construction {
                            SurfaceConstruction::Multilayer { wall, .. } => rebuilt[wall],
                            SurfaceConstruction::Window { .. } => false,
                        };
                        let paired_dirty = match surface.boundary {
                            OutsideBoundary::Partition { paired } => self.surfaces[paired].dirty,
                            _ => false,
                        };
                        surface.dirty || wall_rebuilt || paired_dirty
                    })
            })
            .collect();
        let stale: Vec<bool> = self
            .systems
            .iter()
            .map(|system| system.rooms().iter().any(|&room| stale_rooms[room]))
            .collect();

        let panel_areas: Vec<f64> = self.panels.iter().map(|panel| panel.area).collect();
        let rooms = &self.rooms;
        let surfaces = &self.surfaces;
        self.systems
            .par_iter_mut()
            .zip(stale.par_iter())
            .try_for_each(|(system, &rebuild)| -> anyhow::Result<()> {
                if rebuild {
                    system
                        .rebuild(rooms, surfaces, &responses, &opposite, &panel_areas)
                        .with_context(|| {
                            format!("Surface temperature system of room(s) {:?}", system.rooms())
                        })?;
                }
                system.fold_constant(surfaces, &responses, &opposite);
                Ok(())
            })?;
        for (system, _) in self.systems.iter().zip(&stale).filter(|(_, rebuild)| **rebuild) {
            for &room in system.rooms() {
                self.rooms[room].mark_rebuilt();
            }
        }

        for surface in self.surfaces.iter_mut().filter(|surface| surface.dirty) {
            surface.film.convective_used = surface.film.convective;
            surface.film.radiative_used = surface.film.radiative;
            surface.film.outdoor_used = surface.film.outdoor;
            surface.dirty = false;
        }

        for (idx, room) in self.rooms.iter_mut().enumerate() {
            room.assemble(
                &self.systems[self.room_system[idx]],
                &self.surfaces,
                exterior.air_temperature,
                exterior.humidity,
                self.delta_t,
            );
        }

        self.responses = responses;
        self.coefficients_current = true;
        debug!(
            "Coefficients updated: {} wall(s) and {} surface system(s) rebuilt",
            rebuilt.iter().filter(|&&flag| flag).count(),
            stale.iter().filter(|&&flag| flag).count()
        );

        Ok(())
    }

    fn wall_drive(
        &self,
        wall: usize,
        air_temperatures: &[f64],
        panel_heat: &[f64],
    ) -> anyhow::Result<WallDrive> {
        let owner = &self.surfaces[self.wall_owner[wall]];
        let inside = owner.inside_equivalent_temperature(
            air_temperatures[owner.room],
            owner.trial.mean_radiant_temperature,
        );
        let outside = match owner.boundary {
            OutsideBoundary::Exterior { .. } => self.sol_air[self.wall_owner[wall]],
            OutsideBoundary::Ground { temperature, .. } => temperature,
            OutsideBoundary::Adiabatic => 0.,
            OutsideBoundary::Partition { paired } => {
                let other = &self.surfaces[paired];
                if other.film.inside() <= 0. {
                    other.temp_prev
                } else {
                    other.inside_equivalent_temperature(
                        air_temperatures[other.room],
                        other.trial.mean_radiant_temperature,
                    )
                }
            }
        };
        let embedded = match (self.wall_panel[wall], self.wall_collector[wall]) {
            (Some(panel), _) => panel_heat[panel] / self.panels[panel].area,
            (None, Some(_)) => self.fluid_temperature(wall)?,
            (None, None) => 0.,
        };

        Ok(WallDrive {
            inside,
            outside,
            embedded,
        })
    }

    /// Take the externally settled air state through the trial states and the PCM check.
    ///
    /// Returns `StepOutcome::Reset` when any phase-change property moved beyond tolerance:
    /// nothing is committed and the caller should update the coefficients and solve again.
    /// Otherwise the step is committed.
    pub fn settle(&mut self, settled: &SettledState) -> anyhow::Result<StepOutcome> {
        if !self.coefficients_current {
            bail!("Coefficients must be updated before a step can be settled");
        }
        let room_count = self.rooms.len();
        if settled.air_temperatures.len() != room_count {
            bail!(
                "Settled state has {} air temperatures but the model has {room_count} rooms",
                settled.air_temperatures.len()
            );
        }
        let humidities = if settled.humidities.is_empty() {
            self.rooms.iter().map(Room::humidity).collect()
        } else if settled.humidities.len() == room_count {
            settled.humidities.clone()
        } else {
            bail!("Settled state must give a humidity for every room or none");
        };
        let panel_heat = if settled.panel_heat.is_empty() {
            vec![0.; self.panels.len()]
        } else if settled.panel_heat.len() == self.panels.len() {
            settled.panel_heat.clone()
        } else {
            bail!("Settled state must give the heat of every panel or none");
        };
        let air_temperatures = &settled.air_temperatures;

        self.controller.transition(PcmLoopState::Trial)?;
        self.controller.transition(PcmLoopState::SurfaceTempTrial)?;
        for (idx, room) in self.rooms.iter_mut().enumerate() {
            let system = &self.systems[self.room_system[idx]];
            let range = room.surface_range();
            let temps: Vec<f64> = range
                .clone()
                .map(|surface| system.temperature(surface, air_temperatures, &panel_heat))
                .collect();
            room.record_trial(
                &mut self.surfaces[range],
                air_temperatures[idx],
                humidities[idx],
                &temps,
            );
        }

        self.controller.transition(PcmLoopState::WallTrial)?;
        let drives = (0..self.walls.len())
            .map(|wall| self.wall_drive(wall, air_temperatures, &panel_heat))
            .collect::<anyhow::Result<Vec<_>>>()?;
        self.walls
            .par_iter_mut()
            .zip(drives.par_iter())
            .for_each(|(wall, drive)| {
                wall.solve_provisional(drive);
            });
        for room in self.rooms.iter_mut() {
            let solar = room.loads().solar_transmitted;
            let temp_air = room.trial_air_temperature();
            if let Some(furniture) = room.furniture_mut() {
                let solar = furniture.solar_fraction() * solar;
                furniture.solve_provisional(temp_air, solar, self.delta_t);
            }
        }

        self.controller.transition(PcmLoopState::Check)?;
        let mut resets: u32 = self.walls.iter_mut().map(MultilayerWall::check_pcm).sum();
        for room in self.rooms.iter_mut() {
            if let Some(furniture) = room.furniture_mut() {
                if furniture.check_pcm() {
                    resets += 1;
                }
            }
        }

        let outcome = self.controller.record_check(resets)?;
        match outcome {
            StepOutcome::Reset { resets } => {
                trace!("PCM check flagged {resets} reset(s)");
                self.coefficients_current = false;
            }
            StepOutcome::Converged { .. } => {
                self.commit_trial();
                self.controller.finish_step()?;
            }
        }

        Ok(outcome)
    }

    /// Accept the latest trial although its PCM check flagged resets. Returns the number of
    /// settle passes made in the step.
    pub fn commit_unconverged(&mut self) -> anyhow::Result<u32> {
        let iterations = self.controller.force_converged()?;
        self.commit_trial();
        self.controller.finish_step()?;
        debug!("Committed unconverged step after {iterations} iteration(s)");
        Ok(iterations)
    }

    fn commit_trial(&mut self) {
        for wall in self.walls.iter_mut() {
            wall.commit();
        }
        for room in self.rooms.iter_mut() {
            room.commit();
        }
        for surface in self.surfaces.iter_mut() {
            surface.readback = surface.trial;
            surface.temp_prev = surface.trial.temperature;
        }
        self.coefficients_current = false;
    }
}
