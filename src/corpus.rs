/// Assembly of an envelope network from a parsed model description.
use crate::core::envelope::furniture::{Furniture, FurniturePcm};
use crate::core::envelope::multilayer_wall::{
    EmbeddedKind, EmbeddedLayer, MultilayerWall, WallLayer,
};
use crate::core::envelope::network::{Collector, Envelope, Panel};
use crate::core::envelope::room::Room;
use crate::core::envelope::surface::{OutsideBoundary, Surface, SurfaceConstruction, WallFace};
use crate::core::material_properties::MaterialCatalog;
use crate::input::{
    BoundaryInput, ConstructionInput, EmbeddedInput, FurnitureInput, Input, SurfaceInput,
};
use anyhow::{anyhow, bail, Context};
use indexmap::IndexMap;
use smartstring::alias::String;

enum ResolvedConstruction {
    Multilayer {
        layers: Vec<WallLayer>,
        embedded: Option<EmbeddedLayer>,
    },
    Window {
        resistance: f64,
    },
}

fn catalog_from_input(input: &Input) -> anyhow::Result<MaterialCatalog> {
    let mut catalog = MaterialCatalog::with_defaults();
    for (name, material) in &input.materials {
        catalog.add_material(name, *material)?;
    }
    for pcm in &input.phase_change_materials {
        catalog.add_pcm(pcm.clone())?;
    }
    Ok(catalog)
}

fn resolve_constructions(
    input: &Input,
    catalog: &MaterialCatalog,
) -> anyhow::Result<IndexMap<String, ResolvedConstruction>> {
    input
        .constructions
        .iter()
        .map(|(name, construction)| -> anyhow::Result<(String, ResolvedConstruction)> {
            let resolved = match construction {
                ConstructionInput::Multilayer { layers, embedded } => {
                    let layers = layers
                        .iter()
                        .map(|layer| -> anyhow::Result<WallLayer> {
                            Ok(WallLayer {
                                material: catalog.resolve(&layer.material)?,
                                thickness: layer.thickness,
                                divisions: layer.divisions,
                            })
                        })
                        .collect::<anyhow::Result<Vec<_>>>()
                        .with_context(|| format!("Construction '{name}'"))?;
                    let embedded = embedded.map(|embedded| match embedded {
                        EmbeddedInput::RadiantPanel { after_layer } => EmbeddedLayer {
                            kind: EmbeddedKind::RadiantPanel,
                            after_layer,
                        },
                        EmbeddedInput::SolarCollector {
                            after_layer,
                            conductance,
                        } => EmbeddedLayer {
                            kind: EmbeddedKind::SolarCollector { conductance },
                            after_layer,
                        },
                    });
                    ResolvedConstruction::Multilayer { layers, embedded }
                }
                ConstructionInput::Window { resistance } => {
                    if *resistance < 0. {
                        bail!("Window construction '{name}' has a negative resistance");
                    }
                    ResolvedConstruction::Window {
                        resistance: *resistance,
                    }
                }
            };
            Ok((name.clone(), resolved))
        })
        .collect()
}

fn validate_surface(room: &str, name: &str, surface: &SurfaceInput) -> anyhow::Result<()> {
    if surface.area <= 0. {
        bail!("Surface '{name}' of room '{room}' must have a positive area");
    }
    if !(surface.emissivity > 0. && surface.emissivity <= 1.) {
        bail!("Emissivity of surface '{name}' of room '{room}' must be in (0, 1]");
    }
    if !(0. ..=1.).contains(&surface.solar_fraction) {
        bail!("Solar fraction of surface '{name}' of room '{room}' must be in [0, 1]");
    }
    Ok(())
}

fn validate_furniture(room: &str, furniture: &FurnitureInput) -> anyhow::Result<()> {
    if furniture.capacity < 0. {
        bail!("Furniture of room '{room}' must have a non-negative heat capacity");
    }
    if furniture.conductance < 0. {
        bail!("Furniture of room '{room}' must have a non-negative conductance");
    }
    if !(0. ..=1.).contains(&furniture.solar_fraction) {
        bail!("Solar fraction of the furniture of room '{room}' must be in [0, 1]");
    }
    if furniture.moisture_capacity < 0. {
        bail!("Furniture of room '{room}' must have a non-negative moisture capacity");
    }
    if let Some(pcm) = &furniture.pcm {
        if pcm.volume < 0. {
            bail!("Phase-change volume of the furniture of room '{room}' must be non-negative");
        }
    }
    Ok(())
}

/// Build the envelope network described by a model.
pub fn envelope_from_input(input: &Input) -> anyhow::Result<Envelope> {
    if input.timestep <= 0. {
        bail!("Timestep must be positive");
    }
    let catalog = catalog_from_input(input)?;
    let constructions = resolve_constructions(input, &catalog)?;
    let temp_initial = input.initial_temperature;

    // global surface indices in declaration order
    let mut surface_index: IndexMap<(String, String), usize> = IndexMap::new();
    for (room_name, room) in &input.rooms {
        for surface_name in room.surfaces.keys() {
            let idx = surface_index.len();
            surface_index.insert((room_name.clone(), surface_name.clone()), idx);
        }
    }

    let mut surfaces: Vec<Surface> = vec![];
    let mut walls: Vec<MultilayerWall> = vec![];
    let mut panels: Vec<Panel> = vec![];
    let mut collectors: Vec<Collector> = vec![];

    for (room_idx, (room_name, room)) in input.rooms.iter().enumerate() {
        if room.surfaces.is_empty() {
            bail!("Room '{room_name}' has no surfaces");
        }
        for (surface_name, surface) in &room.surfaces {
            validate_surface(room_name, surface_name, surface)?;
            let idx = surfaces.len();
            let label = format!("{room_name}/{surface_name}");

            let boundary = match &surface.boundary {
                BoundaryInput::Exterior {
                    exterior_index,
                    solar_absorptance,
                    emissivity,
                    film,
                } => OutsideBoundary::Exterior {
                    exterior_idx: *exterior_index,
                    solar_absorptance: *solar_absorptance,
                    emissivity: *emissivity,
                    film: *film,
                },
                BoundaryInput::Partition {
                    room: paired_room,
                    surface: paired_surface,
                } => {
                    let paired = *surface_index
                        .get(&(paired_room.clone(), paired_surface.clone()))
                        .ok_or_else(|| {
                            anyhow!(
                                "Surface '{label}' is paired with unknown surface '{paired_room}/{paired_surface}'"
                            )
                        })?;
                    if paired == idx {
                        bail!("Surface '{label}' cannot be paired with itself");
                    }
                    let paired_input = &input.rooms[paired_room].surfaces[paired_surface];
                    if paired_input.construction != surface.construction {
                        bail!(
                            "Paired surfaces '{label}' and '{paired_room}/{paired_surface}' use different constructions"
                        );
                    }
                    OutsideBoundary::Partition { paired }
                }
                BoundaryInput::Ground {
                    temperature,
                    conductance,
                } => {
                    if *conductance < 0. {
                        bail!("Ground conductance of surface '{label}' must be non-negative");
                    }
                    OutsideBoundary::Ground {
                        temperature: *temperature,
                        conductance: *conductance,
                    }
                }
                BoundaryInput::Adiabatic => OutsideBoundary::Adiabatic,
            };

            let construction = match constructions.get(&surface.construction).ok_or_else(|| {
                anyhow!(
                    "Surface '{label}' uses unknown construction '{}'",
                    surface.construction
                )
            })? {
                ResolvedConstruction::Window { resistance } => SurfaceConstruction::Window {
                    resistance: *resistance,
                },
                ResolvedConstruction::Multilayer { layers, embedded } => match boundary {
                    // the surface declared first owns a shared partition
                    OutsideBoundary::Partition { paired } if paired < idx => {
                        match surfaces[paired].construction {
                            SurfaceConstruction::Multilayer { wall, .. } => {
                                SurfaceConstruction::Multilayer {
                                    wall,
                                    face: WallFace::Outside,
                                }
                            }
                            SurfaceConstruction::Window { .. } => {
                                bail!("Surface '{label}' is paired with a window")
                            }
                        }
                    }
                    _ => {
                        let wall = walls.len();
                        walls.push(
                            MultilayerWall::new(
                                &label,
                                layers,
                                *embedded,
                                temp_initial,
                                input.timestep,
                            )
                            .with_context(|| format!("Construction of surface '{label}'"))?,
                        );
                        match embedded.map(|embedded| embedded.kind) {
                            Some(EmbeddedKind::RadiantPanel) => panels.push(Panel {
                                name: label.as_str().into(),
                                wall,
                                area: surface.area,
                            }),
                            Some(EmbeddedKind::SolarCollector { .. }) => {
                                collectors.push(Collector {
                                    name: label.as_str().into(),
                                    wall,
                                })
                            }
                            None => {}
                        }
                        SurfaceConstruction::Multilayer {
                            wall,
                            face: WallFace::Inside,
                        }
                    }
                },
            };

            surfaces.push(Surface::new(
                surface_name,
                room_idx,
                surface.class,
                surface.area,
                surface.emissivity,
                surface.solar_fraction,
                construction,
                boundary,
                surface.convective_coefficient,
                temp_initial,
            ));
        }
    }

    let mut rooms = vec![];
    let mut start = 0;
    for (room_idx, (room_name, room)) in input.rooms.iter().enumerate() {
        if room.volume <= 0. {
            bail!("Room '{room_name}' must have a positive volume");
        }
        let end = start + room.surfaces.len();
        let furniture = match &room.furniture {
            None => None,
            Some(furniture) => {
                validate_furniture(room_name, furniture)?;
                let pcm = match &furniture.pcm {
                    None => None,
                    Some(pcm) => Some(FurniturePcm {
                        material: catalog.pcm(&pcm.material).ok_or_else(|| {
                            anyhow!(
                                "Furniture of room '{room_name}' uses unknown phase-change material '{}'",
                                pcm.material
                            )
                        })?,
                        volume: pcm.volume,
                    }),
                };
                Some(Furniture::new(
                    furniture.capacity,
                    furniture.conductance,
                    furniture.solar_fraction,
                    furniture.moisture_capacity,
                    pcm,
                    temp_initial,
                ))
            }
        };
        rooms.push(
            Room::new(
                room_name,
                room_idx,
                room.volume,
                room.air_capacity_factor,
                start..end,
                furniture,
                &surfaces,
                temp_initial,
                input.initial_humidity,
            )
            .with_context(|| format!("Radiative exchange network of room '{room_name}'"))?,
        );
        start = end;
    }

    Envelope::new(
        input.timestep,
        surfaces,
        walls,
        rooms,
        panels,
        collectors,
    )
}
