use crate::core::envelope::pcm::PcmMaterial;
use crate::core::envelope::surface::{OutdoorFilm, SurfaceClass};
use crate::core::material_properties::BuildingMaterial;
use indexmap::IndexMap;
use serde::Deserialize;
use smartstring::alias::String;
use std::io::{BufReader, Read};

pub fn parse_input(json: impl Read) -> anyhow::Result<Input> {
    Ok(serde_json::from_reader(BufReader::new(json))?)
}

fn default_initial_temperature() -> f64 {
    20.
}

fn default_emissivity() -> f64 {
    0.9
}

fn default_solar_absorptance() -> f64 {
    0.7
}

fn default_outdoor_film() -> OutdoorFilm {
    OutdoorFilm::Wind
}

fn default_divisions() -> usize {
    1
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase", deny_unknown_fields)]
pub struct Input {
    /// in seconds
    pub timestep: f64,
    /// in deg C
    #[serde(default = "default_initial_temperature")]
    pub initial_temperature: f64,
    /// in kg/kg
    #[serde(default)]
    pub initial_humidity: f64,
    /// materials added to (or replacing) the built-in catalog
    #[serde(default)]
    pub materials: IndexMap<String, BuildingMaterial>,
    #[serde(default)]
    pub phase_change_materials: Vec<PcmMaterial>,
    pub constructions: IndexMap<String, ConstructionInput>,
    pub rooms: IndexMap<String, RoomInput>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "type", deny_unknown_fields)]
pub enum ConstructionInput {
    Multilayer {
        /// ordered from the inside face to the outside face
        layers: Vec<LayerInput>,
        #[serde(default)]
        embedded: Option<EmbeddedInput>,
    },
    Window {
        /// glazing resistance excluding both films, in m2.K/W
        resistance: f64,
    },
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LayerInput {
    /// material code, e.g. `concrete` or `concrete(ParaffinWax28_0.30)`
    pub material: String,
    /// in m
    pub thickness: f64,
    #[serde(default = "default_divisions")]
    pub divisions: usize,
}

#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(tag = "type", deny_unknown_fields)]
pub enum EmbeddedInput {
    RadiantPanel {
        after_layer: usize,
    },
    SolarCollector {
        after_layer: usize,
        /// in W / (m2.K)
        conductance: f64,
    },
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RoomInput {
    /// in m3
    pub volume: f64,
    #[serde(default)]
    pub air_capacity_factor: f64,
    #[serde(default)]
    pub furniture: Option<FurnitureInput>,
    pub surfaces: IndexMap<String, SurfaceInput>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FurnitureInput {
    /// in J / K
    pub capacity: f64,
    /// in W / K
    pub conductance: f64,
    #[serde(default)]
    pub solar_fraction: f64,
    /// in kg
    #[serde(default)]
    pub moisture_capacity: f64,
    #[serde(default)]
    pub pcm: Option<FurniturePcmInput>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FurniturePcmInput {
    pub material: String,
    /// in m3
    pub volume: f64,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SurfaceInput {
    pub class: SurfaceClass,
    /// in m2
    pub area: f64,
    #[serde(default = "default_emissivity")]
    pub emissivity: f64,
    /// share of the room's transmitted solar absorbed here
    #[serde(default)]
    pub solar_fraction: f64,
    /// name of an entry in `Constructions`
    pub construction: String,
    pub boundary: BoundaryInput,
    /// fixed inside convective coefficient, in W / (m2.K)
    #[serde(default)]
    pub convective_coefficient: Option<f64>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "type", deny_unknown_fields)]
pub enum BoundaryInput {
    Exterior {
        /// position of this surface in the per-step exterior irradiance list
        exterior_index: usize,
        #[serde(default = "default_solar_absorptance")]
        solar_absorptance: f64,
        #[serde(default = "default_emissivity")]
        emissivity: f64,
        #[serde(default = "default_outdoor_film")]
        film: OutdoorFilm,
    },
    /// Shared partition with a surface of another (or the same) room
    Partition { room: String, surface: String },
    Ground {
        /// in deg C
        temperature: f64,
        /// in W / (m2.K)
        conductance: f64,
    },
    Adiabatic,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::*;

    #[rstest]
    fn test_parse_minimal_model() {
        let json = r#"{
            "Timestep": 3600,
            "Constructions": {
                "slab": {"type": "Multilayer", "layers": [{"material": "concrete", "thickness": 0.2, "divisions": 4}]},
                "glazing": {"type": "Window", "resistance": 0.15}
            },
            "Rooms": {
                "living": {
                    "volume": 50,
                    "surfaces": {
                        "floor": {"class": "Floor", "area": 20, "construction": "slab", "solar_fraction": 1.0,
                                  "boundary": {"type": "Ground", "temperature": 10, "conductance": 2.0}},
                        "window": {"class": "Window", "area": 4, "construction": "glazing",
                                   "boundary": {"type": "Exterior", "exterior_index": 0, "film": {"type": "Fixed", "coefficient": 23}}}
                    }
                }
            }
        }"#;

        let input = parse_input(json.as_bytes()).unwrap();
        assert_eq!(input.initial_temperature, 20.);
        assert_eq!(input.rooms["living"].surfaces.len(), 2);
        assert!(matches!(
            input.rooms["living"].surfaces["window"].boundary,
            BoundaryInput::Exterior {
                film: OutdoorFilm::Fixed { .. },
                ..
            }
        ));
        assert!(matches!(
            &input.constructions["slab"],
            ConstructionInput::Multilayer { layers, embedded: None } if layers[0].divisions == 4
        ));
    }

    #[rstest]
    fn test_rejects_unknown_fields() {
        let json = r#"{"Timestep": 3600, "Constructions": {}, "Rooms": {}, "Weather": {}}"#;
        assert!(parse_input(json.as_bytes()).is_err());
    }
}
