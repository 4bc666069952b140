
use crate::core::envelope::network::{ExteriorConditions, ExteriorIrradiance, StepConditions};
use crate::input::Input;
use serde_json::{json, Value};
use std::io;
use std::sync::{Arc, Mutex};
use tracing::Level;

pub(crate) fn to_input(model: Value) -> Input {
    serde_json::from_value(model).unwrap()
}

/// Two rooms sharing a partition, each with a ground floor, an adiabatic ceiling and exterior
/// surfaces; the living room also has a window.
pub(crate) fn two_room_model() -> Value {
    json!({
        "Timestep": 3600,
        "InitialTemperature": 20,
        "InitialHumidity": 0.008,
        "Constructions": {
            "external_wall": {"type": "Multilayer", "layers": [
                {"material": "plasterboard", "thickness": 0.0125},
                {"material": "glass_wool", "thickness": 0.1, "divisions": 2},
                {"material": "brick", "thickness": 0.1, "divisions": 2}
            ]},
            "partition": {"type": "Multilayer", "layers": [
                {"material": "plasterboard", "thickness": 0.0125},
                {"material": "timber", "thickness": 0.05, "divisions": 2},
                {"material": "plasterboard", "thickness": 0.0125}
            ]},
            "slab": {"type": "Multilayer", "layers": [
                {"material": "concrete", "thickness": 0.15, "divisions": 3}
            ]},
            "glazing": {"type": "Window", "resistance": 0.15}
        },
        "Rooms": {
            "living": {
                "volume": 60,
                "surfaces": {
                    "floor": {"class": "Floor", "area": 24, "construction": "slab", "solar_fraction": 0.6,
                              "boundary": {"type": "Ground", "temperature": 10, "conductance": 1.5}},
                    "ceiling": {"class": "Ceiling", "area": 24, "construction": "slab", "solar_fraction": 0.1,
                                "boundary": {"type": "Adiabatic"}},
                    "north": {"class": "Wall", "area": 12, "construction": "external_wall",
                              "boundary": {"type": "Exterior", "exterior_index": 0}},
                    "window": {"class": "Window", "area": 4, "construction": "glazing",
                               "boundary": {"type": "Exterior", "exterior_index": 1}},
                    "party": {"class": "Wall", "area": 15, "construction": "partition", "solar_fraction": 0.3,
                              "boundary": {"type": "Partition", "room": "bedroom", "surface": "party"}}
                }
            },
            "bedroom": {
                "volume": 30,
                "surfaces": {
                    "floor": {"class": "Floor", "area": 12, "construction": "slab", "solar_fraction": 0.7,
                              "boundary": {"type": "Ground", "temperature": 10, "conductance": 1.5}},
                    "ceiling": {"class": "Ceiling", "area": 12, "construction": "slab", "solar_fraction": 0.1,
                                "boundary": {"type": "Adiabatic"}},
                    "party": {"class": "Wall", "area": 15, "construction": "partition", "solar_fraction": 0.2,
                              "boundary": {"type": "Partition", "room": "living", "surface": "party"}},
                    "east": {"class": "Wall", "area": 9, "construction": "external_wall",
                             "boundary": {"type": "Exterior", "exterior_index": 2}}
                }
            }
        }
    })
}

/// One room whose surfaces are all adiabatic apart from an optional window.
pub(crate) fn single_room_model(with_window: bool) -> Value {
    let mut model = json!({
        "Timestep": 3600,
        "InitialTemperature": 20,
        "Constructions": {
            "light_wall": {"type": "Multilayer", "layers": [
                {"material": "plasterboard", "thickness": 0.0125},
                {"material": "timber", "thickness": 0.05, "divisions": 2}
            ]},
            "slab": {"type": "Multilayer", "layers": [
                {"material": "concrete", "thickness": 0.1, "divisions": 2}
            ]},
            "heated_ceiling": {"type": "Multilayer",
                "layers": [
                    {"material": "plasterboard", "thickness": 0.0125},
                    {"material": "concrete", "thickness": 0.1, "divisions": 2}
                ],
                "embedded": {"type": "RadiantPanel", "after_layer": 0}},
            "glazing": {"type": "Window", "resistance": 0.15}
        },
        "Rooms": {
            "studio": {
                "volume": 40,
                "surfaces": {
                    "floor": {"class": "Floor", "area": 16, "construction": "slab", "solar_fraction": 1.0,
                              "boundary": {"type": "Adiabatic"}},
                    "ceiling": {"class": "Ceiling", "area": 16, "construction": "heated_ceiling",
                                "boundary": {"type": "Adiabatic"}},
                    "walls": {"class": "Wall", "area": 40, "construction": "light_wall",
                              "boundary": {"type": "Adiabatic"}}
                }
            }
        }
    });
    if with_window {
        model["Rooms"]["studio"]["surfaces"]["window"] = json!({
            "class": "Window", "area": 6, "construction": "glazing",
            "boundary": {"type": "Exterior", "exterior_index": 0,
                         "film": {"type": "Fixed", "coefficient": 25}}
        });
    }
    model
}

/// Hourly steps with a fixed outdoor temperature, no sun and a light wind.
pub(crate) fn constant_conditions(
    hours: usize,
    air_temperature: f64,
    exterior_surfaces: usize,
) -> Vec<StepConditions> {
    vec![
        StepConditions {
            exterior: ExteriorConditions {
                air_temperature,
                humidity: 0.003,
                wind_speed: 3.,
                surfaces: vec![ExteriorIrradiance::default(); exterior_surfaces],
            },
            ..Default::default()
        };
        hours
    ]
}

#[derive(Clone, Debug, Default)]
struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Run a closure on the current thread and return what it logged at `WARN` and above.
pub(crate) fn capture_warnings<T>(f: impl FnOnce() -> T) -> (T, String) {
    let logs = CapturedLogs::default();
    let writer = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || writer.clone())
        .with_max_level(Level::WARN)
        .with_ansi(false)
        .finish();
    let result = tracing::subscriber::with_default(subscriber, f);
    let output = String::from_utf8(logs.0.lock().unwrap().clone()).unwrap();
    (result, output)
}
