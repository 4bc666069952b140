/// This module contains data on the properties of building materials, the catalog used to
/// resolve the material codes given for wall layers, and the parser for those codes.
use crate::core::envelope::pcm::PcmMaterial;
use indexmap::IndexMap;
use serde::Deserialize;
use smartstring::alias::String;
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use std::sync::{Arc, LazyLock};
use thiserror::Error;

#[derive(Clone, Copy, Debug)]
pub struct MaterialProperties {
    density: f64,                  // kg/m3
    specific_heat_capacity: f64,   // J/(kg.K)
    volumetric_heat_capacity: f64, // J/(m3.K)
}

impl MaterialProperties {
    pub fn new(density: f64, specific_heat_capacity: f64) -> Self {
        Self {
            density,
            specific_heat_capacity,
            volumetric_heat_capacity: specific_heat_capacity * density,
        }
    }

    pub fn density(&self) -> f64 {
        self.density
    }

    pub fn specific_heat_capacity(&self) -> f64 {
        self.specific_heat_capacity
    }

    pub fn volumetric_heat_capacity(&self) -> f64 {
        self.volumetric_heat_capacity
    }
}

pub static AIR: LazyLock<MaterialProperties> =
    LazyLock::new(|| MaterialProperties::new(1.204, 1006.0));

/// Homogeneous material of a wall layer.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct BuildingMaterial {
    /// in W / (m.K)
    pub conductivity: f64,
    /// in J / (m3.K)
    pub volumetric_heat_capacity: f64,
}

impl BuildingMaterial {
    pub const fn new(conductivity: f64, volumetric_heat_capacity: f64) -> Self {
        Self {
            conductivity,
            volumetric_heat_capacity,
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq)]
pub enum MaterialError {
    #[error("Malformed material code '{code}': {reason}")]
    MalformedCode { code: String, reason: String },
    #[error("Unknown material '{name}' in material code '{code}'")]
    UnknownMaterial { code: String, name: String },
    #[error("Unknown phase-change material '{name}' in material code '{code}'")]
    UnknownPcm { code: String, name: String },
    #[error("Invalid definition for material '{name}': {reason}")]
    InvalidDefinition { name: String, reason: String },
}

/// A wall layer material code: either a plain base material (`concrete`) or a base material
/// with an embedded phase-change material and its volume fraction
/// (`concrete(ParaffinWax28_0.30)`).
#[derive(Clone, Debug, PartialEq)]
pub struct MaterialCode {
    base: String,
    pcm: Option<(String, f64)>,
}

impl MaterialCode {
    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn pcm_name(&self) -> Option<&str> {
        self.pcm.as_ref().map(|(name, _)| name.as_str())
    }

    pub fn pcm_volume_fraction(&self) -> Option<f64> {
        self.pcm.as_ref().map(|(_, fraction)| *fraction)
    }
}

impl FromStr for MaterialCode {
    type Err = MaterialError;

    fn from_str(code: &str) -> Result<Self, Self::Err> {
        let malformed = |reason: &str| MaterialError::MalformedCode {
            code: code.into(),
            reason: reason.into(),
        };

        let code_trimmed = code.trim();
        let (base, pcm_part) = match code_trimmed.split_once('(') {
            None => {
                if code_trimmed.contains(')') {
                    return Err(malformed("unbalanced parentheses"));
                }
                (code_trimmed, None)
            }
            Some((base, rest)) => {
                let inner = rest
                    .strip_suffix(')')
                    .ok_or_else(|| malformed("expected ')' at end of code"))?;
                if inner.contains('(') || inner.contains(')') {
                    return Err(malformed("unbalanced parentheses"));
                }
                (base.trim(), Some(inner.trim()))
            }
        };

        if base.is_empty() {
            return Err(malformed("missing base material"));
        }

        let pcm = match pcm_part {
            None => None,
            Some(inner) => {
                let (name, fraction) = inner
                    .rsplit_once('_')
                    .ok_or_else(|| malformed("expected PCMname_volumeFraction inside parentheses"))?;
                if name.is_empty() {
                    return Err(malformed("missing PCM name"));
                }
                let fraction = fraction
                    .parse::<f64>()
                    .map_err(|_| malformed("volume fraction is not a number"))?;
                if !(fraction > 0. && fraction <= 1.) {
                    return Err(malformed("volume fraction must be in (0, 1]"));
                }
                Some((name.into(), fraction))
            }
        };

        Ok(Self {
            base: base.into(),
            pcm,
        })
    }
}

impl Display for MaterialCode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.pcm {
            None => write!(f, "{}", self.base),
            Some((name, fraction)) => write!(f, "{}({}_{})", self.base, name, fraction),
        }
    }
}

#[derive(Clone, Debug)]
pub struct PcmInclusion {
    pub material: Arc<PcmMaterial>,
    pub volume_fraction: f64,
}

/// A material code resolved against a catalog.
#[derive(Clone, Debug)]
pub struct ResolvedMaterial {
    pub base: BuildingMaterial,
    pub pcm: Option<PcmInclusion>,
}

#[derive(Clone, Debug)]
pub struct MaterialCatalog {
    materials: IndexMap<String, BuildingMaterial>,
    pcms: IndexMap<String, Arc<PcmMaterial>>,
}

impl Default for MaterialCatalog {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl MaterialCatalog {
    pub fn empty() -> Self {
        Self {
            materials: Default::default(),
            pcms: Default::default(),
        }
    }

    /// Catalog holding the built-in materials and phase-change materials.
    pub fn with_defaults() -> Self {
        let mut catalog = Self::empty();
        for (name, material) in [
            ("concrete", BuildingMaterial::new(1.6, 2.0e6)),
            ("brick", BuildingMaterial::new(0.77, 1.39e6)),
            ("plasterboard", BuildingMaterial::new(0.22, 0.83e6)),
            ("timber", BuildingMaterial::new(0.15, 0.78e6)),
            ("glass_wool", BuildingMaterial::new(0.04, 8.4e3)),
            ("eps", BuildingMaterial::new(0.035, 3.75e4)),
            ("mortar", BuildingMaterial::new(1.5, 1.68e6)),
            ("air_layer", BuildingMaterial::new(0.15, 1.2e3)),
        ] {
            catalog.materials.insert(name.into(), material);
        }
        for pcm in [PcmMaterial::paraffin_wax_28(), PcmMaterial::salt_hydrate_24()] {
            catalog.pcms.insert(pcm.name.clone(), Arc::new(pcm));
        }

        catalog
    }

    pub fn add_material(
        &mut self,
        name: &str,
        material: BuildingMaterial,
    ) -> Result<(), MaterialError> {
        if material.conductivity <= 0. || material.volumetric_heat_capacity < 0. {
            return Err(MaterialError::InvalidDefinition {
                name: name.into(),
                reason: "conductivity must be positive and heat capacity non-negative".into(),
            });
        }
        self.materials.insert(name.into(), material);
        Ok(())
    }

    pub fn add_pcm(&mut self, pcm: PcmMaterial) -> Result<(), MaterialError> {
        pcm.validate()
            .map_err(|reason| MaterialError::InvalidDefinition {
                name: pcm.name.clone(),
                reason,
            })?;
        self.pcms.insert(pcm.name.clone(), Arc::new(pcm));
        Ok(())
    }

    pub fn pcm(&self, name: &str) -> Option<Arc<PcmMaterial>> {
        self.pcms.get(name).cloned()
    }

    /// Parse and resolve a layer material code.
    pub fn resolve(&self, code: &str) -> Result<ResolvedMaterial, MaterialError> {
        let parsed: MaterialCode = code.parse()?;

        let base = *self
            .materials
            .get(parsed.base())
            .ok_or_else(|| MaterialError::UnknownMaterial {
                code: code.into(),
                name: parsed.base().into(),
            })?;

        let pcm = match &parsed.pcm {
            None => None,
            Some((name, volume_fraction)) => Some(PcmInclusion {
                material: self.pcm(name).ok_or_else(|| MaterialError::UnknownPcm {
                    code: code.into(),
                    name: name.clone(),
                })?,
                volume_fraction: *volume_fraction,
            }),
        };

        Ok(ResolvedMaterial { base, pcm })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use pretty_assertions::assert_eq;
    use rstest::*;

    #[fixture]
    fn catalog() -> MaterialCatalog {
        MaterialCatalog::with_defaults()
    }

    #[rstest]
    fn test_air_properties() {
        assert_relative_eq!(AIR.density(), 1.204);
        assert_relative_eq!(AIR.specific_heat_capacity(), 1006.0);
        assert_relative_eq!(AIR.volumetric_heat_capacity(), 1211.224);
    }

    #[rstest]
    fn test_parse_plain_code() {
        let code: MaterialCode = "concrete".parse().unwrap();
        assert_eq!(code.base(), "concrete");
        assert_eq!(code.pcm_name(), None);
    }

    #[rstest]
    fn test_parse_pcm_code() {
        let code: MaterialCode = "concrete(ParaffinWax28_0.30)".parse().unwrap();
        assert_eq!(code.base(), "concrete");
        assert_eq!(code.pcm_name(), Some("ParaffinWax28"));
        assert_eq!(code.pcm_volume_fraction(), Some(0.3));
        assert_eq!(code.to_string(), "concrete(ParaffinWax28_0.3)");
    }

    #[rstest]
    fn test_parse_pcm_name_containing_underscore() {
        let code: MaterialCode = "brick(my_pcm_1)".parse().unwrap();
        assert_eq!(code.pcm_name(), Some("my_pcm"));
        assert_eq!(code.pcm_volume_fraction(), Some(1.0));
    }

    #[rstest]
    #[case("")]
    #[case("(ParaffinWax28_0.3)")]
    #[case("concrete(ParaffinWax28_0.3")]
    #[case("concrete(ParaffinWax28)")]
    #[case("concrete(ParaffinWax28_abc)")]
    #[case("concrete(ParaffinWax28_0)")]
    #[case("concrete(ParaffinWax28_1.5)")]
    #[case("concrete(_0.3)")]
    #[case("concrete)")]
    #[case("concrete(ParaffinWax28_0.3))")]
    fn test_malformed_codes_are_rejected(#[case] code: &str) {
        assert!(matches!(
            code.parse::<MaterialCode>(),
            Err(MaterialError::MalformedCode { .. })
        ));
    }

    #[rstest]
    fn test_resolve_code_with_pcm(catalog: MaterialCatalog) {
        let resolved = catalog.resolve("concrete(ParaffinWax28_0.30)").unwrap();
        assert_eq!(resolved.base, BuildingMaterial::new(1.6, 2.0e6));
        let pcm = resolved.pcm.unwrap();
        assert_eq!(pcm.material.name.as_str(), "ParaffinWax28");
        assert_relative_eq!(pcm.volume_fraction, 0.3);
    }

    #[rstest]
    fn test_resolve_unknown_names(catalog: MaterialCatalog) {
        assert!(matches!(
            catalog.resolve("unobtainium"),
            Err(MaterialError::UnknownMaterial { .. })
        ));
        assert!(matches!(
            catalog.resolve("concrete(Mystery_0.2)"),
            Err(MaterialError::UnknownPcm { .. })
        ));
    }

    #[rstest]
    fn test_rejects_invalid_definitions(mut catalog: MaterialCatalog) {
        assert!(catalog
            .add_material("bad", BuildingMaterial::new(0., 1e6))
            .is_err());
        let mut pcm = PcmMaterial::paraffin_wax_28();
        pcm.temp_solidus = 29.;
        assert!(catalog.add_pcm(pcm).is_err());
    }
}
