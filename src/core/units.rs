use thiserror::Error;

/// Stefan-Boltzmann constant, in W / (m2.K4)
pub const STEFAN_BOLTZMANN: f64 = 5.670_374_419e-8;

const ABSOLUTE_ZERO_CELSIUS: f64 = -273.15;

pub(crate) fn celsius_to_kelvin(temp_c: f64) -> Result<f64, BelowAbsoluteZeroError> {
    if temp_c < ABSOLUTE_ZERO_CELSIUS {
        Err(BelowAbsoluteZeroError::from_c(temp_c))
    } else {
        Ok(temp_c - ABSOLUTE_ZERO_CELSIUS)
    }
}

/// Linearised black-body radiative coefficient 4.sigma.T^3 at a mean temperature given in Celsius,
/// in W / (m2.K)
pub(crate) fn linearised_radiative_coefficient(temp_mean_c: f64) -> Result<f64, BelowAbsoluteZeroError> {
    let temp_mean_k = celsius_to_kelvin(temp_mean_c)?;
    Ok(4. * STEFAN_BOLTZMANN * temp_mean_k.powi(3))
}

#[derive(Debug, Error)]
#[error("A temperature of {k}ºK/{}ºC was encountered, which is less than absolute zero", k - 273.15)]
pub struct BelowAbsoluteZeroError {
    k: f64,
}

impl BelowAbsoluteZeroError {
    fn from_c(c: f64) -> Self {
        Self { k: c + 273.15 }
    }
}
