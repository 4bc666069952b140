/// Inside convective and radiative film coefficients, and outdoor film coefficients, for the
/// surfaces of a room. Changing a coefficient by more than `FILM_CHANGE_TOLERANCE` since it was
/// last used marks the surface dirty, which is what triggers the downstream rebuilds.
use crate::core::envelope::radiative_exchange::RadiativeExchange;
use crate::core::envelope::surface::{OutdoorFilm, Surface, SurfaceClass};
use crate::core::units::{linearised_radiative_coefficient, BelowAbsoluteZeroError};
use tracing::warn;

/// Change in a film coefficient (W/m2K) that counts as material for downstream coefficients
pub(crate) const FILM_CHANGE_TOLERANCE: f64 = 1e-3;
/// Change in a room's mean surface temperature (K) that requires new radiative coefficients
pub(crate) const MEAN_TEMPERATURE_TOLERANCE: f64 = 1e-5;

/// Lower bound for natural convection so that a zero temperature difference still couples
/// the surface to the air, in W / (m2.K)
const H_CONVECTIVE_MIN: f64 = 0.1;

const FILM_SANE_MIN: f64 = 0.1;
const FILM_SANE_MAX: f64 = 100.;

/// `C.|dT|^p` natural convection correlation
#[derive(Clone, Copy, Debug, PartialEq)]
struct Correlation {
    coefficient: f64,
    exponent: f64,
}

// heat flow upwards from a horizontal surface (warm floor, cold ceiling)
const UPWARD: Correlation = Correlation {
    coefficient: 2.18,
    exponent: 0.31,
};
// heat flow downwards (cold floor, warm ceiling)
const DOWNWARD: Correlation = Correlation {
    coefficient: 0.138,
    exponent: 0.25,
};
const VERTICAL: Correlation = Correlation {
    coefficient: 1.78,
    exponent: 0.32,
};

fn correlation_for(class: SurfaceClass, temp_diff: f64) -> Correlation {
    match class {
        SurfaceClass::Floor if temp_diff > 0. => UPWARD,
        SurfaceClass::Floor => DOWNWARD,
        SurfaceClass::Ceiling if temp_diff < 0. => UPWARD,
        SurfaceClass::Ceiling => DOWNWARD,
        SurfaceClass::Wall | SurfaceClass::Window | SurfaceClass::Other => VERTICAL,
    }
}

/// Inside convective coefficient from the empirical correlations, in W / (m2.K)
///
/// * `class` - surface class selecting the correlation
/// * `temp_surface` - inside surface temperature, in deg C
/// * `temp_air` - room air temperature, in deg C
pub fn natural_convection_coefficient(class: SurfaceClass, temp_surface: f64, temp_air: f64) -> f64 {
    let temp_diff = temp_surface - temp_air;
    let correlation = correlation_for(class, temp_diff);
    let h = correlation.coefficient * temp_diff.abs().powf(correlation.exponent);

    h.max(H_CONVECTIVE_MIN)
}

/// Pick the convective coefficient for a surface: a scheduled value wins over a fixed one, and
/// either only applies when non-negative.
pub(crate) fn convective_coefficient(
    surface: &Surface,
    scheduled: Option<f64>,
    temp_air: f64,
) -> f64 {
    match scheduled.or(surface.convective_override) {
        Some(h) if h >= 0. => h,
        _ => natural_convection_coefficient(surface.class, surface.temp_prev, temp_air),
    }
}

/// Effective wind speed at the surface, in m/s
fn surface_wind_speed(wind_speed: f64, windward: bool) -> f64 {
    if windward {
        if wind_speed > 2. {
            0.25 * wind_speed
        } else {
            0.5
        }
    } else {
        0.3 + 0.05 * wind_speed
    }
}

/// Outdoor combined (convective plus linearised radiative) film coefficient, in W / (m2.K)
pub(crate) fn outdoor_film_coefficient(
    film: OutdoorFilm,
    scheduled: Option<f64>,
    wind_speed: f64,
    windward: bool,
    emissivity: f64,
    temp_outdoor: f64,
) -> Result<f64, BelowAbsoluteZeroError> {
    let wind_model = || -> Result<f64, BelowAbsoluteZeroError> {
        let h_convective = 5.8 + 3.9 * surface_wind_speed(wind_speed, windward);
        Ok(h_convective + emissivity * linearised_radiative_coefficient(temp_outdoor)?)
    };

    match film {
        OutdoorFilm::Fixed { coefficient } => Ok(coefficient),
        OutdoorFilm::Scheduled => match scheduled {
            Some(h) if h >= 0. => Ok(h),
            _ => wind_model(),
        },
        OutdoorFilm::Wind => wind_model(),
    }
}

/// Store a new convective coefficient and mark the surface dirty if it moved materially.
pub(crate) fn update_convective(surface: &mut Surface, h_convective: f64) {
    surface.film.convective = h_convective;
    if (h_convective - surface.film.convective_used).abs() > FILM_CHANGE_TOLERANCE {
        surface.dirty = true;
    }
}

/// Store a new outdoor film coefficient and mark the surface dirty if it moved materially.
pub(crate) fn update_outdoor(surface: &mut Surface, h_outdoor: f64) {
    surface.film.outdoor = h_outdoor;
    if (h_outdoor - surface.film.outdoor_used).abs() > FILM_CHANGE_TOLERANCE {
        surface.dirty = true;
    }
}

/// Sol-air temperature driving the outside face of an exterior surface, in deg C
///
/// * `temp_outdoor` - outdoor air temperature, in deg C
/// * `solar_absorptance` - short-wave absorptance of the outside face
/// * `incident_solar` - irradiance on the outside face, in W / m2
/// * `emissivity` - long-wave emissivity of the outside face
/// * `night_radiation` - net long-wave loss to the sky, in W / m2
/// * `h_outdoor` - outdoor film coefficient, in W / (m2.K)
pub(crate) fn sol_air_temperature(
    temp_outdoor: f64,
    solar_absorptance: f64,
    incident_solar: f64,
    emissivity: f64,
    night_radiation: f64,
    h_outdoor: f64,
) -> f64 {
    if h_outdoor <= 0. {
        return temp_outdoor;
    }
    temp_outdoor + (solar_absorptance * incident_solar - emissivity * night_radiation) / h_outdoor
}

/// Area-weighted mean of the previous-step surface temperatures of a room, in deg C
pub(crate) fn room_mean_surface_temperature(surfaces: &[Surface]) -> f64 {
    let area_total: f64 = surfaces.iter().map(|s| s.area).sum();
    surfaces.iter().map(|s| s.area * s.temp_prev).sum::<f64>() / area_total
}

/// Radiative coefficients for every surface of a room. Recomputed only when the room mean
/// temperature has moved by more than `MEAN_TEMPERATURE_TOLERANCE` or when `force` is set
/// (a dirty surface or a rebuilt exchange network). Returns the mean temperature and the
/// linearised coefficient 4.sigma.Tm^3 when they were recomputed.
pub(crate) fn update_radiative(
    surfaces: &mut [Surface],
    exchange: &RadiativeExchange,
    temp_mean_used: Option<f64>,
    force: bool,
) -> Result<Option<(f64, f64)>, BelowAbsoluteZeroError> {
    let temp_mean = room_mean_surface_temperature(surfaces);
    let unchanged = temp_mean_used
        .is_some_and(|used| (temp_mean - used).abs() <= MEAN_TEMPERATURE_TOLERANCE);
    if unchanged && !force {
        return Ok(None);
    }

    let h_black = linearised_radiative_coefficient(temp_mean)?;
    for (i, surface) in surfaces.iter_mut().enumerate() {
        let h_radiative = h_black * exchange.row_sum_excluding_self(i);
        surface.film.radiative = h_radiative;
        if (h_radiative - surface.film.radiative_used).abs() > FILM_CHANGE_TOLERANCE {
            surface.dirty = true;
        }
    }

    Ok(Some((temp_mean, h_black)))
}

/// Warn about film coefficients outside the plausible envelope. Execution continues.
pub(crate) fn check_film_envelope(surface: &Surface) {
    let h_inside = surface.film.inside();
    if !(FILM_SANE_MIN..=FILM_SANE_MAX).contains(&h_inside) {
        warn!(
            "Inside film coefficient {h_inside:.3} W/m2K of surface '{}' is outside the expected range",
            surface.name
        );
    }
    if surface.film.outdoor != 0. && !(FILM_SANE_MIN..=FILM_SANE_MAX).contains(&surface.film.outdoor)
    {
        warn!(
            "Outdoor film coefficient {:.3} W/m2K of surface '{}' is outside the expected range",
            surface.film.outdoor, surface.name
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::envelope::surface::{OutsideBoundary, SurfaceConstruction};
    use crate::tests::capture_warnings;
    use approx::assert_relative_eq;
    use rstest::*;

    fn surface(class: SurfaceClass, temp: f64, convective_override: Option<f64>) -> Surface {
        Surface::new(
            "test",
            0,
            class,
            10.,
            0.9,
            0.,
            SurfaceConstruction::Window { resistance: 0.2 },
            OutsideBoundary::Adiabatic,
            convective_override,
            temp,
        )
    }

    #[rstest]
    #[case(SurfaceClass::Floor, 24., 20., 2.18 * 1.5368752)]
    #[case(SurfaceClass::Floor, 16., 20., 0.138 * 1.4142136)]
    #[case(SurfaceClass::Ceiling, 16., 20., 2.18 * 1.5368752)]
    #[case(SurfaceClass::Ceiling, 24., 20., 0.138 * 1.4142136)]
    #[case(SurfaceClass::Wall, 24., 20., 1.78 * 1.5583291)]
    #[case(SurfaceClass::Other, 16., 20., 1.78 * 1.5583291)]
    fn test_natural_convection_correlations(
        #[case] class: SurfaceClass,
        #[case] temp_surface: f64,
        #[case] temp_air: f64,
        #[case] expected: f64,
    ) {
        assert_relative_eq!(
            natural_convection_coefficient(class, temp_surface, temp_air),
            expected,
            max_relative = 1e-6
        );
    }

    #[rstest]
    #[case(5., 0., 0)]
    #[case(150., 0., 1)]
    #[case(5., 150., 1)]
    #[case(0.01, 200., 2)]
    fn test_film_envelope_warnings(
        #[case] h_convective: f64,
        #[case] h_outdoor: f64,
        #[case] expected: usize,
    ) {
        let mut wall = surface(SurfaceClass::Wall, 20., None);
        update_convective(&mut wall, h_convective);
        update_outdoor(&mut wall, h_outdoor);

        let ((), logs) = capture_warnings(|| check_film_envelope(&wall));

        assert_eq!(logs.matches("outside the expected range").count(), expected);
    }

    #[rstest]
    fn test_natural_convection_has_floor_value() {
        assert_relative_eq!(
            natural_convection_coefficient(SurfaceClass::Wall, 20., 20.),
            H_CONVECTIVE_MIN
        );
    }

    #[rstest]
    fn test_override_precedence() {
        let fixed = surface(SurfaceClass::Wall, 24., Some(3.0));
        assert_relative_eq!(convective_coefficient(&fixed, None, 20.), 3.0);
        assert_relative_eq!(convective_coefficient(&fixed, Some(5.0), 20.), 5.0);
        // negative overrides fall back to the correlation
        let negative = surface(SurfaceClass::Wall, 24., Some(-1.0));
        assert_relative_eq!(
            convective_coefficient(&negative, None, 20.),
            natural_convection_coefficient(SurfaceClass::Wall, 24., 20.)
        );
    }

    #[rstest]
    fn test_outdoor_film_modes() {
        assert_relative_eq!(
            outdoor_film_coefficient(OutdoorFilm::Fixed { coefficient: 23. }, None, 4., true, 0.9, 5.)
                .unwrap(),
            23.
        );

        let h_rad = 0.9 * linearised_radiative_coefficient(5.).unwrap();
        assert_relative_eq!(
            outdoor_film_coefficient(OutdoorFilm::Wind, None, 4., true, 0.9, 5.).unwrap(),
            5.8 + 3.9 * 1.0 + h_rad
        );
        assert_relative_eq!(
            outdoor_film_coefficient(OutdoorFilm::Wind, None, 1., true, 0.9, 5.).unwrap(),
            5.8 + 3.9 * 0.5 + h_rad
        );
        assert_relative_eq!(
            outdoor_film_coefficient(OutdoorFilm::Wind, None, 4., false, 0.9, 5.).unwrap(),
            5.8 + 3.9 * 0.5 + h_rad
        );
        assert_relative_eq!(
            outdoor_film_coefficient(OutdoorFilm::Scheduled, Some(12.), 4., true, 0.9, 5.)
                .unwrap(),
            12.
        );
    }

    #[rstest]
    fn test_sol_air_temperature() {
        assert_relative_eq!(sol_air_temperature(5., 0.6, 400., 0.9, 50., 20.), 14.75);
        assert_relative_eq!(sol_air_temperature(5., 0.6, 0., 0.9, 50., 20.), 2.75);
        assert_relative_eq!(sol_air_temperature(5., 0.6, 400., 0.9, 50., 0.), 5.);
    }

    #[rstest]
    fn test_dirty_mark_only_on_material_change() {
        let mut s = surface(SurfaceClass::Wall, 20., None);
        s.dirty = false;
        s.film.convective_used = 2.5;

        update_convective(&mut s, 2.5005);
        assert!(!s.is_dirty());

        update_convective(&mut s, 2.6);
        assert!(s.is_dirty());
    }
}
