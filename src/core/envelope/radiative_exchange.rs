/// Long-wave exchange between the surfaces of one room, using the well-mixed enclosure
/// approximation for view factors (F_ij = A_j / A_room) and Gebhart absorption factors.
use crate::core::solvers::{invert, multiply_vector, SingularMatrixError};
use nalgebra::DMatrix;
use tracing::{debug, warn};

/// Allowed deviation of a Gebhart row sum from unity before a warning is logged
const ROW_SUM_TOLERANCE: f64 = 1e-3;

/// Warn about surfaces whose Gebhart factors do not sum to unity. Returns how many there are.
fn check_row_sums(gebhart: &DMatrix<f64>) -> usize {
    let mut flagged = 0;
    for (i, row) in gebhart.row_iter().enumerate() {
        let row_sum: f64 = row.sum();
        if (row_sum - 1.).abs() > ROW_SUM_TOLERANCE {
            warn!("Radiative exchange factors of surface {i} sum to {row_sum:.5} rather than 1");
            flagged += 1;
        }
    }
    flagged
}

#[derive(Clone, Debug)]
pub struct RadiativeExchange {
    /// Gebhart factors: fraction of the emission of surface i absorbed by surface j
    gebhart: DMatrix<f64>,
    /// emissivity-weighted Gebhart factors; multiplied by 4.sigma.Tm^3 they give the
    /// linearised exchange coefficient hr_ij in W / (m2.K)
    exchange: DMatrix<f64>,
}

impl RadiativeExchange {
    /// Assemble and invert the exchange network of a room.
    ///
    /// * `areas` - surface areas, in m2
    /// * `emissivities` - long-wave emissivities of the same surfaces
    pub(crate) fn new(areas: &[f64], emissivities: &[f64]) -> Result<Self, SingularMatrixError> {
        let n = areas.len();
        assert_eq!(n, emissivities.len());
        let area_total: f64 = areas.iter().sum();

        let view_factors = DMatrix::from_fn(n, n, |_, j| areas[j] / area_total);

        // M = I - F.diag(1 - eps)
        let mut reflection = DMatrix::from_fn(n, n, |i, j| {
            let delta = if i == j { 1. } else { 0. };
            delta - view_factors[(i, j)] * (1. - emissivities[j])
        });
        invert(&mut reflection)?;

        let mut gebhart = DMatrix::zeros(n, n);
        for j in 0..n {
            let column: Vec<f64> = (0..n)
                .map(|k| view_factors[(k, j)] * emissivities[j])
                .collect();
            for (i, value) in multiply_vector(&reflection, &column).into_iter().enumerate() {
                gebhart[(i, j)] = value;
            }
        }

        check_row_sums(&gebhart);

        let exchange = DMatrix::from_fn(n, n, |i, j| emissivities[i] * gebhart[(i, j)]);
        debug!("Rebuilt radiative exchange network for {n} surfaces");

        Ok(Self { gebhart, exchange })
    }

    pub fn surface_count(&self) -> usize {
        self.exchange.nrows()
    }

    pub fn gebhart_factor(&self, i: usize, j: usize) -> f64 {
        self.gebhart[(i, j)]
    }

    /// Emissivity-weighted exchange factor between two surfaces of the room
    pub fn coefficient(&self, i: usize, j: usize) -> f64 {
        self.exchange[(i, j)]
    }

    /// Sum of the exchange factors of surface `i` with every other surface
    pub(crate) fn row_sum_excluding_self(&self, i: usize) -> f64 {
        (0..self.surface_count())
            .filter(|&j| j != i)
            .map(|j| self.exchange[(i, j)])
            .sum()
    }

    /// Mean radiant temperature seen by surface `i`: the exchange-weighted average of the
    /// other surfaces' temperatures. A surface with nothing to exchange with sees itself.
    pub fn mean_radiant_temperature(&self, i: usize, temps: &[f64]) -> f64 {
        let weight = self.row_sum_excluding_self(i);
        if weight <= 0. {
            return temps[i];
        }
        (0..self.surface_count())
            .filter(|&j| j != i)
            .map(|j| self.exchange[(i, j)] * temps[j])
            .sum::<f64>()
            / weight
    }
}
