/// Inside surface temperatures of a group of rooms, solved together.
///
/// Each surface temperature is coupled to the other surfaces of its room through long-wave
/// exchange, to the room air and to radiant panels. Across a partition it is also coupled to the
/// air and, through the far face's own long-wave exchange, to the surfaces of the room on the far
/// side. Rooms linked by partitions therefore share one system. It is inverted only when
/// something it depends on is dirty, giving response coefficients of every surface temperature
/// to each room air temperature and to each panel's heat. The constant terms are folded in
/// every step.
use crate::core::envelope::multilayer_wall::FaceResponse;
use crate::core::envelope::room::Room;
use crate::core::envelope::surface::Surface;
use crate::core::solvers::{invert, multiply_vector, SingularMatrixError};
use indexmap::IndexMap;
use nalgebra::DMatrix;
use tracing::debug;

/// Temperature driving the far side of a surface for the coming step:
/// `constant + coefficient * Tr[room] + scale * sum(hr[p][k] * Ts[k])`, the last term being the
/// long-wave exchange of the paired surface `p` with the other surfaces `k` of its room.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub(crate) struct OppositeDrive {
    pub constant: f64,
    pub air: Option<(usize, f64)>,
    pub exchange: Option<(usize, f64)>,
}

fn inside_share(response: &FaceResponse, surface: &Surface) -> f64 {
    let h_inside = surface.film.inside();
    if h_inside > 0. {
        response.own / h_inside
    } else {
        0.
    }
}

/// Split rooms into groups connected by partitions, each group sorted and listed by its
/// lowest room index.
///
/// * `links` - pairs of rooms sharing a partition
pub(crate) fn link_rooms(
    room_count: usize,
    links: impl IntoIterator<Item = (usize, usize)>,
) -> Vec<Vec<usize>> {
    fn root(parent: &mut [usize], mut room: usize) -> usize {
        while parent[room] != room {
            parent[room] = parent[parent[room]];
            room = parent[room];
        }
        room
    }

    let mut parent: Vec<usize> = (0..room_count).collect();
    for (a, b) in links {
        let (root_a, root_b) = (root(&mut parent, a), root(&mut parent, b));
        parent[root_a.max(root_b)] = root_a.min(root_b);
    }

    let mut groups: IndexMap<usize, Vec<usize>> = IndexMap::new();
    for room in 0..room_count {
        let group = root(&mut parent, room);
        groups.entry(group).or_default().push(room);
    }
    groups.into_values().collect()
}

#[derive(Clone, Debug)]
pub(crate) struct SurfaceSystem {
    rooms: Vec<usize>,
    /// row of each surface of the group, keyed by global surface index
    rows: IndexMap<usize, usize>,
    inverse: DMatrix<f64>,
    /// surface temperature response to each room air temperature, keyed by room
    air: IndexMap<usize, Vec<f64>>,
    /// surface temperature response to each panel's heat, keyed by panel
    panels: IndexMap<usize, Vec<f64>>,
    /// constant part, refreshed every step
    constant: Vec<f64>,
}

impl SurfaceSystem {
    /// * `rooms` - indices of the rooms in the group
    /// * `all_rooms` - every room of the envelope
    pub(crate) fn new(rooms: Vec<usize>, all_rooms: &[Room]) -> Self {
        let rows = rooms
            .iter()
            .flat_map(|&room| all_rooms[room].surface_range())
            .enumerate()
            .map(|(row, surface)| (surface, row))
            .collect();
        Self {
            rooms,
            rows,
            inverse: DMatrix::zeros(0, 0),
            air: IndexMap::new(),
            panels: IndexMap::new(),
            constant: vec![],
        }
    }

    pub(crate) fn rooms(&self) -> &[usize] {
        &self.rooms
    }

    pub(crate) fn row(&self, surface: usize) -> usize {
        self.rows[&surface]
    }

    pub(crate) fn air_columns(&self) -> &IndexMap<usize, Vec<f64>> {
        &self.air
    }

    pub(crate) fn panel_columns(&self) -> &IndexMap<usize, Vec<f64>> {
        &self.panels
    }

    pub(crate) fn constant(&self) -> &[f64] {
        &self.constant
    }

    /// Subtract the long-wave exchange of `source` with the other surfaces of its room, scaled
    /// by `weight`, from row `row`.
    fn subtract_exchange(
        &self,
        matrix: &mut DMatrix<f64>,
        row: usize,
        source: usize,
        weight: f64,
        rooms: &[Room],
        surfaces: &[Surface],
    ) {
        let room = &rooms[surfaces[source].room];
        let start = room.surface_range().start;
        for other in room.surface_range().filter(|&other| other != source) {
            matrix[(row, self.row(other))] -=
                weight * room.radiative_coefficient(source - start, other - start);
        }
    }

    /// Assemble and invert the surface temperature system.
    ///
    /// * `rooms` - all rooms of the envelope
    /// * `surfaces` - all surfaces of the envelope
    /// * `responses` - face responses of all surfaces
    /// * `opposite` - far-side drives of all surfaces
    /// * `panel_areas` - wall area over which each panel's heat is spread, in m2
    pub(crate) fn rebuild(
        &mut self,
        rooms: &[Room],
        surfaces: &[Surface],
        responses: &[FaceResponse],
        opposite: &[OppositeDrive],
        panel_areas: &[f64],
    ) -> Result<(), SingularMatrixError> {
        let n = self.rows.len();
        let mut matrix = DMatrix::identity(n, n);
        let mut air: IndexMap<usize, Vec<f64>> =
            self.rooms.iter().map(|&room| (room, vec![0.; n])).collect();
        let mut panels: IndexMap<usize, Vec<f64>> = IndexMap::new();

        for (&global, &row) in &self.rows {
            let surface = &surfaces[global];
            let response = &responses[global];
            let share = inside_share(response, surface);

            self.subtract_exchange(&mut matrix, row, global, share, rooms, surfaces);
            air.entry(surface.room).or_insert_with(|| vec![0.; n])[row] +=
                share * surface.film.convective;

            let drive = &opposite[global];
            if let Some((room, coefficient)) = drive.air {
                air.entry(room).or_insert_with(|| vec![0.; n])[row] +=
                    response.opposite * coefficient;
            }
            if let Some((paired, scale)) = drive.exchange {
                self.subtract_exchange(
                    &mut matrix,
                    row,
                    paired,
                    response.opposite * scale,
                    rooms,
                    surfaces,
                );
            }

            if let Some(panel) = surface.panel {
                panels.entry(panel).or_insert_with(|| vec![0.; n])[row] +=
                    response.panel / panel_areas[panel];
            }
        }

        invert(&mut matrix)?;

        self.air = air
            .into_iter()
            .map(|(room, column)| (room, multiply_vector(&matrix, &column)))
            .collect();
        self.panels = panels
            .into_iter()
            .map(|(panel, column)| (panel, multiply_vector(&matrix, &column)))
            .collect();
        self.inverse = matrix;
        self.constant = vec![0.; n];
        debug!("Rebuilt surface temperature system of room(s) {:?}", self.rooms);

        Ok(())
    }

    /// Fold the constant terms of the step into the system.
    pub(crate) fn fold_constant(
        &mut self,
        surfaces: &[Surface],
        responses: &[FaceResponse],
        opposite: &[OppositeDrive],
    ) {
        let mut constant = vec![0.; self.rows.len()];
        for (&global, &row) in &self.rows {
            let surface = &surfaces[global];
            let response = &responses[global];
            constant[row] = inside_share(response, surface) * surface.absorbed
                + response.opposite * opposite[global].constant
                + response.history;
        }
        self.constant = multiply_vector(&self.inverse, &constant);
    }

    /// Inside surface temperature of a surface of the group for settled air temperatures and
    /// panel heat, in deg C
    pub(crate) fn temperature(
        &self,
        surface: usize,
        air_temperatures: &[f64],
        panel_heat: &[f64],
    ) -> f64 {
        let row = self.row(surface);
        self.air
            .iter()
            .map(|(room, column)| column[row] * air_temperatures[*room])
            .sum::<f64>()
            + self
                .panels
                .iter()
                .map(|(panel, column)| column[row] * panel_heat[*panel])
                .sum::<f64>()
            + self.constant[row]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::*;

    #[rstest]
    fn test_link_rooms_groups_through_partitions() {
        let groups = link_rooms(5, [(3, 1), (4, 3)]);
        assert_eq!(groups, vec![vec![0], vec![1, 3, 4], vec![2]]);
    }

    #[rstest]
    fn test_unlinked_rooms_stand_alone() {
        assert_eq!(link_rooms(2, Vec::new()), vec![vec![0], vec![1]]);
    }
}
