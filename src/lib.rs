#![allow(clippy::too_many_arguments)]

pub mod core;
pub mod corpus;
pub mod errors;
pub mod input;
pub mod output;
mod statistics;
#[cfg(test)]
mod tests;

use crate::core::envelope::convergence::StepOutcome;
use crate::core::envelope::network::{Envelope, SettledState, StepConditions};
use crate::core::envelope::surface::SurfaceReadback;
use crate::core::solvers::{invert, multiply_vector};
use crate::corpus::envelope_from_input;
use crate::errors::EnvelopeError;
use crate::input::{parse_input, Input};
use crate::output::Output;
use anyhow::Context;
use csv::WriterBuilder;
use nalgebra::DMatrix;
use smartstring::alias::String;
use std::io::{BufReader, Read};
use tracing::{debug, info, warn};

/// Settle passes allowed per step before the latest trial is accepted as it stands
pub const DEFAULT_MAX_ITERATIONS: u32 = 20;

pub fn build_envelope(input: &Input) -> Result<Envelope, EnvelopeError> {
    envelope_from_input(input).map_err(EnvelopeError::InvalidModel)
}

pub fn parse_conditions(json: impl Read) -> anyhow::Result<Vec<StepConditions>> {
    Ok(serde_json::from_reader(BufReader::new(json))?)
}

#[derive(Clone, Debug, PartialEq)]
pub struct StepResult {
    /// in deg C, one per room
    pub air_temperatures: Vec<f64>,
    /// in kg/kg, one per room
    pub humidities: Vec<f64>,
    /// settle passes made
    pub iterations: u32,
    /// false when the iteration cap was hit with phase-change resets still pending
    pub converged: bool,
    pub surfaces: Vec<SurfaceReadback>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FreeFloatingResults {
    pub room_names: Vec<String>,
    /// as `room/surface`
    pub surface_names: Vec<String>,
    pub steps: Vec<StepResult>,
}

/// Solve the coupled room air balances with no heating or cooling supplied and every panel
/// off, i.e. find the air state for which every room's sensible and latent loads are zero.
pub fn free_floating_air_state(envelope: &Envelope) -> anyhow::Result<SettledState> {
    let room_count = envelope.rooms().len();
    let panel_heat = vec![0.; envelope.panels().len()];

    let mut matrix: DMatrix<f64> = DMatrix::zeros(room_count, room_count);
    let mut constant = vec![0.; room_count];
    for (room, value) in constant.iter_mut().enumerate() {
        let balance = envelope.air_balance(room);
        matrix[(room, room)] += balance.rmt;
        for (coupled, coefficient) in &balance.arn {
            matrix[(room, *coupled)] -= coefficient;
        }
        *value = balance.rmc
            + balance
                .rmp
                .iter()
                .map(|(panel, coefficient)| coefficient * panel_heat[*panel])
                .sum::<f64>();
    }
    invert(&mut matrix).context("Room air balances could not be solved")?;
    let air_temperatures = multiply_vector(&matrix, &constant);

    let humidities = envelope
        .rooms()
        .iter()
        .enumerate()
        .map(|(idx, room)| {
            let balance = envelope.air_balance(idx);
            if balance.rmx > 0. {
                balance.rmxc / balance.rmx
            } else {
                room.humidity()
            }
        })
        .collect();

    Ok(SettledState {
        air_temperatures,
        humidities,
        panel_heat,
    })
}

/// Step an envelope through a series of conditions, letting every room float.
///
/// * `max_iterations` - settle passes allowed per step; must be at least 1
pub fn run_free_floating(
    envelope: &mut Envelope,
    conditions: &[StepConditions],
    max_iterations: u32,
) -> anyhow::Result<FreeFloatingResults> {
    if max_iterations == 0 {
        anyhow::bail!("At least one iteration per step is required");
    }

    let room_names = envelope
        .rooms()
        .iter()
        .map(|room| room.name().into())
        .collect();
    let surface_names = envelope
        .surfaces()
        .iter()
        .map(|surface| {
            format!(
                "{}/{}",
                envelope.rooms()[surface.room()].name(),
                surface.name()
            )
            .into()
        })
        .collect();

    let mut steps = Vec::with_capacity(conditions.len());
    for (t_idx, step) in conditions.iter().enumerate() {
        envelope
            .update_coefficients(step)
            .with_context(|| format!("Updating coefficients for timestep {t_idx}"))?;

        let mut pass = 0;
        let (iterations, converged) = loop {
            pass += 1;
            let settled = free_floating_air_state(envelope)
                .with_context(|| format!("Solving room air for timestep {t_idx}"))?;
            match envelope.settle(&settled)? {
                StepOutcome::Converged { iterations } => break (iterations, true),
                StepOutcome::Reset { resets } if pass >= max_iterations => {
                    warn!(
                        "Timestep {t_idx}: {resets} phase-change reset(s) still pending after {pass} iteration(s); accepting latest trial"
                    );
                    break (envelope.commit_unconverged()?, false);
                }
                StepOutcome::Reset { .. } => envelope.update_coefficients(step)?,
            }
        };
        debug!("Timestep {t_idx} settled after {iterations} iteration(s)");

        steps.push(StepResult {
            air_temperatures: envelope.rooms().iter().map(|r| r.air_temperature()).collect(),
            humidities: envelope.rooms().iter().map(|r| r.humidity()).collect(),
            iterations,
            converged,
            surfaces: envelope
                .surfaces()
                .iter()
                .map(|surface| *surface.readback())
                .collect(),
        });
    }

    Ok(FreeFloatingResults {
        room_names,
        surface_names,
        steps,
    })
}

/// Parse a model and its step conditions, run them free-floating and write the results.
pub fn run_project(
    input: impl Read,
    conditions: impl Read,
    output: impl Output,
    max_iterations: u32,
) -> Result<FreeFloatingResults, EnvelopeError> {
    let input = parse_input(input).map_err(EnvelopeError::InvalidModel)?;
    let conditions = parse_conditions(conditions)
        .context("Step conditions could not be parsed")
        .map_err(EnvelopeError::InvalidModel)?;
    let mut envelope = build_envelope(&input)?;

    let results = run_free_floating(&mut envelope, &conditions, max_iterations)
        .map_err(EnvelopeError::FailureInCalculation)?;

    if !output.is_noop() {
        write_results_file(output, &results).map_err(EnvelopeError::FailureInCalculation)?;
    }

    Ok(results)
}

fn write_results_file(output: impl Output, results: &FreeFloatingResults) -> anyhow::Result<()> {
    let output_key = "results";
    info!("writing out to {output_key}");
    let writer = output.writer_for_location_key(output_key)?;
    let mut writer = WriterBuilder::new().flexible(true).from_writer(writer);

    let mut headings: Vec<std::string::String> = vec!["Timestep".into()];
    let mut units_row = vec!["[count]"];
    for room in &results.room_names {
        headings.push(format!("{room} air temperature"));
        units_row.push("[deg C]");
        headings.push(format!("{room} humidity"));
        units_row.push("[kg/kg]");
    }
    for surface in &results.surface_names {
        headings.push(format!("{surface} temperature"));
        units_row.push("[deg C]");
        headings.push(format!("{surface} mean radiant temperature"));
        units_row.push("[deg C]");
        headings.push(format!("{surface} convective heat"));
        units_row.push("[W]");
        headings.push(format!("{surface} radiative heat"));
        units_row.push("[W]");
        headings.push(format!("{surface} conducted heat"));
        units_row.push("[W]");
    }
    headings.push("Iterations".into());
    units_row.push("[count]");
    headings.push("Converged".into());
    units_row.push("[bool]");

    writer.write_record(&headings)?;
    writer.write_record(&units_row)?;

    for (t_idx, step) in results.steps.iter().enumerate() {
        let mut row = vec![t_idx.to_string()];
        for (temperature, humidity) in step.air_temperatures.iter().zip(&step.humidities) {
            row.push(temperature.to_string());
            row.push(humidity.to_string());
        }
        for surface in &step.surfaces {
            row.push(surface.temperature.to_string());
            row.push(surface.mean_radiant_temperature.to_string());
            row.push(surface.convective_heat.to_string());
            row.push(surface.radiative_heat.to_string());
            row.push(surface.conducted_heat.to_string());
        }
        row.push(step.iterations.to_string());
        row.push(step.converged.to_string());

        writer.write_record(&row)?;
    }

    debug!("flushing out CSV");
    writer.flush()?;

    Ok(())
}
