use crate::cli::InspectArgs;
use crate::config::{Layout, PartialRunConfig};
use crate::error::Result;
use phasefield::engine::domain::SerialDomain;
use phasefield::engine::phase_field::{FieldVolume, PhaseField};
use tracing::info;

pub fn run(args: InspectArgs) -> Result<()> {
    let Layout {
        grid,
        boundary,
        phase_field: config,
    } = PartialRunConfig::from_file(&args.config)?.layout()?;

    let mut phase_field = PhaseField::new(grid, config);
    phase_field.read_checkpoint(&args.dir, args.step, &SerialDomain::new(boundary))?;
    info!(step = args.step, dir = ?args.dir, "Checkpoint loaded");

    print!("{}", render_report(args.step, &phase_field));
    Ok(())
}

fn render_report(step: u64, phase_field: &PhaseField) -> String {
    let volumes = phase_field.volume_report();
    let mut out = format!("Checkpoint at step {} holds {} field(s):\n", step, volumes.len());
    out.push_str(&format!(
        "{:>8}  {:>5}  {:<8}  {:>14}\n",
        "id", "phase", "stage", "volume"
    ));
    for FieldVolume {
        id,
        phase,
        stage,
        volume,
    } in &volumes
    {
        out.push_str(&format!(
            "{:>8}  {:>5}  {:<8}  {:>14.4}\n",
            id.to_raw(),
            phase,
            format!("{stage:?}"),
            volume
        ));
    }
    for (phase, fraction) in phase_field.phase_fractions().iter().enumerate() {
        out.push_str(&format!("Phase {} fraction: {:.6}\n", phase, fraction));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::{Cli, Commands};
    use crate::error::CliError;
    use clap::Parser;
    use phasefield::core::io::error::CheckpointError;
    use phasefield::engine::progress::ProgressReporter;
    use phasefield::workflows::grain_growth;
    use std::fs;
    use std::path::{Path, PathBuf};

    const RUN_FILE: &str = r#"
        [grid]
        extent = [16, 16, 1]
        dx = 1.0
        iwidth = 4.0

        [phase-field]
        n-phases = 2

        [interface]
        energy = 1.0
        mobility = 1.0

        [initial]
        type = "single-sphere"
        radius = 5.0
        inner-phase = 1
        outer-phase = 0

        [run]
        steps = 2
        dt = 0.05
    "#;

    fn write_checkpoint(dir: &Path) -> PathBuf {
        let config_path = dir.join("run.toml");
        fs::write(&config_path, RUN_FILE).unwrap();
        let cli = Cli::parse_from([
            "phasefield",
            "run",
            "-c",
            config_path.to_str().unwrap(),
            "-o",
            dir.to_str().unwrap(),
        ]);
        let Commands::Run(args) = cli.command else {
            panic!("Expected 'run' subcommand");
        };
        let config = PartialRunConfig::from_file(&config_path)
            .unwrap()
            .merge_with_cli(&args)
            .unwrap();
        grain_growth::run(&config, &ProgressReporter::new()).unwrap();
        config_path
    }

    #[test]
    fn report_lists_both_fields_of_a_sphere() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = write_checkpoint(dir.path());

        let Layout {
            grid,
            boundary,
            phase_field: config,
        } = PartialRunConfig::from_file(&config_path).unwrap().layout().unwrap();
        let mut phase_field = PhaseField::new(grid, config);
        phase_field
            .read_checkpoint(dir.path(), 2, &SerialDomain::new(boundary))
            .unwrap();

        let report = render_report(2, &phase_field);
        assert!(report.starts_with("Checkpoint at step 2 holds 2 field(s):"));
        assert!(report.contains("Phase 0 fraction:"));
        assert!(report.contains("Phase 1 fraction:"));
        assert_eq!(report.lines().count(), 1 + 1 + 2 + 2);
    }

    #[test]
    fn inspecting_a_missing_step_fails() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = write_checkpoint(dir.path());

        let result = run(InspectArgs {
            dir: dir.path().to_path_buf(),
            step: 99,
            config: config_path,
        });
        assert!(matches!(result, Err(CliError::Checkpoint(CheckpointError::Io(_)))));
    }
}
