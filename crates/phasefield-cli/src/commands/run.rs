use crate::cli::RunArgs;
use crate::config::PartialRunConfig;
use crate::error::Result;
use crate::utils::progress::CliProgressHandler;
use phasefield::engine::progress::ProgressReporter;
use phasefield::workflows::grain_growth::{self, GrowthSummary};
use tracing::{info, warn};

pub fn run(args: RunArgs) -> Result<()> {
    let partial_config = PartialRunConfig::from_file(&args.config)?;
    info!("Merging run file and CLI arguments...");
    let config = partial_config.merge_with_cli(&args)?;

    let progress_handler = CliProgressHandler::new();
    let reporter = ProgressReporter::with_callback(progress_handler.get_callback());

    println!("Starting grain growth ({} steps)...", config.steps);
    let summary = grain_growth::run(&config, &reporter)?;
    print_summary(&summary);

    if summary.overshoots > 0 {
        warn!(
            overshoots = summary.overshoots,
            "Driving forces exceeded their limits; consider a smaller time step or a larger limit."
        );
    }
    if let Some(dir) = &config.output_dir {
        println!(
            "✓ Checkpoint for step {} written to: {}",
            summary.last_step,
            dir.display()
        );
    }
    Ok(())
}

fn print_summary(summary: &GrowthSummary) {
    println!(
        "Workflow complete after step {} (t = {:.6}).",
        summary.last_step, summary.time
    );
    println!("  Existing fields:        {}", summary.existing_fields);
    println!("  Interface energy:       {:.6e}", summary.energy_density);
    for (phase, fraction) in summary.phase_fractions.iter().enumerate() {
        println!("  Phase {:<3} fraction:    {:.6}", phase, fraction);
    }
    if summary.normalization.cells_limited > 0 {
        println!(
            "  Limited cells:          {} ({} at the iteration cap)",
            summary.normalization.cells_limited, summary.normalization.capped
        );
    }
}
