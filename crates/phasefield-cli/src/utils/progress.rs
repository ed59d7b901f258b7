use indicatif::{HumanDuration, ProgressBar, ProgressDrawTarget, ProgressState, ProgressStyle};
use phasefield::engine::progress::{Progress, ProgressCallback};
use std::fmt::Write as _;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::warn;

const SPINNER_TICK: Duration = Duration::from_millis(80);

/// What the time-loop bar shows next to its position.
#[derive(Debug, Default)]
struct TimeLoop {
    first_step: Option<u64>,
    last_step: u64,
    time: f64,
}

impl TimeLoop {
    /// Mean simulated time per step since the loop started.
    fn mean_dt(&self) -> Option<f64> {
        let first = self.first_step?;
        let done = self.last_step + 1 - first;
        Some(self.time / done as f64)
    }

    fn label(&self) -> String {
        match self.mean_dt() {
            Some(dt) => format!("step {} t={:.4} dt~{:.2e}", self.last_step, self.time, dt),
            None => "waiting for the first step".to_string(),
        }
    }
}

struct State {
    bar: ProgressBar,
    run: TimeLoop,
}

/// Terminal front end of engine [`Progress`] events. Setup stages get a
/// spinner; the time loop gets a step bar labelled with the current step,
/// simulated time and mean step width. Report messages are printed above
/// the bar so they stay in the scrollback.
#[derive(Clone)]
pub struct CliProgressHandler {
    state: Arc<Mutex<State>>,
}

impl CliProgressHandler {
    pub fn new() -> Self {
        let bar = ProgressBar::with_draw_target(Some(0), ProgressDrawTarget::stderr());
        bar.finish_and_clear();
        Self {
            state: Arc::new(Mutex::new(State {
                bar,
                run: TimeLoop::default(),
            })),
        }
    }

    pub fn get_callback(&self) -> ProgressCallback<'static> {
        let state = self.state.clone();
        Box::new(move |progress: Progress| {
            let Ok(mut state) = state.lock() else {
                warn!("Progress state mutex was poisoned, dropping event.");
                return;
            };
            state.handle(progress);
        })
    }
}

impl State {
    fn handle(&mut self, progress: Progress) {
        let bar = &self.bar;
        match progress {
            Progress::StageStart { name } => {
                bar.reset();
                bar.set_length(0);
                bar.set_style(spinner_style());
                bar.set_message(name);
                bar.enable_steady_tick(SPINNER_TICK);
            }
            Progress::StageFinish => {
                bar.disable_steady_tick();
                let stage = bar.message();
                bar.finish_with_message(format!("{stage}: done"));
            }
            Progress::StepsStart { total_steps } => {
                bar.disable_steady_tick();
                bar.reset();
                bar.set_style(steps_style());
                bar.set_length(total_steps);
                self.run = TimeLoop::default();
                bar.set_message(self.run.label());
            }
            Progress::StepDone { step, time } => {
                self.run.first_step.get_or_insert(step);
                self.run.last_step = step;
                self.run.time = time;
                bar.inc(1);
                bar.set_message(self.run.label());
            }
            Progress::StepsFinish => {
                if let Some(length) = bar.length() {
                    bar.set_position(length);
                }
                bar.finish_with_message(format!("reached t={:.4}", self.run.time));
            }
            Progress::Message(msg) => {
                if bar.is_finished() {
                    bar.set_message(msg);
                } else {
                    bar.println(format!("  {msg}"));
                }
            }
        }
    }
}

fn spinner_style() -> ProgressStyle {
    ProgressStyle::with_template("{spinner:.green} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
}

fn steps_style() -> ProgressStyle {
    ProgressStyle::with_template("[{bar:32.cyan/blue}] {pos}/{len} {msg} ({remaining})")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .with_key(
            "remaining",
            |state: &ProgressState, w: &mut dyn std::fmt::Write| {
                let _ = write!(w, "{} left", HumanDuration(state.eta()));
            },
        )
        .progress_chars("=> ")
}

impl Default for CliProgressHandler {
    fn default() -> Self {
        Self::new()
    }
}
