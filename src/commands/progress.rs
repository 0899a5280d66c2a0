//! Progress reporting with indicatif

use icenvcm_core::nvcm::Progress;
use indicatif::{ProgressBar, ProgressStyle};

/// Create a progress bar with a phase label
fn create_progress_bar_with_phase(
    total: u64,
    phase: &str,
) -> Result<ProgressBar, Box<dyn std::error::Error>> {
    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::default_bar()
            .template(&format!(
                "{{spinner:.green}} [{{elapsed_precise}}] [{{bar:40.cyan/blue}}] {{bytes}}/{{total_bytes}} ({{bytes_per_sec}}, {{eta}}) {}",
                phase
            ))?
            .progress_chars("#>-"),
    );
    Ok(pb)
}

/// Progress reporter using indicatif progress bars
///
/// One bar per phase; the bar of the previous phase is finished when the
/// next one starts.
#[derive(Default)]
pub struct IndicatifProgress {
    current_bar: Option<ProgressBar>,
    phase: &'static str,
}

impl IndicatifProgress {
    pub fn new() -> Self {
        Self::default()
    }

    fn create_bar(&mut self, total: usize, phase: &'static str) {
        self.finish();
        self.phase = phase;
        let total = total as u64;
        self.current_bar = Some(
            create_progress_bar_with_phase(total, phase)
                .unwrap_or_else(|_| ProgressBar::new(total)),
        );
    }

    fn set_position(&mut self, position: usize) {
        if let Some(pb) = &self.current_bar {
            pb.set_position(position as u64);
        }
    }

    fn finish(&mut self) {
        if let Some(pb) = self.current_bar.take() {
            pb.finish_with_message(format!("{} complete", self.phase));
        }
    }
}

impl Progress for IndicatifProgress {
    fn programming(&mut self, total_bytes: usize) {
        self.create_bar(total_bytes, "Programming");
    }

    fn program_progress(&mut self, bytes_written: usize) {
        self.set_position(bytes_written);
    }

    fn reading(&mut self, total_bytes: usize) {
        self.create_bar(total_bytes, "Reading");
    }

    fn read_progress(&mut self, bytes_read: usize) {
        self.set_position(bytes_read);
    }

    fn complete(&mut self) {
        self.finish();
    }
}
