//! End-of-run report

use crate::harvester::HarvestReport;
use std::fmt;

impl fmt::Display for HarvestReport {
    /// Writes the summary printed after a run
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Harvest Report ===\n")?;

        if let Some(plan) = &self.plan {
            writeln!(f, "Plan:")?;
            writeln!(f, "  Available: {}", plan.total_available)?;
            writeln!(f, "  Target: {}", plan.actual_target)?;
            writeln!(
                f,
                "  Pages: {} in {} batches of {}",
                plan.total_pages,
                plan.batches.len(),
                plan.batch_size
            )?;
            writeln!(f)?;
        }

        writeln!(f, "Records:")?;
        writeln!(f, "  Harvested: {}", self.records.len())?;
        writeln!(f, "  With detail: {}", self.records_with_detail())?;
        match &self.store_error {
            Some(error) => writeln!(f, "  Stored: none ({})", error)?,
            None => writeln!(f, "  Stored: {}", self.stored)?,
        }
        writeln!(f)?;

        writeln!(f, "Failures:")?;
        writeln!(f, "  Remaining: {}", self.failures)?;
        writeln!(
            f,
            "  Retried: {} attempts over {} passes, {} recovered",
            self.retries.attempted, self.retries.passes, self.retries.recovered
        )?;
        if self.failed_batches > 0 {
            writeln!(f, "  Lost batches: {}", self.failed_batches)?;
        }
        if let Some(path) = &self.failed_file {
            writeln!(f, "  Saved to: {}", path.display())?;
        }
        if let Some(error) = &self.failure_file_error {
            writeln!(f, "  Could not save failures: {}", error)?;
        }
        writeln!(f)?;

        let delay = &self.delay;
        writeln!(f, "Rate control:")?;
        writeln!(
            f,
            "  Requests: {} ({:.1}% ok, {:.1}% blocked)",
            delay.total,
            delay.success_rate * 100.0,
            delay.blocked_rate * 100.0
        )?;
        writeln!(
            f,
            "  Final delay: {}ms ({})",
            delay.current_delay.as_millis(),
            delay.mode
        )?;
        writeln!(f, "  Requests/minute: {:.1}", delay.requests_per_minute)?;
        writeln!(f)?;

        let seconds = self.elapsed.as_secs_f64();
        writeln!(f, "Elapsed: {:.1}s", seconds)?;
        if seconds > 0.0 {
            writeln!(
                f,
                "Throughput: {:.1} records/s",
                self.records.len() as f64 / seconds
            )?;
        }
        if self.interrupted {
            writeln!(f, "Run was interrupted before completion")?;
        } else if self.target_reached {
            writeln!(f, "Target reached")?;
        }
        Ok(())
    }
}

/// Formats the summary printed after a run
pub fn format_report(report: &HarvestReport) -> String {
    report.to_string()
}

pub fn print_report(report: &HarvestReport) {
    print!("{}", report);
}
