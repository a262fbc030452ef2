// crates/core/src/schedule/view.rs
//! Text rendering of a schedule and its executions.

use std::io::{self, Write};

use super::record::{ExecutionRecord, ScheduleRecord, ScheduleSummary};
use crate::display::{Palette, Tone};

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// One frame of `follow` output. Executions are rendered in the order given,
/// which the tracker keeps ascending by allocation time.
pub struct ScheduleView<'a> {
    pub record: &'a ScheduleRecord,
    pub executions: &'a [ExecutionRecord],
    pub token: Option<&'a str>,
    pub palette: Palette,
}

impl ScheduleView<'_> {
    pub fn render(&self, out: &mut dyn Write) -> io::Result<()> {
        let p = &self.palette;
        let label = self
            .token
            .map(str::to_string)
            .unwrap_or_else(|| self.record.ids().join("/"));
        let status = &self.record.status;

        writeln!(
            out,
            "{} {}  {}  {}",
            p.paint("schedule", Tone::Heading),
            p.paint(label, Tone::Heading),
            p.paint(status, Palette::phase_tone(status, None)),
            p.paint(&self.record.recurrence, Tone::Muted),
        )?;

        match &self.record.summary {
            ScheduleSummary::Periodic { children, .. } | ScheduleSummary::Triggered { children, .. } => {
                writeln!(
                    out,
                    "  children: pending {}, running {}, dead {}, failed {}",
                    children.pending, children.running, children.dead, children.failed
                )?;
            }
            ScheduleSummary::OneShot(tasks) => {
                writeln!(
                    out,
                    "  tasks: completed {}, starting {}, failed {}, lost {}, queued {}, running {}",
                    tasks.completed, tasks.starting, tasks.failed, tasks.lost, tasks.queued, tasks.running
                )?;
            }
        }

        for execution in self.executions {
            writeln!(out, "{}", self.execution_line(execution))?;
        }
        Ok(())
    }

    fn execution_line(&self, execution: &ExecutionRecord) -> String {
        let p = &self.palette;
        let label = execution
            .token
            .clone()
            .unwrap_or_else(|| execution.execution_id.clone());
        let tone = Palette::phase_tone(&execution.phase, execution.failed());
        let mut line = format!(
            "  {:<20} {}",
            label,
            p.paint(format!("{:<8}", execution.phase), tone)
        );

        if let Some(at) = execution.allocation_time {
            line.push_str(&format!("  allocated {}", at.format(TIME_FORMAT)));
        }
        if let Some(at) = execution.finish_time() {
            line.push_str(&format!("  finished {}", at.format(TIME_FORMAT)));
        }
        match execution.failed() {
            Some(true) => {
                line.push_str(&format!("  {}", p.paint("FAILED", Tone::Failure)));
                if let Some(error) = &execution.error {
                    line.push_str(&format!(": {error}"));
                }
            }
            Some(false) => line.push_str(&format!("  {}", p.paint("ok", Tone::Success))),
            None => {}
        }
        line
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::ExecutionPayload;
    use serde_json::json;

    fn record() -> ScheduleRecord {
        ScheduleRecord::from_value(
            json!({
                "schedule_id": "s1",
                "job_id": "j1",
                "status": "running",
                "interval": "0 3 * * *",
                "children": {"running": 1, "dead": 2, "failed": 1}
            }),
            &[],
        )
        .unwrap()
    }

    fn execution(value: serde_json::Value) -> ExecutionRecord {
        let payload: ExecutionPayload = serde_json::from_value(value).unwrap();
        ExecutionRecord::from_payload("j1", "s1", payload)
    }

    #[test]
    fn test_render_plain() {
        let record = record();
        let mut failed = execution(json!({
            "id": "e1",
            "status": "dead",
            "failed": true,
            "error": "query timeout",
            "allocation_time": "2024-03-01T03:00:00Z",
            "finish_time": "2024-03-01T03:05:00Z"
        }));
        failed.token = Some("nightly/1/1".into());
        let running = execution(json!({"id": "e2", "status": "running"}));
        let executions = vec![failed, running];

        let view = ScheduleView {
            record: &record,
            executions: &executions,
            token: Some("nightly/1"),
            palette: Palette::plain(),
        };
        let mut out = Vec::new();
        view.render(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines[0], "schedule nightly/1  running  every '0 3 * * *'");
        assert_eq!(lines[1], "  children: pending 0, running 1, dead 2, failed 1");
        assert!(lines[2].starts_with("  nightly/1/1"));
        assert!(lines[2].contains("finished 2024-03-01 03:05:00"));
        assert!(lines[2].ends_with("FAILED: query timeout"));
        assert!(lines[3].starts_with("  e2 "));
        assert!(!lines[3].contains("ok"));
    }

    #[test]
    fn test_render_without_token_uses_ids() {
        let record = record();
        let view = ScheduleView {
            record: &record,
            executions: &[],
            token: None,
            palette: Palette::plain(),
        };
        let mut out = Vec::new();
        view.render(&mut out).unwrap();
        assert!(String::from_utf8(out).unwrap().starts_with("schedule j1/s1"));
    }
}
