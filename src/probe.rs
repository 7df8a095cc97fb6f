use tracing::{debug, warn};

use crate::util::run_command_capture;

pub const DEFAULT_AGE_THRESHOLD_MINUTES: u32 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Term,
    Kill,
}

impl Signal {
    pub fn flag(&self) -> &'static str {
        match self {
            Signal::Term => "-TERM",
            Signal::Kill => "-KILL",
        }
    }
}

/// Narrow seam over the host's process utilities. Everything built on top of
/// the raw listing text lives outside the trait so it can be exercised with
/// fixture lines.
pub trait ProcessProbe {
    /// Full process listing, one line per process. Advisory: a failed listing
    /// is downgraded to an empty result.
    fn list_processes(&self) -> Vec<String>;

    /// Elapsed-time string for a single pid, `None` if the process is gone.
    fn process_elapsed(&self, pid: i32) -> Option<String>;

    /// Signals a set of pids in one invocation. Fire and forget.
    fn send_signal(&self, pids: &[i32], signal: Signal);

    /// Signals every process whose command line matches `pattern`.
    fn pattern_kill(&self, pattern: &str, signal: Signal);
}

pub struct HostProbe;

impl ProcessProbe for HostProbe {
    fn list_processes(&self) -> Vec<String> {
        match run_command_capture("ps", &["aux"]) {
            Ok(output) if output.success() => {
                // Drop the USER/PID header row.
                output.stdout_lines().into_iter().skip(1).collect()
            }
            Ok(output) => {
                warn!(target: "vdctl", "list_processes: ps exited with {}", output.describe_status());
                Vec::new()
            }
            Err(err) => {
                warn!(target: "vdctl", "list_processes: ps unavailable: {}", err);
                Vec::new()
            }
        }
    }

    fn process_elapsed(&self, pid: i32) -> Option<String> {
        let pid_str = pid.to_string();
        match run_command_capture("ps", &["-o", "etime=", "-p", &pid_str]) {
            Ok(output) if output.success() => {
                let elapsed = output.stdout.trim().to_string();
                if elapsed.is_empty() {
                    None
                } else {
                    Some(elapsed)
                }
            }
            _ => None,
        }
    }

    fn send_signal(&self, pids: &[i32], signal: Signal) {
        if pids.is_empty() {
            return;
        }
        let pid_strings: Vec<String> = pids.iter().map(|pid| pid.to_string()).collect();
        let mut args: Vec<&str> = vec![signal.flag()];
        args.extend(pid_strings.iter().map(String::as_str));
        debug!(target: "vdctl", "send_signal: kill {} {:?}", signal.flag(), pids);
        if let Err(err) = run_command_capture("kill", &args) {
            debug!(target: "vdctl", "send_signal: ignoring kill failure: {}", err);
        }
    }

    fn pattern_kill(&self, pattern: &str, signal: Signal) {
        debug!(target: "vdctl", "pattern_kill: pkill {} -f {}", signal.flag(), pattern);
        if let Err(err) = run_command_capture("pkill", &[signal.flag(), "-f", pattern]) {
            debug!(target: "vdctl", "pattern_kill: ignoring pkill failure: {}", err);
        }
    }
}

/// Whether an elapsed-time string (`[[dd-]hh:]mm:ss`) exceeds the threshold.
/// Fail-open: anything unparseable reports not-old, because we never kill a
/// process whose age we cannot confirm.
pub fn elapsed_exceeds(elapsed: &str, threshold_minutes: u32) -> bool {
    let elapsed = elapsed.trim();
    if elapsed.contains('-') {
        // A day field means the process has run for at least a day.
        return true;
    }
    let fields: Vec<&str> = elapsed.split(':').collect();
    match fields.len() {
        3 => fields[0].parse::<u32>().map(|hours| hours >= 1).unwrap_or(false),
        2 => fields[0]
            .parse::<u32>()
            .map(|minutes| minutes > threshold_minutes)
            .unwrap_or(false),
        _ => false,
    }
}

pub fn is_process_older_than<P: ProcessProbe + ?Sized>(
    probe: &P,
    pid: i32,
    threshold_minutes: u32,
) -> bool {
    match probe.process_elapsed(pid) {
        Some(elapsed) => elapsed_exceeds(&elapsed, threshold_minutes),
        None => false,
    }
}

/// Lines that contain every one of the given substrings.
pub fn match_all<'a>(lines: &'a [String], substrings: &[&str]) -> Vec<&'a str> {
    lines
        .iter()
        .filter(|line| substrings.iter().all(|sub| line.contains(sub)))
        .map(String::as_str)
        .collect()
}

/// The pid column of a `ps aux` line (second whitespace-delimited token).
pub fn extract_pid(line: &str) -> Option<i32> {
    line.split_whitespace().nth(1)?.parse().ok()
}


#[cfg(test)]
mod tests {
    use super::testing::FakeProbe;
    use super::*;

    #[test]
    fn day_field_is_always_old() {
        assert!(elapsed_exceeds("1-00:00:01", 60));
        assert!(elapsed_exceeds("12-23:59:59", 60));
        assert!(elapsed_exceeds("0-00:00:00", 60));
    }

    #[test]
    fn hours_field_old_iff_at_least_one_hour() {
        assert!(elapsed_exceeds("01:00:00", 60));
        assert!(elapsed_exceeds("23:10:05", 60));
        assert!(!elapsed_exceeds("00:59:59", 60));
    }

    #[test]
    fn minutes_field_old_iff_over_threshold() {
        assert!(elapsed_exceeds("61:00", 60));
        assert!(!elapsed_exceeds("60:59", 60));
        assert!(!elapsed_exceeds("05:30", 60));
        assert!(elapsed_exceeds("31:00", 30));
    }

    #[test]
    fn unparseable_elapsed_is_not_old() {
        assert!(!elapsed_exceeds("", 60));
        assert!(!elapsed_exceeds("garbage", 60));
        assert!(!elapsed_exceeds("xx:yy:zz", 60));
        assert!(!elapsed_exceeds("42", 60));
    }

    #[test]
    fn missing_process_is_not_old() {
        let probe = FakeProbe::empty();
        assert!(!is_process_older_than(&probe, 4242, 60));
    }

    #[test]
    fn match_all_requires_every_substring() {
        let lines = vec![
            "dev   10 crashpad_handler --annotation vdk".to_string(),
            "dev   11 crashpad_handler --annotation browser".to_string(),
            "dev   12 vdk-device --instance 0".to_string(),
        ];
        let matched = match_all(&lines, &["crashpad_handler", "vdk"]);
        assert_eq!(matched.len(), 1);
        assert!(matched[0].contains("--annotation vdk"));
    }

    #[test]
    fn extract_pid_reads_second_column() {
        assert_eq!(extract_pid("dev 4821 0.0 0.1 ps aux"), Some(4821));
        assert_eq!(extract_pid("dev"), None);
        assert_eq!(extract_pid("dev abc 0.0"), None);
    }
}
