//! Multi-transfer terminal progress meter.
//!
//! The meter owns one record per running transfer plus an aggregate
//! "total" record. `render` repaints a fixed block of lines in place by
//! moving the cursor up and clearing each line, at most once per second
//! unless a transfer just finished. Records and the meter itself are
//! mutex-guarded so progress callbacks may arrive from worker tasks.

use std::collections::VecDeque;
use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::util::count_digits;
use crate::util::format::{shorten_bytes, shorten_string};

const DEL_LINE: &str = "\x1b[2K\r";
const CURSOR_UP: &str = "\x1b[A";

const BOUNCE_CURSOR: &str = "<->";
const SAMPLE_WINDOW: usize = 5;
const SAMPLE_INTERVAL: Duration = Duration::from_secs(1);
const RENDER_INTERVAL: Duration = Duration::from_secs(1);
const FALLBACK_COLUMNS: usize = 80;

/// Progress record of a single transfer. Handed out by
/// [`ProgressMeter::add`]; the transfer updates it from its chunk loop.
pub struct TransferProgress {
    id: usize,
    name: String,
    start: Instant,
    state: Mutex<ProgressState>,
}

struct ProgressState {
    transferred: u64,
    total: u64,
    finished: bool,
    /// (timestamp, transferred) samples for the rolling speed estimate.
    samples: VecDeque<(Instant, u64)>,
}

impl TransferProgress {
    fn new(id: usize, name: &str) -> Self {
        let now = Instant::now();
        Self {
            id,
            name: name.to_string(),
            start: now,
            state: Mutex::new(ProgressState {
                transferred: 0,
                total: 0,
                finished: false,
                samples: VecDeque::from([(now, 0)]),
            }),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Record the current byte counts; `total` is 0 while unknown.
    pub fn update(&self, total: u64, transferred: u64) {
        let mut state = self.state.lock().unwrap();
        state.transferred = transferred;
        state.total = total;

        let now = Instant::now();
        let (tail, _) = *state.samples.back().unwrap();
        if now.duration_since(tail) > SAMPLE_INTERVAL {
            state.samples.push_back((now, transferred));
            while state.samples.len() > SAMPLE_WINDOW {
                state.samples.pop_front();
            }
        }
    }

    fn finish(&self) {
        self.state.lock().unwrap().finished = true;
    }

    fn snapshot(&self) -> Snapshot {
        let state = self.state.lock().unwrap();
        Snapshot {
            id: self.id,
            name: self.name.clone(),
            start: self.start,
            transferred: state.transferred,
            total: state.total,
            finished: state.finished,
            samples: state.samples.iter().copied().collect(),
            ratio: None,
        }
    }
}

/// A consistent copy of one record, used for rendering outside the
/// record's lock.
struct Snapshot {
    id: usize,
    name: String,
    start: Instant,
    transferred: u64,
    total: u64,
    finished: bool,
    samples: Vec<(Instant, u64)>,
    /// Completion ratio override used by the total line.
    ratio: Option<f64>,
}

struct MeterState {
    records: Vec<Arc<TransferProgress>>,
    start: Instant,
    /// Aggregate samples feeding the total line's speed estimate.
    samples: VecDeque<(Instant, u64)>,
    /// Bytes of records that finished and were already printed once.
    retired_bytes: u64,
    finished_count: usize,
    total_expected: usize,
    last_render_lines: usize,
    last_render: Instant,
}

pub struct ProgressMeter {
    state: Mutex<MeterState>,
}

impl ProgressMeter {
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            state: Mutex::new(MeterState {
                records: Vec::new(),
                start: now,
                samples: VecDeque::from([(now, 0)]),
                retired_bytes: 0,
                finished_count: 0,
                total_expected: 0,
                last_render_lines: 0,
                last_render: now,
            }),
        }
    }

    /// Register a new transfer. The id must not be in use by a live
    /// record.
    pub fn add(&self, id: usize, name: &str) -> Arc<TransferProgress> {
        let mut state = self.state.lock().unwrap();
        assert!(
            state.records.iter().all(|record| record.id() != id),
            "a transfer with id {id} is already registered"
        );

        let record = Arc::new(TransferProgress::new(id, name));
        state.records.push(record.clone());

        let seen = state.records.len() + state.finished_count;
        if seen > state.total_expected {
            state.total_expected = seen;
        }

        record
    }

    /// Drop a record that never started transferring (setup failure).
    /// Counts towards the finished tally so the total line adds up.
    pub fn remove(&self, id: usize) {
        let mut state = self.state.lock().unwrap();
        let before = state.records.len();
        state.records.retain(|record| record.id() != id);
        debug_assert!(state.records.len() < before, "no transfer with id {id}");
        state.finished_count += 1;
    }

    pub fn finish(&self, id: usize) {
        let state = self.state.lock().unwrap();
        if let Some(record) = state.records.iter().find(|record| record.id() == id) {
            record.finish();
        }
    }

    pub fn set_number_of_downloads(&self, n: usize) {
        let mut state = self.state.lock().unwrap();
        if n > state.total_expected {
            state.total_expected = n;
        }
    }

    /// Repaint the meter block. Throttled to once per second unless a
    /// transfer finished since the last render; finished transfers are
    /// printed one last time and then discarded.
    pub fn render(&self) {
        let mut state = self.state.lock().unwrap();
        let now = Instant::now();

        let snapshots: Vec<Snapshot> =
            state.records.iter().map(|record| record.snapshot()).collect();

        let any_finished = snapshots.iter().any(|snap| snap.finished);
        if !any_finished && now.duration_since(state.last_render) < RENDER_INTERVAL {
            return;
        }
        state.last_render = now;

        let mut main_transferred = state.retired_bytes;
        let mut main_total = state.retired_bytes;
        let mut total_known = true;
        for snap in &snapshots {
            main_transferred += snap.transferred;
            if snap.total == 0 && !snap.finished {
                total_known = false;
            } else if snap.finished {
                main_total += snap.transferred.max(snap.total);
            } else {
                main_total += snap.total;
            }
        }
        if !total_known {
            main_total = 0;
        }

        {
            let (tail, _) = *state.samples.back().unwrap();
            if now.duration_since(tail) > SAMPLE_INTERVAL {
                state.samples.push_back((now, main_transferred));
                while state.samples.len() > SAMPLE_WINDOW {
                    state.samples.pop_front();
                }
            }
        }

        let columns = terminal_columns();

        let mut frame = String::new();
        for _ in 0..state.last_render_lines {
            frame.push_str(CURSOR_UP);
            frame.push_str(DEL_LINE);
        }

        let (finished, active): (Vec<_>, Vec<_>) =
            snapshots.into_iter().partition(|snap| snap.finished);

        for snap in &finished {
            frame.push_str(&format_line(snap, columns));
            frame.push('\n');
            state.records.retain(|record| record.id() != snap.id);
            state.retired_bytes += snap.transferred;
            state.finished_count += 1;
        }

        let mut lines = 0;
        for snap in &active {
            frame.push_str(&format_line(snap, columns));
            frame.push('\n');
            lines += 1;
        }

        let digits = count_digits(state.total_expected);
        let total_snapshot = Snapshot {
            id: usize::MAX,
            name: format!(
                "total ({:<digits$}/{:<digits$})",
                state.finished_count, state.total_expected
            ),
            start: state.start,
            transferred: main_transferred,
            total: main_total,
            finished: false,
            samples: state.samples.iter().copied().collect(),
            ratio: Some(if state.finished_count < state.total_expected {
                state.finished_count as f64 / state.total_expected as f64
            } else {
                1.0
            }),
        };
        frame.push_str(&format_line(&total_snapshot, columns));
        frame.push('\n');
        lines += 1;

        state.last_render_lines = lines;

        let mut stdout = std::io::stdout().lock();
        let _ = stdout.write_all(frame.as_bytes());
        let _ = stdout.flush();
    }
}

impl Default for ProgressMeter {
    fn default() -> Self {
        Self::new()
    }
}

fn terminal_columns() -> usize {
    match crossterm::terminal::size() {
        Ok((columns, _)) if columns > 0 => columns as usize,
        _ => FALLBACK_COLUMNS,
    }
}

//  name         transferred    speed    time   progress          percent
//  variable                                    variable
// [         ]   [       ]  [        ]  [   ]  [                 ] [  ]
//  segment-01   122.2 KiB  463.0 KiB/s 00:12  [#############    ] 100%
//  total (1/9)  ...
fn format_line(snap: &Snapshot, columns: usize) -> String {
    let now = Instant::now();

    let (quantity, unit) = shorten_bytes(snap.transferred);
    let transferred_str = format!("{quantity:5.1} {unit:>3}");

    let elapsed = now.duration_since(snap.start);
    let time_str = format!("{:02}:{:02}", elapsed.as_secs() / 60, elapsed.as_secs() % 60);

    let (speed, speed_unit) = rolling_speed(&snap.samples);
    let speed_str = match speed {
        Some(speed) => format!("{speed:5.1} {speed_unit:>5}"),
        None => format!("  -.- {speed_unit:>5}"),
    };

    let percent_str = percent_string(snap);

    // columns taken by everything except the name and the bar,
    // separating spaces included
    let fixed = 1
        + transferred_str.len()
        + 2
        + speed_str.len()
        + 1
        + time_str.len()
        + 1
        + percent_str.len();
    if fixed + 20 > columns {
        return String::new();
    }
    let remaining = columns - fixed;

    let name_width = remaining / 2 - 1;
    let name = format!("{:<name_width$}", shorten_string(&snap.name, name_width));

    let bar_width = remaining / 2 - 3;
    let bar = if snap.total > 0 {
        progressbar_filled(snap.transferred, snap.total, bar_width)
    } else if snap.finished {
        progressbar_filled(1, 1, bar_width)
    } else {
        progressbar_undefined(elapsed.as_secs(), BOUNCE_CURSOR, bar_width)
    };

    format!(" {name} {transferred_str}  {speed_str} {time_str} [{bar}] {percent_str}")
}

fn percent_string(snap: &Snapshot) -> String {
    if snap.finished {
        return "100%".to_string();
    }

    let percent = match snap.ratio {
        Some(ratio) => Some(ratio),
        None if snap.total > 0 => Some(snap.transferred as f64 / snap.total as f64),
        None => None,
    };

    match percent {
        Some(percent) if percent >= 1.0 => "100%".to_string(),
        Some(percent) => format!("{:3}%", (percent * 100.0).floor() as u64),
        None => "---%".to_string(),
    }
}

/// Speed over the two most recent samples. `None` while fewer than two
/// samples exist; the unit always carries the `/s` suffix.
fn rolling_speed(samples: &[(Instant, u64)]) -> (Option<f64>, String) {
    if samples.len() < 2 {
        let (_, unit) = shorten_bytes(0);
        return (None, format!("{unit}/s"));
    }

    let (last_time, last_transferred) = samples[samples.len() - 1];
    let (previous_time, previous_transferred) = samples[samples.len() - 2];

    let duration = last_time.duration_since(previous_time).as_secs_f64();
    if duration <= 0.0 {
        let (_, unit) = shorten_bytes(0);
        return (None, format!("{unit}/s"));
    }

    let speed = (last_transferred - previous_transferred) as f64 / duration;
    let (quantity, unit) = shorten_bytes(speed as u64);
    (Some(quantity), format!("{unit}/s"))
}

/// A bar of `width` characters with the leading
/// `floor(width * transferred / total)` filled with `#`.
pub fn progressbar_filled(transferred: u64, total: u64, width: usize) -> String {
    debug_assert!(total > 0);
    let percent = transferred as f64 / total as f64;
    let filled = ((width as f64 * percent) as usize).min(width);
    format!("{:<width$}", "#".repeat(filled))
}

/// Indeterminate bar: a cursor bouncing between the bar's ends, one
/// step per second, reversing at the walls instead of wrapping.
pub fn progressbar_undefined(secs: u64, cursor: &str, width: usize) -> String {
    let cursor_len = cursor.len();
    debug_assert!(cursor_len < width);

    let span = width - cursor_len;
    let mut pos = secs as usize % (2 * (span + 1));
    if pos > span {
        pos = 2 * span + 1 - pos;
    }
    let rightfill = width - pos - cursor_len;

    format!("{}{}{}", " ".repeat(pos), cursor, " ".repeat(rightfill))
}
