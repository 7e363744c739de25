use std::io::{self, IsTerminal, Stdout, Write, stdout};
use std::time::Duration;

use common::analytics::{Role, format_uptime};
use common::{Activity, Family, Group, Interface};
use crossterm::cursor::{self, MoveTo};
use crossterm::style::{Attribute, Print, SetAttribute};
use crossterm::terminal::{self, Clear, ClearType, EnterAlternateScreen, LeaveAlternateScreen};
use crossterm::{execute, queue};

use crate::cli::Mode;
use crate::logging::{CTIME_FORMAT, SharedLog};

const TITLE_ROW: u16 = 0;
const HOSTDATE_ROW: u16 = 1;
const HEADING_ROW: u16 = 2;
const GROUP_ROW: u16 = 3;
const LABEL_WIDTH: usize = 31;
const HOWTO: &str = "ctrl-c to exit";

/// Restores the terminal however we leave full-screen mode.
pub struct TerminalGuard;

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        let _ = terminal::disable_raw_mode();
        let _ = execute!(stdout(), LeaveAlternateScreen, cursor::Show);
    }
}

/// Renders group state. Never changes it.
pub struct Screen {
    mode: Mode,
    role: Role,
    width: u16,
    height: u16,
    /// `hostname (address@iface)`
    host: String,
    log: SharedLog,
    out: Stdout,
    tty: bool,
}

impl Screen {
    pub fn new(mode: Mode, role: Role, iface: &Interface, log: SharedLog) -> Self {
        let (width, height) = terminal::size().unwrap_or((80, 24));
        let hostname = nix::unistd::gethostname()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "localhost".to_string());
        let address = iface
            .address(Family::V4)
            .or_else(|| iface.address(Family::V6))
            .map_or_else(|| "0.0.0.0".to_string(), |a| a.to_string());

        Screen {
            mode,
            role,
            width,
            height,
            host: format!("{} ({}@{})", hostname, address, iface.display_name()),
            log,
            out: stdout(),
            tty: io::stdout().is_terminal(),
        }
    }

    pub fn enter(&mut self) -> io::Result<TerminalGuard> {
        terminal::enable_raw_mode()?;
        execute!(self.out, EnterAlternateScreen, cursor::Hide)?;
        Ok(TerminalGuard)
    }

    pub fn resize(&mut self, groups: &[Group], uptime: Duration) -> io::Result<()> {
        if let Ok((width, height)) = terminal::size() {
            self.width = width;
            self.height = height;
        }
        self.redraw(groups, uptime)
    }

    /// Clears the screen and draws everything.
    pub fn redraw(&mut self, groups: &[Group], uptime: Duration) -> io::Result<()> {
        if !self.mode.is_fullscreen() {
            return Ok(());
        }

        let title = match self.role {
            Role::Sender => "mcwatch :: sending multicast",
            Role::Receiver => "mcwatch :: receiving multicast",
        };
        let width = self.width as usize;
        queue!(
            self.out,
            Clear(ClearType::All),
            MoveTo(centered(self.width, title), TITLE_ROW),
            SetAttribute(Attribute::Bold),
            Print(title),
            SetAttribute(Attribute::Reset),
            MoveTo(centered(self.width, HOWTO), HOSTDATE_ROW),
            SetAttribute(Attribute::Dim),
            Print(HOWTO),
            SetAttribute(Attribute::Reset),
            MoveTo(0, HEADING_ROW),
            SetAttribute(Attribute::Reverse),
            Print(pad(&heading(self.mode, width), width)),
            SetAttribute(Attribute::Reset),
        )?;

        if let Some(row) = self.log_heading_row(groups.len()) {
            queue!(
                self.out,
                MoveTo(0, row),
                SetAttribute(Attribute::Reverse),
                Print(pad(&format!("{:<24}  Log", "Time"), width)),
                SetAttribute(Attribute::Reset),
            )?;
        }

        self.show_groups(groups)?;
        self.show_clock(uptime)
    }

    /// One row per group, called every tick.
    pub fn show_groups(&mut self, groups: &[Group]) -> io::Result<()> {
        match self.mode {
            Mode::Plain => return self.progress(groups),
            Mode::Plot | Mode::Rate | Mode::Table => {}
        }

        let width = self.width as usize;
        for (i, group) in groups.iter().enumerate() {
            let Some(row) = self.row(GROUP_ROW as usize + i) else {
                break;
            };
            let line = match self.mode {
                Mode::Rate => rate_row(group),
                Mode::Table => table_row(group),
                _ => plot_row(group, width),
            };
            queue!(self.out, MoveTo(0, row), Print(pad(&line, width)))?;
        }
        self.out.flush()
    }

    /// Uptime, host line, wall clock and the log window. Once a second.
    pub fn show_clock(&mut self, uptime: Duration) -> io::Result<()> {
        if !self.mode.is_fullscreen() {
            return Ok(());
        }

        let up = format_uptime(uptime.as_secs());
        let now = chrono::Local::now().format(CTIME_FORMAT).to_string();
        queue!(
            self.out,
            MoveTo(self.width.saturating_sub(up.len() as u16), TITLE_ROW),
            Print(&up),
            MoveTo(0, HOSTDATE_ROW),
            Print(&self.host),
            MoveTo(self.width.saturating_sub(now.len() as u16), HOSTDATE_ROW),
            Print(&now),
        )?;
        self.out.flush()
    }

    pub fn show_log(&mut self, group_count: usize) -> io::Result<()> {
        if !self.mode.is_fullscreen() {
            return Ok(());
        }
        let Some(heading) = self.log_heading_row(group_count) else {
            return Ok(());
        };
        let first = heading + 1;
        let rows = self.height.saturating_sub(first) as usize;
        let width = self.width as usize;

        let lines: Vec<String> = match self.log.lock() {
            Ok(log) => log.window(rows).into_iter().map(str::to_string).collect(),
            Err(_) => return Ok(()),
        };
        for i in 0..rows {
            let line = lines.get(i).map(String::as_str).unwrap_or("");
            queue!(self.out, MoveTo(0, first + i as u16), Print(pad(line, width)))?;
        }
        self.out.flush()
    }

    pub fn scroll_log(&mut self, up: bool, group_count: usize) -> io::Result<()> {
        let page = self
            .height
            .saturating_sub(GROUP_ROW + group_count as u16 + 2)
            .max(1) as usize;
        if let Ok(mut log) = self.log.lock() {
            if up {
                log.scroll_up(page);
            } else {
                log.scroll_down(page);
            }
        }
        self.show_log(group_count)
    }

    /// Plain mode: a dot per tick that saw traffic, only on a terminal.
    fn progress(&mut self, groups: &[Group]) -> io::Result<()> {
        if !self.tty {
            return Ok(());
        }
        let active = groups
            .iter()
            .any(|g| g.activity.last().is_some_and(|a| a != Activity::Idle));
        if active {
            write!(self.out, ".")?;
            self.out.flush()?;
        }
        Ok(())
    }

    /// Used before printing the final report, so it starts on a fresh line.
    pub fn finish(&mut self) -> io::Result<()> {
        if self.mode == Mode::Plain && self.tty {
            writeln!(self.out)?;
        }
        if let Ok(mut log) = self.log.lock() {
            log.reset_scroll();
        }
        Ok(())
    }

    fn log_heading_row(&self, group_count: usize) -> Option<u16> {
        self.row(GROUP_ROW as usize + group_count + 1)
    }

    fn row(&self, row: usize) -> Option<u16> {
        u16::try_from(row).ok().filter(|&r| r < self.height)
    }
}

fn centered(width: u16, text: &str) -> u16 {
    width.saturating_sub(text.len() as u16) / 2
}

/// Cuts or space pads `line` to exactly `width` columns.
fn pad(line: &str, width: usize) -> String {
    format!("{:<width$.width$}", line)
}

fn heading(mode: Mode, width: usize) -> String {
    let label = "Source,Group";
    match mode {
        Mode::Rate => format!("{:<LABEL_WIDTH$}    {:>14}  {:>16}", label, "Rate", "Bytes"),
        Mode::Table => format!(
            "{:<LABEL_WIDTH$} {:>10} {:>7} {:>7} {:>7} {:>7} {:>7} {:>12} {:>11}",
            label, "Packets", "Gaps", "Dupes", "Order", "Delayed", "Invalid", "Bytes", "Rate"
        ),
        Mode::Plot | Mode::Plain => {
            let fill = width.saturating_sub(55);
            format!("{:<LABEL_WIDTH$}    Plotter{:fill$}      Packets", label, "")
        }
    }
}

/// Turns on activity only.
pub fn spinner(count: u64) -> char {
    const SPINNER: [char; 4] = ['|', '/', '-', '\\'];
    SPINNER[(count % SPINNER.len() as u64) as usize]
}

pub fn plot_row(group: &Group, width: usize) -> String {
    let cells = width
        .saturating_sub(50)
        .min(group.activity.capacity());
    let mut plot: String = group.activity.tail(cells).map(Activity::symbol).collect();
    // Right align, newest cell at the right edge.
    let fill = cells.saturating_sub(plot.chars().count());
    plot.insert_str(0, &" ".repeat(fill));

    format!(
        "{:<LABEL_WIDTH$}  {} [{}] {:>13}",
        group.label(),
        spinner(group.stats.count),
        plot,
        group.stats.count
    )
}

pub fn rate_row(group: &Group) -> String {
    format!(
        "{:<LABEL_WIDTH$}  {} {:>14}  {:>16}",
        group.label(),
        spinner(group.stats.count),
        format_rate(group.rate.rate()),
        group.stats.bytes_total
    )
}

pub fn table_row(group: &Group) -> String {
    let c = &group.stats;
    format!(
        "{:<LABEL_WIDTH$} {:>10} {:>7} {:>7} {:>7} {:>7} {:>7} {:>12} {:>11}",
        group.label(),
        c.count,
        c.gaps,
        c.dupes,
        c.order,
        c.delayed,
        c.invalid,
        c.bytes_total,
        format_rate(group.rate.rate())
    )
}

/// `812 B/s`, `12.5 kB/s`, `1.2 MB/s`
pub fn format_rate(bytes_per_sec: f64) -> String {
    const UNITS: [&str; 4] = ["B/s", "kB/s", "MB/s", "GB/s"];
    let mut value = bytes_per_sec;
    let mut unit = 0;
    while value >= 1000.0 && unit < UNITS.len() - 1 {
        value /= 1000.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{:.0} {}", value, UNITS[unit])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group(history: usize) -> Group {
        Group::new(None, "225.1.2.3".parse().unwrap(), 1234, history)
    }

    #[test]
    fn spinner_turns_with_count() {
        let turns: String = (0..5).map(spinner).collect();
        assert_eq!(turns, "|/-\\|");
    }

    #[test]
    fn plot_row_shows_newest_cells_right_aligned() {
        let mut g = group(64);
        g.record(Activity::InOrder, 100);
        g.end_tick();
        g.end_tick();
        g.record(Activity::Gap, 100);

        let row = plot_row(&g, 56);
        assert!(row.starts_with("*,225.1.2.3"));
        assert!(row.contains("[   . G]"), "row was {row:?}");
        assert!(row.ends_with("            2"));
    }

    #[test]
    fn plot_is_bounded_by_history() {
        let mut g = group(4);
        for _ in 0..10 {
            g.record(Activity::InOrder, 1);
        }
        assert!(plot_row(&g, 200).contains("[....]"));
    }

    #[test]
    fn table_row_lists_counters() {
        let mut g = group(8);
        g.record(Activity::InOrder, 100);
        g.record(Activity::Duplicate, 100);
        g.record(Activity::Reorder, 100);
        let row = table_row(&g);
        let fields: Vec<&str> = row.split_whitespace().collect();
        assert_eq!(fields[..8], ["*,225.1.2.3", "3", "0", "1", "1", "0", "0", "300"]);
    }

    #[test]
    fn rates_pick_a_readable_unit() {
        assert_eq!(format_rate(0.0), "0 B/s");
        assert_eq!(format_rate(812.0), "812 B/s");
        assert_eq!(format_rate(12_500.0), "12.5 kB/s");
        assert_eq!(format_rate(1_234_567.0), "1.2 MB/s");
    }

    #[test]
    fn pad_cuts_and_fills() {
        assert_eq!(pad("abc", 5), "abc  ");
        assert_eq!(pad("abcdef", 4), "abcd");
    }
}
