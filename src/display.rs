//! # Status Display
//!
//! The device UI is a small status panel: current height, fill level with a
//! gauge, sensor health, network and broker state, and uptime. Rendering is
//! kept behind [`StatusDisplay`] so the core only pushes a [`DisplayFrame`]
//! and never waits on a screen.
//!
//! [`ConsoleDisplay`] is the development renderer used with `--stdout`. It
//! redraws whenever the frame changes, and at least every
//! `refresh_every` ticks so the uptime clock keeps moving.

use chrono::Local;
use std::io::{self, Write};
use std::time::Duration;

const GAUGE_WIDTH: usize = 20;

/// Everything the display shows for one tick.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DisplayFrame {
    pub height_mm: u32,
    pub fill_percent: u8,
    pub sensor_ok: bool,
    pub network_up: bool,
    pub broker_up: bool,
    pub uptime: Duration,
}

/// Receiver of display frames. Must return promptly.
pub trait StatusDisplay {
    fn update(&mut self, frame: &DisplayFrame);
}

/// Uptime as `MM:SS`; minutes keep counting past 59.
pub fn format_uptime(uptime: Duration) -> String {
    let secs = uptime.as_secs();
    format!("{:02}:{:02}", secs / 60, secs % 60)
}

/// Horizontal fill gauge, e.g. `[#####               ]`.
pub fn gauge(fill_percent: u8) -> String {
    let filled = (usize::from(fill_percent.min(100)) * GAUGE_WIDTH + 50) / 100;
    format!("[{}{}]", "#".repeat(filled), " ".repeat(GAUGE_WIDTH - filled))
}

/// Multi-line status panel without the wall-clock line.
pub fn render_panel(frame: &DisplayFrame) -> String {
    let network = if frame.network_up { "up" } else { "No WiFi" };
    let broker = if frame.broker_up { "up" } else { "down" };
    let sensor = if frame.sensor_ok { "OK" } else { "Error" };
    let (height, level) = if frame.sensor_ok {
        (frame.height_mm.to_string(), frame.fill_percent.to_string())
    } else {
        ("---".to_string(), "---".to_string())
    };

    format!(
        "== NMEA Level Sensor ==  net: {}  mqtt: {}  up {}\n\
         Height [mm]: {}\n\
         Level  [%]:  {} {}\n\
         Sensor: {}\n",
        network,
        broker,
        format_uptime(frame.uptime),
        height,
        level,
        gauge(frame.fill_percent),
        sensor
    )
}

/// Text panel written to any sink (stdout by default).
pub struct ConsoleDisplay<W: Write = io::Stdout> {
    out: W,
    refresh_every: u32,
    ticks_since_draw: u32,
    last: Option<DisplayFrame>,
}

impl ConsoleDisplay<io::Stdout> {
    pub fn stdout(refresh_every: u32) -> Self {
        Self::new(io::stdout(), refresh_every)
    }
}

impl<W: Write> ConsoleDisplay<W> {
    pub fn new(out: W, refresh_every: u32) -> Self {
        Self {
            out,
            refresh_every: refresh_every.max(1),
            ticks_since_draw: 0,
            last: None,
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    /// Changes that are worth an immediate redraw; uptime alone is not.
    fn differs(&self, frame: &DisplayFrame) -> bool {
        match &self.last {
            None => true,
            Some(last) => DisplayFrame {
                uptime: frame.uptime,
                ..*last
            } != *frame,
        }
    }
}

impl<W: Write> StatusDisplay for ConsoleDisplay<W> {
    fn update(&mut self, frame: &DisplayFrame) {
        self.ticks_since_draw += 1;
        if !self.differs(frame) && self.ticks_since_draw < self.refresh_every {
            return;
        }
        self.ticks_since_draw = 0;
        self.last = Some(*frame);

        let clock = Local::now().format("%H:%M:%S");
        // A broken console must not stop the device
        let _ = write!(self.out, "{}Updated {}\n\n", render_panel(frame), clock);
        let _ = self.out.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame() -> DisplayFrame {
        DisplayFrame {
            height_mm: 100,
            fill_percent: 25,
            sensor_ok: true,
            network_up: true,
            broker_up: false,
            uptime: Duration::from_secs(125),
        }
    }

    #[test]
    fn test_format_uptime() {
        assert_eq!(format_uptime(Duration::from_secs(0)), "00:00");
        assert_eq!(format_uptime(Duration::from_secs(125)), "02:05");
        assert_eq!(format_uptime(Duration::from_secs(6000)), "100:00");
    }

    #[test]
    fn test_gauge() {
        assert_eq!(gauge(0), format!("[{}]", " ".repeat(20)));
        assert_eq!(gauge(25), format!("[{}{}]", "#".repeat(5), " ".repeat(15)));
        assert_eq!(gauge(100), format!("[{}]", "#".repeat(20)));
    }

    #[test]
    fn test_panel_contents() {
        let panel = render_panel(&frame());
        assert!(panel.contains("net: up"));
        assert!(panel.contains("mqtt: down"));
        assert!(panel.contains("up 02:05"));
        assert!(panel.contains("Height [mm]: 100"));
        assert!(panel.contains("Level  [%]:  25 [#####"));
        assert!(panel.contains("Sensor: OK"));
    }

    #[test]
    fn test_panel_hides_values_without_sensor() {
        let panel = render_panel(&DisplayFrame {
            sensor_ok: false,
            network_up: false,
            ..frame()
        });
        assert!(panel.contains("Height [mm]: ---"));
        assert!(panel.contains("Sensor: Error"));
        assert!(panel.contains("net: No WiFi"));
    }

    #[test]
    fn test_console_redraws_on_change_or_refresh() {
        let mut display = ConsoleDisplay::new(Vec::new(), 3);
        let mut f = frame();

        display.update(&f); // first frame draws
        f.uptime += Duration::from_millis(50);
        display.update(&f); // uptime only: skipped
        f.fill_percent = 26;
        display.update(&f); // changed: draws
        f.uptime += Duration::from_millis(50);
        display.update(&f);
        display.update(&f);
        display.update(&f); // third unchanged tick: forced refresh

        let output = String::from_utf8(display.into_inner()).unwrap();
        assert_eq!(output.matches("== NMEA Level Sensor ==").count(), 3);
    }
}
