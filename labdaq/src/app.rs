//! App state and main loop: input handling, pulling sensors, recording, alarms, drawing.

use std::{
    io::{self, Write},
    path::PathBuf,
    process::Command,
    sync::Arc,
};

use anyhow::Context;
use chrono::Local;
use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout},
    Terminal,
};
use tokio::time::{sleep, Duration};
use tracing::{error, info, warn};

use labdaq_core::{
    calibrator::CalibrationSession, recording::RecordingSession, Alarm, AlarmLatch,
    CalibrationFile, NoHardware, Sensor, SystemClock,
};

use crate::config::RunOptions;
use crate::plot::PlotSeries;
use crate::rigs::{apply_calibration_file, attach_sensors, RigEntry};
use crate::ui::{
    calibration::draw_calibration, chart::draw_sensor_chart, header::draw_header,
    status::draw_status,
};

const MASS_STEP: f64 = 0.1;
// seconds per key press when moving the averaging region
const REGION_STEP: f64 = 0.5;

pub struct SensorPanel {
    pub sensor: Sensor,
    pub plot: PlotSeries,
    pub include: bool,
    pub alarm: Alarm,
    pub latch: AlarmLatch,
}

impl SensorPanel {
    pub fn new(sensor: Sensor) -> Self {
        let spec = sensor.spec();
        let span = spec
            .x_range
            .map(|(lo, hi)| hi - lo)
            .unwrap_or(sensor.refresh_period());
        let alarm = spec.alarm.unwrap_or_default();
        Self {
            plot: PlotSeries::new(span),
            include: true,
            alarm,
            latch: AlarmLatch::default(),
            sensor,
        }
    }
}

pub struct CalibrationPanel {
    /// Index into `App::panels`
    pub sensor: usize,
    pub session: CalibrationSession,
    pub mass: f64,
    pub trace: PlotSeries,
}

pub struct App {
    opts: RunOptions,
    panels: Vec<SensorPanel>,
    selected: usize,
    recording: Option<RecordingSession>,
    calibration: Option<CalibrationPanel>,
    calibration_dir: PathBuf,
    status: String,
    ring_bell: bool,
    should_quit: bool,
}

impl App {
    /// Builds and attaches the rig's sensors. Must run inside the tokio runtime.
    pub fn new(entry: &RigEntry, opts: RunOptions) -> Self {
        let (sensors, failures) = attach_sensors(entry, &NoHardware, Arc::new(SystemClock));
        let mut app = Self::with_sensors(sensors, opts);
        if let Some(first) = failures.first() {
            app.status = if failures.len() == 1 {
                first.to_string()
            } else {
                format!("{first} (+{} more, see log)", failures.len() - 1)
            };
        }
        for e in &failures {
            error!(error = %e, "sensor not attached");
        }
        if let Some(path) = app.opts.calibration.clone() {
            app.load_calibration(&path, false);
        }
        app
    }

    pub fn with_sensors(sensors: Vec<Sensor>, opts: RunOptions) -> Self {
        Self {
            opts,
            panels: sensors.into_iter().map(SensorPanel::new).collect(),
            selected: 0,
            recording: None,
            calibration: None,
            calibration_dir: PathBuf::from("."),
            status: String::new(),
            ring_bell: false,
            should_quit: false,
        }
    }

    /// Where `s` writes `<sensor name>.cal`.
    pub fn set_calibration_dir(&mut self, dir: PathBuf) {
        self.calibration_dir = dir;
    }

    pub fn panels(&self) -> &[SensorPanel] {
        &self.panels
    }

    pub fn selected(&self) -> usize {
        self.selected
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    pub fn recording(&self) -> Option<&RecordingSession> {
        self.recording.as_ref()
    }

    pub fn calibration(&self) -> Option<&CalibrationPanel> {
        self.calibration.as_ref()
    }

    pub fn should_quit(&self) -> bool {
        self.should_quit
    }

    pub fn take_bell(&mut self) -> bool {
        std::mem::take(&mut self.ring_bell)
    }

    pub async fn run(&mut self) -> anyhow::Result<()> {
        // Terminal setup
        enable_raw_mode().context("enabling raw mode")?;
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen)?;
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend)?;
        terminal.clear()?;

        // Main loop
        let res = self.event_loop(&mut terminal).await;

        // Teardown
        disable_raw_mode()?;
        execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
        terminal.show_cursor()?;

        self.stop_recording();
        res
    }

    async fn event_loop<B: ratatui::backend::Backend>(
        &mut self,
        terminal: &mut Terminal<B>,
    ) -> anyhow::Result<()> {
        loop {
            // Input (non-blocking)
            while event::poll(Duration::ZERO)? {
                if let Event::Key(k) = event::read()? {
                    if k.kind == KeyEventKind::Press {
                        self.handle_key(k.code);
                    }
                }
            }
            if self.should_quit {
                break;
            }

            self.tick();
            if self.take_bell() {
                let mut out = io::stdout();
                out.write_all(b"\x07")?;
                out.flush()?;
            }

            terminal.draw(|f| self.draw(f))?;
            sleep(self.opts.tick).await;
        }
        Ok(())
    }

    /// One consumer pass over every sensor.
    pub fn tick(&mut self) {
        let now = Local::now();
        let mut write_err = None;
        let mut tripped = Vec::new();
        for (i, panel) in self.panels.iter_mut().enumerate() {
            let name = panel.sensor.name().to_string();
            let (x_range, y_range) = (panel.sensor.spec().x_range, panel.sensor.spec().y_range);
            let pulled = panel.sensor.pull();
            panel.plot.update_from_window(&pulled.window, x_range, y_range);

            if let Some(rec) = self.recording.as_mut() {
                if let Err(e) = rec.record(&name, panel.include, &pulled.new_times, &pulled.new_values)
                {
                    write_err = Some(e);
                }
            }
            if let Some(cal) = self.calibration.as_mut().filter(|c| c.sensor == i) {
                cal.session.observe(&pulled.new_times, &pulled.new_values);
                cal.trace.set_points(cal.session.trace_points(), None);
            }
            if panel.latch.update(&panel.alarm, &pulled.new_values) {
                tripped.push((name, pulled.new_values.last().copied().unwrap_or_default()));
            }
        }

        if let Some(e) = write_err {
            error!(error = %e, "recording write failed");
            self.status = format!("recording stopped: {e}");
            self.recording = None;
        }
        if self.recording.as_ref().is_some_and(|r| r.expired(now)) {
            self.stop_recording();
        }
        for (name, value) in tripped {
            warn!(sensor = %name, value, "alarm tripped");
            self.status = format!("ALARM: {name} at {value}");
            self.ring_bell = true;
            if let Some(cmd) = &self.opts.alarm_command {
                spawn_alarm_command(cmd, &name, value);
            }
        }
    }

    pub fn handle_key(&mut self, code: KeyCode) {
        if self.calibration.is_some() && self.handle_calibration_key(code) {
            return;
        }
        match code {
            KeyCode::Char('q') | KeyCode::Char('Q') | KeyCode::Esc => self.should_quit = true,
            KeyCode::Tab if !self.panels.is_empty() => {
                self.selected = (self.selected + 1) % self.panels.len();
            }
            KeyCode::BackTab if !self.panels.is_empty() => {
                self.selected = (self.selected + self.panels.len() - 1) % self.panels.len();
            }
            KeyCode::Char('r') => self.toggle_recording(),
            KeyCode::Char('i') => {
                if let Some(p) = self.panels.get_mut(self.selected) {
                    p.include = !p.include;
                    self.status = format!(
                        "{} {} recording",
                        p.sensor.name(),
                        if p.include { "included in" } else { "excluded from" }
                    );
                }
            }
            KeyCode::Char('a') => {
                if let Some(p) = self.panels.get_mut(self.selected) {
                    p.alarm.enabled = !p.alarm.enabled;
                    p.latch.reset();
                    info!(sensor = p.sensor.name(), enabled = p.alarm.enabled, "alarm toggled");
                    self.status = format!(
                        "alarm {} for {}",
                        if p.alarm.enabled { "armed" } else { "off" },
                        p.sensor.name()
                    );
                }
            }
            KeyCode::Char('c') => self.open_calibration(),
            KeyCode::Char('l') => match self.opts.calibration.clone() {
                Some(path) => self.load_calibration(&path, true),
                None => self.status = "no --calibration file given".into(),
            },
            _ => {}
        }
    }

    // Returns true when the key was consumed by the open calibration session.
    fn handle_calibration_key(&mut self, code: KeyCode) -> bool {
        let Some(cal) = self.calibration.as_mut() else {
            return false;
        };
        match code {
            KeyCode::Char('+') | KeyCode::Char('=') => {
                cal.mass = round_mass(cal.mass + MASS_STEP);
            }
            KeyCode::Char('-') => {
                cal.mass = round_mass((cal.mass - MASS_STEP).max(0.0));
            }
            KeyCode::Char('[') => cal.session.shift_region(-REGION_STEP),
            KeyCode::Char(']') => cal.session.shift_region(REGION_STEP),
            KeyCode::Char('{') => cal.session.resize_region(-REGION_STEP),
            KeyCode::Char('}') => cal.session.resize_region(REGION_STEP),
            KeyCode::Char('p') => {
                self.status = match cal.session.add_point(cal.mass) {
                    Some(p) => format!("point added: {:.2} Kg @ {}", p.mass, p.voltage),
                    None => "no region mean yet; wait for the trace to fill".into(),
                };
            }
            KeyCode::Char('x') => {
                if let Some(p) = cal.session.remove_last() {
                    self.status = format!("point removed: {:.2} Kg", p.mass);
                }
            }
            KeyCode::Char('s') => self.save_calibration(),
            KeyCode::Enter => self.apply_calibration(),
            KeyCode::Esc => {
                self.calibration = None;
                self.status = "calibration closed without applying".into();
            }
            _ => return false,
        }
        true
    }

    fn open_calibration(&mut self) {
        let Some(p) = self.panels.get(self.selected) else {
            return;
        };
        if !p.sensor.spec().kind.is_calibratable() {
            self.status = format!("{} is not a strain sensor", p.sensor.name());
            return;
        }
        let session = CalibrationSession::begin(&p.sensor);
        self.status = format!("calibrating {} (raw output)", p.sensor.name());
        self.calibration = Some(CalibrationPanel {
            sensor: self.selected,
            session,
            mass: 0.0,
            trace: PlotSeries::new(p.sensor.refresh_period()),
        });
    }

    fn save_calibration(&mut self) {
        let Some(cal) = self.calibration.as_ref() else {
            return;
        };
        let Some(fit) = cal.session.fit() else {
            self.status = "nothing to save: fit needs two points".into();
            return;
        };
        let path = self
            .calibration_dir
            .join(format!("{}.cal", cal.session.sensor_name()));
        self.status = match CalibrationFile::from_affine(fit).save(&path, Local::now()) {
            Ok(()) => {
                info!(path = %path.display(), "calibration saved");
                format!("saved {}", path.display())
            }
            Err(e) => {
                error!(error = %e, "calibration save failed");
                e.to_string()
            }
        };
    }

    fn apply_calibration(&mut self) {
        let Some(cal) = self.calibration.as_ref() else {
            return;
        };
        let Some(panel) = self.panels.get(cal.sensor) else {
            self.calibration = None;
            return;
        };
        match cal.session.apply(&panel.sensor) {
            Ok(a) => {
                self.status = format!(
                    "{} calibrated: gradient {} intercept {}",
                    panel.sensor.name(),
                    a.gradient,
                    a.intercept
                );
                self.calibration = None;
            }
            Err(e) => self.status = e.to_string(),
        }
    }

    fn load_calibration(&mut self, path: &std::path::Path, selected_only: bool) {
        let result = if selected_only {
            match self.panels.get(self.selected) {
                Some(p) if p.sensor.spec().kind.is_calibratable() => {
                    CalibrationFile::load(path).and_then(|f| {
                        p.sensor.set_calibration(f.gradient, f.intercept)?;
                        Ok(1)
                    })
                }
                Some(p) => {
                    self.status = format!("{} is not a strain sensor", p.sensor.name());
                    return;
                }
                None => return,
            }
        } else {
            apply_calibration_file(path, self.panels.iter().map(|p| &p.sensor))
        };
        self.status = match result {
            Ok(n) => format!("calibration {} applied to {n} sensor(s)", path.display()),
            Err(e) => {
                error!(error = %e, "loading calibration failed");
                e.to_string()
            }
        };
    }

    fn toggle_recording(&mut self) {
        if self.recording.is_some() {
            self.stop_recording();
            return;
        }
        match RecordingSession::start(&self.opts.output, Local::now(), self.opts.duration) {
            Ok(rec) => {
                self.status = format!("recording to {}", rec.path().display());
                self.recording = Some(rec);
            }
            Err(e) => {
                error!(error = %e, "could not start recording");
                self.status = e.to_string();
            }
        }
    }

    fn stop_recording(&mut self) {
        if let Some(rec) = self.recording.take() {
            self.status = match rec.finish() {
                Ok(path) => format!("recording saved to {}", path.display()),
                Err(e) => {
                    error!(error = %e, "finishing recording failed");
                    e.to_string()
                }
            };
        }
    }

    pub fn draw(&mut self, f: &mut ratatui::Frame<'_>) {
        let area = f.area();

        // Root rows: header, body, status
        let rows = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(2),
                Constraint::Min(4),
                Constraint::Length(1),
            ])
            .split(area);

        draw_header(
            f,
            rows[0],
            &self.opts.rig_name,
            self.panels.len(),
            self.recording.as_ref(),
            Local::now(),
        );

        // Body: charts stacked on the left, calibration panel on the right when open
        let body = if self.calibration.is_some() {
            Layout::default()
                .direction(Direction::Horizontal)
                .constraints([Constraint::Percentage(55), Constraint::Percentage(45)])
                .split(rows[1])
        } else {
            Layout::default()
                .direction(Direction::Horizontal)
                .constraints([Constraint::Percentage(100)])
                .split(rows[1])
        };

        let n = self.panels.len().max(1) as u32;
        let charts = Layout::default()
            .direction(Direction::Vertical)
            .constraints((0..n).map(|_| Constraint::Ratio(1, n)).collect::<Vec<_>>())
            .split(body[0]);
        let recording = self.recording.is_some();
        for (i, panel) in self.panels.iter().enumerate() {
            draw_sensor_chart(f, charts[i], panel, i, i == self.selected, recording);
        }
        if let Some(cal) = &self.calibration {
            draw_calibration(f, body[1], cal);
        }

        draw_status(f, rows[2], &self.status, self.calibration.is_some());
    }
}

fn round_mass(m: f64) -> f64 {
    (m * 1000.0).round() / 1000.0
}

/// Runs the rig's alarm hook without waiting on it.
pub fn spawn_alarm_command(cmd: &str, sensor: &str, value: f64) {
    let mut command = Command::new("sh");
    command
        .arg("-c")
        .arg(cmd)
        .env("LABDAQ_ALARM_SENSOR", sensor)
        .env("LABDAQ_ALARM_VALUE", value.to_string());
    std::thread::spawn(move || match command.status() {
        Ok(s) if !s.success() => warn!(status = %s, "alarm command failed"),
        Ok(_) => {}
        Err(e) => warn!(error = %e, "alarm command did not start"),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use labdaq_core::source::manual::{ManualChannel, ManualHandle};
    use labdaq_core::source::HardwareSource;
    use labdaq_core::{ManualClock, SensorKind, SensorSpec};
    use ratatui::backend::TestBackend;

    fn opts(dir: &std::path::Path) -> RunOptions {
        RunOptions {
            rig_name: "test".into(),
            output: dir.join("run.csv"),
            duration: None,
            calibration: None,
            alarm_command: None,
            tick: Duration::from_millis(45),
        }
    }

    fn sensor(name: &str, kind: SensorKind, clock: &Arc<ManualClock>) -> (Sensor, ManualHandle) {
        let mut s = Sensor::new(name, SensorSpec::new(kind), clock.clone());
        let (chan, h) = ManualChannel::new();
        s.attach(Box::new(HardwareSource::new(chan))).unwrap();
        (s, h)
    }

    fn rig(dir: &std::path::Path) -> (App, Arc<ManualClock>, ManualHandle, ManualHandle) {
        let clock = Arc::new(ManualClock::new(0.0));
        let (a, ha) = sensor("cell", SensorKind::Strain { channel: 0 }, &clock);
        let (b, hb) = sensor("oven", SensorKind::IrTemperature, &clock);
        let mut app = App::with_sensors(vec![a, b], opts(dir));
        app.set_calibration_dir(dir.to_path_buf());
        (app, clock, ha, hb)
    }

    #[test]
    fn tick_feeds_plots() {
        let dir = tempfile::tempdir().unwrap();
        let (mut app, clock, ha, _hb) = rig(dir.path());
        clock.advance(0.5);
        ha.emit(2.0);
        app.tick();
        assert_eq!(app.panels()[0].plot.points, vec![(0.5, 2.0)]);
        assert!(app.panels()[1].plot.points.is_empty());
    }

    #[test]
    fn selection_wraps_both_ways() {
        let dir = tempfile::tempdir().unwrap();
        let (mut app, ..) = rig(dir.path());
        app.handle_key(KeyCode::BackTab);
        assert_eq!(app.selected(), 1);
        app.handle_key(KeyCode::Tab);
        assert_eq!(app.selected(), 0);
    }

    #[test]
    fn recording_honours_include_flag() {
        let dir = tempfile::tempdir().unwrap();
        let (mut app, clock, ha, hb) = rig(dir.path());
        app.handle_key(KeyCode::Tab);
        app.handle_key(KeyCode::Char('i')); // exclude oven
        app.handle_key(KeyCode::Char('r'));
        assert!(app.recording().is_some());
        clock.advance(0.2);
        ha.emit(1.0);
        hb.emit(50.0);
        app.tick();
        let path = app.recording().unwrap().path().to_path_buf();
        app.handle_key(KeyCode::Char('r'));
        assert!(app.recording().is_none());

        let data = labdaq_core::recording::read_recording(&path).unwrap();
        assert_eq!(data.series.len(), 1);
        assert_eq!(data.series[0].name, "cell");
        assert_eq!(data.series[0].values, vec![1.0]);
    }

    #[test]
    fn alarm_trips_once() {
        let dir = tempfile::tempdir().unwrap();
        let (mut app, clock, ha, _hb) = rig(dir.path());
        app.handle_key(KeyCode::Char('a'));
        clock.advance(0.1);
        ha.emit(5000.0);
        app.tick();
        assert!(app.take_bell());
        assert!(app.status().starts_with("ALARM: cell"));
        ha.emit(6000.0);
        app.tick();
        assert!(!app.take_bell());
        assert!(app.panels()[0].latch.is_tripped());
    }

    #[test]
    fn calibration_only_for_strain() {
        let dir = tempfile::tempdir().unwrap();
        let (mut app, ..) = rig(dir.path());
        app.handle_key(KeyCode::Tab);
        app.handle_key(KeyCode::Char('c'));
        assert!(app.calibration().is_none());
        assert!(app.status().contains("not a strain sensor"));
    }

    #[test]
    fn calibration_session_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let (mut app, clock, ha, _hb) = rig(dir.path());
        app.panels[0].sensor.set_calibration(9.0, 9.0).unwrap();
        app.handle_key(KeyCode::Char('c'));
        assert!(app.panels()[0].sensor.calibration().is_none());

        // fill the trace past the region with a constant raw value
        let feed = |app: &mut App, raw: f64| {
            for _ in 0..12 {
                clock.advance(1.0);
                ha.emit(raw);
            }
            app.tick();
        };
        feed(&mut app, 0.001);
        app.handle_key(KeyCode::Char('p'));
        for _ in 0..20 {
            app.handle_key(KeyCode::Char('+'));
        }
        assert_eq!(app.calibration().unwrap().mass, 2.0);
        feed(&mut app, 0.003);
        app.handle_key(KeyCode::Char('p'));
        assert_eq!(app.calibration().unwrap().session.points().len(), 2);

        app.handle_key(KeyCode::Char('s'));
        let saved = CalibrationFile::load(&dir.path().join("cell.cal")).unwrap();
        assert!((saved.gradient - 1000.0).abs() < 1e-6);

        app.handle_key(KeyCode::Enter);
        assert!(app.calibration().is_none());
        let a = app.panels()[0].sensor.calibration().unwrap();
        assert!((a.intercept + 1.0).abs() < 1e-9);
    }

    #[test]
    fn region_keys_move_the_averaging_window() {
        let dir = tempfile::tempdir().unwrap();
        let (mut app, clock, ha, _hb) = rig(dir.path());
        app.handle_key(KeyCode::Char('c'));
        // ramp: raw value equals seconds since the first sample
        for i in 0..15 {
            if i > 0 {
                clock.advance(1.0);
            }
            ha.emit(i as f64);
        }
        app.tick();
        let mean = |app: &App| app.calibration().unwrap().session.current_mean();
        assert_eq!(mean(&app), Some(7.5));

        for _ in 0..4 {
            app.handle_key(KeyCode::Char(']'));
        }
        assert_eq!(app.calibration().unwrap().session.region(), (7.0, 12.0));
        assert_eq!(mean(&app), Some(9.5));

        for _ in 0..6 {
            app.handle_key(KeyCode::Char('{'));
        }
        assert_eq!(app.calibration().unwrap().session.region(), (7.0, 9.0));
        assert_eq!(mean(&app), Some(8.0));

        app.handle_key(KeyCode::Char('['));
        assert_eq!(app.calibration().unwrap().session.region(), (6.5, 8.5));
        assert!(!app.should_quit());
    }

    #[test]
    fn esc_closes_calibration_before_quitting() {
        let dir = tempfile::tempdir().unwrap();
        let (mut app, ..) = rig(dir.path());
        app.handle_key(KeyCode::Char('c'));
        app.handle_key(KeyCode::Esc);
        assert!(app.calibration().is_none());
        assert!(!app.should_quit());
        app.handle_key(KeyCode::Esc);
        assert!(app.should_quit());
    }

    #[test]
    fn load_calibration_file_on_selected_sensor() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bridge.cal");
        CalibrationFile {
            gradient: 3.0,
            intercept: 0.0,
        }
        .save(&path, Local::now())
        .unwrap();
        let (mut app, ..) = rig(dir.path());
        app.handle_key(KeyCode::Char('l'));
        assert!(app.status().contains("--calibration"));
        app.opts.calibration = Some(path);
        app.handle_key(KeyCode::Char('l'));
        assert_eq!(app.panels()[0].sensor.calibration().unwrap().gradient, 3.0);
    }

    #[test]
    fn draws_without_panicking() {
        let dir = tempfile::tempdir().unwrap();
        let (mut app, clock, ha, _hb) = rig(dir.path());
        for i in 0..50 {
            clock.advance(0.2);
            ha.emit((i as f64).sin());
        }
        app.tick();
        app.handle_key(KeyCode::Char('r'));
        app.handle_key(KeyCode::Char('c'));
        let mut terminal = Terminal::new(TestBackend::new(100, 30)).unwrap();
        terminal.draw(|f| app.draw(f)).unwrap();
        let text: String = terminal
            .backend()
            .buffer()
            .content()
            .iter()
            .map(|c| c.symbol())
            .collect();
        assert!(text.contains("rig: test"));
        assert!(text.contains("Calibrating cell"));
    }
}
