//! Terminal front end for the `parlife` engine.
//!
//! The engine owns the worker threads and publishes a changed-cell list per
//! generation; this binary is the render/input collaborator. It keeps a
//! local mirror of the published grid, applies drained changes as toggles,
//! pans a camera over the world, and draws everything with `ratatui`.
//!
//! ## Controls
//!
//! * Space: play/pause the simulation
//! * w/a/s/d or arrow keys: pan the camera
//! * q: quit

use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Style},
    widgets::{Block, Borders, Paragraph, Wrap},
    Terminal,
};
use std::{
    error::Error,
    io, process,
    time::{Duration, Instant},
};
use sysinfo::{System, SystemExt};

use parlife::{CellState, SimConfig, Simulation, Viewport};

const DEFAULT_WIDTH: usize = 256;
const DEFAULT_HEIGHT: usize = 192;

/// How far one key press moves the camera, in cells.
const PAN_STEP: usize = 4;

struct CliOptions {
    width: usize,
    height: usize,
    seed: Option<u64>,
}

/// Parses `--width <int>`, `--height <int>` and `--seed <int>`. Dimensions
/// must be positive; anything else is a fatal usage error.
fn parse_args(args: impl Iterator<Item = String>) -> Result<CliOptions, String> {
    let mut options = CliOptions {
        width: DEFAULT_WIDTH,
        height: DEFAULT_HEIGHT,
        seed: None,
    };

    let mut args = args;
    while let Some(flag) = args.next() {
        let value = args
            .next()
            .ok_or_else(|| format!("Option '{flag}' expects a value"))?;
        match flag.as_str() {
            "--width" => options.width = parse_dimension(&flag, &value)?,
            "--height" => options.height = parse_dimension(&flag, &value)?,
            "--seed" => {
                options.seed = Some(value.parse().map_err(|_| {
                    format!("Invalid command argument: option '{flag}', value '{value}'")
                })?);
            }
            _ => return Err(format!("Argument: '{flag}' is invalid")),
        }
    }

    Ok(options)
}

fn parse_dimension(flag: &str, value: &str) -> Result<usize, String> {
    value
        .parse::<usize>()
        .ok()
        .filter(|parsed| *parsed > 0)
        .ok_or_else(|| format!("Invalid command argument: option '{flag}', value '{value}'"))
}

/// Cumulative statistics rebuilt from the drained change list.
struct Stats {
    cells_created: u64,
    cells_destroyed: u64,
}

impl Stats {
    fn new() -> Self {
        Stats {
            cells_created: 0,
            cells_destroyed: 0,
        }
    }
}

/// Render-side state: the simulation handle plus a mirror of the last
/// published generation, kept current by applying changes as toggles.
struct App {
    sim: Simulation,
    mirror: Vec<bool>,
    population: u64,
    stats: Stats,
    sys: System,
    cam_x: usize,
    cam_y: usize,
    view_width: usize,
    view_height: usize,
}

impl App {
    fn new(sim: Simulation) -> App {
        let mut app = App {
            sim,
            mirror: Vec::new(),
            population: 0,
            stats: Stats::new(),
            sys: System::new_all(),
            cam_x: 0,
            cam_y: 0,
            view_width: 0,
            view_height: 0,
        };
        app.resync();
        app
    }

    /// Rebuilds the mirror from the engine's published buffer. Needed after
    /// any camera move, because culled changes never reach the mirror.
    /// `sync_snapshot` also discards queued change entries, which are
    /// already baked into the snapshot and must not be replayed onto it.
    fn resync(&mut self) {
        self.mirror = self
            .sim
            .sync_snapshot()
            .iter()
            .map(|state| *state == CellState::Alive)
            .collect();
        self.population = self.mirror.iter().filter(|alive| **alive).count() as u64;
    }

    /// Drains the published change list and replays it onto the mirror.
    fn apply_changes(&mut self) {
        let width = self.sim.width();
        for change in self.sim.take_changes() {
            let index = change.y * width + change.x;
            self.mirror[index] = !self.mirror[index];
            if self.mirror[index] {
                self.stats.cells_created += 1;
                self.population += 1;
            } else {
                self.stats.cells_destroyed += 1;
                self.population -= 1;
            }
        }
        self.sys.refresh_memory();
    }

    /// Resizes the camera window to the drawable area, clamped to the grid.
    fn fit_view(&mut self, cols: usize, rows: usize) {
        let view_width = cols.min(self.sim.width());
        let view_height = rows.min(self.sim.height());
        if view_width != self.view_width || view_height != self.view_height {
            self.view_width = view_width;
            self.view_height = view_height;
            self.clamp_camera();
            self.push_viewport();
        }
    }

    fn pan(&mut self, dx: isize, dy: isize) {
        self.cam_x = self.cam_x.saturating_add_signed(dx * PAN_STEP as isize);
        self.cam_y = self.cam_y.saturating_add_signed(dy * PAN_STEP as isize);
        self.clamp_camera();
        self.push_viewport();
    }

    fn clamp_camera(&mut self) {
        self.cam_x = self.cam_x.min(self.sim.width() - self.view_width);
        self.cam_y = self.cam_y.min(self.sim.height() - self.view_height);
    }

    fn push_viewport(&mut self) {
        self.sim.set_viewport(Viewport {
            x: self.cam_x,
            y: self.cam_y,
            width: self.view_width,
            height: self.view_height,
        });
        self.resync();
    }
}

/// Draws the visible window of the mirror.
fn draw_grid(f: &mut ratatui::Frame, app: &App, area: Rect) {
    let block = Block::default()
        .borders(Borders::ALL)
        .title("Game of Life [Space: Play/Pause | w/a/s/d: Pan | q: Quit]");

    let width = app.sim.width();
    let mut cells = String::new();
    for y in app.cam_y..app.cam_y + app.view_height {
        for x in app.cam_x..app.cam_x + app.view_width {
            cells.push(if app.mirror[y * width + x] { '•' } else { ' ' });
        }
        cells.push('\n');
    }

    let paragraph = Paragraph::new(cells)
        .style(Style::default().fg(Color::White))
        .block(block);

    f.render_widget(paragraph, area);
}

/// Draws the statistics panel.
fn draw_stats(f: &mut ratatui::Frame, app: &App, area: Rect) {
    let memory_used = app.sys.used_memory() / 1024; // Convert to KB
    let memory_total = app.sys.total_memory() / 1024;
    let generation = app.sim.generation();

    let stats_text = format!(
        "Statistics:\n\
        Generation: {}\n\
        Current Population: {}\n\
        Cells Created: {}\n\
        Cells Destroyed: {}\n\
        Birth Rate: {:.2}/gen\n\
        Death Rate: {:.2}/gen\n\
        Camera: ({}, {})\n\
        Memory Usage: {}KB/{:.2}MB\n\
        Status: {}\n",
        generation,
        app.population,
        app.stats.cells_created,
        app.stats.cells_destroyed,
        app.stats.cells_created as f64 / generation.max(1) as f64,
        app.stats.cells_destroyed as f64 / generation.max(1) as f64,
        app.cam_x,
        app.cam_y,
        memory_used,
        memory_total as f64 / 1024.0,
        if app.sim.is_running() {
            "Running"
        } else {
            "Paused"
        }
    );

    let stats_widget = Paragraph::new(stats_text)
        .block(Block::default().borders(Borders::ALL).title("Statistics"))
        .wrap(Wrap { trim: true });

    f.render_widget(stats_widget, area);
}

/// Routes engine tracing to a file when `RUST_LOG` is set; stdout belongs
/// to the TUI.
fn init_tracing() -> Result<(), Box<dyn Error>> {
    if std::env::var_os("RUST_LOG").is_none() {
        return Ok(());
    }
    let log = std::fs::File::create("parlife.log")?;
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::sync::Mutex::new(log))
        .with_ansi(false)
        .init();
    Ok(())
}

fn run_app(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    app: &mut App,
) -> Result<(), Box<dyn Error>> {
    let mut last_tick = Instant::now();
    let tick_rate = Duration::from_millis(100);

    loop {
        terminal.draw(|f| {
            let chunks = Layout::default()
                .direction(Direction::Horizontal)
                .constraints([Constraint::Percentage(75), Constraint::Percentage(25)].as_ref())
                .split(f.size());

            let grid_area = chunks[0];
            app.fit_view(
                grid_area.width.saturating_sub(2) as usize,
                grid_area.height.saturating_sub(2) as usize,
            );

            draw_grid(f, app, grid_area);
            draw_stats(f, app, chunks[1]);
        })?;

        let timeout = tick_rate
            .checked_sub(last_tick.elapsed())
            .unwrap_or_else(|| Duration::from_secs(0));

        if event::poll(timeout)? {
            if let Event::Key(key) = event::read()? {
                match key.code {
                    KeyCode::Char('q') => break,
                    KeyCode::Char(' ') => {
                        app.sim.toggle_run();
                    }
                    KeyCode::Char('w') | KeyCode::Up => app.pan(0, -1),
                    KeyCode::Char('s') | KeyCode::Down => app.pan(0, 1),
                    KeyCode::Char('a') | KeyCode::Left => app.pan(-1, 0),
                    KeyCode::Char('d') | KeyCode::Right => app.pan(1, 0),
                    _ => {}
                }
            }
        }

        if last_tick.elapsed() >= tick_rate {
            app.apply_changes();
            last_tick = Instant::now();
        }
    }

    Ok(())
}

/// Entry point: parses the CLI, seeds and starts the engine, and runs the
/// terminal event loop until the user quits.
fn main() -> Result<(), Box<dyn Error>> {
    let options = match parse_args(std::env::args().skip(1)) {
        Ok(options) => options,
        Err(message) => {
            println!("{message}");
            process::exit(1);
        }
    };

    init_tracing()?;

    let mut config = SimConfig::new(options.width, options.height);
    config.seed = options.seed;
    config.start_paused = true;
    config.generation_interval = Some(Duration::from_millis(100));

    let mut sim = Simulation::new(config)?;
    sim.start()?;

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut app = App::new(sim);
    let result = run_app(&mut terminal, &mut app);

    // Blocking shutdown: no worker survives past this point.
    app.sim.stop();

    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;

    result
}
