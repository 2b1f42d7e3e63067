use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use crossterm::{
    event::{DisableMouseCapture, EnableMouseCapture, Event},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Layout},
    Terminal,
};
use tokio::runtime::Runtime;
use tokio::task::JoinHandle;
use tracing::info;
use tracing_subscriber::EnvFilter;

use nodewatch::app::{App, View};
use nodewatch::data::duration::now_millis;
use nodewatch::{
    events, ui, Dashboard, DashboardConfig, FeedSource, FileStore, StreamSource, TransportStatus,
};

/// How often the feed is drained and the timers are checked.
const PUMP_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Parser, Debug)]
#[command(name = "nodewatch")]
#[command(about = "Live telemetry dashboard for sensor node fleets")]
struct Args {
    /// Configuration file (TOML, JSON or YAML)
    #[arg(long)]
    config: Option<PathBuf>,

    /// MQTT broker to subscribe to (host:port), overrides the config file
    #[arg(short, long, conflicts_with_all = ["replay", "connect"])]
    broker: Option<String>,

    /// Replay newline-delimited feed records from a file
    #[arg(short, long, conflicts_with_all = ["connect"])]
    replay: Option<PathBuf>,

    /// Read newline-delimited feed records from a TCP endpoint (host:port)
    #[arg(short, long)]
    connect: Option<String>,

    /// Directory for persisted session state, overrides the config file
    #[arg(long)]
    state_dir: Option<PathBuf>,

    /// Run without the terminal UI, logging to stderr
    #[arg(long)]
    headless: bool,

    /// Replay the feed to its end, export state to a JSON file and exit
    #[arg(short, long)]
    export: Option<PathBuf>,

    /// Log file used while the terminal UI is active
    #[arg(long, default_value = "nodewatch.log")]
    log_file: PathBuf,
}

/// An open feed and, for broker subscriptions, its background task.
struct Feed {
    source: Box<dyn FeedSource>,
    handle: Option<JoinHandle<()>>,
    /// Whether the feed ends for good when it reports `Closed`.
    finite: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(&args)?;

    let mut config = DashboardConfig::load(args.config.as_deref())?;
    apply_overrides(&mut config, &args)?;

    if args.export.is_some() && args.replay.is_none() && args.connect.is_none() {
        bail!("--export needs a finite feed: use it with --replay or --connect");
    }

    let rt = Runtime::new()?;
    let feed = open_feed(&args, &config, &rt)?;
    let dashboard = build_dashboard(config);

    let handle = feed.handle;
    let result = if let Some(ref export_path) = args.export {
        export_to_file(feed.source, dashboard, &rt, export_path)
    } else if args.headless {
        run_headless(feed.source, dashboard, &rt, feed.finite)
    } else {
        run_tui(feed.source, dashboard)
    };

    // Signal shutdown
    if let Some(handle) = handle {
        handle.abort();
    }

    result
}

/// Log to stderr without a terminal UI, otherwise to the log file.
fn init_tracing(args: &Args) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if args.headless || args.export.is_some() {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(io::stderr)
            .init();
    } else {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&args.log_file)
            .with_context(|| format!("failed to open log file {}", args.log_file.display()))?;
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_ansi(false)
            .with_writer(Mutex::new(file))
            .init();
    }
    Ok(())
}

/// CLI flags take precedence over the config file and environment.
fn apply_overrides(config: &mut DashboardConfig, args: &Args) -> Result<()> {
    if let Some(ref addr) = args.broker {
        let (host, port) = addr
            .rsplit_once(':')
            .with_context(|| format!("--broker expects host:port, got {}", addr))?;
        config.broker.host = host.to_string();
        config.broker.port = port
            .parse()
            .with_context(|| format!("invalid broker port: {}", port))?;
    }
    if let Some(ref dir) = args.state_dir {
        config.persistence.dir = Some(dir.clone());
    }
    Ok(())
}

fn build_dashboard(config: DashboardConfig) -> Dashboard {
    let dir = config.persistence.dir.clone();
    let dashboard = Dashboard::new(config);
    match dir {
        Some(dir) => {
            info!(dir = %dir.display(), "persisting session state");
            dashboard.with_store(Box::new(FileStore::new(dir)))
        }
        None => dashboard,
    }
}

fn open_feed(args: &Args, config: &DashboardConfig, rt: &Runtime) -> Result<Feed> {
    if let Some(ref path) = args.replay {
        let source = rt.block_on(async {
            let file = tokio::fs::File::open(path)
                .await
                .with_context(|| format!("failed to open replay file {}", path.display()))?;
            Ok::<_, anyhow::Error>(StreamSource::spawn(file, &path.display().to_string()))
        })?;
        return Ok(Feed {
            source: Box::new(source),
            handle: None,
            finite: true,
        });
    }

    if let Some(ref addr) = args.connect {
        let source = rt.block_on(async {
            use tokio::net::TcpStream;

            info!(addr = %addr, "connecting");
            match TcpStream::connect(addr).await {
                Ok(stream) => Ok(StreamSource::spawn(stream, addr)),
                Err(e) => Err(anyhow::anyhow!("Failed to connect to {}: {}", addr, e)),
            }
        })?;
        return Ok(Feed {
            source: Box::new(source),
            handle: None,
            finite: true,
        });
    }

    open_broker(config, rt)
}

/// Subscribe to the configured MQTT broker.
#[cfg(feature = "subscribe")]
fn open_broker(config: &DashboardConfig, rt: &Runtime) -> Result<Feed> {
    let _guard = rt.enter();
    info!(broker = %config.broker_addr(), "subscribing");
    let (source, handle) = nodewatch::subscribe::create_subscriber(&config.broker);
    Ok(Feed {
        source: Box::new(source),
        handle: Some(handle),
        finite: false,
    })
}

#[cfg(not(feature = "subscribe"))]
fn open_broker(_config: &DashboardConfig, _rt: &Runtime) -> Result<Feed> {
    bail!("built without the subscribe feature: use --replay or --connect")
}

/// Apply the feed until it closes, then write the exported state.
fn export_to_file(
    mut source: Box<dyn FeedSource>,
    mut dashboard: Dashboard,
    rt: &Runtime,
    export_path: &Path,
) -> Result<()> {
    dashboard.start(now_millis());
    rt.block_on(async {
        loop {
            let now = now_millis();
            dashboard.drain(source.as_mut(), now);
            dashboard.tick(now);
            if matches!(dashboard.transport(), TransportStatus::Closed { .. }) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    });

    let json = serde_json::to_string_pretty(&dashboard.export_json(now_millis()))?;
    std::fs::write(export_path, json)
        .with_context(|| format!("failed to write {}", export_path.display()))?;
    dashboard.shutdown();

    println!("Exported dashboard state to: {}", export_path.display());
    Ok(())
}

/// Run without a terminal until Ctrl-C, or until a finite feed closes.
fn run_headless(
    mut source: Box<dyn FeedSource>,
    mut dashboard: Dashboard,
    rt: &Runtime,
    finite: bool,
) -> Result<()> {
    info!(source = %source.description(), "running headless");
    dashboard.start(now_millis());

    rt.block_on(async {
        let mut interval = tokio::time::interval(PUMP_INTERVAL);
        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);

        loop {
            tokio::select! {
                _ = &mut ctrl_c => {
                    info!("interrupted");
                    break;
                }
                _ = interval.tick() => {
                    let now = now_millis();
                    dashboard.drain(source.as_mut(), now);
                    dashboard.tick(now);
                    if finite && matches!(dashboard.transport(), TransportStatus::Closed { .. }) {
                        break;
                    }
                }
            }
        }
    });

    dashboard.shutdown();
    Ok(())
}

/// Run the TUI with the given feed
fn run_tui(source: Box<dyn FeedSource>, dashboard: Dashboard) -> Result<()> {
    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    // Setup panic hook to restore terminal
    let original_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic| {
        let _ = disable_raw_mode();
        let _ = execute!(io::stdout(), LeaveAlternateScreen);
        original_hook(panic);
    }));

    let mut app = App::new(source, dashboard);
    let now = now_millis();
    app.dashboard.start(now);
    app.pump(now);

    let result = run_app(&mut terminal, &mut app);
    app.dashboard.shutdown();

    // Restore terminal
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;

    result
}

fn run_app(terminal: &mut Terminal<CrosstermBackend<io::Stdout>>, app: &mut App) -> Result<()> {
    // Minimum terminal size for usable display
    const MIN_WIDTH: u16 = 60;
    const MIN_HEIGHT: u16 = 12;

    while app.running {
        terminal.draw(|frame| {
            let area = frame.area();

            if area.width < MIN_WIDTH || area.height < MIN_HEIGHT {
                let msg = format!(
                    "Terminal too small: {}x{}\nMinimum: {}x{}\n\nResize to continue",
                    area.width, area.height, MIN_WIDTH, MIN_HEIGHT
                );
                let paragraph = ratatui::widgets::Paragraph::new(msg)
                    .alignment(ratatui::layout::Alignment::Center)
                    .style(ratatui::style::Style::default().fg(ratatui::style::Color::Yellow));
                let top = (area.height / 2).saturating_sub(2);
                let centered = ratatui::layout::Rect::new(0, top, area.width, 5);
                frame.render_widget(paragraph, centered);
                return;
            }

            let chunks = Layout::vertical([
                Constraint::Length(1), // Header bar
                Constraint::Length(1), // Tabs
                Constraint::Min(8),    // Content
                Constraint::Length(1), // Status bar
            ])
            .split(area);

            ui::common::render_header(frame, app, chunks[0]);
            ui::common::render_tabs(frame, app, chunks[1]);

            match app.current_view {
                View::Nodes => ui::nodes::render(frame, app, chunks[2]),
                View::Average => ui::average::render(frame, app, chunks[2]),
            }

            ui::common::render_status_bar(frame, app, chunks[3]);

            if app.show_detail_overlay {
                ui::detail::render_overlay(frame, app, area);
            }

            if app.show_help {
                ui::common::render_help(frame, app, area);
            }
        })?;

        // Poll for events with a short timeout
        if let Some(event) = events::poll_event(PUMP_INTERVAL)? {
            match event {
                Event::Key(key) => events::handle_key_event(app, key),
                Event::Mouse(mouse) => {
                    // Content starts after header (1) + tabs (1) + table border (1)
                    events::handle_mouse_event(app, mouse, 3);
                }
                Event::Resize(_, _) => {
                    // Terminal will redraw on next iteration
                }
                _ => {}
            }
        }

        app.pump(now_millis());
    }

    Ok(())
}
