mod action;
mod app;
mod append;
mod auto;
mod dom;
mod elements;
mod error;
mod fetch;
mod instance;
mod layout;
mod message;
mod next_prev;
mod scripts;
mod scroll;
mod session;
mod settings;
mod types;
mod ui;
mod utils;
mod xpath;

use anyhow::{Context, Result};
use app::{App, CHROME_ROWS};
use clap::Parser;
use crossterm::{
    event::{self, Event, KeyEventKind},
    execute,
    terminal::{
        EnterAlternateScreen, LeaveAlternateScreen, SetTitle, disable_raw_mode, enable_raw_mode,
    },
};
use fetch::{ReqwestTransport, UreqTransport, load_page};
use ratatui::{Terminal, backend::CrosstermBackend};
use scripts::SiteScripts;
use scroll::Viewport;
use session::Session;
use settings::Cli;
use std::io;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use types::Caller;
use utils::{LOG_FILE, log_msg, set_debug};

const DUMP_SIZE: (u16, u16) = (80, 24);

fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = cli.settings();
    let _ = std::fs::write(LOG_FILE, "");
    set_debug(settings.debug);

    let primary = Arc::new(ReqwestTransport::new()?);
    let fallback = Arc::new(UreqTransport::new());
    let page = load_page(primary.as_ref(), &cli.url)
        .with_context(|| format!("loading {}", cli.url))?;
    let scripts = if settings.custom_scripts {
        SiteScripts::default()
    } else {
        SiteScripts::empty()
    };

    if let Some(pages) = cli.dump {
        let (w, h) = DUMP_SIZE;
        let session = Session::new(settings, page, primary, fallback, scripts, Viewport::new(w, h));
        return dump(session, pages as usize);
    }

    let (w, h) = crossterm::terminal::size()?;
    let session = Session::new(
        settings,
        page,
        primary,
        fallback,
        scripts,
        Viewport::new(w, h.saturating_sub(CHROME_ROWS)),
    );

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut app = App::new(session);
    app.session.start(Instant::now());
    let result = run(&mut terminal, &mut app);

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    result
}

fn run(terminal: &mut Terminal<CrosstermBackend<io::Stdout>>, app: &mut App) -> Result<()> {
    let mut title = String::new();
    loop {
        app.check_background_events();

        if app.session.title() != title {
            title = app.session.title().to_string();
            execute!(terminal.backend_mut(), SetTitle(&title))?;
        }

        terminal.draw(|f| ui::draw(f, app))?;

        if event::poll(Duration::from_millis(10))? {
            match event::read()? {
                Event::Key(key) if key.kind == KeyEventKind::Press => {
                    if app.on_key(key.code, key.modifiers) {
                        break;
                    }
                }
                Event::Resize(w, h) => app.resize(w, h),
                _ => {}
            }
        }
    }
    log_msg("info", "Quit");
    Ok(())
}

/// Appends `pages` pages after the first, or until nothing more comes, then prints the
/// rendered document.
fn dump(mut session: Session, pages: usize) -> Result<()> {
    session.start(Instant::now());
    let mut attempted = None;
    loop {
        let now = Instant::now();
        session.tick(now);
        let count = session.instance().total_pages;
        if count > pages {
            break;
        }
        if !session.instance().is_loading {
            // An attempt that left the count unchanged will not do better a second time.
            if attempted == Some(count) {
                break;
            }
            attempted = Some(count);
            let action = session.instance().action;
            if !session.trigger(action, Caller::Shortcut, now) {
                break;
            }
        }
        thread::sleep(Duration::from_millis(10));
    }
    if let Some(notice) = session.notice() {
        eprintln!("{notice}");
    }
    for line in session.lines() {
        println!("{}", line.text);
    }
    log_msg(
        "info",
        &format!("Dumped {} pages from {}", session.instance().total_pages, session.location()),
    );
    Ok(())
}
