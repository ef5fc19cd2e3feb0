// Tune: generational GC diagnostics for small scripts

use std::fs;
use std::io;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use crossterm::{
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{backend::CrosstermBackend, Terminal};
use tracing_subscriber::EnvFilter;

use tune::config::{BuildConfiguration, BuildMode, CodegenStrategy, EngineConfig, Platform};
use tune::executor::RunResults;
use tune::log::{LogChannel, TracingSink};
use tune::ui::App;
use tune::{CancellationToken, DiagnosticEngine, EngineError};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ModeArg {
    Debug,
    Release,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum PlatformArg {
    X86,
    X64,
    Anycpu,
}

/// Run a script under GC instrumentation and inspect its IL and native code
#[derive(Parser, Debug)]
#[command(name = "tune")]
#[command(version)]
struct Cli {
    /// Script to diagnose
    file: PathBuf,

    /// String passed to the script as `arg`
    #[arg(short, long, default_value = "")]
    arg: String,

    /// Optimization mode
    #[arg(short, long, value_enum, default_value_t = ModeArg::Debug)]
    mode: ModeArg,

    /// Target platform for the native code listing
    #[arg(short, long, value_enum, default_value_t = PlatformArg::Anycpu)]
    platform: PlatformArg,

    /// Lower every method at compile time instead of on first call
    #[arg(long, default_value_t = false)]
    aot: bool,

    /// Wall-clock budget for one run, in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Print results to stdout instead of starting the TUI
    #[arg(long, default_value_t = false)]
    plain: bool,
}

impl Cli {
    fn build(&self) -> BuildConfiguration {
        let mode = match self.mode {
            ModeArg::Debug => BuildMode::Debug,
            ModeArg::Release => BuildMode::Release,
        };
        let platform = match self.platform {
            PlatformArg::X86 => Platform::X86,
            PlatformArg::X64 => Platform::X64,
            PlatformArg::Anycpu => Platform::AnyCpu,
        };
        BuildConfiguration::new(mode, platform)
    }

    fn engine_config(&self) -> EngineConfig {
        let mut config = EngineConfig::default();
        if self.aot {
            config = config.with_codegen(CodegenStrategy::AheadOfTime);
        }
        if let Some(ms) = self.timeout_ms {
            config = config.with_time_budget(Duration::from_millis(ms));
        }
        config
    }
}

fn main() {
    let cli = Cli::parse();

    let source = match fs::read_to_string(&cli.file) {
        Ok(source) => source,
        Err(err) => {
            eprintln!("Error: cannot read '{}': {}", cli.file.display(), err);
            process::exit(1);
        }
    };

    let result = if cli.plain {
        run_plain(&cli, &source)
    } else {
        run_tui(&cli, source)
    };

    if let Err(err) = result {
        eprintln!("Error: {err}");
        process::exit(1);
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(io::stderr)
        .init();
}

fn run_plain(cli: &Cli, source: &str) -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let engine = DiagnosticEngine::new(cli.engine_config(), Arc::new(TracingSink))?;
    let token = CancellationToken::new();
    let diagnostics = match engine.run(source, &cli.arg, cli.build(), &token) {
        Ok(diagnostics) => diagnostics,
        Err(EngineError::Compilation(err)) => {
            for diagnostic in &err.diagnostics {
                eprintln!("{}{}", cli.file.display(), diagnostic);
            }
            return Err(err.into());
        }
        Err(err) => return Err(err.into()),
    };

    println!("{}", diagnostics.il);
    println!("{}", diagnostics.asm);
    print_summary(&diagnostics.results);

    if !diagnostics.succeeded {
        process::exit(2);
    }
    Ok(())
}

fn print_summary(results: &RunResults) {
    let report = &results.report;
    let elapsed = report.ended.duration_since(report.started).unwrap_or_default();

    println!("; run took {elapsed:?}");
    if let Some(value) = &report.return_value {
        println!("; returned {value}");
    }
    if let Some(fault) = &report.fault {
        println!("; faulted: {fault}");
    }

    let timeline = &results.timeline;
    for (generation, points) in timeline.generations.iter().enumerate() {
        let last = points.last().map_or(0, |p| p.value);
        println!(
            "; gen{generation}: {} samples, final size {last} bytes",
            points.len()
        );
    }
    println!(
        "; {} collections, peak {} bytes{}",
        timeline.events.len(),
        timeline.peak(),
        if timeline.truncated { " (truncated)" } else { "" }
    );
    for event in &timeline.events {
        println!(";   {}", event.description);
    }
}

fn run_tui(cli: &Cli, source: String) -> Result<(), Box<dyn std::error::Error>> {
    // The TUI owns the screen, so engine notifications go to the log pane
    let (channel, receiver) = LogChannel::new();
    let engine = DiagnosticEngine::new(cli.engine_config(), Arc::new(channel))?;
    let mut app = App::new(engine, receiver, source, cli.arg.clone(), cli.build());

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let res = app.run(&mut terminal);

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    res?;
    Ok(())
}
