//! featguard command server
//!
//! Reads one JSON request per line on stdin and writes one JSON response per
//! line on stdout. Logs go to stderr.

use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::process::ExitCode;

use fg_core::config::DEFAULT_LOG_FILTER;
use fg_core::{EngineConfig, MemoryDocument, Session};
use glam::DVec3;

/// Environment variable naming the RON configuration file
const CONFIG_ENV: &str = "FEATGUARD_CONFIG";

/// Offline document holding a single 40 x 20 x 10 mm block
fn sample_document() -> MemoryDocument {
    let mut doc = MemoryDocument::new("Untitled");
    doc.add_box("Body1", DVec3::ZERO, DVec3::new(4.0, 2.0, 1.0));
    doc
}

fn load_config() -> Result<EngineConfig, String> {
    match std::env::var(CONFIG_ENV) {
        Ok(path) => EngineConfig::load(&path).map_err(|e| format!("{path}: {e}")),
        Err(_) => Ok(EngineConfig::default()),
    }
}

fn init_tracing(filter: &str) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();
}

/// Serve requests until the reader is exhausted
fn run_loop<R: BufRead, W: Write>(
    session: &Session,
    reader: &mut R,
    writer: &mut W,
) -> io::Result<usize> {
    let mut handled = 0;
    let mut line = String::new();
    loop {
        line.clear();
        if reader.read_line(&mut line)? == 0 {
            return Ok(handled);
        }
        let request = line.trim();
        if request.is_empty() {
            continue;
        }
        let response = session.handle_line(request);
        writer.write_all(response.as_bytes())?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        handled += 1;
    }
}

fn run_stdio(session: &Session) -> io::Result<usize> {
    let stdin = io::stdin();
    let stdout = io::stdout();
    let mut reader = BufReader::new(stdin.lock());
    let mut writer = BufWriter::new(stdout.lock());
    run_loop(session, &mut reader, &mut writer)
}

fn main() -> ExitCode {
    let config = load_config();
    init_tracing(
        config
            .as_ref()
            .map_or(DEFAULT_LOG_FILTER, |c| c.log_filter.as_str()),
    );
    let config = match config {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Failed to load configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let session = Session::new(sample_document(), config);
    tracing::info!("Serving featguard commands on stdio");

    match run_stdio(&session) {
        Ok(handled) => {
            tracing::info!("Input closed after {} requests", handled);
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!("Transport error: {}", e);
            ExitCode::FAILURE
        }
    }
}
