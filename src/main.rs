use anyhow::{anyhow, Context, Result};
use beatportdl::account::{Account, AccountPool};
use beatportdl::catalog::{Catalog, Store};
use beatportdl::config::{default_config_dir, load_account_configs, AppConfig};
use beatportdl::http::{HttpCatalog, Session};
use beatportdl::input::expand_inputs;
use beatportdl::progress::Progress;
use beatportdl::shutdown::ShutdownCoordinator;
use beatportdl::Application;
use chrono::Local;
use clap::Parser;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::io::BufReader;
use tracing::{info, warn};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

const VERSION: &str = env!("CARGO_PKG_VERSION");
const ERROR_LOG: &str = "beatportdl-err.log";

#[derive(Parser, Debug)]
#[command(author, version = VERSION, about = "Download tracks, releases, playlists and charts from Beatport and Beatsource", long_about = None)]
struct Args {
    /// URLs or .txt files listing one URL per line
    inputs: Vec<String>,

    /// Exit after the first batch instead of prompting for more
    #[arg(short, long)]
    quit: bool,

    /// Directory holding one YAML file per account
    #[arg(long = "config-dir")]
    config_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    print_banner();

    let config_dir = match args.config_dir {
        Some(dir) => dir,
        None => default_config_dir()?,
    };
    // Config warnings are printed before the real subscriber exists.
    let bootstrap = fmt().with_target(false).compact().finish();
    let configs = tracing::subscriber::with_default(bootstrap, || load_account_configs(&config_dir))
        .context("Failed to load account configuration")?;

    let first = &configs[0].1;
    let progress = Progress::new(first.show_progress);
    setup_logging(&progress, first.write_error_log)?;

    let accounts = login_all(configs).await?;
    let shutdown = ShutdownCoordinator::new();
    let app = Application::new(accounts, Arc::clone(&shutdown), progress);

    let downloads = &app.settings().downloads_directory;
    fs::create_dir_all(downloads).context("Failed to create downloads directory")?;
    info!("📁 Downloads directory: {}", downloads.display());

    shutdown
        .listen()
        .context("Failed to install interrupt handlers")?;

    let urls = expand_inputs(&args.inputs);
    let mut stdin = BufReader::new(tokio::io::stdin());
    app.run(urls, args.quit, &mut stdin).await?;

    info!(
        "🎉 Done: {} downloaded, {} already on disk",
        app.stats().downloaded(),
        app.stats().skipped_existing()
    );
    Ok(())
}

fn print_banner() {
    println!("\n{}", "=".repeat(60));
    println!("  🎧 beatportdl - Beatport & Beatsource Downloader v{}", VERSION);
    println!("{}\n", "=".repeat(60));
}

fn setup_logging(progress: &Progress, write_error_log: bool) -> Result<()> {
    let stdout_layer = fmt::layer()
        .with_writer(progress.writer())
        .with_ansi(true)
        .with_target(false)
        .with_thread_ids(false)
        .with_timer(fmt::time::LocalTime::rfc_3339())
        .compact();

    let error_layer = if write_error_log {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(ERROR_LOG)
            .with_context(|| format!("Failed to open {}", ERROR_LOG))?;
        writeln!(file, "# session started {}", Local::now().to_rfc3339())?;

        Some(
            fmt::layer()
                .with_writer(Mutex::new(file))
                .with_ansi(false)
                .with_target(false)
                .with_thread_ids(false)
                .with_timer(fmt::time::LocalTime::rfc_3339())
                .compact()
                .with_filter(LevelFilter::ERROR),
        )
    } else {
        None
    };

    let subscriber = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(stdout_layer)
        .with(error_layer);

    tracing::subscriber::set_global_default(subscriber).context("Failed to set subscriber")?;
    if write_error_log {
        info!("📝 Errors are also written to {}", ERROR_LOG);
    }
    Ok(())
}

/// Logs every account in, skipping the ones that are rejected.
async fn login_all(configs: Vec<(PathBuf, AppConfig)>) -> Result<AccountPool> {
    let mut accounts = Vec::new();
    for (path, config) in configs {
        let name = account_name(&path);
        match login(&name, &config).await {
            Ok((beatport, beatsource)) => {
                info!("🔑 Logged in as {} ({})", config.username, name);
                accounts.push(Account::new(name, config, beatport, beatsource));
            }
            Err(e) => warn!("⚠️  Skipping account {}: {}", name, e),
        }
    }
    if accounts.is_empty() {
        return Err(anyhow!("No account could log in"));
    }
    Ok(AccountPool::new(accounts)?)
}

async fn login(name: &str, config: &AppConfig) -> Result<(Arc<dyn Catalog>, Arc<dyn Catalog>)> {
    let session = Session::new(&config.username, &config.password);
    let proxy = config.proxy.as_deref();
    let beatport = HttpCatalog::new(Store::Beatport, proxy, Arc::clone(&session))
        .with_context(|| format!("Failed to build Beatport client for {}", name))?;
    let beatsource = HttpCatalog::new(Store::Beatsource, proxy, session)
        .with_context(|| format!("Failed to build Beatsource client for {}", name))?;

    // Both handles share the session, one login covers them.
    beatport.authenticate().await?;
    let beatport: Arc<dyn Catalog> = Arc::new(beatport);
    let beatsource: Arc<dyn Catalog> = Arc::new(beatsource);
    Ok((beatport, beatsource))
}

fn account_name(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
