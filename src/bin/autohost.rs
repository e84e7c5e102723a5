use std::error::Error;
use std::sync::Arc;

use fern::colors::{Color, ColoredLevelConfig};
use log::{info, LevelFilter};

use autohost::modules::access_log::AccessLog;
use autohost::modules::certificate_policy::CertificatePolicy;
use autohost::modules::config::{Command, ServerConfig, USAGE};
use autohost::modules::connection_policy::ConnectionPolicy;
use autohost::modules::content_resolver::ContentResolver;
use autohost::modules::domain_registry::DomainRegistry;
use autohost::modules::error::network_ops::bind_tcp_listener;
use autohost::modules::router::Router;
use autohost::modules::server::{FrontDoor, ListenerMode};

fn setup_logging(level: LevelFilter) -> Result<(), Box<dyn Error>> {
    let colors = ColoredLevelConfig::new()
        .trace(Color::Cyan)
        .debug(Color::Magenta)
        .info(Color::Green)
        .warn(Color::Yellow)
        .error(Color::Red);

    fern::Dispatch::new()
        .format(move |out, message, record| {
            out.finish(format_args!(
                "{} [{:width$}][{}] {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                colors.color(record.level()),
                record.target(),
                message,
                width = 5
            ))
        })
        .level(level)
        .chain(std::io::stdout())
        .apply()
        .map_err(|e| format!("failed to initialize logging: {}", e))?;

    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let config = match ServerConfig::from_env()? {
        Command::Help => {
            print!("{}", USAGE);
            return Ok(());
        }
        Command::Run(config) => config,
    };

    setup_logging(config.log_level)?;
    info!("autohost {} starting", env!("CARGO_PKG_VERSION"));

    let policy = Arc::new(CertificatePolicy::new());
    let registry = Arc::new(DomainRegistry::load(config.domains_file.clone(), policy.clone())?);

    let router = match &config.routes_file {
        Some(path) => {
            let router = Router::load(path)?;
            info!("Loaded {} routes from {}", router.len(), path.display());
            router
        }
        None => Router::new(),
    };

    let front_door = Arc::new(FrontDoor::new(
        registry,
        router,
        ContentResolver::new(config.content_config()),
        AccessLog::start(config.log_dir.clone(), config.console_access),
        ConnectionPolicy::default(),
    ));

    if config.dev {
        let listener = bind_tcp_listener(&config.listen).await?;
        info!("Development mode: plain HTTP on {}", config.listen);
        front_door.serve_plain(listener, ListenerMode::Plain).await;
        return Ok(());
    }

    serve_https(&config, policy, front_door).await
}

#[cfg(feature = "acme")]
async fn serve_https(
    config: &ServerConfig,
    policy: Arc<CertificatePolicy>,
    front_door: Arc<FrontDoor>,
) -> Result<(), Box<dyn Error>> {
    use autohost::modules::acme_manager::CertificateManager;

    let manager = CertificateManager::new(policy, config.acme_settings());
    let acceptor = manager.tls_acceptor()?;

    let https = bind_tcp_listener(&config.listen).await?;
    let http = bind_tcp_listener(&config.http_listen).await?;

    tokio::spawn(manager.run());
    tokio::spawn(Arc::clone(&front_door).serve_plain(http, ListenerMode::Redirect));

    info!(
        "Serving HTTPS on {} and redirecting from {} (ACME {})",
        config.listen,
        config.http_listen,
        if config.acme_staging { "staging" } else { "production" }
    );
    front_door.serve_tls(https, acceptor).await;
    Ok(())
}

#[cfg(not(feature = "acme"))]
async fn serve_https(
    _config: &ServerConfig,
    _policy: Arc<CertificatePolicy>,
    _front_door: Arc<FrontDoor>,
) -> Result<(), Box<dyn Error>> {
    Err("built without the acme feature; only --dev mode is available".into())
}
