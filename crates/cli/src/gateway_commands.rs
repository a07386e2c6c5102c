use std::{path::PathBuf, sync::Arc};

use {
    anyhow::{Context, Result, bail},
    tracing::info,
};

use {
    tether_auth::{
        Credentials, TokenService, decode_signing_key, ensure_password_hash, ensure_signing_key,
    },
    tether_config::{TetherConfig, WebInterfaceConfig},
    tether_gateway::GatewayServer,
    tether_simulation::{CompanionSeed, LocalSimulation, SimulationFacade},
};

pub struct GatewayOptions {
    pub bind: Option<String>,
    pub port: Option<u16>,
    pub companions: Option<PathBuf>,
    pub force: bool,
}

/// Fill in generated secrets and migrate a plaintext password, persisting
/// any change so restarts reuse the same key and hash.
pub fn bootstrap_web(config: TetherConfig) -> Result<WebInterfaceConfig> {
    let mut web = config.web;
    let key_generated = ensure_signing_key(&mut web);
    let password_migrated = ensure_password_hash(&mut web)?;

    if key_generated || password_migrated {
        let signing_key = web.signing_key.clone();
        let password_hash = web.password_hash.clone();
        let path = tether_config::update_config(|cfg| {
            cfg.web.signing_key = signing_key;
            cfg.web.password_hash = password_hash;
            cfg.web.password = None;
        })?;
        info!(path = %path.display(), "saved gateway credentials to config");
    }
    Ok(web)
}

fn load_roster(path: Option<&PathBuf>) -> Result<Vec<CompanionSeed>> {
    match path {
        Some(path) => CompanionSeed::load_file(path)
            .with_context(|| format!("failed to load companions from {}", path.display())),
        None => {
            info!("no companion roster given, using demo companions");
            Ok(CompanionSeed::demo_roster())
        },
    }
}

pub async fn run_gateway(opts: GatewayOptions) -> Result<()> {
    let config = tether_config::try_discover_and_load()?;
    if !config.web.enabled && !opts.force {
        bail!(
            "web interface is disabled; set web.enabled = true in {} or pass --force",
            tether_config::find_or_default_config_path().display()
        );
    }

    let mut web = bootstrap_web(config)?;
    if let Some(bind) = opts.bind {
        web.bind = bind;
    }
    if let Some(port) = opts.port {
        web.port = port;
    }

    let key = web
        .signing_key()
        .map(decode_signing_key)
        .context("no signing key configured")?;
    let tokens = Arc::new(TokenService::new(key)?);
    let credentials = Arc::new(Credentials::from_config(&web)?);
    let simulation: Arc<dyn SimulationFacade> =
        Arc::new(LocalSimulation::spawn(load_roster(opts.companions.as_ref())?)?);

    let server = GatewayServer::new(web, tokens, credentials, simulation);
    let addr = server.start().await?;
    info!(%addr, "gateway running, press Ctrl-C to stop");

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    server.stop().await;
    Ok(())
}
