//! # KNoT Thing
//!
//! Agente KNoT rodando no host: registra métricas locais como sensores,
//! aguarda o gateway via TCP e executa a máquina de estados do protocolo.
//!
//! ## Uso
//! ```bash
//! knot_thing                 # config.toml ao lado do executável
//! touch knot_reset           # segurar o "botão" de reset por 5 s apaga as credenciais
//! ```

mod board;
mod sensors;
mod storage;
mod transport;

use std::cell::RefCell;
use std::path::Path;
use std::rc::Rc;
use std::time::{Duration, Instant};

use board::HostBoard;
use knot_core::config::AppConfig;
use knot_core::{RunOutcome, Thing};
use sensors::HostMonitor;
use storage::FileStorage;
use tracing::{error, info, warn};
use transport::TcpTransport;

fn main() {
    // ── Logging ──
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    // ── Carregar config ──
    let config_path = AppConfig::default_path();
    let config = AppConfig::load(&config_path);

    // Salva config padrão se não existir
    if !config_path.exists() {
        if let Err(e) = config.save(&config_path) {
            warn!("Não foi possível salvar config padrão: {e}");
        }
    }
    for problem in config.validate() {
        warn!("Config: {problem}");
    }

    let agent = &config.agent;

    // ── Thing ──
    let storage = FileStorage::open(Path::new(&agent.storage_path));
    if let Some(uuid) = &storage.state().uuid {
        info!("Credenciais salvas encontradas ({uuid})");
    }
    let mut thing = Thing::new(
        TcpTransport::new(&agent.listen_addr),
        storage,
        HostBoard::new(&agent.reset_flag_path),
        &config,
    );

    let monitor = Rc::new(RefCell::new(HostMonitor::new()));
    info!("Monitor do host inicializado");
    if let Err(e) = sensors::register_all(&mut thing, monitor) {
        error!("Falha ao registrar sensores: {e}");
        return;
    }

    thing
        .init(&config.thing.name)
        .expect("Falha ao iniciar o thing");

    // ── Banner ──
    println!();
    println!("══════════════════════════════════════════════");
    println!("   ⚡ KNOT THING – ATIVO");
    println!("══════════════════════════════════════════════");
    println!("  Nome:      {}", config.thing.name);
    println!("  Endereço:  {}", thing.address());
    println!("  Escutando: {}", agent.listen_addr);
    println!("  Itens:     {}", thing.registry().len());
    println!("══════════════════════════════════════════════");
    println!();

    // ── Loop principal ──
    let tick = Duration::from_millis(agent.tick_ms);
    let mut halted = None;
    loop {
        let cycle_start = Instant::now();

        match thing.run() {
            RunOutcome::Stopped => break,
            RunOutcome::Halted(reason) => {
                if halted != Some(reason) {
                    error!("Parado ({reason:?}); mantenha o reset pressionado para recomeçar");
                    halted = Some(reason);
                }
            }
            RunOutcome::Stepped(_) => halted = None,
        }

        // Dormir pelo tempo restante do tick
        let elapsed = cycle_start.elapsed();
        if elapsed < tick {
            std::thread::sleep(tick - elapsed);
        }
    }

    thing.shutdown();
}
