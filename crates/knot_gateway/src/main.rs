//! # KNoT Gateway
//!
//! Gateway mínimo para testar um thing no host: conecta ao agente via TCP,
//! emite credenciais, aceita o schema e registra os dados recebidos.
//!
//! Usa a seção `[gateway]` do mesmo `config.toml` do thing.

mod net_thread;
mod session;

use std::time::Duration;

use knot_core::config::AppConfig;
use knot_core::protocol::result;
use session::GatewayEvent;
use tracing::{info, warn};

fn main() {
    // ── Logging ──
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    // ── Config ──
    let config_path = AppConfig::default_path();
    let config = AppConfig::load(&config_path);
    for problem in config.validate() {
        warn!("Config: {problem}");
    }
    let gw = config.gateway;

    println!();
    println!("══════════════════════════════════════════════");
    println!("   ⚡ KNOT GATEWAY");
    println!("══════════════════════════════════════════════");
    println!("  Thing:     {}", gw.thing_addr);
    println!("  Auth:      {}", if gw.reject_auth { "recusar" } else { "aceitar" });
    println!("══════════════════════════════════════════════");
    println!();

    let rx = net_thread::spawn_gateway_thread(
        gw.thing_addr,
        Duration::from_secs_f64(gw.reconnect_secs.max(0.1)),
        gw.reject_auth,
    );

    // ── Loop principal ──
    for event in rx {
        match event {
            GatewayEvent::Connected(addr) => info!("Sessão aberta com {addr}"),
            GatewayEvent::Disconnected => info!("Sessão encerrada"),
            GatewayEvent::Registered {
                device_id,
                name,
                uuid,
            } => info!("Thing \"{name}\" ({device_id:016X}) registrado: {uuid}"),
            GatewayEvent::Authenticated { uuid, accepted } => {
                if accepted {
                    info!("Thing {uuid} autenticado");
                } else {
                    warn!("Thing {uuid} recusado");
                }
            }
            GatewayEvent::SchemaComplete(records) => {
                info!("Schema com {} itens", records.len());
                for r in &records {
                    info!(
                        "  [{}] {} – {:?}, type_id 0x{:04X}, unidade {}",
                        r.sensor_id, r.name, r.value_kind, r.type_id, r.unit
                    );
                }
            }
            GatewayEvent::Data {
                sensor_id,
                name,
                value,
            } => match (name, value) {
                (Some(name), Some(value)) => info!("{name} [{sensor_id}] = {value:?}"),
                _ => info!("Dados do sensor {sensor_id} fora do schema conhecido"),
            },
            GatewayEvent::DataResult {
                sensor_id,
                result: code,
            } => {
                if code == result::SUCCESS {
                    info!("Sensor {sensor_id} confirmou a operação");
                } else {
                    warn!("Leitura do sensor {sensor_id} falhou (resultado {code})");
                }
            }
        }
    }
}
