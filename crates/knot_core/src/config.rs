//! Configuração unificada via TOML.
//!
//! Um único `config.toml` atende o agente (`knot_thing`) e o simulador de
//! gateway (`knot_gateway`). Seções ausentes usam os valores padrão.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::led::LedConfig;
use crate::protocol::MAX_DEVICE_NAME_LEN;

/// Identidade do dispositivo.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThingConfig {
    /// Nome anunciado no registro (truncado para caber no MTU do rádio)
    pub name: String,
}

impl Default for ThingConfig {
    fn default() -> Self {
        Self {
            name: "KNoT Thing".into(),
        }
    }
}

/// Tabela de itens.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Número máximo de itens
    pub capacity: usize,
    /// Intervalo do evento TIME atribuído a itens novos (segundos)
    pub default_time_interval_s: u16,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            capacity: 8,
            default_time_interval_s: 30,
        }
    }
}

/// Temporizações da máquina de estados (ms).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    /// Espera por resposta antes de reenviar
    pub retransmission_timeout_ms: u32,
    /// Espera após UNREGISTER_RESP antes de apagar as credenciais
    pub unregister_timeout_ms: u32,
    /// Pausa no estado de erro antes de reconectar
    pub error_backoff_ms: u32,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            retransmission_timeout_ms: 20_000,
            unregister_timeout_ms: 10_000,
            error_backoff_ms: 1_000,
        }
    }
}

/// Botão de reset de fábrica.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResetConfig {
    /// Tempo pressionado para apagar as credenciais (ms)
    pub hold_ms: u32,
}

impl Default for ResetConfig {
    fn default() -> Self {
        Self { hold_ms: 5_000 }
    }
}

/// Agente no host.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Endereço TCP onde o agente aguarda o gateway
    pub listen_addr: String,
    /// Período do loop principal (ms)
    pub tick_ms: u64,
    /// Arquivo de credenciais
    pub storage_path: String,
    /// Arquivo cuja existência simula o botão de reset pressionado
    pub reset_flag_path: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:9090".into(),
            tick_ms: 50,
            storage_path: "knot_thing.bin".into(),
            reset_flag_path: "knot_reset".into(),
        }
    }
}

/// Simulador de gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Endereço do agente
    pub thing_addr: String,
    /// Espera entre tentativas de conexão (segundos)
    pub reconnect_secs: f64,
    /// Rejeita a autenticação (exercita a parada por AUTH)
    pub reject_auth: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            thing_addr: "127.0.0.1:9090".into(),
            reconnect_secs: 2.0,
            reject_auth: false,
        }
    }
}

/// Configuração raiz.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub thing: ThingConfig,
    pub registry: RegistryConfig,
    pub protocol: ProtocolConfig,
    pub reset: ResetConfig,
    pub led: LedConfig,
    pub agent: AgentConfig,
    pub gateway: GatewayConfig,
}

impl AppConfig {
    /// Carrega configuração de um arquivo TOML.
    pub fn load(path: &Path) -> Self {
        if path.exists() {
            match std::fs::read_to_string(path) {
                Ok(content) => match toml::from_str::<AppConfig>(&content) {
                    Ok(config) => {
                        info!("Configuração carregada de {}", path.display());
                        return config;
                    }
                    Err(e) => {
                        warn!("Erro ao parsear {}: {}", path.display(), e);
                    }
                },
                Err(e) => {
                    warn!("Erro ao ler {}: {}", path.display(), e);
                }
            }
        }

        info!("Usando configuração padrão");
        AppConfig::default()
    }

    /// Salva configuração em arquivo TOML.
    pub fn save(&self, path: &Path) -> Result<(), String> {
        let content = toml::to_string_pretty(self).map_err(|e| e.to_string())?;
        std::fs::write(path, content).map_err(|e| e.to_string())?;
        info!("Configuração salva em {}", path.display());
        Ok(())
    }

    /// Retorna o caminho padrão do config.toml (ao lado do executável).
    pub fn default_path() -> PathBuf {
        let exe_dir = std::env::current_exe()
            .map(|p| p.parent().unwrap_or(Path::new(".")).to_path_buf())
            .unwrap_or_else(|_| PathBuf::from("."));
        exe_dir.join("config.toml")
    }

    /// Valida a configuração e retorna lista de erros.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.thing.name.trim().is_empty() {
            errors.push("Nome do dispositivo não pode ser vazio".into());
        } else if self.thing.name.len() > MAX_DEVICE_NAME_LEN {
            warn!(
                "Nome \"{}\" será truncado para {} bytes",
                self.thing.name, MAX_DEVICE_NAME_LEN
            );
        }
        if self.registry.capacity == 0 || self.registry.capacity > 255 {
            errors.push(format!(
                "Capacidade do registro inválida: {} (1–255)",
                self.registry.capacity
            ));
        }
        if self.protocol.retransmission_timeout_ms == 0 {
            errors.push("Timeout de retransmissão não pode ser 0".into());
        }
        if self.led.short_interval_ms == 0 || self.led.long_interval_ms == 0 {
            errors.push("Intervalos do LED não podem ser 0".into());
        }
        if self.agent.tick_ms == 0 || self.agent.tick_ms > 1_000 {
            errors.push(format!(
                "Tick do agente inválido: {} ms (1–1000)",
                self.agent.tick_ms
            ));
        }
        if self.gateway.reconnect_secs < 0.1 {
            errors.push(format!(
                "Intervalo de reconexão inválido: {}",
                self.gateway.reconnect_secs
            ));
        }

        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        let errors = config.validate();
        assert!(errors.is_empty(), "Erros: {:?}", errors);
    }

    #[test]
    fn roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(config.thing.name, parsed.thing.name);
        assert_eq!(config.agent.listen_addr, parsed.agent.listen_addr);
        assert_eq!(config.led.long_interval_ms, parsed.led.long_interval_ms);
    }

    #[test]
    fn partial_toml_uses_defaults() {
        let partial = r#"
[protocol]
retransmission_timeout_ms = 5000
"#;
        let config: AppConfig = toml::from_str(partial).unwrap();
        assert_eq!(config.protocol.retransmission_timeout_ms, 5000);
        // Demais campos mantêm o padrão
        assert_eq!(config.protocol.unregister_timeout_ms, 10_000);
        assert_eq!(config.reset.hold_ms, 5_000);
        assert_eq!(config.registry.capacity, 8);
    }

    #[test]
    fn invalid_values_are_reported() {
        let mut config = AppConfig::default();
        config.thing.name = "  ".into();
        config.registry.capacity = 300;
        config.agent.tick_ms = 0;
        assert_eq!(config.validate().len(), 3);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = AppConfig::load(Path::new("/nonexistent/knot/config.toml"));
        assert_eq!(config.registry.default_time_interval_s, 30);
    }
}
