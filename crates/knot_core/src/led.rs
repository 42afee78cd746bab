//! Padrões do LED de status.
//!
//! Cada padrão pisca N vezes com intervalo curto e depois faz uma pausa
//! longa. O driver não bloqueia: é chamado a cada tick e diz quando o pino
//! precisa mudar.

use serde::{Deserialize, Serialize};

/// Intervalos do pisca (ms).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LedConfig {
    pub long_interval_ms: u32,
    pub short_interval_ms: u32,
}

impl Default for LedConfig {
    fn default() -> Self {
        Self {
            long_interval_ms: 10_000,
            short_interval_ms: 1_000,
        }
    }
}

/// Padrão de pisca por fase da conexão.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlinkPattern {
    /// Aguardando gateway.
    Disconnected,
    /// Registro, autenticação e schema.
    Establishing,
    Online,
}

impl BlinkPattern {
    /// Número de piscadas antes da pausa longa.
    pub fn blinks(self) -> u32 {
        match self {
            BlinkPattern::Disconnected => 100,
            BlinkPattern::Establishing => 2,
            BlinkPattern::Online => 1,
        }
    }
}

/// Motivo de parada definitiva. Só o reset de fábrica sai deste estado.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HaltReason {
    Comm,
    Auth,
}

impl HaltReason {
    /// Meio período do pisca de parada (ms).
    pub fn period_ms(self) -> u32 {
        match self {
            HaltReason::Comm => 100,
            HaltReason::Auth => 250,
        }
    }

    /// Nível do LED em `now_ms`: apagado no primeiro meio período, aceso no segundo.
    pub fn level(self, now_ms: u32) -> bool {
        (now_ms / self.period_ms()) % 2 == 1
    }
}

/// Estado do pisca de status.
#[derive(Debug)]
pub struct StatusLed {
    config: LedConfig,
    pattern: Option<BlinkPattern>,
    lit: bool,
    toggles: u32,
    interval_ms: u32,
    last_toggle_ms: u32,
}

impl StatusLed {
    pub fn new(config: LedConfig) -> Self {
        Self {
            config,
            pattern: None,
            lit: false,
            toggles: 0,
            interval_ms: 0,
            last_toggle_ms: 0,
        }
    }

    /// Avança o pisca. Retorna o nível a escrever no pino, se mudou.
    pub fn update(&mut self, pattern: BlinkPattern, now_ms: u32) -> Option<bool> {
        let mut level = None;

        if self.toggles >= pattern.blinks() * 2 {
            self.toggles = 0;
            self.interval_ms = self.config.long_interval_ms;
            level = Some(false);
        }

        // Troca de padrão recomeça acendendo
        if self.pattern != Some(pattern) {
            self.pattern = Some(pattern);
            self.lit = false;
        }

        if now_ms.wrapping_sub(self.last_toggle_ms) >= self.interval_ms {
            self.last_toggle_ms = now_ms;
            self.lit = !self.lit;
            self.toggles += 1;
            self.interval_ms = self.config.short_interval_ms;
            level = Some(self.lit);
        }

        level
    }

    /// Esquece o padrão atual (após um reset de fábrica).
    pub fn reset(&mut self) {
        let config = self.config.clone();
        *self = Self::new(config);
    }
}
