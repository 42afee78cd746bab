//! Interfaces com o hardware: transporte, armazenamento e placa.
//!
//! A máquina de estados só conversa com o mundo externo por estes traits.
//! Todas as operações são não bloqueantes.

use std::collections::HashMap;
use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::protocol::UUID_LEN;

// ──────────────────────────────────────────────
// Transporte
// ──────────────────────────────────────────────

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Operação ainda não pode ser concluída; tente no próximo tick.
    #[error("Operação pendente")]
    WouldBlock,

    #[error("Erro de I/O: {0}")]
    Io(String),

    #[error("Conexão encerrada")]
    Closed,
}

impl From<std::io::Error> for TransportError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut => {
                TransportError::WouldBlock
            }
            _ => TransportError::Io(e.to_string()),
        }
    }
}

/// Evento de gerenciamento do enlace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    Disconnected,
}

/// Driver de transporte do rádio (ou de um substituto no host).
pub trait Transport {
    /// Conexão aceita de um gateway.
    type Conn;

    fn init(&mut self, address: DeviceAddress, name: &str) -> Result<(), TransportError>;
    fn deinit(&mut self);
    fn listen(&mut self) -> Result<(), TransportError>;
    fn accept(&mut self) -> Result<Self::Conn, TransportError>;
    /// Lê no máximo um frame. `Ok(0)` não é usado; sem dados é `WouldBlock`.
    fn read(&mut self, conn: &mut Self::Conn, buf: &mut [u8]) -> Result<usize, TransportError>;
    fn write(&mut self, conn: &mut Self::Conn, frame: &[u8]) -> Result<usize, TransportError>;
    fn close(&mut self, conn: Self::Conn);
    fn read_event(&mut self) -> Option<LinkEvent>;
}

// ──────────────────────────────────────────────
// Endereço
// ──────────────────────────────────────────────

/// Endereço de 64 bits do dispositivo, usado também como `device_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceAddress(pub u64);

impl DeviceAddress {
    /// Válido quando os 32 bits baixos não são zero.
    pub fn is_valid(&self) -> bool {
        self.0 & 0xFFFF_FFFF != 0
    }

    pub fn generate<R: Rng>(rng: &mut R) -> Self {
        loop {
            let addr = DeviceAddress(rng.r#gen());
            if addr.is_valid() {
                return addr;
            }
        }
    }

    pub fn to_bytes(self) -> [u8; 8] {
        self.0.to_le_bytes()
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let raw: [u8; 8] = bytes.try_into().ok()?;
        Some(DeviceAddress(u64::from_le_bytes(raw)))
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = self.0.to_be_bytes();
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]
        )
    }
}

// ──────────────────────────────────────────────
// Armazenamento
// ──────────────────────────────────────────────

/// Chaves persistidas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StorageKey {
    Address,
    Uuid,
    Token,
    /// Presente quando o schema já foi aceito pelo gateway.
    SchemaFlag,
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Erro de I/O no armazenamento: {0}")]
    Io(#[from] std::io::Error),

    #[error("Conteúdo do armazenamento inválido: {0}")]
    Corrupt(String),
}

/// Armazenamento chave-valor persistente.
pub trait Storage {
    fn read(&mut self, key: StorageKey) -> Result<Option<Vec<u8>>, StorageError>;
    fn write(&mut self, key: StorageKey, value: &[u8]) -> Result<(), StorageError>;
    /// Apaga todas as chaves.
    fn reset(&mut self) -> Result<(), StorageError>;
}

/// Armazenamento em memória (testes e demos).
#[derive(Debug, Default, Clone)]
pub struct MemoryStorage {
    entries: HashMap<StorageKey, Vec<u8>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for MemoryStorage {
    fn read(&mut self, key: StorageKey) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.entries.get(&key).cloned())
    }

    fn write(&mut self, key: StorageKey, value: &[u8]) -> Result<(), StorageError> {
        self.entries.insert(key, value.to_vec());
        Ok(())
    }

    fn reset(&mut self) -> Result<(), StorageError> {
        self.entries.clear();
        Ok(())
    }
}

// ──────────────────────────────────────────────
// Placa
// ──────────────────────────────────────────────

/// Relógio, LED de status e botão de reset.
pub trait Board {
    /// Milissegundos desde o boot. Dá a volta em `u32::MAX`.
    fn now_ms(&self) -> u32;
    fn set_status_led(&mut self, on: bool);
    fn reset_button_pressed(&mut self) -> bool;
}

/// `true` quando `interval` ms passaram desde `since`, tolerando a volta do relógio.
pub fn timeout_expired(now: u32, since: u32, interval: u32) -> bool {
    now.wrapping_sub(since) >= interval
}

/// UUID textual com hífens nas posições 8, 13, 18 e 23.
///
/// Só a forma é conferida: o gateway pode emitir identificadores que não são hex.
pub fn is_uuid(s: &str) -> bool {
    let bytes = s.as_bytes();
    bytes.len() == UUID_LEN
        && bytes
            .iter()
            .enumerate()
            .all(|(i, &b)| matches!(i, 8 | 13 | 18 | 23) == (b == b'-'))
}
