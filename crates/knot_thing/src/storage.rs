//! Credenciais persistidas em arquivo (bincode).

use std::path::{Path, PathBuf};

use knot_core::hal::{DeviceAddress, Storage, StorageError, StorageKey};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Conteúdo do arquivo de estado.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoredState {
    pub address: Option<DeviceAddress>,
    pub uuid: Option<String>,
    pub token: Option<String>,
    pub schema_sent: bool,
}

/// Armazenamento chave-valor sobre um único arquivo.
///
/// Cada escrita regrava o arquivo inteiro.
pub struct FileStorage {
    path: PathBuf,
    state: StoredState,
}

impl FileStorage {
    /// Abre o arquivo de estado. Ausente ou corrompido começa vazio.
    pub fn open(path: &Path) -> Self {
        let state = match std::fs::read(path) {
            Ok(bytes) => match bincode::deserialize::<StoredState>(&bytes) {
                Ok(state) => {
                    info!("Estado carregado de {}", path.display());
                    state
                }
                Err(e) => {
                    warn!("Estado em {} ilegível: {e}", path.display());
                    StoredState::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => StoredState::default(),
            Err(e) => {
                warn!("Erro ao ler {}: {e}", path.display());
                StoredState::default()
            }
        };
        Self {
            path: path.to_path_buf(),
            state,
        }
    }

    pub fn state(&self) -> &StoredState {
        &self.state
    }

    fn flush(&self) -> Result<(), StorageError> {
        let bytes =
            bincode::serialize(&self.state).map_err(|e| StorageError::Corrupt(e.to_string()))?;
        std::fs::write(&self.path, bytes)?;
        Ok(())
    }
}

fn utf8(value: &[u8]) -> Result<String, StorageError> {
    String::from_utf8(value.to_vec()).map_err(|e| StorageError::Corrupt(e.to_string()))
}

impl Storage for FileStorage {
    fn read(&mut self, key: StorageKey) -> Result<Option<Vec<u8>>, StorageError> {
        let value = match key {
            StorageKey::Address => self.state.address.map(|a| a.to_bytes().to_vec()),
            StorageKey::Uuid => self.state.uuid.as_ref().map(|s| s.as_bytes().to_vec()),
            StorageKey::Token => self.state.token.as_ref().map(|s| s.as_bytes().to_vec()),
            StorageKey::SchemaFlag => self.state.schema_sent.then(|| vec![1]),
        };
        Ok(value)
    }

    fn write(&mut self, key: StorageKey, value: &[u8]) -> Result<(), StorageError> {
        match key {
            StorageKey::Address => {
                let addr = DeviceAddress::from_bytes(value)
                    .ok_or_else(|| StorageError::Corrupt(format!("endereço de {} bytes", value.len())))?;
                self.state.address = Some(addr);
            }
            StorageKey::Uuid => self.state.uuid = Some(utf8(value)?),
            StorageKey::Token => self.state.token = Some(utf8(value)?),
            StorageKey::SchemaFlag => self.state.schema_sent = value.first() == Some(&1),
        }
        self.flush()
    }

    fn reset(&mut self) -> Result<(), StorageError> {
        self.state = StoredState::default();
        self.flush()
    }
}
