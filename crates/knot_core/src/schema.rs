//! Schema de um item: metadados enviados ao gateway uma vez por sessão.

use crate::protocol::truncate_str;
use crate::registry::DataItem;
use crate::types::{SensorId, ValueKind};

/// Largura fixa do nome no registro de schema.
pub const SCHEMA_NAME_LEN: usize = 23;

/// Registro de schema de um item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaRecord {
    pub sensor_id: SensorId,
    pub value_kind: ValueKind,
    pub unit: u8,
    pub type_id: u16,
    pub name: String,
}

/// Registro pronto para envio. `end` marca o item da última posição ocupada
/// e seleciona SCHEMA_END no lugar de SCHEMA.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaEntry {
    pub record: SchemaRecord,
    pub end: bool,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SchemaError {
    #[error("Sensor {0} não registrado")]
    NotFound(SensorId),

    #[error("Posição {0} vazia")]
    Empty(usize),
}

/// Gera o registro de schema de um item, com o nome truncado.
pub fn encode(item: &DataItem) -> SchemaRecord {
    SchemaRecord {
        sensor_id: item.id(),
        value_kind: item.value_kind(),
        unit: item.unit(),
        type_id: item.type_id(),
        name: truncate_str(item.name(), SCHEMA_NAME_LEN).to_string(),
    }
}
