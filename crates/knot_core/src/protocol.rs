//! Protocolo de comunicação binário thing ↔ gateway.
//!
//! Formato do frame:
//!
//! ```text
//! ┌─────────┬────────────────┬──────────────┐
//! │ Tipo(1) │ payload_len(1) │ Payload (N)  │
//! └─────────┴────────────────┴──────────────┘
//! ```
//!
//! - Tipo: código `KNOT_MSG_*` (ver [`MessageType`])
//! - `payload_len` calculado a partir do formato específico de cada payload
//! - Inteiros em little-endian, strings de tamanho fixo completadas com `\0`

use bytes::{Buf, BufMut, BytesMut};

use crate::registry::ItemConfig;
use crate::schema::{SCHEMA_NAME_LEN, SchemaRecord};
use crate::types::{EventFlags, FLOAT_VALUE_LEN, SensorId, ValueKind, get_float, put_float};

/// Tamanho do header (tipo + payload_len).
pub const HEADER_SIZE: usize = 2;

/// Tamanho máximo de uma mensagem completa.
pub const MAX_MESSAGE_SIZE: usize = 128;

/// MTU do rádio. O REGISTER_REQ deve caber num único frame.
pub const RADIO_MTU: usize = 32;

/// Maior nome de dispositivo que cabe no REGISTER_REQ sem fragmentar.
pub const MAX_DEVICE_NAME_LEN: usize = RADIO_MTU - HEADER_SIZE - 8;

/// Tamanho do UUID em formato texto.
pub const UUID_LEN: usize = 36;

/// Tamanho do token de autenticação.
pub const TOKEN_LEN: usize = 40;

const SCHEMA_PAYLOAD_LEN: usize = 5 + SCHEMA_NAME_LEN;
const CONFIG_PAYLOAD_LEN: usize = 4 + 2 * FLOAT_VALUE_LEN;

/// Códigos de resultado carregados nas respostas.
pub mod result {
    pub const SUCCESS: i8 = 0;
    pub const ERROR_UNKNOWN: i8 = -1;
    pub const INVALID_DEVICE: i8 = -2;
    pub const INVALID_DATA: i8 = -3;
    pub const CREDENTIAL_UNAUTHORIZED: i8 = -4;
    pub const SCHEMA_EMPTY: i8 = -5;
}

/// Erros do protocolo.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("Mensagem muito curta ({0} bytes, mínimo {min})", min = HEADER_SIZE)]
    TooShort(usize),

    #[error("Tipo de mensagem desconhecido: 0x{0:02X}")]
    UnknownType(u8),

    #[error("payload_len declarado {declared}, recebido {actual}")]
    LengthMismatch { declared: usize, actual: usize },

    #[error("Payload de {kind:?} com tamanho inválido: {len} bytes")]
    BadPayload { kind: MessageType, len: usize },

    #[error("Mensagem de {0} bytes excede o máximo de {max}", max = MAX_MESSAGE_SIZE)]
    TooLarge(usize),

    #[error("Valor {0:?} com tamanho inválido: {1} bytes")]
    InvalidValue(ValueKind, usize),

    #[error("Campo inválido: {0}")]
    InvalidField(&'static str),
}

// ──────────────────────────────────────────────
// Tipos de mensagem
// ──────────────────────────────────────────────

/// Código de tipo no header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    RegisterReq = 0x10,
    RegisterResp = 0x11,
    UnregisterReq = 0x12,
    UnregisterResp = 0x13,
    AuthReq = 0x14,
    AuthResp = 0x15,
    Data = 0x20,
    DataResp = 0x21,
    GetData = 0x30,
    SetData = 0x31,
    Schema = 0x40,
    SchemaResp = 0x41,
    SchemaEnd = 0x42,
    SchemaEndResp = 0x43,
    SetConfig = 0x50,
    ConfigResp = 0x51,
}

impl TryFrom<u8> for MessageType {
    type Error = ProtocolError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        let ty = match code {
            0x10 => MessageType::RegisterReq,
            0x11 => MessageType::RegisterResp,
            0x12 => MessageType::UnregisterReq,
            0x13 => MessageType::UnregisterResp,
            0x14 => MessageType::AuthReq,
            0x15 => MessageType::AuthResp,
            0x20 => MessageType::Data,
            0x21 => MessageType::DataResp,
            0x30 => MessageType::GetData,
            0x31 => MessageType::SetData,
            0x40 => MessageType::Schema,
            0x41 => MessageType::SchemaResp,
            0x42 => MessageType::SchemaEnd,
            0x43 => MessageType::SchemaEndResp,
            0x50 => MessageType::SetConfig,
            0x51 => MessageType::ConfigResp,
            other => return Err(ProtocolError::UnknownType(other)),
        };
        Ok(ty)
    }
}

/// Mensagem decodificada.
///
/// Payloads de valor (`Data`, `SetData`) ficam em bytes: só o registro
/// sabe o tipo do item e interpreta com [`crate::types::Value::decode`].
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    RegisterReq { device_id: u64, name: String },
    RegisterResp { result: i8, uuid: String, token: String },
    UnregisterReq,
    UnregisterResp,
    AuthReq { uuid: String, token: String },
    AuthResp { result: i8 },
    Data { sensor_id: SensorId, payload: Vec<u8> },
    DataResp { sensor_id: SensorId, result: i8 },
    GetData { sensor_id: SensorId },
    SetData { sensor_id: SensorId, payload: Vec<u8> },
    Schema { record: SchemaRecord, end: bool },
    SchemaResp { result: i8, end: bool },
    SetConfig { sensor_id: SensorId, config: ItemConfig },
    ConfigResp { sensor_id: SensorId },
}

impl Message {
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::RegisterReq { .. } => MessageType::RegisterReq,
            Message::RegisterResp { .. } => MessageType::RegisterResp,
            Message::UnregisterReq => MessageType::UnregisterReq,
            Message::UnregisterResp => MessageType::UnregisterResp,
            Message::AuthReq { .. } => MessageType::AuthReq,
            Message::AuthResp { .. } => MessageType::AuthResp,
            Message::Data { .. } => MessageType::Data,
            Message::DataResp { .. } => MessageType::DataResp,
            Message::GetData { .. } => MessageType::GetData,
            Message::SetData { .. } => MessageType::SetData,
            Message::Schema { end: false, .. } => MessageType::Schema,
            Message::Schema { end: true, .. } => MessageType::SchemaEnd,
            Message::SchemaResp { end: false, .. } => MessageType::SchemaResp,
            Message::SchemaResp { end: true, .. } => MessageType::SchemaEndResp,
            Message::SetConfig { .. } => MessageType::SetConfig,
            Message::ConfigResp { .. } => MessageType::ConfigResp,
        }
    }
}

// ──────────────────────────────────────────────
// Encode
// ──────────────────────────────────────────────

/// Codifica uma [`Message`] para transmissão.
///
/// Retorna bytes no formato `[TIPO][PAYLOAD_LEN][payload...]`.
pub fn encode_message(msg: &Message) -> Result<Vec<u8>, ProtocolError> {
    let mut payload = BytesMut::with_capacity(MAX_MESSAGE_SIZE);

    match msg {
        Message::RegisterReq { device_id, name } => {
            payload.put_u64_le(*device_id);
            payload.put_slice(truncate_str(name, MAX_DEVICE_NAME_LEN).as_bytes());
        }
        Message::RegisterResp {
            result,
            uuid,
            token,
        } => {
            payload.put_i8(*result);
            put_fixed(&mut payload, uuid, UUID_LEN);
            put_fixed(&mut payload, token, TOKEN_LEN);
        }
        Message::UnregisterReq | Message::UnregisterResp => {}
        Message::AuthReq { uuid, token } => {
            put_fixed(&mut payload, uuid, UUID_LEN);
            put_fixed(&mut payload, token, TOKEN_LEN);
        }
        Message::AuthResp { result } | Message::SchemaResp { result, .. } => {
            payload.put_i8(*result);
        }
        Message::Data {
            sensor_id,
            payload: value,
        }
        | Message::SetData {
            sensor_id,
            payload: value,
        } => {
            payload.put_u8(*sensor_id);
            payload.put_slice(value);
        }
        Message::DataResp { sensor_id, result } => {
            payload.put_u8(*sensor_id);
            payload.put_i8(*result);
        }
        Message::GetData { sensor_id } | Message::ConfigResp { sensor_id } => {
            payload.put_u8(*sensor_id);
        }
        Message::Schema { record, .. } => {
            payload.put_u8(record.sensor_id);
            payload.put_u8(record.value_kind.code());
            payload.put_u8(record.unit);
            payload.put_u16_le(record.type_id);
            put_fixed(&mut payload, &record.name, SCHEMA_NAME_LEN);
        }
        Message::SetConfig { sensor_id, config } => {
            payload.put_u8(*sensor_id);
            payload.put_u8(config.event_flags.bits());
            payload.put_u16_le(config.time_interval_s);
            put_float(&mut payload, &config.lower_limit);
            put_float(&mut payload, &config.upper_limit);
        }
    }

    let total = HEADER_SIZE + payload.len();
    if total > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::TooLarge(total));
    }

    let mut frame = Vec::with_capacity(total);
    frame.push(msg.message_type() as u8);
    frame.push(payload.len() as u8);
    frame.extend_from_slice(&payload);

    Ok(frame)
}

// ──────────────────────────────────────────────
// Decode
// ──────────────────────────────────────────────

/// Decodifica bytes recebidos em [`Message`].
///
/// Valida tipo e `payload_len` antes de interpretar o payload.
pub fn decode_message(data: &[u8]) -> Result<Message, ProtocolError> {
    if data.len() < HEADER_SIZE {
        return Err(ProtocolError::TooShort(data.len()));
    }

    let ty = MessageType::try_from(data[0])?;
    let declared = data[1] as usize;
    let mut payload = &data[HEADER_SIZE..];
    if payload.len() != declared {
        return Err(ProtocolError::LengthMismatch {
            declared,
            actual: payload.len(),
        });
    }

    let bad = || ProtocolError::BadPayload {
        kind: ty,
        len: declared,
    };
    let exact = |n: usize| if declared == n { Ok(()) } else { Err(bad()) };

    let msg = match ty {
        MessageType::RegisterReq => {
            if declared < 8 {
                return Err(bad());
            }
            let device_id = payload.get_u64_le();
            let name = String::from_utf8(payload.to_vec())
                .map_err(|_| ProtocolError::InvalidField("name"))?;
            Message::RegisterReq { device_id, name }
        }
        MessageType::RegisterResp => {
            exact(1 + UUID_LEN + TOKEN_LEN)?;
            let result = payload.get_i8();
            let uuid = get_fixed(&mut payload, UUID_LEN, "uuid")?;
            let token = get_fixed(&mut payload, TOKEN_LEN, "token")?;
            Message::RegisterResp {
                result,
                uuid,
                token,
            }
        }
        MessageType::UnregisterReq => {
            exact(0)?;
            Message::UnregisterReq
        }
        MessageType::UnregisterResp => {
            exact(0)?;
            Message::UnregisterResp
        }
        MessageType::AuthReq => {
            exact(UUID_LEN + TOKEN_LEN)?;
            let uuid = get_fixed(&mut payload, UUID_LEN, "uuid")?;
            let token = get_fixed(&mut payload, TOKEN_LEN, "token")?;
            Message::AuthReq { uuid, token }
        }
        MessageType::AuthResp => {
            exact(1)?;
            Message::AuthResp {
                result: payload.get_i8(),
            }
        }
        MessageType::Data | MessageType::SetData => {
            if declared < 2 {
                return Err(bad());
            }
            let sensor_id = payload.get_u8();
            let value = payload.to_vec();
            if ty == MessageType::Data {
                Message::Data {
                    sensor_id,
                    payload: value,
                }
            } else {
                Message::SetData {
                    sensor_id,
                    payload: value,
                }
            }
        }
        MessageType::DataResp => {
            exact(2)?;
            Message::DataResp {
                sensor_id: payload.get_u8(),
                result: payload.get_i8(),
            }
        }
        MessageType::GetData => {
            exact(1)?;
            Message::GetData {
                sensor_id: payload.get_u8(),
            }
        }
        MessageType::ConfigResp => {
            exact(1)?;
            Message::ConfigResp {
                sensor_id: payload.get_u8(),
            }
        }
        MessageType::Schema | MessageType::SchemaEnd => {
            exact(SCHEMA_PAYLOAD_LEN)?;
            let sensor_id = payload.get_u8();
            let value_kind = ValueKind::from_code(payload.get_u8())
                .ok_or(ProtocolError::InvalidField("value_type"))?;
            let unit = payload.get_u8();
            let type_id = payload.get_u16_le();
            let name = get_fixed(&mut payload, SCHEMA_NAME_LEN, "name")?;
            Message::Schema {
                record: SchemaRecord {
                    sensor_id,
                    value_kind,
                    unit,
                    type_id,
                    name,
                },
                end: ty == MessageType::SchemaEnd,
            }
        }
        MessageType::SchemaResp | MessageType::SchemaEndResp => {
            exact(1)?;
            Message::SchemaResp {
                result: payload.get_i8(),
                end: ty == MessageType::SchemaEndResp,
            }
        }
        MessageType::SetConfig => {
            exact(CONFIG_PAYLOAD_LEN)?;
            let sensor_id = payload.get_u8();
            let event_flags = EventFlags::from_bits_truncate(payload.get_u8());
            let time_interval_s = payload.get_u16_le();
            let lower_limit = get_float(&mut payload);
            let upper_limit = get_float(&mut payload);
            Message::SetConfig {
                sensor_id,
                config: ItemConfig {
                    event_flags,
                    time_interval_s,
                    lower_limit,
                    upper_limit,
                },
            }
        }
    };

    Ok(msg)
}

// ──────────────────────────────────────────────
// Auxiliares
// ──────────────────────────────────────────────

/// Remove o próximo frame completo de um fluxo de bytes (transportes de stream).
///
/// Retorna `None` enquanto o header ou o payload estiverem incompletos.
pub fn take_frame(pending: &mut Vec<u8>) -> Option<Vec<u8>> {
    if pending.len() < HEADER_SIZE {
        return None;
    }
    let total = HEADER_SIZE + pending[1] as usize;
    if pending.len() < total {
        return None;
    }
    Some(pending.drain(..total).collect())
}

/// Corta `s` em no máximo `max` bytes sem quebrar um caractere UTF-8.
pub fn truncate_str(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

fn put_fixed(out: &mut BytesMut, s: &str, len: usize) {
    let bytes = truncate_str(s, len).as_bytes();
    out.put_slice(bytes);
    out.put_bytes(0, len - bytes.len());
}

fn get_fixed(buf: &mut &[u8], len: usize, field: &'static str) -> Result<String, ProtocolError> {
    let raw = &buf[..len];
    let end = raw.iter().position(|&b| b == 0).unwrap_or(len);
    let s = std::str::from_utf8(&raw[..end])
        .map_err(|_| ProtocolError::InvalidField(field))?
        .to_string();
    buf.advance(len);
    Ok(s)
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────
