//! Tipos básicos do protocolo KNoT.
//!
//! Identificadores de sensor, tipos semânticos (`type_id`), unidades,
//! tipos de valor e a tabela de combinações permitidas. O valor de um item
//! é um enum explícito ([`Value`]) no lugar da union do firmware em C.

use bytes::{Buf, BufMut, BytesMut};
use serde::{Deserialize, Serialize};

use crate::protocol::ProtocolError;

/// Identificador do item escolhido pela aplicação. `0` é reservado.
pub type SensorId = u8;

/// Tamanho máximo de um valor raw (bytes).
pub const MAX_RAW_SIZE: usize = 16;

/// Tamanho de um valor inteiro no fio (multiplier + value).
pub const INT_VALUE_LEN: usize = 8;

/// Tamanho de um valor float no fio (multiplier + int + dec).
pub const FLOAT_VALUE_LEN: usize = 12;

/// Escala da parte decimal de [`FloatValue`] (milionésimos).
pub const DECIMAL_SCALE: u32 = 1_000_000;

// ──────────────────────────────────────────────
// Tipo do valor
// ──────────────────────────────────────────────

/// Forma do valor de um item. Imutável após o registro.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueKind {
    Integer,
    Float,
    Boolean,
    Raw,
}

impl ValueKind {
    /// Código do tipo no fio (`KNOT_VALUE_TYPE_*`).
    pub fn code(self) -> u8 {
        match self {
            ValueKind::Integer => 1,
            ValueKind::Float => 2,
            ValueKind::Boolean => 3,
            ValueKind::Raw => 4,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(ValueKind::Integer),
            2 => Some(ValueKind::Float),
            3 => Some(ValueKind::Boolean),
            4 => Some(ValueKind::Raw),
            _ => None,
        }
    }
}

// ──────────────────────────────────────────────
// Valores
// ──────────────────────────────────────────────

/// Valor inteiro com multiplicador.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntValue {
    pub value: i32,
    pub multiplier: i32,
}

impl IntValue {
    pub fn new(value: i32) -> Self {
        Self {
            value,
            multiplier: 1,
        }
    }
}

/// Valor decimal: parte inteira + fração em milionésimos.
///
/// `25.5` é `(25, 500_000)` e `-1.25` é `(-1, 250_000)`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FloatValue {
    pub value_int: i32,
    pub value_dec: u32,
    pub multiplier: i32,
}

impl FloatValue {
    pub fn new(value_int: i32, value_dec: u32) -> Self {
        Self {
            value_int,
            value_dec,
            multiplier: 1,
        }
    }

    /// Converte de `f64`, truncando além de seis casas decimais.
    pub fn from_f64(value: f64) -> Self {
        let int = value.trunc();
        let dec = ((value - int).abs() * DECIMAL_SCALE as f64).round() as u32;
        Self::new(int as i32, dec.min(DECIMAL_SCALE - 1))
    }

    pub fn as_f64(&self) -> f64 {
        let frac = self.value_dec as f64 / DECIMAL_SCALE as f64;
        if self.value_int < 0 {
            self.value_int as f64 - frac
        } else {
            self.value_int as f64 + frac
        }
    }
}

/// Limite de threshold. Trafega no formato float para qualquer tipo numérico.
pub type Limit = FloatValue;

/// Último valor conhecido de um item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Int(IntValue),
    Float(FloatValue),
    Bool(bool),
    Raw(Vec<u8>),
}

impl Value {
    /// Valor neutro para o tipo (raw: buffer zerado com a capacidade dada).
    pub fn zero(kind: ValueKind, raw_capacity: usize) -> Self {
        match kind {
            ValueKind::Integer => Value::Int(IntValue::new(0)),
            ValueKind::Float => Value::Float(FloatValue::new(0, 0)),
            ValueKind::Boolean => Value::Bool(false),
            ValueKind::Raw => Value::Raw(vec![0; raw_capacity]),
        }
    }

    /// Tamanho do valor no fio.
    pub fn wire_len(&self) -> usize {
        match self {
            Value::Int(_) => INT_VALUE_LEN,
            Value::Float(_) => FLOAT_VALUE_LEN,
            Value::Bool(_) => 1,
            Value::Raw(bytes) => bytes.len(),
        }
    }

    /// Serializa o valor no formato do payload de DATA/SET_DATA.
    pub fn encode(&self, out: &mut BytesMut) {
        match self {
            Value::Int(v) => {
                out.put_i32_le(v.multiplier);
                out.put_i32_le(v.value);
            }
            Value::Float(v) => put_float(out, v),
            Value::Bool(b) => out.put_u8(u8::from(*b)),
            Value::Raw(bytes) => out.put_slice(bytes),
        }
    }

    /// Interpreta um payload de valor segundo o tipo do item.
    pub fn decode(kind: ValueKind, mut bytes: &[u8]) -> Result<Self, ProtocolError> {
        let expected = match kind {
            ValueKind::Integer => INT_VALUE_LEN,
            ValueKind::Float => FLOAT_VALUE_LEN,
            ValueKind::Boolean => 1,
            ValueKind::Raw => {
                if bytes.is_empty() || bytes.len() > MAX_RAW_SIZE {
                    return Err(ProtocolError::InvalidValue(kind, bytes.len()));
                }
                return Ok(Value::Raw(bytes.to_vec()));
            }
        };
        if bytes.len() != expected {
            return Err(ProtocolError::InvalidValue(kind, bytes.len()));
        }

        Ok(match kind {
            ValueKind::Integer => {
                let multiplier = bytes.get_i32_le();
                let value = bytes.get_i32_le();
                Value::Int(IntValue { value, multiplier })
            }
            ValueKind::Float => Value::Float(get_float(&mut bytes)),
            ValueKind::Boolean => Value::Bool(bytes.get_u8() != 0),
            ValueKind::Raw => unreachable!("raw tratado acima"),
        })
    }
}

/// Escreve um valor no layout float (`multiplier`, `value_int`, `value_dec`).
pub(crate) fn put_float(out: &mut BytesMut, v: &FloatValue) {
    out.put_i32_le(v.multiplier);
    out.put_i32_le(v.value_int);
    out.put_u32_le(v.value_dec);
}

/// Lê um valor no layout float. O chamador garante 12 bytes disponíveis.
pub(crate) fn get_float(buf: &mut &[u8]) -> FloatValue {
    let multiplier = buf.get_i32_le();
    let value_int = buf.get_i32_le();
    let value_dec = buf.get_u32_le();
    FloatValue {
        value_int,
        value_dec,
        multiplier,
    }
}

// ──────────────────────────────────────────────
// Flags de evento
// ──────────────────────────────────────────────

bitflags::bitflags! {
    /// Condições que disparam o envio de um valor.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct EventFlags: u8 {
        const TIME = 0x01;
        const LOWER_THRESHOLD = 0x02;
        const UPPER_THRESHOLD = 0x04;
        const CHANGE = 0x08;
        const UNREGISTERED = 0x80;
    }
}

// ──────────────────────────────────────────────
// Tipos semânticos e unidades
// ──────────────────────────────────────────────

/// `type_id` definidos pelo protocolo.
pub mod type_id {
    pub const NONE: u16 = 0x0000;
    pub const VOLTAGE: u16 = 0x0001;
    pub const CURRENT: u16 = 0x0002;
    pub const RESISTANCE: u16 = 0x0003;
    pub const POWER: u16 = 0x0004;
    pub const TEMPERATURE: u16 = 0x0005;
    pub const RELATIVE_HUMIDITY: u16 = 0x0006;
    pub const LUMINOSITY: u16 = 0x0007;
    pub const TIME: u16 = 0x0008;
    pub const MASS: u16 = 0x0009;
    pub const PRESSURE: u16 = 0x000A;
    pub const DISTANCE: u16 = 0x000B;
    pub const ANGLE: u16 = 0x000C;
    pub const VOLUME: u16 = 0x000D;
    pub const AREA: u16 = 0x000E;
    pub const RAIN: u16 = 0x000F;
    pub const DENSITY: u16 = 0x0010;
    pub const LATITUDE: u16 = 0x0011;
    pub const LONGITUDE: u16 = 0x0012;
    pub const SPEED: u16 = 0x0013;
    pub const VOLUME_FLOW: u16 = 0x0014;
    pub const ENERGY: u16 = 0x0015;
    pub const PRESENCE: u16 = 0xFFF1;
    pub const SWITCH: u16 = 0xFFF2;
    pub const COMMAND: u16 = 0xFFF3;
    pub const ANALOG: u16 = 0xFFF4;
    pub const INVALID: u16 = 0xFFFF;
}

/// Unidades mais usadas. Os códigos são relativos ao `type_id`.
pub mod unit {
    pub const NOT_APPLICABLE: u8 = 0;
    pub const VOLTAGE_V: u8 = 1;
    pub const VOLTAGE_MV: u8 = 2;
    pub const VOLTAGE_KV: u8 = 3;
    pub const TEMPERATURE_C: u8 = 1;
    pub const TEMPERATURE_F: u8 = 2;
    pub const TEMPERATURE_K: u8 = 3;
    pub const RELATIVE_HUMIDITY: u8 = 1;
    pub const TIME_S: u8 = 1;
    pub const TIME_MS: u8 = 2;
    pub const TIME_US: u8 = 3;
    pub const SPEED_MS: u8 = 1;
    pub const SPEED_CMS: u8 = 2;
    pub const SPEED_KMH: u8 = 3;
    pub const SPEED_MIH: u8 = 4;
}

/// Maior código de unidade aceito para um `type_id` básico.
fn max_unit(type_id: u16) -> Option<u8> {
    let max = match type_id {
        type_id::VOLTAGE => 3,
        type_id::CURRENT => 2,
        type_id::RESISTANCE => 1,
        type_id::POWER => 3,
        type_id::TEMPERATURE => 3,
        type_id::RELATIVE_HUMIDITY => 1,
        type_id::LUMINOSITY => 3,
        type_id::TIME => 3,
        type_id::MASS => 5,
        type_id::PRESSURE => 3,
        type_id::DISTANCE => 4,
        type_id::ANGLE => 2,
        type_id::VOLUME => 4,
        type_id::AREA => 3,
        type_id::RAIN => 1,
        type_id::DENSITY => 1,
        type_id::LATITUDE | type_id::LONGITUDE => 1,
        type_id::SPEED => 4,
        type_id::VOLUME_FLOW => 5,
        type_id::ENERGY => 5,
        _ => return None,
    };
    Some(max)
}

/// Verifica se a combinação `(type_id, unit, kind)` é permitida.
///
/// Tipos básicos exigem valor numérico e unidade do intervalo do tipo;
/// tipos lógicos não têm unidade e têm forma fixa.
pub fn schema_is_valid(type_id: u16, unit: u8, kind: ValueKind) -> bool {
    match type_id {
        type_id::NONE => unit == unit::NOT_APPLICABLE,
        type_id::PRESENCE | type_id::SWITCH => {
            unit == unit::NOT_APPLICABLE && kind == ValueKind::Boolean
        }
        type_id::COMMAND => unit == unit::NOT_APPLICABLE && kind == ValueKind::Raw,
        type_id::ANALOG => {
            unit == unit::NOT_APPLICABLE
                && matches!(kind, ValueKind::Integer | ValueKind::Float)
        }
        basic => match max_unit(basic) {
            Some(max) => {
                (1..=max).contains(&unit) && matches!(kind, ValueKind::Integer | ValueKind::Float)
            }
            None => false,
        },
    }
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn float_value_scaling() {
        assert_eq!(FloatValue::new(25, 500_000).as_f64(), 25.5);
        assert_eq!(FloatValue::new(-1, 250_000).as_f64(), -1.25);
        assert_eq!(FloatValue::from_f64(12.75), FloatValue::new(12, 750_000));
    }

    #[test]
    fn value_decode_checks_length() {
        assert!(matches!(
            Value::decode(ValueKind::Integer, &[0; 4]),
            Err(ProtocolError::InvalidValue(ValueKind::Integer, 4))
        ));
        assert!(Value::decode(ValueKind::Raw, &[]).is_err());
        assert!(Value::decode(ValueKind::Raw, &[0; MAX_RAW_SIZE + 1]).is_err());
    }

    #[test]
    fn value_layout_is_little_endian() {
        let mut out = BytesMut::new();
        Value::Int(IntValue {
            value: 258,
            multiplier: 1,
        })
        .encode(&mut out);
        assert_eq!(&out[..], &[1, 0, 0, 0, 2, 1, 0, 0]);
        assert_eq!(
            Value::decode(ValueKind::Integer, &out).unwrap(),
            Value::Int(IntValue::new(258))
        );
    }

    #[test]
    fn schema_table() {
        assert!(schema_is_valid(
            type_id::TEMPERATURE,
            unit::TEMPERATURE_C,
            ValueKind::Float
        ));
        assert!(!schema_is_valid(
            type_id::TEMPERATURE,
            unit::TEMPERATURE_C,
            ValueKind::Boolean
        ));
        assert!(!schema_is_valid(type_id::TEMPERATURE, 9, ValueKind::Integer));
        assert!(schema_is_valid(
            type_id::SWITCH,
            unit::NOT_APPLICABLE,
            ValueKind::Boolean
        ));
        assert!(schema_is_valid(
            type_id::COMMAND,
            unit::NOT_APPLICABLE,
            ValueKind::Raw
        ));
        assert!(!schema_is_valid(
            type_id::INVALID,
            unit::NOT_APPLICABLE,
            ValueKind::Raw
        ));
    }

    #[test]
    fn kind_codes_roundtrip() {
        for kind in [
            ValueKind::Integer,
            ValueKind::Float,
            ValueKind::Boolean,
            ValueKind::Raw,
        ] {
            assert_eq!(ValueKind::from_code(kind.code()), Some(kind));
        }
        assert_eq!(ValueKind::from_code(0), None);
    }
}
