//! Registro de itens de dados (sensores e atuadores).
//!
//! Tabela de capacidade fixa indexada por posição, com o `id` da aplicação
//! como chave de busca. Cada item guarda metadados, último valor, configuração
//! de eventos e os callbacks de leitura/escrita do seu tipo.

use tracing::{debug, info};

use crate::protocol::result;
use crate::protocol::ProtocolError;
use crate::schema::{self, SchemaEntry, SchemaError};
use crate::types::{
    EventFlags, FloatValue, IntValue, Limit, MAX_RAW_SIZE, SensorId, Value, ValueKind,
    schema_is_valid,
};

// ──────────────────────────────────────────────
// Callbacks
// ──────────────────────────────────────────────

/// Falha reportada por um callback da aplicação.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
#[error("Falha no callback: {0}")]
pub struct CallbackError(pub String);

pub type IntRead = Box<dyn FnMut() -> Result<IntValue, CallbackError>>;
pub type IntWrite = Box<dyn FnMut(IntValue) -> Result<(), CallbackError>>;
pub type FloatRead = Box<dyn FnMut() -> Result<FloatValue, CallbackError>>;
pub type FloatWrite = Box<dyn FnMut(FloatValue) -> Result<(), CallbackError>>;
pub type BoolRead = Box<dyn FnMut() -> Result<bool, CallbackError>>;
pub type BoolWrite = Box<dyn FnMut(bool) -> Result<(), CallbackError>>;
/// Preenche o buffer e retorna quantos bytes foram lidos.
pub type RawRead = Box<dyn FnMut(&mut [u8]) -> Result<usize, CallbackError>>;
pub type RawWrite = Box<dyn FnMut(&[u8]) -> Result<(), CallbackError>>;

/// Par de callbacks de um item. A variante define o [`ValueKind`].
pub enum Callbacks {
    Integer {
        read: Option<IntRead>,
        write: Option<IntWrite>,
    },
    Float {
        read: Option<FloatRead>,
        write: Option<FloatWrite>,
    },
    Boolean {
        read: Option<BoolRead>,
        write: Option<BoolWrite>,
    },
    Raw {
        read: Option<RawRead>,
        write: Option<RawWrite>,
    },
}

impl Callbacks {
    pub fn kind(&self) -> ValueKind {
        match self {
            Callbacks::Integer { .. } => ValueKind::Integer,
            Callbacks::Float { .. } => ValueKind::Float,
            Callbacks::Boolean { .. } => ValueKind::Boolean,
            Callbacks::Raw { .. } => ValueKind::Raw,
        }
    }

    /// Pelo menos um dos dois callbacks precisa existir.
    fn is_valid(&self) -> bool {
        match self {
            Callbacks::Integer { read, write } => read.is_some() || write.is_some(),
            Callbacks::Float { read, write } => read.is_some() || write.is_some(),
            Callbacks::Boolean { read, write } => read.is_some() || write.is_some(),
            Callbacks::Raw { read, write } => read.is_some() || write.is_some(),
        }
    }
}

impl std::fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (read, write) = match self {
            Callbacks::Integer { read, write } => (read.is_some(), write.is_some()),
            Callbacks::Float { read, write } => (read.is_some(), write.is_some()),
            Callbacks::Boolean { read, write } => (read.is_some(), write.is_some()),
            Callbacks::Raw { read, write } => (read.is_some(), write.is_some()),
        };
        f.debug_struct("Callbacks")
            .field("kind", &self.kind())
            .field("read", &read)
            .field("write", &write)
            .finish()
    }
}

// ──────────────────────────────────────────────
// Erros
// ──────────────────────────────────────────────

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RegisterError {
    #[error("Id 0 é reservado")]
    InvalidId,

    #[error("Capacidade de {0} itens esgotada")]
    CapacityExceeded(usize),

    #[error("Sensor {0} já registrado")]
    DuplicateId(SensorId),

    #[error("Nome vazio")]
    InvalidName,

    #[error("Combinação type_id 0x{type_id:04X} / unit {unit} / {kind:?} não permitida")]
    InvalidSchema {
        type_id: u16,
        unit: u8,
        kind: ValueKind,
    },

    #[error("Nenhum callback de leitura ou escrita")]
    InvalidCallbacks,

    #[error("Buffer raw inválido: capacidade {0} (máximo {max})", max = MAX_RAW_SIZE)]
    InvalidBuffer(usize),
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Sensor {0} não registrado")]
    NotFound(SensorId),

    #[error("Limite inferior acima do superior")]
    InvalidLimits,
}

/// Erros de leitura/escrita de um item através dos callbacks.
#[derive(Debug, thiserror::Error)]
pub enum AccessError {
    #[error("Sensor {0} não registrado")]
    NotFound(SensorId),

    #[error("Sensor {0} sem callback de leitura")]
    NotReadable(SensorId),

    #[error("Sensor {0} sem callback de escrita")]
    NotWritable(SensorId),

    #[error("Leitura raw de {0} bytes excede o buffer")]
    RawOverflow(usize),

    #[error(transparent)]
    Callback(#[from] CallbackError),

    #[error(transparent)]
    Payload(#[from] ProtocolError),
}

impl AccessError {
    /// Código de resultado enviado ao gateway.
    pub fn result_code(&self) -> i8 {
        match self {
            AccessError::NotFound(_) => result::INVALID_DEVICE,
            AccessError::Payload(_) | AccessError::RawOverflow(_) => result::INVALID_DATA,
            AccessError::NotReadable(_) | AccessError::NotWritable(_) | AccessError::Callback(_) => {
                result::ERROR_UNKNOWN
            }
        }
    }
}

// ──────────────────────────────────────────────
// Item
// ──────────────────────────────────────────────

/// Configuração de eventos de um item.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ItemConfig {
    pub event_flags: EventFlags,
    /// Intervalo do evento TIME, em segundos.
    pub time_interval_s: u16,
    pub lower_limit: Limit,
    pub upper_limit: Limit,
}

/// Travas que impedem o mesmo threshold de disparar a cada tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Hysteresis {
    pub lower_latched: bool,
    pub upper_latched: bool,
}

/// Um sensor/atuador registrado.
#[derive(Debug)]
pub struct DataItem {
    id: SensorId,
    name: String,
    type_id: u16,
    unit: u8,
    kind: ValueKind,
    callbacks: Callbacks,
    raw_capacity: usize,
    pub(crate) last_value: Value,
    pub(crate) config: ItemConfig,
    pub(crate) hysteresis: Hysteresis,
    pub(crate) last_send_time: u32,
}

impl DataItem {
    pub fn id(&self) -> SensorId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn type_id(&self) -> u16 {
        self.type_id
    }

    pub fn unit(&self) -> u8 {
        self.unit
    }

    pub fn value_kind(&self) -> ValueKind {
        self.kind
    }

    pub fn config(&self) -> &ItemConfig {
        &self.config
    }

    pub fn last_value(&self) -> &Value {
        &self.last_value
    }

    pub fn hysteresis(&self) -> Hysteresis {
        self.hysteresis
    }

    pub fn last_send_time(&self) -> u32 {
        self.last_send_time
    }

    /// Capacidade do buffer raw (0 para os demais tipos).
    pub fn raw_capacity(&self) -> usize {
        self.raw_capacity
    }

    /// Lê o valor atual pelo callback de leitura.
    pub fn read(&mut self) -> Result<Value, AccessError> {
        let id = self.id;
        let value = match &mut self.callbacks {
            Callbacks::Integer { read: Some(f), .. } => Value::Int(f()?),
            Callbacks::Float { read: Some(f), .. } => Value::Float(f()?),
            Callbacks::Boolean { read: Some(f), .. } => Value::Bool(f()?),
            Callbacks::Raw { read: Some(f), .. } => {
                let mut buf = vec![0u8; self.raw_capacity];
                let n = f(&mut buf)?;
                if n > self.raw_capacity {
                    return Err(AccessError::RawOverflow(n));
                }
                buf.truncate(n);
                Value::Raw(buf)
            }
            _ => return Err(AccessError::NotReadable(id)),
        };
        Ok(value)
    }

    /// Entrega um valor ao callback de escrita.
    pub fn write(&mut self, value: Value) -> Result<(), AccessError> {
        let id = self.id;
        match (&mut self.callbacks, value) {
            (Callbacks::Integer { write: Some(f), .. }, Value::Int(v)) => f(v)?,
            (Callbacks::Float { write: Some(f), .. }, Value::Float(v)) => f(v)?,
            (Callbacks::Boolean { write: Some(f), .. }, Value::Bool(v)) => f(v)?,
            (Callbacks::Raw { write: Some(f), .. }, Value::Raw(bytes)) => {
                if bytes.len() > self.raw_capacity {
                    return Err(AccessError::RawOverflow(bytes.len()));
                }
                f(&bytes)?
            }
            _ => return Err(AccessError::NotWritable(id)),
        }
        Ok(())
    }
}

// ──────────────────────────────────────────────
// Registro
// ──────────────────────────────────────────────

/// Buffer inicial e capacidade de um item raw.
#[derive(Default)]
struct RawBuffer {
    initial: Vec<u8>,
    capacity: usize,
}

impl RawBuffer {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            initial: Vec::new(),
            capacity,
        }
    }
}

/// Tabela de itens com capacidade fixa.
#[derive(Debug)]
pub struct Registry {
    slots: Vec<Option<DataItem>>,
    default_time_interval_s: u16,
}

impl Registry {
    pub fn new(capacity: usize) -> Self {
        Self::with_defaults(capacity, 0)
    }

    /// Cria a tabela definindo o intervalo TIME aplicado a novos itens.
    pub fn with_defaults(capacity: usize, default_time_interval_s: u16) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self {
            slots,
            default_time_interval_s,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(Option::is_none)
    }

    /// Remove todos os itens.
    pub fn clear(&mut self) {
        self.slots.iter_mut().for_each(|s| *s = None);
    }

    /// Maior posição ocupada.
    pub fn last_slot(&self) -> Option<usize> {
        self.slots.iter().rposition(Option::is_some)
    }

    /// Id do item na posição dada, se houver.
    pub fn sensor_id_at(&self, slot: usize) -> Option<SensorId> {
        self.item_at(slot).map(DataItem::id)
    }

    pub fn item_at(&self, slot: usize) -> Option<&DataItem> {
        self.slots.get(slot).and_then(Option::as_ref)
    }

    pub(crate) fn item_at_mut(&mut self, slot: usize) -> Option<&mut DataItem> {
        self.slots.get_mut(slot).and_then(Option::as_mut)
    }

    fn slot_of(&self, id: SensorId) -> Option<usize> {
        self.slots
            .iter()
            .position(|s| s.as_ref().is_some_and(|item| item.id == id))
    }

    pub fn find(&self, id: SensorId) -> Option<&DataItem> {
        self.slot_of(id).and_then(|slot| self.item_at(slot))
    }

    pub fn find_mut(&mut self, id: SensorId) -> Option<&mut DataItem> {
        let slot = self.slot_of(id)?;
        self.item_at_mut(slot)
    }

    /// Registra um item. O tipo do valor vem da variante de `callbacks`;
    /// itens raw recebem um buffer de [`MAX_RAW_SIZE`] bytes.
    pub fn register(
        &mut self,
        id: SensorId,
        name: &str,
        type_id: u16,
        unit: u8,
        callbacks: Callbacks,
        now_ms: u32,
    ) -> Result<(), RegisterError> {
        let raw = if callbacks.kind() == ValueKind::Raw {
            RawBuffer::with_capacity(MAX_RAW_SIZE)
        } else {
            RawBuffer::default()
        };
        self.insert(id, name, type_id, unit, callbacks, raw, now_ms)
    }

    /// Registra um item raw com buffer próprio de `capacity` bytes.
    ///
    /// O conteúdo de `buffer` vira o último valor conhecido.
    #[allow(clippy::too_many_arguments)]
    pub fn register_raw(
        &mut self,
        id: SensorId,
        name: &str,
        buffer: Vec<u8>,
        capacity: usize,
        type_id: u16,
        unit: u8,
        read: Option<RawRead>,
        write: Option<RawWrite>,
        now_ms: u32,
    ) -> Result<(), RegisterError> {
        let raw = RawBuffer {
            initial: buffer,
            capacity,
        };
        self.insert(
            id,
            name,
            type_id,
            unit,
            Callbacks::Raw { read, write },
            raw,
            now_ms,
        )
    }

    #[allow(clippy::too_many_arguments)]
    pub fn register_integer(
        &mut self,
        id: SensorId,
        name: &str,
        type_id: u16,
        unit: u8,
        read: Option<IntRead>,
        write: Option<IntWrite>,
        now_ms: u32,
    ) -> Result<(), RegisterError> {
        self.register(id, name, type_id, unit, Callbacks::Integer { read, write }, now_ms)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn register_float(
        &mut self,
        id: SensorId,
        name: &str,
        type_id: u16,
        unit: u8,
        read: Option<FloatRead>,
        write: Option<FloatWrite>,
        now_ms: u32,
    ) -> Result<(), RegisterError> {
        self.register(id, name, type_id, unit, Callbacks::Float { read, write }, now_ms)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn register_boolean(
        &mut self,
        id: SensorId,
        name: &str,
        type_id: u16,
        unit: u8,
        read: Option<BoolRead>,
        write: Option<BoolWrite>,
        now_ms: u32,
    ) -> Result<(), RegisterError> {
        self.register(id, name, type_id, unit, Callbacks::Boolean { read, write }, now_ms)
    }

    #[allow(clippy::too_many_arguments)]
    fn insert(
        &mut self,
        id: SensorId,
        name: &str,
        type_id: u16,
        unit: u8,
        callbacks: Callbacks,
        raw: RawBuffer,
        now_ms: u32,
    ) -> Result<(), RegisterError> {
        if id == 0 {
            return Err(RegisterError::InvalidId);
        }
        let Some(slot) = self.slots.iter().position(Option::is_none) else {
            return Err(RegisterError::CapacityExceeded(self.capacity()));
        };
        if self.slot_of(id).is_some() {
            return Err(RegisterError::DuplicateId(id));
        }
        if name.trim().is_empty() {
            return Err(RegisterError::InvalidName);
        }
        if !callbacks.is_valid() {
            return Err(RegisterError::InvalidCallbacks);
        }
        let kind = callbacks.kind();
        if !schema_is_valid(type_id, unit, kind) {
            return Err(RegisterError::InvalidSchema {
                type_id,
                unit,
                kind,
            });
        }
        if kind == ValueKind::Raw
            && (raw.capacity == 0 || raw.capacity > MAX_RAW_SIZE || raw.initial.len() > raw.capacity)
        {
            return Err(RegisterError::InvalidBuffer(raw.capacity));
        }

        let last_value = match kind {
            ValueKind::Raw => {
                let mut initial = raw.initial;
                initial.resize(raw.capacity, 0);
                Value::Raw(initial)
            }
            _ => Value::zero(kind, 0),
        };
        self.slots[slot] = Some(DataItem {
            id,
            name: name.to_string(),
            type_id,
            unit,
            kind,
            callbacks,
            raw_capacity: raw.capacity,
            last_value,
            config: ItemConfig {
                time_interval_s: self.default_time_interval_s,
                ..ItemConfig::default()
            },
            hysteresis: Hysteresis::default(),
            last_send_time: now_ms,
        });
        info!("Sensor {id} registrado na posição {slot} ({kind:?}, \"{name}\")");
        Ok(())
    }

    /// Substitui a configuração de eventos de um item.
    ///
    /// Limite `None` mantém o valor atual. Nada muda se houver erro.
    pub fn configure(
        &mut self,
        id: SensorId,
        flags: EventFlags,
        time_interval_s: u16,
        lower: Option<Limit>,
        upper: Option<Limit>,
    ) -> Result<(), ConfigError> {
        let item = self.find_mut(id).ok_or(ConfigError::NotFound(id))?;

        if let (Some(lo), Some(hi)) = (lower, upper) {
            if lo.as_f64() > hi.as_f64() {
                return Err(ConfigError::InvalidLimits);
            }
        }
        let next = ItemConfig {
            event_flags: flags - EventFlags::UNREGISTERED,
            time_interval_s,
            lower_limit: lower.unwrap_or(item.config.lower_limit),
            upper_limit: upper.unwrap_or(item.config.upper_limit),
        };

        item.config = next;
        item.hysteresis = Hysteresis::default();
        debug!("Sensor {id} configurado: {next:?}");
        Ok(())
    }

    /// Registro de schema do item `id`.
    pub fn build_schema_record(&self, id: SensorId) -> Result<SchemaEntry, SchemaError> {
        let slot = self.slot_of(id).ok_or(SchemaError::NotFound(id))?;
        self.schema_at(slot)
    }

    /// Registro de schema do item na posição `slot`.
    pub fn schema_at(&self, slot: usize) -> Result<SchemaEntry, SchemaError> {
        let item = self.item_at(slot).ok_or(SchemaError::Empty(slot))?;
        Ok(SchemaEntry {
            record: schema::encode(item),
            end: self.last_slot() == Some(slot),
        })
    }

    /// Lê o valor atual do item `id` pelo seu callback.
    pub fn read_value(&mut self, id: SensorId) -> Result<Value, AccessError> {
        self.find_mut(id).ok_or(AccessError::NotFound(id))?.read()
    }

    /// Interpreta `payload` segundo o tipo do item e chama o callback de escrita.
    pub fn write_value(&mut self, id: SensorId, payload: &[u8]) -> Result<(), AccessError> {
        let item = self.find_mut(id).ok_or(AccessError::NotFound(id))?;
        let value = Value::decode(item.kind, payload)?;
        item.write(value)
    }
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{type_id, unit};
    use std::cell::RefCell;
    use std::rc::Rc;

    fn int_reader(v: i32) -> Option<IntRead> {
        Some(Box::new(move || Ok(IntValue::new(v))))
    }

    fn speed(registry: &mut Registry, id: SensorId) -> Result<(), RegisterError> {
        registry.register_integer(
            id,
            "Speed",
            type_id::SPEED,
            unit::SPEED_KMH,
            int_reader(1),
            None,
            0,
        )
    }

    #[test]
    fn registered_item_keeps_metadata() {
        let mut registry = Registry::with_defaults(4, 30);
        registry
            .register_float(
                7,
                "Temp",
                type_id::TEMPERATURE,
                unit::TEMPERATURE_C,
                Some(Box::new(|| Ok(FloatValue::new(21, 0)))),
                None,
                1234,
            )
            .unwrap();

        let item = registry.find(7).unwrap();
        assert_eq!(item.value_kind(), ValueKind::Float);
        assert_eq!(item.type_id(), type_id::TEMPERATURE);
        assert_eq!(item.unit(), unit::TEMPERATURE_C);
        assert_eq!(item.config().event_flags, EventFlags::empty());
        assert_eq!(item.config().time_interval_s, 30);
        assert_eq!(item.last_send_time(), 1234);
        assert_eq!(item.last_value(), &Value::Float(FloatValue::new(0, 0)));
    }

    #[test]
    fn full_table_rejects_even_duplicates() {
        let mut registry = Registry::new(2);
        speed(&mut registry, 1).unwrap();
        assert_eq!(speed(&mut registry, 1), Err(RegisterError::DuplicateId(1)));
        speed(&mut registry, 2).unwrap();
        assert_eq!(
            speed(&mut registry, 3),
            Err(RegisterError::CapacityExceeded(2))
        );
        assert_eq!(
            speed(&mut registry, 1),
            Err(RegisterError::CapacityExceeded(2))
        );
    }

    #[test]
    fn registration_validation() {
        let mut registry = Registry::new(4);
        assert_eq!(speed(&mut registry, 0), Err(RegisterError::InvalidId));
        assert_eq!(
            registry.register_integer(1, "  ", type_id::SPEED, unit::SPEED_KMH, int_reader(1), None, 0),
            Err(RegisterError::InvalidName)
        );
        assert_eq!(
            registry.register_integer(1, "Speed", type_id::SPEED, unit::SPEED_KMH, None, None, 0),
            Err(RegisterError::InvalidCallbacks)
        );
        assert!(matches!(
            registry.register_boolean(
                1,
                "Switch",
                type_id::TEMPERATURE,
                unit::TEMPERATURE_C,
                Some(Box::new(|| Ok(true))),
                None,
                0
            ),
            Err(RegisterError::InvalidSchema { .. })
        ));
        assert!(registry.is_empty());
    }

    #[test]
    fn raw_buffer_capacity_is_checked() {
        let mut registry = Registry::new(4);
        let reader = || -> Option<RawRead> { Some(Box::new(|buf: &mut [u8]| Ok(buf.len()))) };
        for capacity in [0, MAX_RAW_SIZE + 1] {
            assert_eq!(
                registry.register_raw(
                    1,
                    "Cmd",
                    Vec::new(),
                    capacity,
                    type_id::COMMAND,
                    unit::NOT_APPLICABLE,
                    reader(),
                    None,
                    0
                ),
                Err(RegisterError::InvalidBuffer(capacity))
            );
        }
        registry
            .register_raw(
                1,
                "Cmd",
                vec![1, 2],
                4,
                type_id::COMMAND,
                unit::NOT_APPLICABLE,
                reader(),
                None,
                0,
            )
            .unwrap();
        assert_eq!(
            registry.find(1).unwrap().last_value(),
            &Value::Raw(vec![1, 2, 0, 0])
        );
    }

    #[test]
    fn configure_unknown_id() {
        let mut registry = Registry::new(2);
        assert_eq!(
            registry.configure(9, EventFlags::CHANGE, 10, None, None),
            Err(ConfigError::NotFound(9))
        );
    }

    #[test]
    fn configure_is_all_or_nothing() {
        let mut registry = Registry::new(2);
        speed(&mut registry, 1).unwrap();
        registry
            .configure(
                1,
                EventFlags::CHANGE,
                5,
                Some(FloatValue::new(1, 0)),
                Some(FloatValue::new(9, 0)),
            )
            .unwrap();

        let bad = registry.configure(
            1,
            EventFlags::LOWER_THRESHOLD | EventFlags::UPPER_THRESHOLD,
            60,
            Some(FloatValue::new(20, 0)),
            Some(FloatValue::new(10, 0)),
        );
        assert_eq!(bad, Err(ConfigError::InvalidLimits));

        let config = registry.find(1).unwrap().config();
        assert_eq!(config.event_flags, EventFlags::CHANGE);
        assert_eq!(config.time_interval_s, 5);
        assert_eq!(config.lower_limit, FloatValue::new(1, 0));

        registry
            .configure(1, EventFlags::TIME | EventFlags::UNREGISTERED, 7, None, None)
            .unwrap();
        let config = registry.find(1).unwrap().config();
        assert_eq!(config.event_flags, EventFlags::TIME);
        assert_eq!(config.upper_limit, FloatValue::new(9, 0));
    }

    #[test]
    fn write_value_decodes_by_kind() {
        let state = Rc::new(RefCell::new(false));
        let sink = Rc::clone(&state);
        let mut registry = Registry::new(2);
        registry
            .register_boolean(
                4,
                "Lamp",
                type_id::SWITCH,
                unit::NOT_APPLICABLE,
                None,
                Some(Box::new(move |on| {
                    *sink.borrow_mut() = on;
                    Ok(())
                })),
                0,
            )
            .unwrap();

        registry.write_value(4, &[1]).unwrap();
        assert!(*state.borrow());

        let err = registry.write_value(4, &[1, 2]).unwrap_err();
        assert_eq!(err.result_code(), result::INVALID_DATA);
        let err = registry.read_value(4).unwrap_err();
        assert!(matches!(err, AccessError::NotReadable(4)));
        let err = registry.write_value(5, &[1]).unwrap_err();
        assert_eq!(err.result_code(), result::INVALID_DEVICE);
    }

    #[test]
    fn last_slot_tracks_table_position() {
        let mut registry = Registry::new(4);
        assert_eq!(registry.last_slot(), None);
        speed(&mut registry, 40).unwrap();
        speed(&mut registry, 3).unwrap();
        assert_eq!(registry.last_slot(), Some(1));
        assert_eq!(registry.sensor_id_at(1), Some(3));
        assert_eq!(registry.len(), 2);
        registry.clear();
        assert!(registry.is_empty());
    }
}
