//! Máquina de estados da conexão com o gateway.
//!
//! [`Thing`] é dona do registro e dos drivers. Cada chamada a [`Thing::run`]
//! executa um passo: no máximo uma leitura e uma escrita não bloqueantes.
//!
//! ```text
//! Disconnected → Accepting → Connected ─┬→ Authenticating ─┬→ Online → Running
//!                                       └→ Registering → Schema ⇄ SchemaResp ┘
//! ```
//!
//! Falhas de I/O levam a `Error`, que volta a `Disconnected` após uma pausa.

use bytes::BytesMut;
use rand::SeedableRng;
use rand::rngs::StdRng;
use tracing::{debug, error, info, warn};

use crate::config::{AppConfig, ProtocolConfig};
use crate::dispatcher::{Action, dispatch};
use crate::events::EventEvaluator;
use crate::hal::{
    Board, DeviceAddress, LinkEvent, Storage, StorageError, StorageKey, Transport, TransportError,
    is_uuid, timeout_expired,
};
use crate::led::{BlinkPattern, HaltReason, StatusLed};
use crate::protocol::{MAX_MESSAGE_SIZE, Message, decode_message, encode_message, result};
use crate::registry::{
    BoolRead, BoolWrite, ConfigError, FloatRead, FloatWrite, IntRead, IntWrite, RawRead, RawWrite,
    RegisterError, Registry,
};
use crate::types::{EventFlags, Limit, SensorId, Value};

/// Estados da conexão, na ordem do protocolo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum State {
    Disconnected,
    Accepting,
    Connected,
    Authenticating,
    Registering,
    Schema,
    SchemaResp,
    Online,
    Running,
    Error,
}

/// Resultado de um passo de [`Thing::run`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Stepped(State),
    Halted(HaltReason),
    /// `init` não foi chamado ou `shutdown` encerrou o agente.
    Stopped,
}

#[derive(Debug, thiserror::Error)]
pub enum InitError {
    #[error("Nome do dispositivo vazio")]
    InvalidName,

    #[error("Falha ao iniciar o transporte: {0}")]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Agente KNoT: registro de itens + máquina de estados.
pub struct Thing<T: Transport, S: Storage, B: Board> {
    transport: T,
    storage: S,
    board: B,
    registry: Registry,
    evaluator: EventEvaluator,
    led: StatusLed,
    timing: ProtocolConfig,
    reset_hold_ms: u32,
    rng: StdRng,
    name: String,
    address: DeviceAddress,
    state: State,
    conn: Option<T::Conn>,
    running: bool,
    halt: Option<HaltReason>,
    last_timeout: u32,
    unregister_since: Option<u32>,
    clear_since: Option<u32>,
    error_since: Option<u32>,
    schema_cursor: usize,
    online_cursor: usize,
    rx: Vec<u8>,
}

impl<T: Transport, S: Storage, B: Board> Thing<T, S, B> {
    pub fn new(transport: T, storage: S, board: B, config: &AppConfig) -> Self {
        Self {
            transport,
            storage,
            board,
            registry: Registry::with_defaults(
                config.registry.capacity,
                config.registry.default_time_interval_s,
            ),
            evaluator: EventEvaluator::new(),
            led: StatusLed::new(config.led.clone()),
            timing: config.protocol.clone(),
            reset_hold_ms: config.reset.hold_ms,
            rng: StdRng::from_entropy(),
            name: String::new(),
            address: DeviceAddress(0),
            state: State::Disconnected,
            conn: None,
            running: false,
            halt: None,
            last_timeout: 0,
            unregister_since: None,
            clear_since: None,
            error_since: None,
            schema_cursor: 0,
            online_cursor: 0,
            rx: vec![0; MAX_MESSAGE_SIZE],
        }
    }

    // ── Ciclo de vida ─────────────────────────

    /// Carrega (ou gera) o endereço e inicia o transporte.
    pub fn init(&mut self, name: &str) -> Result<(), InitError> {
        if name.trim().is_empty() {
            return Err(InitError::InvalidName);
        }
        self.name = name.to_string();

        let stored = self
            .storage
            .read(StorageKey::Address)?
            .and_then(|bytes| DeviceAddress::from_bytes(&bytes));
        self.address = match stored {
            Some(addr) if addr.is_valid() => addr,
            _ => {
                // Endereço ausente ou inválido invalida também as credenciais
                self.storage.reset()?;
                let addr = DeviceAddress::generate(&mut self.rng);
                self.storage.write(StorageKey::Address, &addr.to_bytes())?;
                info!("Novo endereço gerado: {addr}");
                addr
            }
        };

        self.transport.init(self.address, &self.name)?;

        self.state = State::Disconnected;
        self.running = true;
        self.halt = None;
        self.last_timeout = 0;
        self.clear_since = None;
        info!("Thing \"{}\" iniciado com endereço {}", self.name, self.address);
        Ok(())
    }

    /// Fecha a conexão e para o agente.
    pub fn shutdown(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.transport.close(conn);
        }
        self.transport.deinit();
        self.running = false;
        info!("Thing encerrado");
    }

    /// Executa um passo da máquina de estados.
    pub fn run(&mut self) -> RunOutcome {
        let now = self.board.now_ms();

        if self.check_factory_reset(now) {
            return RunOutcome::Stepped(self.state);
        }
        if let Some(reason) = self.halt {
            self.board.set_status_led(reason.level(now));
            return RunOutcome::Halted(reason);
        }
        if !self.running {
            return RunOutcome::Stopped;
        }

        if self.state >= State::Connected
            && self.transport.read_event() == Some(LinkEvent::Disconnected)
        {
            warn!("Gateway desconectado");
            self.state = State::Disconnected;
        }

        if let Some(since) = self.unregister_since {
            if timeout_expired(now, since, self.timing.unregister_timeout_ms) {
                info!("Removido pelo gateway");
                self.wipe();
                return RunOutcome::Stepped(self.state);
            }
        }

        let next = self.step(now);
        if next != self.state {
            info!("{:?} → {:?}", self.state, next);
            if next == State::Online {
                self.online_cursor = 0;
            }
            self.state = next;
        }

        match self.halt {
            Some(reason) => RunOutcome::Halted(reason),
            None => RunOutcome::Stepped(self.state),
        }
    }

    // ── API da aplicação ──────────────────────

    pub fn register_integer(
        &mut self,
        id: SensorId,
        name: &str,
        type_id: u16,
        unit: u8,
        read: Option<IntRead>,
        write: Option<IntWrite>,
    ) -> Result<(), RegisterError> {
        let now = self.board.now_ms();
        self.registry
            .register_integer(id, name, type_id, unit, read, write, now)
    }

    pub fn register_float(
        &mut self,
        id: SensorId,
        name: &str,
        type_id: u16,
        unit: u8,
        read: Option<FloatRead>,
        write: Option<FloatWrite>,
    ) -> Result<(), RegisterError> {
        let now = self.board.now_ms();
        self.registry
            .register_float(id, name, type_id, unit, read, write, now)
    }

    pub fn register_boolean(
        &mut self,
        id: SensorId,
        name: &str,
        type_id: u16,
        unit: u8,
        read: Option<BoolRead>,
        write: Option<BoolWrite>,
    ) -> Result<(), RegisterError> {
        let now = self.board.now_ms();
        self.registry
            .register_boolean(id, name, type_id, unit, read, write, now)
    }

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
    ) -> Result<(), RegisterError> {
        let now = self.board.now_ms();
        self.registry.register_raw(
            id, name, buffer, capacity, type_id, unit, read, write, now,
        )
    }

    pub fn configure(
        &mut self,
        id: SensorId,
        flags: EventFlags,
        time_interval_s: u16,
        lower: Option<Limit>,
        upper: Option<Limit>,
    ) -> Result<(), ConfigError> {
        self.registry
            .configure(id, flags, time_interval_s, lower, upper)
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn address(&self) -> DeviceAddress {
        self.address
    }

    pub fn halt_reason(&self) -> Option<HaltReason> {
        self.halt
    }

    // ── Estados ───────────────────────────────

    fn step(&mut self, now: u32) -> State {
        match self.state {
            State::Disconnected => self.on_disconnected(now),
            State::Accepting => self.on_accepting(now),
            State::Connected => self.on_connected(now),
            State::Authenticating => self.on_authenticating(now),
            State::Registering => self.on_registering(now),
            State::Schema => self.on_schema(now),
            State::SchemaResp => self.on_schema_resp(now),
            State::Online => self.on_online(now),
            State::Running => self.on_running(now),
            State::Error => self.on_error(now),
        }
    }

    fn on_disconnected(&mut self, now: u32) -> State {
        self.blink(BlinkPattern::Disconnected, now);
        if let Some(conn) = self.conn.take() {
            self.transport.close(conn);
        }
        // Nova sessão: nada da anterior sobrevive
        self.error_since = None;
        self.online_cursor = 0;
        match self.transport.listen() {
            Ok(()) => State::Accepting,
            Err(e) => {
                error!("Falha ao escutar: {e}");
                State::Disconnected
            }
        }
    }

    fn on_accepting(&mut self, now: u32) -> State {
        self.blink(BlinkPattern::Disconnected, now);
        match self.transport.accept() {
            Ok(conn) => {
                self.conn = Some(conn);
                State::Connected
            }
            Err(TransportError::WouldBlock) => State::Accepting,
            Err(e) => {
                error!("Falha ao aceitar conexão: {e}");
                State::Disconnected
            }
        }
    }

    fn on_connected(&mut self, now: u32) -> State {
        self.blink(BlinkPattern::Establishing, now);
        let (msg, next) = match self.credentials() {
            Some((uuid, token)) => (Message::AuthReq { uuid, token }, State::Authenticating),
            None => (
                Message::RegisterReq {
                    device_id: self.address.0,
                    name: self.name.clone(),
                },
                State::Registering,
            ),
        };
        self.last_timeout = now;
        match self.send(&msg) {
            Ok(()) => next,
            Err(_) => State::Error,
        }
    }

    fn on_authenticating(&mut self, now: u32) -> State {
        self.blink(BlinkPattern::Establishing, now);
        match self.receive() {
            Err(_) => State::Error,
            Ok(Some(Message::AuthResp { result })) if result == result::SUCCESS => {
                self.schema_cursor = 0;
                if self.schema_sent() {
                    State::Online
                } else {
                    State::Schema
                }
            }
            Ok(Some(Message::AuthResp { result })) => {
                error!("Autenticação recusada (resultado {result})");
                self.halt = Some(HaltReason::Auth);
                State::Authenticating
            }
            Ok(Some(Message::UnregisterReq)) => self.answer_unregister(now, State::Authenticating),
            Ok(other) => {
                if let Some(msg) = other {
                    debug!("Ignorado durante autenticação: {:?}", msg.message_type());
                }
                self.retry_after_timeout(now, State::Authenticating, State::Connected)
            }
        }
    }

    fn on_registering(&mut self, now: u32) -> State {
        self.blink(BlinkPattern::Establishing, now);
        match self.receive() {
            Err(_) => State::Error,
            Ok(Some(Message::RegisterResp {
                result,
                uuid,
                token,
            })) => {
                if result != result::SUCCESS || !is_uuid(&uuid) {
                    warn!("Registro recusado (resultado {result})");
                    return State::Error;
                }
                if let Err(e) = self.store_credentials(&uuid, &token) {
                    error!("Falha ao salvar credenciais: {e}");
                    return State::Error;
                }
                info!("Registrado como {uuid}");
                self.schema_cursor = 0;
                State::Schema
            }
            Ok(Some(Message::UnregisterReq)) => self.answer_unregister(now, State::Registering),
            Ok(other) => {
                if let Some(msg) = other {
                    debug!("Ignorado durante registro: {:?}", msg.message_type());
                }
                self.retry_after_timeout(now, State::Registering, State::Connected)
            }
        }
    }

    fn on_schema(&mut self, now: u32) -> State {
        self.blink(BlinkPattern::Establishing, now);
        if self.registry.is_empty() {
            info!("Nenhum item registrado; schema vazio");
            return State::Online;
        }
        if self.schema_cursor >= self.registry.capacity() {
            self.schema_cursor = 0;
        }
        match self.registry.schema_at(self.schema_cursor) {
            Ok(entry) => {
                debug!(
                    "Enviando schema do sensor {} (fim: {})",
                    entry.record.sensor_id, entry.end
                );
                let msg = Message::Schema {
                    record: entry.record,
                    end: entry.end,
                };
                match self.send(&msg) {
                    Ok(()) => {
                        self.last_timeout = now;
                        State::SchemaResp
                    }
                    Err(_) => State::Error,
                }
            }
            Err(_) => {
                self.schema_cursor += 1;
                State::Schema
            }
        }
    }

    fn on_schema_resp(&mut self, now: u32) -> State {
        self.blink(BlinkPattern::Establishing, now);
        match self.receive() {
            Err(_) => State::Error,
            Ok(Some(Message::UnregisterReq)) => self.answer_unregister(now, State::SchemaResp),
            Ok(Some(Message::SchemaResp { result, end })) => {
                if result != result::SUCCESS {
                    warn!("Schema recusado (resultado {result}); reenviando");
                    State::Schema
                } else if !end {
                    self.schema_cursor += 1;
                    State::Schema
                } else {
                    if let Err(e) = self.storage.write(StorageKey::SchemaFlag, &[1]) {
                        error!("Falha ao salvar flag de schema: {e}");
                        return State::Error;
                    }
                    self.schema_cursor = 0;
                    State::Online
                }
            }
            Ok(Some(_)) => State::SchemaResp,
            Ok(None) => self.retry_after_timeout(now, State::SchemaResp, State::Schema),
        }
    }

    fn on_online(&mut self, now: u32) -> State {
        self.blink(BlinkPattern::Online, now);
        if let Some(next) = self.serve_inbound(now) {
            return next;
        }

        if let Some(id) = self.registry.sensor_id_at(self.online_cursor) {
            match self.registry.read_value(id) {
                Ok(value) => {
                    if self.send_data(id, &value).is_err() {
                        return State::Error;
                    }
                }
                Err(e) => warn!("Leitura inicial do sensor {id} falhou: {e}"),
            }
        }

        self.online_cursor += 1;
        let done = self
            .registry
            .last_slot()
            .is_none_or(|last| self.online_cursor > last);
        if done {
            self.online_cursor = 0;
            self.evaluator.reset();
            State::Running
        } else {
            State::Online
        }
    }

    fn on_running(&mut self, now: u32) -> State {
        self.blink(BlinkPattern::Online, now);
        if let Some(next) = self.serve_inbound(now) {
            return next;
        }

        if let Some(event) = self.evaluator.poll_next(&mut self.registry, now) {
            debug!("Sensor {} mudou: {:?}", event.id, event.events);
            if self.send_data(event.id, &event.value).is_err() {
                return State::Error;
            }
        }
        State::Running
    }

    fn on_error(&mut self, now: u32) -> State {
        self.board.set_status_led(true);
        let since = *self.error_since.get_or_insert(now);
        if timeout_expired(now, since, self.timing.error_backoff_ms) {
            self.error_since = None;
            State::Disconnected
        } else {
            State::Error
        }
    }

    // ── Auxiliares ────────────────────────────

    /// Trata uma mensagem recebida em Online/Running. `Some` força transição.
    fn serve_inbound(&mut self, now: u32) -> Option<State> {
        let msg = match self.receive() {
            Ok(Some(msg)) => msg,
            Ok(None) => return None,
            Err(_) => return Some(State::Error),
        };

        let outcome = dispatch(&mut self.registry, msg);
        if let Some(reply) = outcome.reply {
            if self.send(&reply).is_err() {
                return Some(State::Error);
            }
        }
        match outcome.action {
            Action::None => None,
            Action::Fault => Some(State::Error),
            Action::Unregister => {
                self.unregister_since = Some(now);
                None
            }
        }
    }

    fn answer_unregister(&mut self, now: u32, stay: State) -> State {
        match self.send(&Message::UnregisterResp) {
            Ok(()) => {
                self.unregister_since = Some(now);
                stay
            }
            Err(_) => State::Error,
        }
    }

    fn retry_after_timeout(&mut self, now: u32, stay: State, retry: State) -> State {
        if timeout_expired(now, self.last_timeout, self.timing.retransmission_timeout_ms) {
            debug!("Sem resposta em {:?}; retransmitindo", stay);
            retry
        } else {
            stay
        }
    }

    fn send_data(&mut self, sensor_id: SensorId, value: &Value) -> Result<(), TransportError> {
        let mut payload = BytesMut::with_capacity(value.wire_len());
        value.encode(&mut payload);
        self.send(&Message::Data {
            sensor_id,
            payload: payload.to_vec(),
        })
    }

    fn send(&mut self, msg: &Message) -> Result<(), TransportError> {
        let frame = encode_message(msg).map_err(|e| {
            error!("Falha ao codificar {:?}: {e}", msg.message_type());
            TransportError::Io(e.to_string())
        })?;
        let conn = self.conn.as_mut().ok_or(TransportError::Closed)?;
        match self.transport.write(conn, &frame) {
            Ok(_) => Ok(()),
            Err(e) => {
                error!("Falha ao enviar {:?}: {e}", msg.message_type());
                Err(e)
            }
        }
    }

    /// Lê no máximo uma mensagem. Frames inválidos são descartados.
    fn receive(&mut self) -> Result<Option<Message>, TransportError> {
        let Some(conn) = self.conn.as_mut() else {
            return Err(TransportError::Closed);
        };
        let n = match self.transport.read(conn, &mut self.rx) {
            Ok(n) => n,
            Err(TransportError::WouldBlock) => return Ok(None),
            Err(e) => {
                error!("Falha ao ler: {e}");
                return Err(e);
            }
        };
        match decode_message(&self.rx[..n]) {
            Ok(msg) => Ok(Some(msg)),
            Err(e) => {
                warn!("Frame descartado: {e}");
                Ok(None)
            }
        }
    }

    fn blink(&mut self, pattern: BlinkPattern, now: u32) {
        if let Some(level) = self.led.update(pattern, now) {
            self.board.set_status_led(level);
        }
    }

    /// UUID e token salvos, se o UUID for válido.
    fn credentials(&mut self) -> Option<(String, String)> {
        let read = |storage: &mut S, key| match storage.read(key) {
            Ok(Some(bytes)) => String::from_utf8(bytes).ok(),
            Ok(None) => None,
            Err(e) => {
                warn!("Falha ao ler {key:?}: {e}");
                None
            }
        };
        let uuid = read(&mut self.storage, StorageKey::Uuid)?;
        let token = read(&mut self.storage, StorageKey::Token)?;
        is_uuid(&uuid).then_some((uuid, token))
    }

    fn store_credentials(&mut self, uuid: &str, token: &str) -> Result<(), StorageError> {
        self.storage.write(StorageKey::Uuid, uuid.as_bytes())?;
        self.storage.write(StorageKey::Token, token.as_bytes())?;
        Ok(())
    }

    fn schema_sent(&mut self) -> bool {
        matches!(self.storage.read(StorageKey::SchemaFlag), Ok(Some(v)) if v.first() == Some(&1))
    }

    /// Botão de reset pressionado por tempo suficiente apaga tudo.
    fn check_factory_reset(&mut self, now: u32) -> bool {
        if !self.board.reset_button_pressed() {
            self.clear_since = None;
            return false;
        }
        let since = *self.clear_since.get_or_insert(now);
        if !timeout_expired(now, since, self.reset_hold_ms) {
            return false;
        }
        info!("Reset de fábrica");
        self.wipe();
        true
    }

    /// Apaga credenciais, gera novo endereço e reinicia o transporte.
    fn wipe(&mut self) {
        if let Err(e) = self.storage.reset() {
            error!("Falha ao apagar armazenamento: {e}");
        }
        self.address = DeviceAddress::generate(&mut self.rng);
        if let Err(e) = self.storage.write(StorageKey::Address, &self.address.to_bytes()) {
            error!("Falha ao salvar endereço: {e}");
        }

        if let Some(conn) = self.conn.take() {
            self.transport.close(conn);
        }
        self.transport.deinit();
        self.halt = match self.transport.init(self.address, &self.name) {
            Ok(()) => None,
            Err(e) => {
                error!("Falha ao reiniciar transporte: {e}");
                Some(HaltReason::Comm)
            }
        };

        self.state = State::Disconnected;
        self.unregister_since = None;
        self.clear_since = None;
        self.error_since = None;
        self.schema_cursor = 0;
        self.online_cursor = 0;
        self.evaluator.reset();
        self.led.reset();
        info!("Novo endereço: {}", self.address);
    }
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────
