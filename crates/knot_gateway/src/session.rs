//! Lado gateway do protocolo: emite credenciais, aceita o schema e
//! confirma os dados recebidos de um thing.

use std::collections::HashMap;

use knot_core::protocol::{Message, TOKEN_LEN, result};
use knot_core::schema::SchemaRecord;
use knot_core::types::{SensorId, Value};
use rand::Rng;
use tracing::{debug, info, warn};

/// Evento observado na sessão, repassado ao loop principal.
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayEvent {
    Connected(String),
    Disconnected,
    Registered {
        device_id: u64,
        name: String,
        uuid: String,
    },
    Authenticated {
        uuid: String,
        accepted: bool,
    },
    SchemaComplete(Vec<SchemaRecord>),
    Data {
        sensor_id: SensorId,
        name: Option<String>,
        value: Option<Value>,
    },
    /// DATA_RESP do thing: falha ao atender um GET_DATA.
    DataResult {
        sensor_id: SensorId,
        result: i8,
    },
}

/// Resultado de tratar uma mensagem do thing.
#[derive(Debug, Default)]
pub struct Reaction {
    pub replies: Vec<Message>,
    pub event: Option<GatewayEvent>,
}

impl Reaction {
    fn reply(msg: Message) -> Self {
        Self {
            replies: vec![msg],
            event: None,
        }
    }

    fn with_event(mut self, event: GatewayEvent) -> Self {
        self.event = Some(event);
        self
    }
}

/// Estado de uma conexão com um thing.
pub struct Session<R: Rng> {
    rng: R,
    reject_auth: bool,
    /// uuid → token emitidos
    issued: HashMap<String, String>,
    /// Schema em recebimento
    pending: Vec<SchemaRecord>,
    /// Último schema completo
    schema: Vec<SchemaRecord>,
}

impl<R: Rng> Session<R> {
    pub fn new(rng: R, reject_auth: bool) -> Self {
        Self {
            rng,
            reject_auth,
            issued: HashMap::new(),
            pending: Vec::new(),
            schema: Vec::new(),
        }
    }

    /// Trata uma mensagem e devolve as respostas a enviar.
    pub fn handle(&mut self, msg: Message) -> Reaction {
        match msg {
            Message::RegisterReq { device_id, name } => {
                let uuid = uuid::Uuid::new_v4().to_string();
                let token = self.new_token();
                info!("Registrando \"{name}\" ({device_id:016X}) como {uuid}");
                self.issued.insert(uuid.clone(), token.clone());
                self.pending.clear();
                Reaction::reply(Message::RegisterResp {
                    result: result::SUCCESS,
                    uuid: uuid.clone(),
                    token,
                })
                .with_event(GatewayEvent::Registered {
                    device_id,
                    name,
                    uuid,
                })
            }

            Message::AuthReq { uuid, token } => {
                let known = self.issued.get(&uuid).is_some_and(|t| *t == token);
                if !known {
                    debug!("Credenciais de {uuid} não foram emitidas por esta sessão");
                }
                let accepted = !self.reject_auth;
                let code = if accepted {
                    self.issued.insert(uuid.clone(), token);
                    result::SUCCESS
                } else {
                    warn!("Autenticação de {uuid} recusada");
                    result::CREDENTIAL_UNAUTHORIZED
                };
                self.pending.clear();
                Reaction::reply(Message::AuthResp { result: code })
                    .with_event(GatewayEvent::Authenticated { uuid, accepted })
            }

            Message::Schema { record, end } => {
                debug!("Schema do sensor {} (fim: {end})", record.sensor_id);
                self.pending.retain(|r| r.sensor_id != record.sensor_id);
                self.pending.push(record);

                let mut reaction = Reaction::reply(Message::SchemaResp {
                    result: result::SUCCESS,
                    end,
                });
                if end {
                    self.schema = std::mem::take(&mut self.pending);
                    // Pede o valor atual de cada item assim que o thing ficar online
                    reaction.replies.extend(
                        self.schema
                            .iter()
                            .map(|r| Message::GetData { sensor_id: r.sensor_id }),
                    );
                    reaction.event = Some(GatewayEvent::SchemaComplete(self.schema.clone()));
                }
                reaction
            }

            Message::Data { sensor_id, payload } => {
                let record = self.schema.iter().find(|r| r.sensor_id == sensor_id);
                let value = record.and_then(|r| match Value::decode(r.value_kind, &payload) {
                    Ok(value) => Some(value),
                    Err(e) => {
                        warn!("Valor do sensor {sensor_id} inválido: {e}");
                        None
                    }
                });
                Reaction::reply(Message::DataResp {
                    sensor_id,
                    result: result::SUCCESS,
                })
                .with_event(GatewayEvent::Data {
                    sensor_id,
                    name: record.map(|r| r.name.clone()),
                    value,
                })
            }

            Message::DataResp { sensor_id, result } => Reaction::default()
                .with_event(GatewayEvent::DataResult { sensor_id, result }),

            other => {
                debug!("Mensagem ignorada: {:?}", other.message_type());
                Reaction::default()
            }
        }
    }

    fn new_token(&mut self) -> String {
        const HEX: &[u8; 16] = b"0123456789abcdef";
        (0..TOKEN_LEN)
            .map(|_| char::from(HEX[self.rng.gen_range(0..16)]))
            .collect()
    }
}
