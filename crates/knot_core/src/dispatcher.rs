//! Tratamento das mensagens recebidas enquanto o dispositivo está online.

use bytes::BytesMut;
use tracing::{debug, warn};

use crate::protocol::{Message, result};
use crate::registry::Registry;

/// Efeito de uma mensagem sobre a máquina de estados.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    None,
    /// Gateway rejeitou um DATA: reconectar.
    Fault,
    /// UNREGISTER_RESP enviado: armar o timer de remoção.
    Unregister,
}

/// Resposta a enviar (se houver) e ação resultante.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchOutcome {
    pub reply: Option<Message>,
    pub action: Action,
}

impl DispatchOutcome {
    fn reply(msg: Message) -> Self {
        Self {
            reply: Some(msg),
            action: Action::None,
        }
    }

    fn nothing() -> Self {
        Self {
            reply: None,
            action: Action::None,
        }
    }
}

/// Aplica uma mensagem recebida ao registro.
pub fn dispatch(registry: &mut Registry, msg: Message) -> DispatchOutcome {
    match msg {
        Message::SetConfig { sensor_id, config } => {
            match registry.configure(
                sensor_id,
                config.event_flags,
                config.time_interval_s,
                Some(config.lower_limit),
                Some(config.upper_limit),
            ) {
                Ok(()) => DispatchOutcome::reply(Message::ConfigResp { sensor_id }),
                Err(e) => {
                    warn!("SET_CONFIG para sensor {sensor_id} rejeitado: {e}");
                    DispatchOutcome::nothing()
                }
            }
        }
        Message::SetData { sensor_id, payload } => {
            let result = match registry.write_value(sensor_id, &payload) {
                Ok(()) => result::SUCCESS,
                Err(e) => {
                    warn!("SET_DATA para sensor {sensor_id} falhou: {e}");
                    e.result_code()
                }
            };
            DispatchOutcome::reply(Message::DataResp { sensor_id, result })
        }
        Message::GetData { sensor_id } => match registry.read_value(sensor_id) {
            Ok(value) => {
                let mut payload = BytesMut::with_capacity(value.wire_len());
                value.encode(&mut payload);
                DispatchOutcome::reply(Message::Data {
                    sensor_id,
                    payload: payload.to_vec(),
                })
            }
            Err(e) => {
                warn!("GET_DATA para sensor {sensor_id} falhou: {e}");
                DispatchOutcome::reply(Message::DataResp {
                    sensor_id,
                    result: e.result_code(),
                })
            }
        },
        Message::DataResp { sensor_id, result } => {
            if result == result::SUCCESS {
                debug!("DATA do sensor {sensor_id} confirmado");
                DispatchOutcome::nothing()
            } else {
                warn!("Gateway rejeitou DATA do sensor {sensor_id} (resultado {result})");
                DispatchOutcome {
                    reply: None,
                    action: Action::Fault,
                }
            }
        }
        Message::UnregisterReq => DispatchOutcome {
            reply: Some(Message::UnregisterResp),
            action: Action::Unregister,
        },
        other => {
            debug!("Mensagem ignorada: {:?}", other.message_type());
            DispatchOutcome::nothing()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ItemConfig;
    use crate::types::{EventFlags, FloatValue, IntValue, type_id, unit};
    use std::cell::Cell;
    use std::rc::Rc;

    fn registry_with_counter(store: Rc<Cell<i32>>) -> Registry {
        let reader = Rc::clone(&store);
        let mut registry = Registry::new(4);
        registry
            .register_integer(
                3,
                "Counter",
                type_id::ANALOG,
                unit::NOT_APPLICABLE,
                Some(Box::new(move || Ok(IntValue::new(reader.get())))),
                Some(Box::new(move |v| {
                    store.set(v.value);
                    Ok(())
                })),
                0,
            )
            .unwrap();
        registry
    }

    #[test]
    fn set_config_replies_config_resp() {
        let mut registry = registry_with_counter(Rc::new(Cell::new(0)));
        let config = ItemConfig {
            event_flags: EventFlags::CHANGE,
            time_interval_s: 10,
            lower_limit: FloatValue::new(0, 0),
            upper_limit: FloatValue::new(100, 0),
        };
        let outcome = dispatch(&mut registry, Message::SetConfig { sensor_id: 3, config });
        assert_eq!(outcome.reply, Some(Message::ConfigResp { sensor_id: 3 }));
        assert_eq!(registry.find(3).unwrap().config(), &config);
    }

    #[test]
    fn set_config_failure_is_silent() {
        let mut registry = registry_with_counter(Rc::new(Cell::new(0)));
        let config = ItemConfig {
            lower_limit: FloatValue::new(9, 0),
            upper_limit: FloatValue::new(1, 0),
            ..ItemConfig::default()
        };
        let outcome = dispatch(&mut registry, Message::SetConfig { sensor_id: 3, config });
        assert_eq!(outcome.reply, None);
        assert_eq!(outcome.action, Action::None);

        let outcome = dispatch(
            &mut registry,
            Message::SetConfig {
                sensor_id: 42,
                config: ItemConfig::default(),
            },
        );
        assert_eq!(outcome.reply, None);
    }

    #[test]
    fn set_then_get_data() {
        let store = Rc::new(Cell::new(0));
        let mut registry = registry_with_counter(Rc::clone(&store));

        let outcome = dispatch(
            &mut registry,
            Message::SetData {
                sensor_id: 3,
                payload: vec![1, 0, 0, 0, 42, 0, 0, 0],
            },
        );
        assert_eq!(
            outcome.reply,
            Some(Message::DataResp {
                sensor_id: 3,
                result: result::SUCCESS
            })
        );
        assert_eq!(store.get(), 42);

        let outcome = dispatch(&mut registry, Message::GetData { sensor_id: 3 });
        assert_eq!(
            outcome.reply,
            Some(Message::Data {
                sensor_id: 3,
                payload: vec![1, 0, 0, 0, 42, 0, 0, 0]
            })
        );
    }

    #[test]
    fn unknown_sensor_gets_error_result() {
        let mut registry = registry_with_counter(Rc::new(Cell::new(0)));
        let outcome = dispatch(&mut registry, Message::GetData { sensor_id: 8 });
        assert_eq!(
            outcome.reply,
            Some(Message::DataResp {
                sensor_id: 8,
                result: result::INVALID_DEVICE
            })
        );

        let outcome = dispatch(
            &mut registry,
            Message::SetData {
                sensor_id: 3,
                payload: vec![1],
            },
        );
        assert_eq!(
            outcome.reply,
            Some(Message::DataResp {
                sensor_id: 3,
                result: result::INVALID_DATA
            })
        );
    }

    #[test]
    fn negative_data_resp_is_a_fault() {
        let mut registry = Registry::new(1);
        let ok = dispatch(
            &mut registry,
            Message::DataResp {
                sensor_id: 1,
                result: result::SUCCESS,
            },
        );
        assert_eq!(ok.action, Action::None);
        let bad = dispatch(
            &mut registry,
            Message::DataResp {
                sensor_id: 1,
                result: result::ERROR_UNKNOWN,
            },
        );
        assert_eq!(bad.action, Action::Fault);
    }

    #[test]
    fn unregister_and_unexpected_messages() {
        let mut registry = Registry::new(1);
        let outcome = dispatch(&mut registry, Message::UnregisterReq);
        assert_eq!(outcome.reply, Some(Message::UnregisterResp));
        assert_eq!(outcome.action, Action::Unregister);

        let outcome = dispatch(&mut registry, Message::AuthResp { result: 0 });
        assert_eq!(outcome, DispatchOutcome::nothing());
    }
}
