//! # KNoT Core
//!
//! Biblioteca do agente KNoT ("thing"): registro de sensores e atuadores,
//! avaliação de eventos, protocolo binário com o gateway e a máquina de
//! estados que conduz registro, autenticação, schema e operação online.
//!
//! ## Módulos
//! - [`types`] – Tipos de valor, flags de evento, `type_id` e unidades
//! - [`protocol`] – Encode/decode binário das mensagens
//! - [`registry`] – Tabela de itens e callbacks
//! - [`schema`] – Registro de schema enviado ao gateway
//! - [`events`] – Detecção de mudança, thresholds e evento periódico
//! - [`dispatcher`] – Mensagens recebidas enquanto online
//! - [`thing`] – Máquina de estados da conexão
//! - [`hal`] – Traits de transporte, armazenamento e placa
//! - [`led`] – Padrões do LED de status
//! - [`config`] – Configuração unificada via TOML

pub mod types;
pub mod protocol;
pub mod registry;
pub mod schema;
pub mod events;
pub mod dispatcher;
pub mod thing;
pub mod hal;
pub mod led;
pub mod config;

// Re-exports convenientes
pub use config::AppConfig;
pub use protocol::{Message, decode_message, encode_message};
pub use registry::{CallbackError, Registry};
pub use thing::{RunOutcome, State, Thing};
pub use types::{EventFlags, FloatValue, IntValue, Value, ValueKind};
