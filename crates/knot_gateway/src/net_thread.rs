//! Thread de rede que conversa com o thing via TCP e envia os eventos da
//! sessão para o loop principal via channel.

use std::io::{ErrorKind, Read, Write};
use std::net::TcpStream;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, bounded};
use knot_core::protocol::{decode_message, encode_message, take_frame};
use rand::SeedableRng;
use rand::rngs::StdRng;
use tracing::{debug, error, info, warn};

use crate::session::{GatewayEvent, Session};

/// Inicia a thread de rede. Retorna o receiver do channel.
pub fn spawn_gateway_thread(
    thing_addr: String,
    reconnect: Duration,
    reject_auth: bool,
) -> Receiver<GatewayEvent> {
    let (tx, rx) = bounded::<GatewayEvent>(64); // Buffer de 64 eventos

    std::thread::Builder::new()
        .name("knot-gateway".into())
        .spawn(move || {
            gateway_loop(&tx, &thing_addr, reconnect, reject_auth);
        })
        .expect("Falha ao criar thread de rede");

    rx
}

fn gateway_loop(tx: &Sender<GatewayEvent>, thing_addr: &str, reconnect: Duration, reject_auth: bool) {
    let mut session = Session::new(StdRng::from_entropy(), reject_auth);
    loop {
        match TcpStream::connect(thing_addr) {
            Ok(stream) => {
                info!("Conectado ao thing em {thing_addr}");
                forward(tx, GatewayEvent::Connected(thing_addr.to_string()));
                if let Err(e) = serve(tx, stream, &mut session) {
                    warn!("Conexão com {thing_addr} perdida: {e}");
                }
                forward(tx, GatewayEvent::Disconnected);
            }
            Err(e) => {
                error!(
                    "Falha ao conectar em {thing_addr}: {e}. Tentando novamente em {:.0}s...",
                    reconnect.as_secs_f64()
                );
            }
        }
        std::thread::sleep(reconnect);
    }
}

/// Atende uma conexão até o thing fechar ou ocorrer erro de I/O.
fn serve(
    tx: &Sender<GatewayEvent>,
    mut stream: TcpStream,
    session: &mut Session<StdRng>,
) -> std::io::Result<()> {
    stream.set_read_timeout(Some(Duration::from_secs(1)))?;
    stream.set_nodelay(true).ok();

    let mut pending = Vec::new();
    let mut chunk = [0u8; 256];
    loop {
        match stream.read(&mut chunk) {
            Ok(0) => {
                info!("Thing fechou a conexão");
                return Ok(());
            }
            Ok(n) => pending.extend_from_slice(&chunk[..n]),
            Err(ref e) if e.kind() == ErrorKind::TimedOut || e.kind() == ErrorKind::WouldBlock => {
                // Timeout normal, continua
                continue;
            }
            Err(e) => return Err(e),
        }

        while let Some(frame) = take_frame(&mut pending) {
            let msg = match decode_message(&frame) {
                Ok(msg) => msg,
                Err(e) => {
                    debug!("Frame inválido do thing: {e}");
                    continue;
                }
            };
            debug!("← {:?}", msg.message_type());

            let reaction = session.handle(msg);
            for reply in &reaction.replies {
                match encode_message(reply) {
                    Ok(bytes) => stream.write_all(&bytes)?,
                    Err(e) => warn!("Falha ao codificar {:?}: {e}", reply.message_type()),
                }
            }
            if let Some(event) = reaction.event {
                forward(tx, event);
            }
        }
    }
}

/// Envio não bloqueante: se o loop principal está lento, descarta eventos.
fn forward(tx: &Sender<GatewayEvent>, event: GatewayEvent) {
    if tx.try_send(event).is_err() {
        debug!("Channel cheio, descartando evento");
    }
}
