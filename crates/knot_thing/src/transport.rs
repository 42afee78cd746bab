//! Transporte TCP no lugar do rádio: o agente escuta e o gateway conecta.
//!
//! TCP é um fluxo; os frames são remontados pelo header `{tipo, payload_len}`.
//! Na escrita, o que o socket não aceitou fica na fila da conexão e sai
//! antes de qualquer frame novo, para o gateway nunca ver frames cortados.

use std::collections::VecDeque;
use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};

use knot_core::hal::{DeviceAddress, LinkEvent, Transport, TransportError};
use knot_core::protocol::take_frame;
use tracing::{debug, info, warn};

/// Conexão aceita de um gateway.
pub struct TcpConn {
    stream: TcpStream,
    peer: SocketAddr,
    pending: Vec<u8>,
    /// Bytes aceitos por `write` que o socket ainda não levou.
    unsent: Vec<u8>,
}

impl TcpConn {
    /// Envia o que couber da fila sem bloquear.
    fn flush(&mut self) -> Result<(), TransportError> {
        while !self.unsent.is_empty() {
            match self.stream.write(&self.unsent) {
                Ok(0) => return Err(std::io::Error::from(ErrorKind::WriteZero).into()),
                Ok(n) => {
                    self.unsent.drain(..n);
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    debug!("{} bytes aguardando envio para {}", self.unsent.len(), self.peer);
                    return Ok(());
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

pub struct TcpTransport {
    listen_addr: String,
    listener: Option<TcpListener>,
    events: VecDeque<LinkEvent>,
}

impl TcpTransport {
    pub fn new(listen_addr: &str) -> Self {
        Self {
            listen_addr: listen_addr.to_string(),
            listener: None,
            events: VecDeque::new(),
        }
    }

    /// Endereço efetivo do listener (útil com porta 0).
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.as_ref().and_then(|l| l.local_addr().ok())
    }

    /// Lê tudo o que o socket tiver disponível sem bloquear.
    fn fill(&mut self, conn: &mut TcpConn) -> Result<(), TransportError> {
        let mut chunk = [0u8; 256];
        loop {
            match conn.stream.read(&mut chunk) {
                Ok(0) => {
                    info!("Gateway {} fechou a conexão", conn.peer);
                    self.events.push_back(LinkEvent::Disconnected);
                    return Ok(());
                }
                Ok(n) => conn.pending.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(()),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }
}

impl Transport for TcpTransport {
    type Conn = TcpConn;

    fn init(&mut self, address: DeviceAddress, name: &str) -> Result<(), TransportError> {
        info!("Transporte TCP para \"{name}\" ({address}) em {}", self.listen_addr);
        self.events.clear();
        Ok(())
    }

    fn deinit(&mut self) {
        self.listener = None;
        self.events.clear();
    }

    fn listen(&mut self) -> Result<(), TransportError> {
        if self.listener.is_none() {
            let listener = TcpListener::bind(&self.listen_addr)?;
            listener.set_nonblocking(true)?;
            self.listener = Some(listener);
            if let Some(addr) = self.local_addr() {
                info!("Aguardando gateway em {addr}");
            }
        }
        Ok(())
    }

    fn accept(&mut self) -> Result<TcpConn, TransportError> {
        let listener = self.listener.as_ref().ok_or(TransportError::Closed)?;
        let (stream, peer) = listener.accept()?;
        stream.set_nonblocking(true)?;
        stream.set_nodelay(true).ok();
        info!("Gateway conectado: {peer}");
        self.events.clear();
        Ok(TcpConn {
            stream,
            peer,
            pending: Vec::new(),
            unsent: Vec::new(),
        })
    }

    fn read(&mut self, conn: &mut TcpConn, buf: &mut [u8]) -> Result<usize, TransportError> {
        conn.flush()?;
        self.fill(conn)?;
        loop {
            let Some(frame) = take_frame(&mut conn.pending) else {
                return Err(TransportError::WouldBlock);
            };
            if frame.len() > buf.len() {
                warn!("Frame de {} bytes descartado (buffer de {})", frame.len(), buf.len());
                continue;
            }
            buf[..frame.len()].copy_from_slice(&frame);
            debug!("← {} bytes de {}", frame.len(), conn.peer);
            return Ok(frame.len());
        }
    }

    fn write(&mut self, conn: &mut TcpConn, frame: &[u8]) -> Result<usize, TransportError> {
        conn.unsent.extend_from_slice(frame);
        conn.flush()?;
        debug!("→ {} bytes para {}", frame.len(), conn.peer);
        Ok(frame.len())
    }

    fn close(&mut self, conn: TcpConn) {
        let _ = conn.stream.shutdown(Shutdown::Both);
        debug!("Conexão com {} fechada", conn.peer);
    }

    fn read_event(&mut self) -> Option<LinkEvent> {
        self.events.pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use knot_core::protocol::{Message, decode_message, encode_message};
    use std::time::{Duration, Instant};

    fn accept_within(transport: &mut TcpTransport) -> TcpConn {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            match transport.accept() {
                Ok(conn) => return conn,
                Err(TransportError::WouldBlock) if Instant::now() < deadline => {
                    std::thread::sleep(Duration::from_millis(5));
                }
                Err(e) => panic!("accept falhou: {e}"),
            }
        }
    }

    fn read_within(transport: &mut TcpTransport, conn: &mut TcpConn, buf: &mut [u8]) -> usize {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            match transport.read(conn, buf) {
                Ok(n) => return n,
                Err(TransportError::WouldBlock) if Instant::now() < deadline => {
                    std::thread::sleep(Duration::from_millis(5));
                }
                Err(e) => panic!("read falhou: {e}"),
            }
        }
    }

    #[test]
    fn frames_cross_the_socket() {
        let mut transport = TcpTransport::new("127.0.0.1:0");
        transport.init(DeviceAddress(1), "test").unwrap();
        transport.listen().unwrap();
        let addr = transport.local_addr().unwrap();

        let mut gateway = TcpStream::connect(addr).unwrap();
        let mut conn = accept_within(&mut transport);

        // Dois frames no mesmo segmento
        let mut bytes = encode_message(&Message::GetData { sensor_id: 4 }).unwrap();
        bytes.extend(encode_message(&Message::UnregisterReq).unwrap());
        gateway.write_all(&bytes).unwrap();

        let mut buf = [0u8; 128];
        let n = read_within(&mut transport, &mut conn, &mut buf);
        assert_eq!(
            decode_message(&buf[..n]).unwrap(),
            Message::GetData { sensor_id: 4 }
        );
        let n = read_within(&mut transport, &mut conn, &mut buf);
        assert_eq!(decode_message(&buf[..n]).unwrap(), Message::UnregisterReq);

        let reply = encode_message(&Message::UnregisterResp).unwrap();
        transport.write(&mut conn, &reply).unwrap();
        let mut got = [0u8; 2];
        gateway.read_exact(&mut got).unwrap();
        assert_eq!(got.to_vec(), reply);
    }

    #[test]
    fn backpressure_keeps_frames_whole() {
        let mut transport = TcpTransport::new("127.0.0.1:0");
        transport.listen().unwrap();
        let addr = transport.local_addr().unwrap();

        let mut gateway = TcpStream::connect(addr).unwrap();
        let mut conn = accept_within(&mut transport);

        let frame = encode_message(&Message::Data {
            sensor_id: 1,
            payload: vec![0xAB; 100],
        })
        .unwrap();

        // Escreve sem o gateway ler até o socket encher
        let mut sent = 0usize;
        while conn.unsent.is_empty() {
            assert!(sent < 1_000_000, "socket nunca encheu");
            transport.write(&mut conn, &frame).unwrap();
            sent += 1;
        }
        let total = sent * frame.len();

        let reader = std::thread::spawn(move || {
            let mut received = vec![0u8; total];
            gateway.read_exact(&mut received).unwrap();
            received
        });

        let deadline = Instant::now() + Duration::from_secs(30);
        let mut buf = [0u8; 128];
        while !conn.unsent.is_empty() {
            assert!(Instant::now() < deadline, "fila não esvaziou");
            let _ = transport.read(&mut conn, &mut buf);
            std::thread::sleep(Duration::from_millis(1));
        }

        let received = reader.join().unwrap();
        assert!(received.chunks(frame.len()).all(|chunk| chunk == frame.as_slice()));
    }

    #[test]
    fn peer_close_raises_link_event() {
        let mut transport = TcpTransport::new("127.0.0.1:0");
        transport.listen().unwrap();
        let addr = transport.local_addr().unwrap();

        let gateway = TcpStream::connect(addr).unwrap();
        let mut conn = accept_within(&mut transport);
        drop(gateway);

        let deadline = Instant::now() + Duration::from_secs(5);
        let mut buf = [0u8; 128];
        while transport.read_event().is_none() {
            assert!(Instant::now() < deadline, "evento de desconexão não chegou");
            let _ = transport.read(&mut conn, &mut buf);
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn accept_without_gateway_would_block() {
        let mut transport = TcpTransport::new("127.0.0.1:0");
        assert!(matches!(transport.accept(), Err(TransportError::Closed)));
        transport.listen().unwrap();
        assert!(matches!(transport.accept(), Err(TransportError::WouldBlock)));
    }
}
