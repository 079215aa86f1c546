//! Blocking JDWP connection.
//!
//! Replies and VM events share one socket. Events that arrive while a reply is
//! outstanding are queued and handed out by [`Connection::next_event`].

use super::packet::{CommandPacket, Packet};
use super::JdwpError;
use std::collections::VecDeque;
use std::io::{self, BufRead, BufReader, Write};
use std::net::{Shutdown, TcpStream};
use std::time::Duration;

pub const HANDSHAKE: &[u8] = b"JDWP-Handshake";

const MIN_POLL: Duration = Duration::from_millis(1);

pub struct Connection {
    writer: TcpStream,
    reader: BufReader<TcpStream>,
    next_id: u32,
    pending_events: VecDeque<CommandPacket>,
    reply_timeout: Duration,
}

impl Connection {
    /// Perform the handshake on an accepted stream.
    pub fn establish(stream: TcpStream, reply_timeout: Duration) -> Result<Self, JdwpError> {
        stream.set_nodelay(true)?;
        let reader = BufReader::new(stream.try_clone()?);
        let mut conn = Self {
            writer: stream,
            reader,
            next_id: 1,
            pending_events: VecDeque::new(),
            reply_timeout: reply_timeout.max(MIN_POLL),
        };
        conn.handshake()?;
        Ok(conn)
    }

    fn handshake(&mut self) -> Result<(), JdwpError> {
        self.writer
            .write_all(HANDSHAKE)
            .map_err(|e| JdwpError::Handshake(format!("failed to send handshake: {e}")))?;
        self.set_read_timeout(self.reply_timeout)?;

        let mut echo = [0u8; HANDSHAKE.len()];
        io::Read::read_exact(&mut self.reader, &mut echo)
            .map_err(|e| JdwpError::Handshake(format!("no handshake reply: {e}")))?;
        if echo != HANDSHAKE {
            return Err(JdwpError::Handshake(format!(
                "unexpected handshake reply {:?}",
                String::from_utf8_lossy(&echo)
            )));
        }
        tracing::debug!("JDWP handshake complete");
        Ok(())
    }

    fn set_read_timeout(&self, timeout: Duration) -> Result<(), JdwpError> {
        self.reader
            .get_ref()
            .set_read_timeout(Some(timeout.max(MIN_POLL)))?;
        Ok(())
    }

    /// Send a command and block until its reply arrives.
    pub fn command(
        &mut self,
        command_set: u8,
        command: u8,
        data: Vec<u8>,
    ) -> Result<Vec<u8>, JdwpError> {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);

        let packet = CommandPacket {
            id,
            command_set,
            command,
            data,
        };
        self.writer
            .write_all(&packet.encode())
            .map_err(|e| self.map_io(e))?;

        self.set_read_timeout(self.reply_timeout)?;
        loop {
            match self.read_packet()? {
                Packet::Reply(reply) if reply.id == id => {
                    if reply.error_code != 0 {
                        return Err(JdwpError::Reply {
                            command_set,
                            command,
                            code: super::ErrorCode(reply.error_code),
                        });
                    }
                    return Ok(reply.data);
                }
                Packet::Reply(reply) => {
                    tracing::debug!("Dropping reply {} while waiting for {}", reply.id, id);
                }
                Packet::Command(event) => self.pending_events.push_back(event),
            }
        }
    }

    /// Return the next event packet, waiting at most `poll` for one to start arriving.
    pub fn next_event(&mut self, poll: Duration) -> Result<Option<CommandPacket>, JdwpError> {
        if let Some(event) = self.pending_events.pop_front() {
            return Ok(Some(event));
        }

        if self.reader.buffer().is_empty() {
            self.set_read_timeout(poll)?;
            let readable = self.reader.fill_buf().map(|buf| !buf.is_empty());
            match readable {
                Ok(true) => {}
                Ok(false) => return Err(JdwpError::Disconnected),
                Err(e) if is_timeout(&e) => return Ok(None),
                Err(e) => return Err(self.map_io(e)),
            }
        }

        self.set_read_timeout(self.reply_timeout)?;
        match self.read_packet()? {
            Packet::Command(event) => Ok(Some(event)),
            Packet::Reply(reply) => {
                tracing::debug!("Dropping unsolicited reply {}", reply.id);
                Ok(None)
            }
        }
    }

    fn read_packet(&mut self) -> Result<Packet, JdwpError> {
        match Packet::read_from(&mut self.reader) {
            Err(JdwpError::Io(e)) => Err(self.map_io(e)),
            other => other,
        }
    }

    fn map_io(&self, e: io::Error) -> JdwpError {
        match e.kind() {
            io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe => JdwpError::Disconnected,
            _ if is_timeout(&e) => JdwpError::Timeout(self.reply_timeout),
            _ => JdwpError::Io(e),
        }
    }

    /// Close both directions of the socket. Errors are ignored.
    pub fn shutdown(&self) {
        let _ = self.writer.shutdown(Shutdown::Both);
    }
}

fn is_timeout(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}
