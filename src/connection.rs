use bytes::{BufMut, BytesMut};
use mqttbytes::{v4, v5, FixedHeader};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::{
    client::ProtocolVersion,
    error::{Error, Result},
};

/// Decode limit for packets read from the broker.
const MAX_PACKET_SIZE: usize = 1024;

/// Broker response to a successful probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerAck {
    pub session_present: bool,
    pub reason: String,
}

pub(crate) struct ConnectRequest<'a> {
    pub client_id: &'a str,
    pub clean_session: bool,
    pub keep_alive: u16,
    pub username: Option<&'a str>,
    pub password: Option<&'a str>,
}

enum Received {
    ConnAck {
        session_present: bool,
        accepted: bool,
        reason: String,
    },
    Other(String),
}

/// A single broker exchange over any byte stream.
pub(crate) struct Connection<S> {
    stream: S,
    buf: BytesMut,
    protocol: ProtocolVersion,
}

impl<S> Connection<S> {
    pub fn new(stream: S, protocol: ProtocolVersion) -> Self {
        Self {
            stream,
            buf: BytesMut::new(),
            protocol,
        }
    }
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub async fn connect(&mut self, request: &ConnectRequest<'_>) -> Result<()> {
        let mut buf = BytesMut::new();

        match self.protocol {
            ProtocolVersion::V311 => {
                let mut connect = v4::Connect::new(request.client_id);
                connect.keep_alive = request.keep_alive;
                connect.clean_session = request.clean_session;
                if let Some(username) = request.username {
                    let password = request.password.unwrap_or_default();
                    connect.login = Some(v4::Login::new(username, password));
                }
                connect.write(&mut buf)?;
            }
            ProtocolVersion::V5 => {
                let mut connect = v5::Connect::new(request.client_id);
                connect.keep_alive = request.keep_alive;
                connect.clean_session = request.clean_session;
                if let Some(username) = request.username {
                    let password = request.password.unwrap_or_default();
                    connect.login = Some(v5::Login::new(username, password));
                }
                connect.write(&mut buf)?;
            }
        }

        tracing::debug!(
            client_id = request.client_id,
            protocol = ?self.protocol,
            "Sending CONNECT."
        );
        self.send(buf).await
    }

    pub async fn disconnect(&mut self) -> Result<()> {
        // Zero remaining length is a normal disconnect in both protocol versions.
        let mut buf = BytesMut::with_capacity(2);
        buf.put_u8(0b_1110_0000);
        buf.put_u8(0);

        self.send(buf).await?;
        self.stream.shutdown().await?;

        tracing::debug!("Disconnected.");
        Ok(())
    }

    async fn send(&mut self, buf: BytesMut) -> Result<()> {
        let mut buf = buf.freeze();

        while !buf.is_empty() {
            if self.stream.write_buf(&mut buf).await? == 0 {
                return Err(std::io::Error::from(std::io::ErrorKind::WriteZero).into());
            }
        }
        self.stream.flush().await?;

        Ok(())
    }

    pub async fn recv_connack(&mut self) -> Result<BrokerAck> {
        loop {
            if !self.buf.is_empty() {
                match self.decode() {
                    Err(mqttbytes::Error::InsufficientBytes(len)) => {
                        let packet_type = FixedHeader::new(self.buf[0], 0, 0).packet_type()?;
                        tracing::debug!(
                            ?packet_type,
                            required_bytes = len,
                            "Insufficient bytes, more are required."
                        );
                    }
                    Err(error) => {
                        tracing::error!(?error, "Unable to read packet.");
                        return Err(error.into());
                    }
                    Ok(Received::ConnAck {
                        session_present,
                        accepted,
                        reason,
                    }) => {
                        if !accepted {
                            tracing::warn!(%reason, "Broker refused connection.");
                            return Err(Error::ConnectionRefused(reason));
                        }
                        tracing::debug!(session_present, "Received CONNACK.");
                        return Ok(BrokerAck {
                            session_present,
                            reason,
                        });
                    }
                    Ok(Received::Other(packet)) => {
                        tracing::error!(%packet, "Received packet before CONNACK.");
                        return Err(Error::UnexpectedPacket(packet));
                    }
                }
            }

            if self.stream.read_buf(&mut self.buf).await? == 0 {
                return Err(Error::ConnectionClosed);
            }
        }
    }

    fn decode(&mut self) -> std::result::Result<Received, mqttbytes::Error> {
        let received = match self.protocol {
            ProtocolVersion::V311 => match v4::read(&mut self.buf, MAX_PACKET_SIZE)? {
                v4::Packet::ConnAck(connack) => Received::ConnAck {
                    session_present: connack.session_present,
                    accepted: connack.code == v4::ConnectReturnCode::Success,
                    reason: format!("{:?}", connack.code),
                },
                packet => Received::Other(format!("{packet:?}")),
            },
            ProtocolVersion::V5 => match v5::read(&mut self.buf, MAX_PACKET_SIZE)? {
                v5::Packet::ConnAck(connack) => Received::ConnAck {
                    session_present: connack.session_present,
                    accepted: connack.code == v5::ConnectReturnCode::Success,
                    reason: format!("{:?}", connack.code),
                },
                packet => Received::Other(format!("{packet:?}")),
            },
        };

        Ok(received)
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::duplex;

    use super::*;

    fn request(client_id: &str) -> ConnectRequest<'_> {
        ConnectRequest {
            client_id,
            clean_session: true,
            keep_alive: 60,
            username: Some("user"),
            password: None,
        }
    }

    #[tokio::test]
    async fn v311_connect_carries_login() {
        let (client, mut server) = duplex(1024);
        let mut connection = Connection::new(client, ProtocolVersion::V311);

        connection.connect(&request("v311")).await.unwrap();

        let mut buf = BytesMut::new();
        server.read_buf(&mut buf).await.unwrap();
        match v4::read(&mut buf, MAX_PACKET_SIZE).unwrap() {
            v4::Packet::Connect(connect) => {
                assert_eq!(connect.client_id, "v311");
                assert!(connect.clean_session);
                assert!(connect.login.is_some());
            }
            packet => panic!("Expected CONNECT, got {packet:?}"),
        }
    }

    #[tokio::test]
    async fn connack_split_across_reads_is_assembled() {
        let (client, mut server) = duplex(64);
        let mut connection = Connection::new(client, ProtocolVersion::V311);

        tokio::spawn(async move {
            server.write_all(&[0x20, 0x02]).await.unwrap();
            tokio::task::yield_now().await;
            server.write_all(&[0x00, 0x00]).await.unwrap();
            let mut sink = [0_u8; 8];
            let _ = server.read(&mut sink).await;
        });

        let ack = connection.recv_connack().await.unwrap();
        assert!(!ack.session_present);
    }

    #[tokio::test]
    async fn eof_before_connack_is_an_error() {
        let (client, server) = duplex(64);
        let mut connection = Connection::new(client, ProtocolVersion::V5);
        drop(server);

        let error = connection.recv_connack().await.unwrap_err();
        assert!(matches!(error, Error::ConnectionClosed));
    }

    #[tokio::test]
    async fn other_packet_before_connack_is_rejected() {
        let (client, mut server) = duplex(64);
        let mut connection = Connection::new(client, ProtocolVersion::V311);

        // PINGRESP
        server.write_all(&[0xD0, 0x00]).await.unwrap();

        let error = connection.recv_connack().await.unwrap_err();
        assert!(matches!(error, Error::UnexpectedPacket(_)));
    }

    #[tokio::test]
    async fn disconnect_writes_two_bytes() {
        let (client, mut server) = duplex(64);
        let mut connection = Connection::new(client, ProtocolVersion::V311);

        connection.disconnect().await.unwrap();

        let mut buf = Vec::new();
        server.read_to_end(&mut buf).await.unwrap();
        assert_eq!(buf, [0xE0, 0x00]);
    }
}
