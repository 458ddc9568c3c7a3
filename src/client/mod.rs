use std::fmt;

use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::{TcpStream, ToSocketAddrs},
};

use crate::{
    connection::{BrokerAck, ConnectRequest, Connection},
    error::{Error, Result},
    library::{Library, Slot},
};

pub use builder::ClientBuilder;
pub use options::{ClientOptions, ProtocolVersion};

mod builder;
pub(crate) mod id;
mod options;

/// A handle to one MQTT client instance.
///
/// The handle state lives on the heap, so its address (printed with `{:p}`) is stable for the
/// lifetime of the handle. Dropping the handle frees it and its slot in the library's handle
/// table.
pub struct Client<U = ()> {
    inner: Box<Inner<U>>,
    slot: Slot,
}

struct Inner<U> {
    id: String,
    clean_session: bool,
    options: ClientOptions,
    userdata: U,
}

impl<U> Client<U> {
    pub(crate) fn allocate(
        library: &Library,
        id: Option<&str>,
        clean_session: bool,
        userdata: U,
    ) -> Result<Self> {
        let id = resolve_id(library, id, clean_session)?;
        let slot = library.handles().acquire()?;

        let inner = Box::new(Inner {
            id,
            clean_session,
            options: ClientOptions::default(),
            userdata,
        });
        tracing::debug!(client_id = %inner.id, clean_session, "Allocated client handle.");

        Ok(Self { inner, slot })
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn clean_session(&self) -> bool {
        self.inner.clean_session
    }

    pub fn options(&self) -> &ClientOptions {
        &self.inner.options
    }

    pub fn userdata(&self) -> &U {
        &self.inner.userdata
    }

    pub fn userdata_mut(&mut self) -> &mut U {
        &mut self.inner.userdata
    }

    pub fn set_userdata(&mut self, userdata: U) -> U {
        std::mem::replace(&mut self.inner.userdata, userdata)
    }

    /// Resets the handle as if it had just been allocated by `library`.
    ///
    /// `library` must be the one that allocated the handle. Options go back to their defaults.
    /// On error the handle is left untouched.
    pub fn reinitialise(
        &mut self,
        library: &Library,
        id: Option<&str>,
        clean_session: bool,
        userdata: U,
    ) -> Result<()> {
        if !library.owns(self.slot.table()) {
            return Err(Error::InvalidArgument(
                "handle was allocated by a different library".to_owned(),
            ));
        }
        let id = resolve_id(library, id, clean_session)?;

        *self.inner = Inner {
            id,
            clean_session,
            options: ClientOptions::default(),
            userdata,
        };
        tracing::debug!(client_id = %self.inner.id, clean_session, "Reinitialised client handle.");

        Ok(())
    }

    pub fn set_keep_alive(&mut self, keep_alive: u16) -> Result<()> {
        options::validate_keep_alive(keep_alive)?;
        self.inner.options.keep_alive = keep_alive;
        Ok(())
    }

    pub fn set_protocol(&mut self, protocol: ProtocolVersion) {
        self.inner.options.protocol = protocol;
    }

    /// Sets the credentials sent on connect. A `None` username clears both.
    pub fn set_credentials(&mut self, username: Option<&str>, password: Option<&str>) -> Result<()> {
        let options = &mut self.inner.options;
        match username {
            Some(username) => {
                id::validate_utf8(username)?;
                options.username = Some(username.to_owned());
                options.password = password.map(str::to_owned);
            }
            None => {
                options.username = None;
                options.password = None;
            }
        }
        Ok(())
    }

    pub fn set_options(&mut self, options: ClientOptions) -> Result<()> {
        options.validate()?;
        self.inner.options = options;
        Ok(())
    }

    /// Checks that a broker at `address` accepts this client.
    ///
    /// Performs a single CONNECT/CONNACK exchange, then disconnects. The whole exchange is
    /// bounded by the connect timeout of the client options.
    pub async fn probe<A: ToSocketAddrs>(&self, address: A) -> Result<BrokerAck> {
        let timeout = self.options().connect_timeout();

        tokio::time::timeout(timeout, self.connect(address))
            .await
            .map_err(|_| {
                tracing::warn!(client_id = %self.id(), ?timeout, "Broker probe timed out.");
                Error::Timeout
            })?
    }

    async fn connect<A: ToSocketAddrs>(&self, address: A) -> Result<BrokerAck> {
        let stream = TcpStream::connect(address).await?;
        self.handshake(stream).await
    }

    pub(crate) async fn handshake<S>(&self, stream: S) -> Result<BrokerAck>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let options = self.options();
        let mut connection = Connection::new(stream, options.protocol);

        connection
            .connect(&ConnectRequest {
                client_id: self.id(),
                clean_session: self.clean_session(),
                keep_alive: options.keep_alive,
                username: options.username.as_deref(),
                password: options.password.as_deref(),
            })
            .await?;

        let ack = connection.recv_connack().await?;
        connection.disconnect().await?;

        Ok(ack)
    }
}

impl<U> fmt::Pointer for Client<U> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ptr: *const Inner<U> = &*self.inner;
        fmt::Pointer::fmt(&ptr, f)
    }
}

impl<U> fmt::Debug for Client<U> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("id", &self.inner.id)
            .field("clean_session", &self.inner.clean_session)
            .field("options", &self.inner.options)
            .finish_non_exhaustive()
    }
}

impl<U> Drop for Client<U> {
    fn drop(&mut self) {
        tracing::debug!(client_id = %self.inner.id, "Destroyed client handle.");
    }
}

fn resolve_id(library: &Library, id: Option<&str>, clean_session: bool) -> Result<String> {
    match id {
        None if !clean_session => Err(Error::InvalidArgument(
            "a client id is required when clean session is disabled".to_owned(),
        )),
        None => Ok(id::generate(&library.options().id_prefix)),
        Some("") => Err(Error::InvalidArgument(
            "client id must not be empty".to_owned(),
        )),
        Some(id) => {
            id::validate_utf8(id)?;
            Ok(id.to_owned())
        }
    }
}

#[cfg(test)]
mod tests {
    use bytes::BytesMut;
    use mqttbytes::v5;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use super::*;

    #[test]
    fn anonymous_clean_client_gets_generated_id() {
        let library = Library::init();
        let client = library.new_client(None, true, ()).unwrap();

        assert!(client.id().starts_with(id::DEFAULT_PREFIX));
        assert_eq!(client.id().len(), id::GENERATED_LEN);
        assert!(client.clean_session());
    }

    #[test]
    fn anonymous_persistent_session_is_rejected() {
        let library = Library::init();
        let error = library.new_client(None, false, ()).unwrap_err();

        assert!(matches!(error, Error::InvalidArgument(_)));
        assert_eq!(library.live_clients(), 0);
    }

    #[test]
    fn empty_and_malformed_ids_are_rejected() {
        let library = Library::init();

        assert!(matches!(
            library.new_client(Some(""), true, ()),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            library.new_client(Some("bad\0id"), true, ()),
            Err(Error::MalformedUtf8)
        ));
    }

    #[test]
    fn userdata_is_owned_by_the_handle() {
        let library = Library::init();
        let mut client = library
            .new_client(Some("counter"), false, 1_u32)
            .unwrap();

        *client.userdata_mut() += 1;
        assert_eq!(*client.userdata(), 2);
        assert_eq!(client.set_userdata(10), 2);
        assert_eq!(*client.userdata(), 10);
    }

    #[test]
    fn address_is_stable_across_moves() {
        let library = Library::init();
        let client = library.new_client(None, true, ()).unwrap();
        let before = format!("{client:p}");

        let moved = vec![client];
        assert_eq!(format!("{:p}", moved[0]), before);
        assert!(before.starts_with("0x"));
    }

    #[test]
    fn reinitialise_resets_state_and_keeps_slot() {
        let library = Library::init();
        let mut client = library.new_client(Some("first"), true, "a").unwrap();
        client.set_keep_alive(30).unwrap();

        client
            .reinitialise(&library, Some("second"), false, "b")
            .unwrap();

        assert_eq!(client.id(), "second");
        assert!(!client.clean_session());
        assert_eq!(*client.userdata(), "b");
        assert_eq!(client.options(), &ClientOptions::default());
        assert_eq!(library.live_clients(), 1);
    }

    #[test]
    fn failed_reinitialise_leaves_handle_untouched() {
        let library = Library::init();
        let mut client = library.new_client(Some("keep"), true, ()).unwrap();

        let error = client.reinitialise(&library, None, false, ()).unwrap_err();

        assert!(matches!(error, Error::InvalidArgument(_)));
        assert_eq!(client.id(), "keep");
    }

    #[test]
    fn reinitialise_requires_the_allocating_library() {
        let library = Library::init();
        let other = Library::init();
        let mut client = library.new_client(Some("owned"), true, ()).unwrap();

        let error = client
            .reinitialise(&other, Some("moved"), true, ())
            .unwrap_err();

        assert!(matches!(error, Error::InvalidArgument(_)));
        assert_eq!(client.id(), "owned");
        assert_eq!(library.live_clients(), 1);
        assert_eq!(other.live_clients(), 0);
    }

    #[test]
    fn credentials_can_be_set_and_cleared() {
        let library = Library::init();
        let mut client = library.new_client(None, true, ()).unwrap();

        client.set_credentials(Some("user"), Some("pass")).unwrap();
        assert_eq!(client.options().username.as_deref(), Some("user"));
        assert_eq!(client.options().password.as_deref(), Some("pass"));

        client.set_credentials(None, Some("ignored")).unwrap();
        assert_eq!(client.options().username, None);
        assert_eq!(client.options().password, None);

        assert!(client.set_credentials(Some("bad\u{7}"), None).is_err());
    }

    async fn read_connect(server: &mut tokio::io::DuplexStream) -> v5::Connect {
        let mut buf = BytesMut::new();
        loop {
            match v5::read(&mut buf, 1024) {
                Ok(v5::Packet::Connect(connect)) => return connect,
                Ok(packet) => panic!("Expected CONNECT, got {packet:?}"),
                Err(mqttbytes::Error::InsufficientBytes(_)) => {
                    assert!(server.read_buf(&mut buf).await.unwrap() > 0);
                }
                Err(error) => panic!("Unable to read CONNECT: {error:?}"),
            }
        }
    }

    #[tokio::test]
    async fn handshake_sends_handle_identity() {
        let library = Library::init();
        let mut client = library.new_client(Some("probe-me"), false, ()).unwrap();
        client.set_protocol(ProtocolVersion::V5);
        client.set_keep_alive(15).unwrap();

        let (client_io, mut server) = tokio::io::duplex(1024);

        let broker = tokio::spawn(async move {
            let connect = read_connect(&mut server).await;
            // CONNACK: session present, success, no properties.
            server.write_all(&[0x20, 0x03, 0x01, 0x00, 0x00]).await.unwrap();

            let mut disconnect = [0_u8; 2];
            server.read_exact(&mut disconnect).await.unwrap();
            (connect, disconnect)
        });

        let ack = client.handshake(client_io).await.unwrap();
        assert!(ack.session_present);

        let (connect, disconnect) = broker.await.unwrap();
        assert_eq!(connect.client_id, "probe-me");
        assert!(!connect.clean_session);
        assert_eq!(connect.keep_alive, 15);
        assert_eq!(disconnect[0], 0xE0);
    }

    #[tokio::test]
    async fn refused_connack_is_reported() {
        let library = Library::init();
        let client = library.new_client(None, true, ()).unwrap();

        let (client_io, mut server) = tokio::io::duplex(1024);

        tokio::spawn(async move {
            let mut buf = [0_u8; 256];
            let _ = server.read(&mut buf).await;
            // MQTT 3.1.1 CONNACK, return code 5: not authorized.
            server.write_all(&[0x20, 0x02, 0x00, 0x05]).await.unwrap();
            let _ = server.read(&mut buf).await;
        });

        let error = client.handshake(client_io).await.unwrap_err();
        assert!(matches!(error, Error::ConnectionRefused(_)));
    }

    #[tokio::test]
    async fn probe_times_out_on_silent_broker() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(std::time::Duration::from_secs(5)).await;
        });

        let library = Library::init();
        let client = ClientBuilder::new()
            .options(ClientOptions {
                connect_timeout_ms: 100,
                ..Default::default()
            })
            .build(&library, ())
            .unwrap();

        let error = client.probe(address).await.unwrap_err();
        assert!(matches!(error, Error::Timeout));
    }
}
